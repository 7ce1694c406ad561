//! Short Straddle Strategy Module
//!
//! Sell the at-the-money call and put at the open of the entry window, exit on
//! a percentage stop, target or the end of the day, and re-enter after a
//! cooldown while the day's loss cap and re-entry budget allow.

pub mod config;
pub mod strategy;
pub mod utils;

pub use config::{ExitMode, StrategyConfig, StrategyParams};
pub use strategy::{ClosedPosition, DayStatus, MachineState, SessionState, Step, StraddleStateMachine};
pub use utils::{atm_strike, strike_step};
