//! Short Straddle Backtester
//!
//! Simulates an intraday short-straddle strategy (sell the ATM call and put,
//! exit on stop, target or end of day, re-enter after a cooldown) over many
//! trading sessions, and sweeps parameter grids to rank configurations.
//!
//! The execution core is the per-session state machine in
//! [`strategies::short_straddle`]; [`session`] runs it over one day,
//! [`backtest`] over a schedule of days, and [`optimizer`] over a grid.

pub mod backtest;
pub mod config;
pub mod data;
pub mod error;
pub mod grid;
pub mod metrics;
pub mod optimizer;
pub mod report;
pub mod session;
pub mod strategies;
pub mod types;

pub use config::Config;
pub use error::*;
pub use types::*;
