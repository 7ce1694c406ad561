//! Short Straddle State Machine
//!
//! Consumes one session's observations in order and decides, per observation,
//! whether to enter, hold, exit or wait.
//!
//! ```text
//! FLAT --(in window)--> IN_POSITION --(stop/target)--> COOLDOWN --(delay elapsed)--> FLAT
//!                            |                            |
//!                            +--(t >= close)--> DONE <----+
//!                            +--(day loss cap)--> DAY_LOCKED
//! ```
//!
//! Each observation is checked against its predecessor before anything else:
//! a timestamp that does not advance, or advances by more than the gap
//! tolerance, aborts the session with a [`DataError`].

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{DataError, ExecutionInvariantError, SessionError};
use crate::{IntradayMark, Money, Observation, Position, PositionStatus};

use super::config::StrategyConfig;
use super::utils::{stop_hit, target_hit};

/// Where the machine is within the trading day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MachineState {
    Flat,
    InPosition,
    Cooldown,
    DayLocked,
    Done,
}

impl MachineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, MachineState::DayLocked | MachineState::Done)
    }
}

/// Outcome of the trading day as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DayStatus {
    Trading,
    LockedMaxLoss,
    Done,
}

/// Mutable per-session bookkeeping. Owned by exactly one machine.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    /// Net of charges
    pub cumulative_day_pnl: Money,
    /// Positions opened after the first one
    pub reentry_count: u32,
    pub last_exit_time: Option<NaiveDateTime>,
    pub current_position: Option<Position>,
    pub day_status: DayStatus,
    pub machine_state: MachineState,
}

impl SessionState {
    fn new() -> Self {
        Self {
            cumulative_day_pnl: Money::ZERO,
            reentry_count: 0,
            last_exit_time: None,
            current_position: None,
            day_status: DayStatus::Trading,
            machine_state: MachineState::Flat,
        }
    }
}

/// What a single observation caused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Before the window, in cooldown, or after the day ended
    Idle,
    Entered,
    Holding,
    Exited(PositionStatus),
}

/// A closed position, which entry of the day it was (0 = first), and its
/// mark-to-market path from entry to exit
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedPosition {
    pub reentry: u32,
    pub position: Position,
    pub marks: Vec<IntradayMark>,
}

pub struct StraddleStateMachine<'a> {
    config: &'a StrategyConfig,
    state: SessionState,
    last_timestamp: Option<NaiveDateTime>,
    last_observation: Option<Observation>,
    positions_opened: usize,
    marks: Vec<IntradayMark>,
    closed: Vec<ClosedPosition>,
}

impl<'a> StraddleStateMachine<'a> {
    pub fn new(config: &'a StrategyConfig) -> Self {
        Self {
            config,
            state: SessionState::new(),
            last_timestamp: None,
            last_observation: None,
            positions_opened: 0,
            marks: Vec::new(),
            closed: Vec::new(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn machine_state(&self) -> MachineState {
        self.state.machine_state
    }

    /// Advance the machine by one observation
    pub fn on_observation(&mut self, observation: &Observation) -> Result<Step, SessionError> {
        self.check_sequence(observation)?;
        observation.validate().map_err(DataError::from)?;
        self.last_observation = Some(observation.clone());

        let at_close = observation.timestamp.time() >= self.config.market_close();

        let step = match self.state.machine_state {
            MachineState::DayLocked | MachineState::Done => Step::Idle,

            MachineState::InPosition => {
                self.record_mark(observation);
                if at_close {
                    self.exit(observation, PositionStatus::ClosedEod)?;
                    Step::Exited(PositionStatus::ClosedEod)
                } else if let Some(status) = self.exit_signal(observation) {
                    self.exit(observation, status)?;
                    Step::Exited(status)
                } else {
                    Step::Holding
                }
            }

            MachineState::Cooldown => {
                if at_close {
                    self.finish_day();
                    Step::Idle
                } else if self.cooldown_elapsed(observation.timestamp) {
                    debug!("cooldown over at {}", observation.timestamp);
                    self.state.machine_state = MachineState::Flat;
                    self.try_enter(observation)?
                } else {
                    Step::Idle
                }
            }

            MachineState::Flat => {
                if at_close {
                    self.finish_day();
                    Step::Idle
                } else {
                    self.try_enter(observation)?
                }
            }
        };

        Ok(step)
    }

    /// End the session. A position still open is closed at the last
    /// observation seen, as an end-of-day exit.
    pub fn finish(mut self) -> Result<(Vec<ClosedPosition>, SessionState), ExecutionInvariantError> {
        if self.state.machine_state == MachineState::InPosition {
            let last = match self.last_observation.clone() {
                Some(obs) => obs,
                None => {
                    let entry_time = self
                        .state
                        .current_position
                        .as_ref()
                        .map(|p| p.entry_time)
                        .unwrap_or_default();
                    return Err(ExecutionInvariantError::DanglingPosition(entry_time));
                }
            };
            warn!(
                "data ended at {} with position open, closing at last observation",
                last.timestamp
            );
            self.exit(&last, PositionStatus::ClosedEod)?;
        }

        if !self.state.machine_state.is_terminal() {
            self.finish_day();
        }

        let limit = self.config.max_trades_per_session();
        if self.closed.len() > limit {
            return Err(ExecutionInvariantError::TradeLimitExceeded {
                count: self.closed.len(),
                limit,
            });
        }

        Ok((self.closed, self.state))
    }

    fn check_sequence(&mut self, observation: &Observation) -> Result<(), DataError> {
        let current = observation.timestamp;
        if let Some(previous) = self.last_timestamp {
            if current <= previous {
                return Err(DataError::OutOfOrder { previous, current });
            }
            let gap = current - previous;
            if gap > self.config.max_gap() {
                return Err(DataError::Gap {
                    previous,
                    current,
                    gap_minutes: gap.num_minutes(),
                    tolerance_minutes: self.config.max_gap().num_minutes(),
                });
            }
        }
        self.last_timestamp = Some(current);
        Ok(())
    }

    fn cooldown_elapsed(&self, now: NaiveDateTime) -> bool {
        match self.state.last_exit_time {
            Some(exit) => now - exit >= self.config.reentry_delay(),
            None => true,
        }
    }

    fn try_enter(&mut self, observation: &Observation) -> Result<Step, ExecutionInvariantError> {
        if observation.timestamp.time() < self.config.market_open() {
            return Ok(Step::Idle);
        }

        let limit = self.config.max_trades_per_session();
        if self.positions_opened >= limit {
            return Err(ExecutionInvariantError::TradeLimitExceeded {
                count: self.positions_opened + 1,
                limit,
            });
        }

        if self.positions_opened > 0 {
            self.state.reentry_count += 1;
        }
        self.positions_opened += 1;

        let position = Position::open(observation, self.config.lots(), self.config.lot_size());
        debug!(
            "entered straddle #{} at {} premium {} (C {} / P {})",
            self.state.reentry_count,
            observation.timestamp,
            position.entry_premium,
            position.call_entry,
            position.put_entry
        );
        self.state.current_position = Some(position);
        self.state.machine_state = MachineState::InPosition;
        self.record_mark(observation);
        Ok(Step::Entered)
    }

    /// Stop is evaluated first; it wins when both thresholds are met
    fn exit_signal(&self, observation: &Observation) -> Option<PositionStatus> {
        let position = self.state.current_position.as_ref()?;
        let mode = self.config.exit_mode();

        if stop_hit(position, observation, mode, self.config.stop_loss_pct()) {
            Some(PositionStatus::ClosedStop)
        } else if target_hit(position, observation, mode, self.config.target_profit_pct()) {
            Some(PositionStatus::ClosedTarget)
        } else {
            None
        }
    }

    fn exit(&mut self, observation: &Observation, status: PositionStatus) -> Result<(), ExecutionInvariantError> {
        let mut position = match self.state.current_position.take() {
            Some(position) => position,
            None => return Err(ExecutionInvariantError::InvalidExitStatus(status)),
        };

        let gross = position.close(observation, status)?;
        let net = gross - self.config.round_trip_charges();
        self.state.cumulative_day_pnl += net;
        self.state.last_exit_time = Some(observation.timestamp);

        debug!(
            "exited {} at {} premium {:?} pnl {} (day {})",
            status,
            observation.timestamp,
            position.exit_premium,
            net,
            self.state.cumulative_day_pnl
        );

        self.closed.push(ClosedPosition {
            reentry: self.current_reentry(),
            position,
            marks: std::mem::take(&mut self.marks),
        });
        self.after_exit(status);
        Ok(())
    }

    fn after_exit(&mut self, status: PositionStatus) {
        let loss_cap_hit = self.state.cumulative_day_pnl <= -self.config.max_loss_per_day();

        if status == PositionStatus::ClosedEod {
            self.state.machine_state = MachineState::Done;
            self.state.day_status = if loss_cap_hit {
                DayStatus::LockedMaxLoss
            } else {
                DayStatus::Done
            };
        } else if loss_cap_hit {
            debug!(
                "day loss cap reached ({} <= -{}), locking",
                self.state.cumulative_day_pnl,
                self.config.max_loss_per_day()
            );
            self.state.machine_state = MachineState::DayLocked;
            self.state.day_status = DayStatus::LockedMaxLoss;
        } else if status == PositionStatus::ClosedTarget && !self.config.reentry_on_target() {
            self.finish_day();
        } else if self.state.reentry_count >= self.config.max_reentries() {
            debug!("re-entries exhausted ({})", self.state.reentry_count);
            self.finish_day();
        } else {
            self.state.machine_state = MachineState::Cooldown;
        }
    }

    fn current_reentry(&self) -> u32 {
        self.positions_opened.saturating_sub(1) as u32
    }

    /// Append the open position's mark at this observation
    fn record_mark(&mut self, observation: &Observation) {
        let reentry = self.current_reentry();
        if let Some(position) = &self.state.current_position {
            self.marks.push(IntradayMark {
                reentry,
                timestamp: observation.timestamp,
                underlying: observation.underlying,
                call_premium: observation.call_premium,
                put_premium: observation.put_premium,
                pnl: position.mark_to_market(observation),
            });
        }
    }

    fn finish_day(&mut self) {
        self.state.machine_state = MachineState::Done;
        if self.state.day_status == DayStatus::Trading {
            self.state.day_status = DayStatus::Done;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::short_straddle::{ExitMode, StrategyParams};
    use chrono::NaiveDate;

    fn ts(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 2, 6)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn obs(h: u32, m: u32, call: f64, put: f64) -> Observation {
        Observation::new_unchecked(ts(h, m), 23_000.0, call, put)
    }

    fn config(f: impl FnOnce(&mut StrategyParams)) -> StrategyConfig {
        let mut params = StrategyParams::new("NIFTY", NaiveDate::from_ymd_opt(2025, 2, 6).unwrap());
        params.stop_loss_pct = 25.0;
        params.target_profit_pct = 75.0;
        params.max_reentries = 2.0;
        params.reentry_delay_minutes = 10.0;
        f(&mut params);
        StrategyConfig::new(params).unwrap()
    }

    #[test]
    fn test_waits_for_market_open() {
        let config = config(|_| {});
        let mut machine = StraddleStateMachine::new(&config);
        assert_eq!(machine.on_observation(&obs(9, 15, 100.0, 100.0)).unwrap(), Step::Idle);
        assert_eq!(machine.machine_state(), MachineState::Flat);
        assert_eq!(machine.on_observation(&obs(9, 20, 100.0, 100.0)).unwrap(), Step::Entered);
        assert_eq!(machine.machine_state(), MachineState::InPosition);
        assert_eq!(machine.state().reentry_count, 0);
    }

    #[test]
    fn test_stop_wins_over_target() {
        // Per-leg: call up 30% (stop) while put down 80% (target) on the same tick
        let config = config(|p| p.exit_mode = ExitMode::PerLeg);
        let mut machine = StraddleStateMachine::new(&config);
        machine.on_observation(&obs(9, 20, 100.0, 100.0)).unwrap();
        let step = machine.on_observation(&obs(9, 21, 130.0, 20.0)).unwrap();
        assert_eq!(step, Step::Exited(PositionStatus::ClosedStop));
    }

    #[test]
    fn test_cooldown_blocks_until_delay() {
        let config = config(|_| {});
        let mut machine = StraddleStateMachine::new(&config);
        machine.on_observation(&obs(9, 20, 100.0, 100.0)).unwrap();
        // +25% stop
        let step = machine.on_observation(&obs(9, 21, 125.0, 125.0)).unwrap();
        assert_eq!(step, Step::Exited(PositionStatus::ClosedStop));
        assert_eq!(machine.machine_state(), MachineState::Cooldown);

        for minute in 22..31 {
            assert_eq!(machine.on_observation(&obs(9, minute, 120.0, 120.0)).unwrap(), Step::Idle);
        }
        assert_eq!(machine.on_observation(&obs(9, 31, 120.0, 120.0)).unwrap(), Step::Entered);
        assert_eq!(machine.state().reentry_count, 1);
    }

    #[test]
    fn test_eod_closes_position() {
        let config = config(|_| {});
        let mut machine = StraddleStateMachine::new(&config);
        machine.on_observation(&obs(15, 18, 100.0, 100.0)).unwrap();
        machine.on_observation(&obs(15, 19, 100.0, 100.0)).unwrap();
        let step = machine.on_observation(&obs(15, 20, 90.0, 90.0)).unwrap();
        assert_eq!(step, Step::Exited(PositionStatus::ClosedEod));
        assert_eq!(machine.machine_state(), MachineState::Done);
        assert_eq!(machine.on_observation(&obs(15, 21, 90.0, 90.0)).unwrap(), Step::Idle);
    }

    #[test]
    fn test_daily_loss_cap_locks_day() {
        // One stop loses (250 - 200) * 75 = 3750; cap at 3000
        let config = config(|p| p.max_loss_per_day = 3_000.0);
        let mut machine = StraddleStateMachine::new(&config);
        machine.on_observation(&obs(9, 20, 100.0, 100.0)).unwrap();
        machine.on_observation(&obs(9, 21, 125.0, 125.0)).unwrap();
        assert_eq!(machine.machine_state(), MachineState::DayLocked);
        assert_eq!(machine.state().day_status, DayStatus::LockedMaxLoss);

        for minute in 22..40 {
            assert_eq!(machine.on_observation(&obs(9, minute, 100.0, 100.0)).unwrap(), Step::Idle);
        }
        let (closed, state) = machine.finish().unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(state.day_status, DayStatus::LockedMaxLoss);
    }

    #[test]
    fn test_no_reentry_after_target_when_disabled() {
        let config = config(|p| p.reentry_on_target = false);
        let mut machine = StraddleStateMachine::new(&config);
        machine.on_observation(&obs(9, 20, 100.0, 100.0)).unwrap();
        let step = machine.on_observation(&obs(9, 21, 25.0, 25.0)).unwrap();
        assert_eq!(step, Step::Exited(PositionStatus::ClosedTarget));
        assert_eq!(machine.machine_state(), MachineState::Done);
    }

    #[test]
    fn test_reentries_exhausted_ends_day() {
        let config = config(|p| {
            p.max_reentries = 0.0;
            p.reentry_delay_minutes = 0.0;
        });
        let mut machine = StraddleStateMachine::new(&config);
        machine.on_observation(&obs(9, 20, 100.0, 100.0)).unwrap();
        machine.on_observation(&obs(9, 21, 125.0, 125.0)).unwrap();
        assert_eq!(machine.machine_state(), MachineState::Done);
        assert_eq!(machine.on_observation(&obs(9, 22, 100.0, 100.0)).unwrap(), Step::Idle);
        let (closed, state) = machine.finish().unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(state.day_status, DayStatus::Done);
    }

    #[test]
    fn test_marks_follow_position_from_entry_to_exit() {
        let config = config(|_| {});
        let mut machine = StraddleStateMachine::new(&config);
        machine.on_observation(&obs(9, 19, 100.0, 100.0)).unwrap();
        machine.on_observation(&obs(9, 20, 100.0, 100.0)).unwrap();
        machine.on_observation(&obs(9, 21, 110.0, 100.0)).unwrap();
        machine.on_observation(&obs(9, 22, 125.0, 125.0)).unwrap();
        // Cooldown: no position, no marks
        machine.on_observation(&obs(9, 23, 120.0, 120.0)).unwrap();

        let (closed, _) = machine.finish().unwrap();
        let marks = &closed[0].marks;
        let pnls: Vec<Money> = marks.iter().map(|m| m.pnl).collect();
        assert_eq!(
            pnls,
            vec![Money::ZERO, Money::from_f64(-750.0), Money::from_f64(-3_750.0)]
        );
        assert_eq!(marks[0].timestamp, ts(9, 20));
        assert_eq!(marks.last().map(|m| m.pnl), closed[0].position.realized_pnl);
        assert!(marks.iter().all(|m| m.reentry == 0));
    }

    #[test]
    fn test_dangling_close_does_not_repeat_last_mark() {
        let config = config(|_| {});
        let mut machine = StraddleStateMachine::new(&config);
        machine.on_observation(&obs(9, 20, 100.0, 100.0)).unwrap();
        machine.on_observation(&obs(9, 21, 90.0, 90.0)).unwrap();
        let (closed, _) = machine.finish().unwrap();
        assert_eq!(closed[0].marks.len(), 2);
        assert_eq!(closed[0].marks[1].pnl, Money::from_f64(1_500.0));
    }

    #[test]
    fn test_out_of_order_rejected() {
        let config = config(|_| {});
        let mut machine = StraddleStateMachine::new(&config);
        machine.on_observation(&obs(9, 21, 100.0, 100.0)).unwrap();
        let err = machine.on_observation(&obs(9, 21, 100.0, 100.0)).unwrap_err();
        assert!(matches!(err, SessionError::Data(DataError::OutOfOrder { .. })));
    }

    #[test]
    fn test_gap_rejected() {
        let config = config(|_| {});
        let mut machine = StraddleStateMachine::new(&config);
        machine.on_observation(&obs(9, 20, 100.0, 100.0)).unwrap();
        // 5 minutes is tolerated, 6 is not
        machine.on_observation(&obs(9, 25, 100.0, 100.0)).unwrap();
        let err = machine.on_observation(&obs(9, 31, 100.0, 100.0)).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Data(DataError::Gap { gap_minutes: 6, tolerance_minutes: 5, .. })
        ));
    }

    #[test]
    fn test_finish_closes_dangling_position_at_last_observation() {
        let config = config(|_| {});
        let mut machine = StraddleStateMachine::new(&config);
        machine.on_observation(&obs(9, 20, 100.0, 100.0)).unwrap();
        machine.on_observation(&obs(9, 21, 90.0, 90.0)).unwrap();
        let (closed, state) = machine.finish().unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].position.status, PositionStatus::ClosedEod);
        assert_eq!(closed[0].position.exit_time, Some(ts(9, 21)));
        assert_eq!(state.machine_state, MachineState::Done);
        assert!(state.current_position.is_none());
        // (200 - 180) * 75
        assert_eq!(state.cumulative_day_pnl, Money::from_f64(1_500.0));
    }
}
