//! Single-session runner
//!
//! Drives a [`StraddleStateMachine`] over one trading day and stamps each
//! closed position into a [`TradeRecord`], keeping each position's
//! minute-by-minute mark-to-market path alongside.

use chrono::NaiveDate;
use tracing::debug;

use crate::error::{DataError, ExecutionInvariantError, SessionError};
use crate::strategies::short_straddle::{atm_strike, SessionState, StraddleStateMachine, StrategyConfig};
use crate::{IntradayMark, Money, Observation, TradeRecord};

/// Everything one session produced
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub date: NaiveDate,
    pub trades: Vec<TradeRecord>,
    /// Marks of every position, in time order
    pub intraday: Vec<IntradayMark>,
    pub final_state: SessionState,
}

impl SessionOutcome {
    pub fn net_pnl(&self) -> Money {
        self.trades.iter().map(|t| t.net_pnl).sum()
    }
}

pub struct SessionRunner<'a> {
    config: &'a StrategyConfig,
    date: Option<NaiveDate>,
}

impl<'a> SessionRunner<'a> {
    pub fn new(config: &'a StrategyConfig) -> Self {
        Self { config, date: None }
    }

    /// Pin the trading day. Without it the day is taken from the first
    /// observation.
    pub fn for_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    /// Run one session. Observations must belong to a single day and be in
    /// strictly increasing time order.
    pub fn run(&self, observations: &[Observation]) -> Result<SessionOutcome, SessionError> {
        let first = observations.first().ok_or(DataError::NoObservations)?;
        let date = self.date.unwrap_or_else(|| first.date());

        let mut machine = StraddleStateMachine::new(self.config);
        for observation in observations {
            if observation.date() != date {
                return Err(DataError::DateMismatch {
                    expected: date,
                    timestamp: observation.timestamp,
                }
                .into());
            }
            machine.on_observation(observation)?;
        }
        let (closed, final_state) = machine.finish()?;

        let limit = self.config.max_trades_per_session();
        if closed.len() > limit {
            return Err(ExecutionInvariantError::TradeLimitExceeded {
                count: closed.len(),
                limit,
            }
            .into());
        }

        let charges = self.config.round_trip_charges();
        let mut trades = Vec::with_capacity(closed.len());
        let mut intraday = Vec::new();

        for entry in closed {
            intraday.extend(entry.marks);
            let position = entry.position;
            let (exit_time, call_exit, put_exit, exit_premium, realized_pnl) = match (
                position.exit_time,
                position.call_exit,
                position.put_exit,
                position.exit_premium,
                position.realized_pnl,
            ) {
                (Some(t), Some(c), Some(p), Some(e), Some(pnl)) => (t, c, p, e, pnl),
                _ => return Err(ExecutionInvariantError::DanglingPosition(position.entry_time).into()),
            };

            trades.push(TradeRecord {
                symbol: self.config.symbol().clone(),
                expiry: self.config.expiry(),
                date,
                fingerprint: self.config.fingerprint().to_string(),
                reentry: entry.reentry,
                status: position.status,
                entry_time: position.entry_time,
                exit_time,
                underlying_at_entry: position.underlying_at_entry,
                atm_strike: atm_strike(self.config.underlying(), position.underlying_at_entry),
                call_entry: position.call_entry,
                put_entry: position.put_entry,
                call_exit,
                put_exit,
                entry_premium: position.entry_premium,
                exit_premium,
                lots: position.lots,
                quantity: position.quantity,
                realized_pnl,
                charges,
                net_pnl: realized_pnl - charges,
            });
        }

        debug!(
            "session {} expiry {}: {} trades, day pnl {}, status {:?}",
            date,
            self.config.expiry(),
            trades.len(),
            final_state.cumulative_day_pnl,
            final_state.day_status
        );

        Ok(SessionOutcome {
            date,
            trades,
            intraday,
            final_state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::short_straddle::{DayStatus, StrategyParams};
    use crate::PositionStatus;

    fn obs(h: u32, m: u32, call: f64, put: f64) -> Observation {
        let ts = NaiveDate::from_ymd_opt(2025, 2, 6)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap();
        Observation::new_unchecked(ts, 23_012.0, call, put)
    }

    fn config(commission: f64) -> StrategyConfig {
        let mut params = StrategyParams::new("NIFTY", NaiveDate::from_ymd_opt(2025, 2, 6).unwrap());
        params.commission_per_lot = commission;
        StrategyConfig::new(params).unwrap()
    }

    #[test]
    fn test_empty_session_is_data_error() {
        let config = config(0.0);
        let err = SessionRunner::new(&config).run(&[]).unwrap_err();
        assert_eq!(err, SessionError::Data(DataError::NoObservations));
    }

    #[test]
    fn test_trade_record_fields() {
        let config = config(20.0);
        let observations = vec![
            obs(9, 20, 100.0, 100.0),
            obs(9, 21, 90.0, 95.0),
            obs(9, 22, 80.0, 90.0),
        ];
        let outcome = SessionRunner::new(&config).run(&observations).unwrap();
        assert_eq!(outcome.trades.len(), 1);

        let trade = &outcome.trades[0];
        assert_eq!(trade.status, PositionStatus::ClosedEod);
        assert_eq!(trade.atm_strike, 23_000);
        assert_eq!(trade.reentry, 0);
        assert_eq!(trade.fingerprint, config.fingerprint());
        // (200 - 170) * 75 = 2250, less 20 * 1 * 4
        assert_eq!(trade.realized_pnl, Money::from_f64(2_250.0));
        assert_eq!(trade.charges, Money::from_f64(80.0));
        assert_eq!(trade.net_pnl, Money::from_f64(2_170.0));
        assert_eq!(outcome.final_state.cumulative_day_pnl, trade.net_pnl);
        assert_eq!(outcome.final_state.day_status, DayStatus::Done);
    }

    #[test]
    fn test_slippage_charged_per_unit_per_fill() {
        let mut params = StrategyParams::new("NIFTY", NaiveDate::from_ymd_opt(2025, 2, 6).unwrap());
        params.commission_per_lot = 20.0;
        params.slippage_points = 0.3;
        let config = StrategyConfig::new(params).unwrap();
        let observations = vec![obs(9, 20, 100.0, 100.0), obs(9, 21, 90.0, 95.0)];

        let outcome = SessionRunner::new(&config).run(&observations).unwrap();
        let trade = &outcome.trades[0];
        // (200 - 185) * 75 = 1125; charges (20 * 1 + 0.3 * 75) * 4 = 170
        assert_eq!(trade.realized_pnl, Money::from_f64(1_125.0));
        assert_eq!(trade.charges, Money::from_f64(170.0));
        assert_eq!(trade.net_pnl, Money::from_f64(955.0));
    }

    #[test]
    fn test_intraday_path_covers_every_position() {
        let mut params = StrategyParams::new("NIFTY", NaiveDate::from_ymd_opt(2025, 2, 6).unwrap());
        params.reentry_delay_minutes = 1.0;
        let config = StrategyConfig::new(params).unwrap();
        let observations = vec![
            obs(9, 20, 100.0, 100.0),
            // stop at +25%
            obs(9, 21, 125.0, 125.0),
            obs(9, 22, 100.0, 100.0),
            obs(9, 23, 110.0, 100.0),
        ];

        let outcome = SessionRunner::new(&config).run(&observations).unwrap();
        assert_eq!(outcome.trades.len(), 2);

        let reentries: Vec<u32> = outcome.intraday.iter().map(|m| m.reentry).collect();
        assert_eq!(reentries, vec![0, 0, 1, 1]);
        assert!(outcome
            .intraday
            .windows(2)
            .all(|w| w[0].timestamp < w[1].timestamp));
        for trade in &outcome.trades {
            let last = outcome
                .intraday
                .iter()
                .filter(|m| m.reentry == trade.reentry)
                .last()
                .unwrap();
            assert_eq!(last.timestamp, trade.exit_time);
            assert_eq!(last.pnl, trade.realized_pnl);
        }
    }

    #[test]
    fn test_observation_from_another_day_rejected() {
        let config = config(0.0);
        let day = NaiveDate::from_ymd_opt(2025, 2, 5).unwrap();
        let err = SessionRunner::new(&config)
            .for_date(day)
            .run(&[obs(9, 20, 100.0, 100.0)])
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Data(DataError::DateMismatch { expected, .. }) if expected == day
        ));
    }

    #[test]
    fn test_pinned_date_stamps_trades() {
        let config = config(0.0);
        let day = NaiveDate::from_ymd_opt(2025, 2, 6).unwrap();
        let outcome = SessionRunner::new(&config)
            .for_date(day)
            .run(&[obs(9, 20, 100.0, 100.0), obs(9, 21, 95.0, 95.0)])
            .unwrap();
        assert_eq!(outcome.date, day);
        assert_eq!(outcome.trades[0].date, day);
    }

    #[test]
    fn test_no_entry_before_open_or_after_close() {
        let config = config(0.0);
        let observations = vec![obs(15, 20, 100.0, 100.0), obs(15, 21, 100.0, 100.0)];
        let outcome = SessionRunner::new(&config).run(&observations).unwrap();
        assert!(outcome.trades.is_empty());
        assert_eq!(outcome.net_pnl(), Money::ZERO);
    }
}
