//! Multi-session backtest orchestration
//!
//! Runs one validated [`StrategyConfig`] over a schedule of (date, expiry)
//! sessions. Sessions are independent: each gets its own state machine, and
//! a session whose data cannot be loaded is recorded and skipped.

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::data::MarketDataSource;
use crate::error::{BacktestError, DataError, SessionError, SessionLoadError};
use crate::metrics::{self, DailySummary};
use crate::session::SessionRunner;
use crate::strategies::short_straddle::{DayStatus, StrategyConfig};
use crate::{IntradayMark, Money, Observation, SummaryRecord, Symbol, TradeRecord};

/// What to do when a session's data is unusable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the failure and move on
    #[default]
    Continue,
    /// Stop the batch at the first failure
    FailFast,
}

/// One trading day and the contract expiry traded on it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey {
    pub date: NaiveDate,
    pub expiry: NaiveDate,
}

impl SessionKey {
    pub fn new(date: NaiveDate, expiry: NaiveDate) -> Self {
        Self { date, expiry }
    }
}

/// Observations fetched ahead of time, so a parameter sweep loads each
/// session once no matter how many combinations it runs
#[derive(Debug, Clone)]
pub struct LoadedSession {
    pub key: SessionKey,
    pub observations: Result<Vec<Observation>, DataError>,
}

/// Fetch every scheduled session from `source`, in schedule order
pub fn load_sessions(source: &dyn MarketDataSource, symbol: &Symbol, schedule: &[SessionKey]) -> Vec<LoadedSession> {
    schedule
        .par_iter()
        .map(|key| LoadedSession {
            key: *key,
            observations: source.get_session_observations(symbol, key.expiry, key.date),
        })
        .collect()
}

/// Per-session line of a backtest
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionReport {
    pub key: SessionKey,
    pub trade_count: usize,
    pub reentry_count: u32,
    pub day_pnl: Money,
    pub day_status: DayStatus,
}

#[derive(Debug, Clone, Default)]
pub struct BacktestResult {
    pub fingerprint: String,
    pub symbol: Option<Symbol>,
    pub trades: Vec<TradeRecord>,
    /// Mark-to-market path of every position, session by session
    pub intraday: Vec<IntradayMark>,
    pub sessions: Vec<SessionReport>,
    pub failures: Vec<SessionLoadError>,
}

impl BacktestResult {
    /// Sessions attempted, whether or not they ran
    pub fn sessions_requested(&self) -> usize {
        self.sessions.len() + self.failures.len()
    }

    pub fn summary(&self) -> SummaryRecord {
        metrics::summarize(&self.fingerprint, self.symbol.clone(), self.sessions.len(), &self.trades)
    }

    pub fn daily(&self) -> Vec<DailySummary> {
        metrics::daily_breakdown(&self.trades)
    }
}

/// Backtest engine
pub struct Backtester {
    config: StrategyConfig,
    policy: FailurePolicy,
}

impl Backtester {
    pub fn new(config: StrategyConfig) -> Self {
        Backtester {
            config,
            policy: FailurePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    /// Load and run each scheduled session in turn
    pub fn run(&self, source: &dyn MarketDataSource, schedule: &[SessionKey]) -> Result<BacktestResult, BacktestError> {
        let mut result = self.empty_result();
        for key in schedule {
            let observations = source.get_session_observations(self.config.symbol(), key.expiry, key.date);
            self.run_session(*key, observations.as_deref(), &mut result)?;
        }
        Ok(result)
    }

    /// Run over sessions loaded by [`load_sessions`]
    pub fn run_loaded(&self, sessions: &[LoadedSession]) -> Result<BacktestResult, BacktestError> {
        let mut result = self.empty_result();
        for session in sessions {
            self.run_session(session.key, session.observations.as_deref(), &mut result)?;
        }
        Ok(result)
    }

    fn empty_result(&self) -> BacktestResult {
        BacktestResult {
            fingerprint: self.config.fingerprint().to_string(),
            symbol: Some(self.config.symbol().clone()),
            ..BacktestResult::default()
        }
    }

    fn run_session(
        &self,
        key: SessionKey,
        observations: Result<&[Observation], &DataError>,
        result: &mut BacktestResult,
    ) -> Result<(), BacktestError> {
        let config = self.config.with_expiry(key.expiry);
        let outcome = observations
            .map_err(|e| SessionError::from(e.clone()))
            .and_then(|obs| SessionRunner::new(&config).for_date(key.date).run(obs));

        match outcome {
            Ok(outcome) => {
                result.sessions.push(SessionReport {
                    key,
                    trade_count: outcome.trades.len(),
                    reentry_count: outcome.final_state.reentry_count,
                    day_pnl: outcome.final_state.cumulative_day_pnl,
                    day_status: outcome.final_state.day_status,
                });
                result.trades.extend(outcome.trades);
                result.intraday.extend(outcome.intraday);
                Ok(())
            }
            Err(SessionError::Data(source)) => {
                let failure = SessionLoadError {
                    date: key.date,
                    expiry: key.expiry,
                    source,
                };
                if self.policy == FailurePolicy::FailFast {
                    return Err(failure.into());
                }
                match &failure.source {
                    DataError::Unavailable { .. } => debug!("{}", failure),
                    _ => warn!("{}", failure),
                }
                result.failures.push(failure);
                Ok(())
            }
            Err(SessionError::Invariant(source)) => {
                error!("Execution invariant violated on {}: {}", key.date, source);
                Err(BacktestError::Invariant {
                    date: key.date,
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::InMemoryDataSource;
    use crate::strategies::short_straddle::StrategyParams;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 2, d).unwrap()
    }

    fn session(d: u32, exit_call: f64) -> Vec<Observation> {
        vec![
            Observation::new_unchecked(date(d).and_hms_opt(9, 20, 0).unwrap(), 23_000.0, 100.0, 100.0),
            Observation::new_unchecked(date(d).and_hms_opt(15, 20, 0).unwrap(), 23_000.0, exit_call, 100.0),
        ]
    }

    fn backtester() -> Backtester {
        let mut params = StrategyParams::new("NIFTY", date(6));
        params.max_gap_minutes = 400.0;
        Backtester::new(StrategyConfig::new(params).unwrap())
    }

    #[test]
    fn test_missing_session_is_recorded_and_skipped() {
        let symbol = Symbol::new("NIFTY");
        let source = InMemoryDataSource::new()
            .with_session(&symbol, date(6), date(3), session(3, 90.0))
            .with_session(&symbol, date(6), date(5), session(5, 110.0));
        let schedule: Vec<SessionKey> = [3, 4, 5].iter().map(|&d| SessionKey::new(date(d), date(6))).collect();

        let result = backtester().run(&source, &schedule).unwrap();
        assert_eq!(result.sessions.len(), 2);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].date, date(4));
        assert_eq!(result.sessions_requested(), 3);
        // +10 * 75 then -10 * 75
        assert_eq!(result.summary().total_pnl, Money::ZERO);
        assert_eq!(result.summary().trade_count, 2);
    }

    #[test]
    fn test_fail_fast_stops_at_first_failure() {
        let source = InMemoryDataSource::new();
        let schedule = vec![SessionKey::new(date(3), date(6))];
        let err = backtester()
            .with_policy(FailurePolicy::FailFast)
            .run(&source, &schedule)
            .unwrap_err();
        assert!(matches!(err, BacktestError::SessionLoad(_)));
    }

    #[test]
    fn test_trades_carry_session_expiry() {
        let symbol = Symbol::new("NIFTY");
        let source = InMemoryDataSource::new().with_session(&symbol, date(13), date(10), session(10, 90.0));
        let schedule = vec![SessionKey::new(date(10), date(13))];

        let loaded = load_sessions(&source, &symbol, &schedule);
        let result = backtester().run_loaded(&loaded).unwrap();
        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].expiry, date(13));
        assert_eq!(result.trades[0].date, date(10));
        assert_eq!(result.intraday.len(), 2);
        assert_eq!(result.intraday[1].pnl, result.trades[0].realized_pnl);
    }

    #[test]
    fn test_session_filed_under_wrong_date_is_a_data_failure() {
        let symbol = Symbol::new("NIFTY");
        // Day 4's key holds day 3's observations
        let source = InMemoryDataSource::new()
            .with_session(&symbol, date(6), date(3), session(3, 90.0))
            .with_session(&symbol, date(6), date(4), session(3, 90.0));
        let schedule: Vec<SessionKey> = [3, 4].iter().map(|&d| SessionKey::new(date(d), date(6))).collect();

        let result = backtester().run(&source, &schedule).unwrap();
        assert_eq!(result.sessions.len(), 1);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].date, date(4));
        assert!(matches!(result.failures[0].source, DataError::DateMismatch { .. }));
    }
}
