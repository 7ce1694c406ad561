//! Parameter sweep over a [`ParameterGrid`]
//!
//! Every combination is validated before any session runs. Session data is
//! loaded once and shared read-only by all combinations. Each combination
//! gets its own [`Backtester`], so runs never share mutable state and the
//! result is the same whether they execute in parallel or in sequence.

use indicatif::ProgressBar;
use ordered_float::OrderedFloat;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::backtest::{load_sessions, Backtester, FailurePolicy, LoadedSession, SessionKey};
use crate::data::MarketDataSource;
use crate::error::{ConfigError, SessionLoadError, SweepPartialFailure};
use crate::grid::{format_params, GridCombination, ParamSet, ParameterGrid};
use crate::strategies::short_straddle::StrategyParams;
use crate::SummaryRecord;

/// Metric combinations are ranked by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    #[default]
    TotalPnl,
    WinRate,
    Sharpe,
    ProfitFactor,
    /// Lowest max drawdown first
    Drawdown,
}

impl Objective {
    /// Higher is better
    fn score(self, summary: &SummaryRecord) -> OrderedFloat<f64> {
        OrderedFloat(match self {
            Objective::TotalPnl => summary.total_pnl.to_f64(),
            Objective::WinRate => summary.win_rate,
            Objective::Sharpe => summary.sharpe_ratio,
            Objective::ProfitFactor => summary.profit_factor,
            Objective::Drawdown => -summary.max_drawdown.to_f64(),
        })
    }

    /// Best first; ties go to the smaller drawdown
    pub fn compare(self, a: &SummaryRecord, b: &SummaryRecord) -> CmpOrdering {
        self.score(b)
            .cmp(&self.score(a))
            .then_with(|| a.max_drawdown.cmp(&b.max_drawdown))
    }
}

impl FromStr for Objective {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "total_pnl" | "pnl" | "return" => Ok(Objective::TotalPnl),
            "win_rate" => Ok(Objective::WinRate),
            "sharpe" => Ok(Objective::Sharpe),
            "profit_factor" => Ok(Objective::ProfitFactor),
            "drawdown" | "max_drawdown" => Ok(Objective::Drawdown),
            other => Err(ConfigError::InvalidValue {
                name: "sort_by".to_string(),
                reason: format!(
                    "unknown objective '{}', expected total_pnl, win_rate, sharpe, profit_factor or drawdown",
                    other
                ),
            }),
        }
    }
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Objective::TotalPnl => "total_pnl",
            Objective::WinRate => "win_rate",
            Objective::Sharpe => "sharpe",
            Objective::ProfitFactor => "profit_factor",
            Objective::Drawdown => "drawdown",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Cancellation was requested before the combination started
    Cancelled,
    /// No scheduled session could be loaded
    NoSessions,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Cancelled => f.write_str("cancelled"),
            SkipReason::NoSessions => f.write_str("no sessions loaded"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CombinationStatus {
    Succeeded {
        summary: SummaryRecord,
        session_failures: Vec<SessionLoadError>,
    },
    Skipped(SkipReason),
    Failed(String),
}

/// Result of one grid point
#[derive(Debug, Clone, PartialEq)]
pub struct CombinationOutcome {
    pub index: usize,
    pub params: ParamSet,
    pub fingerprint: String,
    pub status: CombinationStatus,
}

impl CombinationOutcome {
    pub fn summary(&self) -> Option<&SummaryRecord> {
        match &self.status {
            CombinationStatus::Succeeded { summary, .. } => Some(summary),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, CombinationStatus::Failed(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.status, CombinationStatus::Skipped(_))
    }
}

#[derive(Debug, Clone)]
pub struct TuningReport {
    pub objective: Objective,
    /// In grid enumeration order
    pub outcomes: Vec<CombinationOutcome>,
}

impl TuningReport {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    /// Successful combinations, best first. Full ties keep grid order.
    pub fn ranked(&self) -> Vec<&CombinationOutcome> {
        let mut ranked: Vec<(&CombinationOutcome, &SummaryRecord)> = self
            .outcomes
            .iter()
            .filter_map(|o| o.summary().map(|s| (o, s)))
            .collect();
        ranked.sort_by(|(oa, a), (ob, b)| {
            self.objective
                .compare(a, b)
                .then_with(|| oa.index.cmp(&ob.index))
        });
        ranked.into_iter().map(|(o, _)| o).collect()
    }

    pub fn best(&self) -> Option<&CombinationOutcome> {
        self.ranked().into_iter().next()
    }

    pub fn successful(&self) -> usize {
        self.outcomes.iter().filter(|o| o.summary().is_some()).count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_skipped()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failed()).count()
    }

    /// Every failed combination, or `None` if there were none
    pub fn partial_failure(&self) -> Option<SweepPartialFailure> {
        let failures: Vec<(usize, String, String)> = self
            .outcomes
            .iter()
            .filter_map(|o| match &o.status {
                CombinationStatus::Failed(err) => Some((o.index, format_params(&o.params), err.clone())),
                _ => None,
            })
            .collect();

        if failures.is_empty() {
            None
        } else {
            Some(SweepPartialFailure {
                total: self.outcomes.len(),
                failures,
            })
        }
    }
}

/// Grid search driver
pub struct HyperparameterTuner {
    base: StrategyParams,
    grid: ParameterGrid,
    objective: Objective,
    workers: Option<usize>,
    sequential: bool,
    policy: FailurePolicy,
    cancel: Arc<AtomicBool>,
    progress: Option<ProgressBar>,
}

impl HyperparameterTuner {
    pub fn new(base: StrategyParams, grid: ParameterGrid) -> Self {
        Self {
            base,
            grid,
            objective: Objective::default(),
            workers: None,
            sequential: false,
            policy: FailurePolicy::default(),
            cancel: Arc::new(AtomicBool::new(false)),
            progress: None,
        }
    }

    pub fn with_objective(mut self, objective: Objective) -> Self {
        self.objective = objective;
        self
    }

    /// Worker threads for the parallel run (default: one per core)
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn sequential(mut self, sequential: bool) -> Self {
        self.sequential = sequential;
        self
    }

    /// Applied inside each combination's backtest
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Share a cancellation flag; once set, combinations not yet started are skipped
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Validate the whole grid, load the schedule once, then run every combination
    pub fn run(&self, source: &dyn MarketDataSource, schedule: &[SessionKey]) -> Result<TuningReport, ConfigError> {
        let combos = self.grid.build_configs(&self.base)?;
        let symbol = match combos.first() {
            Some(combo) => combo.config.symbol().clone(),
            None => return Ok(self.report(Vec::new())),
        };

        let sessions = load_sessions(source, &symbol, schedule);
        let loaded = sessions.iter().filter(|s| s.observations.is_ok()).count();
        info!(
            "Testing {} parameter combinations over {} sessions ({} loaded)",
            combos.len(),
            sessions.len(),
            loaded
        );

        Ok(self.run_loaded(&combos, &sessions))
    }

    /// Run already-validated combinations over preloaded sessions
    pub fn run_loaded(&self, combos: &[GridCombination], sessions: &[LoadedSession]) -> TuningReport {
        let evaluate = |combo: &GridCombination| self.evaluate(combo, sessions);

        let outcomes: Vec<CombinationOutcome> = if self.sequential {
            combos.iter().map(evaluate).collect()
        } else {
            let mut builder = rayon::ThreadPoolBuilder::new();
            if let Some(workers) = self.workers {
                builder = builder.num_threads(workers);
            }
            match builder.build() {
                Ok(pool) => pool.install(|| combos.par_iter().map(evaluate).collect()),
                Err(e) => {
                    warn!("Failed to build worker pool ({}), running sequentially", e);
                    combos.iter().map(evaluate).collect()
                }
            }
        };

        if let Some(pb) = &self.progress {
            pb.finish();
        }

        self.report(outcomes)
    }

    fn report(&self, mut outcomes: Vec<CombinationOutcome>) -> TuningReport {
        outcomes.sort_by_key(|o| o.index);
        let report = TuningReport {
            objective: self.objective,
            outcomes,
        };
        info!(
            "Sweep finished: {} succeeded, {} skipped, {} failed",
            report.successful(),
            report.skipped(),
            report.failed()
        );
        report
    }

    fn evaluate(&self, combo: &GridCombination, sessions: &[LoadedSession]) -> CombinationOutcome {
        let status = if self.cancel.load(Ordering::SeqCst) {
            CombinationStatus::Skipped(SkipReason::Cancelled)
        } else {
            let backtester = Backtester::new(combo.config.clone()).with_policy(self.policy);
            match panic::catch_unwind(AssertUnwindSafe(|| backtester.run_loaded(sessions))) {
                Ok(Ok(result)) if result.sessions.is_empty() => CombinationStatus::Skipped(SkipReason::NoSessions),
                Ok(Ok(result)) => CombinationStatus::Succeeded {
                    summary: result.summary(),
                    session_failures: result.failures,
                },
                Ok(Err(e)) => {
                    error!("Combination #{} [{}] failed: {}", combo.index, format_params(&combo.params), e);
                    CombinationStatus::Failed(e.to_string())
                }
                Err(payload) => {
                    let msg = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "panic".to_string());
                    error!("Combination #{} [{}] panicked: {}", combo.index, format_params(&combo.params), msg);
                    CombinationStatus::Failed(format!("panicked: {}", msg))
                }
            }
        };

        if let Some(pb) = &self.progress {
            pb.inc(1);
        }

        CombinationOutcome {
            index: combo.index,
            params: combo.params.clone(),
            fingerprint: combo.config.fingerprint().to_string(),
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Money;

    fn summary(pnl: f64, dd: f64, win_rate: f64) -> SummaryRecord {
        SummaryRecord {
            total_pnl: Money::from_f64(pnl),
            max_drawdown: Money::from_f64(dd),
            win_rate,
            ..SummaryRecord::default()
        }
    }

    fn outcome(index: usize, status: CombinationStatus) -> CombinationOutcome {
        CombinationOutcome {
            index,
            params: ParamSet::new(),
            fingerprint: format!("fp{}", index),
            status,
        }
    }

    fn ok(pnl: f64, dd: f64, win_rate: f64) -> CombinationStatus {
        CombinationStatus::Succeeded {
            summary: summary(pnl, dd, win_rate),
            session_failures: Vec::new(),
        }
    }

    #[test]
    fn test_objective_parse() {
        assert_eq!("total_pnl".parse::<Objective>().unwrap(), Objective::TotalPnl);
        assert_eq!("Sharpe".parse::<Objective>().unwrap(), Objective::Sharpe);
        assert_eq!("max_drawdown".parse::<Objective>().unwrap(), Objective::Drawdown);
        assert!("calmar".parse::<Objective>().is_err());
    }

    #[test]
    fn test_ranking_ties_break_on_drawdown_then_index() {
        let report = TuningReport {
            objective: Objective::TotalPnl,
            outcomes: vec![
                outcome(0, ok(1_000.0, 500.0, 50.0)),
                outcome(1, ok(2_000.0, 900.0, 40.0)),
                outcome(2, ok(1_000.0, 300.0, 60.0)),
                outcome(3, CombinationStatus::Failed("boom".into())),
                outcome(4, ok(1_000.0, 300.0, 70.0)),
            ],
        };
        let order: Vec<usize> = report.ranked().iter().map(|o| o.index).collect();
        assert_eq!(order, vec![1, 2, 4, 0]);
        assert_eq!(report.best().map(|o| o.index), Some(1));
    }

    #[test]
    fn test_drawdown_objective_prefers_smaller() {
        let report = TuningReport {
            objective: Objective::Drawdown,
            outcomes: vec![outcome(0, ok(5_000.0, 900.0, 50.0)), outcome(1, ok(100.0, 100.0, 50.0))],
        };
        assert_eq!(report.best().map(|o| o.index), Some(1));
    }

    #[test]
    fn test_partial_failure_collects_failed() {
        let report = TuningReport {
            objective: Objective::TotalPnl,
            outcomes: vec![
                outcome(0, ok(1.0, 0.0, 0.0)),
                outcome(1, CombinationStatus::Failed("boom".into())),
                outcome(2, CombinationStatus::Skipped(SkipReason::Cancelled)),
            ],
        };
        assert_eq!(report.successful(), 1);
        assert_eq!(report.skipped(), 1);
        let failure = report.partial_failure().unwrap();
        assert_eq!(failure.total, 3);
        assert_eq!(failure.failures.len(), 1);
        assert_eq!(failure.failures[0].0, 1);
    }
}
