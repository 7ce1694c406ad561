//! Error taxonomy
//!
//! Configuration problems are fatal before any session runs. Data problems
//! are scoped to one session and recovered by the orchestrator unless it
//! runs fail-fast. Invariant violations mean the state machine is wrong and
//! always surface.

use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;

use crate::types::{ObservationValidationError, PositionStatus};

/// Invalid strategy or grid parameters
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be > 0, got {value}")]
    NonPositive { name: &'static str, value: f64 },

    #[error("{name} must be >= 0, got {value}")]
    Negative { name: &'static str, value: f64 },

    #[error("{name} must be a whole number, got {value}")]
    NotAnInteger { name: &'static str, value: f64 },

    #[error("market_open ({open}) must be before market_close ({close})")]
    InvalidSessionWindow { open: String, close: String },

    #[error("symbol must not be empty")]
    EmptySymbol,

    #[error("unknown grid parameter '{0}'")]
    UnknownParameter(String),

    #[error("'{0}' identifies the run and cannot be swept")]
    FixedParameter(String),

    #[error("grid parameter '{0}' has no candidate values")]
    EmptyGridDimension(String),

    #[error("invalid grid override '{0}', expected name=v1,v2,...")]
    InvalidOverride(String),

    #[error("invalid value for '{name}': {reason}")]
    InvalidValue { name: String, reason: String },
}

/// Problems with one session's market data
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DataError {
    #[error("observation gap of {gap_minutes} min between {previous} and {current} exceeds tolerance of {tolerance_minutes} min")]
    Gap {
        previous: NaiveDateTime,
        current: NaiveDateTime,
        gap_minutes: i64,
        tolerance_minutes: i64,
    },

    #[error("observation at {current} does not come after {previous}")]
    OutOfOrder {
        previous: NaiveDateTime,
        current: NaiveDateTime,
    },

    #[error("no data for {symbol} expiry {expiry} on {date}")]
    Unavailable {
        symbol: String,
        expiry: NaiveDate,
        date: NaiveDate,
    },

    #[error("session has no observations")]
    NoObservations,

    #[error("observation at {timestamp} does not belong to session {expected}")]
    DateMismatch {
        expected: NaiveDate,
        timestamp: NaiveDateTime,
    },

    #[error("loading {symbol} expiry {expiry} on {date} timed out after {timeout_secs}s")]
    Timeout {
        symbol: String,
        expiry: NaiveDate,
        date: NaiveDate,
        timeout_secs: u64,
    },

    #[error("invalid observation: {0}")]
    InvalidObservation(#[from] ObservationValidationError),

    #[error("data source error: {0}")]
    Source(String),
}

/// The state machine produced something it never should
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExecutionInvariantError {
    #[error("session produced {count} trades, limit is {limit} (max_reentries + 1)")]
    TradeLimitExceeded { count: usize, limit: usize },

    #[error("position entered at {entry_time} is already {status}")]
    PositionAlreadyClosed {
        entry_time: NaiveDateTime,
        status: PositionStatus,
    },

    #[error("{0} is not an exit status")]
    InvalidExitStatus(PositionStatus),

    #[error("session finished with an open position entered at {0}")]
    DanglingPosition(NaiveDateTime),
}

/// Why a single session run failed
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SessionError {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Invariant(#[from] ExecutionInvariantError),
}

/// A session the orchestrator could not load or run, tagged with its identity
#[derive(Debug, Error, Clone, PartialEq)]
#[error("session {date} (expiry {expiry}) skipped: {source}")]
pub struct SessionLoadError {
    pub date: NaiveDate,
    pub expiry: NaiveDate,
    #[source]
    pub source: DataError,
}

/// Failure of a whole multi-session batch
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BacktestError {
    #[error("execution invariant violated on {date}: {source}")]
    Invariant {
        date: NaiveDate,
        #[source]
        source: ExecutionInvariantError,
    },

    #[error("fail-fast: {0}")]
    SessionLoad(#[from] SessionLoadError),
}

/// Aggregate of the grid combinations that failed during a sweep
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{} of {total} parameter combinations failed: {}", .failures.len(), summarize(.failures))]
pub struct SweepPartialFailure {
    pub total: usize,
    /// (grid index, formatted parameters, error message)
    pub failures: Vec<(usize, String, String)>,
}

fn summarize(failures: &[(usize, String, String)]) -> String {
    failures
        .iter()
        .map(|(index, params, error)| format!("#{} [{}] {}", index, params, error))
        .collect::<Vec<_>>()
        .join("; ")
}
