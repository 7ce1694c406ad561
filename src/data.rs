//! Market data sources
//!
//! A [`MarketDataSource`] returns the ordered straddle observations for one
//! (symbol, expiry, date) session. The backtester never touches files or
//! databases directly.
//!
//! CSV layout used by [`CsvDataSource`]:
//!
//! ```text
//! {data_dir}/{SYMBOL}/{expiry}/{date}.csv
//!
//! datetime,underlying,call,put
//! 2025-02-06 09:20:00,23012.30,118.50,104.25
//! ```

use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::DataError;
use crate::{Observation, Symbol};

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// Supplier of one session's observations
pub trait MarketDataSource: Send + Sync {
    fn get_session_observations(
        &self,
        symbol: &Symbol,
        expiry: NaiveDate,
        date: NaiveDate,
    ) -> Result<Vec<Observation>, DataError>;
}

impl<T: MarketDataSource + ?Sized> MarketDataSource for Arc<T> {
    fn get_session_observations(
        &self,
        symbol: &Symbol,
        expiry: NaiveDate,
        date: NaiveDate,
    ) -> Result<Vec<Observation>, DataError> {
        (**self).get_session_observations(symbol, expiry, date)
    }
}

// =============================================================================
// CSV Data Loading
// =============================================================================

fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value.trim(), fmt).ok())
}

fn parse_field(record: &csv::StringRecord, idx: usize, name: &str, row: usize) -> Result<f64, DataError> {
    record
        .get(idx)
        .ok_or_else(|| DataError::Source(format!("row {}: missing {} column", row, name)))?
        .trim()
        .parse::<f64>()
        .map_err(|e| DataError::Source(format!("row {}: bad {} value: {}", row, name, e)))
}

/// Load one session file. Rows are returned in file order; ordering and
/// value checks happen when the session runs.
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<Observation>, DataError> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| DataError::Source(format!("failed to open {}: {}", path.display(), e)))?;

    let mut observations = Vec::new();

    for (row_idx, result) in reader.records().enumerate() {
        let row = row_idx + 1;
        let record = result.map_err(|e| DataError::Source(format!("row {}: {}", row, e)))?;

        let dt_str = record
            .get(0)
            .ok_or_else(|| DataError::Source(format!("row {}: missing datetime column", row)))?;
        let timestamp = parse_datetime(dt_str)
            .ok_or_else(|| DataError::Source(format!("row {}: bad datetime '{}'", row, dt_str)))?;

        observations.push(Observation::new_unchecked(
            timestamp,
            parse_field(&record, 1, "underlying", row)?,
            parse_field(&record, 2, "call", row)?,
            parse_field(&record, 3, "put", row)?,
        ));
    }

    Ok(observations)
}

/// Write observations in the layout [`load_csv`] reads
pub fn save_csv(path: impl AsRef<Path>, observations: &[Observation]) -> Result<(), DataError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| DataError::Source(format!("failed to create {}: {}", parent.display(), e)))?;
    }

    let to_source = |e: csv::Error| DataError::Source(format!("failed to write {}: {}", path.display(), e));
    let mut writer = csv::Writer::from_path(path).map_err(to_source)?;
    writer
        .write_record(["datetime", "underlying", "call", "put"])
        .map_err(to_source)?;

    for obs in observations {
        writer
            .write_record([
                obs.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                obs.underlying.to_string(),
                obs.call_premium.to_string(),
                obs.put_premium.to_string(),
            ])
            .map_err(to_source)?;
    }

    writer
        .flush()
        .map_err(|e| DataError::Source(format!("failed to flush {}: {}", path.display(), e)))
}

/// Per-session CSV files under a data directory
#[derive(Debug, Clone)]
pub struct CsvDataSource {
    data_dir: PathBuf,
}

impl CsvDataSource {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn session_path(&self, symbol: &Symbol, expiry: NaiveDate, date: NaiveDate) -> PathBuf {
        self.data_dir
            .join(symbol.as_str())
            .join(expiry.format("%Y-%m-%d").to_string())
            .join(format!("{}.csv", date.format("%Y-%m-%d")))
    }
}

impl MarketDataSource for CsvDataSource {
    fn get_session_observations(
        &self,
        symbol: &Symbol,
        expiry: NaiveDate,
        date: NaiveDate,
    ) -> Result<Vec<Observation>, DataError> {
        let path = self.session_path(symbol, expiry, date);
        if !path.exists() {
            debug!("Data file not found: {}", path.display());
            return Err(DataError::Unavailable {
                symbol: symbol.to_string(),
                expiry,
                date,
            });
        }

        let observations = load_csv(&path)?;
        debug!("Loaded {} observations from {}", observations.len(), path.display());
        Ok(observations)
    }
}

// =============================================================================
// In-memory source
// =============================================================================

/// Observations held in memory, keyed by (symbol, expiry, date)
#[derive(Debug, Clone, Default)]
pub struct InMemoryDataSource {
    sessions: HashMap<(Symbol, NaiveDate, NaiveDate), Vec<Observation>>,
}

impl InMemoryDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, symbol: &Symbol, expiry: NaiveDate, date: NaiveDate, observations: Vec<Observation>) {
        self.sessions.insert((symbol.clone(), expiry, date), observations);
    }

    pub fn with_session(
        mut self,
        symbol: &Symbol,
        expiry: NaiveDate,
        date: NaiveDate,
        observations: Vec<Observation>,
    ) -> Self {
        self.insert(symbol, expiry, date, observations);
        self
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl MarketDataSource for InMemoryDataSource {
    fn get_session_observations(
        &self,
        symbol: &Symbol,
        expiry: NaiveDate,
        date: NaiveDate,
    ) -> Result<Vec<Observation>, DataError> {
        self.sessions
            .get(&(symbol.clone(), expiry, date))
            .cloned()
            .ok_or_else(|| DataError::Unavailable {
                symbol: symbol.to_string(),
                expiry,
                date,
            })
    }
}

// =============================================================================
// Timeout wrapper
// =============================================================================

/// Bounds how long a single session load may take.
///
/// Each load runs on its own thread. On timeout the thread is abandoned and
/// the session reports [`DataError::Timeout`]; the batch carries on.
pub struct TimeoutDataSource {
    inner: Arc<dyn MarketDataSource>,
    timeout: Duration,
}

impl TimeoutDataSource {
    pub fn new(inner: Arc<dyn MarketDataSource>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

impl MarketDataSource for TimeoutDataSource {
    fn get_session_observations(
        &self,
        symbol: &Symbol,
        expiry: NaiveDate,
        date: NaiveDate,
    ) -> Result<Vec<Observation>, DataError> {
        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        let owned_symbol = symbol.clone();

        thread::Builder::new()
            .name(format!("load-{}-{}", symbol, date))
            .spawn(move || {
                // Receiver may be gone after a timeout
                let _ = tx.send(inner.get_session_observations(&owned_symbol, expiry, date));
            })
            .map_err(|e| DataError::Source(format!("failed to spawn loader: {}", e)))?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Loading {} expiry {} on {} exceeded {:?}",
                    symbol, expiry, date, self.timeout
                );
                Err(DataError::Timeout {
                    symbol: symbol.to_string(),
                    expiry,
                    date,
                    timeout_secs: self.timeout.as_secs(),
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(DataError::Source(format!(
                "loader for {} on {} exited without a result",
                symbol, date
            ))),
        }
    }
}
