//! Backtest command implementation

use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use straddle_backtest::backtest::{Backtester, FailurePolicy};
use straddle_backtest::data::{CsvDataSource, TimeoutDataSource};
use straddle_backtest::{report, Config};
use tracing::{debug, info, warn};

pub fn parse_dates(s: &str) -> Result<Vec<NaiveDate>> {
    s.split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").with_context(|| format!("Invalid date: {}", d)))
        .collect()
}

pub fn run(
    config_path: String,
    expiry_override: Option<String>,
    dates_override: Option<String>,
    fail_fast: bool,
    export: bool,
) -> Result<()> {
    info!("Starting backtest");

    // Load configuration
    let mut config = Config::from_file(&config_path)?;
    info!("Loaded configuration from: {}", config_path);

    // Apply overrides
    let expiry = expiry_override
        .map(|e| NaiveDate::parse_from_str(e.trim(), "%Y-%m-%d").with_context(|| format!("Invalid expiry: {}", e)))
        .transpose()?;

    if let Some(dates) = dates_override {
        let dates = parse_dates(&dates)?;
        info!("Overriding schedule with {} dates", dates.len());
        config.set_dates(&dates, expiry);
    }
    if let Some(expiry) = expiry {
        info!("Overriding expiry to: {}", expiry);
        config.set_expiry(expiry);
    }
    if fail_fast {
        config.backtest.fail_fast = true;
    }

    let strategy = config.strategy_config()?;
    let sessions = config.sessions();
    if sessions.is_empty() {
        anyhow::bail!("No sessions scheduled. Add backtest.schedule to the config or pass --dates");
    }

    info!(
        "Strategy {} ({}) [{}]: stop {}%, target {}%, max re-entries {}, delay {}m",
        strategy.symbol(),
        strategy.exchange(),
        strategy.fingerprint(),
        strategy.stop_loss_pct(),
        strategy.target_profit_pct(),
        strategy.max_reentries(),
        strategy.reentry_delay().num_minutes()
    );
    info!(
        "Costs: {} per lot per fill, {} points slippage, {} per round trip",
        strategy.commission_per_lot(),
        strategy.slippage_points(),
        strategy.round_trip_charges()
    );
    debug!("Sessions: {:?}", sessions);

    info!("Loading data from: {}", config.backtest.data_dir);
    let source = TimeoutDataSource::new(
        Arc::new(CsvDataSource::new(&config.backtest.data_dir)),
        Duration::from_secs(config.backtest.load_timeout_secs),
    );

    let policy = config.failure_policy();
    let backtester = Backtester::new(strategy).with_policy(policy);

    info!("Running backtest over {} sessions...", sessions.len());
    let result = backtester.run(&source, &sessions)?;

    for failure in &result.failures {
        warn!("{}", failure);
    }

    let summary = result.summary();
    report::print_summary(&summary, &result);
    let daily = result.daily();
    report::print_daily(&daily);

    if export {
        let trades_path = report::export_trades(&config.backtest.results_dir, &result.trades)?;
        let daily_path = report::export_daily(&config.backtest.results_dir, &daily)?;
        info!("Exported trades to {}", trades_path.display());
        info!("Exported daily summary to {}", daily_path.display());
        let intraday_path = report::export_intraday(&config.backtest.results_dir, &result.intraday)?;
        info!("Exported intraday PnL to {}", intraday_path.display());
    }

    if policy == FailurePolicy::Continue && result.sessions.is_empty() {
        warn!("No session could be loaded");
    }

    info!("Backtest completed successfully");

    Ok(())
}
