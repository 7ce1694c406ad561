//! Optimize command implementation with progress tracking and grid overrides

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use straddle_backtest::backtest::FailurePolicy;
use straddle_backtest::data::{CsvDataSource, TimeoutDataSource};
use straddle_backtest::grid::format_params;
use straddle_backtest::optimizer::{HyperparameterTuner, Objective};
use straddle_backtest::{report, Config};
use tracing::{error, info, warn};

/// Set `cancel` on Ctrl-C. The signal listener runs on its own small runtime
/// so the sweep itself stays synchronous.
fn install_ctrl_c(cancel: Arc<AtomicBool>) {
    let spawned = std::thread::Builder::new()
        .name("ctrl-c".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt,
                Err(e) => {
                    warn!("Ctrl-C handler unavailable: {}", e);
                    return;
                }
            };
            runtime.block_on(async {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Ctrl-C received, finishing in-flight combinations");
                    eprintln!("\nCancelling: running combinations will finish, the rest are skipped");
                    cancel.store(true, Ordering::SeqCst);
                }
            });
        });

    if let Err(e) = spawned {
        warn!("Failed to spawn Ctrl-C listener: {}", e);
    }
}

#[allow(clippy::too_many_arguments)]
pub fn run(
    config_path: String,
    grid_overrides: Vec<String>,
    sort_by: String,
    top: usize,
    workers: Option<usize>,
    sequential: bool,
    fail_fast: bool,
    export: bool,
) -> Result<()> {
    info!("Starting optimization");

    // Load base configuration
    let config = Config::from_file(&config_path)?;
    info!("Loaded configuration from: {}", config_path);

    let objective: Objective = sort_by.parse()?;

    let mut grid = config.parameter_grid();
    grid.apply_overrides(&grid_overrides)?;

    let sessions = config.sessions();
    if sessions.is_empty() {
        anyhow::bail!("No sessions scheduled. Add backtest.schedule to the config");
    }

    let total = grid.total_combinations();
    let policy = if fail_fast {
        FailurePolicy::FailFast
    } else {
        config.failure_policy()
    };

    // Print summary
    println!("\n{}", "=".repeat(70));
    println!("OPTIMIZATION SUMMARY");
    println!("{}", "=".repeat(70));
    println!("  Symbol:        {}", config.strategy.symbol);
    println!("  Sessions:      {}", sessions.len());
    println!(
        "  Grid:          {}",
        if grid.is_empty() {
            "(base parameters only)".to_string()
        } else {
            grid.names().collect::<Vec<_>>().join(", ")
        }
    );
    println!("  Parameters:    {} combinations", total);
    println!("  Objective:     {}", objective);
    println!("  Mode:          {}", if sequential { "sequential" } else { "parallel" });
    println!("{}\n", "=".repeat(70));

    // Create single progress bar (tqdm style)
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("⚡ {percent:>3}%|{bar:40}| {pos}/{len} [{elapsed}<{eta}, {per_sec:.2}]")?
            .progress_chars("█░ "),
    );

    let cancel = Arc::new(AtomicBool::new(false));
    install_ctrl_c(Arc::clone(&cancel));

    let source = TimeoutDataSource::new(
        Arc::new(CsvDataSource::new(&config.backtest.data_dir)),
        Duration::from_secs(config.backtest.load_timeout_secs),
    );

    let mut tuner = HyperparameterTuner::new(config.strategy.clone(), grid)
        .with_objective(objective)
        .sequential(sequential)
        .with_failure_policy(policy)
        .with_cancel_flag(cancel)
        .with_progress(pb);
    if let Some(workers) = workers {
        tuner = tuner.with_workers(workers);
    }

    let report = tuner.run(&source, &sessions)?;
    println!();

    report::print_ranking(&report, top);

    if let Some(best) = report.best() {
        info!(
            "Best [{}] {}: {:?}",
            best.fingerprint,
            format_params(&best.params),
            best.summary().map(|s| s.total_pnl)
        );
    }

    if export {
        let path = report::export_tuning(&config.backtest.results_dir, &report)?;
        info!("Exported tuning results to {}", path.display());
        println!("Results written to {}", path.display());
    }

    if let Some(failure) = report.partial_failure() {
        error!("{}", failure);
        return Err(failure.into());
    }

    info!("Optimization completed successfully");

    Ok(())
}
