//! Short straddle backtester - main entry point
//!
//! This binary provides two subcommands:
//! - backtest: Run the strategy over a schedule of sessions
//! - optimize: Sweep a parameter grid and rank the combinations

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "straddle-backtest")]
#[command(about = "Short straddle backtesting with re-entry rules and parameter sweeps", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run strategy backtest
    Backtest {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/nifty_straddle.json")]
        config: String,

        /// Contract expiry for every session (YYYY-MM-DD)
        #[arg(long)]
        expiry: Option<String>,

        /// Trading dates (comma-separated YYYY-MM-DD), replaces the configured schedule
        #[arg(long)]
        dates: Option<String>,

        /// Abort on the first session that cannot be loaded
        #[arg(long)]
        fail_fast: bool,

        /// Write trades and daily summary CSVs to the results directory
        #[arg(long)]
        export: bool,
    },

    /// Optimize strategy parameters
    Optimize {
        /// Path to base configuration file
        #[arg(short, long, default_value = "configs/nifty_straddle.json")]
        config: String,

        /// Grid override, repeatable. E.g., --grid stop_loss_pct=20,25,30
        #[arg(short, long)]
        grid: Vec<String>,

        /// Sort results by metric (total_pnl, win_rate, sharpe, profit_factor, drawdown)
        #[arg(long, default_value = "total_pnl")]
        sort_by: String,

        /// Number of top results to show
        #[arg(short, long, default_value = "10")]
        top: usize,

        /// Worker threads (default: one per core)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Run sequentially instead of parallel
        #[arg(long)]
        sequential: bool,

        /// Fail a combination on the first session that cannot be loaded
        #[arg(long)]
        fail_fast: bool,

        /// Write ranked results CSV to the results directory
        #[arg(long)]
        export: bool,
    },
}

fn setup_logging(verbose: bool, command_name: &str, file_only: bool) -> Result<()> {
    // Create logs directory
    std::fs::create_dir_all("logs")?;

    // Create log file with naming pattern: {command}_{date}.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    // Set log level - filter out noisy external crates
    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!("{},tokio=warn", level);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    // File appender
    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    if file_only {
        // Keep the console for the progress bar
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    } else {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(true);

        // File layer - same format but without ANSI colors
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        // Initialize subscriber with both console and file
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        info!("Logging initialized");
        info!("Log file: {}", log_path.display());
    }

    Ok(())
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    // Determine command name and whether to use file-only logging
    let (command_name, file_only) = match &cli.command {
        Commands::Backtest { .. } => ("backtest", false),
        Commands::Optimize { .. } => ("optimize", true),
    };

    // Setup logging
    setup_logging(cli.verbose, command_name, file_only)?;

    // Execute command
    match cli.command {
        Commands::Backtest {
            config,
            expiry,
            dates,
            fail_fast,
            export,
        } => commands::backtest::run(config, expiry, dates, fail_fast, export),

        Commands::Optimize {
            config,
            grid,
            sort_by,
            top,
            workers,
            sequential,
            fail_fast,
            export,
        } => commands::optimize::run(config, grid, sort_by, top, workers, sequential, fail_fast, export),
    }
}
