//! CSV export and console tables for backtest and sweep results

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::backtest::BacktestResult;
use crate::grid::format_params;
use crate::metrics::DailySummary;
use crate::optimizer::{CombinationStatus, TuningReport};
use crate::{IntradayMark, SummaryRecord, TradeRecord};

#[derive(Debug, Serialize)]
struct TradeRow<'a> {
    date: String,
    expiry: String,
    symbol: &'a str,
    fingerprint: &'a str,
    reentry: u32,
    exit_reason: &'static str,
    entry_time: String,
    exit_time: String,
    underlying: f64,
    strike: i64,
    call_entry: String,
    put_entry: String,
    call_exit: String,
    put_exit: String,
    entry_premium: String,
    exit_premium: String,
    lots: u32,
    quantity: u32,
    gross_pnl: String,
    charges: String,
    net_pnl: String,
    return_pct: f64,
}

#[derive(Debug, Serialize)]
struct IntradayRow {
    date: String,
    reentry: u32,
    time: String,
    underlying: f64,
    call: f64,
    put: f64,
    pnl: String,
}

#[derive(Debug, Serialize)]
struct TuningRow {
    rank: Option<usize>,
    index: usize,
    status: String,
    params: String,
    fingerprint: String,
    total_pnl: Option<String>,
    win_rate: Option<f64>,
    max_drawdown: Option<String>,
    sharpe_ratio: Option<f64>,
    profit_factor: Option<f64>,
    trade_count: Option<usize>,
    sessions: Option<usize>,
    skipped_sessions: Option<usize>,
    error: Option<String>,
}

fn write_rows<T: Serialize>(path: &Path, rows: impl IntoIterator<Item = T>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create results directory")?;
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for row in rows {
        writer.serialize(row).context("Failed to write CSV row")?;
    }
    writer.flush().context("Failed to flush CSV")?;
    Ok(())
}

fn timestamped(dir: &Path, prefix: &str) -> PathBuf {
    dir.join(format!(
        "{}_{}.csv",
        prefix,
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    ))
}

/// Write every trade to `trades_{timestamp}.csv` under `dir`
pub fn export_trades(dir: impl AsRef<Path>, trades: &[TradeRecord]) -> Result<PathBuf> {
    let path = timestamped(dir.as_ref(), "trades");
    write_rows(
        &path,
        trades.iter().map(|t| TradeRow {
            date: t.date.to_string(),
            expiry: t.expiry.to_string(),
            symbol: t.symbol.as_str(),
            fingerprint: &t.fingerprint,
            reentry: t.reentry,
            exit_reason: t.status.label(),
            entry_time: t.entry_time.format("%H:%M:%S").to_string(),
            exit_time: t.exit_time.format("%H:%M:%S").to_string(),
            underlying: t.underlying_at_entry,
            strike: t.atm_strike,
            call_entry: t.call_entry.to_string(),
            put_entry: t.put_entry.to_string(),
            call_exit: t.call_exit.to_string(),
            put_exit: t.put_exit.to_string(),
            entry_premium: t.entry_premium.to_string(),
            exit_premium: t.exit_premium.to_string(),
            lots: t.lots,
            quantity: t.quantity,
            gross_pnl: t.realized_pnl.round_dp(2).to_string(),
            charges: t.charges.round_dp(2).to_string(),
            net_pnl: t.net_pnl.round_dp(2).to_string(),
            return_pct: (t.return_pct() * 100.0).round() / 100.0,
        }),
    )?;
    Ok(path)
}

/// Write the per-day breakdown to `daily_{timestamp}.csv`
pub fn export_daily(dir: impl AsRef<Path>, daily: &[DailySummary]) -> Result<PathBuf> {
    let path = timestamped(dir.as_ref(), "daily");
    write_rows(&path, daily)?;
    Ok(path)
}

/// Write the per-minute mark-to-market path to `intraday_pnl_{timestamp}.csv`
pub fn export_intraday(dir: impl AsRef<Path>, marks: &[IntradayMark]) -> Result<PathBuf> {
    let path = timestamped(dir.as_ref(), "intraday_pnl");
    write_rows(
        &path,
        marks.iter().map(|m| IntradayRow {
            date: m.timestamp.date().to_string(),
            reentry: m.reentry,
            time: m.timestamp.format("%H:%M:%S").to_string(),
            underlying: m.underlying,
            call: m.call_premium,
            put: m.put_premium,
            pnl: m.pnl.round_dp(2).to_string(),
        }),
    )?;
    Ok(path)
}

/// Write one row per grid combination, ranked rows first
pub fn export_tuning(dir: impl AsRef<Path>, report: &TuningReport) -> Result<PathBuf> {
    let path = timestamped(dir.as_ref(), "tuning");
    let ranked = report.ranked();

    let rank_of = |index: usize| ranked.iter().position(|o| o.index == index).map(|r| r + 1);

    let mut rows: Vec<TuningRow> = report
        .outcomes
        .iter()
        .map(|o| {
            let mut row = TuningRow {
                rank: rank_of(o.index),
                index: o.index,
                status: String::new(),
                params: format_params(&o.params),
                fingerprint: o.fingerprint.clone(),
                total_pnl: None,
                win_rate: None,
                max_drawdown: None,
                sharpe_ratio: None,
                profit_factor: None,
                trade_count: None,
                sessions: None,
                skipped_sessions: None,
                error: None,
            };
            match &o.status {
                CombinationStatus::Succeeded { summary, session_failures } => {
                    row.status = "succeeded".to_string();
                    row.total_pnl = Some(summary.total_pnl.round_dp(2).to_string());
                    row.win_rate = Some(summary.win_rate);
                    row.max_drawdown = Some(summary.max_drawdown.round_dp(2).to_string());
                    row.sharpe_ratio = Some(summary.sharpe_ratio);
                    row.profit_factor = Some(summary.profit_factor);
                    row.trade_count = Some(summary.trade_count);
                    row.sessions = Some(summary.sessions);
                    row.skipped_sessions = Some(session_failures.len());
                }
                CombinationStatus::Skipped(reason) => {
                    row.status = format!("skipped: {}", reason);
                }
                CombinationStatus::Failed(err) => {
                    row.status = "failed".to_string();
                    row.error = Some(err.clone());
                }
            }
            row
        })
        .collect();

    rows.sort_by_key(|r| (r.rank.is_none(), r.rank, r.index));
    write_rows(&path, rows)?;
    Ok(path)
}

// =============================================================================
// Console tables
// =============================================================================

pub fn print_summary(summary: &SummaryRecord, result: &BacktestResult) {
    println!("\n{}", "=".repeat(60));
    println!("BACKTEST RESULTS");
    println!("{}", "=".repeat(60));
    if let Some(symbol) = &summary.symbol {
        println!("Symbol:             {}", symbol);
    }
    println!("Fingerprint:        {}", summary.fingerprint);
    if let (Some(start), Some(end)) = (summary.start_date, summary.end_date) {
        println!("Period:             {} to {}", start, end);
    }
    println!(
        "Sessions:           {} run, {} skipped",
        result.sessions.len(),
        result.failures.len()
    );
    println!("Total PnL:          ₹{:.2}", summary.total_pnl.to_f64());
    println!("Avg Daily PnL:      ₹{:.2}", summary.avg_daily_pnl.to_f64());
    println!("Max Drawdown:       ₹{:.2}", summary.max_drawdown.to_f64());
    println!("Sharpe (daily):     {:.2}", summary.sharpe_ratio);
    println!("Win Rate:           {:.2}%", summary.win_rate);
    println!("Profit Factor:      {:.2}", summary.profit_factor);
    println!("Total Trades:       {}", summary.trade_count);
    println!("Winning Trades:     {}", summary.winning_trades);
    println!("Losing Trades:      {}", summary.losing_trades);
    println!("Average Win:        ₹{:.2}", summary.avg_win.to_f64());
    println!("Average Loss:       ₹{:.2}", summary.avg_loss.to_f64());
    println!("Largest Win:        ₹{:.2}", summary.largest_win.to_f64());
    println!("Largest Loss:       ₹{:.2}", summary.largest_loss.to_f64());
    println!(
        "Exits:              {} stop / {} target / {} EOD",
        summary.stop_exits, summary.target_exits, summary.eod_exits
    );
    println!("{}", "=".repeat(60));
}

pub fn print_daily(daily: &[DailySummary]) {
    if daily.is_empty() {
        return;
    }
    println!("\n{:<12} {:>12} {:>7} {:>5} {:>6} {:>14}", "Date", "Net PnL", "Trades", "Wins", "Losses", "Cumulative");
    println!("{}", "-".repeat(61));
    for day in daily {
        println!(
            "{:<12} {:>12.2} {:>7} {:>5} {:>6} {:>14.2}",
            day.date.to_string(),
            day.net_pnl.to_f64(),
            day.trade_count,
            day.winning_trades,
            day.losing_trades,
            day.cumulative_pnl.to_f64()
        );
    }
    println!("{}", "-".repeat(61));
}

pub fn print_ranking(report: &TuningReport, top: usize) {
    let ranked = report.ranked();
    let display_count = top.min(ranked.len());

    println!("\n{}", "=".repeat(110));
    println!("TOP {} COMBINATIONS (sorted by {})", display_count, report.objective);
    println!("{}", "=".repeat(110));
    println!(
        "{:<4} {:>12} {:>12} {:>7} {:>7} {:>6} {:>6} | Parameters",
        "Rank", "Total PnL", "MaxDD", "WinR%", "Sharpe", "PF", "Trades"
    );
    println!("{}", "-".repeat(110));

    for (i, outcome) in ranked.iter().take(top).enumerate() {
        if let Some(s) = outcome.summary() {
            println!(
                "{:<4} {:>12.2} {:>12.2} {:>7.2} {:>7.2} {:>6.2} {:>6} | {}",
                i + 1,
                s.total_pnl.to_f64(),
                s.max_drawdown.to_f64(),
                s.win_rate,
                s.sharpe_ratio,
                s.profit_factor,
                s.trade_count,
                format_params(&outcome.params)
            );
        }
    }
    println!("{}", "=".repeat(110));
    println!(
        "{} combinations: {} succeeded, {} skipped, {} failed",
        report.total(),
        report.successful(),
        report.skipped(),
        report.failed()
    );
}
