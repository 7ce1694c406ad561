//! Performance metrics over a set of trade records

use chrono::NaiveDate;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::{Money, PositionStatus, SummaryRecord, Symbol, TradeRecord};

/// Net result of one trading day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub net_pnl: Money,
    pub trade_count: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    /// Running total including this day
    pub cumulative_pnl: Money,
}

/// Group trades by session date, in date order
pub fn daily_breakdown(trades: &[TradeRecord]) -> Vec<DailySummary> {
    let mut cumulative = Money::ZERO;

    trades
        .iter()
        .sorted_by_key(|t| (t.date, t.entry_time))
        .chunk_by(|t| t.date)
        .into_iter()
        .map(|(date, day)| {
            let day: Vec<&TradeRecord> = day.collect();
            let net_pnl: Money = day.iter().map(|t| t.net_pnl).sum();
            let winning_trades = day.iter().filter(|t| t.is_win()).count();
            cumulative += net_pnl;

            DailySummary {
                date,
                net_pnl,
                trade_count: day.len(),
                winning_trades,
                losing_trades: day.len() - winning_trades,
                cumulative_pnl: cumulative,
            }
        })
        .collect()
}

/// Largest peak-to-trough decline of a running PnL total.
///
/// The peak starts at zero, so a series that only ever loses still reports
/// its full decline.
pub fn max_drawdown(pnls: impl IntoIterator<Item = Money>) -> Money {
    let mut equity = Money::ZERO;
    let mut peak = Money::ZERO;
    let mut max_dd = Money::ZERO;

    for pnl in pnls {
        equity += pnl;
        peak = peak.max(equity);
        max_dd = max_dd.max(peak - equity);
    }

    max_dd
}

/// Mean over sample standard deviation of daily PnL. Not annualised.
pub fn sharpe_ratio(daily: &[DailySummary]) -> f64 {
    if daily.len() < 2 {
        return 0.0;
    }
    let values: Vec<f64> = daily.iter().map(|d| d.net_pnl.to_f64()).collect();
    let mean = values.iter().mean();
    let std_dev = values.iter().std_dev();

    if std_dev.is_finite() && std_dev > 0.0 {
        mean / std_dev
    } else {
        0.0
    }
}

/// Aggregate trades of one parameter set into a [`SummaryRecord`]
pub fn summarize(fingerprint: &str, symbol: Option<Symbol>, sessions: usize, trades: &[TradeRecord]) -> SummaryRecord {
    let mut summary = SummaryRecord {
        fingerprint: fingerprint.to_string(),
        symbol,
        sessions,
        ..SummaryRecord::default()
    };
    if trades.is_empty() {
        return summary;
    }

    let ordered: Vec<&TradeRecord> = trades
        .iter()
        .sorted_by_key(|t| (t.date, t.entry_time))
        .collect();

    let (wins, losses): (Vec<&TradeRecord>, Vec<&TradeRecord>) =
        ordered.iter().partition(|t| t.is_win());

    let gross_profits: Money = wins.iter().map(|t| t.net_pnl).sum();
    let gross_losses: Money = losses.iter().map(|t| t.net_pnl.abs()).sum();

    summary.start_date = ordered.first().map(|t| t.date);
    summary.end_date = ordered.last().map(|t| t.date);
    summary.trade_count = ordered.len();
    summary.winning_trades = wins.len();
    summary.losing_trades = losses.len();
    summary.total_pnl = ordered.iter().map(|t| t.net_pnl).sum();
    summary.win_rate = wins.len() as f64 / ordered.len() as f64 * 100.0;
    summary.max_drawdown = max_drawdown(ordered.iter().map(|t| t.net_pnl));

    summary.profit_factor = if gross_losses.is_positive() {
        (gross_profits / gross_losses).to_f64()
    } else if gross_profits.is_positive() {
        f64::INFINITY
    } else {
        0.0
    };

    if !wins.is_empty() {
        summary.avg_win = gross_profits / Money::from(wins.len() as i64);
        summary.largest_win = wins.iter().map(|t| t.net_pnl).fold(Money::ZERO, Money::max);
    }
    if !losses.is_empty() {
        summary.avg_loss = -(gross_losses / Money::from(losses.len() as i64));
        summary.largest_loss = losses.iter().map(|t| t.net_pnl).fold(Money::ZERO, Money::min);
    }

    let daily = daily_breakdown(trades);
    summary.avg_daily_pnl = summary.total_pnl / Money::from(daily.len() as i64);
    summary.sharpe_ratio = sharpe_ratio(&daily);

    for trade in &ordered {
        match trade.status {
            PositionStatus::ClosedStop => summary.stop_exits += 1,
            PositionStatus::ClosedTarget => summary.target_exits += 1,
            PositionStatus::ClosedEod => summary.eod_exits += 1,
            PositionStatus::Open => {}
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn trade(day: u32, minute: u32, net: f64, status: PositionStatus) -> TradeRecord {
        let date = NaiveDate::from_ymd_opt(2025, 2, day).unwrap();
        let entry_time = date.and_hms_opt(9, 20 + minute, 0).unwrap();
        TradeRecord {
            symbol: Symbol::new("NIFTY"),
            expiry: NaiveDate::from_ymd_opt(2025, 2, 13).unwrap(),
            date,
            fingerprint: "abc".into(),
            reentry: 0,
            status,
            entry_time,
            exit_time: entry_time,
            underlying_at_entry: 23_000.0,
            atm_strike: 23_000,
            call_entry: Money::from_f64(100.0),
            put_entry: Money::from_f64(100.0),
            call_exit: Money::from_f64(100.0),
            put_exit: Money::from_f64(100.0),
            entry_premium: Money::from_f64(200.0),
            exit_premium: Money::from_f64(200.0),
            lots: 1,
            quantity: 75,
            realized_pnl: Money::from_f64(net),
            charges: Money::ZERO,
            net_pnl: Money::from_f64(net),
        }
    }

    #[test]
    fn test_max_drawdown_starts_from_zero() {
        let pnls = [-100.0, 50.0, -200.0, 400.0, -150.0].map(Money::from_f64);
        // equity: -100, -50, -250, 150, 0 -> worst decline from peak 0 is 250
        assert_eq!(max_drawdown(pnls), Money::from_f64(250.0));
        assert_eq!(max_drawdown(Vec::new()), Money::ZERO);
    }

    #[test]
    fn test_summary_basic_stats() {
        let trades = vec![
            trade(3, 0, 1_000.0, PositionStatus::ClosedTarget),
            trade(3, 10, -500.0, PositionStatus::ClosedStop),
            trade(4, 0, 2_000.0, PositionStatus::ClosedEod),
            trade(5, 0, -1_500.0, PositionStatus::ClosedStop),
        ];
        let summary = summarize("abc", Some(Symbol::new("NIFTY")), 3, &trades);

        assert_eq!(summary.trade_count, 4);
        assert_eq!(summary.winning_trades, 2);
        assert_eq!(summary.total_pnl, Money::from_f64(1_000.0));
        assert_relative_eq!(summary.win_rate, 50.0);
        assert_relative_eq!(summary.profit_factor, 1.5);
        assert_eq!(summary.max_drawdown, Money::from_f64(1_500.0));
        assert_eq!(summary.avg_win, Money::from_f64(1_500.0));
        assert_eq!(summary.avg_loss, Money::from_f64(-1_000.0));
        assert_eq!(summary.largest_loss, Money::from_f64(-1_500.0));
        assert_eq!(summary.stop_exits, 2);
        assert_eq!(summary.start_date, NaiveDate::from_ymd_opt(2025, 2, 3));
        assert_eq!(summary.end_date, NaiveDate::from_ymd_opt(2025, 2, 5));
    }

    #[test]
    fn test_daily_breakdown_and_sharpe() {
        let trades = vec![
            trade(3, 0, 1_000.0, PositionStatus::ClosedTarget),
            trade(3, 10, -500.0, PositionStatus::ClosedStop),
            trade(4, 0, 2_000.0, PositionStatus::ClosedEod),
            trade(5, 0, -1_500.0, PositionStatus::ClosedStop),
        ];
        let daily = daily_breakdown(&trades);
        assert_eq!(daily.len(), 3);
        assert_eq!(daily[0].net_pnl, Money::from_f64(500.0));
        assert_eq!(daily[0].trade_count, 2);
        assert_eq!(daily[2].cumulative_pnl, Money::from_f64(1_000.0));

        // daily: 500, 2000, -1500 -> mean 333.33, sample std 1755.95
        let sharpe = sharpe_ratio(&daily);
        assert_relative_eq!(sharpe, 333.333_333 / 1_755.942_292, epsilon = 1e-4);
    }

    #[test]
    fn test_empty_trades() {
        let summary = summarize("abc", None, 2, &[]);
        assert_eq!(summary.trade_count, 0);
        assert_eq!(summary.sessions, 2);
        assert_eq!(summary.total_pnl, Money::ZERO);
        assert_eq!(summary.win_rate, 0.0);
    }
}
