//! Utility functions for the Short Straddle
//!
//! Strike rounding and the percentage checks used by the exit rules.

use crate::{Money, Observation, Position};

use super::config::ExitMode;

/// Strike interval listed for an index
pub fn strike_step(underlying: &str) -> u32 {
    match underlying.to_uppercase().as_str() {
        "BANKNIFTY" | "CNXBAN" => 100,
        "MIDCPNIFTY" => 25,
        // NIFTY, FINNIFTY and anything unknown
        _ => 50,
    }
}

/// Nearest listed strike to the underlying price, rounding half up
pub fn atm_strike(underlying: &str, price: f64) -> i64 {
    let step = strike_step(underlying) as f64;
    let remainder = price.rem_euclid(step);
    let strike = if remainder >= step / 2.0 {
        price - remainder + step
    } else {
        price - remainder
    };
    strike.round() as i64
}

/// Has the position lost at least `stop_pct` of the premium collected?
pub fn stop_hit(position: &Position, observation: &Observation, mode: ExitMode, stop_pct: f64) -> bool {
    match mode {
        ExitMode::Combined => {
            let current = Money::from_f64(observation.straddle_premium());
            current - position.entry_premium >= position.entry_premium.percent(stop_pct)
        }
        ExitMode::PerLeg => {
            leg_rise(position.call_entry, observation.call_premium, stop_pct)
                || leg_rise(position.put_entry, observation.put_premium, stop_pct)
        }
    }
}

/// Has the premium decayed by at least `target_pct`?
pub fn target_hit(position: &Position, observation: &Observation, mode: ExitMode, target_pct: f64) -> bool {
    match mode {
        ExitMode::Combined => {
            let current = Money::from_f64(observation.straddle_premium());
            position.entry_premium - current >= position.entry_premium.percent(target_pct)
        }
        ExitMode::PerLeg => {
            leg_decay(position.call_entry, observation.call_premium, target_pct)
                || leg_decay(position.put_entry, observation.put_premium, target_pct)
        }
    }
}

fn leg_rise(entry: Money, current: f64, pct: f64) -> bool {
    Money::from_f64(current) - entry >= entry.percent(pct)
}

fn leg_decay(entry: Money, current: f64, pct: f64) -> bool {
    entry - Money::from_f64(current) >= entry.percent(pct)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn obs(minute: u32, call: f64, put: f64) -> Observation {
        let ts = NaiveDate::from_ymd_opt(2025, 2, 6)
            .unwrap()
            .and_hms_opt(9, 20 + minute, 0)
            .unwrap();
        Observation::new_unchecked(ts, 23_000.0, call, put)
    }

    #[test]
    fn test_atm_strike_rounding() {
        assert_eq!(atm_strike("NIFTY", 23_012.3), 23_000);
        assert_eq!(atm_strike("NIFTY", 23_025.0), 23_050);
        assert_eq!(atm_strike("BANKNIFTY", 49_149.9), 49_100);
        assert_eq!(atm_strike("BANKNIFTY", 49_150.0), 49_200);
        assert_eq!(atm_strike("MIDCPNIFTY", 12_012.0), 12_000);
        assert_eq!(atm_strike("MIDCPNIFTY", 12_013.0), 12_025);
    }

    #[test]
    fn test_combined_stop_is_inclusive() {
        let position = Position::open(&obs(0, 100.0, 100.0), 1, 75);
        assert!(!stop_hit(&position, &obs(1, 140.0, 109.0), ExitMode::Combined, 25.0));
        assert!(stop_hit(&position, &obs(1, 140.0, 110.0), ExitMode::Combined, 25.0));
    }

    #[test]
    fn test_per_leg_stop_fires_on_one_leg() {
        let position = Position::open(&obs(0, 100.0, 100.0), 1, 75);
        // Combined premium is down, but the call alone is up 30%
        let later = obs(1, 130.0, 50.0);
        assert!(!stop_hit(&position, &later, ExitMode::Combined, 25.0));
        assert!(stop_hit(&position, &later, ExitMode::PerLeg, 25.0));
    }

    #[test]
    fn test_target_hit() {
        let position = Position::open(&obs(0, 100.0, 100.0), 1, 75);
        assert!(target_hit(&position, &obs(1, 25.0, 25.0), ExitMode::Combined, 75.0));
        assert!(!target_hit(&position, &obs(1, 30.0, 25.0), ExitMode::Combined, 75.0));
        assert!(target_hit(&position, &obs(1, 20.0, 90.0), ExitMode::PerLeg, 75.0));
    }
}
