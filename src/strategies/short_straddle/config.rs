//! Short Straddle Configuration
//!
//! [`StrategyParams`] is the loosely-typed shape that comes out of a config
//! file or a grid combination. [`StrategyConfig::new`] is the only way to
//! turn it into the validated, immutable value the state machine runs on.

use chrono::{Duration, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ConfigError;
use crate::{Money, Symbol};

/// How stop-loss and target thresholds are measured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitMode {
    /// Against the summed premium of both legs
    #[default]
    Combined,
    /// Against each leg's own entry premium; either leg can trigger
    PerLeg,
}

/// Raw strategy parameters as read from configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyParams {
    /// Option symbol as the data source names it (NIFTY, CNXBAN, ...)
    pub symbol: String,

    /// Underlying index used for strike rounding (defaults to symbol)
    #[serde(default)]
    pub underlying: Option<String>,

    #[serde(default = "default_exchange")]
    pub exchange: String,

    pub expiry: NaiveDate,

    /// Number of lots sold per leg (default: 1)
    #[serde(default = "default_lots")]
    pub lots: f64,

    /// Exchange contract multiplier (default: 75)
    #[serde(default = "default_lot_size")]
    pub lot_size: f64,

    /// First time a position may be opened (default: 09:20:00)
    #[serde(default = "default_market_open")]
    pub market_open: NaiveTime,

    /// Positions are squared off at or after this time (default: 15:20:00)
    #[serde(default = "default_market_close")]
    pub market_close: NaiveTime,

    /// Trading stops for the day once net PnL reaches -max_loss_per_day (default: 10000)
    #[serde(default = "default_max_loss_per_day")]
    pub max_loss_per_day: f64,

    /// Stop loss as percent of entry premium (default: 25)
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: f64,

    /// Target as percent of entry premium (default: 75)
    #[serde(default = "default_target_profit_pct")]
    pub target_profit_pct: f64,

    /// Re-entries allowed after the first position (default: 10)
    #[serde(default = "default_max_reentries")]
    pub max_reentries: f64,

    /// Minimum minutes between an exit and the next entry (default: 5)
    #[serde(default = "default_reentry_delay_minutes")]
    pub reentry_delay_minutes: f64,

    #[serde(default)]
    pub exit_mode: ExitMode,

    /// Allow re-entry after a target exit, not just after stops (default: true)
    #[serde(default = "default_reentry_on_target")]
    pub reentry_on_target: bool,

    /// Brokerage per lot per fill (default: 0)
    #[serde(default)]
    pub commission_per_lot: f64,

    /// Price given up per unit on every fill, in premium points (default: 0)
    #[serde(default)]
    pub slippage_points: f64,

    /// Largest tolerated interval between consecutive observations (default: 5)
    #[serde(default = "default_max_gap_minutes")]
    pub max_gap_minutes: f64,
}

fn default_exchange() -> String {
    "NFO".to_string()
}

fn default_lots() -> f64 {
    1.0
}

fn default_lot_size() -> f64 {
    75.0
}

fn default_market_open() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 20, 0).unwrap_or(NaiveTime::MIN)
}

fn default_market_close() -> NaiveTime {
    NaiveTime::from_hms_opt(15, 20, 0).unwrap_or(NaiveTime::MIN)
}

fn default_max_loss_per_day() -> f64 {
    10_000.0
}

fn default_stop_loss_pct() -> f64 {
    25.0
}

fn default_target_profit_pct() -> f64 {
    75.0
}

fn default_max_reentries() -> f64 {
    10.0
}

fn default_reentry_delay_minutes() -> f64 {
    5.0
}

fn default_reentry_on_target() -> bool {
    true
}

fn default_max_gap_minutes() -> f64 {
    5.0
}

impl StrategyParams {
    /// Parameters with every default filled in
    pub fn new(symbol: impl Into<String>, expiry: NaiveDate) -> Self {
        Self {
            symbol: symbol.into(),
            underlying: None,
            exchange: default_exchange(),
            expiry,
            lots: default_lots(),
            lot_size: default_lot_size(),
            market_open: default_market_open(),
            market_close: default_market_close(),
            max_loss_per_day: default_max_loss_per_day(),
            stop_loss_pct: default_stop_loss_pct(),
            target_profit_pct: default_target_profit_pct(),
            max_reentries: default_max_reentries(),
            reentry_delay_minutes: default_reentry_delay_minutes(),
            exit_mode: ExitMode::default(),
            reentry_on_target: default_reentry_on_target(),
            commission_per_lot: 0.0,
            slippage_points: 0.0,
            max_gap_minutes: default_max_gap_minutes(),
        }
    }
}

/// Validated, immutable parameter set for one run
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyConfig {
    symbol: Symbol,
    underlying: String,
    exchange: String,
    expiry: NaiveDate,
    lots: u32,
    lot_size: u32,
    market_open: NaiveTime,
    market_close: NaiveTime,
    max_loss_per_day: Money,
    stop_loss_pct: f64,
    target_profit_pct: f64,
    max_reentries: u32,
    reentry_delay: Duration,
    exit_mode: ExitMode,
    reentry_on_target: bool,
    commission_per_lot: Money,
    slippage_points: Money,
    max_gap: Duration,
    fingerprint: String,
}

fn positive(name: &'static str, value: f64) -> Result<f64, ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::NonPositive { name, value });
    }
    Ok(value)
}

fn non_negative(name: &'static str, value: f64) -> Result<f64, ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::Negative { name, value });
    }
    Ok(value)
}

fn whole(name: &'static str, value: f64) -> Result<u32, ConfigError> {
    if value.fract() != 0.0 || value > u32::MAX as f64 {
        return Err(ConfigError::NotAnInteger { name, value });
    }
    Ok(value as u32)
}

impl StrategyConfig {
    /// Validate raw parameters. All bounds are checked here and nowhere else.
    pub fn new(params: StrategyParams) -> Result<Self, ConfigError> {
        let symbol = params.symbol.trim();
        if symbol.is_empty() {
            return Err(ConfigError::EmptySymbol);
        }

        let stop_loss_pct = positive("stop_loss_pct", params.stop_loss_pct)?;
        let target_profit_pct = positive("target_profit_pct", params.target_profit_pct)?;
        let max_loss_per_day = positive("max_loss_per_day", params.max_loss_per_day)?;
        let lots = whole("lots", positive("lots", params.lots)?)?;
        let lot_size = whole("lot_size", positive("lot_size", params.lot_size)?)?;
        let max_reentries = whole("max_reentries", non_negative("max_reentries", params.max_reentries)?)?;
        let reentry_delay_minutes = whole(
            "reentry_delay_minutes",
            non_negative("reentry_delay_minutes", params.reentry_delay_minutes)?,
        )?;
        let max_gap_minutes = whole("max_gap_minutes", positive("max_gap_minutes", params.max_gap_minutes)?)?;
        let commission_per_lot = non_negative("commission_per_lot", params.commission_per_lot)?;
        let slippage_points = non_negative("slippage_points", params.slippage_points)?;

        if params.market_open >= params.market_close {
            return Err(ConfigError::InvalidSessionWindow {
                open: params.market_open.to_string(),
                close: params.market_close.to_string(),
            });
        }

        let underlying = params
            .underlying
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .unwrap_or(symbol)
            .to_uppercase();

        let mut config = StrategyConfig {
            symbol: Symbol::new(symbol),
            underlying,
            exchange: params.exchange.clone(),
            expiry: params.expiry,
            lots,
            lot_size,
            market_open: params.market_open,
            market_close: params.market_close,
            max_loss_per_day: Money::from_f64(max_loss_per_day),
            stop_loss_pct,
            target_profit_pct,
            max_reentries,
            reentry_delay: Duration::minutes(reentry_delay_minutes as i64),
            exit_mode: params.exit_mode,
            reentry_on_target: params.reentry_on_target,
            commission_per_lot: Money::from_f64(commission_per_lot),
            slippage_points: Money::from_f64(slippage_points),
            max_gap: Duration::minutes(max_gap_minutes as i64),
            fingerprint: String::new(),
        };
        config.fingerprint = config.compute_fingerprint();
        Ok(config)
    }

    /// Same parameters, different contract expiry. Fingerprint is unchanged.
    pub fn with_expiry(&self, expiry: NaiveDate) -> Self {
        let mut config = self.clone();
        config.expiry = expiry;
        config
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn underlying(&self) -> &str {
        &self.underlying
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn expiry(&self) -> NaiveDate {
        self.expiry
    }

    pub fn lots(&self) -> u32 {
        self.lots
    }

    pub fn lot_size(&self) -> u32 {
        self.lot_size
    }

    pub fn market_open(&self) -> NaiveTime {
        self.market_open
    }

    pub fn market_close(&self) -> NaiveTime {
        self.market_close
    }

    pub fn max_loss_per_day(&self) -> Money {
        self.max_loss_per_day
    }

    pub fn stop_loss_pct(&self) -> f64 {
        self.stop_loss_pct
    }

    pub fn target_profit_pct(&self) -> f64 {
        self.target_profit_pct
    }

    pub fn max_reentries(&self) -> u32 {
        self.max_reentries
    }

    pub fn reentry_delay(&self) -> Duration {
        self.reentry_delay
    }

    pub fn exit_mode(&self) -> ExitMode {
        self.exit_mode
    }

    pub fn reentry_on_target(&self) -> bool {
        self.reentry_on_target
    }

    pub fn commission_per_lot(&self) -> Money {
        self.commission_per_lot
    }

    pub fn slippage_points(&self) -> Money {
        self.slippage_points
    }

    pub fn max_gap(&self) -> Duration {
        self.max_gap
    }

    /// Upper bound on positions per session
    pub fn max_trades_per_session(&self) -> usize {
        self.max_reentries as usize + 1
    }

    /// Cost of one round trip. Each leg is filled twice (sold, then bought
    /// back) and every fill pays brokerage per lot and slippage per unit.
    pub fn round_trip_charges(&self) -> Money {
        let per_fill = self.commission_per_lot * Money::from(self.lots as i64)
            + self.slippage_points * Money::from(self.quantity() as i64);
        per_fill * Money::from(4_i64)
    }

    /// Units per leg: lots × lot size
    pub fn quantity(&self) -> u32 {
        self.lots.saturating_mul(self.lot_size)
    }

    /// Short stable identifier of the tunable parameters.
    ///
    /// Symbol and expiry are excluded so every session of one grid
    /// combination carries the same fingerprint.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn compute_fingerprint(&self) -> String {
        let canonical = serde_json::json!({
            "lots": self.lots,
            "lot_size": self.lot_size,
            "market_open": self.market_open.to_string(),
            "market_close": self.market_close.to_string(),
            "max_loss_per_day": self.max_loss_per_day.to_string(),
            "stop_loss_pct": self.stop_loss_pct,
            "target_profit_pct": self.target_profit_pct,
            "max_reentries": self.max_reentries,
            "reentry_delay_minutes": self.reentry_delay.num_minutes(),
            "exit_mode": self.exit_mode,
            "reentry_on_target": self.reentry_on_target,
            "commission_per_lot": self.commission_per_lot.to_string(),
            "slippage_points": self.slippage_points.to_string(),
            "max_gap_minutes": self.max_gap.num_minutes(),
        });
        let digest = Sha256::digest(canonical.to_string().as_bytes());
        hex::encode(digest)[..12].to_string()
    }
}
