//! Parameter grid for sweeps
//!
//! Maps parameter names to candidate values and expands them into the full
//! cartesian product. Names are enumerated in sorted order and the last name
//! varies fastest, so the combination order is a pure function of the grid.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use crate::error::ConfigError;
use crate::strategies::short_straddle::{StrategyConfig, StrategyParams};

/// Strategy fields that pin down what is traded. Every combination in a
/// sweep shares them with the base.
pub const FIXED_PARAMETERS: [&str; 4] = ["symbol", "underlying", "exchange", "expiry"];

/// One assignment of grid values, keyed by parameter name
pub type ParamSet = BTreeMap<String, Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterGrid {
    dimensions: BTreeMap<String, Vec<Value>>,
}

/// A validated grid point, ready to run
#[derive(Debug, Clone)]
pub struct GridCombination {
    /// Position in enumeration order
    pub index: usize,
    pub params: ParamSet,
    pub config: StrategyConfig,
}

impl ParameterGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: HashMap<String, Vec<Value>>) -> Self {
        Self {
            dimensions: map.into_iter().collect(),
        }
    }

    /// Builder form of [`ParameterGrid::insert`]
    pub fn with<V: Into<Value>>(mut self, name: &str, values: impl IntoIterator<Item = V>) -> Self {
        self.insert(name, values.into_iter().map(Into::into).collect());
        self
    }

    pub fn insert(&mut self, name: &str, values: Vec<Value>) {
        self.dimensions.insert(name.trim().to_string(), values);
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.dimensions.keys().map(String::as_str)
    }

    /// Product of dimension sizes. An empty grid has one combination: the base.
    pub fn total_combinations(&self) -> usize {
        self.dimensions.values().map(Vec::len).product()
    }

    /// Merge `name=v1,v2,...` overrides; a name already present is replaced
    pub fn apply_overrides(&mut self, overrides: &[String]) -> Result<(), ConfigError> {
        for override_str in overrides {
            let (name, values) = parse_grid_override(override_str)?;
            self.dimensions.insert(name, values);
        }
        Ok(())
    }

    /// Every combination in enumeration order
    pub fn combinations(&self) -> Result<Vec<ParamSet>, ConfigError> {
        if let Some((name, _)) = self.dimensions.iter().find(|(_, values)| values.is_empty()) {
            return Err(ConfigError::EmptyGridDimension(name.clone()));
        }

        let keys: Vec<&String> = self.dimensions.keys().collect();
        let values: Vec<&Vec<Value>> = self.dimensions.values().collect();

        Ok(cartesian_product_indices(&values)
            .into_iter()
            .map(|indices| {
                indices
                    .iter()
                    .enumerate()
                    .map(|(i, &idx)| (keys[i].clone(), values[i][idx].clone()))
                    .collect::<ParamSet>()
            })
            .collect())
    }

    /// Overlay each combination on `base` and validate the result.
    ///
    /// Only tunable fields may be swept; see [`FIXED_PARAMETERS`].
    ///
    /// Fails on the first invalid combination, before anything has run.
    pub fn build_configs(&self, base: &StrategyParams) -> Result<Vec<GridCombination>, ConfigError> {
        let base_value = serde_json::to_value(base).map_err(|e| ConfigError::InvalidValue {
            name: "strategy".to_string(),
            reason: e.to_string(),
        })?;
        let known = match &base_value {
            Value::Object(obj) => obj,
            _ => {
                return Err(ConfigError::InvalidValue {
                    name: "strategy".to_string(),
                    reason: "expected an object".to_string(),
                })
            }
        };

        if let Some(fixed) = self.names().find(|name| FIXED_PARAMETERS.contains(name)) {
            return Err(ConfigError::FixedParameter(fixed.to_string()));
        }
        if let Some(unknown) = self.names().find(|name| !known.contains_key(*name)) {
            return Err(ConfigError::UnknownParameter(unknown.to_string()));
        }

        self.combinations()?
            .into_iter()
            .enumerate()
            .map(|(index, params)| -> Result<GridCombination, ConfigError> {
                let mut value = base_value.clone();
                if let Value::Object(obj) = &mut value {
                    for (name, v) in &params {
                        obj.insert(name.clone(), v.clone());
                    }
                }
                let strategy: StrategyParams =
                    serde_json::from_value(value).map_err(|e| ConfigError::InvalidValue {
                        name: format_params(&params),
                        reason: e.to_string(),
                    })?;
                let config = StrategyConfig::new(strategy)?;
                Ok(GridCombination { index, params, config })
            })
            .collect()
    }
}

/// Generate cartesian product as index vectors
fn cartesian_product_indices(arrays: &[&Vec<Value>]) -> Vec<Vec<usize>> {
    if arrays.is_empty() {
        return vec![vec![]];
    }

    let mut result = Vec::new();
    let mut indices = vec![0usize; arrays.len()];

    loop {
        result.push(indices.clone());

        // Increment indices like an odometer
        let mut pos = arrays.len() - 1;
        loop {
            indices[pos] += 1;
            if indices[pos] < arrays[pos].len() {
                break;
            }
            indices[pos] = 0;
            if pos == 0 {
                return result;
            }
            pos -= 1;
        }
    }
}

fn parse_value(v: &str) -> Value {
    if let Ok(n) = v.parse::<i64>() {
        serde_json::json!(n)
    } else if let Ok(n) = v.parse::<f64>() {
        serde_json::json!(n)
    } else if v == "true" {
        serde_json::json!(true)
    } else if v == "false" {
        serde_json::json!(false)
    } else {
        serde_json::json!(v)
    }
}

/// Parse a CLI override.
/// Format: "param=val1,val2,val3" or "param=1.0,2.0,3.0"
pub fn parse_grid_override(s: &str) -> Result<(String, Vec<Value>), ConfigError> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| ConfigError::InvalidOverride(s.to_string()))?;

    let key = key.trim();
    if key.is_empty() {
        return Err(ConfigError::InvalidOverride(s.to_string()));
    }

    let values: Vec<Value> = raw
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(parse_value)
        .collect();

    if values.is_empty() {
        return Err(ConfigError::EmptyGridDimension(key.to_string()));
    }

    Ok((key.to_string(), values))
}

/// Format params for display
pub fn format_params(params: &ParamSet) -> String {
    params
        .iter()
        .map(|(k, v)| match v {
            Value::String(s) => format!("{}={}", k, s),
            Value::Number(n) => match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}={}", k, f as i64),
                Some(f) => format!("{}={}", k, f),
                None => format!("{}={}", k, n),
            },
            other => format!("{}={}", k, other),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn base() -> StrategyParams {
        StrategyParams::new("NIFTY", NaiveDate::from_ymd_opt(2025, 2, 6).unwrap())
    }

    #[test]
    fn test_enumeration_order_last_name_fastest() {
        let grid = ParameterGrid::new()
            .with("target_profit_pct", [50, 75])
            .with("stop_loss_pct", [20, 25, 30]);
        assert_eq!(grid.total_combinations(), 6);

        let combos = grid.combinations().unwrap();
        let rendered: Vec<String> = combos.iter().map(format_params).collect();
        assert_eq!(
            rendered,
            vec![
                "stop_loss_pct=20, target_profit_pct=50",
                "stop_loss_pct=20, target_profit_pct=75",
                "stop_loss_pct=25, target_profit_pct=50",
                "stop_loss_pct=25, target_profit_pct=75",
                "stop_loss_pct=30, target_profit_pct=50",
                "stop_loss_pct=30, target_profit_pct=75",
            ]
        );
    }

    #[test]
    fn test_empty_grid_is_single_base_combination() {
        let grid = ParameterGrid::new();
        assert_eq!(grid.total_combinations(), 1);
        let configs = grid.build_configs(&base()).unwrap();
        assert_eq!(configs.len(), 1);
        assert!(configs[0].params.is_empty());
    }

    #[test]
    fn test_empty_dimension_rejected() {
        let mut grid = ParameterGrid::new();
        grid.insert("stop_loss_pct", vec![]);
        assert_eq!(
            grid.combinations().unwrap_err(),
            ConfigError::EmptyGridDimension("stop_loss_pct".into())
        );
    }

    #[test]
    fn test_unknown_parameter_rejected() {
        let grid = ParameterGrid::new().with("stop_los_pct", [20]);
        assert_eq!(
            grid.build_configs(&base()).unwrap_err(),
            ConfigError::UnknownParameter("stop_los_pct".into())
        );
    }

    #[test]
    fn test_identity_fields_cannot_be_swept() {
        for name in FIXED_PARAMETERS {
            let grid = ParameterGrid::new()
                .with("stop_loss_pct", [20, 25])
                .with(name, ["BANKNIFTY"]);
            assert_eq!(
                grid.build_configs(&base()).unwrap_err(),
                ConfigError::FixedParameter(name.to_string())
            );
        }
    }

    #[test]
    fn test_override_cannot_sweep_expiry() {
        let mut grid = ParameterGrid::new();
        grid.apply_overrides(&["expiry=2025-02-06,2025-02-13".to_string()]).unwrap();
        assert_eq!(
            grid.build_configs(&base()).unwrap_err(),
            ConfigError::FixedParameter("expiry".into())
        );
    }

    #[test]
    fn test_invalid_combination_fails_whole_grid() {
        let grid = ParameterGrid::new().with("stop_loss_pct", [20, 0]);
        assert!(matches!(
            grid.build_configs(&base()),
            Err(ConfigError::NonPositive { name: "stop_loss_pct", .. })
        ));
    }

    #[test]
    fn test_build_configs_applies_values() {
        let grid = ParameterGrid::new().with("max_reentries", [0, 3]);
        let configs = grid.build_configs(&base()).unwrap();
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[0].config.max_reentries(), 0);
        assert_eq!(configs[1].config.max_reentries(), 3);
        assert_eq!(configs[1].index, 1);
        assert_ne!(configs[0].config.fingerprint(), configs[1].config.fingerprint());
    }

    #[test]
    fn test_parse_grid_override() {
        let (name, values) = parse_grid_override("stop_loss_pct=20, 25.5,30").unwrap();
        assert_eq!(name, "stop_loss_pct");
        assert_eq!(values, vec![serde_json::json!(20), serde_json::json!(25.5), serde_json::json!(30)]);

        let (_, values) = parse_grid_override("exit_mode=combined,per_leg").unwrap();
        assert_eq!(values[1], serde_json::json!("per_leg"));

        assert!(matches!(parse_grid_override("stop_loss_pct"), Err(ConfigError::InvalidOverride(_))));
        assert!(matches!(parse_grid_override("stop_loss_pct="), Err(ConfigError::EmptyGridDimension(_))));
    }

    #[test]
    fn test_apply_overrides_replaces_dimension() {
        let mut grid = ParameterGrid::new().with("stop_loss_pct", [20, 25]);
        grid.apply_overrides(&["stop_loss_pct=40".to_string()]).unwrap();
        assert_eq!(grid.total_combinations(), 1);
    }
}
