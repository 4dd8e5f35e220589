//! qx-policy
//!
//! Cost, risk, and sizing policies with pure field-wise override merging.
//!
//! A strategy bundle may carry partial overrides.  The merge rule is:
//! absent override object → keep the default object; absent (`None`)
//! override field → keep that default field; present field → replace that
//! single field.  The merge never mutates the defaults and is followed by
//! a validation pass, so an invalid override can never reach an engine.
//!
//! Ratios are basis points (`i64`) so merges, comparisons, and the policy
//! hash are exact integer arithmetic.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use qx_schemas::Micros;

// ---------------------------------------------------------------------------
// Default policies
// ---------------------------------------------------------------------------

/// Execution cost model applied by simulated brokers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostPolicy {
    pub commission_bps: i64,
    pub slippage_bps: i64,
    pub min_fee: Micros,
}

impl Default for CostPolicy {
    fn default() -> Self {
        Self {
            commission_bps: 10,
            slippage_bps: 5,
            min_fee: Micros::ZERO,
        }
    }
}

/// Pre-trade and drawdown limits enforced by the risk monitor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskPolicy {
    pub max_leverage_bps: i64,
    pub max_position_notional: Micros,
    pub max_drawdown_bps: i64,
    pub kill_switch_dd_bps: i64,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            max_leverage_bps: 20_000,
            max_position_notional: Micros::from_units(1_000_000),
            max_drawdown_bps: 2_500,
            kill_switch_dd_bps: 2_000,
        }
    }
}

/// Position sizing knobs consumed by the engines.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizingPolicy {
    pub target_vol_bps: i64,
    /// Also the rebalance turnover cap, as bps of equity.
    pub max_gross_exposure_bps: i64,
    pub per_trade_risk_bps: i64,
}

impl Default for SizingPolicy {
    fn default() -> Self {
        Self {
            target_vol_bps: 1_500,
            max_gross_exposure_bps: 10_000,
            per_trade_risk_bps: 1_000,
        }
    }
}

/// The three merged policies an engine runs under.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySet {
    pub cost: CostPolicy,
    pub risk: RiskPolicy,
    pub sizing: SizingPolicy,
}

// ---------------------------------------------------------------------------
// Overrides
// ---------------------------------------------------------------------------

/// Partial cost overrides.  `None` fields keep the default.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostOverrides {
    pub commission_bps: Option<i64>,
    pub slippage_bps: Option<i64>,
    pub min_fee: Option<Micros>,
}

/// Partial risk overrides.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskOverrides {
    pub max_leverage_bps: Option<i64>,
    pub max_position_notional: Option<Micros>,
    pub max_drawdown_bps: Option<i64>,
    pub kill_switch_dd_bps: Option<i64>,
}

/// Partial sizing overrides.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingOverrides {
    pub target_vol_bps: Option<i64>,
    pub max_gross_exposure_bps: Option<i64>,
    pub per_trade_risk_bps: Option<i64>,
}

/// Everything a strategy bundle may override.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyOverrides {
    pub cost: Option<CostOverrides>,
    pub risk: Option<RiskOverrides>,
    pub sizing: Option<SizingOverrides>,
}

impl PolicyOverrides {
    /// `true` when no field anywhere is set.
    pub fn is_empty(&self) -> bool {
        self == &PolicyOverrides::default()
    }
}

// ---------------------------------------------------------------------------
// Merge (pure, field-wise)
// ---------------------------------------------------------------------------

fn pick<T: Copy>(default: T, over: Option<T>) -> T {
    over.unwrap_or(default)
}

/// Overlay cost overrides onto defaults.  The defaults are untouched.
pub fn merge_cost(defaults: &CostPolicy, over: Option<&CostOverrides>) -> CostPolicy {
    match over {
        None => defaults.clone(),
        Some(o) => CostPolicy {
            commission_bps: pick(defaults.commission_bps, o.commission_bps),
            slippage_bps: pick(defaults.slippage_bps, o.slippage_bps),
            min_fee: pick(defaults.min_fee, o.min_fee),
        },
    }
}

/// Overlay risk overrides onto defaults.
pub fn merge_risk(defaults: &RiskPolicy, over: Option<&RiskOverrides>) -> RiskPolicy {
    match over {
        None => defaults.clone(),
        Some(o) => RiskPolicy {
            max_leverage_bps: pick(defaults.max_leverage_bps, o.max_leverage_bps),
            max_position_notional: pick(defaults.max_position_notional, o.max_position_notional),
            max_drawdown_bps: pick(defaults.max_drawdown_bps, o.max_drawdown_bps),
            kill_switch_dd_bps: pick(defaults.kill_switch_dd_bps, o.kill_switch_dd_bps),
        },
    }
}

/// Overlay sizing overrides onto defaults.
pub fn merge_sizing(defaults: &SizingPolicy, over: Option<&SizingOverrides>) -> SizingPolicy {
    match over {
        None => defaults.clone(),
        Some(o) => SizingPolicy {
            target_vol_bps: pick(defaults.target_vol_bps, o.target_vol_bps),
            max_gross_exposure_bps: pick(
                defaults.max_gross_exposure_bps,
                o.max_gross_exposure_bps,
            ),
            per_trade_risk_bps: pick(defaults.per_trade_risk_bps, o.per_trade_risk_bps),
        },
    }
}

/// Merge a full override set onto defaults, then validate the result.
pub fn compose(
    defaults: &PolicySet,
    overrides: &PolicyOverrides,
) -> Result<PolicySet, PolicyMergeError> {
    let merged = PolicySet {
        cost: merge_cost(&defaults.cost, overrides.cost.as_ref()),
        risk: merge_risk(&defaults.risk, overrides.risk.as_ref()),
        sizing: merge_sizing(&defaults.sizing, overrides.sizing.as_ref()),
    };
    validate(&merged)?;
    Ok(merged)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A merged policy set carries a value its field cannot accept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyMergeError {
    /// The named bps field is negative.  Negative cost knobs would make
    /// fills systematically favorable and are unconditionally rejected.
    NegativeBps { field: &'static str, value_bps: i64 },
    /// The named bps ratio is outside its accepted range.
    RatioOutOfRange {
        field: &'static str,
        value_bps: i64,
        max_bps: i64,
    },
    /// The named monetary field must be strictly positive.
    NonPositiveAmount { field: &'static str },
    /// The kill switch must trip at or before the max-drawdown limit.
    KillSwitchAboveMaxDrawdown {
        kill_switch_dd_bps: i64,
        max_drawdown_bps: i64,
    },
}

impl std::fmt::Display for PolicyMergeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NegativeBps { field, value_bps } => {
                write!(f, "policy field '{field}' must be >= 0 bps, got {value_bps}")
            }
            Self::RatioOutOfRange {
                field,
                value_bps,
                max_bps,
            } => write!(
                f,
                "policy field '{field}' must be in (0, {max_bps}] bps, got {value_bps}"
            ),
            Self::NonPositiveAmount { field } => {
                write!(f, "policy field '{field}' must be > 0")
            }
            Self::KillSwitchAboveMaxDrawdown {
                kill_switch_dd_bps,
                max_drawdown_bps,
            } => write!(
                f,
                "kill_switch_dd_bps ({kill_switch_dd_bps}) must be <= max_drawdown_bps ({max_drawdown_bps})"
            ),
        }
    }
}

impl std::error::Error for PolicyMergeError {}

/// Validate a merged policy set.
pub fn validate(p: &PolicySet) -> Result<(), PolicyMergeError> {
    let non_negative = |field, value_bps| {
        if value_bps < 0 {
            Err(PolicyMergeError::NegativeBps { field, value_bps })
        } else {
            Ok(())
        }
    };
    let ratio = |field, value_bps, max_bps| {
        if value_bps <= 0 || value_bps > max_bps {
            Err(PolicyMergeError::RatioOutOfRange {
                field,
                value_bps,
                max_bps,
            })
        } else {
            Ok(())
        }
    };

    non_negative("cost.commission_bps", p.cost.commission_bps)?;
    non_negative("cost.slippage_bps", p.cost.slippage_bps)?;
    if p.cost.min_fee.is_negative() {
        return Err(PolicyMergeError::NegativeBps {
            field: "cost.min_fee",
            value_bps: p.cost.min_fee.raw(),
        });
    }

    // Leverage up to 100x; drawdown ratios are fractions of peak equity.
    ratio("risk.max_leverage_bps", p.risk.max_leverage_bps, 1_000_000)?;
    ratio("risk.max_drawdown_bps", p.risk.max_drawdown_bps, 10_000)?;
    ratio("risk.kill_switch_dd_bps", p.risk.kill_switch_dd_bps, 10_000)?;
    if p.risk.max_position_notional <= Micros::ZERO {
        return Err(PolicyMergeError::NonPositiveAmount {
            field: "risk.max_position_notional",
        });
    }
    if p.risk.kill_switch_dd_bps > p.risk.max_drawdown_bps {
        return Err(PolicyMergeError::KillSwitchAboveMaxDrawdown {
            kill_switch_dd_bps: p.risk.kill_switch_dd_bps,
            max_drawdown_bps: p.risk.max_drawdown_bps,
        });
    }

    non_negative("sizing.target_vol_bps", p.sizing.target_vol_bps)?;
    ratio(
        "sizing.max_gross_exposure_bps",
        p.sizing.max_gross_exposure_bps,
        1_000_000,
    )?;
    ratio(
        "sizing.per_trade_risk_bps",
        p.sizing.per_trade_risk_bps,
        10_000,
    )?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Policy hash
// ---------------------------------------------------------------------------

/// SHA-256 over the canonical (key-sorted, compact) JSON of the merged
/// policy set.  Recorded in the run manifest so two runs can prove they
/// executed under identical policies.
pub fn policy_hash(p: &PolicySet) -> String {
    let raw = serde_json::to_value(p).expect("policy serialization is infallible");
    let canonical =
        serde_json::to_string(&sort_keys(&raw)).expect("policy serialization is infallible");
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_with_no_overrides_is_identity() {
        let defaults = PolicySet::default();
        let merged = compose(&defaults, &PolicyOverrides::default()).unwrap();
        assert_eq!(merged, defaults);
    }

    #[test]
    fn merge_with_all_none_fields_is_identity() {
        let defaults = PolicySet::default();
        let overrides = PolicyOverrides {
            cost: Some(CostOverrides::default()),
            risk: Some(RiskOverrides::default()),
            sizing: Some(SizingOverrides::default()),
        };
        assert_eq!(compose(&defaults, &overrides).unwrap(), defaults);
    }

    #[test]
    fn merge_replaces_only_set_fields() {
        let defaults = PolicySet::default();
        let overrides = PolicyOverrides {
            cost: Some(CostOverrides {
                commission_bps: Some(25),
                ..Default::default()
            }),
            risk: None,
            sizing: Some(SizingOverrides {
                per_trade_risk_bps: Some(500),
                ..Default::default()
            }),
        };
        let merged = compose(&defaults, &overrides).unwrap();
        assert_eq!(merged.cost.commission_bps, 25);
        assert_eq!(merged.cost.slippage_bps, defaults.cost.slippage_bps);
        assert_eq!(merged.cost.min_fee, defaults.cost.min_fee);
        assert_eq!(merged.risk, defaults.risk);
        assert_eq!(merged.sizing.per_trade_risk_bps, 500);
        assert_eq!(
            merged.sizing.max_gross_exposure_bps,
            defaults.sizing.max_gross_exposure_bps
        );
    }

    #[test]
    fn merge_does_not_mutate_defaults() {
        let defaults = PolicySet::default();
        let snapshot = defaults.clone();
        let overrides = PolicyOverrides {
            cost: Some(CostOverrides {
                slippage_bps: Some(99),
                ..Default::default()
            }),
            ..Default::default()
        };
        let _ = compose(&defaults, &overrides).unwrap();
        assert_eq!(defaults, snapshot);
    }

    #[test]
    fn negative_slippage_override_rejected() {
        let overrides = PolicyOverrides {
            cost: Some(CostOverrides {
                slippage_bps: Some(-5),
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = compose(&PolicySet::default(), &overrides).unwrap_err();
        assert_eq!(
            err,
            PolicyMergeError::NegativeBps {
                field: "cost.slippage_bps",
                value_bps: -5
            }
        );
    }

    #[test]
    fn drawdown_above_hundred_percent_rejected() {
        let overrides = PolicyOverrides {
            risk: Some(RiskOverrides {
                max_drawdown_bps: Some(10_001),
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = compose(&PolicySet::default(), &overrides).unwrap_err();
        assert!(matches!(
            err,
            PolicyMergeError::RatioOutOfRange {
                field: "risk.max_drawdown_bps",
                ..
            }
        ));
    }

    #[test]
    fn kill_switch_above_max_drawdown_rejected() {
        let overrides = PolicyOverrides {
            risk: Some(RiskOverrides {
                kill_switch_dd_bps: Some(3_000),
                max_drawdown_bps: Some(2_500),
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = compose(&PolicySet::default(), &overrides).unwrap_err();
        assert_eq!(
            err,
            PolicyMergeError::KillSwitchAboveMaxDrawdown {
                kill_switch_dd_bps: 3_000,
                max_drawdown_bps: 2_500
            }
        );
    }

    #[test]
    fn zero_position_notional_rejected() {
        let overrides = PolicyOverrides {
            risk: Some(RiskOverrides {
                max_position_notional: Some(Micros::ZERO),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(matches!(
            compose(&PolicySet::default(), &overrides),
            Err(PolicyMergeError::NonPositiveAmount {
                field: "risk.max_position_notional"
            })
        ));
    }

    #[test]
    fn policy_hash_is_stable_and_override_sensitive() {
        let defaults = PolicySet::default();
        let h1 = policy_hash(&defaults);
        let h2 = policy_hash(&defaults);
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);

        let overrides = PolicyOverrides {
            cost: Some(CostOverrides {
                commission_bps: Some(11),
                ..Default::default()
            }),
            ..Default::default()
        };
        let merged = compose(&defaults, &overrides).unwrap();
        assert_ne!(policy_hash(&merged), h1);
    }

    #[test]
    fn overrides_is_empty() {
        assert!(PolicyOverrides::default().is_empty());
        let o = PolicyOverrides {
            sizing: Some(SizingOverrides {
                target_vol_bps: Some(1),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(!o.is_empty());
    }
}
