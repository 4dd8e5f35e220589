//! Intent sizing: signals → sized orders, target weights → delta orders.

use std::collections::{BTreeMap, BTreeSet};

use qx_policy::SizingPolicy;
use qx_schemas::{Micros, Side, Signal, SignalAction, TargetWeights, BPS_SCALE};

// ---------------------------------------------------------------------------
// Signal sizing
// ---------------------------------------------------------------------------

/// A sized, side-resolved intent ready for risk and submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizedIntent {
    pub symbol: String,
    pub side: Side,
    pub qty: i64,
}

/// Size one signal against the current position.
///
/// Entries budget `equity × per_trade_risk × strength` and floor-divide by
/// price; an entry against an opposite position also covers it, so one
/// order moves the book to the intended side.  Redundant entries (already
/// positioned) and `Hold` produce nothing.  Exits close the held
/// quantity, no more.
pub fn size_signal(
    signal: &Signal,
    equity: Micros,
    price: Micros,
    sizing: &SizingPolicy,
    held_qty: i64,
) -> Option<SizedIntent> {
    if price <= Micros::ZERO {
        return None;
    }

    let entry_qty = || {
        let budget = equity
            .mul_bps(sizing.per_trade_risk_bps)
            .mul_bps(signal.strength_bps.clamp(0, BPS_SCALE));
        budget.div_price(price)
    };

    let (side, qty) = match signal.action {
        SignalAction::Hold => return None,
        SignalAction::EnterLong => {
            if held_qty > 0 {
                return None;
            }
            (Side::Buy, held_qty.abs() + entry_qty())
        }
        SignalAction::ExitLong => {
            if held_qty <= 0 {
                return None;
            }
            (Side::Sell, held_qty)
        }
        SignalAction::EnterShort => {
            if held_qty < 0 {
                return None;
            }
            (Side::Sell, held_qty + entry_qty())
        }
        SignalAction::ExitShort => {
            if held_qty >= 0 {
                return None;
            }
            (Side::Buy, held_qty.abs())
        }
    };

    if qty <= 0 {
        return None;
    }
    Some(SizedIntent {
        symbol: signal.symbol.clone(),
        side,
        qty,
    })
}

// ---------------------------------------------------------------------------
// Rebalance deltas
// ---------------------------------------------------------------------------

/// Result of reducing target weights to orders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebalancePlan {
    /// Sells first (ascending symbol), then buys (ascending symbol), so
    /// sells free buying power before any buy is worked.
    pub orders: Vec<SizedIntent>,
    /// Set when the turnover cap reduced the batch, with the scale in bps.
    pub turnover_scaled_bps: Option<i64>,
}

/// The weight vector is not executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightSumError {
    pub total_bps: i64,
}

impl std::fmt::Display for WeightSumError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "target weights sum to {} bps, above the 10000 bps bound",
            self.total_bps
        )
    }
}

impl std::error::Error for WeightSumError {}

/// Reduce target weights to delta orders under the turnover cap.
///
/// Symbols currently held but absent from the weight map are targeted to
/// zero.  The turnover cap is `equity × max_gross_exposure`; when the
/// gross traded notional exceeds it every delta is reduced
/// proportionally (truncating), which preserves the batch's direction
/// while bounding its size.
pub fn rebalance_plan(
    weights: &TargetWeights,
    equity: Micros,
    prices: &BTreeMap<String, Micros>,
    held: &BTreeMap<String, i64>,
    sizing: &SizingPolicy,
) -> Result<RebalancePlan, WeightSumError> {
    let total_bps = weights.total_bps();
    if total_bps > BPS_SCALE || weights.weights.values().any(|w| *w < 0) {
        return Err(WeightSumError { total_bps });
    }

    // Union of targeted and held symbols, deterministically ordered.
    let mut symbols: BTreeSet<&String> = weights.weights.keys().collect();
    symbols.extend(held.keys());

    let mut deltas: Vec<(String, i64, Micros)> = Vec::new(); // (symbol, qty_delta, price)
    for symbol in symbols {
        let Some(&price) = prices.get(symbol) else {
            // No mark, no trade; the symbol stays as it is.
            continue;
        };
        if price <= Micros::ZERO {
            continue;
        }
        let weight_bps = weights.weights.get(symbol).copied().unwrap_or(0);
        let target_notional = equity.mul_bps(weight_bps);
        let held_qty = held.get(symbol).copied().unwrap_or(0);
        let current_notional = price.checked_mul_qty(held_qty).unwrap_or(Micros::MAX);

        let delta_notional = target_notional - current_notional;
        let qty = delta_notional.abs().div_price(price);
        if qty == 0 {
            continue;
        }
        let signed_qty = if delta_notional.is_negative() { -qty } else { qty };
        deltas.push((symbol.clone(), signed_qty, price));
    }

    // Turnover cap: proportional reduction of every leg.
    let cap = equity.mul_bps(sizing.max_gross_exposure_bps);
    let gross: Micros = deltas
        .iter()
        .map(|(_, qty, price)| price.checked_mul_qty(qty.abs()).unwrap_or(Micros::MAX))
        .sum();

    let mut turnover_scaled_bps = None;
    if gross > cap {
        let scale_bps = cap.ratio_bps(gross);
        turnover_scaled_bps = Some(scale_bps);
        for (_, qty, _) in deltas.iter_mut() {
            let scaled = (*qty as i128 * scale_bps as i128) / BPS_SCALE as i128;
            *qty = scaled as i64;
        }
        deltas.retain(|(_, qty, _)| *qty != 0);
    }

    // Sells first, then buys; ascending symbol within each side.
    let mut sells: Vec<SizedIntent> = Vec::new();
    let mut buys: Vec<SizedIntent> = Vec::new();
    for (symbol, qty, _) in deltas {
        if qty < 0 {
            sells.push(SizedIntent {
                symbol,
                side: Side::Sell,
                qty: -qty,
            });
        } else {
            buys.push(SizedIntent {
                symbol,
                side: Side::Buy,
                qty,
            });
        }
    }
    sells.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    buys.sort_by(|a, b| a.symbol.cmp(&b.symbol));

    let mut orders = sells;
    orders.extend(buys);
    Ok(RebalancePlan {
        orders,
        turnover_scaled_bps,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn sizing() -> SizingPolicy {
        SizingPolicy {
            target_vol_bps: 1_500,
            max_gross_exposure_bps: 10_000,
            per_trade_risk_bps: 1_000,
        }
    }

    fn signal(action: SignalAction, strength_bps: i64) -> Signal {
        let ts = Utc.with_ymd_and_hms(2026, 1, 1, 0, 2, 0).unwrap();
        let mut s = Signal::full(ts, "BTC-USD", action, "s");
        s.strength_bps = strength_bps;
        s
    }

    #[test]
    fn enter_long_from_flat_budgets_by_risk_and_strength() {
        // equity 10_000, 10% per trade, full strength, price 101 → 9 units.
        let intent = size_signal(
            &signal(SignalAction::EnterLong, 10_000),
            Micros::from_units(10_000),
            Micros::from_units(101),
            &sizing(),
            0,
        )
        .unwrap();
        assert_eq!(intent.side, Side::Buy);
        assert_eq!(intent.qty, 9);
    }

    #[test]
    fn half_strength_halves_budget() {
        let intent = size_signal(
            &signal(SignalAction::EnterLong, 5_000),
            Micros::from_units(10_000),
            Micros::from_units(100),
            &sizing(),
            0,
        )
        .unwrap();
        assert_eq!(intent.qty, 5);
    }

    #[test]
    fn redundant_enter_long_is_hold() {
        assert!(size_signal(
            &signal(SignalAction::EnterLong, 10_000),
            Micros::from_units(10_000),
            Micros::from_units(100),
            &sizing(),
            3,
        )
        .is_none());
    }

    #[test]
    fn enter_long_from_short_covers_then_opens() {
        let intent = size_signal(
            &signal(SignalAction::EnterLong, 10_000),
            Micros::from_units(10_000),
            Micros::from_units(100),
            &sizing(),
            -4,
        )
        .unwrap();
        // 4 to cover + 10 to open.
        assert_eq!(intent.qty, 14);
        assert_eq!(intent.side, Side::Buy);
    }

    #[test]
    fn exit_long_closes_exact_holding() {
        let intent = size_signal(
            &signal(SignalAction::ExitLong, 10_000),
            Micros::from_units(10_000),
            Micros::from_units(100),
            &sizing(),
            7,
        )
        .unwrap();
        assert_eq!(intent.side, Side::Sell);
        assert_eq!(intent.qty, 7);
    }

    #[test]
    fn exit_long_when_flat_is_noop() {
        assert!(size_signal(
            &signal(SignalAction::ExitLong, 10_000),
            Micros::from_units(10_000),
            Micros::from_units(100),
            &sizing(),
            0,
        )
        .is_none());
    }

    #[test]
    fn hold_produces_nothing() {
        assert!(size_signal(
            &signal(SignalAction::Hold, 10_000),
            Micros::from_units(10_000),
            Micros::from_units(100),
            &sizing(),
            5,
        )
        .is_none());
    }

    #[test]
    fn enter_short_sells() {
        let intent = size_signal(
            &signal(SignalAction::EnterShort, 10_000),
            Micros::from_units(10_000),
            Micros::from_units(100),
            &sizing(),
            0,
        )
        .unwrap();
        assert_eq!(intent.side, Side::Sell);
        assert_eq!(intent.qty, 10);
    }

    // --- rebalance ---

    fn weights(pairs: &[(&str, i64)]) -> TargetWeights {
        TargetWeights {
            ts: Utc.with_ymd_and_hms(2026, 1, 1, 0, 2, 0).unwrap(),
            weights: pairs
                .iter()
                .map(|(s, w)| (s.to_string(), *w))
                .collect(),
            rebalance: true,
            reason: None,
        }
    }

    fn prices(pairs: &[(&str, i64)]) -> BTreeMap<String, Micros> {
        pairs
            .iter()
            .map(|(s, p)| (s.to_string(), Micros::from_units(*p)))
            .collect()
    }

    #[test]
    fn weights_above_one_rejected() {
        let err = rebalance_plan(
            &weights(&[("AAA", 6_000), ("BBB", 5_000)]),
            Micros::from_units(10_000),
            &prices(&[("AAA", 100), ("BBB", 100)]),
            &BTreeMap::new(),
            &sizing(),
        )
        .unwrap_err();
        assert_eq!(err.total_bps, 11_000);
    }

    #[test]
    fn deltas_from_flat_buy_to_target() {
        let plan = rebalance_plan(
            &weights(&[("AAA", 5_000), ("BBB", 2_500)]),
            Micros::from_units(10_000),
            &prices(&[("AAA", 100), ("BBB", 50)]),
            &BTreeMap::new(),
            &sizing(),
        )
        .unwrap();
        assert_eq!(
            plan.orders,
            vec![
                SizedIntent {
                    symbol: "AAA".to_string(),
                    side: Side::Buy,
                    qty: 50
                },
                SizedIntent {
                    symbol: "BBB".to_string(),
                    side: Side::Buy,
                    qty: 50
                },
            ]
        );
        assert!(plan.turnover_scaled_bps.is_none());
    }

    #[test]
    fn sells_precede_buys() {
        let mut held = BTreeMap::new();
        held.insert("ZZZ".to_string(), 100_i64); // to be sold down to 0
        let plan = rebalance_plan(
            &weights(&[("AAA", 2_000)]),
            Micros::from_units(10_000),
            &prices(&[("AAA", 100), ("ZZZ", 10)]),
            &held,
            &sizing(),
        )
        .unwrap();
        assert_eq!(plan.orders[0].side, Side::Sell);
        assert_eq!(plan.orders[0].symbol, "ZZZ");
        assert_eq!(plan.orders[1].side, Side::Buy);
        assert_eq!(plan.orders[1].symbol, "AAA");
    }

    #[test]
    fn held_symbol_missing_from_weights_is_closed() {
        let mut held = BTreeMap::new();
        held.insert("OLD".to_string(), 5_i64);
        let plan = rebalance_plan(
            &weights(&[]),
            Micros::from_units(10_000),
            &prices(&[("OLD", 100)]),
            &held,
            &sizing(),
        )
        .unwrap();
        assert_eq!(
            plan.orders,
            vec![SizedIntent {
                symbol: "OLD".to_string(),
                side: Side::Sell,
                qty: 5
            }]
        );
    }

    #[test]
    fn turnover_cap_scales_proportionally() {
        let tight = SizingPolicy {
            max_gross_exposure_bps: 1_000, // cap = 10% of equity = 1_000
            ..sizing()
        };
        let plan = rebalance_plan(
            &weights(&[("AAA", 5_000), ("BBB", 5_000)]),
            Micros::from_units(10_000),
            &prices(&[("AAA", 100), ("BBB", 100)]),
            &BTreeMap::new(),
            &tight,
        )
        .unwrap();
        // Unscaled: 50 + 50 = 10_000 notional vs cap 1_000 → scale 1_000 bps.
        assert_eq!(plan.turnover_scaled_bps, Some(1_000));
        let total_qty: i64 = plan.orders.iter().map(|o| o.qty).sum();
        assert_eq!(total_qty, 10);
    }

    #[test]
    fn scaling_drops_dust_legs() {
        let tight = SizingPolicy {
            max_gross_exposure_bps: 100,
            ..sizing()
        };
        let plan = rebalance_plan(
            &weights(&[("AAA", 100), ("BBB", 5_000)]),
            Micros::from_units(10_000),
            &prices(&[("AAA", 100), ("BBB", 100)]),
            &BTreeMap::new(),
            &tight,
        )
        .unwrap();
        // AAA's scaled qty truncates to zero and is dropped.
        assert!(plan.orders.iter().all(|o| o.qty > 0));
    }

    #[test]
    fn unpriced_symbol_is_skipped() {
        let plan = rebalance_plan(
            &weights(&[("AAA", 5_000), ("NOPRICE", 5_000)]),
            Micros::from_units(10_000),
            &prices(&[("AAA", 100)]),
            &BTreeMap::new(),
            &sizing(),
        )
        .unwrap();
        assert_eq!(plan.orders.len(), 1);
        assert_eq!(plan.orders[0].symbol, "AAA");
    }
}
