//! qx-portfolio
//!
//! Average-cost portfolio accounting over the ordered fill stream.
//!
//! # Determinism
//!
//! Pure integer arithmetic throughout — no IO, no time, no randomness.
//! Two books fed the same fill sequence and marks are always identical.
//! Cost basis is kept as a running total and only divided down to an
//! average price when a snapshot is projected, so no precision is lost in
//! accumulation.
//!
//! # Invariant
//!
//! `equity == cash + Σ qty × mark_price` at every snapshot.  The
//! engine asserts this on every emission.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use qx_schemas::{Bar, Fill, Micros, PortfolioState, Position, Side};

// ---------------------------------------------------------------------------
// Internal position
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct BookPosition {
    /// Signed quantity: +long, -short.
    qty: i64,
    /// Absolute entry value of the open quantity (>= 0).
    cost_basis: Micros,
    realized_pnl: Micros,
    mark: Micros,
}

impl BookPosition {
    fn unrealized(&self) -> Micros {
        if self.qty == 0 {
            return Micros::ZERO;
        }
        let market = self
            .mark
            .checked_mul_qty(self.qty.abs())
            .unwrap_or(Micros::MAX);
        if self.qty > 0 {
            market - self.cost_basis
        } else {
            self.cost_basis - market
        }
    }

    fn avg_price(&self) -> Micros {
        if self.qty == 0 {
            Micros::ZERO
        } else {
            Micros::new(self.cost_basis.raw() / self.qty.abs())
        }
    }
}

// ---------------------------------------------------------------------------
// PortfolioBook
// ---------------------------------------------------------------------------

/// The live portfolio: cash plus per-symbol positions.
///
/// Flat positions are retained (qty 0) so per-symbol realized PnL
/// survives round trips through [`PortfolioBook::snapshot`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortfolioBook {
    cash: Micros,
    positions: BTreeMap<String, BookPosition>,
}

impl PortfolioBook {
    pub fn new(initial_cash: Micros) -> Self {
        Self {
            cash: initial_cash,
            positions: BTreeMap::new(),
        }
    }

    /// Rebuild a book from a persisted snapshot (restart safety).
    pub fn restore(state: &PortfolioState) -> Self {
        let positions = state
            .positions
            .iter()
            .map(|(sym, p)| {
                let cost_basis = p
                    .avg_price
                    .checked_mul_qty(p.qty.abs())
                    .unwrap_or(Micros::MAX);
                (
                    sym.clone(),
                    BookPosition {
                        qty: p.qty,
                        cost_basis,
                        realized_pnl: p.realized_pnl,
                        mark: p.mark_price,
                    },
                )
            })
            .collect();
        Self {
            cash: state.cash,
            positions,
        }
    }

    // -- fills ---------------------------------------------------------------

    /// Apply one fill: cash movement first (commission included), then
    /// average-cost position update.  Closing a position realizes PnL
    /// proportionally to the cost basis of the quantity closed.
    pub fn apply_fill(&mut self, fill: &Fill) {
        debug_assert!(fill.qty > 0, "Fill.qty must be > 0");

        let value = fill
            .price
            .checked_mul_qty(fill.qty)
            .unwrap_or(Micros::MAX);
        match fill.side {
            Side::Buy => {
                self.cash = self.cash.saturating_sub(value);
                self.cash = self.cash.saturating_sub(fill.commission);
            }
            Side::Sell => {
                self.cash = self.cash.saturating_add(value);
                self.cash = self.cash.saturating_sub(fill.commission);
            }
        }

        let pos = self.positions.entry(fill.symbol.clone()).or_default();
        let delta = match fill.side {
            Side::Buy => fill.qty,
            Side::Sell => -fill.qty,
        };

        if pos.qty == 0 || pos.qty.signum() == delta.signum() {
            // Extending (or opening): entry value accumulates.
            pos.qty += delta;
            pos.cost_basis = pos.cost_basis.saturating_add(
                fill.price
                    .checked_mul_qty(delta.abs())
                    .unwrap_or(Micros::MAX),
            );
        } else {
            // Closing against the existing position.
            let closing = pos.qty.abs().min(delta.abs());
            let removed_cost =
                Micros::new(((pos.cost_basis.raw() as i128 * closing as i128)
                    / pos.qty.abs() as i128) as i64);
            let close_value = fill
                .price
                .checked_mul_qty(closing)
                .unwrap_or(Micros::MAX);

            let pnl = if pos.qty > 0 {
                close_value - removed_cost
            } else {
                removed_cost - close_value
            };
            pos.realized_pnl = pos.realized_pnl.saturating_add(pnl);
            pos.cost_basis = pos.cost_basis.saturating_sub(removed_cost);
            pos.qty += if pos.qty > 0 { -closing } else { closing };

            // Whatever quantity is left over flips to the other side.
            let remaining = delta.abs() - closing;
            if remaining > 0 {
                pos.qty = if delta > 0 { remaining } else { -remaining };
                pos.cost_basis = fill
                    .price
                    .checked_mul_qty(remaining)
                    .unwrap_or(Micros::MAX);
            } else if pos.qty == 0 {
                pos.cost_basis = Micros::ZERO;
            }
        }
    }

    // -- marks ---------------------------------------------------------------

    /// Mark one symbol to a price.
    pub fn mark(&mut self, symbol: &str, price: Micros) {
        if let Some(pos) = self.positions.get_mut(symbol) {
            pos.mark = price;
        }
    }

    /// Mark the bar's symbol at its close.
    pub fn mark_bar(&mut self, bar: &Bar) {
        self.mark(&bar.symbol, bar.close);
    }

    // -- views ---------------------------------------------------------------

    pub fn cash(&self) -> Micros {
        self.cash
    }

    /// Signed quantity held for a symbol (0 when unknown).
    pub fn qty(&self, symbol: &str) -> i64 {
        self.positions.get(symbol).map(|p| p.qty).unwrap_or(0)
    }

    /// Latest mark for a symbol, if the book has ever seen it.
    pub fn mark_price(&self, symbol: &str) -> Option<Micros> {
        self.positions.get(symbol).map(|p| p.mark)
    }

    /// `cash + Σ qty × mark` (signed).
    pub fn equity(&self) -> Micros {
        let marked: Micros = self
            .positions
            .values()
            .map(|p| {
                let v = p.mark.checked_mul_qty(p.qty.abs()).unwrap_or(Micros::MAX);
                if p.qty >= 0 {
                    v
                } else {
                    -v
                }
            })
            .sum();
        self.cash.saturating_add(marked)
    }

    /// `Σ |qty| × mark`.
    pub fn gross_exposure(&self) -> Micros {
        self.positions
            .values()
            .map(|p| p.mark.checked_mul_qty(p.qty.abs()).unwrap_or(Micros::MAX))
            .sum()
    }

    /// `Σ qty × mark` (signed).
    pub fn net_exposure(&self) -> Micros {
        self.equity() - self.cash
    }

    pub fn realized_pnl(&self) -> Micros {
        self.positions.values().map(|p| p.realized_pnl).sum()
    }

    pub fn unrealized_pnl(&self) -> Micros {
        self.positions.values().map(|p| p.unrealized()).sum()
    }

    /// Project the canonical snapshot for artifact emission.
    pub fn snapshot(&self, ts: DateTime<Utc>, pending_orders: Vec<Uuid>) -> PortfolioState {
        let mut pending = pending_orders;
        pending.sort();
        PortfolioState {
            ts,
            cash: self.cash,
            equity: self.equity(),
            positions: self
                .positions
                .iter()
                .map(|(sym, p)| {
                    (
                        sym.clone(),
                        Position {
                            qty: p.qty,
                            avg_price: p.avg_price(),
                            mark_price: p.mark,
                            unrealized_pnl: p.unrealized(),
                            realized_pnl: p.realized_pnl,
                        },
                    )
                })
                .collect(),
            gross_exposure: self.gross_exposure(),
            net_exposure: self.net_exposure(),
            pending_orders: pending,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use qx_schemas::derive_fill_id;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 2, 0).unwrap()
    }

    fn fill(symbol: &str, side: Side, qty: i64, price: i64, commission: i64) -> Fill {
        Fill {
            fill_id: derive_fill_id(Uuid::nil(), qty as u64),
            order_id: Uuid::nil(),
            ts: ts(),
            symbol: symbol.to_string(),
            side,
            qty,
            price: Micros::from_units(price),
            commission: Micros::from_units(commission),
            slippage_bps: 0,
            venue_fill_id: None,
            metadata: Default::default(),
        }
    }

    #[test]
    fn buy_moves_cash_and_opens_long() {
        let mut book = PortfolioBook::new(Micros::from_units(10_000));
        book.apply_fill(&fill("BTC-USD", Side::Buy, 10, 101, 1));
        assert_eq!(book.cash(), Micros::from_units(10_000 - 1_010 - 1));
        assert_eq!(book.qty("BTC-USD"), 10);
    }

    #[test]
    fn equity_invariant_holds_after_marking() {
        let mut book = PortfolioBook::new(Micros::from_units(10_000));
        book.apply_fill(&fill("BTC-USD", Side::Buy, 10, 100, 0));
        book.mark("BTC-USD", Micros::from_units(110));
        // equity = cash + qty*mark = 9000 + 1100
        assert_eq!(book.equity(), Micros::from_units(10_100));
        let snap = book.snapshot(ts(), vec![]);
        let marked: Micros = snap
            .positions
            .values()
            .map(|p| {
                let v = p.mark_price.checked_mul_qty(p.qty.abs()).unwrap();
                if p.qty >= 0 {
                    v
                } else {
                    -v
                }
            })
            .sum();
        assert_eq!(snap.equity, snap.cash + marked);
    }

    #[test]
    fn round_trip_realizes_pnl() {
        let mut book = PortfolioBook::new(Micros::from_units(10_000));
        book.apply_fill(&fill("BTC-USD", Side::Buy, 10, 100, 0));
        book.apply_fill(&fill("BTC-USD", Side::Sell, 10, 110, 0));
        assert_eq!(book.qty("BTC-USD"), 0);
        assert_eq!(book.realized_pnl(), Micros::from_units(100));
        assert_eq!(book.cash(), Micros::from_units(10_100));
    }

    #[test]
    fn partial_close_realizes_proportionally() {
        let mut book = PortfolioBook::new(Micros::from_units(10_000));
        book.apply_fill(&fill("BTC-USD", Side::Buy, 10, 100, 0));
        book.apply_fill(&fill("BTC-USD", Side::Sell, 4, 110, 0));
        assert_eq!(book.qty("BTC-USD"), 6);
        assert_eq!(book.realized_pnl(), Micros::from_units(40));
        let snap = book.snapshot(ts(), vec![]);
        assert_eq!(
            snap.positions["BTC-USD"].avg_price,
            Micros::from_units(100)
        );
    }

    #[test]
    fn short_cover_realizes_inverse_pnl() {
        let mut book = PortfolioBook::new(Micros::from_units(10_000));
        book.apply_fill(&fill("BTC-USD", Side::Sell, 5, 100, 0));
        assert_eq!(book.qty("BTC-USD"), -5);
        book.apply_fill(&fill("BTC-USD", Side::Buy, 5, 90, 0));
        assert_eq!(book.qty("BTC-USD"), 0);
        assert_eq!(book.realized_pnl(), Micros::from_units(50));
    }

    #[test]
    fn crossing_zero_flips_side_with_fresh_basis() {
        let mut book = PortfolioBook::new(Micros::from_units(10_000));
        book.apply_fill(&fill("BTC-USD", Side::Buy, 5, 100, 0));
        // Sell 8: closes 5 (pnl) then opens 3 short at 110.
        book.apply_fill(&fill("BTC-USD", Side::Sell, 8, 110, 0));
        assert_eq!(book.qty("BTC-USD"), -3);
        assert_eq!(book.realized_pnl(), Micros::from_units(50));
        let snap = book.snapshot(ts(), vec![]);
        assert_eq!(
            snap.positions["BTC-USD"].avg_price,
            Micros::from_units(110)
        );
    }

    #[test]
    fn average_price_blends_entries() {
        let mut book = PortfolioBook::new(Micros::from_units(10_000));
        book.apply_fill(&fill("BTC-USD", Side::Buy, 4, 100, 0));
        book.apply_fill(&fill("BTC-USD", Side::Buy, 4, 110, 0));
        let snap = book.snapshot(ts(), vec![]);
        assert_eq!(
            snap.positions["BTC-USD"].avg_price,
            Micros::from_units(105)
        );
    }

    #[test]
    fn flat_position_keeps_realized_history() {
        let mut book = PortfolioBook::new(Micros::from_units(10_000));
        book.apply_fill(&fill("BTC-USD", Side::Buy, 1, 100, 0));
        book.apply_fill(&fill("BTC-USD", Side::Sell, 1, 90, 0));
        let snap = book.snapshot(ts(), vec![]);
        let pos = &snap.positions["BTC-USD"];
        assert_eq!(pos.qty, 0);
        assert_eq!(pos.realized_pnl, Micros::from_units(-10));
        assert_eq!(pos.unrealized_pnl, Micros::ZERO);
    }

    #[test]
    fn gross_and_net_exposure() {
        let mut book = PortfolioBook::new(Micros::from_units(10_000));
        book.apply_fill(&fill("AAA", Side::Buy, 10, 100, 0));
        book.apply_fill(&fill("BBB", Side::Sell, 5, 100, 0));
        book.mark("AAA", Micros::from_units(100));
        book.mark("BBB", Micros::from_units(100));
        assert_eq!(book.gross_exposure(), Micros::from_units(1_500));
        assert_eq!(book.net_exposure(), Micros::from_units(500));
    }

    #[test]
    fn restore_round_trips_snapshot() {
        let mut book = PortfolioBook::new(Micros::from_units(10_000));
        book.apply_fill(&fill("AAA", Side::Buy, 10, 100, 2));
        book.apply_fill(&fill("AAA", Side::Sell, 3, 105, 1));
        book.mark("AAA", Micros::from_units(104));

        let snap = book.snapshot(ts(), vec![]);
        let restored = PortfolioBook::restore(&snap);
        assert_eq!(restored.snapshot(ts(), vec![]), snap);
    }

    #[test]
    fn pending_orders_are_sorted_in_snapshot() {
        let book = PortfolioBook::new(Micros::from_units(1));
        let a = Uuid::from_u128(7);
        let b = Uuid::from_u128(3);
        let snap = book.snapshot(ts(), vec![a, b]);
        assert_eq!(snap.pending_orders, vec![b, a]);
    }
}
