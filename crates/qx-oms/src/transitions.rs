//! Order lifecycle transition table.
//!
//! ```text
//! Created          → Submitted, Rejected
//! Submitted        → Accepted, Rejected, PartiallyFilled, Filled, Cancelled, Expired
//! Accepted         → PartiallyFilled, Filled, Cancelled, Expired, Rejected
//! PartiallyFilled  → PartiallyFilled, Filled, Cancelled, Expired
//! ```
//!
//! Terminal states (`Filled`, `Cancelled`, `Expired`, `Rejected`) are
//! absorbing.  Any transition outside the table is a lifecycle invariant
//! violation — a programmer error that MUST halt the run, because it means
//! order state and venue state have diverged.

use chrono::{DateTime, Utc};

use qx_schemas::{OrderRecord, OrderStatus, Transition};

/// `true` when `from → to` appears in the lifecycle table.
pub fn is_allowed(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;
    matches!(
        (from, to),
        (Created, Submitted | Rejected)
            | (
                Submitted,
                Accepted | Rejected | PartiallyFilled | Filled | Cancelled | Expired
            )
            | (
                Accepted,
                PartiallyFilled | Filled | Cancelled | Expired | Rejected
            )
            | (PartiallyFilled, PartiallyFilled | Filled | Cancelled | Expired)
    )
}

/// An illegal lifecycle transition was attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleInvariantError {
    pub order_id: uuid::Uuid,
    pub from: OrderStatus,
    pub to: OrderStatus,
}

impl std::fmt::Display for LifecycleInvariantError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "illegal order transition {} -> {} for order {}",
            self.from, self.to, self.order_id
        )
    }
}

impl std::error::Error for LifecycleInvariantError {}

/// Apply a transition to a record, appending it to the transition log.
///
/// The record is untouched when the transition is illegal.
pub fn apply_transition(
    record: &mut OrderRecord,
    to: OrderStatus,
    ts: DateTime<Utc>,
    cause: &str,
) -> Result<(), LifecycleInvariantError> {
    let from = record.status;
    if !is_allowed(from, to) {
        return Err(LifecycleInvariantError {
            order_id: record.order_id,
            from,
            to,
        });
    }
    record.status = to;
    record.transitions.push(Transition {
        ts,
        from,
        to,
        cause: cause.to_string(),
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use qx_schemas::{OrderRequest, Side};

    fn record() -> OrderRecord {
        let ts = Utc.with_ymd_and_hms(2026, 1, 1, 0, 2, 0).unwrap();
        OrderRecord::new(OrderRequest::market("k", ts, "BTC-USD", Side::Buy, 1, "s"))
    }

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 2, 0).unwrap()
    }

    #[test]
    fn full_table_is_exact() {
        use OrderStatus::*;
        let all = [
            Created,
            Submitted,
            Accepted,
            Rejected,
            PartiallyFilled,
            Filled,
            Cancelled,
            Expired,
        ];
        let allowed: &[(OrderStatus, OrderStatus)] = &[
            (Created, Submitted),
            (Created, Rejected),
            (Submitted, Accepted),
            (Submitted, Rejected),
            (Submitted, PartiallyFilled),
            (Submitted, Filled),
            (Submitted, Cancelled),
            (Submitted, Expired),
            (Accepted, PartiallyFilled),
            (Accepted, Filled),
            (Accepted, Cancelled),
            (Accepted, Expired),
            (Accepted, Rejected),
            (PartiallyFilled, PartiallyFilled),
            (PartiallyFilled, Filled),
            (PartiallyFilled, Cancelled),
            (PartiallyFilled, Expired),
        ];
        for from in all {
            for to in all {
                let expected = allowed.contains(&(from, to));
                assert_eq!(
                    is_allowed(from, to),
                    expected,
                    "{from} -> {to} expected {expected}"
                );
            }
        }
    }

    #[test]
    fn terminal_states_are_absorbing() {
        use OrderStatus::*;
        for from in [Filled, Cancelled, Expired, Rejected] {
            for to in [
                Created,
                Submitted,
                Accepted,
                Rejected,
                PartiallyFilled,
                Filled,
                Cancelled,
                Expired,
            ] {
                assert!(!is_allowed(from, to), "{from} must absorb, got -> {to}");
            }
        }
    }

    #[test]
    fn apply_records_transition() {
        let mut rec = record();
        apply_transition(&mut rec, OrderStatus::Submitted, ts(), "submit").unwrap();
        assert_eq!(rec.status, OrderStatus::Submitted);
        assert_eq!(rec.transitions.len(), 1);
        assert_eq!(rec.transitions[0].from, OrderStatus::Created);
        assert_eq!(rec.transitions[0].to, OrderStatus::Submitted);
        assert_eq!(rec.transitions[0].cause, "submit");
    }

    #[test]
    fn illegal_transition_leaves_record_untouched() {
        let mut rec = record();
        let err = apply_transition(&mut rec, OrderStatus::Filled, ts(), "fill").unwrap_err();
        assert_eq!(err.from, OrderStatus::Created);
        assert_eq!(err.to, OrderStatus::Filled);
        assert_eq!(rec.status, OrderStatus::Created);
        assert!(rec.transitions.is_empty());
    }
}
