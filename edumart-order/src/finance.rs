use edumart_core::wallet::{LedgerEntry, TransactionKind, WalletOwner};
use rust_decimal::Decimal;

use crate::models::Order;

/// Who gets what out of a paid order.
#[derive(Debug, Clone, PartialEq)]
pub struct RevenueSplit {
    pub instructors: Vec<(uuid::Uuid, Decimal)>,
    pub platform_fee: Decimal,
}

impl RevenueSplit {
    pub fn of(order: &Order) -> Self {
        Self {
            instructors: order.earnings_by_instructor().into_iter().collect(),
            platform_fee: order.platform_fee_total(),
        }
    }

    pub fn instructor_total(&self) -> Decimal {
        self.instructors.iter().map(|(_, amount)| *amount).sum()
    }

    /// One entry per wallet with a non-zero share, instructors first.
    fn entries(&self, order: &Order, kind: TransactionKind, description: &str) -> Vec<LedgerEntry> {
        let mut entries: Vec<LedgerEntry> = self
            .instructors
            .iter()
            .filter(|(_, amount)| *amount > Decimal::ZERO)
            .map(|(instructor_id, amount)| LedgerEntry {
                owner: WalletOwner::Instructor(*instructor_id),
                kind,
                amount: *amount,
                description: format!("{} {}", description, order.order_number),
                order_id: Some(order.id),
                reference: Some(order.order_number.clone()),
            })
            .collect();

        if self.platform_fee > Decimal::ZERO {
            entries.push(LedgerEntry {
                owner: WalletOwner::Platform,
                kind,
                amount: self.platform_fee,
                description: format!("Platform fee, {} {}", description.to_lowercase(), order.order_number),
                order_id: Some(order.id),
                reference: Some(order.order_number.clone()),
            });
        }
        entries
    }
}

/// Held earnings credited when the order is paid.
pub fn pending_credits(order: &Order) -> Vec<LedgerEntry> {
    RevenueSplit::of(order).entries(order, TransactionKind::PendingCredit, "Earnings held for order")
}

/// Pending-to-available releases once the hold period is over.
pub fn settlement_entries(order: &Order) -> Vec<LedgerEntry> {
    RevenueSplit::of(order).entries(order, TransactionKind::Settlement, "Settlement of order")
}

/// Takes back held earnings when a paid order is refunded before settlement.
pub fn refund_reversals(order: &Order) -> Vec<LedgerEntry> {
    RevenueSplit::of(order).entries(order, TransactionKind::PendingReversal, "Refund of order")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClientContext, Order};
    use crate::pricing::{compose, PricingConfig};
    use chrono::Utc;
    use edumart_catalog::{CourseSnapshot, CourseStatus};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn order_with(lines: Vec<(Uuid, Decimal)>) -> Order {
        let lines = lines
            .into_iter()
            .map(|(instructor_id, price)| {
                (
                    CourseSnapshot {
                        id: Uuid::new_v4(),
                        title: "Course".into(),
                        thumbnail_url: None,
                        instructor_id,
                        instructor_name: "Instructor".into(),
                        original_price: price,
                        status: CourseStatus::Published,
                    },
                    None,
                )
            })
            .collect();
        let quote = compose(&PricingConfig::default(), lines, None);
        Order::from_quote(Uuid::new_v4(), &quote, ClientContext::default(), Utc::now())
    }

    #[test]
    fn test_split_groups_by_instructor() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let order = order_with(vec![(a, dec!(100000)), (b, dec!(200000)), (a, dec!(300000))]);

        let split = RevenueSplit::of(&order);
        assert_eq!(split.platform_fee, dec!(180000));
        assert_eq!(split.instructor_total(), dec!(420000));
        assert_eq!(split.instructor_total() + split.platform_fee, order.total);
        let a_share = split.instructors.iter().find(|(id, _)| *id == a).unwrap().1;
        assert_eq!(a_share, dec!(280000));
    }

    #[test]
    fn test_entries_skip_zero_amounts() {
        let order = order_with(vec![(Uuid::new_v4(), dec!(0)), (Uuid::new_v4(), dec!(100))]);
        let entries = pending_credits(&order);
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.kind == TransactionKind::PendingCredit));
        assert_eq!(entries.last().unwrap().owner, WalletOwner::Platform);
    }
}
