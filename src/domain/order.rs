use crate::domain::payment::PaymentStatus;
use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type OrderId = u64;
pub type UserId = u64;
pub type ProductId = u64;
pub type CurrencyId = u32;
pub type AddressId = u64;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    /// Targets reachable from this status in one step.
    pub fn allowed_targets(self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            Pending => &[Confirmed, Cancelled],
            Confirmed => &[Processing, Cancelled],
            Processing => &[Shipped, Cancelled],
            Shipped => &[Delivered],
            Delivered | Cancelled | Refunded => &[],
        }
    }

    pub fn can_transition_to(self, target: OrderStatus) -> bool {
        self.allowed_targets().contains(&target)
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_targets().is_empty()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Refunded => "REFUNDED",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(OrderStatus::Pending),
            "CONFIRMED" => Ok(OrderStatus::Confirmed),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "SHIPPED" => Ok(OrderStatus::Shipped),
            "DELIVERED" => Ok(OrderStatus::Delivered),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            "REFUNDED" => Ok(OrderStatus::Refunded),
            other => Err(EngineError::InvalidArgument(format!(
                "Unknown order status '{other}'"
            ))),
        }
    }
}

/// A resolved cart line handed to the aggregator.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct LineItem {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Decimal,
}

/// Optional monetary adjustments supplied by adjacent systems.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct Adjustments {
    pub discount: Option<Decimal>,
    pub tax: Option<Decimal>,
    pub shipping: Option<Decimal>,
}

/// Monetary fields of an order, computed once at creation.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Copy)]
pub struct OrderTotals {
    pub total_amount: Decimal,
    pub discount_amount: Decimal,
    pub tax_amount: Decimal,
    pub shipping_amount: Decimal,
    pub final_amount: Decimal,
}

impl OrderTotals {
    /// Sums `unit_price * quantity` over the items and applies the adjustments.
    ///
    /// `final_amount = total_amount + tax_amount + shipping_amount - discount_amount`.
    pub fn compute(items: &[LineItem], adjustments: &Adjustments) -> Result<Self> {
        let discount_amount = crate::domain::money::non_negative("discount", adjustments.discount)?;
        let tax_amount = crate::domain::money::non_negative("tax", adjustments.tax)?;
        let shipping_amount = crate::domain::money::non_negative("shipping", adjustments.shipping)?;

        let total_amount = items
            .iter()
            .map(|item| item.unit_price * Decimal::from(item.quantity))
            .sum::<Decimal>();

        let gross = total_amount + tax_amount + shipping_amount;
        if discount_amount > gross {
            return Err(EngineError::InvalidArgument(
                "Discount exceeds order amount".to_string(),
            ));
        }

        Ok(Self {
            total_amount,
            discount_amount,
            tax_amount,
            shipping_amount,
            final_amount: gross - discount_amount,
        })
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Order {
    pub id: OrderId,
    /// Externally shareable identifier, unique across all orders.
    pub order_number: String,
    pub user_id: UserId,
    pub currency_id: CurrencyId,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub total_amount: Decimal,
    pub discount_amount: Decimal,
    pub tax_amount: Decimal,
    pub shipping_amount: Decimal,
    pub final_amount: Decimal,
    pub shipping_address_id: Option<AddressId>,
    pub billing_address_id: Option<AddressId>,
    /// Append-only log of status-change reasons.
    pub notes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn append_note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct OrderItem {
    pub order_id: OrderId,
    /// Position of the item within its order, starting at 1.
    pub line_no: u32,
    pub product_id: ProductId,
    pub quantity: u32,
    /// Price captured at order time; later catalog changes do not apply.
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

impl OrderItem {
    pub fn from_line(order_id: OrderId, line_no: u32, line: &LineItem) -> Self {
        Self {
            order_id,
            line_no,
            product_id: line.product_id,
            quantity: line.quantity,
            unit_price: line.unit_price,
            total_price: line.unit_price * Decimal::from(line.quantity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn line(product_id: ProductId, quantity: u32, unit_price: Decimal) -> LineItem {
        LineItem {
            product_id,
            quantity,
            unit_price,
        }
    }

    #[test]
    fn test_totals_reference_scenario() {
        let items = vec![line(1, 2, dec!(50000)), line(2, 1, dec!(30000))];
        let adjustments = Adjustments {
            discount: None,
            tax: Some(dec!(5000)),
            shipping: Some(dec!(10000)),
        };

        let totals = OrderTotals::compute(&items, &adjustments).unwrap();
        assert_eq!(totals.total_amount, dec!(130000));
        assert_eq!(totals.final_amount, dec!(145000));
    }

    #[test]
    fn test_totals_independent_of_item_order() {
        let mut items = vec![
            line(1, 3, dec!(19.99)),
            line(2, 1, dec!(0.01)),
            line(3, 7, dec!(1250.5)),
        ];
        let adjustments = Adjustments {
            discount: Some(dec!(10)),
            tax: Some(dec!(1.5)),
            shipping: Some(dec!(3)),
        };

        let forward = OrderTotals::compute(&items, &adjustments).unwrap();
        items.reverse();
        let backward = OrderTotals::compute(&items, &adjustments).unwrap();

        assert_eq!(forward, backward);
        assert_eq!(
            forward.final_amount,
            forward.total_amount + forward.tax_amount + forward.shipping_amount
                - forward.discount_amount
        );
    }

    #[test]
    fn test_totals_reject_oversized_discount() {
        let items = vec![line(1, 1, dec!(10))];
        let adjustments = Adjustments {
            discount: Some(dec!(11)),
            ..Default::default()
        };
        assert!(matches!(
            OrderTotals::compute(&items, &adjustments),
            Err(EngineError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_transition_table() {
        use OrderStatus::*;
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Delivered));
        assert!(Confirmed.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Shipped));
        assert!(!Shipped.can_transition_to(Cancelled));
        assert!(Shipped.can_transition_to(Delivered));

        for target in [
            Pending, Confirmed, Processing, Shipped, Delivered, Cancelled, Refunded,
        ] {
            assert!(!Delivered.can_transition_to(target));
            assert!(!Cancelled.can_transition_to(target));
        }
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("shipped".parse::<OrderStatus>().unwrap(), OrderStatus::Shipped);
        assert_eq!(
            "CANCELLED".parse::<OrderStatus>().unwrap(),
            OrderStatus::Cancelled
        );
        assert!("lost".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_item_snapshot_price() {
        let item = OrderItem::from_line(7, 1, &line(3, 4, dec!(2.5)));
        assert_eq!(item.total_price, dec!(10.0));
        assert_eq!(item.order_id, 7);
    }
}
