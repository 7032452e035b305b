use crate::domain::order::{OrderId, OrderStatus, ProductId, UserId};
use crate::domain::payment::{PaymentId, PaymentMethod, PaymentStatus};
use rust_decimal::Decimal;
use serde::Serialize;

/// Events emitted for notification and inventory collaborators.
#[derive(Debug, Serialize, PartialEq, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    OrderCreated {
        order_id: OrderId,
        order_number: String,
        user_id: UserId,
        final_amount: Decimal,
        /// `(product, quantity)` pairs for inventory reservation.
        items: Vec<(ProductId, u32)>,
    },
    StatusChanged {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
        reason: Option<String>,
    },
    PaymentStatusChanged {
        order_id: OrderId,
        payment_id: PaymentId,
        method: PaymentMethod,
        status: PaymentStatus,
    },
}

impl OrderEvent {
    pub fn order_id(&self) -> OrderId {
        match self {
            OrderEvent::OrderCreated { order_id, .. }
            | OrderEvent::StatusChanged { order_id, .. }
            | OrderEvent::PaymentStatusChanged { order_id, .. } => *order_id,
        }
    }
}
