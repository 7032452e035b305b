use crate::application::locks::OrderLocks;
use crate::domain::events::OrderEvent;
use crate::domain::order::{Order, OrderId, OrderStatus};
use crate::domain::ports::{EventSinkRef, OrderStoreRef};
use crate::domain::tracking::OrderTracking;
use crate::error::{EngineError, Result};
use chrono::Utc;
use tracing::{info, instrument};

/// Governs order-status transitions and writes the tracking log.
pub struct OrderStateMachine {
    orders: OrderStoreRef,
    locks: OrderLocks,
    events: EventSinkRef,
}

impl OrderStateMachine {
    pub fn new(orders: OrderStoreRef, locks: OrderLocks, events: EventSinkRef) -> Self {
        Self {
            orders,
            locks,
            events,
        }
    }

    #[instrument(skip(self, reason))]
    pub async fn transition(
        &self,
        order_id: OrderId,
        target: OrderStatus,
        reason: Option<String>,
    ) -> Result<Order> {
        let (order, from) = {
            let _guard = self.locks.acquire(order_id).await;
            let order = self.load(order_id).await?;
            let from = order.status;
            (self.apply(order, target, reason.clone()).await?, from)
        };

        self.announce(&order, from, reason).await;
        Ok(order)
    }

    /// Moves the order to CANCELLED, appending `reason` to its notes.
    pub async fn cancel(&self, order_id: OrderId, reason: Option<String>) -> Result<Order> {
        self.transition(order_id, OrderStatus::Cancelled, reason)
            .await
    }

    /// Transitions only when the order currently sits in `expected`.
    ///
    /// Returns `None` without error when the order has already moved on.
    pub async fn advance_if(
        &self,
        order_id: OrderId,
        expected: OrderStatus,
        target: OrderStatus,
        reason: Option<String>,
    ) -> Result<Option<Order>> {
        let order = {
            let _guard = self.locks.acquire(order_id).await;
            let order = self.load(order_id).await?;
            if order.status != expected {
                info!(order_id, status = %order.status, %expected, "order already moved, skipping");
                return Ok(None);
            }
            self.apply(order, target, reason.clone()).await?
        };

        self.announce(&order, expected, reason).await;
        Ok(Some(order))
    }

    /// Appends a tracking entry for the current status without changing it.
    pub async fn add_tracking(
        &self,
        order_id: OrderId,
        description: Option<String>,
        location: Option<String>,
    ) -> Result<OrderTracking> {
        let _guard = self.locks.acquire(order_id).await;
        let order = self.load(order_id).await?;
        let entry = OrderTracking::new(order_id, order.status, Utc::now())
            .with_description(description)
            .with_location(location);
        self.orders.append_tracking(entry.clone()).await?;
        Ok(entry)
    }

    pub async fn tracking(&self, order_id: OrderId) -> Result<Vec<OrderTracking>> {
        self.load(order_id).await?;
        self.orders.tracking(order_id).await
    }

    async fn load(&self, order_id: OrderId) -> Result<Order> {
        self.orders
            .get(order_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Order {order_id}")))
    }

    /// Validates and persists a transition. Callers hold the order lock.
    async fn apply(
        &self,
        mut order: Order,
        target: OrderStatus,
        reason: Option<String>,
    ) -> Result<Order> {
        let from = order.status;
        // Delivered orders are never cancellable, independent of the table below.
        if from == OrderStatus::Delivered && target == OrderStatus::Cancelled {
            return Err(EngineError::InvalidTransition { from, to: target });
        }
        if !from.can_transition_to(target) {
            return Err(EngineError::InvalidTransition { from, to: target });
        }

        let now = Utc::now();
        order.status = target;
        order.updated_at = now;
        if let Some(reason) = reason.as_deref() {
            order.append_note(format!("{target}: {reason}"));
        }

        let description = reason.unwrap_or_else(|| format!("Order status changed to {target}"));
        let entry = OrderTracking::new(order.id, target, now).with_description(Some(description));
        self.orders
            .update_with_tracking(order.clone(), entry)
            .await?;
        Ok(order)
    }

    async fn announce(&self, order: &Order, from: OrderStatus, reason: Option<String>) {
        info!(order_id = order.id, %from, to = %order.status, "order status changed");
        self.events
            .publish(OrderEvent::StatusChanged {
                order_id: order.id,
                from,
                to: order.status,
                reason,
            })
            .await;
    }
}
