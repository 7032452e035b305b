use crate::application::locks::OrderLocks;
use crate::domain::events::OrderEvent;
use crate::domain::money::Amount;
use crate::domain::order::{Order, OrderId, OrderStatus};
use crate::domain::payment::{
    OrderPayment, PaymentId, PaymentMethod, PaymentStatus, RefundResult,
};
use crate::domain::ports::{EventSinkRef, OrderStoreRef, PaymentStoreRef};
use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, error, info, instrument};

/// Result of applying a provider outcome to a ledger attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordOutcome {
    pub payment: OrderPayment,
    /// `false` when the outcome was a replay and nothing changed.
    pub applied: bool,
}

/// State captured before a refund, used to compensate when the provider call fails.
#[derive(Debug, Clone, PartialEq)]
pub struct RefundSnapshot {
    pub payment: OrderPayment,
    pub order_payment_status: PaymentStatus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl DateRange {
    /// Half-open `[from, to)` containment.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.is_none_or(|from| at >= from) && self.to.is_none_or(|to| at < to)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatRow {
    pub key: String,
    pub count: u64,
    pub total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentStatistics {
    pub by_method: Vec<StatRow>,
    pub by_status: Vec<StatRow>,
}

/// The canonical record of payment attempts.
///
/// Every mutation runs under the owning order's lock and keeps `Order::payment_status` in
/// step with the order's attempts.
pub struct PaymentLedger {
    orders: OrderStoreRef,
    payments: PaymentStoreRef,
    locks: OrderLocks,
    events: EventSinkRef,
}

impl PaymentLedger {
    pub fn new(
        orders: OrderStoreRef,
        payments: PaymentStoreRef,
        locks: OrderLocks,
        events: EventSinkRef,
    ) -> Self {
        Self {
            orders,
            payments,
            locks,
            events,
        }
    }

    pub async fn order(&self, order_id: OrderId) -> Result<Order> {
        self.orders
            .get(order_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Order {order_id}")))
    }

    pub async fn payment(&self, payment_id: PaymentId) -> Result<OrderPayment> {
        self.payments
            .get(payment_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Payment {payment_id}")))
    }

    pub async fn payments_for_order(&self, order_id: OrderId) -> Result<Vec<OrderPayment>> {
        self.order(order_id).await?;
        self.payments.for_order(order_id).await
    }

    pub async fn find_by_external(
        &self,
        method: PaymentMethod,
        external_id: &str,
    ) -> Result<Option<OrderPayment>> {
        self.payments.find_by_external(method, external_id).await
    }

    /// The PAID (or refunded) attempt of an order, if any.
    pub async fn captured_payment(&self, order_id: OrderId) -> Result<Option<OrderPayment>> {
        Ok(self
            .payments
            .for_order(order_id)
            .await?
            .into_iter()
            .find(|payment| payment.status.is_captured()))
    }

    #[instrument(skip(self))]
    pub async fn open_attempt(
        &self,
        order_id: OrderId,
        method: PaymentMethod,
        amount: Decimal,
    ) -> Result<OrderPayment> {
        let amount = Amount::new(amount)?;
        let _guard = self.locks.acquire(order_id).await;

        let mut order = self.order(order_id).await?;
        if order.payment_status == PaymentStatus::Paid {
            return Err(EngineError::Conflict(format!(
                "Order {order_id} is already paid"
            )));
        }
        if matches!(order.status, OrderStatus::Cancelled | OrderStatus::Refunded) {
            return Err(EngineError::InvalidState(format!(
                "Order {order_id} is {}",
                order.status
            )));
        }
        if let Some(captured) = self.captured_payment(order_id).await? {
            return Err(EngineError::Conflict(format!(
                "Order {order_id} already has captured payment {}",
                captured.id
            )));
        }

        let now = Utc::now();
        let payment = OrderPayment::new(
            self.payments.next_payment_id().await?,
            order_id,
            method,
            amount,
            now,
        );
        self.payments.insert(payment.clone()).await?;

        if order.payment_status != PaymentStatus::Pending {
            order.payment_status = PaymentStatus::Pending;
            order.updated_at = now;
            self.orders.update(order).await?;
        }

        info!(payment_id = payment.id, order_id, %method, amount = %payment.amount, "payment attempt opened");
        Ok(payment)
    }

    /// Binds the provider transaction id to a pending attempt.
    pub async fn bind_external(
        &self,
        payment_id: PaymentId,
        external_id: &str,
        raw: serde_json::Value,
    ) -> Result<OrderPayment> {
        let order_id = self.payment(payment_id).await?.order_id;
        let _guard = self.locks.acquire(order_id).await;

        let mut payment = self.payment(payment_id).await?;
        if payment.bind_external(external_id, Utc::now())? {
            payment.gateway_response = Some(raw);
            self.payments.store(payment.clone()).await?;
            debug!(payment_id, external_id, "external transaction bound");
        }
        Ok(payment)
    }

    /// Applies a provider outcome. Re-applying the current status is a no-op.
    #[instrument(skip(self, raw))]
    pub async fn record_result(
        &self,
        payment_id: PaymentId,
        status: PaymentStatus,
        external_id: Option<&str>,
        raw: serde_json::Value,
    ) -> Result<RecordOutcome> {
        let order_id = self.payment(payment_id).await?.order_id;
        let _guard = self.locks.acquire(order_id).await;

        let previous = self.payment(payment_id).await?;
        if status == PaymentStatus::Paid
            && previous.status == PaymentStatus::Pending
            && let Some(captured) = self.captured_payment(order_id).await?
        {
            return Err(EngineError::Conflict(format!(
                "Order {order_id} already has captured payment {}",
                captured.id
            )));
        }
        if let Some(external_id) = external_id
            && let Some(owner) = self
                .payments
                .find_by_external(previous.payment_method, external_id)
                .await?
            && owner.id != payment_id
        {
            return Err(EngineError::Conflict(format!(
                "Transaction {external_id} belongs to payment {}",
                owner.id
            )));
        }

        let mut payment = previous.clone();
        let applied = payment.apply_result(status, external_id, raw, Utc::now())?;
        if !applied {
            debug!(payment_id, %status, "replayed payment result ignored");
            return Ok(RecordOutcome { payment, applied });
        }

        self.persist(&previous, &payment).await?;
        info!(payment_id, order_id, %status, "payment result recorded");
        self.announce(&payment).await;
        Ok(RecordOutcome { payment, applied })
    }

    /// Marks a captured payment as (partially) refunded.
    ///
    /// The returned snapshot lets the caller undo the refund with [`Self::revert_refund`].
    #[instrument(skip(self))]
    pub async fn refund(
        &self,
        payment_id: PaymentId,
        amount: Option<Decimal>,
    ) -> Result<(RefundResult, RefundSnapshot)> {
        let order_id = self.payment(payment_id).await?.order_id;
        let _guard = self.locks.acquire(order_id).await;

        let previous = self.payment(payment_id).await?;
        let order = self.order(order_id).await?;
        let snapshot = RefundSnapshot {
            payment: previous.clone(),
            order_payment_status: order.payment_status,
        };

        let mut payment = previous.clone();
        let result = payment.refund(amount, Utc::now())?;
        self.persist(&previous, &payment).await?;

        info!(payment_id, order_id, refunded = %result.refunded_amount, status = %result.status, "payment refunded");
        self.announce(&payment).await;
        Ok((result, snapshot))
    }

    /// Restores the ledger to the state captured before a refund.
    #[instrument(skip(self, snapshot), fields(payment_id = snapshot.payment.id))]
    pub async fn revert_refund(&self, snapshot: RefundSnapshot) -> Result<()> {
        let order_id = snapshot.payment.order_id;
        let _guard = self.locks.acquire(order_id).await;

        let current = self.payment(snapshot.payment.id).await?;
        if !matches!(
            current.status,
            PaymentStatus::Refunded | PaymentStatus::PartiallyRefunded
        ) {
            return Err(EngineError::InvalidState(format!(
                "Payment {} is {}, nothing to revert",
                current.id, current.status
            )));
        }

        self.payments.store(snapshot.payment.clone()).await?;
        let mut order = self.order(order_id).await?;
        order.payment_status = snapshot.order_payment_status;
        order.updated_at = Utc::now();
        self.orders.update(order).await?;

        info!(order_id, status = %snapshot.payment.status, "refund reverted");
        self.announce(&snapshot.payment).await;
        Ok(())
    }

    /// Stores a provider payload on the attempt without changing its status.
    pub async fn note_response(&self, payment_id: PaymentId, raw: serde_json::Value) -> Result<()> {
        let order_id = self.payment(payment_id).await?.order_id;
        let _guard = self.locks.acquire(order_id).await;

        let mut payment = self.payment(payment_id).await?;
        payment.gateway_response = Some(raw);
        payment.updated_at = Utc::now();
        self.payments.store(payment).await
    }

    /// Count and sum of attempts per method and per status.
    pub async fn statistics(&self, range: DateRange) -> Result<PaymentStatistics> {
        let mut by_method: BTreeMap<PaymentMethod, (u64, Decimal)> = BTreeMap::new();
        let mut by_status: BTreeMap<PaymentStatus, (u64, Decimal)> = BTreeMap::new();

        for payment in self.payments.all().await? {
            if !range.contains(payment.created_at) {
                continue;
            }
            let entry = by_method.entry(payment.payment_method).or_default();
            entry.0 += 1;
            entry.1 += payment.amount;
            let entry = by_status.entry(payment.status).or_default();
            entry.0 += 1;
            entry.1 += payment.amount;
        }

        let rows = |key: String, (count, total): (u64, Decimal)| StatRow { key, count, total };
        Ok(PaymentStatistics {
            by_method: by_method
                .into_iter()
                .map(|(method, agg)| rows(method.to_string(), agg))
                .collect(),
            by_status: by_status
                .into_iter()
                .map(|(status, agg)| rows(status.to_string(), agg))
                .collect(),
        })
    }

    /// Attempts made with `method` inside `range`, oldest first.
    pub async fn attempts(
        &self,
        method: PaymentMethod,
        range: DateRange,
    ) -> Result<Vec<OrderPayment>> {
        let mut attempts: Vec<_> = self
            .payments
            .all()
            .await?
            .into_iter()
            .filter(|p| p.payment_method == method && range.contains(p.created_at))
            .collect();
        attempts.sort_by_key(|p| (p.created_at, p.id));
        Ok(attempts)
    }

    /// Writes the payment, then refreshes the order's payment status.
    ///
    /// The order follows its captured attempt when it has one; otherwise it follows the
    /// attempt just written. If the order write fails the payment row is put back.
    async fn persist(&self, previous: &OrderPayment, payment: &OrderPayment) -> Result<()> {
        self.payments.store(payment.clone()).await?;

        let mirror = async {
            let status = match self.captured_payment(payment.order_id).await? {
                Some(captured) => captured.status,
                None => payment.status,
            };
            let mut order = self.order(payment.order_id).await?;
            if order.payment_status != status {
                order.payment_status = status;
                order.updated_at = payment.updated_at;
                self.orders.update(order).await?;
            }
            Ok(())
        };
        if let Err(e) = mirror.await {
            if let Err(restore) = self.payments.store(previous.clone()).await {
                error!(payment_id = payment.id, error = %restore, "failed to restore payment after order update error");
            }
            return Err(e);
        }
        Ok(())
    }

    async fn announce(&self, payment: &OrderPayment) {
        self.events
            .publish(OrderEvent::PaymentStatusChanged {
                order_id: payment.order_id,
                payment_id: payment.id,
                method: payment.payment_method,
                status: payment.status,
            })
            .await;
    }
}
