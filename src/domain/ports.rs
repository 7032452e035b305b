use super::events::OrderEvent;
use super::order::{Order, OrderId, OrderItem, ProductId, UserId};
use super::payment::{OrderPayment, PaymentId, PaymentMethod};
use super::tracking::OrderTracking;
use crate::error::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Persistence for orders and their owned rows (items, tracking).
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn next_order_id(&self) -> Result<OrderId>;
    /// Persists an order together with its items as one atomic unit.
    ///
    /// Fails with `EngineError::DuplicateOrderNumber` when the order number is taken,
    /// in which case nothing is written.
    async fn insert(&self, order: Order, items: Vec<OrderItem>) -> Result<()>;
    async fn get(&self, order_id: OrderId) -> Result<Option<Order>>;
    async fn items(&self, order_id: OrderId) -> Result<Vec<OrderItem>>;
    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Order>>;
    /// Overwrites the mutable fields of an existing order.
    async fn update(&self, order: Order) -> Result<()>;
    /// Overwrites the order and appends a tracking entry atomically.
    async fn update_with_tracking(&self, order: Order, tracking: OrderTracking) -> Result<()>;
    async fn append_tracking(&self, tracking: OrderTracking) -> Result<()>;
    async fn tracking(&self, order_id: OrderId) -> Result<Vec<OrderTracking>>;
}

/// Persistence for ledger attempts.
///
/// Implementations enforce a unique index on `(payment_method, external_transaction_id)`.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn next_payment_id(&self) -> Result<PaymentId>;
    async fn insert(&self, payment: OrderPayment) -> Result<()>;
    /// Overwrites an existing payment. Fails with `EngineError::Conflict` when the
    /// external transaction id already belongs to another payment of the same method.
    async fn store(&self, payment: OrderPayment) -> Result<()>;
    async fn get(&self, payment_id: PaymentId) -> Result<Option<OrderPayment>>;
    async fn for_order(&self, order_id: OrderId) -> Result<Vec<OrderPayment>>;
    async fn find_by_external(
        &self,
        method: PaymentMethod,
        external_id: &str,
    ) -> Result<Option<OrderPayment>>;
    async fn all(&self) -> Result<Vec<OrderPayment>>;
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct ProductSnapshot {
    pub id: ProductId,
    pub name: String,
    pub price: Decimal,
    pub is_active: bool,
}

/// Read-only view of the external catalog.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn product(&self, product_id: ProductId) -> Result<Option<ProductSnapshot>>;
}

/// Read-only view of the external user service.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn exists(&self, user_id: UserId) -> Result<bool>;
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: OrderEvent);
}

/// Session-creation request sent to a provider.
#[derive(Debug, Serialize, PartialEq, Clone)]
pub struct SessionRequest {
    pub method: PaymentMethod,
    pub payment_id: PaymentId,
    pub order_id: OrderId,
    pub amount_minor: i64,
    pub return_url: String,
    pub cancel_url: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, PartialEq, Clone, Default)]
pub struct SessionResponse {
    pub external_id: Option<String>,
    pub redirect_url: Option<String>,
    /// Set by synchronous providers when the charge settled within the call.
    #[serde(default)]
    pub captured: bool,
    #[serde(default)]
    pub raw: serde_json::Value,
}

#[derive(Debug, Serialize, PartialEq, Clone)]
pub struct ProviderRefundRequest {
    pub method: PaymentMethod,
    pub payment_id: PaymentId,
    pub external_id: Option<String>,
    pub amount_minor: i64,
}

/// Outbound calls to a payment provider's merchant API.
#[async_trait]
pub trait ProviderApi: Send + Sync {
    async fn register_session(&self, request: &SessionRequest) -> Result<SessionResponse>;
    async fn refund(&self, request: &ProviderRefundRequest) -> Result<serde_json::Value>;
}

pub type OrderStoreRef = Arc<dyn OrderStore>;
pub type PaymentStoreRef = Arc<dyn PaymentStore>;
pub type ProductCatalogRef = Arc<dyn ProductCatalog>;
pub type UserDirectoryRef = Arc<dyn UserDirectory>;
pub type EventSinkRef = Arc<dyn EventSink>;
pub type ProviderApiRef = Arc<dyn ProviderApi>;
