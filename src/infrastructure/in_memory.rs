use crate::domain::order::{Order, OrderId, OrderItem, ProductId, UserId};
use crate::domain::payment::{OrderPayment, PaymentId, PaymentMethod};
use crate::domain::ports::{
    OrderStore, PaymentStore, ProductCatalog, ProductSnapshot, UserDirectory,
};
use crate::domain::tracking::OrderTracking;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
struct OrderTables {
    orders: HashMap<OrderId, Order>,
    numbers: HashMap<String, OrderId>,
    items: HashMap<OrderId, Vec<OrderItem>>,
    tracking: HashMap<OrderId, Vec<OrderTracking>>,
}

/// A thread-safe in-memory store for orders, their items and tracking history.
///
/// All tables sit behind one `RwLock`, so a multi-table write is invisible to readers
/// until it has fully succeeded or been rolled back.
#[derive(Default, Clone)]
pub struct InMemoryOrderStore {
    tables: Arc<RwLock<OrderTables>>,
    sequence: Arc<AtomicU64>,
}

impl InMemoryOrderStore {
    /// Creates a new, empty in-memory order store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn next_order_id(&self) -> Result<OrderId> {
        Ok(self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn insert(&self, order: Order, items: Vec<OrderItem>) -> Result<()> {
        let mut tables = self.tables.write().await;

        if tables.numbers.contains_key(&order.order_number) {
            return Err(EngineError::DuplicateOrderNumber(order.order_number));
        }
        if tables.orders.contains_key(&order.id) {
            return Err(EngineError::Conflict(format!(
                "Order {} already exists",
                order.id
            )));
        }

        let order_id = order.id;
        let order_number = order.order_number.clone();
        tables.orders.insert(order_id, order);
        tables.numbers.insert(order_number.clone(), order_id);

        // Items are checked after the order row is staged; any failure unwinds the
        // order row before the write lock is released.
        if let Some(stray) = items.iter().find(|item| item.order_id != order_id) {
            let stray_order = stray.order_id;
            tables.orders.remove(&order_id);
            tables.numbers.remove(&order_number);
            return Err(EngineError::InvalidArgument(format!(
                "Item references order {stray_order}, expected {order_id}"
            )));
        }
        tables.items.insert(order_id, items);
        Ok(())
    }

    async fn get(&self, order_id: OrderId) -> Result<Option<Order>> {
        let tables = self.tables.read().await;
        Ok(tables.orders.get(&order_id).cloned())
    }

    async fn items(&self, order_id: OrderId) -> Result<Vec<OrderItem>> {
        let tables = self.tables.read().await;
        Ok(tables.items.get(&order_id).cloned().unwrap_or_default())
    }

    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let tables = self.tables.read().await;
        let mut orders: Vec<Order> = tables
            .orders
            .values()
            .filter(|order| order.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(orders)
    }

    async fn update(&self, order: Order) -> Result<()> {
        let mut tables = self.tables.write().await;
        match tables.orders.get_mut(&order.id) {
            Some(existing) => {
                *existing = order;
                Ok(())
            }
            None => Err(EngineError::NotFound(format!("Order {}", order.id))),
        }
    }

    async fn update_with_tracking(&self, order: Order, tracking: OrderTracking) -> Result<()> {
        let mut tables = self.tables.write().await;
        let order_id = order.id;
        match tables.orders.get_mut(&order_id) {
            Some(existing) => *existing = order,
            None => return Err(EngineError::NotFound(format!("Order {order_id}"))),
        }
        tables.tracking.entry(order_id).or_default().push(tracking);
        Ok(())
    }

    async fn append_tracking(&self, tracking: OrderTracking) -> Result<()> {
        let mut tables = self.tables.write().await;
        if !tables.orders.contains_key(&tracking.order_id) {
            return Err(EngineError::NotFound(format!("Order {}", tracking.order_id)));
        }
        tables
            .tracking
            .entry(tracking.order_id)
            .or_default()
            .push(tracking);
        Ok(())
    }

    async fn tracking(&self, order_id: OrderId) -> Result<Vec<OrderTracking>> {
        let tables = self.tables.read().await;
        Ok(tables.tracking.get(&order_id).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
struct PaymentTables {
    payments: HashMap<PaymentId, OrderPayment>,
    external: HashMap<(PaymentMethod, String), PaymentId>,
}

impl PaymentTables {
    fn claim_external(&mut self, payment: &OrderPayment) -> Result<()> {
        let Some(external_id) = payment.external_transaction_id.clone() else {
            return Ok(());
        };
        let key = (payment.payment_method, external_id);
        match self.external.get(&key) {
            Some(owner) if *owner != payment.id => Err(EngineError::Conflict(format!(
                "{} transaction {} already belongs to payment {owner}",
                key.0, key.1
            ))),
            Some(_) => Ok(()),
            None => {
                self.external.insert(key, payment.id);
                Ok(())
            }
        }
    }
}

/// A thread-safe in-memory ledger store with a unique `(method, external id)` index.
#[derive(Default, Clone)]
pub struct InMemoryPaymentStore {
    tables: Arc<RwLock<PaymentTables>>,
    sequence: Arc<AtomicU64>,
}

impl InMemoryPaymentStore {
    /// Creates a new, empty in-memory payment store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn next_payment_id(&self) -> Result<PaymentId> {
        Ok(self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn insert(&self, payment: OrderPayment) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.payments.contains_key(&payment.id) {
            return Err(EngineError::Conflict(format!(
                "Payment {} already exists",
                payment.id
            )));
        }
        tables.claim_external(&payment)?;
        tables.payments.insert(payment.id, payment);
        Ok(())
    }

    async fn store(&self, payment: OrderPayment) -> Result<()> {
        let mut tables = self.tables.write().await;
        if !tables.payments.contains_key(&payment.id) {
            return Err(EngineError::NotFound(format!("Payment {}", payment.id)));
        }
        tables.claim_external(&payment)?;
        tables.payments.insert(payment.id, payment);
        Ok(())
    }

    async fn get(&self, payment_id: PaymentId) -> Result<Option<OrderPayment>> {
        let tables = self.tables.read().await;
        Ok(tables.payments.get(&payment_id).cloned())
    }

    async fn for_order(&self, order_id: OrderId) -> Result<Vec<OrderPayment>> {
        let tables = self.tables.read().await;
        let mut payments: Vec<OrderPayment> = tables
            .payments
            .values()
            .filter(|payment| payment.order_id == order_id)
            .cloned()
            .collect();
        payments.sort_by_key(|payment| payment.id);
        Ok(payments)
    }

    async fn find_by_external(
        &self,
        method: PaymentMethod,
        external_id: &str,
    ) -> Result<Option<OrderPayment>> {
        let tables = self.tables.read().await;
        Ok(tables
            .external
            .get(&(method, external_id.to_string()))
            .and_then(|id| tables.payments.get(id))
            .cloned())
    }

    async fn all(&self) -> Result<Vec<OrderPayment>> {
        let tables = self.tables.read().await;
        let mut payments: Vec<OrderPayment> = tables.payments.values().cloned().collect();
        payments.sort_by_key(|payment| payment.id);
        Ok(payments)
    }
}

/// Catalog snapshot held in memory, typically seeded from a CSV export.
#[derive(Default, Clone)]
pub struct InMemoryCatalog {
    products: Arc<RwLock<HashMap<ProductId, ProductSnapshot>>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, product: ProductSnapshot) {
        self.products.write().await.insert(product.id, product);
    }
}

#[async_trait]
impl ProductCatalog for InMemoryCatalog {
    async fn product(&self, product_id: ProductId) -> Result<Option<ProductSnapshot>> {
        Ok(self.products.read().await.get(&product_id).cloned())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryUserDirectory {
    users: Arc<RwLock<HashSet<UserId>>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, user_id: UserId) {
        self.users.write().await.insert(user_id);
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn exists(&self, user_id: UserId) -> Result<bool> {
        Ok(self.users.read().await.contains(&user_id))
    }
}
