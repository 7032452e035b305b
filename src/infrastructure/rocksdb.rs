use crate::domain::order::{Order, OrderId, OrderItem, UserId};
use crate::domain::payment::{OrderPayment, PaymentId, PaymentMethod};
use crate::domain::ports::{OrderStore, PaymentStore};
use crate::domain::tracking::OrderTracking;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;

pub const CF_ORDERS: &str = "orders";
/// Order number -> order id; enforces number uniqueness.
pub const CF_ORDER_NUMBERS: &str = "order_numbers";
/// Keyed by `order_id ++ line_no`.
pub const CF_ORDER_ITEMS: &str = "order_items";
/// Keyed by `order_id ++ sequence`, so a prefix scan yields the history oldest first.
pub const CF_ORDER_TRACKING: &str = "order_tracking";
pub const CF_PAYMENTS: &str = "payments";
/// `METHOD:external_id` -> payment id; the ledger's idempotency index.
pub const CF_PAYMENT_EXTERNAL_IDS: &str = "payment_external_ids";
/// Sequence counters.
pub const CF_META: &str = "meta";

const ALL_CFS: [&str; 7] = [
    CF_ORDERS,
    CF_ORDER_NUMBERS,
    CF_ORDER_ITEMS,
    CF_ORDER_TRACKING,
    CF_PAYMENTS,
    CF_PAYMENT_EXTERNAL_IDS,
    CF_META,
];

const SEQ_ORDERS: &[u8] = b"seq:orders";
const SEQ_PAYMENTS: &[u8] = b"seq:payments";
const SEQ_TRACKING: &[u8] = b"seq:tracking";

/// A persistent store for orders and ledger attempts backed by RocksDB.
///
/// Multi-row writes go through a single `WriteBatch`. Check-then-write sequences
/// (uniqueness checks, counters) are serialized by `write_lock`.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at `path`, creating missing column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            EngineError::InternalError(Box::new(std::io::Error::other(format!(
                "{name} column family not found"
            ))))
        })
    }

    fn read<T: DeserializeOwned>(&self, cf: &str, key: impl AsRef<[u8]>) -> Result<Option<T>> {
        match self.db.get_cf(self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn exists(&self, cf: &str, key: impl AsRef<[u8]>) -> Result<bool> {
        Ok(self.db.get_pinned_cf(self.cf(cf)?, key)?.is_some())
    }

    /// Values of every key starting with `prefix` (all keys when empty), in key order.
    fn scan<T: DeserializeOwned>(&self, cf: &str, prefix: &[u8]) -> Result<Vec<T>> {
        let mode = if prefix.is_empty() {
            IteratorMode::Start
        } else {
            IteratorMode::From(prefix, Direction::Forward)
        };
        let mut values = Vec::new();
        for item in self.db.iterator_cf(self.cf(cf)?, mode) {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            values.push(serde_json::from_slice(&value)?);
        }
        Ok(values)
    }

    fn next_sequence(&self, key: &[u8]) -> Result<u64> {
        let _guard = self.write_lock.lock();
        let cf = self.cf(CF_META)?;
        let current = match self.db.get_cf(cf, key)? {
            Some(bytes) => u64::from_be_bytes(
                bytes
                    .as_slice()
                    .try_into()
                    .map_err(|e| EngineError::InternalError(Box::new(e)))?,
            ),
            None => 0,
        };
        let next = current + 1;
        self.db.put_cf(cf, key, next.to_be_bytes())?;
        Ok(next)
    }

    fn put_json<T: Serialize>(
        &self,
        batch: &mut WriteBatch,
        cf: &str,
        key: impl AsRef<[u8]>,
        value: &T,
    ) -> Result<()> {
        batch.put_cf(self.cf(cf)?, key, serde_json::to_vec(value)?);
        Ok(())
    }

    fn stage_tracking(&self, batch: &mut WriteBatch, tracking: &OrderTracking) -> Result<()> {
        let seq = self.next_sequence(SEQ_TRACKING)?;
        self.put_json(
            batch,
            CF_ORDER_TRACKING,
            composite_key(tracking.order_id, seq),
            tracking,
        )
    }

    /// Rejects an external id already owned by another payment and stages the index row.
    fn stage_external(&self, batch: &mut WriteBatch, payment: &OrderPayment) -> Result<()> {
        let Some(external_id) = payment.external_transaction_id.as_deref() else {
            return Ok(());
        };
        let key = external_key(payment.payment_method, external_id);
        if let Some(owner) = self.read::<PaymentId>(CF_PAYMENT_EXTERNAL_IDS, &key)?
            && owner != payment.id
        {
            return Err(EngineError::Conflict(format!(
                "{} transaction {external_id} already belongs to payment {owner}",
                payment.payment_method
            )));
        }
        self.put_json(batch, CF_PAYMENT_EXTERNAL_IDS, key, &payment.id)
    }
}

fn composite_key(order_id: OrderId, suffix: u64) -> Vec<u8> {
    let mut key = order_id.to_be_bytes().to_vec();
    key.extend_from_slice(&suffix.to_be_bytes());
    key
}

fn external_key(method: PaymentMethod, external_id: &str) -> Vec<u8> {
    format!("{method}:{external_id}").into_bytes()
}

#[async_trait]
impl OrderStore for RocksDBStore {
    async fn next_order_id(&self) -> Result<OrderId> {
        self.next_sequence(SEQ_ORDERS)
    }

    async fn insert(&self, order: Order, items: Vec<OrderItem>) -> Result<()> {
        if let Some(stray) = items.iter().find(|item| item.order_id != order.id) {
            return Err(EngineError::InvalidArgument(format!(
                "Item references order {}, expected {}",
                stray.order_id, order.id
            )));
        }

        let _guard = self.write_lock.lock();
        if self.exists(CF_ORDER_NUMBERS, order.order_number.as_bytes())? {
            return Err(EngineError::DuplicateOrderNumber(order.order_number));
        }
        if self.exists(CF_ORDERS, order.id.to_be_bytes())? {
            return Err(EngineError::Conflict(format!(
                "Order {} already exists",
                order.id
            )));
        }

        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_ORDERS, order.id.to_be_bytes(), &order)?;
        self.put_json(
            &mut batch,
            CF_ORDER_NUMBERS,
            order.order_number.as_bytes(),
            &order.id,
        )?;
        for item in &items {
            self.put_json(
                &mut batch,
                CF_ORDER_ITEMS,
                composite_key(order.id, u64::from(item.line_no)),
                item,
            )?;
        }
        self.db.write(batch)?;
        Ok(())
    }

    async fn get(&self, order_id: OrderId) -> Result<Option<Order>> {
        self.read(CF_ORDERS, order_id.to_be_bytes())
    }

    async fn items(&self, order_id: OrderId) -> Result<Vec<OrderItem>> {
        self.scan(CF_ORDER_ITEMS, &order_id.to_be_bytes())
    }

    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .scan::<Order>(CF_ORDERS, &[])?
            .into_iter()
            .filter(|order| order.user_id == user_id)
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(orders)
    }

    async fn update(&self, order: Order) -> Result<()> {
        if !self.exists(CF_ORDERS, order.id.to_be_bytes())? {
            return Err(EngineError::NotFound(format!("Order {}", order.id)));
        }
        self.db.put_cf(
            self.cf(CF_ORDERS)?,
            order.id.to_be_bytes(),
            serde_json::to_vec(&order)?,
        )?;
        Ok(())
    }

    async fn update_with_tracking(&self, order: Order, tracking: OrderTracking) -> Result<()> {
        if !self.exists(CF_ORDERS, order.id.to_be_bytes())? {
            return Err(EngineError::NotFound(format!("Order {}", order.id)));
        }
        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_ORDERS, order.id.to_be_bytes(), &order)?;
        self.stage_tracking(&mut batch, &tracking)?;
        self.db.write(batch)?;
        Ok(())
    }

    async fn append_tracking(&self, tracking: OrderTracking) -> Result<()> {
        if !self.exists(CF_ORDERS, tracking.order_id.to_be_bytes())? {
            return Err(EngineError::NotFound(format!("Order {}", tracking.order_id)));
        }
        let mut batch = WriteBatch::default();
        self.stage_tracking(&mut batch, &tracking)?;
        self.db.write(batch)?;
        Ok(())
    }

    async fn tracking(&self, order_id: OrderId) -> Result<Vec<OrderTracking>> {
        self.scan(CF_ORDER_TRACKING, &order_id.to_be_bytes())
    }
}

#[async_trait]
impl PaymentStore for RocksDBStore {
    async fn next_payment_id(&self) -> Result<PaymentId> {
        self.next_sequence(SEQ_PAYMENTS)
    }

    async fn insert(&self, payment: OrderPayment) -> Result<()> {
        let _guard = self.write_lock.lock();
        if self.exists(CF_PAYMENTS, payment.id.to_be_bytes())? {
            return Err(EngineError::Conflict(format!(
                "Payment {} already exists",
                payment.id
            )));
        }
        let mut batch = WriteBatch::default();
        self.stage_external(&mut batch, &payment)?;
        self.put_json(&mut batch, CF_PAYMENTS, payment.id.to_be_bytes(), &payment)?;
        self.db.write(batch)?;
        Ok(())
    }

    async fn store(&self, payment: OrderPayment) -> Result<()> {
        let _guard = self.write_lock.lock();
        if !self.exists(CF_PAYMENTS, payment.id.to_be_bytes())? {
            return Err(EngineError::NotFound(format!("Payment {}", payment.id)));
        }
        let mut batch = WriteBatch::default();
        self.stage_external(&mut batch, &payment)?;
        self.put_json(&mut batch, CF_PAYMENTS, payment.id.to_be_bytes(), &payment)?;
        self.db.write(batch)?;
        Ok(())
    }

    async fn get(&self, payment_id: PaymentId) -> Result<Option<OrderPayment>> {
        self.read(CF_PAYMENTS, payment_id.to_be_bytes())
    }

    async fn for_order(&self, order_id: OrderId) -> Result<Vec<OrderPayment>> {
        Ok(self
            .scan::<OrderPayment>(CF_PAYMENTS, &[])?
            .into_iter()
            .filter(|payment| payment.order_id == order_id)
            .collect())
    }

    async fn find_by_external(
        &self,
        method: PaymentMethod,
        external_id: &str,
    ) -> Result<Option<OrderPayment>> {
        match self.read::<PaymentId>(CF_PAYMENT_EXTERNAL_IDS, external_key(method, external_id))? {
            Some(payment_id) => self.read(CF_PAYMENTS, payment_id.to_be_bytes()),
            None => Ok(None),
        }
    }

    async fn all(&self) -> Result<Vec<OrderPayment>> {
        self.scan(CF_PAYMENTS, &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Amount;
    use crate::domain::order::OrderStatus;
    use crate::domain::payment::PaymentStatus;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn order(id: OrderId, number: &str) -> Order {
        let now = Utc::now();
        Order {
            id,
            order_number: number.to_string(),
            user_id: 7,
            currency_id: 1,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            total_amount: dec!(100),
            discount_amount: dec!(0),
            tax_amount: dec!(0),
            shipping_amount: dec!(0),
            final_amount: dec!(100),
            shipping_address_id: None,
            billing_address_id: None,
            notes: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    fn item(order_id: OrderId, line_no: u32) -> OrderItem {
        OrderItem {
            order_id,
            line_no,
            product_id: u64::from(line_no),
            quantity: 1,
            unit_price: dec!(50),
            total_price: dec!(50),
        }
    }

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).expect("Failed to open RocksDB");
        for name in ALL_CFS {
            assert!(store.db.cf_handle(name).is_some());
        }
    }

    #[tokio::test]
    async fn test_rocksdb_order_roundtrip_and_uniqueness() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();

        OrderStore::insert(&store, order(1, "ORD-A"), vec![item(1, 1), item(1, 2)])
            .await
            .unwrap();
        assert_eq!(OrderStore::get(&store, 1).await.unwrap().unwrap().order_number, "ORD-A");
        assert_eq!(store.items(1).await.unwrap().len(), 2);

        let duplicate = OrderStore::insert(&store, order(2, "ORD-A"), vec![]).await;
        assert!(matches!(duplicate, Err(EngineError::DuplicateOrderNumber(_))));
        assert!(OrderStore::get(&store, 2).await.unwrap().is_none());

        let stray = OrderStore::insert(&store, order(3, "ORD-C"), vec![item(9, 1)]).await;
        assert!(matches!(stray, Err(EngineError::InvalidArgument(_))));
        assert!(OrderStore::get(&store, 3).await.unwrap().is_none());
        assert!(store.items(3).await.unwrap().is_empty());
        assert_eq!(store.list_by_user(7).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rocksdb_tracking_is_ordered_per_order() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();
        OrderStore::insert(&store, order(1, "ORD-A"), vec![]).await.unwrap();
        OrderStore::insert(&store, order(2, "ORD-B"), vec![]).await.unwrap();

        let mut confirmed = order(1, "ORD-A");
        confirmed.status = OrderStatus::Confirmed;
        store
            .update_with_tracking(
                confirmed,
                OrderTracking::new(1, OrderStatus::Confirmed, Utc::now()),
            )
            .await
            .unwrap();
        store
            .append_tracking(OrderTracking::new(2, OrderStatus::Pending, Utc::now()))
            .await
            .unwrap();
        store
            .append_tracking(OrderTracking::new(1, OrderStatus::Confirmed, Utc::now()).with_location(Some("Hub".to_string())))
            .await
            .unwrap();

        let history = store.tracking(1).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].location.as_deref(), Some("Hub"));
        assert_eq!(
            OrderStore::get(&store, 1).await.unwrap().unwrap().status,
            OrderStatus::Confirmed
        );
        assert!(matches!(
            store.append_tracking(OrderTracking::new(5, OrderStatus::Pending, Utc::now())).await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rocksdb_external_id_index() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();

        let first_id = store.next_payment_id().await.unwrap();
        let second_id = store.next_payment_id().await.unwrap();
        assert_eq!((first_id, second_id), (1, 2));

        let amount = Amount::new(dec!(100)).unwrap();
        let mut first = OrderPayment::new(first_id, 1, PaymentMethod::Click, amount, Utc::now());
        let mut second = OrderPayment::new(second_id, 1, PaymentMethod::Click, amount, Utc::now());
        PaymentStore::insert(&store, first.clone()).await.unwrap();
        PaymentStore::insert(&store, second.clone()).await.unwrap();

        first.external_transaction_id = Some("c-1".to_string());
        PaymentStore::store(&store, first.clone()).await.unwrap();
        second.external_transaction_id = Some("c-1".to_string());
        assert!(matches!(
            PaymentStore::store(&store, second).await,
            Err(EngineError::Conflict(_))
        ));

        let found = store
            .find_by_external(PaymentMethod::Click, "c-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, first_id);
        assert!(store
            .find_by_external(PaymentMethod::Payme, "c-1")
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.for_order(1).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rocksdb_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = RocksDBStore::open(dir.path()).unwrap();
            assert_eq!(store.next_order_id().await.unwrap(), 1);
            OrderStore::insert(&store, order(1, "ORD-A"), vec![item(1, 1)])
                .await
                .unwrap();
        }

        let store = RocksDBStore::open(dir.path()).unwrap();
        assert_eq!(store.next_order_id().await.unwrap(), 2);
        assert!(OrderStore::get(&store, 1).await.unwrap().is_some());
        assert_eq!(store.items(1).await.unwrap().len(), 1);
    }
}
