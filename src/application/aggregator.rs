use crate::domain::events::OrderEvent;
use crate::domain::order::{
    AddressId, Adjustments, CurrencyId, LineItem, Order, OrderId, OrderItem, OrderStatus,
    OrderTotals, UserId,
};
use crate::domain::payment::PaymentStatus;
use crate::domain::ports::{EventSinkRef, OrderStoreRef, ProductCatalogRef, UserDirectoryRef};
use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

const MAX_ORDER_NUMBER_ATTEMPTS: usize = 5;
const ORDER_NUMBER_SUFFIX_LEN: usize = 6;

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct CreateOrderRequest {
    pub user_id: UserId,
    pub currency_id: CurrencyId,
    pub items: Vec<LineItem>,
    #[serde(default)]
    pub shipping_address_id: Option<AddressId>,
    #[serde(default)]
    pub billing_address_id: Option<AddressId>,
    #[serde(default, flatten)]
    pub adjustments: Adjustments,
}

#[derive(Debug, Serialize, PartialEq, Clone)]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
}

/// `ORD-{unix millis}-{random suffix}`.
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ORDER_NUMBER_SUFFIX_LEN)
        .map(|c| char::from(c).to_ascii_uppercase())
        .collect();
    format!("ORD-{}-{}", now.timestamp_millis(), suffix)
}

/// Validates line items and persists new orders.
pub struct OrderAggregator {
    orders: OrderStoreRef,
    catalog: ProductCatalogRef,
    users: UserDirectoryRef,
    events: EventSinkRef,
    number_generator: fn(DateTime<Utc>) -> String,
}

impl OrderAggregator {
    pub fn new(
        orders: OrderStoreRef,
        catalog: ProductCatalogRef,
        users: UserDirectoryRef,
        events: EventSinkRef,
    ) -> Self {
        Self {
            orders,
            catalog,
            users,
            events,
            number_generator: generate_order_number,
        }
    }

    /// Replaces the order-number generator, e.g. to force collisions.
    pub fn with_number_generator(mut self, generator: fn(DateTime<Utc>) -> String) -> Self {
        self.number_generator = generator;
        self
    }

    #[instrument(skip(self, request), fields(user_id = request.user_id, items = request.items.len()))]
    pub async fn create_order(&self, request: CreateOrderRequest) -> Result<Order> {
        self.validate_items(&request.items)?;

        if !self.users.exists(request.user_id).await? {
            return Err(EngineError::NotFound(format!("User {}", request.user_id)));
        }
        for line in &request.items {
            let product = self
                .catalog
                .product(line.product_id)
                .await?
                .ok_or_else(|| EngineError::NotFound(format!("Product {}", line.product_id)))?;
            if !product.is_active {
                return Err(EngineError::InvalidState(format!(
                    "Product {} is not active",
                    product.id
                )));
            }
        }

        let totals = OrderTotals::compute(&request.items, &request.adjustments)?;
        let order_id = self.orders.next_order_id().await?;
        let items: Vec<OrderItem> = request
            .items
            .iter()
            .zip(1u32..)
            .map(|(line, line_no)| OrderItem::from_line(order_id, line_no, line))
            .collect();

        // Uniqueness is decided by the store at insert time; a collision just rolls a new number.
        for attempt in 1..=MAX_ORDER_NUMBER_ATTEMPTS {
            let now = Utc::now();
            let order = self.build_order(order_id, &request, &totals, now);
            let order_number = order.order_number.clone();

            match self.orders.insert(order.clone(), items.clone()).await {
                Ok(()) => {
                    info!(order_id, %order_number, final_amount = %order.final_amount, "order created");
                    self.events
                        .publish(OrderEvent::OrderCreated {
                            order_id,
                            order_number,
                            user_id: order.user_id,
                            final_amount: order.final_amount,
                            items: items.iter().map(|i| (i.product_id, i.quantity)).collect(),
                        })
                        .await;
                    return Ok(order);
                }
                Err(EngineError::DuplicateOrderNumber(number)) => {
                    warn!(attempt, %number, "order number collision, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        Err(EngineError::Conflict(format!(
            "Could not allocate a unique order number after {MAX_ORDER_NUMBER_ATTEMPTS} attempts"
        )))
    }

    pub async fn get_order(&self, order_id: OrderId) -> Result<OrderDetails> {
        let order = self
            .orders
            .get(order_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Order {order_id}")))?;
        let items = self.orders.items(order_id).await?;
        Ok(OrderDetails { order, items })
    }

    pub async fn list_orders(&self, user_id: UserId) -> Result<Vec<Order>> {
        self.orders.list_by_user(user_id).await
    }

    fn validate_items(&self, items: &[LineItem]) -> Result<()> {
        if items.is_empty() {
            return Err(EngineError::InvalidArgument(
                "Order must contain at least one item".to_string(),
            ));
        }
        for line in items {
            if line.quantity == 0 {
                return Err(EngineError::InvalidArgument(format!(
                    "Quantity for product {} must be positive",
                    line.product_id
                )));
            }
            if line.unit_price < Decimal::ZERO {
                return Err(EngineError::InvalidArgument(format!(
                    "Unit price for product {} must not be negative",
                    line.product_id
                )));
            }
        }
        debug!(count = items.len(), "line items validated");
        Ok(())
    }

    fn build_order(
        &self,
        order_id: OrderId,
        request: &CreateOrderRequest,
        totals: &OrderTotals,
        now: DateTime<Utc>,
    ) -> Order {
        Order {
            id: order_id,
            order_number: (self.number_generator)(now),
            user_id: request.user_id,
            currency_id: request.currency_id,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            total_amount: totals.total_amount,
            discount_amount: totals.discount_amount,
            tax_amount: totals.tax_amount,
            shipping_amount: totals.shipping_amount,
            final_amount: totals.final_amount,
            shipping_address_id: request.shipping_address_id,
            billing_address_id: request.billing_address_id,
            notes: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{OrderStore, ProductSnapshot};
    use crate::infrastructure::events::RecordingEventSink;
    use crate::infrastructure::in_memory::{
        InMemoryCatalog, InMemoryOrderStore, InMemoryUserDirectory,
    };
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    struct Fixture {
        aggregator: OrderAggregator,
        orders: InMemoryOrderStore,
        events: RecordingEventSink,
    }

    async fn fixture() -> Fixture {
        let orders = InMemoryOrderStore::new();
        let catalog = InMemoryCatalog::new();
        let users = InMemoryUserDirectory::new();
        let events = RecordingEventSink::new();

        users.add(7).await;
        for (id, active) in [(1, true), (2, true), (3, false)] {
            catalog
                .upsert(ProductSnapshot {
                    id,
                    name: format!("product-{id}"),
                    price: dec!(1),
                    is_active: active,
                })
                .await;
        }

        let aggregator = OrderAggregator::new(
            Arc::new(orders.clone()),
            Arc::new(catalog),
            Arc::new(users),
            Arc::new(events.clone()),
        );
        Fixture {
            aggregator,
            orders,
            events,
        }
    }

    fn request(items: Vec<LineItem>) -> CreateOrderRequest {
        CreateOrderRequest {
            user_id: 7,
            currency_id: 1,
            items,
            shipping_address_id: None,
            billing_address_id: None,
            adjustments: Adjustments {
                discount: None,
                tax: Some(dec!(5000)),
                shipping: Some(dec!(10000)),
            },
        }
    }

    fn line(product_id: u64, quantity: u32, unit_price: Decimal) -> LineItem {
        LineItem {
            product_id,
            quantity,
            unit_price,
        }
    }

    #[tokio::test]
    async fn test_create_order_computes_totals() {
        let f = fixture().await;
        let order = f
            .aggregator
            .create_order(request(vec![
                line(1, 2, dec!(50000)),
                line(2, 1, dec!(30000)),
            ]))
            .await
            .unwrap();

        assert_eq!(order.total_amount, dec!(130000));
        assert_eq!(order.final_amount, dec!(145000));
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.payment_status, PaymentStatus::Pending);
        assert!(order.order_number.starts_with("ORD-"));

        let items = f.orders.items(order.id).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].total_price, dec!(100000));
        assert_eq!(f.events.events().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_user_and_product() {
        let f = fixture().await;
        let mut unknown_user = request(vec![line(1, 1, dec!(1))]);
        unknown_user.user_id = 99;
        assert!(matches!(
            f.aggregator.create_order(unknown_user).await,
            Err(EngineError::NotFound(_))
        ));

        assert!(matches!(
            f.aggregator
                .create_order(request(vec![line(1, 1, dec!(1)), line(42, 1, dec!(1))]))
                .await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_inactive_product_is_invalid_state() {
        let f = fixture().await;
        assert!(matches!(
            f.aggregator
                .create_order(request(vec![line(3, 1, dec!(1))]))
                .await,
            Err(EngineError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_items_are_rejected() {
        let f = fixture().await;
        assert!(matches!(
            f.aggregator.create_order(request(vec![])).await,
            Err(EngineError::InvalidArgument(_))
        ));
        assert!(matches!(
            f.aggregator
                .create_order(request(vec![line(1, 0, dec!(1))]))
                .await,
            Err(EngineError::InvalidArgument(_))
        ));
        assert!(matches!(
            f.aggregator
                .create_order(request(vec![line(1, 1, dec!(-1))]))
                .await,
            Err(EngineError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_order_number_collision_is_retried() {
        fn fixed(_: DateTime<Utc>) -> String {
            "ORD-FIXED".to_string()
        }

        let f = fixture().await;
        let aggregator = OrderAggregator::new(
            Arc::new(f.orders.clone()),
            f.aggregator.catalog.clone(),
            f.aggregator.users.clone(),
            Arc::new(f.events.clone()),
        )
        .with_number_generator(fixed);

        aggregator
            .create_order(request(vec![line(1, 1, dec!(1))]))
            .await
            .unwrap();
        let second = aggregator
            .create_order(request(vec![line(1, 1, dec!(1))]))
            .await;
        assert!(matches!(second, Err(EngineError::Conflict(_))));
    }

    #[test]
    fn test_order_number_format() {
        let number = generate_order_number(Utc::now());
        let parts: Vec<&str> = number.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "ORD");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), ORDER_NUMBER_SUFFIX_LEN);
    }
}
