#![allow(dead_code)]

use async_trait::async_trait;
use marketpay::application::aggregator::CreateOrderRequest;
use marketpay::application::engine::{Engine, EnginePorts};
use marketpay::config::GatewayConfig;
use marketpay::domain::order::{Adjustments, LineItem, UserId};
use marketpay::domain::payment::PaymentId;
use marketpay::domain::ports::{
    OrderStoreRef, PaymentStoreRef, ProductSnapshot, ProviderApi, ProviderRefundRequest,
    SessionRequest, SessionResponse,
};
use marketpay::error::{EngineError, Result};
use marketpay::infrastructure::events::RecordingEventSink;
use marketpay::infrastructure::gateways::signature::{basic_auth_header, hmac_sha256_hex, md5_hex};
use marketpay::infrastructure::gateways::{ProviderClients, gateway_set};
use marketpay::infrastructure::in_memory::{
    InMemoryCatalog, InMemoryOrderStore, InMemoryPaymentStore, InMemoryUserDirectory,
};
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;

pub const CLICK_SERVICE_ID: &str = "77";
pub const CLICK_SECRET: &str = "click-secret";
pub const PAYME_KEY: &str = "payme-key";
pub const UZUM_SECRET: &str = "uzum-secret";

pub fn test_config() -> GatewayConfig {
    let vars: HashMap<&str, &str> = HashMap::from([
        ("CLICK_SERVICE_ID", CLICK_SERVICE_ID),
        ("CLICK_MERCHANT_ID", "55"),
        ("CLICK_SECRET_KEY", CLICK_SECRET),
        ("PAYME_MERCHANT_ID", "merchant-1"),
        ("PAYME_KEY", PAYME_KEY),
        ("UZUM_SECRET_KEY", UZUM_SECRET),
        ("PUBLIC_BASE_URL", "https://shop.test"),
    ]);
    GatewayConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string())).unwrap()
}

/// Provider double: answers sessions with a fixed response and records every call.
#[derive(Default)]
pub struct FakeProvider {
    pub session: SessionResponse,
    pub fail_refunds: bool,
    pub sessions: Mutex<Vec<SessionRequest>>,
    pub refunds: Mutex<Vec<ProviderRefundRequest>>,
}

impl FakeProvider {
    pub fn capturing() -> Self {
        Self {
            session: SessionResponse {
                external_id: Some("card-tx-1".to_string()),
                redirect_url: None,
                captured: true,
                raw: json!({ "status": "captured" }),
            },
            ..Self::default()
        }
    }

    pub fn redirecting(url: &str) -> Self {
        Self {
            session: SessionResponse {
                external_id: Some("uz-session-1".to_string()),
                redirect_url: Some(url.to_string()),
                captured: false,
                raw: json!({}),
            },
            ..Self::default()
        }
    }
}

#[async_trait]
impl ProviderApi for FakeProvider {
    async fn register_session(&self, request: &SessionRequest) -> Result<SessionResponse> {
        self.sessions.lock().push(request.clone());
        Ok(self.session.clone())
    }

    async fn refund(&self, request: &ProviderRefundRequest) -> Result<Value> {
        self.refunds.lock().push(request.clone());
        if self.fail_refunds {
            return Err(EngineError::Upstream("provider down".to_string()));
        }
        Ok(json!({ "refund_id": format!("r-{}", request.payment_id) }))
    }
}

pub struct TestApp {
    pub engine: Engine,
    pub events: RecordingEventSink,
    pub provider: Arc<FakeProvider>,
}

/// Engine over in-memory stores with products 1 and 2 active, 3 inactive, users 1 and 2.
pub async fn test_app(provider: FakeProvider) -> TestApp {
    test_app_with_stores(
        provider,
        Arc::new(InMemoryOrderStore::new()),
        Arc::new(InMemoryPaymentStore::new()),
    )
    .await
}

pub async fn test_app_with_stores(
    provider: FakeProvider,
    orders: OrderStoreRef,
    payments: PaymentStoreRef,
) -> TestApp {
    let catalog = InMemoryCatalog::new();
    for (id, name, price, is_active) in [
        (1, "Phone", dec!(50000), true),
        (2, "Case", dec!(30000), true),
        (3, "Retired", dec!(1000), false),
    ] {
        catalog
            .upsert(ProductSnapshot {
                id,
                name: name.to_string(),
                price,
                is_active,
            })
            .await;
    }
    let users = InMemoryUserDirectory::new();
    users.add(1).await;
    users.add(2).await;

    let events = RecordingEventSink::new();
    let provider = Arc::new(provider);
    let config = test_config();
    let clients = ProviderClients {
        click: provider.clone(),
        payme: provider.clone(),
        uzum: provider.clone(),
        card: provider.clone(),
    };
    let engine = Engine::new(
        EnginePorts {
            orders,
            payments,
            catalog: Arc::new(catalog),
            users: Arc::new(users),
            events: Arc::new(events.clone()),
        },
        |ledger| gateway_set(ledger, &config, clients),
        config.default_return_url(),
    )
    .unwrap();

    TestApp {
        engine,
        events,
        provider,
    }
}

/// Two phones and a case, with tax 5000 and shipping 10000: total 130000, final 145000.
pub fn reference_order(user_id: UserId) -> CreateOrderRequest {
    CreateOrderRequest {
        user_id,
        currency_id: 1,
        items: vec![
            LineItem {
                product_id: 1,
                quantity: 2,
                unit_price: dec!(50000),
            },
            LineItem {
                product_id: 2,
                quantity: 1,
                unit_price: dec!(30000),
            },
        ],
        shipping_address_id: None,
        billing_address_id: None,
        adjustments: Adjustments {
            discount: None,
            tax: Some(dec!(5000)),
            shipping: Some(dec!(10000)),
        },
    }
}

/// A signed Click SHOP-API form body. `action` 0 prepares, 1 completes.
pub fn click_form(
    click_trans_id: &str,
    payment_id: PaymentId,
    amount_minor: i64,
    action: u8,
    error: i32,
) -> Vec<u8> {
    let prepare_id = if action == 1 {
        payment_id.to_string()
    } else {
        String::new()
    };
    let sign_time = "2024-05-01 10:00:00";
    let sign = md5_hex(&format!(
        "{click_trans_id}{CLICK_SERVICE_ID}{CLICK_SECRET}{payment_id}{prepare_id}{amount_minor}{action}{sign_time}"
    ));
    let mut pairs = vec![
        ("click_trans_id", click_trans_id.to_string()),
        ("service_id", CLICK_SERVICE_ID.to_string()),
        ("click_paydoc_id", "9001".to_string()),
        ("merchant_trans_id", payment_id.to_string()),
        ("amount", amount_minor.to_string()),
        ("action", action.to_string()),
        ("error", error.to_string()),
        ("error_note", "Success".to_string()),
        ("sign_time", sign_time.to_string()),
        ("sign_string", sign),
    ];
    if action == 1 {
        pairs.push(("merchant_prepare_id", prepare_id));
    }
    serde_urlencoded::to_string(pairs).unwrap().into_bytes()
}

pub fn payme_auth() -> String {
    basic_auth_header("Paycom", PAYME_KEY)
}

pub fn payme_rpc(method: &str, params: Value) -> Value {
    json!({ "id": 1, "method": method, "params": params })
}

/// A signed Uzum notification.
pub fn uzum_notification(
    payment_id: PaymentId,
    transaction_id: &str,
    amount_minor: i64,
    error_code: i32,
    error_message: Option<&str>,
) -> Value {
    let timestamp = 1_714_557_600i64;
    let signature = hmac_sha256_hex(
        UZUM_SECRET,
        &format!("{payment_id}{transaction_id}{amount_minor}{error_code}{timestamp}"),
    );
    json!({
        "payment_id": payment_id,
        "transaction_id": transaction_id,
        "amount": amount_minor,
        "error_code": error_code,
        "error_message": error_message,
        "timestamp": timestamp,
        "signature": signature,
    })
}
