//! Provider adapters behind [`GatewayAdapter`](crate::application::gateway::GatewayAdapter).

pub mod card;
pub mod click;
pub mod payme;
pub mod provider;
pub mod signature;
pub mod uzum;

use crate::application::ledger::PaymentLedger;
use crate::application::orchestrator::GatewaySet;
use crate::config::GatewayConfig;
use crate::domain::ports::ProviderApiRef;
use crate::error::Result;
use card::CardAdapter;
use click::ClickAdapter;
use payme::PaymeAdapter;
use provider::{HttpProviderApi, ProviderAuth};
use serde::{Deserialize, Deserializer};
use std::sync::Arc;
use uzum::UzumAdapter;

/// Outbound clients, one per provider.
pub struct ProviderClients {
    pub click: ProviderApiRef,
    pub payme: ProviderApiRef,
    pub uzum: ProviderApiRef,
    pub card: ProviderApiRef,
}

impl ProviderClients {
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        Ok(Self {
            click: Arc::new(HttpProviderApi::new(
                &config.click_api_url,
                ProviderAuth::Header(signature::basic_auth_header(
                    &config.click.merchant_id,
                    &config.click.secret_key,
                )),
            )?),
            payme: Arc::new(HttpProviderApi::new(
                &config.payme_api_url,
                ProviderAuth::Named {
                    header: "X-Auth".to_string(),
                    value: format!("{}:{}", config.payme.merchant_id, config.payme.key),
                },
            )?),
            uzum: Arc::new(HttpProviderApi::new(
                &config.uzum_api_url,
                ProviderAuth::Named {
                    header: "X-API-Key".to_string(),
                    value: config.uzum.secret_key.clone(),
                },
            )?),
            card: Arc::new(HttpProviderApi::new(
                &config.card_api_url,
                if config.card_api_key.is_empty() {
                    ProviderAuth::None
                } else {
                    ProviderAuth::Header(format!("Bearer {}", config.card_api_key))
                },
            )?),
        })
    }
}

/// Wires the four adapters onto a shared ledger.
pub fn gateway_set(
    ledger: &Arc<PaymentLedger>,
    config: &GatewayConfig,
    clients: ProviderClients,
) -> Result<GatewaySet> {
    Ok(GatewaySet::new(
        Arc::new(ClickAdapter::new(ledger.clone(), clients.click, config.click.clone())?),
        Arc::new(PaymeAdapter::new(ledger.clone(), clients.payme, config.payme.clone())),
        Arc::new(UzumAdapter::new(ledger.clone(), clients.uzum, config.uzum.clone())),
        Arc::new(CardAdapter::new(ledger.clone(), clients.card)),
    ))
}

/// Reads a string field that providers send either quoted or as a bare number.
pub(crate) fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
        Float(f64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Int(n) => n.to_string(),
        Raw::Float(n) => n.to_string(),
    })
}

pub(crate) fn lenient_string_opt<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapped(#[serde(deserialize_with = "lenient_string")] String);

    Ok(Option::<Wrapped>::deserialize(deserializer)?.map(|Wrapped(value)| value))
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::application::ledger::PaymentLedger;
    use crate::application::locks::OrderLocks;
    use crate::domain::order::{Order, OrderStatus};
    use crate::domain::payment::PaymentStatus;
    use crate::domain::ports::{
        OrderStore, ProviderApi, ProviderRefundRequest, SessionRequest, SessionResponse,
    };
    use crate::error::{EngineError, Result};
    use crate::infrastructure::events::RecordingEventSink;
    use crate::infrastructure::in_memory::{InMemoryOrderStore, InMemoryPaymentStore};
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;
    use rust_decimal::Decimal;
    use serde_json::json;
    use std::sync::Arc;

    #[derive(Default)]
    pub struct FakeProvider {
        pub session: SessionResponse,
        pub fail_sessions: bool,
        pub fail_refunds: bool,
        pub sessions: Mutex<Vec<SessionRequest>>,
        pub refunds: Mutex<Vec<ProviderRefundRequest>>,
    }

    impl FakeProvider {
        pub fn with_session(session: SessionResponse) -> Self {
            Self {
                session,
                ..Self::default()
            }
        }

        pub fn failing() -> Self {
            Self {
                fail_sessions: true,
                fail_refunds: true,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl ProviderApi for FakeProvider {
        async fn register_session(&self, request: &SessionRequest) -> Result<SessionResponse> {
            self.sessions.lock().push(request.clone());
            if self.fail_sessions {
                return Err(EngineError::Upstream("provider down".to_string()));
            }
            Ok(self.session.clone())
        }

        async fn refund(&self, request: &ProviderRefundRequest) -> Result<serde_json::Value> {
            self.refunds.lock().push(request.clone());
            if self.fail_refunds {
                return Err(EngineError::Upstream("provider down".to_string()));
            }
            Ok(json!({ "refund_id": format!("r-{}", request.payment_id) }))
        }
    }

    /// A ledger over in-memory stores holding pending order `1`.
    pub async fn ledger_with_order(final_amount: Decimal) -> Arc<PaymentLedger> {
        let orders = InMemoryOrderStore::new();
        let now = Utc::now();
        orders
            .insert(
                Order {
                    id: 1,
                    order_number: "ORD-1".to_string(),
                    user_id: 1,
                    currency_id: 1,
                    status: OrderStatus::Pending,
                    payment_status: PaymentStatus::Pending,
                    total_amount: final_amount,
                    discount_amount: Decimal::ZERO,
                    tax_amount: Decimal::ZERO,
                    shipping_amount: Decimal::ZERO,
                    final_amount,
                    shipping_address_id: None,
                    billing_address_id: None,
                    notes: vec![],
                    created_at: now,
                    updated_at: now,
                },
                vec![],
            )
            .await
            .unwrap();

        Arc::new(PaymentLedger::new(
            Arc::new(orders),
            Arc::new(InMemoryPaymentStore::new()),
            OrderLocks::new(),
            Arc::new(RecordingEventSink::new()),
        ))
    }
}
