//! Direct card charges. The provider answers the charge call with the capture result.

use crate::application::gateway::{
    CallbackOutcome, CallbackPayload, GatewayAdapter, PaymentRequest, PaymentSession,
    fail_session, open_session_attempt, refund_through_provider,
};
use crate::application::ledger::PaymentLedger;
use crate::domain::money;
use crate::domain::payment::{PaymentId, PaymentMethod, PaymentStatus, RefundResult};
use crate::domain::ports::{ProviderApiRef, SessionRequest};
use crate::error::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

const MINOR_PER_MAJOR: u32 = 100;

pub fn to_minor_units(amount: Decimal) -> Result<i64> {
    money::to_minor(amount, MINOR_PER_MAJOR)
}

pub fn from_minor_units(minor: i64) -> Decimal {
    money::from_minor(minor, MINOR_PER_MAJOR)
}

pub struct CardAdapter {
    ledger: Arc<PaymentLedger>,
    provider: ProviderApiRef,
}

impl CardAdapter {
    pub fn new(ledger: Arc<PaymentLedger>, provider: ProviderApiRef) -> Self {
        Self { ledger, provider }
    }
}

#[async_trait]
impl GatewayAdapter for CardAdapter {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Card
    }

    /// Charges synchronously. A redirect answer (3-D Secure) leaves the attempt pending;
    /// a plain decline records FAILED without raising an error.
    #[instrument(skip(self, request), fields(order_id = request.order_id))]
    async fn create_payment(&self, request: PaymentRequest) -> Result<PaymentSession> {
        let amount_minor = to_minor_units(request.amount)?;
        let payment = open_session_attempt(&self.ledger, PaymentMethod::Card, &request).await?;

        let charge = SessionRequest {
            method: PaymentMethod::Card,
            payment_id: payment.id,
            order_id: payment.order_id,
            amount_minor,
            return_url: request.return_url.clone(),
            cancel_url: request.cancel_url.clone(),
            description: request.description.clone(),
        };
        let response = match self.provider.register_session(&charge).await {
            Ok(response) => response,
            Err(e) => return Err(fail_session(&self.ledger, &payment, e).await),
        };

        let (status, payment_url) = if response.captured {
            (PaymentStatus::Paid, None)
        } else if response.redirect_url.is_some() {
            (PaymentStatus::Pending, response.redirect_url.clone())
        } else {
            (PaymentStatus::Failed, None)
        };

        if status == PaymentStatus::Pending {
            if let Some(external_id) = response.external_id.as_deref() {
                self.ledger
                    .bind_external(payment.id, external_id, response.raw)
                    .await?;
            }
        } else if let Err(e) = self
            .ledger
            .record_result(payment.id, status, response.external_id.as_deref(), response.raw)
            .await
        {
            if status == PaymentStatus::Paid {
                error!(
                    payment_id = payment.id,
                    order_id = payment.order_id,
                    external_id = response.external_id.as_deref().unwrap_or_default(),
                    error = %e,
                    "card charge captured by provider but not recorded"
                );
            }
            return Err(e);
        }

        if status == PaymentStatus::Failed {
            warn!(payment_id = payment.id, "card charge declined");
        } else {
            info!(payment_id = payment.id, %status, "card charge answered");
        }
        Ok(PaymentSession {
            payment_id: payment.id,
            method: PaymentMethod::Card,
            payment_url,
            status,
        })
    }

    async fn handle_callback(&self, _payload: CallbackPayload) -> CallbackOutcome {
        CallbackOutcome::ack(json!({
            "error": "CARD payments are settled synchronously and take no callbacks"
        }))
    }

    async fn refund(&self, payment_id: PaymentId, amount: Option<Decimal>) -> Result<RefundResult> {
        refund_through_provider(
            &self.ledger,
            self.provider.as_ref(),
            PaymentMethod::Card,
            payment_id,
            amount,
            to_minor_units,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::SessionResponse;
    use crate::error::EngineError;
    use crate::infrastructure::gateways::testing::{FakeProvider, ledger_with_order};
    use rust_decimal_macros::dec;

    fn request() -> PaymentRequest {
        PaymentRequest {
            order_id: 1,
            amount: dec!(99.99),
            return_url: "https://shop.test/return".to_string(),
            cancel_url: None,
            description: None,
        }
    }

    #[test]
    fn test_minor_unit_conversion() {
        assert_eq!(to_minor_units(dec!(99.99)).unwrap(), 9999);
        assert_eq!(from_minor_units(9999), dec!(99.99));
        assert!(to_minor_units(dec!(1.001)).is_err());
    }

    #[tokio::test]
    async fn test_captured_charge_marks_paid() {
        let ledger = ledger_with_order(dec!(99.99)).await;
        let provider = Arc::new(FakeProvider::with_session(SessionResponse {
            external_id: Some("card-1".to_string()),
            redirect_url: None,
            captured: true,
            raw: json!({"auth_code": "A1"}),
        }));
        let adapter = CardAdapter::new(ledger.clone(), provider);

        let session = adapter.create_payment(request()).await.unwrap();
        assert_eq!(session.status, PaymentStatus::Paid);
        assert_eq!(session.payment_url, None);
        assert_eq!(
            ledger.order(1).await.unwrap().payment_status,
            PaymentStatus::Paid
        );
    }

    #[tokio::test]
    async fn test_decline_marks_failed() {
        let ledger = ledger_with_order(dec!(99.99)).await;
        let provider = Arc::new(FakeProvider::with_session(SessionResponse {
            external_id: Some("card-2".to_string()),
            redirect_url: None,
            captured: false,
            raw: json!({"decline": "insufficient funds"}),
        }));
        let adapter = CardAdapter::new(ledger.clone(), provider);

        let session = adapter.create_payment(request()).await.unwrap();
        assert_eq!(session.status, PaymentStatus::Failed);
        let payment = ledger.payment(session.payment_id).await.unwrap();
        assert_eq!(payment.gateway_response.unwrap()["decline"], "insufficient funds");
    }

    #[tokio::test]
    async fn test_unrecorded_capture_surfaces_error() {
        let ledger = ledger_with_order(dec!(99.99)).await;
        let declining = CardAdapter::new(
            ledger.clone(),
            Arc::new(FakeProvider::with_session(SessionResponse {
                external_id: Some("card-dup".to_string()),
                ..SessionResponse::default()
            })),
        );
        let declined = declining.create_payment(request()).await.unwrap();
        assert_eq!(declined.status, PaymentStatus::Failed);

        let capturing = CardAdapter::new(
            ledger.clone(),
            Arc::new(FakeProvider::with_session(SessionResponse {
                external_id: Some("card-dup".to_string()),
                captured: true,
                ..SessionResponse::default()
            })),
        );
        assert!(matches!(
            capturing.create_payment(request()).await,
            Err(EngineError::Conflict(_))
        ));

        let payments = ledger.payments_for_order(1).await.unwrap();
        assert_eq!(payments.len(), 2);
        assert_eq!(payments[1].status, PaymentStatus::Pending);
        assert_eq!(
            ledger.order(1).await.unwrap().payment_status,
            PaymentStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_refund_failure_is_compensated() {
        let ledger = ledger_with_order(dec!(99.99)).await;
        let provider = Arc::new(FakeProvider {
            session: SessionResponse {
                external_id: Some("card-3".to_string()),
                captured: true,
                ..SessionResponse::default()
            },
            fail_refunds: true,
            ..FakeProvider::default()
        });
        let adapter = CardAdapter::new(ledger.clone(), provider);
        let session = adapter.create_payment(request()).await.unwrap();

        assert!(matches!(
            adapter.refund(session.payment_id, None).await,
            Err(EngineError::Upstream(_))
        ));
        assert_eq!(
            ledger.payment(session.payment_id).await.unwrap().status,
            PaymentStatus::Paid
        );
        assert_eq!(
            ledger.order(1).await.unwrap().payment_status,
            PaymentStatus::Paid
        );
    }

    #[tokio::test]
    async fn test_refund_reaches_provider() {
        let ledger = ledger_with_order(dec!(99.99)).await;
        let provider = Arc::new(FakeProvider::with_session(SessionResponse {
            external_id: Some("card-4".to_string()),
            captured: true,
            ..SessionResponse::default()
        }));
        let adapter = CardAdapter::new(ledger.clone(), provider.clone());
        let session = adapter.create_payment(request()).await.unwrap();

        let result = adapter.refund(session.payment_id, Some(dec!(9.99))).await.unwrap();
        assert_eq!(result.status, PaymentStatus::PartiallyRefunded);
        let refunds = provider.refunds.lock();
        assert_eq!(refunds.len(), 1);
        assert_eq!(refunds[0].amount_minor, 999);
        assert_eq!(refunds[0].external_id.as_deref(), Some("card-4"));
    }
}
