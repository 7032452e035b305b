//! Uzum checkout: sessions registered through the merchant API, results pushed as signed
//! flat JSON notifications.

use super::lenient_string;
use super::signature::{digest_matches, hmac_sha256_hex};
use crate::application::gateway::{
    CallbackOutcome, CallbackPayload, GatewayAdapter, PaymentRequest, PaymentSession,
    fail_session, open_session_attempt, refund_through_provider,
};
use crate::application::ledger::PaymentLedger;
use crate::domain::money;
use crate::domain::payment::{OrderPayment, PaymentId, PaymentMethod, PaymentStatus, RefundResult};
use crate::domain::ports::{ProviderApiRef, SessionRequest};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

const MINOR_PER_MAJOR: u32 = 100;

pub fn to_minor_units(amount: Decimal) -> Result<i64> {
    money::to_minor(amount, MINOR_PER_MAJOR)
}

pub fn from_minor_units(minor: i64) -> Decimal {
    money::from_minor(minor, MINOR_PER_MAJOR)
}

#[derive(Debug, Clone, PartialEq)]
pub struct UzumConfig {
    pub service_id: String,
    pub secret_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UzumAck {
    Success,
    InvalidSignature,
    PaymentNotFound,
    AmountMismatch,
    AlreadyProcessed,
    BadRequest,
    Internal,
}

impl UzumAck {
    fn to_json(self) -> Value {
        let (code, message) = match self {
            UzumAck::Success => (0, "Success"),
            UzumAck::InvalidSignature => (-1, "Invalid signature"),
            UzumAck::PaymentNotFound => (-2, "Payment not found"),
            UzumAck::AmountMismatch => (-3, "Amount mismatch"),
            UzumAck::AlreadyProcessed => (-4, "Already processed"),
            UzumAck::BadRequest => (-5, "Bad request"),
            UzumAck::Internal => (-9, "Internal error"),
        };
        json!({ "error_code": code, "error_message": message })
    }

    fn from_ledger(err: EngineError) -> Self {
        match err {
            EngineError::Conflict(_) | EngineError::InvalidState(_) => UzumAck::AlreadyProcessed,
            EngineError::NotFound(_) => UzumAck::PaymentNotFound,
            other => {
                error!(error = %other, "uzum notification could not be applied");
                UzumAck::Internal
            }
        }
    }
}

/// Result notification; `payment_id` is our ledger id echoed back by Uzum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UzumNotification {
    #[serde(deserialize_with = "lenient_string")]
    pub payment_id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub transaction_id: String,
    pub amount: i64,
    pub error_code: i32,
    #[serde(default)]
    pub error_message: Option<String>,
    pub timestamp: i64,
    pub signature: String,
}

impl UzumNotification {
    pub fn sign_source(&self) -> String {
        format!(
            "{}{}{}{}{}",
            self.payment_id, self.transaction_id, self.amount, self.error_code, self.timestamp
        )
    }
}

pub struct UzumAdapter {
    ledger: Arc<PaymentLedger>,
    provider: ProviderApiRef,
    config: UzumConfig,
}

impl UzumAdapter {
    pub fn new(ledger: Arc<PaymentLedger>, provider: ProviderApiRef, config: UzumConfig) -> Self {
        Self {
            ledger,
            provider,
            config,
        }
    }

    async fn process(&self, notification: &UzumNotification) -> std::result::Result<CallbackOutcome, UzumAck> {
        let expected = hmac_sha256_hex(&self.config.secret_key, &notification.sign_source());
        if !digest_matches(&expected, &notification.signature) {
            warn!(payment_id = %notification.payment_id, "uzum signature mismatch");
            return Err(UzumAck::InvalidSignature);
        }

        let payment_id: PaymentId = notification
            .payment_id
            .trim()
            .parse()
            .map_err(|_| UzumAck::PaymentNotFound)?;
        let payment = match self.ledger.payment(payment_id).await {
            Ok(payment) if payment.payment_method == PaymentMethod::Uzum => payment,
            Ok(_) => return Err(UzumAck::PaymentNotFound),
            Err(e) => return Err(UzumAck::from_ledger(e)),
        };
        if from_minor_units(notification.amount) != payment.amount {
            return Err(UzumAck::AmountMismatch);
        }

        let (status, raw) = if notification.error_code == 0 {
            (
                PaymentStatus::Paid,
                serde_json::to_value(notification).unwrap_or_default(),
            )
        } else {
            // Provider wording is kept exactly as sent.
            (
                PaymentStatus::Failed,
                json!({
                    "transaction_id": notification.transaction_id,
                    "amount": notification.amount,
                    "timestamp": notification.timestamp,
                    "error_code": notification.error_code,
                    "error_message": notification.error_message,
                }),
            )
        };

        let outcome = self
            .ledger
            .record_result(payment.id, status, Some(&notification.transaction_id), raw)
            .await
            .map_err(UzumAck::from_ledger)?;
        info!(payment_id, %status, applied = outcome.applied, "uzum notification applied");

        let ack = UzumAck::Success.to_json();
        Ok(if outcome.applied && status == PaymentStatus::Paid {
            CallbackOutcome::captured(ack, &outcome.payment)
        } else {
            CallbackOutcome::ack(ack)
        })
    }

    async fn register(&self, payment: &OrderPayment, request: &PaymentRequest, amount_minor: i64) -> Result<String> {
        let session = self
            .provider
            .register_session(&SessionRequest {
                method: PaymentMethod::Uzum,
                payment_id: payment.id,
                order_id: payment.order_id,
                amount_minor,
                return_url: request.return_url.clone(),
                cancel_url: request.cancel_url.clone(),
                description: request.description.clone(),
            })
            .await?;
        let redirect = session
            .redirect_url
            .ok_or_else(|| EngineError::Upstream("Uzum returned no redirect url".to_string()))?;
        // The notification carries its own transaction id, so the session id is only kept
        // alongside the provider payload.
        self.ledger
            .note_response(
                payment.id,
                json!({ "session_id": session.external_id, "session": session.raw }),
            )
            .await?;
        Ok(redirect)
    }
}

#[async_trait]
impl GatewayAdapter for UzumAdapter {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Uzum
    }

    #[instrument(skip(self, request), fields(order_id = request.order_id, service_id = %self.config.service_id))]
    async fn create_payment(&self, request: PaymentRequest) -> Result<PaymentSession> {
        let amount_minor = to_minor_units(request.amount)?;
        let payment = open_session_attempt(&self.ledger, PaymentMethod::Uzum, &request).await?;

        match self.register(&payment, &request, amount_minor).await {
            Ok(url) => Ok(PaymentSession {
                payment_id: payment.id,
                method: PaymentMethod::Uzum,
                payment_url: Some(url),
                status: PaymentStatus::Pending,
            }),
            Err(e) => Err(fail_session(&self.ledger, &payment, e).await),
        }
    }

    #[instrument(skip_all)]
    async fn handle_callback(&self, payload: CallbackPayload) -> CallbackOutcome {
        let notification: UzumNotification = match serde_json::from_slice(&payload.body) {
            Ok(notification) => notification,
            Err(e) => {
                warn!(error = %e, "unparsable uzum notification");
                return CallbackOutcome::ack(UzumAck::BadRequest.to_json());
            }
        };
        match self.process(&notification).await {
            Ok(outcome) => outcome,
            Err(ack) => CallbackOutcome::ack(ack.to_json()),
        }
    }

    async fn refund(&self, payment_id: PaymentId, amount: Option<Decimal>) -> Result<RefundResult> {
        refund_through_provider(
            &self.ledger,
            self.provider.as_ref(),
            PaymentMethod::Uzum,
            payment_id,
            amount,
            to_minor_units,
        )
        .await
    }
}
