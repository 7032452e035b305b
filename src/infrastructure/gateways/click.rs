//! Click SHOP-API: two-phase prepare/complete callbacks signed with MD5.

use super::signature::{digest_matches, md5_hex};
use super::{lenient_string, lenient_string_opt};
use crate::application::gateway::{
    CallbackOutcome, CallbackPayload, GatewayAdapter, PaymentRequest, PaymentSession,
    open_session_attempt, refund_through_provider,
};
use crate::application::ledger::PaymentLedger;
use crate::domain::money;
use crate::domain::payment::{OrderPayment, PaymentId, PaymentMethod, PaymentStatus, RefundResult};
use crate::domain::ports::ProviderApiRef;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use reqwest::Url;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Click amounts travel in tiyin.
const MINOR_PER_MAJOR: u32 = 100;

pub fn to_minor_units(amount: Decimal) -> Result<i64> {
    money::to_minor(amount, MINOR_PER_MAJOR)
}

pub fn from_minor_units(minor: i64) -> Decimal {
    money::from_minor(minor, MINOR_PER_MAJOR)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClickConfig {
    pub service_id: String,
    pub merchant_id: String,
    pub secret_key: String,
    pub checkout_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClickError {
    Success,
    SignCheckFailed,
    IncorrectAmount,
    ActionNotFound,
    AlreadyPaid,
    OrderNotFound,
    TransactionNotFound,
    FailedToUpdate,
    BadRequest,
    TransactionCancelled,
}

impl ClickError {
    fn code(self) -> i32 {
        match self {
            ClickError::Success => 0,
            ClickError::SignCheckFailed => -1,
            ClickError::IncorrectAmount => -2,
            ClickError::ActionNotFound => -3,
            ClickError::AlreadyPaid => -4,
            ClickError::OrderNotFound => -5,
            ClickError::TransactionNotFound => -6,
            ClickError::FailedToUpdate => -7,
            ClickError::BadRequest => -8,
            ClickError::TransactionCancelled => -9,
        }
    }

    fn note(self) -> &'static str {
        match self {
            ClickError::Success => "Success",
            ClickError::SignCheckFailed => "SIGN CHECK FAILED!",
            ClickError::IncorrectAmount => "Incorrect parameter amount",
            ClickError::ActionNotFound => "Action not found",
            ClickError::AlreadyPaid => "Already paid",
            ClickError::OrderNotFound => "Order not found",
            ClickError::TransactionNotFound => "Transaction does not exist",
            ClickError::FailedToUpdate => "Failed to update",
            ClickError::BadRequest => "Error in request from click",
            ClickError::TransactionCancelled => "Transaction cancelled",
        }
    }

    fn from_ledger(err: EngineError) -> Self {
        match err {
            EngineError::Conflict(_) => ClickError::AlreadyPaid,
            EngineError::InvalidState(_) => ClickError::TransactionCancelled,
            EngineError::NotFound(_) => ClickError::OrderNotFound,
            other => {
                error!(error = %other, "click callback could not be applied");
                ClickError::FailedToUpdate
            }
        }
    }
}

/// Prepare (`action = 0`) and complete (`action = 1`) share one shape.
///
/// Fields are kept as received so the signature is checked against the exact text Click signed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClickRequest {
    #[serde(deserialize_with = "lenient_string")]
    pub click_trans_id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub service_id: String,
    #[serde(default, deserialize_with = "lenient_string_opt")]
    pub click_paydoc_id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub merchant_trans_id: String,
    #[serde(default, deserialize_with = "lenient_string_opt")]
    pub merchant_prepare_id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub amount: String,
    #[serde(deserialize_with = "lenient_string")]
    pub action: String,
    #[serde(default, deserialize_with = "lenient_string_opt")]
    pub error: Option<String>,
    #[serde(default)]
    pub error_note: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub sign_time: String,
    pub sign_string: String,
}

impl ClickRequest {
    /// Accepts both `application/x-www-form-urlencoded` and JSON bodies.
    pub fn parse(body: &[u8]) -> std::result::Result<Self, String> {
        let trimmed = body.trim_ascii_start();
        if trimmed.starts_with(b"{") {
            serde_json::from_slice(trimmed).map_err(|e| e.to_string())
        } else {
            serde_urlencoded::from_bytes(trimmed).map_err(|e| e.to_string())
        }
    }

    pub fn is_complete(&self) -> bool {
        self.action.trim() == "1"
    }

    /// The string Click hashes; the prepare id only takes part on complete.
    pub fn sign_source(&self, secret_key: &str) -> String {
        let prepare_id = if self.is_complete() {
            self.merchant_prepare_id.as_deref().unwrap_or_default()
        } else {
            ""
        };
        format!(
            "{}{}{}{}{}{}{}{}",
            self.click_trans_id,
            self.service_id,
            secret_key,
            self.merchant_trans_id,
            prepare_id,
            self.amount,
            self.action,
            self.sign_time
        )
    }

    fn provider_error(&self) -> i64 {
        self.error
            .as_deref()
            .and_then(|e| e.trim().parse().ok())
            .unwrap_or(0)
    }

    fn ack(&self, code: ClickError, confirm_id: Option<PaymentId>) -> Value {
        let mut ack = json!({
            "click_trans_id": numeric(&self.click_trans_id),
            "merchant_trans_id": self.merchant_trans_id,
            "error": code.code(),
            "error_note": code.note(),
        });
        if let Some(id) = confirm_id {
            let key = if self.is_complete() {
                "merchant_confirm_id"
            } else {
                "merchant_prepare_id"
            };
            ack[key] = json!(id);
        }
        ack
    }
}

fn numeric(value: &str) -> Value {
    value
        .trim()
        .parse::<i64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::from(value))
}

pub struct ClickAdapter {
    ledger: Arc<PaymentLedger>,
    provider: ProviderApiRef,
    config: ClickConfig,
    checkout: Url,
}

impl ClickAdapter {
    pub fn new(ledger: Arc<PaymentLedger>, provider: ProviderApiRef, config: ClickConfig) -> Result<Self> {
        let checkout = Url::parse(&config.checkout_url)
            .map_err(|e| EngineError::Config(format!("CLICK_CHECKOUT_URL: {e}")))?;
        Ok(Self {
            ledger,
            provider,
            config,
            checkout,
        })
    }

    fn payment_url(&self, payment: &OrderPayment, amount_minor: i64, return_url: &str) -> String {
        let mut url = self.checkout.clone();
        url.query_pairs_mut()
            .append_pair("service_id", &self.config.service_id)
            .append_pair("merchant_id", &self.config.merchant_id)
            .append_pair("amount", &amount_minor.to_string())
            .append_pair("transaction_param", &payment.id.to_string())
            .append_pair("return_url", return_url);
        url.into()
    }

    async fn process(&self, request: &ClickRequest) -> std::result::Result<CallbackOutcome, ClickError> {
        let expected = md5_hex(&request.sign_source(&self.config.secret_key));
        if !digest_matches(&expected, &request.sign_string) {
            warn!(click_trans_id = %request.click_trans_id, "click signature mismatch");
            return Err(ClickError::SignCheckFailed);
        }
        if request.service_id.trim() != self.config.service_id {
            return Err(ClickError::BadRequest);
        }
        if !matches!(request.action.trim(), "0" | "1") {
            return Err(ClickError::ActionNotFound);
        }

        let payment_id: PaymentId = request
            .merchant_trans_id
            .trim()
            .parse()
            .map_err(|_| ClickError::OrderNotFound)?;
        let payment = match self.ledger.payment(payment_id).await {
            Ok(payment) if payment.payment_method == PaymentMethod::Click => payment,
            Ok(_) => return Err(ClickError::OrderNotFound),
            Err(e) => return Err(ClickError::from_ledger(e)),
        };

        let amount_minor: i64 = request
            .amount
            .trim()
            .parse()
            .map_err(|_| ClickError::IncorrectAmount)?;
        if from_minor_units(amount_minor) != payment.amount {
            return Err(ClickError::IncorrectAmount);
        }

        if request.is_complete() {
            self.complete(request, payment).await
        } else {
            self.prepare(request, payment).await
        }
    }

    async fn prepare(
        &self,
        request: &ClickRequest,
        payment: OrderPayment,
    ) -> std::result::Result<CallbackOutcome, ClickError> {
        match payment.external_transaction_id.as_deref() {
            Some(bound) if bound != request.click_trans_id => return Err(ClickError::BadRequest),
            _ => {}
        }
        match payment.status {
            PaymentStatus::Pending => {}
            PaymentStatus::Failed => return Err(ClickError::TransactionCancelled),
            _ => return Err(ClickError::AlreadyPaid),
        }
        if let Some(captured) = self
            .ledger
            .captured_payment(payment.order_id)
            .await
            .map_err(ClickError::from_ledger)?
        {
            info!(payment_id = payment.id, captured = captured.id, "order already paid");
            return Err(ClickError::AlreadyPaid);
        }

        let raw = serde_json::to_value(request).unwrap_or_default();
        self.ledger
            .bind_external(payment.id, &request.click_trans_id, raw)
            .await
            .map_err(ClickError::from_ledger)?;
        Ok(CallbackOutcome::ack(request.ack(ClickError::Success, Some(payment.id))))
    }

    async fn complete(
        &self,
        request: &ClickRequest,
        payment: OrderPayment,
    ) -> std::result::Result<CallbackOutcome, ClickError> {
        let prepare_id = request
            .merchant_prepare_id
            .as_deref()
            .and_then(|id| id.trim().parse::<PaymentId>().ok());
        if prepare_id != Some(payment.id)
            || payment.external_transaction_id.as_deref() != Some(request.click_trans_id.as_str())
        {
            return Err(ClickError::TransactionNotFound);
        }

        let raw = serde_json::to_value(request).unwrap_or_default();
        if request.provider_error() < 0 {
            match payment.status {
                PaymentStatus::Pending => {
                    self.ledger
                        .record_result(payment.id, PaymentStatus::Failed, Some(&request.click_trans_id), raw)
                        .await
                        .map_err(ClickError::from_ledger)?;
                }
                PaymentStatus::Failed => {}
                _ => return Err(ClickError::AlreadyPaid),
            }
            return Err(ClickError::TransactionCancelled);
        }

        if payment.status.is_captured() {
            return Ok(CallbackOutcome::ack(request.ack(ClickError::Success, Some(payment.id))));
        }
        if payment.status == PaymentStatus::Failed {
            return Err(ClickError::TransactionCancelled);
        }

        let outcome = self
            .ledger
            .record_result(payment.id, PaymentStatus::Paid, Some(&request.click_trans_id), raw)
            .await
            .map_err(ClickError::from_ledger)?;
        let ack = request.ack(ClickError::Success, Some(payment.id));
        Ok(if outcome.applied {
            CallbackOutcome::captured(ack, &outcome.payment)
        } else {
            CallbackOutcome::ack(ack)
        })
    }
}

#[async_trait]
impl GatewayAdapter for ClickAdapter {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Click
    }

    #[instrument(skip(self, request), fields(order_id = request.order_id))]
    async fn create_payment(&self, request: PaymentRequest) -> Result<PaymentSession> {
        let amount_minor = to_minor_units(request.amount)?;
        let payment = open_session_attempt(&self.ledger, PaymentMethod::Click, &request).await?;
        let payment_url = self.payment_url(&payment, amount_minor, &request.return_url);
        Ok(PaymentSession {
            payment_id: payment.id,
            method: PaymentMethod::Click,
            payment_url: Some(payment_url),
            status: PaymentStatus::Pending,
        })
    }

    #[instrument(skip_all)]
    async fn handle_callback(&self, payload: CallbackPayload) -> CallbackOutcome {
        let request = match ClickRequest::parse(&payload.body) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "unparsable click callback");
                return CallbackOutcome::ack(json!({
                    "error": ClickError::BadRequest.code(),
                    "error_note": ClickError::BadRequest.note(),
                }));
            }
        };
        match self.process(&request).await {
            Ok(outcome) => outcome,
            Err(code) => CallbackOutcome::ack(request.ack(code, None)),
        }
    }

    async fn refund(&self, payment_id: PaymentId, amount: Option<Decimal>) -> Result<RefundResult> {
        refund_through_provider(
            &self.ledger,
            self.provider.as_ref(),
            PaymentMethod::Click,
            payment_id,
            amount,
            to_minor_units,
        )
        .await
    }
}
