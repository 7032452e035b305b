//! Contract shared by the provider adapters, plus the session and refund steps every
//! adapter runs the same way.

use crate::application::ledger::PaymentLedger;
use crate::domain::money::Amount;
use crate::domain::order::OrderId;
use crate::domain::payment::{
    OrderPayment, PaymentId, PaymentMethod, PaymentStatus, RefundResult,
};
use crate::domain::ports::{ProviderApi, ProviderRefundRequest};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub order_id: OrderId,
    pub amount: Decimal,
    pub return_url: String,
    pub cancel_url: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentSession {
    pub payment_id: PaymentId,
    pub method: PaymentMethod,
    /// Where the customer is redirected. `None` for synchronous methods.
    pub payment_url: Option<String>,
    pub status: PaymentStatus,
}

/// Raw inbound callback as received over HTTP.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallbackPayload {
    pub body: Vec<u8>,
    /// Value of the `Authorization` header, if present.
    pub authorization: Option<String>,
}

impl CallbackPayload {
    pub fn json(body: &serde_json::Value) -> Self {
        Self {
            body: body.to_string().into_bytes(),
            authorization: None,
        }
    }

    pub fn with_authorization(mut self, authorization: impl Into<String>) -> Self {
        self.authorization = Some(authorization.into());
        self
    }
}

/// A payment newly captured by a callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapturedPayment {
    pub order_id: OrderId,
    pub payment_id: PaymentId,
}

/// The provider-shaped acknowledgement plus what the callback changed.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackOutcome {
    pub ack: serde_json::Value,
    pub captured: Option<CapturedPayment>,
}

impl CallbackOutcome {
    pub fn ack(ack: serde_json::Value) -> Self {
        Self {
            ack,
            captured: None,
        }
    }

    pub fn captured(ack: serde_json::Value, payment: &OrderPayment) -> Self {
        Self {
            ack,
            captured: Some(CapturedPayment {
                order_id: payment.order_id,
                payment_id: payment.id,
            }),
        }
    }
}

#[async_trait]
pub trait GatewayAdapter: Send + Sync {
    fn method(&self) -> PaymentMethod;

    /// Opens a ledger attempt and returns where the customer pays.
    async fn create_payment(&self, request: PaymentRequest) -> Result<PaymentSession>;

    /// Verifies and applies a provider callback. Always yields the provider's ack shape.
    async fn handle_callback(&self, payload: CallbackPayload) -> CallbackOutcome;

    /// Refunds through the ledger and the provider, compensating on provider failure.
    async fn refund(&self, payment_id: PaymentId, amount: Option<Decimal>) -> Result<RefundResult>;
}

/// Validates a payment request and opens the ledger attempt for it.
pub async fn open_session_attempt(
    ledger: &PaymentLedger,
    method: PaymentMethod,
    request: &PaymentRequest,
) -> Result<OrderPayment> {
    Amount::new(request.amount)?;
    let order = ledger.order(request.order_id).await?;
    if order.payment_status == PaymentStatus::Paid {
        return Err(EngineError::InvalidState(format!(
            "Order {} is already paid",
            order.id
        )));
    }
    ledger
        .open_attempt(request.order_id, method, request.amount)
        .await
}

/// Closes an attempt whose session could not be created and returns the upstream error.
pub async fn fail_session(
    ledger: &PaymentLedger,
    payment: &OrderPayment,
    cause: EngineError,
) -> EngineError {
    let raw = json!({ "session_error": cause.to_string() });
    if let Err(e) = ledger
        .record_result(payment.id, PaymentStatus::Failed, None, raw)
        .await
    {
        error!(payment_id = payment.id, error = %e, "failed to close attempt after session error");
    }
    match cause {
        EngineError::Upstream(_) => cause,
        other => EngineError::Upstream(other.to_string()),
    }
}

/// Ledger-first refund with a compensating rollback when the provider call fails.
pub async fn refund_through_provider(
    ledger: &PaymentLedger,
    provider: &dyn ProviderApi,
    method: PaymentMethod,
    payment_id: PaymentId,
    amount: Option<Decimal>,
    to_minor_units: fn(Decimal) -> Result<i64>,
) -> Result<RefundResult> {
    let payment = ledger.payment(payment_id).await?;
    if payment.payment_method != method {
        return Err(EngineError::InvalidArgument(format!(
            "Payment {payment_id} was made with {}, not {method}",
            payment.payment_method
        )));
    }
    let amount_minor = to_minor_units(amount.unwrap_or(payment.amount))?;

    let (result, snapshot) = ledger.refund(payment_id, amount).await?;
    let request = ProviderRefundRequest {
        method,
        payment_id,
        external_id: payment.external_transaction_id.clone(),
        amount_minor,
    };

    // The order lock is released here; the provider call must not hold it.
    match provider.refund(&request).await {
        Ok(receipt) => {
            if let Err(e) = ledger.note_response(payment_id, receipt).await {
                warn!(payment_id, error = %e, "refund receipt not stored");
            }
            Ok(result)
        }
        Err(cause) => {
            warn!(payment_id, error = %cause, "provider refund failed, reverting ledger");
            if let Err(e) = ledger.revert_refund(snapshot).await {
                error!(payment_id, error = %e, "refund revert failed");
                return Err(EngineError::InternalError(Box::new(e)));
            }
            Err(match cause {
                EngineError::Upstream(_) => cause,
                other => EngineError::Upstream(other.to_string()),
            })
        }
    }
}
