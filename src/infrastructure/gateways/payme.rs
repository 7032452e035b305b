//! Payme merchant API: JSON-RPC calls made by Payme against our single endpoint.

use super::lenient_string;
use super::signature::basic_auth_matches;
use crate::application::gateway::{
    CallbackOutcome, CallbackPayload, GatewayAdapter, PaymentRequest, PaymentSession,
    open_session_attempt, refund_through_provider,
};
use crate::application::ledger::{DateRange, PaymentLedger};
use crate::domain::money;
use crate::domain::order::OrderId;
use crate::domain::payment::{OrderPayment, PaymentId, PaymentMethod, PaymentStatus, RefundResult};
use crate::domain::ports::ProviderApiRef;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

const MINOR_PER_MAJOR: u32 = 100;
const AUTH_USER: &str = "Paycom";
/// Pending transactions older than this are cancelled instead of performed.
const TRANSACTION_TIMEOUT: Duration = Duration::milliseconds(43_200_000);
/// Cancellation reason Payme uses for timeouts.
const REASON_TIMEOUT: i32 = 4;

pub fn to_minor_units(amount: Decimal) -> Result<i64> {
    money::to_minor(amount, MINOR_PER_MAJOR)
}

pub fn from_minor_units(minor: i64) -> Decimal {
    money::from_minor(minor, MINOR_PER_MAJOR)
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymeConfig {
    pub merchant_id: String,
    pub key: String,
    pub checkout_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransactionState {
    Created,
    Performed,
    Cancelled,
    CancelledAfterPerform,
}

impl TransactionState {
    fn of(payment: &OrderPayment) -> Self {
        match payment.status {
            PaymentStatus::Pending => TransactionState::Created,
            PaymentStatus::Paid => TransactionState::Performed,
            PaymentStatus::Failed => TransactionState::Cancelled,
            PaymentStatus::Refunded | PaymentStatus::PartiallyRefunded => {
                TransactionState::CancelledAfterPerform
            }
        }
    }

    fn code(self) -> i32 {
        match self {
            TransactionState::Created => 1,
            TransactionState::Performed => 2,
            TransactionState::Cancelled => -1,
            TransactionState::CancelledAfterPerform => -2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct RpcError {
    code: i32,
    message: &'static str,
    data: Option<&'static str>,
}

impl RpcError {
    const fn new(code: i32, message: &'static str) -> Self {
        Self {
            code,
            message,
            data: None,
        }
    }

    const fn with_data(mut self, data: &'static str) -> Self {
        self.data = Some(data);
        self
    }

    const PARSE: RpcError = RpcError::new(-32700, "Parse error");
    const INVALID_REQUEST: RpcError = RpcError::new(-32600, "Invalid request");
    const METHOD_NOT_FOUND: RpcError = RpcError::new(-32601, "Method not found");
    const INSUFFICIENT_PRIVILEGE: RpcError = RpcError::new(-32504, "Insufficient privilege");
    const SYSTEM: RpcError = RpcError::new(-32400, "System error");
    const INVALID_AMOUNT: RpcError = RpcError::new(-31001, "Invalid amount");
    const TRANSACTION_NOT_FOUND: RpcError = RpcError::new(-31003, "Transaction not found");
    const UNABLE_TO_CANCEL: RpcError = RpcError::new(-31007, "Unable to cancel transaction");
    const UNABLE_TO_PERFORM: RpcError = RpcError::new(-31008, "Unable to perform operation");
    const ORDER_NOT_FOUND: RpcError =
        RpcError::new(-31050, "Order not found").with_data("order_id");
    const ORDER_BUSY: RpcError =
        RpcError::new(-31050, "Another transaction is in progress").with_data("order_id");
    const ORDER_PAID: RpcError = RpcError::new(-31051, "Order already paid").with_data("order_id");

    fn to_json(&self) -> Value {
        let mut error = json!({
            "code": self.code,
            "message": { "ru": self.message, "uz": self.message, "en": self.message },
        });
        if let Some(data) = self.data {
            error["data"] = json!(data);
        }
        error
    }

    fn from_ledger(err: EngineError) -> Self {
        match err {
            EngineError::Conflict(_) | EngineError::InvalidState(_) => RpcError::UNABLE_TO_PERFORM,
            EngineError::NotFound(_) => RpcError::TRANSACTION_NOT_FOUND,
            other => {
                error!(error = %other, "payme call could not be applied");
                RpcError::SYSTEM
            }
        }
    }
}

type RpcResult<T> = std::result::Result<T, RpcError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RpcMethod {
    CheckPerformTransaction,
    CreateTransaction,
    PerformTransaction,
    CancelTransaction,
    CheckTransaction,
    GetStatement,
}

impl FromStr for RpcMethod {
    type Err = RpcError;

    fn from_str(s: &str) -> RpcResult<Self> {
        match s {
            "CheckPerformTransaction" => Ok(RpcMethod::CheckPerformTransaction),
            "CreateTransaction" => Ok(RpcMethod::CreateTransaction),
            "PerformTransaction" => Ok(RpcMethod::PerformTransaction),
            "CancelTransaction" => Ok(RpcMethod::CancelTransaction),
            "CheckTransaction" => Ok(RpcMethod::CheckTransaction),
            "GetStatement" => Ok(RpcMethod::GetStatement),
            _ => Err(RpcError::METHOD_NOT_FOUND),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Deserialize)]
struct Account {
    #[serde(deserialize_with = "lenient_string")]
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct CheckPerformParams {
    amount: i64,
    account: Account,
}

#[derive(Debug, Deserialize)]
struct CreateParams {
    id: String,
    amount: i64,
    account: Account,
}

#[derive(Debug, Deserialize)]
struct TransactionParams {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StatementParams {
    from: i64,
    to: i64,
}

fn params<T: DeserializeOwned>(request: &RpcRequest) -> RpcResult<T> {
    serde_json::from_value(request.params.clone()).map_err(|_| RpcError::INVALID_REQUEST)
}

fn millis(at: Option<DateTime<Utc>>) -> i64 {
    at.map(|t| t.timestamp_millis()).unwrap_or(0)
}

fn cancel_reason(payment: &OrderPayment) -> Value {
    if TransactionState::of(payment).code() < 0 {
        payment
            .gateway_response
            .as_ref()
            .and_then(|raw| raw.pointer("/params/reason"))
            .cloned()
            .unwrap_or(Value::Null)
    } else {
        Value::Null
    }
}

fn is_expired(payment: &OrderPayment) -> bool {
    Utc::now() - payment.created_at > TRANSACTION_TIMEOUT
}

pub struct PaymeAdapter {
    ledger: Arc<PaymentLedger>,
    provider: ProviderApiRef,
    config: PaymeConfig,
}

impl PaymeAdapter {
    pub fn new(ledger: Arc<PaymentLedger>, provider: ProviderApiRef, config: PaymeConfig) -> Self {
        Self {
            ledger,
            provider,
            config,
        }
    }

    fn checkout_url(&self, order_id: OrderId, amount_minor: i64, return_url: &str) -> String {
        let params = format!(
            "m={};ac.order_id={order_id};a={amount_minor};c={return_url}",
            self.config.merchant_id
        );
        format!(
            "{}/{}",
            self.config.checkout_url.trim_end_matches('/'),
            STANDARD.encode(params)
        )
    }

    async fn dispatch(&self, request: &RpcRequest) -> RpcResult<(Value, Option<OrderPayment>)> {
        let method: RpcMethod = request.method.parse()?;
        let raw = json!({ "method": request.method, "params": request.params });
        match method {
            RpcMethod::CheckPerformTransaction => {
                let p: CheckPerformParams = params(request)?;
                self.payable_attempt(&p.account.order_id, p.amount).await?;
                Ok((json!({ "allow": true }), None))
            }
            RpcMethod::CreateTransaction => {
                let p: CreateParams = params(request)?;
                Ok((self.create_transaction(p, raw).await?, None))
            }
            RpcMethod::PerformTransaction => {
                let p: TransactionParams = params(request)?;
                self.perform_transaction(&p.id, raw).await
            }
            RpcMethod::CancelTransaction => {
                let p: TransactionParams = params(request)?;
                Ok((self.cancel_transaction(&p.id, raw).await?, None))
            }
            RpcMethod::CheckTransaction => {
                let p: TransactionParams = params(request)?;
                let payment = self.transaction(&p.id).await?;
                Ok((
                    json!({
                        "create_time": millis(Some(payment.created_at)),
                        "perform_time": millis(payment.paid_at),
                        "cancel_time": millis(payment.closed_at),
                        "transaction": payment.id.to_string(),
                        "state": TransactionState::of(&payment).code(),
                        "reason": cancel_reason(&payment),
                    }),
                    None,
                ))
            }
            RpcMethod::GetStatement => {
                let p: StatementParams = params(request)?;
                Ok((self.statement(p).await?, None))
            }
        }
    }

    async fn transaction(&self, external_id: &str) -> RpcResult<OrderPayment> {
        self.ledger
            .find_by_external(PaymentMethod::Payme, external_id)
            .await
            .map_err(RpcError::from_ledger)?
            .ok_or(RpcError::TRANSACTION_NOT_FOUND)
    }

    /// The open Payme attempt of the referenced order, checked against `amount_minor`.
    async fn payable_attempt(&self, order_ref: &str, amount_minor: i64) -> RpcResult<OrderPayment> {
        let order_id: OrderId = order_ref.trim().parse().map_err(|_| RpcError::ORDER_NOT_FOUND)?;
        let order = match self.ledger.order(order_id).await {
            Ok(order) => order,
            Err(EngineError::NotFound(_)) => return Err(RpcError::ORDER_NOT_FOUND),
            Err(e) => return Err(RpcError::from_ledger(e)),
        };
        let payments = self
            .ledger
            .payments_for_order(order.id)
            .await
            .map_err(RpcError::from_ledger)?;
        if payments.iter().any(|p| p.status.is_captured()) {
            return Err(RpcError::ORDER_PAID);
        }

        let attempt = payments
            .into_iter()
            .filter(|p| p.payment_method == PaymentMethod::Payme && p.status == PaymentStatus::Pending)
            .max_by_key(|p| p.id)
            .ok_or(RpcError::ORDER_NOT_FOUND)?;
        if from_minor_units(amount_minor) != attempt.amount {
            return Err(RpcError::INVALID_AMOUNT);
        }
        Ok(attempt)
    }

    async fn create_transaction(&self, p: CreateParams, raw: Value) -> RpcResult<Value> {
        let created = |payment: &OrderPayment| {
            json!({
                "create_time": millis(Some(payment.created_at)),
                "transaction": payment.id.to_string(),
                "state": TransactionState::Created.code(),
            })
        };

        if let Some(existing) = self
            .ledger
            .find_by_external(PaymentMethod::Payme, &p.id)
            .await
            .map_err(RpcError::from_ledger)?
        {
            if existing.status != PaymentStatus::Pending {
                return Err(RpcError::UNABLE_TO_PERFORM);
            }
            if is_expired(&existing) {
                self.expire(&existing).await?;
                return Err(RpcError::UNABLE_TO_PERFORM);
            }
            return Ok(created(&existing));
        }

        let attempt = self.payable_attempt(&p.account.order_id, p.amount).await?;
        if attempt.external_transaction_id.is_some() {
            return Err(RpcError::ORDER_BUSY);
        }
        let payment = self
            .ledger
            .bind_external(attempt.id, &p.id, raw)
            .await
            .map_err(RpcError::from_ledger)?;
        info!(payment_id = payment.id, payme_id = %p.id, "payme transaction created");
        Ok(created(&payment))
    }

    async fn perform_transaction(
        &self,
        external_id: &str,
        raw: Value,
    ) -> RpcResult<(Value, Option<OrderPayment>)> {
        let payment = self.transaction(external_id).await?;
        let performed = |payment: &OrderPayment| {
            json!({
                "transaction": payment.id.to_string(),
                "perform_time": millis(payment.paid_at),
                "state": TransactionState::Performed.code(),
            })
        };

        match payment.status {
            PaymentStatus::Paid => Ok((performed(&payment), None)),
            PaymentStatus::Pending => {
                if is_expired(&payment) {
                    self.expire(&payment).await?;
                    return Err(RpcError::UNABLE_TO_PERFORM);
                }
                let outcome = self
                    .ledger
                    .record_result(payment.id, PaymentStatus::Paid, Some(external_id), raw)
                    .await
                    .map_err(RpcError::from_ledger)?;
                let captured = outcome.applied.then(|| outcome.payment.clone());
                Ok((performed(&outcome.payment), captured))
            }
            _ => Err(RpcError::UNABLE_TO_PERFORM),
        }
    }

    async fn cancel_transaction(&self, external_id: &str, raw: Value) -> RpcResult<Value> {
        let payment = self.transaction(external_id).await?;
        match payment.status {
            PaymentStatus::Pending => {
                self.ledger
                    .record_result(payment.id, PaymentStatus::Failed, Some(external_id), raw)
                    .await
                    .map_err(RpcError::from_ledger)?;
            }
            PaymentStatus::Paid => {
                // Payme already returned the money; only the ledger follows.
                self.ledger
                    .refund(payment.id, None)
                    .await
                    .map_err(RpcError::from_ledger)?;
                if let Err(e) = self.ledger.note_response(payment.id, raw).await {
                    warn!(payment_id = payment.id, error = %e, "cancel reason not stored");
                }
                info!(payment_id = payment.id, "performed payme transaction cancelled");
            }
            PaymentStatus::Failed | PaymentStatus::Refunded => {}
            PaymentStatus::PartiallyRefunded => return Err(RpcError::UNABLE_TO_CANCEL),
        }

        let payment = self
            .ledger
            .payment(payment.id)
            .await
            .map_err(RpcError::from_ledger)?;
        Ok(json!({
            "transaction": payment.id.to_string(),
            "cancel_time": millis(payment.closed_at),
            "state": TransactionState::of(&payment).code(),
        }))
    }

    async fn expire(&self, payment: &OrderPayment) -> RpcResult<()> {
        warn!(payment_id = payment.id, "payme transaction timed out");
        let raw = json!({ "method": "Timeout", "params": { "reason": REASON_TIMEOUT } });
        self.ledger
            .record_result(payment.id, PaymentStatus::Failed, None, raw)
            .await
            .map_err(RpcError::from_ledger)?;
        Ok(())
    }

    async fn statement(&self, p: StatementParams) -> RpcResult<Value> {
        let range = DateRange {
            from: DateTime::from_timestamp_millis(p.from),
            to: DateTime::from_timestamp_millis(p.to),
        };
        let attempts = self
            .ledger
            .attempts(PaymentMethod::Payme, range)
            .await
            .map_err(RpcError::from_ledger)?;

        let transactions: Vec<Value> = attempts
            .iter()
            .filter_map(|payment| {
                let external_id = payment.external_transaction_id.as_ref()?;
                Some(json!({
                    "id": external_id,
                    "time": millis(Some(payment.created_at)),
                    "amount": to_minor_units(payment.amount).unwrap_or_default(),
                    "account": { "order_id": payment.order_id.to_string() },
                    "create_time": millis(Some(payment.created_at)),
                    "perform_time": millis(payment.paid_at),
                    "cancel_time": millis(payment.closed_at),
                    "transaction": payment.id.to_string(),
                    "state": TransactionState::of(payment).code(),
                    "reason": cancel_reason(payment),
                }))
            })
            .collect();
        Ok(json!({ "transactions": transactions }))
    }
}

fn rpc_error(id: Value, error: &RpcError) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": error.to_json() })
}

#[async_trait]
impl GatewayAdapter for PaymeAdapter {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Payme
    }

    #[instrument(skip(self, request), fields(order_id = request.order_id))]
    async fn create_payment(&self, request: PaymentRequest) -> Result<PaymentSession> {
        let amount_minor = to_minor_units(request.amount)?;
        let payment = open_session_attempt(&self.ledger, PaymentMethod::Payme, &request).await?;
        Ok(PaymentSession {
            payment_id: payment.id,
            method: PaymentMethod::Payme,
            payment_url: Some(self.checkout_url(request.order_id, amount_minor, &request.return_url)),
            status: PaymentStatus::Pending,
        })
    }

    #[instrument(skip_all)]
    async fn handle_callback(&self, payload: CallbackPayload) -> CallbackOutcome {
        if !basic_auth_matches(payload.authorization.as_deref(), AUTH_USER, &self.config.key) {
            warn!("payme call with invalid credentials");
            let id = serde_json::from_slice::<Value>(&payload.body)
                .ok()
                .and_then(|body| body.get("id").cloned())
                .unwrap_or(Value::Null);
            return CallbackOutcome::ack(rpc_error(id, &RpcError::INSUFFICIENT_PRIVILEGE));
        }

        let request: RpcRequest = match serde_json::from_slice(&payload.body) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "unparsable payme call");
                return CallbackOutcome::ack(rpc_error(Value::Null, &RpcError::PARSE));
            }
        };

        match self.dispatch(&request).await {
            Ok((result, captured)) => {
                let ack = json!({ "jsonrpc": "2.0", "id": request.id, "result": result });
                match captured {
                    Some(payment) => CallbackOutcome::captured(ack, &payment),
                    None => CallbackOutcome::ack(ack),
                }
            }
            Err(error) => {
                info!(method = %request.method, code = error.code, "payme call rejected");
                CallbackOutcome::ack(rpc_error(request.id, &error))
            }
        }
    }

    async fn refund(&self, payment_id: PaymentId, amount: Option<Decimal>) -> Result<RefundResult> {
        refund_through_provider(
            &self.ledger,
            self.provider.as_ref(),
            PaymentMethod::Payme,
            payment_id,
            amount,
            to_minor_units,
        )
        .await
    }
}
