use crate::domain::money::Amount;
use crate::domain::order::OrderId;
use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type PaymentId = u64;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Click,
    Payme,
    Uzum,
    Card,
}

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 4] = [
        PaymentMethod::Click,
        PaymentMethod::Payme,
        PaymentMethod::Uzum,
        PaymentMethod::Card,
    ];

    /// Asynchronous methods are settled by a provider callback rather than the charge call.
    pub fn is_async(self) -> bool {
        !matches!(self, PaymentMethod::Card)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::Click => "CLICK",
            PaymentMethod::Payme => "PAYME",
            PaymentMethod::Uzum => "UZUM",
            PaymentMethod::Card => "CARD",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "CLICK" => Ok(PaymentMethod::Click),
            "PAYME" => Ok(PaymentMethod::Payme),
            "UZUM" => Ok(PaymentMethod::Uzum),
            "CARD" => Ok(PaymentMethod::Card),
            other => Err(EngineError::InvalidArgument(format!(
                "Unknown payment method '{other}'"
            ))),
        }
    }
}

/// Lifecycle of a ledger attempt. Also used for the order-level payment status.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
    PartiallyRefunded,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 5] = [
        PaymentStatus::Pending,
        PaymentStatus::Paid,
        PaymentStatus::Failed,
        PaymentStatus::Refunded,
        PaymentStatus::PartiallyRefunded,
    ];

    pub fn is_terminal(self) -> bool {
        self != PaymentStatus::Pending
    }

    /// Money was captured at some point: PAID or one of its refund derivatives.
    pub fn is_captured(self) -> bool {
        matches!(
            self,
            PaymentStatus::Paid | PaymentStatus::Refunded | PaymentStatus::PartiallyRefunded
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Refunded => "REFUNDED",
            PaymentStatus::PartiallyRefunded => "PARTIALLY_REFUNDED",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attempted charge for an order.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct OrderPayment {
    pub id: PaymentId,
    pub order_id: OrderId,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    /// Provider-assigned id, unique per method once bound.
    pub external_transaction_id: Option<String>,
    pub status: PaymentStatus,
    /// Last provider payload, kept verbatim for audit.
    pub gateway_response: Option<serde_json::Value>,
    pub refunded_amount: Option<Decimal>,
    pub paid_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of a refund applied to the ledger.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct RefundResult {
    pub payment_id: PaymentId,
    pub order_id: OrderId,
    pub refunded_amount: Decimal,
    pub status: PaymentStatus,
}

impl OrderPayment {
    pub fn new(
        id: PaymentId,
        order_id: OrderId,
        method: PaymentMethod,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            order_id,
            amount: amount.value(),
            payment_method: method,
            external_transaction_id: None,
            status: PaymentStatus::Pending,
            gateway_response: None,
            refunded_amount: None,
            paid_at: None,
            closed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attaches the provider transaction id to a pending attempt.
    ///
    /// Returns `false` when the same id was already bound.
    pub fn bind_external(&mut self, external_id: &str, now: DateTime<Utc>) -> Result<bool> {
        match self.external_transaction_id.as_deref() {
            Some(existing) if existing == external_id => Ok(false),
            Some(existing) => Err(EngineError::Conflict(format!(
                "Payment {} is bound to transaction {existing}",
                self.id
            ))),
            None => {
                if self.status != PaymentStatus::Pending {
                    return Err(EngineError::InvalidState(format!(
                        "Payment {} is already {}",
                        self.id, self.status
                    )));
                }
                self.external_transaction_id = Some(external_id.to_string());
                self.updated_at = now;
                Ok(true)
            }
        }
    }

    /// Applies a provider result.
    ///
    /// Returns `false` when the payment already holds `status` (replay).
    pub fn apply_result(
        &mut self,
        status: PaymentStatus,
        external_id: Option<&str>,
        raw: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if status == self.status {
            return Ok(false);
        }

        match (self.status, status) {
            (_, PaymentStatus::Pending) => Err(EngineError::InvalidArgument(
                "PENDING is not a payment result".to_string(),
            )),
            (PaymentStatus::Pending, PaymentStatus::Paid | PaymentStatus::Failed) => {
                if let Some(external_id) = external_id {
                    self.bind_external(external_id, now)?;
                }
                self.status = status;
                self.gateway_response = Some(raw);
                self.updated_at = now;
                if status == PaymentStatus::Paid {
                    self.paid_at = Some(now);
                } else {
                    self.closed_at = Some(now);
                }
                Ok(true)
            }
            (PaymentStatus::Paid, PaymentStatus::Refunded) => {
                self.refund(None, now)?;
                self.gateway_response = Some(raw);
                Ok(true)
            }
            (PaymentStatus::Paid, PaymentStatus::PartiallyRefunded) => {
                Err(EngineError::InvalidArgument(
                    "Partial refunds need an explicit amount".to_string(),
                ))
            }
            (current, requested) => Err(EngineError::InvalidState(format!(
                "Payment {} is {current}, cannot become {requested}",
                self.id
            ))),
        }
    }

    /// Refunds a captured payment, fully when `amount` is omitted or equals the captured amount.
    pub fn refund(&mut self, amount: Option<Decimal>, now: DateTime<Utc>) -> Result<RefundResult> {
        if self.status != PaymentStatus::Paid {
            return Err(EngineError::InvalidState(format!(
                "Payment {} is {}, only PAID payments can be refunded",
                self.id, self.status
            )));
        }

        let requested = amount.unwrap_or(self.amount);
        if requested <= Decimal::ZERO {
            return Err(EngineError::InvalidArgument(
                "Refund amount must be positive".to_string(),
            ));
        }
        if requested > self.amount {
            return Err(EngineError::InvalidArgument(format!(
                "Refund amount {requested} exceeds captured amount {}",
                self.amount
            )));
        }

        self.status = if requested == self.amount {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartiallyRefunded
        };
        self.refunded_amount = Some(requested);
        self.closed_at = Some(now);
        self.updated_at = now;

        Ok(RefundResult {
            payment_id: self.id,
            order_id: self.order_id,
            refunded_amount: requested,
            status: self.status,
        })
    }
}
