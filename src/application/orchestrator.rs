use crate::application::gateway::{
    CallbackOutcome, CallbackPayload, GatewayAdapter, PaymentRequest,
};
use crate::application::ledger::PaymentLedger;
use crate::application::state_machine::OrderStateMachine;
use crate::domain::order::{OrderId, OrderStatus};
use crate::domain::payment::{OrderPayment, PaymentId, PaymentMethod, PaymentStatus, RefundResult};
use crate::error::{EngineError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// One adapter per payment method; dispatch is a `match` on the method.
#[derive(Clone)]
pub struct GatewaySet {
    click: Arc<dyn GatewayAdapter>,
    payme: Arc<dyn GatewayAdapter>,
    uzum: Arc<dyn GatewayAdapter>,
    card: Arc<dyn GatewayAdapter>,
}

impl GatewaySet {
    pub fn new(
        click: Arc<dyn GatewayAdapter>,
        payme: Arc<dyn GatewayAdapter>,
        uzum: Arc<dyn GatewayAdapter>,
        card: Arc<dyn GatewayAdapter>,
    ) -> Self {
        Self {
            click,
            payme,
            uzum,
            card,
        }
    }

    pub fn adapter(&self, method: PaymentMethod) -> &dyn GatewayAdapter {
        match method {
            PaymentMethod::Click => self.click.as_ref(),
            PaymentMethod::Payme => self.payme.as_ref(),
            PaymentMethod::Uzum => self.uzum.as_ref(),
            PaymentMethod::Card => self.card.as_ref(),
        }
    }
}

/// Caller-supplied options for a payment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentExtra {
    pub return_url: Option<String>,
    pub cancel_url: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentResult {
    pub order_id: OrderId,
    pub payment_id: PaymentId,
    pub method: PaymentMethod,
    pub payment_url: Option<String>,
    pub payment_status: PaymentStatus,
    pub order_payment_status: PaymentStatus,
}

/// Entry point for payments: picks the adapter and keeps the ledger and the order in step.
pub struct PaymentOrchestrator {
    ledger: Arc<PaymentLedger>,
    state_machine: Arc<OrderStateMachine>,
    gateways: GatewaySet,
    default_return_url: String,
}

impl PaymentOrchestrator {
    pub fn new(
        ledger: Arc<PaymentLedger>,
        state_machine: Arc<OrderStateMachine>,
        gateways: GatewaySet,
        default_return_url: impl Into<String>,
    ) -> Self {
        Self {
            ledger,
            state_machine,
            gateways,
            default_return_url: default_return_url.into(),
        }
    }

    #[instrument(skip(self, extra))]
    pub async fn process_payment(
        &self,
        order_id: OrderId,
        method: PaymentMethod,
        extra: PaymentExtra,
    ) -> Result<PaymentResult> {
        let order = self.ledger.order(order_id).await?;
        if order.payment_status == PaymentStatus::Paid {
            return Err(EngineError::InvalidState(format!(
                "Order {order_id} is already paid"
            )));
        }

        let request = PaymentRequest {
            order_id,
            amount: order.final_amount,
            return_url: extra
                .return_url
                .unwrap_or_else(|| self.default_return_url.clone()),
            cancel_url: extra.cancel_url,
            description: extra
                .description
                .or_else(|| Some(format!("Order {}", order.order_number))),
        };
        let session = self.gateways.adapter(method).create_payment(request).await?;

        // Synchronous methods have already settled the ledger, and with it the order.
        let order = self.ledger.order(order_id).await?;
        info!(
            order_id,
            payment_id = session.payment_id,
            %method,
            status = %session.status,
            "payment initiated"
        );
        Ok(PaymentResult {
            order_id,
            payment_id: session.payment_id,
            method,
            payment_url: session.payment_url,
            payment_status: session.status,
            order_payment_status: order.payment_status,
        })
    }

    /// Applies a provider callback and confirms the order when it captured a payment.
    #[instrument(skip(self, payload), fields(bytes = payload.body.len()))]
    pub async fn handle_callback(
        &self,
        method: PaymentMethod,
        payload: CallbackPayload,
    ) -> CallbackOutcome {
        let outcome = self.gateways.adapter(method).handle_callback(payload).await;

        if let Some(captured) = outcome.captured {
            let reason = format!("Payment {} captured via {method}", captured.payment_id);
            match self
                .state_machine
                .advance_if(
                    captured.order_id,
                    OrderStatus::Pending,
                    OrderStatus::Confirmed,
                    Some(reason),
                )
                .await
            {
                Ok(Some(_)) => {}
                Ok(None) => warn!(
                    order_id = captured.order_id,
                    payment_id = captured.payment_id,
                    "payment captured for an order that is no longer pending"
                ),
                Err(e) => error!(
                    order_id = captured.order_id,
                    error = %e,
                    "failed to confirm order after payment"
                ),
            }
        }
        outcome
    }

    pub async fn refund_payment(
        &self,
        payment_id: PaymentId,
        amount: Option<Decimal>,
    ) -> Result<RefundResult> {
        let payment = self.ledger.payment(payment_id).await?;
        self.gateways
            .adapter(payment.payment_method)
            .refund(payment_id, amount)
            .await
    }

    /// Refunds the captured payment of an order. The order status is left as is.
    #[instrument(skip(self))]
    pub async fn refund_order(
        &self,
        order_id: OrderId,
        amount: Option<Decimal>,
    ) -> Result<RefundResult> {
        self.ledger.order(order_id).await?;
        let payment = self
            .ledger
            .captured_payment(order_id)
            .await?
            .ok_or_else(|| {
                EngineError::InvalidState(format!("Order {order_id} has no captured payment"))
            })?;
        self.refund_payment(payment.id, amount).await
    }

    pub async fn payments(&self, order_id: OrderId) -> Result<Vec<OrderPayment>> {
        self.ledger.payments_for_order(order_id).await
    }
}
