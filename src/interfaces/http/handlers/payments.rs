use crate::application::gateway::CallbackPayload;
use crate::application::ledger::DateRange;
use crate::domain::order::OrderId;
use crate::domain::payment::PaymentMethod;
use crate::error::{EngineError, Result};
use crate::interfaces::http::handlers::optional_json;
use crate::interfaces::http::state::AppState;
use actix_web::http::header;
use actix_web::{HttpRequest, HttpResponse, web};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument};

#[derive(Debug, Default, Deserialize)]
pub struct RefundRequest {
    #[serde(default)]
    pub amount: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
}

/// Provider callbacks. Once the method is known the response is always `200` with the
/// provider's own ack body, whether the callback was accepted or rejected.
#[instrument(
    name = "handler::payment_callback",
    skip(app_state, req, body),
    fields(method = %method, bytes = body.len())
)]
pub async fn callback_handler(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    method: web::Path<String>,
    body: web::Bytes,
) -> Result<HttpResponse> {
    let method: PaymentMethod = method.parse()?;
    if !method.is_async() {
        return Err(EngineError::NotFound(format!(
            "{method} payments have no callback"
        )));
    }

    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(String::from);
    let payload = CallbackPayload {
        body: body.to_vec(),
        authorization,
    };

    let outcome = app_state
        .engine
        .orchestrator
        .handle_callback(method, payload)
        .await;
    if let Some(captured) = outcome.captured {
        info!(
            order_id = captured.order_id,
            payment_id = captured.payment_id,
            "callback captured payment"
        );
    }
    Ok(HttpResponse::Ok().json(outcome.ack))
}

/// An empty body refunds the full captured amount.
#[instrument(name = "handler::refund", skip(app_state, body))]
pub async fn refund_handler(
    app_state: web::Data<AppState>,
    order_id: web::Path<OrderId>,
    body: web::Bytes,
) -> Result<HttpResponse> {
    let RefundRequest { amount } = optional_json(&body)?;
    let result = app_state
        .engine
        .orchestrator
        .refund_order(order_id.into_inner(), amount)
        .await?;
    Ok(HttpResponse::Ok().json(result))
}

#[instrument(name = "handler::payment_stats", skip(app_state))]
pub async fn stats_handler(
    app_state: web::Data<AppState>,
    query: web::Query<StatsQuery>,
) -> Result<HttpResponse> {
    let range = DateRange {
        from: query.from,
        to: query.to,
    };
    let stats = app_state.engine.ledger.statistics(range).await?;
    Ok(HttpResponse::Ok().json(stats))
}

/// Landing page for customers coming back from a provider checkout.
pub async fn return_handler() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "received" }))
}
