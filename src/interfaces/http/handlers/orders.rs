use crate::application::aggregator::CreateOrderRequest;
use crate::application::orchestrator::PaymentExtra;
use crate::domain::order::{OrderId, OrderStatus, UserId};
use crate::domain::payment::PaymentMethod;
use crate::error::Result;
use crate::interfaces::http::handlers::optional_json;
use crate::interfaces::http::state::AppState;
use actix_web::{HttpResponse, web};
use serde::Deserialize;
use tracing::{info, instrument};

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    pub user_id: UserId,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TrackingRequest {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProcessPaymentRequest {
    pub method: String,
    #[serde(flatten)]
    pub extra: PaymentExtra,
}

#[instrument(
    name = "handler::create_order",
    skip(app_state, body),
    fields(user_id = body.user_id, items = body.items.len())
)]
pub async fn create_order_handler(
    app_state: web::Data<AppState>,
    body: web::Json<CreateOrderRequest>,
) -> Result<HttpResponse> {
    let engine = &app_state.engine;
    let order = engine.aggregator.create_order(body.into_inner()).await?;
    let details = engine.aggregator.get_order(order.id).await?;
    info!(order_id = order.id, order_number = %order.order_number, "order created");
    Ok(HttpResponse::Created().json(details))
}

#[instrument(name = "handler::get_order", skip(app_state))]
pub async fn get_order_handler(
    app_state: web::Data<AppState>,
    order_id: web::Path<OrderId>,
) -> Result<HttpResponse> {
    let details = app_state
        .engine
        .aggregator
        .get_order(order_id.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(details))
}

#[instrument(name = "handler::list_orders", skip(app_state))]
pub async fn list_orders_handler(
    app_state: web::Data<AppState>,
    query: web::Query<ListOrdersQuery>,
) -> Result<HttpResponse> {
    let orders = app_state.engine.aggregator.list_orders(query.user_id).await?;
    Ok(HttpResponse::Ok().json(orders))
}

#[instrument(name = "handler::update_status", skip(app_state, body), fields(status = %body.status))]
pub async fn update_status_handler(
    app_state: web::Data<AppState>,
    order_id: web::Path<OrderId>,
    body: web::Json<StatusUpdateRequest>,
) -> Result<HttpResponse> {
    let StatusUpdateRequest { status, reason } = body.into_inner();
    let target: OrderStatus = status.parse()?;
    let order = app_state
        .engine
        .state_machine
        .transition(order_id.into_inner(), target, reason)
        .await?;
    Ok(HttpResponse::Ok().json(order))
}

/// The body is optional; an empty request cancels without a reason.
#[instrument(name = "handler::cancel_order", skip(app_state, body))]
pub async fn cancel_order_handler(
    app_state: web::Data<AppState>,
    order_id: web::Path<OrderId>,
    body: web::Bytes,
) -> Result<HttpResponse> {
    let CancelRequest { reason } = optional_json(&body)?;
    let order = app_state
        .engine
        .state_machine
        .cancel(order_id.into_inner(), reason)
        .await?;
    Ok(HttpResponse::Ok().json(order))
}

#[instrument(name = "handler::add_tracking", skip(app_state, body))]
pub async fn add_tracking_handler(
    app_state: web::Data<AppState>,
    order_id: web::Path<OrderId>,
    body: web::Bytes,
) -> Result<HttpResponse> {
    let TrackingRequest {
        description,
        location,
    } = optional_json(&body)?;
    let entry = app_state
        .engine
        .state_machine
        .add_tracking(order_id.into_inner(), description, location)
        .await?;
    Ok(HttpResponse::Created().json(entry))
}

#[instrument(name = "handler::get_tracking", skip(app_state))]
pub async fn get_tracking_handler(
    app_state: web::Data<AppState>,
    order_id: web::Path<OrderId>,
) -> Result<HttpResponse> {
    let entries = app_state
        .engine
        .state_machine
        .tracking(order_id.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(entries))
}

#[instrument(name = "handler::order_payments", skip(app_state))]
pub async fn order_payments_handler(
    app_state: web::Data<AppState>,
    order_id: web::Path<OrderId>,
) -> Result<HttpResponse> {
    let order_id = order_id.into_inner();
    app_state.engine.ledger.order(order_id).await?;
    let payments = app_state.engine.orchestrator.payments(order_id).await?;
    Ok(HttpResponse::Ok().json(payments))
}

#[instrument(name = "handler::process_payment", skip(app_state, body), fields(method = %body.method))]
pub async fn process_payment_handler(
    app_state: web::Data<AppState>,
    order_id: web::Path<OrderId>,
    body: web::Json<ProcessPaymentRequest>,
) -> Result<HttpResponse> {
    let ProcessPaymentRequest { method, extra } = body.into_inner();
    let method: PaymentMethod = method.parse()?;
    let result = app_state
        .engine
        .orchestrator
        .process_payment(order_id.into_inner(), method, extra)
        .await?;
    Ok(HttpResponse::Created().json(result))
}
