use crate::interfaces::http::errors::invalid_input;
use crate::interfaces::http::handlers::{orders, payments};
use actix_web::{HttpResponse, web};

async fn health_check_handler() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

/// Registers every route; called from `main` and from the HTTP tests.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _| invalid_input(err)))
        .app_data(web::QueryConfig::default().error_handler(|err, _| invalid_input(err)))
        .app_data(web::PathConfig::default().error_handler(|err, _| invalid_input(err)))
        .route("/health", web::get().to(health_check_handler))
        .service(
            web::scope("/orders")
                .route("", web::post().to(orders::create_order_handler))
                .route("", web::get().to(orders::list_orders_handler))
                .route("/{order_id}", web::get().to(orders::get_order_handler))
                .route(
                    "/{order_id}/status",
                    web::patch().to(orders::update_status_handler),
                )
                .route(
                    "/{order_id}/cancel",
                    web::patch().to(orders::cancel_order_handler),
                )
                .route(
                    "/{order_id}/tracking",
                    web::post().to(orders::add_tracking_handler),
                )
                .route(
                    "/{order_id}/tracking",
                    web::get().to(orders::get_tracking_handler),
                )
                .route(
                    "/{order_id}/payments",
                    web::get().to(orders::order_payments_handler),
                )
                .route(
                    "/{order_id}/payments",
                    web::post().to(orders::process_payment_handler),
                ),
        )
        .service(
            web::scope("/payments")
                .route("/stats", web::get().to(payments::stats_handler))
                .route("/return", web::get().to(payments::return_handler))
                .route(
                    "/{method}/callback",
                    web::post().to(payments::callback_handler),
                )
                .route("/{order_id}/refund", web::post().to(payments::refund_handler)),
        );
}
