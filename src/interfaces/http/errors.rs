use crate::error::EngineError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;

impl ResponseError for EngineError {
    fn status_code(&self) -> StatusCode {
        match self {
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::InvalidState(_)
            | EngineError::InvalidTransition { .. }
            | EngineError::Conflict(_)
            | EngineError::DuplicateOrderNumber(_) => StatusCode::CONFLICT,
            EngineError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            EngineError::SignatureInvalid => StatusCode::UNAUTHORIZED,
            EngineError::Upstream(_) => StatusCode::BAD_GATEWAY,
            EngineError::Config(_)
            | EngineError::CsvError(_)
            | EngineError::IoError(_)
            | EngineError::Serialization(_)
            | EngineError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Responding with error");
        } else {
            tracing::warn!(error = %self, "Request rejected");
        }

        // Storage and configuration details stay in the logs.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        };
        HttpResponse::build(status).json(json!({ "error": message }))
    }
}

/// Turns extractor failures (bad JSON, bad query, bad path) into `InvalidArgument`.
pub fn invalid_input(err: impl std::fmt::Display) -> actix_web::Error {
    EngineError::InvalidArgument(err.to_string()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::OrderStatus;
    use actix_web::body::to_bytes;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            EngineError::NotFound("Order 1".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            EngineError::InvalidTransition {
                from: OrderStatus::Delivered,
                to: OrderStatus::Pending,
            }
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            EngineError::InvalidArgument("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            EngineError::Upstream("down".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[actix_web::test]
    async fn test_internal_details_are_hidden() {
        let response = EngineError::Config("PAYME_KEY=secret".into()).error_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(response.into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"], "An internal error occurred");
    }

    #[actix_web::test]
    async fn test_client_errors_carry_message() {
        let response = EngineError::NotFound("Order 9".into()).error_response();
        let body = to_bytes(response.into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"], "Not found: Order 9");
    }
}
