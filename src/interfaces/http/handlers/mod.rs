use crate::error::{EngineError, Result};
use actix_web::web;
use serde::de::DeserializeOwned;

pub mod orders;
pub mod payments;

/// Parses an optional JSON body. Only an empty body falls back to the default; anything
/// else must deserialize.
pub(crate) fn optional_json<T: DeserializeOwned + Default>(body: &web::Bytes) -> Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| EngineError::InvalidArgument(format!("Invalid JSON body: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::http::handlers::payments::RefundRequest;
    use rust_decimal_macros::dec;

    #[test]
    fn test_optional_json() {
        let empty: RefundRequest = optional_json(&web::Bytes::from_static(b" \n")).unwrap();
        assert_eq!(empty.amount, None);

        let partial: RefundRequest =
            optional_json(&web::Bytes::from_static(br#"{"amount": "45000"}"#)).unwrap();
        assert_eq!(partial.amount, Some(dec!(45000)));

        let malformed = optional_json::<RefundRequest>(&web::Bytes::from_static(
            br#"{"amount": "45 000"}"#,
        ));
        assert!(matches!(malformed, Err(EngineError::InvalidArgument(_))));
    }
}
