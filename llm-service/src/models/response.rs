//! Uniform result envelope shared by every operation.

use serde::{Deserialize, Serialize};

/// `{is_success, code, message, payload}`.
///
/// `payload` is present exactly when `is_success` holds, except for the
/// exhaustion signal of a chunk stream, which succeeds with code 204 and no
/// payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct Response<T> {
    pub is_success: bool,
    pub code: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<T>,
}

impl<T> Response<T> {
    pub fn ok(payload: T) -> Self {
        Self {
            is_success: true,
            code: 200,
            message: "OK".to_string(),
            payload: Some(payload),
        }
    }

    /// Success without a payload, e.g. the end of a chunk stream.
    pub fn empty(code: u16, message: impl Into<String>) -> Self {
        Self {
            is_success: true,
            code,
            message: message.into(),
            payload: None,
        }
    }

    pub fn fail(code: u16, message: impl Into<String>) -> Self {
        Self {
            is_success: false,
            code,
            message: message.into(),
            payload: None,
        }
    }

    /// Re-type a failed envelope. Any payload is discarded.
    pub fn cast<U>(self) -> Response<U> {
        Response {
            is_success: self.is_success,
            code: self.code,
            message: self.message,
            payload: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_serializes_without_payload() {
        let response: Response<String> = Response::fail(404, "missing");
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["is_success"], false);
        assert_eq!(json["code"], 404);
        assert!(json.get("payload").is_none());
    }

    #[test]
    fn success_round_trips_through_json() {
        let json = r#"{"is_success":true,"code":200,"message":"OK","payload":"42"}"#;
        let response: Response<String> = serde_json::from_str(json).unwrap();
        assert_eq!(response.payload.as_deref(), Some("42"));

        let exhausted: Response<String> =
            serde_json::from_str(r#"{"is_success":true,"code":204,"message":"done"}"#).unwrap();
        assert!(exhausted.is_success);
        assert!(exhausted.payload.is_none());
    }
}
