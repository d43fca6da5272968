//! Shared HTTP plumbing for the reqwest-backed clients.

use std::time::Duration;

use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use super::AiClientError;

/// Longest provider error message carried into an `Api` error.
const MAX_ERROR_MESSAGE: usize = 500;

pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client, AiClientError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AiClientError::Client(format!("Failed to create HTTP client: {e}")))
}

/// Translate a transport failure into the shared taxonomy.
pub(crate) fn transport_error(err: reqwest::Error, timeout: Duration) -> AiClientError {
    if err.is_timeout() {
        AiClientError::Timeout(timeout)
    } else if err.is_connect() {
        AiClientError::Connection(err.to_string())
    } else if err.is_decode() || err.is_body() {
        AiClientError::Response(err.to_string())
    } else {
        AiClientError::Client(err.to_string())
    }
}

/// Check the status and decode the body as `T`, keeping the raw JSON.
pub(crate) async fn read_json<T: DeserializeOwned>(
    response: Response,
    timeout: Duration,
) -> Result<(T, JsonValue), AiClientError> {
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        return Err(AiClientError::RateLimited { retry_after });
    }

    let body = response
        .text()
        .await
        .map_err(|e| transport_error(e, timeout))?;

    if !status.is_success() {
        return Err(AiClientError::Api {
            status: status.as_u16(),
            message: error_message(&body, status),
        });
    }

    if body.trim().is_empty() {
        return Err(AiClientError::Response("empty response body".to_string()));
    }

    let raw: JsonValue = serde_json::from_str(&body)
        .map_err(|e| AiClientError::Response(format!("invalid JSON body: {e}")))?;
    let parsed = serde_json::from_value(raw.clone())
        .map_err(|e| AiClientError::Response(format!("unexpected response shape: {e}")))?;

    Ok((parsed, raw))
}

/// Best human-readable message from an error body.
///
/// Understands `{"error": {"message": ..}}`, `{"error": ".."}` and
/// `{"message": ..}`; otherwise falls back to the body text.
fn error_message(body: &str, status: StatusCode) -> String {
    let from_json = serde_json::from_str::<JsonValue>(body).ok().and_then(|v| {
        v.pointer("/error/message")
            .or_else(|| v.get("error").filter(|e| e.is_string()))
            .or_else(|| v.get("message"))
            .and_then(JsonValue::as_str)
            .map(str::to_string)
    });

    let message = match from_json {
        Some(message) => message,
        None if body.trim().is_empty() => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
        None => body.trim().to_string(),
    };
    message.chars().take(MAX_ERROR_MESSAGE).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_shapes() {
        let status = StatusCode::BAD_REQUEST;
        assert_eq!(
            error_message(r#"{"error": {"type": "x", "message": "bad model"}}"#, status),
            "bad model"
        );
        assert_eq!(error_message(r#"{"error": "model not found"}"#, status), "model not found");
        assert_eq!(error_message(r#"{"message": "nope"}"#, status), "nope");
        assert_eq!(error_message("upstream exploded", status), "upstream exploded");
        assert_eq!(error_message("", StatusCode::UNAUTHORIZED), "Unauthorized");
    }
}
