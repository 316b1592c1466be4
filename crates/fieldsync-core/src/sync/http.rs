//! HTTP adapter for the remote sync contract.
//!
//! JSON over POST with bearer auth against a central sync API. Transport
//! failures and 5xx/429 responses map to [`Error::TransientNetwork`] so the
//! engine reschedules them; other non-success statuses are terminal for the
//! item.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use super::remote::{PhotoAck, PhotoMeta, RecordAck, RemoteApi};
use crate::error::{Error, Result};
use crate::models::RecordKind;
use crate::util::{compact_text, is_http_url, normalize_text_option};

/// [`RemoteApi`] implementation backed by `reqwest`.
#[derive(Clone)]
pub struct HttpRemote {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRemote {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemote")
            .field("base_url", &self.base_url)
            .field("token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl HttpRemote {
    /// Build a client for an explicit API base URL and bearer token.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let token = token.into().trim().to_string();
        if token.is_empty() {
            return Err(Error::Validation("API token must not be empty".to_string()));
        }

        let client = reqwest::Client::builder()
            .build()
            .map_err(|error| Error::Validation(format!("failed to construct HTTP client: {error}")))?;

        Ok(Self {
            base_url,
            token,
            client,
        })
    }

    /// Returns the base URL this client was configured with.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_json<T>(&self, path: &str, body: &Value) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|error| Error::TransientNetwork(format!("request to {path} failed: {error}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        response
            .json::<T>()
            .await
            .map_err(|error| Error::Validation(format!("invalid response payload: {error}")))
    }
}

#[async_trait]
impl RemoteApi for HttpRemote {
    async fn sync_record(
        &self,
        kind: RecordKind,
        offline_id: &str,
        payload: &Value,
    ) -> Result<RecordAck> {
        let path = match kind {
            RecordKind::Assessment => "/v1/sync/assessments",
            RecordKind::Deficiency => "/v1/sync/deficiencies",
            RecordKind::Photo => {
                return Err(Error::Validation(
                    "photo records sync through sync_photo".to_string(),
                ))
            }
        };

        let body = serde_json::json!({
            "offline_id": offline_id,
            "payload": payload,
        });
        self.post_json(path, &body).await
    }

    async fn sync_photo(
        &self,
        offline_id: &str,
        encoded_payload: &str,
        meta: &PhotoMeta,
    ) -> Result<PhotoAck> {
        let body = serde_json::json!({
            "offline_id": offline_id,
            "data": encoded_payload,
            "meta": meta,
        });
        self.post_json("/v1/sync/photos", &body).await
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", compact_text(trimmed), status.as_u16())
    }
}

fn status_error(status: StatusCode, body: &str) -> Error {
    let message = parse_api_error(status, body);
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        Error::TransientNetwork(message)
    } else if status == StatusCode::CONFLICT {
        Error::Conflict(message)
    } else {
        Error::Validation(message)
    }
}

fn normalize_base_url(raw: String) -> Result<String> {
    let base_url = normalize_text_option(Some(raw))
        .ok_or_else(|| Error::Validation("API base URL must not be empty".to_string()))?;
    if is_http_url(&base_url) {
        Ok(base_url.trim_end_matches('/').to_string())
    } else {
        Err(Error::Validation(
            "API base URL must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn base_url_validation() {
        assert!(HttpRemote::new("", "token").is_err());
        assert!(HttpRemote::new("api.example.com", "token").is_err());
        assert!(HttpRemote::new("https://api.example.com/", "").is_err());

        let remote = HttpRemote::new("https://api.example.com/", "token").unwrap();
        assert_eq!(remote.base_url(), "https://api.example.com");
    }

    #[test]
    fn debug_redacts_the_token() {
        let remote = HttpRemote::new("https://api.example.com", "secret").unwrap();
        let debug = format!("{remote:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn status_codes_classify_retryability() {
        assert!(matches!(
            status_error(StatusCode::INTERNAL_SERVER_ERROR, ""),
            Error::TransientNetwork(_)
        ));
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, ""),
            Error::TransientNetwork(_)
        ));
        assert!(matches!(
            status_error(StatusCode::CONFLICT, ""),
            Error::Conflict(_)
        ));
        assert!(matches!(
            status_error(StatusCode::UNPROCESSABLE_ENTITY, ""),
            Error::Validation(_)
        ));
        assert!(!status_error(StatusCode::BAD_REQUEST, "").is_retryable());
    }

    #[test]
    fn api_errors_prefer_the_message_body() {
        let message = parse_api_error(
            StatusCode::BAD_REQUEST,
            r#"{"message": "missing project id"}"#,
        );
        assert_eq!(message, "missing project id (400)");

        let message = parse_api_error(StatusCode::BAD_GATEWAY, "");
        assert_eq!(message, "HTTP 502");
    }
}
