//! HTTP helpers shared by every client.
//!
//! All providers should go through [`send_json`] rather than calling
//! `reqwest::RequestBuilder::send()` directly, so that status codes are
//! classified the same way everywhere (see
//! [`ProviderError::is_retryable`]) and transient transport failures get
//! the same bounded backoff.

use std::time::Duration;

use reqwest::StatusCode;

use crate::ProviderError;
use crate::service_registry::GeoService;

/// Default `User-Agent` header. Nominatim rejects requests without one.
pub const DEFAULT_USER_AGENT: &str = concat!("sitescore/", env!("CARGO_PKG_VERSION"));

/// Environment variable overriding [`DEFAULT_USER_AGENT`].
pub const USER_AGENT_ENV: &str = "SITESCORE_USER_AGENT";

/// Maximum length of the response body preview included in parse errors.
const BODY_PREVIEW_LEN: usize = 300;

/// Builds a client for `service`, honoring its timeout and the
/// `SITESCORE_USER_AGENT` override.
///
/// # Errors
///
/// Returns [`ProviderError::Http`] if the TLS backend cannot be
/// initialized.
pub fn client_for(service: &GeoService) -> Result<reqwest::Client, ProviderError> {
    let user_agent =
        std::env::var(USER_AGENT_ENV).unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string());
    Ok(reqwest::Client::builder()
        .user_agent(user_agent)
        .timeout(Duration::from_secs(service.timeout_secs))
        .build()?)
}

/// Sends a request and parses the body as JSON.
///
/// `build_request` is called once per attempt since builders are consumed
/// by `.send()`. Retryable failures are retried up to `max_retries` times
/// with exponential backoff (2s, 4s, 8s, ...). Most callers pass 0 and
/// leave retry policy to the layer above.
///
/// # Errors
///
/// Returns the classified [`ProviderError`] of the last attempt.
pub async fn send_json<F>(
    build_request: F,
    max_retries: u32,
) -> Result<serde_json::Value, ProviderError>
where
    F: Fn() -> reqwest::RequestBuilder + Send + Sync,
{
    let mut attempt = 0;
    loop {
        match send_once(&build_request).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_retries => {
                attempt += 1;
                let delay = Duration::from_secs(1u64 << attempt);
                log::warn!("  transient error: {e}; retry {attempt}/{max_retries} in {delay:?}...");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn send_once<F>(build_request: &F) -> Result<serde_json::Value, ProviderError>
where
    F: Fn() -> reqwest::RequestBuilder + Send + Sync,
{
    let response = build_request().send().await.map_err(classify_transport)?;
    check_status(response.status())?;

    let url = response.url().to_string();
    let text = response.text().await.map_err(classify_transport)?;
    serde_json::from_str(&text).map_err(|e| {
        let preview: String = text.chars().take(BODY_PREVIEW_LEN).collect();
        ProviderError::parse(format!("{e} (url: {url}, body: {preview})"))
    })
}

/// Maps a status code to an error. 2xx and 3xx pass.
///
/// # Errors
///
/// Returns [`ProviderError::RateLimited`] for 429 and
/// [`ProviderError::Status`] for any other 4xx/5xx.
pub fn check_status(status: StatusCode) -> Result<(), ProviderError> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ProviderError::RateLimited);
    }
    if status.is_client_error() || status.is_server_error() {
        return Err(ProviderError::Status {
            status: status.as_u16(),
        });
    }
    Ok(())
}

fn classify_transport(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Http(e)
    }
}

/// Reads a JSON value that may be a number or a numeric string (Socrata
/// and `ArcGIS` use both).
#[must_use]
pub fn as_f64_lenient(value: &serde_json::Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        .filter(|v: &f64| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_status_codes() {
        assert!(check_status(StatusCode::OK).is_ok());
        assert!(matches!(
            check_status(StatusCode::TOO_MANY_REQUESTS),
            Err(ProviderError::RateLimited)
        ));
        let server = check_status(StatusCode::BAD_GATEWAY).unwrap_err();
        assert!(server.is_retryable());
        let client = check_status(StatusCode::NOT_FOUND).unwrap_err();
        assert!(matches!(client, ProviderError::Status { status: 404 }));
        assert!(!client.is_retryable());
    }

    #[test]
    fn lenient_numbers() {
        assert_eq!(as_f64_lenient(&json!(12.5)), Some(12.5));
        assert_eq!(as_f64_lenient(&json!(" 300000 ")), Some(300_000.0));
        assert_eq!(as_f64_lenient(&json!("n/a")), None);
        assert_eq!(as_f64_lenient(&json!(null)), None);
    }
}
