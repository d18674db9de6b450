//! Shared HTTP plumbing and error classification for networked backends.

use std::time::Duration;

use quarry_core::{QuarryError, Result};
use serde::de::DeserializeOwned;

pub(crate) fn build_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| QuarryError::Config(format!("failed to build HTTP client: {e}")))
}

/// Rate limits and server-side failures are worth retrying; other statuses are not.
pub fn classify_status(status: u16, body: &str) -> QuarryError {
    let body = body.trim();
    let message = if body.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {body}")
    };
    match status {
        408 | 429 | 500..=599 => QuarryError::TransientBackend(message),
        _ => QuarryError::Backend(message),
    }
}

/// Map a transport-level error onto the retry taxonomy.
pub fn classify_request_error(err: reqwest::Error) -> QuarryError {
    if err.is_timeout() || err.is_connect() {
        return QuarryError::TransientBackend(err.to_string());
    }
    if let Some(status) = err.status() {
        return classify_status(status.as_u16(), &err.to_string());
    }
    if err.is_decode() || err.is_body() {
        return QuarryError::Backend(format!("undecodable response: {err}"));
    }
    QuarryError::TransientBackend(err.to_string())
}

/// Send `request` and decode a JSON body, classifying every failure.
pub(crate) async fn send_json<T: DeserializeOwned>(request: reqwest::RequestBuilder) -> Result<T> {
    let response = request.send().await.map_err(classify_request_error)?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_status(status.as_u16(), &body));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| QuarryError::Backend(format!("undecodable response: {e}")))
}
