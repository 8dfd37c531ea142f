//! HTTP utilities for upstream clients
//!
//! Provides common request/response handling so every client maps transport
//! failures, error statuses and malformed bodies the same way.

use super::UpstreamError;
use crate::utils::truncate_str;
use reqwest::{Client as HttpClient, RequestBuilder, Response};
use serde_json::Value;
use std::time::Duration;

const MAX_ERROR_BODY_CHARS: usize = 500;

/// Creates an HTTP client with the given request timeout.
#[must_use]
pub fn create_http_client(timeout: Duration) -> HttpClient {
    HttpClient::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| HttpClient::new())
}

/// Sends a GET request and returns the parsed JSON body.
///
/// # Errors
///
/// Returns `Timeout` when the client timeout elapses, `Http` on connection
/// failures or non-success statuses, and `Parse` if the body is not JSON.
pub async fn get_json(
    client: &HttpClient,
    url: &str,
    query: &[(&str, String)],
    headers: &[(&str, &str)],
) -> Result<Value, UpstreamError> {
    let request = with_headers(client.get(url).query(query), headers);
    send(request).await
}

/// Sends a POST request with a JSON body and returns the parsed JSON body.
///
/// # Errors
///
/// Same mapping as [`get_json`].
pub async fn post_json(
    client: &HttpClient,
    url: &str,
    body: &Value,
    headers: &[(&str, &str)],
) -> Result<Value, UpstreamError> {
    let request = with_headers(client.post(url).json(body), headers);
    send(request).await
}

fn with_headers(mut request: RequestBuilder, headers: &[(&str, &str)]) -> RequestBuilder {
    for (key, value) in headers {
        request = request.header(*key, *value);
    }
    request
}

async fn send(request: RequestBuilder) -> Result<Value, UpstreamError> {
    let response = request.send().await.map_err(map_transport_error)?;
    read_json(response).await
}

async fn read_json(response: Response) -> Result<Value, UpstreamError> {
    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        return Err(UpstreamError::Http {
            status: Some(status.as_u16()),
            message: summarize_error_body(&error_text),
        });
    }

    let body = response.text().await.map_err(map_transport_error)?;
    serde_json::from_str(&body).map_err(|e| UpstreamError::Parse(e.to_string()))
}

/// Maps a reqwest failure onto the upstream error kinds.
#[must_use]
pub fn map_transport_error(e: reqwest::Error) -> UpstreamError {
    if e.is_timeout() {
        return UpstreamError::Timeout;
    }
    if e.is_decode() {
        return UpstreamError::Parse(e.to_string());
    }
    UpstreamError::Http {
        status: e.status().map(|s| s.as_u16()),
        message: e.to_string(),
    }
}

/// Drops HTML error pages from proxies and truncates long bodies.
#[must_use]
pub fn summarize_error_body(error_text: &str) -> String {
    let trimmed = error_text.trim_start();
    let is_html = trimmed.starts_with("<!DOCTYPE")
        || trimmed.starts_with("<html")
        || trimmed.starts_with("<HTML");

    if is_html {
        return "Server returned HTML error page".to_string();
    }
    if error_text.chars().count() > MAX_ERROR_BODY_CHARS {
        return format!(
            "{}... (truncated)",
            truncate_str(error_text, MAX_ERROR_BODY_CHARS)
        );
    }
    error_text.to_string()
}
