//! Text-generation client and prompt cache
//!
//! `POST {base}/models/{model}` with `{inputs, parameters}`; the response is
//! either `[{"generated_text": ...}]` or `{"generated_text": ...}`.

use super::http::{create_http_client, post_json};
use super::UpstreamError;
use crate::cache::TtlCache;
use crate::clock::Clock;
use crate::config::{
    get_inference_http_timeout_secs, AgentSettings, INFERENCE_MAX_NEW_TOKENS,
    INFERENCE_TEMPERATURE, RESPONSE_CACHE_MAX_SIZE, RESPONSE_CACHE_TTL_SECS,
};
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Text generation backend
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a completion for `prompt`
    async fn generate(&self, prompt: &str) -> Result<String, UpstreamError>;
}

/// HTTP client for a hosted inference endpoint
pub struct InferenceClient {
    http: HttpClient,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl InferenceClient {
    /// Create a client for `model` served under `base_url`
    #[must_use]
    pub fn new(base_url: &str, model: &str, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            http: create_http_client(timeout),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
        }
    }

    /// Create a client from agent settings
    #[must_use]
    pub fn from_settings(settings: &AgentSettings) -> Self {
        Self::new(
            &settings.inference_api_url,
            &settings.inference_model,
            settings.huggingface_api_key.clone(),
            Duration::from_secs(get_inference_http_timeout_secs()),
        )
    }
}

#[async_trait]
impl TextGenerator for InferenceClient {
    async fn generate(&self, prompt: &str) -> Result<String, UpstreamError> {
        let url = format!("{}/models/{}", self.base_url, self.model);
        let body = json!({
            "inputs": prompt,
            "parameters": {
                "max_new_tokens": INFERENCE_MAX_NEW_TOKENS,
                "temperature": INFERENCE_TEMPERATURE,
                "return_full_text": false,
            },
        });

        let auth = self.api_key.as_ref().map(|key| format!("Bearer {key}"));
        let headers: Vec<(&str, &str)> = auth
            .as_deref()
            .map(|value| vec![("Authorization", value)])
            .unwrap_or_default();

        let response = post_json(&self.http, &url, &body, &headers).await?;
        extract_generated_text(&response, prompt)
    }
}

/// Pulls `generated_text` out of an inference response.
///
/// An echoed prompt prefix is stripped.
///
/// # Errors
///
/// Returns `Http` for an `{"error": ...}` body and `Parse` for any other shape.
pub fn extract_generated_text(response: &Value, prompt: &str) -> Result<String, UpstreamError> {
    if let Some(error) = response.get("error") {
        return Err(UpstreamError::Http {
            status: None,
            message: error
                .as_str()
                .map_or_else(|| error.to_string(), ToString::to_string),
        });
    }

    let first = response.as_array().and_then(|items| items.first()).unwrap_or(response);
    let text = first
        .get("generated_text")
        .and_then(Value::as_str)
        .ok_or_else(|| UpstreamError::Parse("missing generated_text".to_string()))?;

    Ok(text.strip_prefix(prompt).unwrap_or(text).trim().to_string())
}

/// SHA-256 hex digest used as the completion cache key
#[must_use]
pub fn prompt_key(prompt: &str) -> String {
    format!("{:x}", Sha256::digest(prompt.as_bytes()))
}

/// Caching decorator for any [`TextGenerator`]
///
/// Completions are cached per prompt digest; empty completions are not.
pub struct CachedGenerator<G> {
    inner: G,
    cache: Mutex<TtlCache<String>>,
}

impl<G: TextGenerator> CachedGenerator<G> {
    /// Wrap `inner` with a completion cache driven by `clock`
    #[must_use]
    pub fn new(inner: G, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner,
            cache: Mutex::new(TtlCache::new(
                RESPONSE_CACHE_MAX_SIZE,
                Duration::from_secs(RESPONSE_CACHE_TTL_SECS),
                clock,
            )),
        }
    }
}

#[async_trait]
impl<G: TextGenerator> TextGenerator for CachedGenerator<G> {
    async fn generate(&self, prompt: &str) -> Result<String, UpstreamError> {
        let key = prompt_key(prompt);
        let cached = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key);
        if let Some(text) = cached {
            debug!("Completion cache hit");
            return Ok(text);
        }

        let text = self.inner.generate(prompt).await?;
        if !text.is_empty() {
            self.cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .set_default(key, text.clone());
        }
        Ok(text)
    }
}
