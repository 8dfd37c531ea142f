//! Token-launch / market-data client
//!
//! Wraps the launch platform's REST API:
//!
//! | call             | request                                  |
//! |------------------|------------------------------------------|
//! | `token`          | `GET /tokens/{address}`                  |
//! | `tokens`         | `GET /tokens?limit=N`                    |
//! | `holder_balance` | `GET /tokens/{token}/holders?holder=X`   |
//! | `agent_token`    | `GET /agents/token/{agent}`              |
//! | `tokenize`       | `POST /tokens/tokenize` (`X-API-Key`)    |

use super::http::{create_http_client, get_json, post_json};
use super::normalize::{normalize_holder_balance, normalize_token, normalize_token_list};
use super::{TokenSnapshot, UpstreamError};
use crate::cache::TtlCache;
use crate::clock::Clock;
use crate::config::{get_upstream_http_timeout_secs, AgentSettings, RESPONSE_CACHE_MAX_SIZE};
use async_trait::async_trait;
use lazy_regex::regex_is_match;
use reqwest::Client as HttpClient;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Seconds a token snapshot is cached
pub const TOKEN_CACHE_TTL_SECS: u64 = 60;
/// Seconds a token list is cached
pub const TOKEN_LIST_CACHE_TTL_SECS: u64 = 120;
/// Tokens scanned when resolving a symbol or name
pub const TOKEN_SEARCH_LIMIT: usize = 100;

/// Market data source
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Fetch one token by contract address
    async fn token(&self, address: &str) -> Result<TokenSnapshot, UpstreamError>;
    /// Fetch up to `limit` listed tokens
    async fn tokens(&self, limit: usize) -> Result<Vec<TokenSnapshot>, UpstreamError>;
    /// Balance of `token` held by `holder`
    async fn holder_balance(&self, token: &str, holder: &str) -> Result<f64, UpstreamError>;
    /// Token deployed by `agent`, if any
    async fn agent_token(&self, agent: &str) -> Result<Option<TokenSnapshot>, UpstreamError>;
    /// Create a token for an agent
    async fn tokenize(&self, request: &TokenizeRequest) -> Result<TokenizeResponse, UpstreamError>;
}

/// Token creation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenizeRequest {
    /// Address of the agent the token represents
    pub agent_address: String,
    /// Token name
    pub name: String,
    /// Ticker symbol
    pub symbol: String,
    /// Short description
    pub description: String,
    /// Logo URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Target chain id
    pub chain_id: u64,
}

/// Token creation result
#[derive(Debug, Clone, PartialEq)]
pub struct TokenizeResponse {
    /// Platform id of the pending token, used in the handoff link
    pub token_id: String,
    /// Raw response body
    pub raw: Value,
}

impl TokenizeResponse {
    /// Extracts the token id from `id`, `tokenId` or `token_id`, optionally
    /// wrapped in `data`.
    ///
    /// # Errors
    ///
    /// Returns `Parse` if no id is present.
    pub fn from_value(raw: Value) -> Result<Self, UpstreamError> {
        let inner = raw.get("data").filter(|d| d.is_object()).unwrap_or(&raw);
        let token_id = ["id", "tokenId", "token_id"]
            .iter()
            .find_map(|key| match inner.get(*key) {
                Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            })
            .ok_or_else(|| UpstreamError::Parse("tokenize response has no token id".into()))?;
        Ok(Self { token_id, raw })
    }
}

/// HTTP client for the launch platform
#[derive(Clone)]
pub struct LaunchpadClient {
    http: HttpClient,
    base_url: String,
    api_key: Option<String>,
}

impl LaunchpadClient {
    /// Create a client for `base_url`
    #[must_use]
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            http: create_http_client(timeout),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
        }
    }

    /// Create a client from agent settings
    #[must_use]
    pub fn from_settings(settings: &AgentSettings) -> Self {
        Self::new(
            &settings.agent_launch_api_url,
            settings.agent_launch_api_key.clone(),
            Duration::from_secs(get_upstream_http_timeout_secs()),
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[async_trait]
impl MarketData for LaunchpadClient {
    async fn token(&self, address: &str) -> Result<TokenSnapshot, UpstreamError> {
        let body = get_json(&self.http, &self.url(&format!("/tokens/{address}")), &[], &[]).await?;
        let mut token = normalize_token(&body)?;
        if token.address.is_empty() {
            token.address = address.to_string();
        }
        Ok(token)
    }

    async fn tokens(&self, limit: usize) -> Result<Vec<TokenSnapshot>, UpstreamError> {
        let body = get_json(
            &self.http,
            &self.url("/tokens"),
            &[("limit", limit.to_string())],
            &[],
        )
        .await?;
        let mut tokens = normalize_token_list(&body)?;
        tokens.truncate(limit);
        Ok(tokens)
    }

    async fn holder_balance(&self, token: &str, holder: &str) -> Result<f64, UpstreamError> {
        let body = get_json(
            &self.http,
            &self.url(&format!("/tokens/{token}/holders")),
            &[("holder", holder.to_string())],
            &[],
        )
        .await?;
        normalize_holder_balance(&body, holder)
    }

    async fn agent_token(&self, agent: &str) -> Result<Option<TokenSnapshot>, UpstreamError> {
        let body = match get_json(&self.http, &self.url(&format!("/agents/token/{agent}")), &[], &[])
            .await
        {
            Ok(body) => body,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        let success = body.get("success").and_then(Value::as_bool).unwrap_or(true);
        match body.get("data") {
            Some(data) if success && data.is_object() => Ok(Some(normalize_token(data)?)),
            _ => Ok(None),
        }
    }

    async fn tokenize(&self, request: &TokenizeRequest) -> Result<TokenizeResponse, UpstreamError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| UpstreamError::Http {
            status: None,
            message: "AGENT_LAUNCH_API_KEY is not set".to_string(),
        })?;
        let body =
            serde_json::to_value(request).map_err(|e| UpstreamError::Parse(e.to_string()))?;
        let response = post_json(
            &self.http,
            &self.url("/tokens/tokenize"),
            &body,
            &[("X-API-Key", api_key)],
        )
        .await?;
        TokenizeResponse::from_value(response)
    }
}

/// Caching decorator for any [`MarketData`]
///
/// Snapshots are cached for [`TOKEN_CACHE_TTL_SECS`], lists for
/// [`TOKEN_LIST_CACHE_TTL_SECS`]. Balances, agent lookups and tokenization
/// pass through.
pub struct CachedMarketData<M> {
    inner: M,
    tokens: Mutex<TtlCache<TokenSnapshot>>,
    lists: Mutex<TtlCache<Vec<TokenSnapshot>>>,
}

impl<M: MarketData> CachedMarketData<M> {
    /// Wrap `inner` with response caches driven by `clock`
    #[must_use]
    pub fn new(inner: M, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner,
            tokens: Mutex::new(TtlCache::new(
                RESPONSE_CACHE_MAX_SIZE,
                Duration::from_secs(TOKEN_CACHE_TTL_SECS),
                clock.clone(),
            )),
            lists: Mutex::new(TtlCache::new(
                16,
                Duration::from_secs(TOKEN_LIST_CACHE_TTL_SECS),
                clock,
            )),
        }
    }
}

#[async_trait]
impl<M: MarketData> MarketData for CachedMarketData<M> {
    async fn token(&self, address: &str) -> Result<TokenSnapshot, UpstreamError> {
        let key = address.to_lowercase();
        let cached = self
            .tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key);
        if let Some(token) = cached {
            debug!(address = %address, "Token cache hit");
            return Ok(token);
        }

        let token = self.inner.token(address).await?;
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_default(key, token.clone());
        Ok(token)
    }

    async fn tokens(&self, limit: usize) -> Result<Vec<TokenSnapshot>, UpstreamError> {
        let key = limit.to_string();
        let cached = self
            .lists
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key);
        if let Some(tokens) = cached {
            return Ok(tokens);
        }

        let tokens = self.inner.tokens(limit).await?;
        self.lists
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_default(key, tokens.clone());
        Ok(tokens)
    }

    async fn holder_balance(&self, token: &str, holder: &str) -> Result<f64, UpstreamError> {
        self.inner.holder_balance(token, holder).await
    }

    async fn agent_token(&self, agent: &str) -> Result<Option<TokenSnapshot>, UpstreamError> {
        self.inner.agent_token(agent).await
    }

    async fn tokenize(&self, request: &TokenizeRequest) -> Result<TokenizeResponse, UpstreamError> {
        self.inner.tokenize(request).await
    }
}

/// Returns `true` for a `0x`-prefixed 20-byte hex address.
#[must_use]
pub fn is_evm_address(text: &str) -> bool {
    regex_is_match!(r"^0x[a-fA-F0-9]{40}$", text)
}

/// Resolves a user-supplied token reference.
///
/// Order: contract address, exact symbol (with or without `$`), exact name,
/// then first substring match on name or symbol. A 404 for an address is
/// `Ok(None)`.
///
/// # Errors
///
/// Propagates upstream failures other than 404.
pub async fn find_token(
    market: &dyn MarketData,
    query: &str,
) -> Result<Option<TokenSnapshot>, UpstreamError> {
    let query = query.trim();
    if query.is_empty() {
        return Ok(None);
    }

    if is_evm_address(query) {
        return match market.token(query).await {
            Ok(token) => Ok(Some(token)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        };
    }

    let needle = query.trim_start_matches('$').to_lowercase();
    let tokens = market.tokens(TOKEN_SEARCH_LIMIT).await?;

    let exact = tokens
        .iter()
        .find(|t| t.symbol.trim_start_matches('$').to_lowercase() == needle)
        .or_else(|| tokens.iter().find(|t| t.name.to_lowercase() == needle));
    if let Some(token) = exact {
        return Ok(Some(token.clone()));
    }

    Ok(tokens
        .iter()
        .find(|t| {
            t.name.to_lowercase().contains(&needle) || t.symbol.to_lowercase().contains(&needle)
        })
        .cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Utc;
    use serde_json::json;

    fn snapshot(address: &str, name: &str, symbol: &str) -> TokenSnapshot {
        TokenSnapshot {
            address: address.to_string(),
            name: name.to_string(),
            symbol: symbol.to_string(),
            price: Some(1.0),
            ..TokenSnapshot::default()
        }
    }

    #[tokio::test]
    async fn test_cached_market_data_hits_inner_once_per_ttl() {
        let mut mock = MockMarketData::new();
        mock.expect_token()
            .times(2)
            .returning(|address| Ok(snapshot(address, "Alpha", "ALP")));

        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cached = CachedMarketData::new(mock, clock.clone());

        let address = "0x1111111111111111111111111111111111111111";
        cached.token(address).await.expect("first fetch");
        cached.token(address).await.expect("cache hit");

        clock.advance(Duration::from_secs(TOKEN_CACHE_TTL_SECS));
        cached.token(address).await.expect("refetch after expiry");
    }

    #[tokio::test]
    async fn test_cached_market_data_does_not_cache_errors() {
        let mut mock = MockMarketData::new();
        mock.expect_tokens()
            .times(2)
            .returning(|_| Err(UpstreamError::Timeout));

        let cached = CachedMarketData::new(mock, Arc::new(ManualClock::new(Utc::now())));
        assert!(cached.tokens(10).await.is_err());
        assert!(cached.tokens(10).await.is_err());
    }

    #[tokio::test]
    async fn test_find_token_by_symbol_then_name_then_substring() {
        let mut mock = MockMarketData::new();
        mock.expect_tokens().returning(|_| {
            Ok(vec![
                snapshot("0x01", "Alphabet Soup", "SOUP"),
                snapshot("0x02", "Alpha", "ALP"),
                snapshot("0x03", "Watcher", "WATCH"),
            ])
        });

        let address_of = |token: Option<TokenSnapshot>| token.map(|t| t.address);

        let watch = find_token(&mock, "$watch").await.expect("lookup");
        assert_eq!(address_of(watch), Some("0x03".to_string()));
        let alpha = find_token(&mock, "alpha").await.expect("lookup");
        assert_eq!(address_of(alpha), Some("0x02".to_string()));
        let soup = find_token(&mock, "soup").await.expect("lookup");
        assert_eq!(address_of(soup), Some("0x01".to_string()));
        let partial = find_token(&mock, "alph").await.expect("lookup");
        assert_eq!(address_of(partial), Some("0x01".to_string()));
        assert!(find_token(&mock, "zzz").await.expect("lookup").is_none());
    }

    #[tokio::test]
    async fn test_find_token_address_404_is_none() {
        let mut mock = MockMarketData::new();
        mock.expect_token().returning(|_| {
            Err(UpstreamError::Http {
                status: Some(404),
                message: "not found".into(),
            })
        });

        let result = find_token(&mock, "0x2222222222222222222222222222222222222222").await;
        assert_eq!(result, Ok(None));
    }

    #[test]
    fn test_tokenize_response_id_shapes() {
        let numeric = TokenizeResponse::from_value(json!({"success": true, "data": {"id": 42}}))
            .expect("id");
        assert_eq!(numeric.token_id, "42");

        let string = TokenizeResponse::from_value(json!({"tokenId": "abc"})).expect("id");
        assert_eq!(string.token_id, "abc");

        assert!(TokenizeResponse::from_value(json!({"ok": true})).is_err());
    }

    #[test]
    fn test_tokenize_request_wire_shape() {
        let request = TokenizeRequest {
            agent_address: "agent1qxyz".into(),
            name: "Watcher".into(),
            symbol: "WATCH".into(),
            description: "Price alerts".into(),
            image: None,
            chain_id: 97,
        };
        assert_eq!(
            serde_json::to_value(&request).expect("serialize"),
            json!({
                "agentAddress": "agent1qxyz",
                "name": "Watcher",
                "symbol": "WATCH",
                "description": "Price alerts",
                "chainId": 97
            })
        );
    }
}
