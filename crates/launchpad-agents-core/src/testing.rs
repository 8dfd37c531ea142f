//! Testing helpers and fakes.
//!
//! Provides a scriptable market, mocked generators and a services builder
//! wired to an in-memory store and a manual clock.

use crate::agent::Services;
use crate::clock::ManualClock;
use crate::config::AgentSettings;
use crate::storage::MemoryStore;
use crate::upstream::inference::MockTextGenerator;
use crate::upstream::{
    MarketData, TextGenerator, TokenSnapshot, TokenizeRequest, TokenizeResponse, UpstreamError,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Address used by most skill tests
pub const TOKEN_ADDRESS: &str = "0xabc0000000000000000000000000000000000001";

/// Fixed start instant for manual clocks
#[must_use]
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Token snapshot with a name, symbol and price
#[must_use]
pub fn token(address: &str, name: &str, symbol: &str, price: f64) -> TokenSnapshot {
    TokenSnapshot {
        address: address.to_string(),
        name: name.to_string(),
        symbol: symbol.to_string(),
        price: Some(price),
        ..TokenSnapshot::default()
    }
}

/// In-memory [`MarketData`] whose contents tests can change between calls.
#[derive(Default)]
pub struct FakeMarket {
    tokens: Mutex<Vec<TokenSnapshot>>,
    balances: Mutex<HashMap<String, f64>>,
    agent_tokens: Mutex<HashMap<String, TokenSnapshot>>,
    fail: Mutex<Option<UpstreamError>>,
}

impl FakeMarket {
    /// Market listing `tokens`
    #[must_use]
    pub fn with_tokens(tokens: Vec<TokenSnapshot>) -> Self {
        Self {
            tokens: Mutex::new(tokens),
            ..Self::default()
        }
    }

    /// Change the price of the token at `address`
    pub fn set_price(&self, address: &str, price: f64) {
        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        for token in tokens.iter_mut().filter(|t| t.address == address) {
            token.price = Some(price);
        }
    }

    /// Change the 24h volume of the token at `address`
    pub fn set_volume(&self, address: &str, volume: f64) {
        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        for token in tokens.iter_mut().filter(|t| t.address == address) {
            token.volume_24h = volume;
        }
    }

    /// Set the premium-token balance of `holder`
    pub fn set_balance(&self, holder: &str, balance: f64) {
        self.balances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(holder.to_string(), balance);
    }

    /// Register `token` as deployed by `agent`
    pub fn set_agent_token(&self, agent: &str, token: TokenSnapshot) {
        self.agent_tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(agent.to_string(), token);
    }

    /// Make every call fail with `error` (or succeed again with `None`)
    pub fn fail_with(&self, error: Option<UpstreamError>) {
        *self.fail.lock().unwrap_or_else(PoisonError::into_inner) = error;
    }

    fn check(&self) -> Result<(), UpstreamError> {
        match self.fail.lock().unwrap_or_else(PoisonError::into_inner).clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl MarketData for FakeMarket {
    async fn token(&self, address: &str) -> Result<TokenSnapshot, UpstreamError> {
        self.check()?;
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|t| t.address.eq_ignore_ascii_case(address))
            .cloned()
            .ok_or(UpstreamError::Http {
                status: Some(404),
                message: "Token not found".to_string(),
            })
    }

    async fn tokens(&self, limit: usize) -> Result<Vec<TokenSnapshot>, UpstreamError> {
        self.check()?;
        let tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(tokens.iter().take(limit).cloned().collect())
    }

    async fn holder_balance(&self, _token: &str, holder: &str) -> Result<f64, UpstreamError> {
        self.check()?;
        Ok(self
            .balances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(holder)
            .copied()
            .unwrap_or(0.0))
    }

    async fn agent_token(&self, agent: &str) -> Result<Option<TokenSnapshot>, UpstreamError> {
        self.check()?;
        Ok(self
            .agent_tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(agent)
            .cloned())
    }

    async fn tokenize(&self, request: &TokenizeRequest) -> Result<TokenizeResponse, UpstreamError> {
        self.check()?;
        TokenizeResponse::from_value(json!({ "id": format!("tok-{}", request.symbol) }))
    }
}

/// Generator that always answers `text`
#[must_use]
pub fn mock_generator(text: &'static str) -> MockTextGenerator {
    let mut mock = MockTextGenerator::new();
    mock.expect_generate()
        .returning(move |_| Ok(text.to_string()));
    mock
}

/// Services over an in-memory store and a manual clock
#[must_use]
pub fn services(
    settings: AgentSettings,
    market: Arc<dyn MarketData>,
    generator: Arc<dyn TextGenerator>,
) -> (Services, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start_time()));
    let services = Services::new(
        settings,
        clock.clone(),
        Arc::new(MemoryStore::new()),
        market,
        generator,
    );
    (services, clock)
}

/// Settings with a premium token configured
#[must_use]
pub fn premium_settings() -> AgentSettings {
    AgentSettings {
        premium_token_address: Some("0xfee0000000000000000000000000000000000001".to_string()),
        premium_token_threshold: 1000.0,
        agent_ticker: "$WATCH".to_string(),
        ..AgentSettings::default()
    }
}
