//! Market data oracle
//!
//! Answers price, holder, volume and trending questions about launchpad
//! tokens. Anything it does not recognise is treated as a price lookup of the
//! whole message.
//!
//! Every successful lookup records a price point for the token, and the
//! periodic sweep records the largest tokens, so `history` has data even for
//! tokens nobody asked about yet.

use super::common::{self, meter, Metered};
use crate::agent::{Notification, Reply, Services, Skill, SkillError, SkillProfile, Turn};
use crate::gate::{QuotaLimits, QuotaTracker};
use crate::intent::{find_evm_address, IntentRules};
use crate::storage::{self, price_history_key};
use crate::upstream::{find_token, TokenSnapshot};
use crate::utils::{format_compact, format_price, short_address};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const SKILL_ID: &str = "market";
const QUOTA: QuotaLimits = QuotaLimits::new(50, None);
const TRENDING_COUNT: usize = 10;
const TRENDING_SCAN: usize = 50;
const HISTORY_MAX_POINTS: usize = 720;
const HISTORY_SHOWN: usize = 24;
const SWEEP_RECORDED: usize = 5;

const PROFILE: SkillProfile = SkillProfile {
    id: SKILL_ID,
    name: "Market Oracle",
    version: "1.0.0",
    description: "Live prices, holders and volume for launchpad tokens.",
    commands: &[
        "`price <token>` - price and market cap",
        "`holders <token>` - holder count",
        "`volume <token>` - 24h volume",
        "`trending` - top tokens by market cap",
        "`history <token>` - recorded price points",
        "`summary` - market overview",
        "`0x...` - full token details",
        "`status` - agent health",
    ],
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intent {
    Help,
    Status,
    Tokenize,
    Price,
    Holders,
    Volume,
    Trending,
    History,
    Summary,
    Detail,
    Greeting,
}

fn rules() -> IntentRules<Intent> {
    IntentRules::new(Intent::Price)
        .exact_any(&["help", "?", "commands"], Intent::Help)
        .exact_any(&["status", "stats", "health"], Intent::Status)
        .prefix_any(&["tokenize"], Intent::Tokenize)
        .any_of(&["price history", "history", "chart"], Intent::History)
        .any_of(
            &["market summary", "market overview", "summary", "overview"],
            Intent::Summary,
        )
        .any_of(&["price", "cost", "worth", "value of"], Intent::Price)
        .any_of(&["who holds", "holder count", "holders"], Intent::Holders)
        .any_of(&["trading volume", "volume", "traded"], Intent::Volume)
        .any_of(
            &["trending", "top tokens", "popular", "best performing"],
            Intent::Trending,
        )
        .when(|t| find_evm_address(t).is_some(), Intent::Detail)
        .short_greeting(Intent::Greeting)
}

/// One recorded price
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Token price
    pub price: f64,
    /// When it was seen
    pub at: DateTime<Utc>,
}

/// Market data skill
pub struct MarketSkill {
    services: Services,
    quota: QuotaTracker,
    rules: IntentRules<Intent>,
}

impl MarketSkill {
    /// Create the skill
    #[must_use]
    pub fn new(services: Services) -> Self {
        let quota = services.quota(SKILL_ID, QUOTA);
        Self {
            services,
            quota,
            rules: rules(),
        }
    }

    async fn lookup(&self, query: &str) -> Result<TokenSnapshot, Reply> {
        let query = query.trim().trim_end_matches('?').trim();
        if query.is_empty() {
            return Err(Reply::text(
                "Which token? Send a symbol, a name or an address (0x...).",
            ));
        }
        match find_token(self.services.market.as_ref(), query).await {
            Ok(Some(token)) => Ok(token),
            Ok(None) => Err(Reply::text(format!(
                "Token not found: {query}\nSay 'trending' to see available tokens."
            ))),
            Err(e) => {
                warn!(query, error = %e, "Market lookup failed");
                Err(Reply::text(
                    "Could not fetch market data right now. Please try again in a moment.",
                ))
            }
        }
    }

    async fn history(&self, address: &str) -> Result<Vec<PricePoint>, SkillError> {
        Ok(
            storage::load(self.services.store.as_ref(), &price_history_key(address))
                .await?
                .unwrap_or_default(),
        )
    }

    /// Append the token's current price to its history.
    async fn record_price(&self, token: &TokenSnapshot) -> Result<(), SkillError> {
        let Some(price) = token.price else {
            return Ok(());
        };
        let mut points = self.history(&token.address).await?;
        points.push(PricePoint {
            price,
            at: self.services.clock.now(),
        });
        if points.len() > HISTORY_MAX_POINTS {
            points.drain(..points.len() - HISTORY_MAX_POINTS);
        }
        storage::save(
            self.services.store.as_ref(),
            &price_history_key(&token.address),
            &points,
        )
        .await?;
        Ok(())
    }

    async fn history_text(&self, token: &TokenSnapshot) -> Result<String, SkillError> {
        let points = self.history(&token.address).await?;
        if points.len() < 2 {
            return Ok(format!(
                "No price history yet for {}. Check back later.",
                token.label()
            ));
        }
        let first = points[points.len().saturating_sub(HISTORY_SHOWN)].price;
        let last = points[points.len() - 1].price;
        let lines: Vec<String> = points
            .iter()
            .skip(points.len().saturating_sub(HISTORY_SHOWN))
            .map(|p| format!("{}: {}", p.at.format("%m-%d %H:%M"), format_price(p.price)))
            .collect();
        let change = if first > 0.0 {
            format!(" ({:+.2}%)", (last - first) / first * 100.0)
        } else {
            String::new()
        };
        Ok(format!(
            "**{} price history**{change}\n{}",
            token.label(),
            lines.join("\n")
        ))
    }

    async fn summary(&self) -> Reply {
        let tokens = match self.services.market.tokens(TRENDING_SCAN).await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(error = %e, "Token list unavailable");
                Vec::new()
            }
        };
        if tokens.is_empty() {
            return Reply::text("No market data available right now.");
        }

        let listed = tokens.iter().filter(|t| t.listed).count();
        let market_cap: f64 = tokens.iter().map(|t| t.market_cap).sum();
        let volume: f64 = tokens.iter().map(|t| t.volume_24h).sum();
        let mut text = format!(
            "**Market summary**\n\nTokens: {} ({listed} listed, {} on bonding curve)\nTotal market cap: {}\n24h volume: {}",
            tokens.len(),
            tokens.len() - listed,
            format_compact(market_cap),
            format_compact(volume)
        );
        if let Some(top) = tokens
            .iter()
            .filter(|t| t.volume_24h > 0.0)
            .max_by(|a, b| a.volume_24h.total_cmp(&b.volume_24h))
        {
            text.push_str(&format!(
                "\nMost traded: {} ({})",
                top.label(),
                format_compact(top.volume_24h)
            ));
        }
        Reply::text(text)
    }

    async fn trending(&self) -> Reply {
        let mut tokens = match self.services.market.tokens(TRENDING_SCAN).await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(error = %e, "Token list unavailable");
                Vec::new()
            }
        };
        if tokens.is_empty() {
            return Reply::text("No trending tokens found. The platform may be loading.");
        }
        tokens.sort_by(|a, b| b.market_cap.total_cmp(&a.market_cap));

        let lines: Vec<String> = tokens
            .iter()
            .take(TRENDING_COUNT)
            .enumerate()
            .map(|(i, t)| {
                format!(
                    "{}. {} - {} | mcap {}",
                    i + 1,
                    t.label(),
                    t.price.map_or_else(|| "n/a".to_string(), format_price),
                    format_compact(t.market_cap)
                )
            })
            .collect();
        Reply::text(format!("**Trending tokens:**\n{}", lines.join("\n")))
    }
}

fn price_text(token: &TokenSnapshot) -> String {
    let mut text = format!(
        "**{}**\n\nPrice: {}\nMarket cap: {}\nStatus: {}",
        token.label(),
        token.price.map_or_else(|| "n/a".to_string(), format_price),
        format_compact(token.market_cap),
        if token.listed {
            "Listed on DEX"
        } else {
            "Bonding curve"
        }
    );
    if let (false, Some(remaining)) = (token.listed, token.remaining_amount) {
        text.push_str(&format!("\nTokens remaining: {}", format_compact(remaining)));
    }
    text
}

fn detail_text(token: &TokenSnapshot) -> String {
    let created = token
        .created_at
        .map_or_else(|| "unknown".to_string(), |at| at.format("%Y-%m-%d").to_string());
    format!(
        "{}\nHolders: {}\n24h volume: {}\nLiquidity: {}\nCreated: {created}\nAddress: {}",
        price_text(token),
        token.holders,
        format_compact(token.volume_24h),
        format_compact(token.liquidity),
        short_address(&token.address)
    )
}

#[async_trait]
impl Skill for MarketSkill {
    fn profile(&self) -> &SkillProfile {
        &PROFILE
    }

    async fn handle(&self, turn: &Turn) -> Result<Reply, SkillError> {
        let classified = self.rules.classify(&turn.text);
        let metered = match classified.label {
            Intent::Help => return Ok(common::help(&PROFILE, &self.services, &turn.sender).await),
            Intent::Status => return common::status(&PROFILE, &self.services).await,
            Intent::Tokenize => {
                return Ok(common::tokenize(&PROFILE, &self.services, &turn.sender).await)
            }
            Intent::Greeting => return Ok(common::greeting(&PROFILE)),
            _ => meter(&self.services, &self.quota, &turn.sender).await?,
        };
        if let Metered::Rejected(reply) = metered {
            return Ok(reply);
        }
        common::bump_stat(self.services.store.as_ref(), SKILL_ID, "queries").await;

        let query = match classified.label {
            Intent::Trending => return Ok(self.trending().await),
            Intent::Summary => return Ok(self.summary().await),
            Intent::Detail => find_evm_address(&turn.text).unwrap_or_default(),
            _ => classified.argument,
        };
        let token = match self.lookup(&query).await {
            Ok(token) => token,
            Err(reply) => return Ok(reply),
        };

        if classified.label == Intent::History {
            return Ok(Reply::text(self.history_text(&token).await?));
        }
        if let Err(e) = self.record_price(&token).await {
            warn!(token = %token.address, error = %e, "Price history not recorded");
        }

        let text = match classified.label {
            Intent::Holders => format!("**{}** has {} holders.", token.label(), token.holders),
            Intent::Volume => format!(
                "**{}** 24h volume: {}",
                token.label(),
                format_compact(token.volume_24h)
            ),
            Intent::Detail => detail_text(&token),
            _ => price_text(&token),
        };
        Ok(Reply::text(text))
    }

    async fn sweep(&self) -> Result<Vec<Notification>, SkillError> {
        let mut tokens = match self.services.market.tokens(TRENDING_SCAN).await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(error = %e, "Price history sweep skipped");
                return Ok(Vec::new());
            }
        };
        tokens.sort_by(|a, b| b.market_cap.total_cmp(&a.market_cap));
        for token in tokens.iter().take(SWEEP_RECORDED) {
            self.record_price(token).await?;
        }
        debug!(count = tokens.len().min(SWEEP_RECORDED), "Recorded price history");
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, mock_generator, token, FakeMarket, TOKEN_ADDRESS};
    use chrono::Utc;
    use std::sync::Arc;
    use std::time::Duration;

    fn market() -> Arc<FakeMarket> {
        let mut alpha = token(TOKEN_ADDRESS, "Alpha", "ALP", 0.5);
        alpha.holders = 42;
        alpha.volume_24h = 12_500.0;
        alpha.market_cap = 1_000.0;
        let mut beta = token(
            "0xbeef000000000000000000000000000000000002",
            "Beta",
            "BET",
            2.0,
        );
        beta.market_cap = 5_000.0;
        beta.listed = true;
        Arc::new(FakeMarket::with_tokens(vec![alpha, beta]))
    }

    fn skill(market: Arc<FakeMarket>) -> MarketSkill {
        let (services, _) = testing::services(
            testing::premium_settings(),
            market,
            Arc::new(mock_generator("unused")),
        );
        MarketSkill::new(services)
    }

    async fn ask(skill: &MarketSkill, text: &str) -> Reply {
        skill
            .handle(&Turn::new("alice", text, Utc::now()))
            .await
            .expect("handle")
    }

    #[tokio::test]
    async fn test_price_holders_volume() {
        let skill = skill(market());

        let price = ask(&skill, "price of ALP").await;
        assert!(price.text.contains("Price: 0.5000"), "{}", price.text);
        assert!(price.text.contains("Bonding curve"));

        let holders = ask(&skill, "holders of alpha").await;
        assert_eq!(holders.text, "**Alpha (ALP)** has 42 holders.");

        let volume = ask(&skill, "volume ALP").await;
        assert!(volume.text.contains("12.5K"), "{}", volume.text);
    }

    #[tokio::test]
    async fn test_default_is_price_lookup() {
        let skill = skill(market());
        let reply = ask(&skill, "BET").await;
        assert!(reply.text.contains("Beta (BET)"));
        assert!(reply.text.contains("Listed on DEX"));
    }

    #[tokio::test]
    async fn test_trending_sorted_by_market_cap() {
        let skill = skill(market());
        let reply = ask(&skill, "trending").await;
        let beta = reply.text.find("1. Beta").expect("beta first");
        let alpha = reply.text.find("2. Alpha").expect("alpha second");
        assert!(beta < alpha);
    }

    #[tokio::test]
    async fn test_detail_by_address() {
        let skill = skill(market());
        let reply = ask(&skill, &format!("tell me about {TOKEN_ADDRESS}")).await;
        assert!(reply.text.contains("Holders: 42"), "{}", reply.text);
        assert!(reply.text.contains("0xabc00000...000001"));
    }

    #[tokio::test]
    async fn test_free_quota_is_fifty() {
        let skill = skill(market());
        for _ in 0..50 {
            assert!(!ask(&skill, "price ALP").await.end_session);
        }
        let rejected = ask(&skill, "price ALP").await;
        assert!(rejected.text.starts_with("Free limit reached (50/day)."));
        assert!(rejected.end_session);

        let help = ask(&skill, "help").await;
        assert!(help.text.contains("Market Oracle"));
    }

    #[tokio::test]
    async fn test_history_builds_from_lookups_and_sweeps() {
        let market = market();
        let (services, clock) = testing::services(
            testing::premium_settings(),
            market.clone(),
            Arc::new(mock_generator("unused")),
        );
        let skill = MarketSkill::new(services);

        let empty = ask(&skill, "history ALP").await;
        assert!(empty.text.starts_with("No price history yet for Alpha (ALP)"), "{}", empty.text);

        ask(&skill, "price ALP").await;
        clock.advance(Duration::from_secs(300));
        market.set_price(TOKEN_ADDRESS, 0.75);
        assert!(skill.sweep().await.expect("sweep").is_empty());

        let history = ask(&skill, "price history of ALP").await;
        assert!(history.text.contains("Alpha (ALP) price history** (+50.00%)"), "{}", history.text);
        assert!(history.text.contains("03-14 12:00: 0.5000"), "{}", history.text);
        assert!(history.text.contains("03-14 12:05: 0.7500"), "{}", history.text);

        let points = skill.history(TOKEN_ADDRESS).await.expect("history");
        assert_eq!(points.len(), 2);
    }

    #[tokio::test]
    async fn test_history_keeps_recent_points() {
        let skill = skill(market());
        for _ in 0..730 {
            skill.sweep().await.expect("sweep");
        }
        let points = skill.history(TOKEN_ADDRESS).await.expect("history");
        assert_eq!(points.len(), 720);

        let history = ask(&skill, "history ALP").await;
        assert_eq!(history.text.lines().count(), 25);
    }

    #[tokio::test]
    async fn test_market_summary() {
        let skill = skill(market());
        let reply = ask(&skill, "market summary").await;
        assert!(reply.text.contains("Tokens: 2 (1 listed, 1 on bonding curve)"), "{}", reply.text);
        assert!(reply.text.contains("Total market cap: 6.0K"), "{}", reply.text);
        assert!(reply.text.contains("Most traded: Alpha (ALP) (12.5K)"), "{}", reply.text);
    }

    #[tokio::test]
    async fn test_upstream_failure_degrades() {
        let market = market();
        market.fail_with(Some(crate::upstream::UpstreamError::Timeout));
        let skill = skill(market);
        assert!(ask(&skill, "trending").await.text.contains("No trending tokens"));
        assert!(skill.sweep().await.expect("sweep").is_empty());
        assert!(ask(&skill, "summary").await.text.contains("No market data"));
        assert!(ask(&skill, "price ALP")
            .await
            .text
            .contains("Could not fetch market data"));
    }
}
