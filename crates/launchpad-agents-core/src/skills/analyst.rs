//! Token scoring engine
//!
//! Each token is scored on five dimensions normalized to 0-100 over fixed
//! empirical ranges, combined with fixed weights and mapped to a letter
//! grade. Scoring is a pure function of the snapshot and the evaluation time.

use super::common::{self, meter, Metered};
use crate::agent::{Reply, Services, Skill, SkillError, SkillProfile, Turn};
use crate::gate::{QuotaLimits, QuotaTracker};
use crate::intent::{first_number, IntentRules};
use crate::upstream::{find_token, TokenSnapshot};
use crate::utils::format_compact;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tracing::warn;

const SKILL_ID: &str = "analyst";
const QUOTA: QuotaLimits = QuotaLimits::new(20, None);

const DEFAULT_RANK_COUNT: usize = 10;
const RANK_SCAN: usize = 50;

/// Dimension weights, summing to 1.0
pub const WEIGHTS: Weights = Weights {
    holders: 0.30,
    volume: 0.25,
    liquidity: 0.20,
    price_stability: 0.15,
    age: 0.10,
};

const HOLDERS_RANGE: (f64, f64) = (0.0, 200.0);
const VOLUME_RANGE: (f64, f64) = (0.0, 10_000.0);
const LIQUIDITY_RANGE: (f64, f64) = (0.0, 30_000.0);
const AGE_DAYS_RANGE: (f64, f64) = (0.0, 30.0);
const PRICED_STABILITY: f64 = 50.0;

const PROFILE: SkillProfile = SkillProfile {
    id: SKILL_ID,
    name: "Token Analyst",
    version: "1.0.0",
    description: "Scores launchpad tokens on holders, volume, liquidity, stability and age.",
    commands: &[
        "`score <token>` - multi-dimensional score",
        "`evaluate <token>` - same as score",
        "`rank [N]` - top N tokens by score (default 10)",
        "`weights` - scoring weights",
        "`status` - agent health",
    ],
};

/// Per-dimension values (weights or scores)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Weights {
    /// Holder count
    pub holders: f64,
    /// 24h volume
    pub volume: f64,
    /// Liquidity
    pub liquidity: f64,
    /// Whether the token has a price at all
    pub price_stability: f64,
    /// Days since creation
    pub age: f64,
}

impl Weights {
    /// `(name, value)` pairs in display order
    #[must_use]
    pub fn entries(&self) -> [(&'static str, f64); 5] {
        [
            ("holders", self.holders),
            ("volume", self.volume),
            ("liquidity", self.liquidity),
            ("price_stability", self.price_stability),
            ("age", self.age),
        ]
    }

    fn weighted_sum(&self, weights: &Self) -> f64 {
        self.entries()
            .iter()
            .zip(weights.entries())
            .map(|((_, score), (_, weight))| score * weight)
            .sum()
    }
}

/// Letter grade
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Grade {
    /// >= 80
    A,
    /// >= 60
    B,
    /// >= 40
    C,
    /// >= 20
    D,
    /// < 20
    F,
}

impl Grade {
    /// Grade for a weighted total
    #[must_use]
    pub fn from_total(total: f64) -> Self {
        if total >= 80.0 {
            Self::A
        } else if total >= 60.0 {
            Self::B
        } else if total >= 40.0 {
            Self::C
        } else if total >= 20.0 {
            Self::D
        } else {
            Self::F
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::F => "F",
        };
        f.write_str(letter)
    }
}

/// Result of scoring one token
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenScore {
    /// Dimension scores, each 0-100 rounded to one decimal
    pub scores: Weights,
    /// Weighted total rounded to one decimal
    pub total: f64,
    /// Letter grade of the unrounded total
    pub grade: Grade,
}

/// Maps `value` linearly from `[min, max]` onto 0-100, clamped; a degenerate
/// range scores 50.
#[must_use]
pub fn normalize(value: f64, min: f64, max: f64) -> f64 {
    if max <= min {
        return 50.0;
    }
    ((value - min) / (max - min) * 100.0).clamp(0.0, 100.0)
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Score `token` as of `now`.
#[must_use]
pub fn score_token(token: &TokenSnapshot, now: DateTime<Utc>) -> TokenScore {
    let age_days = token
        .created_at
        .map_or(0, |created| (now - created).num_days().max(0));

    let scores = Weights {
        holders: round1(normalize(
            token.holders as f64,
            HOLDERS_RANGE.0,
            HOLDERS_RANGE.1,
        )),
        volume: round1(normalize(token.volume_24h, VOLUME_RANGE.0, VOLUME_RANGE.1)),
        liquidity: round1(normalize(
            token.liquidity,
            LIQUIDITY_RANGE.0,
            LIQUIDITY_RANGE.1,
        )),
        price_stability: if token.price.is_some_and(|p| p > 0.0) {
            PRICED_STABILITY
        } else {
            0.0
        },
        age: round1(normalize(
            age_days as f64,
            AGE_DAYS_RANGE.0,
            AGE_DAYS_RANGE.1,
        )),
    };

    let weighted = scores.weighted_sum(&WEIGHTS);
    TokenScore {
        scores,
        total: round1(weighted),
        grade: Grade::from_total(weighted),
    }
}

fn bar(score: f64) -> String {
    let filled = ((score / 10.0) as usize).min(10);
    format!("{}{}", "#".repeat(filled), "-".repeat(10 - filled))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intent {
    Help,
    Status,
    Tokenize,
    Weights,
    Score,
    Rank,
    Greeting,
    Unknown,
}

fn rules() -> IntentRules<Intent> {
    IntentRules::new(Intent::Unknown)
        .exact_any(&["help", "?", "commands"], Intent::Help)
        .exact_any(&["status", "stats", "health"], Intent::Status)
        .prefix_any(&["tokenize"], Intent::Tokenize)
        .exact_any(&["weights"], Intent::Weights)
        .prefix_any(&["score", "evaluate"], Intent::Score)
        .prefix_any(&["rank"], Intent::Rank)
        .short_greeting(Intent::Greeting)
}

/// Token scoring skill
pub struct AnalystSkill {
    services: Services,
    quota: QuotaTracker,
    rules: IntentRules<Intent>,
}

impl AnalystSkill {
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

    async fn score(&self, turn: &Turn, query: &str) -> Result<Reply, SkillError> {
        if query.is_empty() {
            return Ok(Reply::text("Usage: `score <address or symbol>`"));
        }
        if let Metered::Rejected(reply) = meter(&self.services, &self.quota, &turn.sender).await? {
            return Ok(reply);
        }

        let token = match find_token(self.services.market.as_ref(), query).await {
            Ok(Some(token)) => token,
            Ok(None) => return Ok(Reply::ending(format!("Token not found: {query}"))),
            Err(e) => {
                warn!(query, error = %e, "Score lookup failed");
                return Ok(Reply::ending(
                    "Could not fetch token data right now. Please try again in a moment.",
                ));
            }
        };
        common::bump_stat(self.services.store.as_ref(), SKILL_ID, "tokens_scored").await;

        let result = score_token(&token, turn.received_at);
        let mut lines = vec![
            format!("Score for {}", token.label()),
            format!("Grade: {} ({:.1}/100)", result.grade, result.total),
            String::new(),
            "Dimension scores:".to_string(),
        ];
        for (name, score) in result.scores.entries() {
            lines.push(format!("  {name:<16} [{}] {score:.1}", bar(score)));
        }
        lines.push(String::new());
        lines.push(format!("Holders: {}", token.holders));
        lines.push(format!("Volume 24h: {}", format_compact(token.volume_24h)));
        lines.push(format!("Liquidity: {}", format_compact(token.liquidity)));
        Ok(Reply::ending(lines.join("\n")))
    }

    async fn rank(&self, turn: &Turn) -> Result<Reply, SkillError> {
        if let Metered::Rejected(reply) = meter(&self.services, &self.quota, &turn.sender).await? {
            return Ok(reply);
        }
        let count = first_number(&turn.text)
            .map_or(DEFAULT_RANK_COUNT, |n| n as usize)
            .clamp(1, RANK_SCAN);

        let tokens = match self.services.market.tokens(RANK_SCAN).await {
            Ok(tokens) if !tokens.is_empty() => tokens,
            Ok(_) => return Ok(Reply::ending("Could not fetch tokens.")),
            Err(e) => {
                warn!(error = %e, "Rank token list failed");
                return Ok(Reply::ending("Could not fetch tokens."));
            }
        };

        let mut scored: Vec<(TokenScore, &TokenSnapshot)> = tokens
            .iter()
            .map(|t| (score_token(t, turn.received_at), t))
            .collect();
        scored.sort_by(|a, b| b.0.total.total_cmp(&a.0.total));

        let shown = count.min(scored.len());
        let mut lines = vec![format!("Top {shown} tokens by score:")];
        for (i, (score, token)) in scored.iter().take(shown).enumerate() {
            lines.push(format!(
                "{:>2}. [{}] {} - {:.1} | {} holders",
                i + 1,
                score.grade,
                token.label(),
                score.total,
                token.holders
            ));
        }
        Ok(Reply::ending(lines.join("\n")))
    }
}

fn weights_text() -> String {
    let mut lines = vec!["Scoring weights:".to_string()];
    for (name, weight) in WEIGHTS.entries() {
        lines.push(format!("  {name}: {:.0}%", weight * 100.0));
    }
    lines.join("\n")
}

#[async_trait]
impl Skill for AnalystSkill {
    fn profile(&self) -> &SkillProfile {
        &PROFILE
    }

    async fn handle(&self, turn: &Turn) -> Result<Reply, SkillError> {
        let classified = self.rules.classify(&turn.text);
        match classified.label {
            Intent::Help => Ok(common::help(&PROFILE, &self.services, &turn.sender).await),
            Intent::Status => common::status(&PROFILE, &self.services).await,
            Intent::Tokenize => Ok(common::tokenize(&PROFILE, &self.services, &turn.sender).await),
            Intent::Greeting => Ok(common::greeting(&PROFILE)),
            Intent::Weights => Ok(Reply::ending(weights_text())),
            Intent::Score => self.score(turn, &classified.argument).await,
            Intent::Rank => self.rank(turn).await,
            Intent::Unknown => Ok(Reply::ending(
                "Token Analyst. Type 'help' for commands.",
            )),
        }
    }
}
