//! Domain skills
//!
//! One process hosts one skill, selected by `AGENT_SKILL`.

/// Scoring and ranking of launchpad tokens
pub mod analyst;
/// Help, status, quota replies and other shared handlers
pub mod common;
/// LLM-generated social posts
pub mod content;
/// Token faucet with referral and builder rewards
pub mod gifter;
/// Price, holder and volume lookups
pub mod market;
/// Price watches with a periodic sweep
pub mod watchlist;

pub use analyst::AnalystSkill;
pub use content::ContentSkill;
pub use gifter::GifterSkill;
pub use market::MarketSkill;
pub use watchlist::WatchlistSkill;

use crate::agent::{Services, Skill};
use crate::chain::{ChainError, RpcTreasury};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Which skill a process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkillKind {
    /// Price alerts
    Watchlist,
    /// Market data oracle
    Market,
    /// Token scoring
    Analyst,
    /// Tweet writer
    Content,
    /// Token faucet
    Gifter,
}

impl SkillKind {
    /// Every skill, in `help` order
    pub const ALL: [Self; 5] = [
        Self::Watchlist,
        Self::Market,
        Self::Analyst,
        Self::Content,
        Self::Gifter,
    ];

    /// Name accepted by `AGENT_SKILL`
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Watchlist => "watchlist",
            Self::Market => "market",
            Self::Analyst => "analyst",
            Self::Content => "content",
            Self::Gifter => "gifter",
        }
    }
}

impl fmt::Display for SkillKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SkillKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|k| k.as_str()).collect();
                format!("unknown skill '{s}', expected one of: {}", known.join(", "))
            })
    }
}

/// Builds the selected skill on top of `services`.
///
/// # Errors
///
/// Returns `NotConfigured` when the gifter is selected without chain settings.
pub fn build_skill(kind: SkillKind, services: Services) -> Result<Arc<dyn Skill>, ChainError> {
    let skill: Arc<dyn Skill> = match kind {
        SkillKind::Watchlist => Arc::new(WatchlistSkill::new(services)),
        SkillKind::Market => Arc::new(MarketSkill::new(services)),
        SkillKind::Analyst => Arc::new(AnalystSkill::new(services)),
        SkillKind::Content => Arc::new(ContentSkill::new(services)),
        SkillKind::Gifter => {
            let treasury = RpcTreasury::from_settings(&services.settings)?;
            Arc::new(GifterSkill::new(services, Arc::new(treasury)))
        }
    };
    Ok(skill)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, mock_generator, FakeMarket};

    #[test]
    fn test_parse_skill_kind() {
        assert_eq!("Market".parse::<SkillKind>(), Ok(SkillKind::Market));
        assert_eq!(" gifter ".parse::<SkillKind>(), Ok(SkillKind::Gifter));
        let err = "oracle".parse::<SkillKind>().expect_err("unknown");
        assert!(err.contains("watchlist, market, analyst, content, gifter"));
    }

    #[test]
    fn test_gifter_requires_chain_settings() {
        let (services, _) = testing::services(
            testing::premium_settings(),
            Arc::new(FakeMarket::default()),
            Arc::new(mock_generator("unused")),
        );
        assert!(matches!(
            build_skill(SkillKind::Gifter, services.clone()),
            Err(ChainError::NotConfigured(_))
        ));
        let skill = build_skill(SkillKind::Analyst, services).expect("analyst");
        assert_eq!(skill.profile().id, "analyst");
    }
}
