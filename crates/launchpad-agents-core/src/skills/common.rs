//! Behaviour shared by every skill: help, status, greeting, quota metering
//! and owner-only tokenization.

use crate::agent::{Reply, Services, SkillError, SkillProfile};
use crate::gate::{QuotaError, QuotaTracker, Tier};
use crate::storage::{self, stats_key, KeyValueStore, StorageError};
use crate::upstream::TokenizeRequest;
use crate::utils::truncate_str;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Outcome of metering one action
#[derive(Debug)]
pub enum Metered {
    /// Go ahead; carries the sender's tier
    Allowed(Tier),
    /// Stop and send this reply
    Rejected(Reply),
}

/// Consume one action of `sender`'s daily quota.
///
/// # Errors
///
/// Returns `Storage` if the counter cannot be read or written.
pub async fn meter(
    services: &Services,
    quota: &QuotaTracker,
    sender: &str,
) -> Result<Metered, SkillError> {
    let tier = services.tiers.tier(sender).await;
    match quota.consume(sender, tier).await {
        Ok(_) => Ok(Metered::Allowed(tier)),
        Err(QuotaError::Exceeded { limit, tier }) => {
            Ok(Metered::Rejected(quota_exceeded(services, limit, tier)))
        }
        Err(QuotaError::Storage(e)) => Err(e.into()),
    }
}

/// Rejection text for an exhausted quota
#[must_use]
pub fn quota_exceeded(services: &Services, limit: u32, tier: Tier) -> Reply {
    match tier {
        Tier::Free => Reply::ending(format!(
            "Free limit reached ({limit}/day). {}",
            upgrade_hint(services)
        )),
        Tier::Premium => Reply::ending(format!("Daily limit reached ({limit}/day).")),
    }
}

/// Rejection text for a premium-only feature
#[must_use]
pub fn premium_only(services: &Services, feature: &str) -> Reply {
    Reply::text(format!(
        "{feature} is a premium feature. {}",
        upgrade_hint(services)
    ))
}

fn upgrade_hint(services: &Services) -> String {
    format!(
        "Hold {} {} for premium access!",
        services.tiers.threshold(),
        services.settings.agent_ticker
    )
}

/// Name, version, description, the sender's tier and the command list.
pub async fn help(profile: &SkillProfile, services: &Services, sender: &str) -> Reply {
    let tier = services.tiers.tier(sender).await;
    let mut text = format!(
        "**{}** v{}\n{}\n\nYour tier: {tier}\n\n**Commands:**\n",
        profile.name, profile.version, profile.description
    );
    for command in profile.commands {
        text.push_str("- ");
        text.push_str(command);
        text.push('\n');
    }
    if tier == Tier::Free && services.settings.premium_token_address.is_some() {
        text.push('\n');
        text.push_str(&upgrade_hint(services));
    }
    Reply::text(text.trim_end())
}

/// Short introduction
#[must_use]
pub fn greeting(profile: &SkillProfile) -> Reply {
    Reply::text(format!(
        "Hi! I'm {}. {}\n\nSay 'help' to see what I can do.",
        profile.name, profile.description
    ))
}

/// Health summary and skill counters.
///
/// # Errors
///
/// Returns `Storage` if the counters cannot be read.
pub async fn status(profile: &SkillProfile, services: &Services) -> Result<Reply, SkillError> {
    let stats = load_stats(services.store.as_ref(), profile.id).await?;
    let mut text = format!(
        "**{} status**\n{}",
        profile.name,
        services.health.report().summary()
    );
    for (name, value) in &stats {
        text.push_str(&format!("\n- {}: {value}", name.replace('_', " ")));
    }
    Ok(Reply::text(text))
}

/// Counters of `skill`, keyed by counter name.
///
/// # Errors
///
/// Returns an error if the store fails.
pub async fn load_stats(
    store: &dyn KeyValueStore,
    skill: &str,
) -> Result<BTreeMap<String, u64>, StorageError> {
    Ok(storage::load(store, &stats_key(skill))
        .await?
        .unwrap_or_default())
}

/// Increment one counter of `skill`. Failures are logged and ignored.
pub async fn bump_stat(store: &dyn KeyValueStore, skill: &str, name: &str) {
    let result = async {
        let mut stats = load_stats(store, skill).await?;
        *stats.entry(name.to_string()).or_insert(0) += 1;
        storage::save(store, &stats_key(skill), &stats).await
    }
    .await;
    if let Err(e) = result {
        warn!(skill, counter = name, error = %e, "Failed to update stats");
    }
}

/// Create a token for this agent on the launch platform; owner only.
pub async fn tokenize(profile: &SkillProfile, services: &Services, sender: &str) -> Reply {
    let settings = &services.settings;
    if !settings.is_owner(sender) {
        return Reply::text("Only the agent owner can tokenize this agent.");
    }
    let Some(agent_address) = settings.agent_address.clone().filter(|a| !a.is_empty()) else {
        return Reply::text("AGENT_ADDRESS is not configured.");
    };

    let request = TokenizeRequest {
        agent_address,
        name: profile.name.to_string(),
        symbol: settings.agent_ticker.trim_start_matches('$').to_string(),
        description: profile.description.to_string(),
        image: None,
        chain_id: settings.chain_id,
    };

    match services.market.tokenize(&request).await {
        Ok(response) => {
            info!(
                sender = %truncate_str(sender, 20),
                token_id = %response.token_id,
                "Token created, awaiting on-chain deployment"
            );
            Reply::ending(format!(
                "Token created!\n\nComplete the deployment here:\n{}",
                settings.handoff_link(&response.token_id)
            ))
        }
        Err(e) => {
            warn!(error = %e, "Tokenize request failed");
            Reply::text(format!("Could not create token: {e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentSettings;
    use crate::gate::QuotaLimits;
    use crate::testing::{self, mock_generator, FakeMarket};
    use std::sync::Arc;

    const PROFILE: SkillProfile = SkillProfile {
        id: "test",
        name: "Test Agent",
        version: "1.2.3",
        description: "Does test things.",
        commands: &["`ping` - pong", "`help` - this message"],
    };

    fn services(settings: AgentSettings, market: Arc<FakeMarket>) -> Services {
        testing::services(settings, market, Arc::new(mock_generator("unused"))).0
    }

    #[tokio::test]
    async fn test_help_lists_commands_and_tier() {
        let services = services(testing::premium_settings(), Arc::new(FakeMarket::default()));
        let reply = help(&PROFILE, &services, "alice").await;

        assert!(reply.text.contains("Test Agent"));
        assert!(reply.text.contains("v1.2.3"));
        assert!(reply.text.contains("`ping` - pong"));
        assert!(reply.text.contains("Your tier: free"));
        assert!(reply.text.contains("Hold 1000 $WATCH"));
        assert!(!reply.end_session);
    }

    #[tokio::test]
    async fn test_meter_rejects_free_sender_with_upgrade_hint() {
        let services = services(testing::premium_settings(), Arc::new(FakeMarket::default()));
        let quota = services.quota("test", QuotaLimits::new(1, None));

        assert!(matches!(
            meter(&services, &quota, "alice").await.expect("meter"),
            Metered::Allowed(Tier::Free)
        ));
        match meter(&services, &quota, "alice").await.expect("meter") {
            Metered::Rejected(reply) => {
                assert_eq!(
                    reply.text,
                    "Free limit reached (1/day). Hold 1000 $WATCH for premium access!"
                );
                assert!(reply.end_session);
            }
            Metered::Allowed(_) => panic!("second action must be rejected"),
        }
    }

    #[tokio::test]
    async fn test_meter_premium_unlimited() {
        let market = Arc::new(FakeMarket::default());
        market.set_balance("whale", 5000.0);
        let services = services(testing::premium_settings(), market);
        let quota = services.quota("test", QuotaLimits::new(1, None));

        for _ in 0..5 {
            assert!(matches!(
                meter(&services, &quota, "whale").await.expect("meter"),
                Metered::Allowed(Tier::Premium)
            ));
        }
    }

    #[tokio::test]
    async fn test_tokenize_is_owner_only() {
        let settings = AgentSettings {
            agent_owner: Some("owner".to_string()),
            agent_address: Some("agent1qowner".to_string()),
            agent_ticker: "$TEST".to_string(),
            ..AgentSettings::default()
        };
        let services = services(settings, Arc::new(FakeMarket::default()));

        let denied = tokenize(&PROFILE, &services, "mallory").await;
        assert!(denied.text.contains("Only the agent owner"));

        let created = tokenize(&PROFILE, &services, "owner").await;
        assert!(created.text.contains("https://agent-launch.ai/deploy/tok-TEST"));
        assert!(created.end_session);
    }

    #[tokio::test]
    async fn test_stats_counters() {
        let services = services(AgentSettings::default(), Arc::new(FakeMarket::default()));
        bump_stat(services.store.as_ref(), "test", "checks_run").await;
        bump_stat(services.store.as_ref(), "test", "checks_run").await;

        let reply = status(&PROFILE, &services).await.expect("status");
        assert!(reply.text.contains("checks run: 2"));
        assert!(reply.text.contains("Health: healthy"));
    }
}
