//! LLM-backed tweet writer

use super::common::{self, premium_only};
use crate::agent::{Reply, Services, Skill, SkillError, SkillProfile, Turn};
use crate::gate::{QuotaError, QuotaLimits, QuotaTracker, Tier};
use crate::intent::IntentRules;
use crate::utils::truncate_str;
use async_trait::async_trait;
use tracing::{error, info};

const SKILL_ID: &str = "content";
const QUOTA: QuotaLimits = QuotaLimits::new(3, Some(50));

/// Longest topic passed into a prompt
pub const MAX_TOPIC_CHARS: usize = 500;

const PROFILE: SkillProfile = SkillProfile {
    id: SKILL_ID,
    name: "Tweet Writer",
    version: "1.0.0",
    description: "AI ghostwriter for crypto Twitter.",
    commands: &[
        "`tweet about <topic>` - a single tweet",
        "`thread <topic>` - a 5-tweet thread (premium)",
        "`reply to <context>` - a reply",
        "`viral <topic>` - high-engagement content",
        "`status` - agent stats",
    ],
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intent {
    Help,
    Status,
    Tokenize,
    Thread,
    Tweet,
    Reply,
    Viral,
    Greeting,
}

fn rules() -> IntentRules<Intent> {
    IntentRules::new(Intent::Tweet)
        .exact_any(&["help", "?", "commands"], Intent::Help)
        .exact_any(&["status", "stats", "health"], Intent::Status)
        .prefix_any(&["tokenize"], Intent::Tokenize)
        .any_of(&["tweetstorm", "thread"], Intent::Thread)
        .any_of(
            &["write a tweet", "tweet about", "tweet on", "post about", "tweet"],
            Intent::Tweet,
        )
        .any_of(&["reply to", "respond to", "clap back"], Intent::Reply)
        .any_of(&["viral", "engagement", "hook", "banger"], Intent::Viral)
        .short_greeting(Intent::Greeting)
}

/// Removes line breaks (real or escaped) and caps the length.
#[must_use]
pub fn sanitize_topic(topic: &str) -> String {
    let flat = topic.replace("\\n", " ").replace(['\r', '\n'], " ");
    truncate_str(flat.trim(), MAX_TOPIC_CHARS)
}

fn tweet_prompt(topic: &str) -> String {
    format!(
        "You are a top crypto Twitter ghostwriter. Write a single tweet (max 280 chars) about: {topic}\n\n\
         Rules:\n- Must be under 280 characters\n- Be punchy, memorable, quotable\n\
         - Use crypto/web3 tone\n- Include 1-2 relevant hashtags\n- No generic fluff\nTweet:"
    )
}

fn thread_prompt(topic: &str) -> String {
    format!(
        "You are a top crypto Twitter ghostwriter. Write a 5-tweet thread about: {topic}\n\n\
         Rules:\n- Tweet 1: Hook that stops the scroll\n- Tweets 2-4: Key insights, data, or arguments\n\
         - Tweet 5: Call to action or takeaway\n- Each tweet under 280 chars\n\
         - Number each tweet (1/5, 2/5, etc.)\n- Crypto/web3 tone\nThread:"
    )
}

fn reply_prompt(context: &str) -> String {
    format!(
        "You are a crypto Twitter engagement expert. Write a witty, insightful reply to: {context}\n\n\
         Rules:\n- Under 280 characters\n- Add value or humor\n- Don't be sycophantic\n\
         - Crypto-native tone\nReply:"
    )
}

fn viral_prompt(topic: &str) -> String {
    format!(
        "You are a viral content strategist for crypto Twitter. Create a high-engagement tweet about: {topic}\n\n\
         Rules:\n- Use a proven viral format (hot take, contrarian view, list, prediction, or story)\n\
         - Under 280 characters\n- Designed to maximize quote tweets and replies\n\
         - Bold but defensible\nTweet:"
    )
}

/// Content generation skill
pub struct ContentSkill {
    services: Services,
    quota: QuotaTracker,
    rules: IntentRules<Intent>,
}

impl ContentSkill {
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

    async fn generate(&self, turn: &Turn, intent: Intent, argument: &str) -> Result<Reply, SkillError> {
        let mut topic = sanitize_topic(argument);
        if topic.is_empty() && intent != Intent::Reply {
            topic = "general".to_string();
        }
        if intent == Intent::Reply && topic.is_empty() {
            return Ok(Reply::text("What should I reply to? Try `reply to <tweet text>`."));
        }

        let tier = self.services.tiers.tier(&turn.sender).await;
        if intent == Intent::Thread && tier == Tier::Free {
            let mut reply = premium_only(&self.services, "Thread generation");
            reply.text.push_str(&format!(
                "\n\nI can still write you a single tweet. Try: 'tweet about {topic}'"
            ));
            return Ok(Reply::ending(reply.text));
        }

        let usage = match self.quota.consume(&turn.sender, tier).await {
            Ok(usage) => usage,
            Err(QuotaError::Exceeded { limit, tier }) => {
                return Ok(common::quota_exceeded(&self.services, limit, tier))
            }
            Err(QuotaError::Storage(e)) => return Err(e.into()),
        };

        let (prompt, stat) = match intent {
            Intent::Thread => (thread_prompt(&topic), "threads_generated"),
            Intent::Reply => (reply_prompt(&topic), "replies_generated"),
            Intent::Viral => (viral_prompt(&topic), "tweets_generated"),
            _ => (tweet_prompt(&topic), "tweets_generated"),
        };

        let mut text = match self.services.generator.generate(&prompt).await {
            Ok(text) if !text.trim().is_empty() => {
                common::bump_stat(self.services.store.as_ref(), SKILL_ID, stat).await;
                info!(
                    sender = %truncate_str(&turn.sender, 20),
                    kind = stat,
                    chars = text.chars().count(),
                    "Content generated"
                );
                text
            }
            Ok(_) => "I couldn't generate content for that topic. \
                      Try rephrasing or being more specific."
                .to_string(),
            Err(e) => {
                error!(error = %e, "Generation failed");
                "Something went wrong generating your content. Please try again.".to_string()
            }
        };

        if tier == Tier::Free {
            text.push_str(&format!(
                "\n\n---\n{} free generations remaining today.",
                usage.remaining().unwrap_or(0)
            ));
        }
        Ok(Reply::ending(text))
    }
}

#[async_trait]
impl Skill for ContentSkill {
    fn profile(&self) -> &SkillProfile {
        &PROFILE
    }

    async fn handle(&self, turn: &Turn) -> Result<Reply, SkillError> {
        let classified = self.rules.classify(&turn.text);
        match classified.label {
            Intent::Help => Ok(common::help(&PROFILE, &self.services, &turn.sender).await),
            Intent::Status => common::status(&PROFILE, &self.services).await,
            Intent::Tokenize => Ok(common::tokenize(&PROFILE, &self.services, &turn.sender).await),
            Intent::Greeting => Ok(Reply::text(
                "Hey! I'm your AI ghostwriter for crypto Twitter.\n\nTry:\n\
                 - 'tweet about DeFi summer'\n- 'viral AI agents are the future'\n\
                 - 'thread on agent economies'\n\nSay 'help' for all commands.",
            )),
            intent => self.generate(turn, intent, &classified.argument).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, FakeMarket};
    use crate::upstream::inference::MockTextGenerator;
    use crate::upstream::UpstreamError;
    use chrono::Utc;
    use mockall::predicate::function;
    use std::sync::Arc;

    fn skill(generator: MockTextGenerator, market: Arc<FakeMarket>) -> ContentSkill {
        let (services, _) =
            testing::services(testing::premium_settings(), market, Arc::new(generator));
        ContentSkill::new(services)
    }

    async fn ask(skill: &ContentSkill, sender: &str, text: &str) -> Reply {
        skill
            .handle(&Turn::new(sender, text, Utc::now()))
            .await
            .expect("handle")
    }

    #[test]
    fn test_sanitize_topic() {
        assert_eq!(sanitize_topic("a\nb\\nc"), "a b c");
        assert_eq!(sanitize_topic(&"x".repeat(600)).chars().count(), MAX_TOPIC_CHARS);
    }

    #[tokio::test]
    async fn test_tweet_uses_topic_in_prompt() {
        let mut generator = MockTextGenerator::new();
        generator
            .expect_generate()
            .with(function(|prompt: &str| {
                prompt.contains("about: AI agents") && prompt.ends_with("Tweet:")
            }))
            .times(1)
            .returning(|_| Ok("Agents are eating the world #AI".to_string()));

        let skill = skill(generator, Arc::new(FakeMarket::default()));
        let reply = ask(&skill, "alice", "tweet about AI agents").await;
        assert!(reply.text.starts_with("Agents are eating the world #AI"));
        assert!(reply.text.contains("2 free generations remaining today."));
        assert!(reply.end_session);
    }

    #[tokio::test]
    async fn test_thread_is_premium_only() {
        let mut generator = MockTextGenerator::new();
        generator
            .expect_generate()
            .times(1)
            .returning(|_| Ok("1/5 ...".to_string()));
        let market = Arc::new(FakeMarket::default());
        market.set_balance("whale", 1000.0);
        let skill = skill(generator, market);

        let free = ask(&skill, "minnow", "thread on bonding curves").await;
        assert!(free.text.contains("Thread generation is a premium feature."));
        assert!(free.text.contains("tweet about bonding curves"));

        let premium = ask(&skill, "whale", "thread on bonding curves").await;
        assert_eq!(premium.text, "1/5 ...");
    }

    #[tokio::test]
    async fn test_empty_generation_and_failure_get_apologies() {
        let mut generator = MockTextGenerator::new();
        let mut calls = 0;
        generator.expect_generate().returning(move |_| {
            calls += 1;
            if calls == 1 {
                Ok("   ".to_string())
            } else {
                Err(UpstreamError::Timeout)
            }
        });
        let skill = skill(generator, Arc::new(FakeMarket::default()));

        let empty = ask(&skill, "alice", "viral memecoins").await;
        assert!(empty.text.starts_with("I couldn't generate content"));

        let failed = ask(&skill, "alice", "viral memecoins").await;
        assert!(failed.text.starts_with("Something went wrong"));
    }

    #[tokio::test]
    async fn test_free_quota_is_three() {
        let skill = skill(testing::mock_generator("gm"), Arc::new(FakeMarket::default()));
        for _ in 0..3 {
            assert!(ask(&skill, "alice", "tweet about gm").await.text.starts_with("gm"));
        }
        let rejected = ask(&skill, "alice", "tweet about gm").await;
        assert!(rejected.text.starts_with("Free limit reached (3/day)."));
    }
}
