//! Token faucet
//!
//! Pays a one-time welcome gift (tokens plus native gas), referral rewards
//! and a weekly builder reward for agents with a deployed token.
//!
//! The welcome gift is two transfers that cannot be made atomic. The claim is
//! recorded as soon as the token transfer succeeds, so tokens are sent at
//! most once. If the gas transfer then fails, the wallet and amount are kept
//! as a pending gas debt and the next `claim` from the same sender retries
//! only the gas transfer until it goes through.

use super::common;
use crate::agent::{Notification, Reply, Services, Skill, SkillError, SkillProfile, Turn};
use crate::chain::{format_units, to_base_units, Treasury, TreasuryBalance, TOKEN_DECIMALS};
use crate::intent::{find_agent_address, find_evm_address, IntentRules};
use crate::storage::{
    self, gifter_daily_key, GIFTER_BUILDER_CLAIMS_KEY, GIFTER_GAS_PENDING_KEY,
    GIFTER_REFERRAL_COUNTS_KEY, GIFTER_REFERRAL_MAP_KEY, GIFTER_WELCOME_CLAIMS_KEY,
};
use crate::utils::{short_address, short_id, truncate_str};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

const SKILL_ID: &str = "gifter";

/// Gift token symbol
pub const TOKEN_SYMBOL: &str = "FET";
/// Native coin symbol
pub const NATIVE_SYMBOL: &str = "BNB";

/// Welcome gift in tokens
pub const WELCOME_TOKEN_AMOUNT: &str = "150";
/// Welcome gift in native gas
pub const WELCOME_NATIVE_AMOUNT: &str = "0.2";
/// Referral reward in tokens
pub const REFERRAL_TOKEN_AMOUNT: &str = "10";
/// Weekly builder reward in tokens
pub const BUILDER_TOKEN_AMOUNT: &str = "20";

/// Welcome gifts paid per UTC day
pub const MAX_CLAIMS_PER_DAY: u32 = 100;
/// Referrals rewarded per referrer
pub const MAX_REFERRALS_PER_AGENT: u32 = 50;
/// Days between builder rewards
pub const BUILDER_COOLDOWN_DAYS: i64 = 7;

const PROFILE: SkillProfile = SkillProfile {
    id: SKILL_ID,
    name: "Token Gifter",
    version: "1.0.0",
    description: "The agent faucet: testnet tokens so new agents can join the economy.",
    commands: &[
        "`claim 0x...` - welcome gift (150 FET + 0.2 BNB, once)",
        "`refer agent1q... 0x...` - 10 FET for referring another agent",
        "`builder reward 0x...` - 20 FET/week if you have a deployed token",
        "`status` - treasury stats",
    ],
};

/// Recorded welcome gift
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WelcomeClaim {
    /// Wallet the gift went to
    pub wallet: String,
    /// When the token transfer succeeded
    pub claimed_at: DateTime<Utc>,
    /// Token transfer hash
    pub token_tx: String,
}

/// Native transfer still owed after a partial welcome gift
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasDebt {
    /// Wallet to pay
    pub wallet: String,
    /// Decimal amount owed
    pub amount: String,
    /// When the debt was recorded
    pub since: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intent {
    Help,
    Tokenize,
    Claim,
    Refer,
    Builder,
    Status,
    Greeting,
    Unknown,
}

fn rules() -> IntentRules<Intent> {
    IntentRules::new(Intent::Unknown)
        .exact_any(&["help", "?", "commands"], Intent::Help)
        .prefix_any(&["tokenize"], Intent::Tokenize)
        .any_of(
            &[
                "claim",
                "welcome",
                "gift",
                "need tokens",
                "faucet",
                "give me",
                "send me",
                "get started",
                "new here",
            ],
            Intent::Claim,
        )
        .any_of(&["refer", "invite"], Intent::Refer)
        .any_of(
            &["builder", "deployed", "my token", "weekly reward"],
            Intent::Builder,
        )
        .any_of(
            &["status", "stats", "balance", "treasury", "how much"],
            Intent::Status,
        )
        .short_greeting(Intent::Greeting)
}

/// Faucet skill
pub struct GifterSkill {
    services: Services,
    treasury: Arc<dyn Treasury>,
    rules: IntentRules<Intent>,
}

impl GifterSkill {
    /// Create the skill paying out of `treasury`
    #[must_use]
    pub fn new(services: Services, treasury: Arc<dyn Treasury>) -> Self {
        Self {
            services,
            treasury,
            rules: rules(),
        }
    }

    async fn load_map<V: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<BTreeMap<String, V>, SkillError> {
        Ok(storage::load(self.services.store.as_ref(), key)
            .await?
            .unwrap_or_default())
    }

    async fn save_map<V: Serialize + Sync>(
        &self,
        key: &str,
        map: &BTreeMap<String, V>,
    ) -> Result<(), SkillError> {
        storage::save(self.services.store.as_ref(), key, map).await?;
        Ok(())
    }

    /// `None` when the treasury holds at least the requested amounts, else
    /// the reply to send.
    async fn ensure_funds(&self, token: &str, native: &str) -> Result<Option<Reply>, SkillError> {
        let needed = TreasuryBalance {
            token: to_base_units(token, TOKEN_DECIMALS)?,
            native: to_base_units(native, TOKEN_DECIMALS)?,
        };
        match self.treasury.balances().await {
            Ok(balance) if balance.token >= needed.token && balance.native >= needed.native => {
                Ok(None)
            }
            Ok(balance) => {
                warn!(
                    token = %format_units(balance.token, TOKEN_DECIMALS),
                    native = %format_units(balance.native, TOKEN_DECIMALS),
                    "Treasury below payout"
                );
                Ok(Some(Reply::ending(
                    "Treasury is running low! Buy $GIFT to help refill it.",
                )))
            }
            Err(e) => {
                error!(error = %e, "Treasury balance unavailable");
                Ok(Some(Reply::ending(
                    "Could not reach the treasury right now. Please try again later.",
                )))
            }
        }
    }

    async fn claim(&self, turn: &Turn) -> Result<Reply, SkillError> {
        let sender = turn.sender.as_str();
        let claims: BTreeMap<String, WelcomeClaim> =
            self.load_map(GIFTER_WELCOME_CLAIMS_KEY).await?;
        if claims.contains_key(sender) {
            let debts: BTreeMap<String, GasDebt> = self.load_map(GIFTER_GAS_PENDING_KEY).await?;
            if let Some(debt) = debts.get(sender) {
                return self.settle_gas_debt(sender, debt.clone()).await;
            }
            return Ok(Reply::ending(format!(
                "You already claimed your welcome gift!\n\nEarn more through:\n\
                 - Referrals: `refer agent1q... 0x...` ({REFERRAL_TOKEN_AMOUNT} {TOKEN_SYMBOL} each)\n\
                 - Builder rewards: `builder reward 0x...` ({BUILDER_TOKEN_AMOUNT} {TOKEN_SYMBOL}/week)"
            )));
        }

        let Some(wallet) = find_evm_address(&turn.text) else {
            return Ok(Reply::text(
                "To claim your welcome gift, include your EVM wallet address:\n\n\
                 **claim 0x1234...abcd**",
            ));
        };

        let day_key = gifter_daily_key(&self.services.clock.today());
        let claimed_today: u32 = storage::load(self.services.store.as_ref(), &day_key)
            .await?
            .unwrap_or(0);
        if claimed_today >= MAX_CLAIMS_PER_DAY {
            return Ok(Reply::ending(
                "Daily gift limit reached! Come back tomorrow.",
            ));
        }

        if let Some(reply) = self
            .ensure_funds(WELCOME_TOKEN_AMOUNT, WELCOME_NATIVE_AMOUNT)
            .await?
        {
            return Ok(reply);
        }

        let token_tx = match self.treasury.send_token(&wallet, WELCOME_TOKEN_AMOUNT).await {
            Ok(tx) => tx,
            Err(e) => {
                error!(wallet = %wallet, error = %e, "Welcome token transfer failed");
                return Ok(Reply::ending(format!(
                    "{TOKEN_SYMBOL} transfer failed: {e}\n\nPlease try again later."
                )));
            }
        };

        let mut claims = claims;
        claims.insert(
            sender.to_string(),
            WelcomeClaim {
                wallet: wallet.clone(),
                claimed_at: turn.received_at,
                token_tx: token_tx.clone(),
            },
        );
        self.save_map(GIFTER_WELCOME_CLAIMS_KEY, &claims).await?;
        storage::save(self.services.store.as_ref(), &day_key, &(claimed_today + 1)).await?;
        info!(
            sender = %truncate_str(sender, 20),
            wallet = %wallet,
            tx = %token_tx,
            "Welcome gift recorded"
        );

        let native_tx = match self
            .treasury
            .send_native(&wallet, WELCOME_NATIVE_AMOUNT)
            .await
        {
            Ok(tx) => tx,
            Err(e) => {
                error!(wallet = %wallet, error = %e, "Welcome gas transfer failed, recording debt");
                let mut debts: BTreeMap<String, GasDebt> =
                    self.load_map(GIFTER_GAS_PENDING_KEY).await?;
                debts.insert(
                    sender.to_string(),
                    GasDebt {
                        wallet: wallet.clone(),
                        amount: WELCOME_NATIVE_AMOUNT.to_string(),
                        since: turn.received_at,
                    },
                );
                self.save_map(GIFTER_GAS_PENDING_KEY, &debts).await?;
                return Ok(Reply::ending(format!(
                    "{NATIVE_SYMBOL} transfer failed: {e}\n\
                     ({WELCOME_TOKEN_AMOUNT} {TOKEN_SYMBOL} was sent: `{}`)\n\n\
                     Say `claim` again later to receive your {NATIVE_SYMBOL}.",
                    short_id(&token_tx)
                )));
            }
        };

        Ok(Reply::ending(format!(
            "**Welcome to the Agent Economy!**\n\nSent to `{}`:\n\
             - **{WELCOME_TOKEN_AMOUNT} {TOKEN_SYMBOL}** - tx: `{}`\n\
             - **{WELCOME_NATIVE_AMOUNT} {NATIVE_SYMBOL}** - tx: `{}`\n\n\
             Next: deploy your own token, then refer other agents to earn \
             {REFERRAL_TOKEN_AMOUNT} {TOKEN_SYMBOL} each.",
            short_address(&wallet),
            short_id(&token_tx),
            short_id(&native_tx)
        )))
    }

    async fn settle_gas_debt(&self, sender: &str, debt: GasDebt) -> Result<Reply, SkillError> {
        if let Some(reply) = self.ensure_funds("0", &debt.amount).await? {
            return Ok(reply);
        }
        match self.treasury.send_native(&debt.wallet, &debt.amount).await {
            Ok(tx) => {
                let mut debts: BTreeMap<String, GasDebt> =
                    self.load_map(GIFTER_GAS_PENDING_KEY).await?;
                debts.remove(sender);
                self.save_map(GIFTER_GAS_PENDING_KEY, &debts).await?;
                info!(sender = %truncate_str(sender, 20), tx = %tx, "Gas debt settled");
                Ok(Reply::ending(format!(
                    "Sent the {} {NATIVE_SYMBOL} you were owed to `{}` - tx: `{}`",
                    debt.amount,
                    short_address(&debt.wallet),
                    short_id(&tx)
                )))
            }
            Err(e) => {
                warn!(sender = %truncate_str(sender, 20), error = %e, "Gas debt retry failed");
                Ok(Reply::ending(format!(
                    "{NATIVE_SYMBOL} transfer failed again: {e}\nPlease try again later."
                )))
            }
        }
    }

    async fn refer(&self, turn: &Turn) -> Result<Reply, SkillError> {
        let sender = turn.sender.as_str();
        let Some(referred) = find_agent_address(&turn.text) else {
            return Ok(Reply::text(
                "To refer an agent, include their address and your EVM wallet:\n\n\
                 **refer agent1q... 0x...**",
            ));
        };
        let Some(wallet) = find_evm_address(&turn.text) else {
            return Ok(Reply::text(format!(
                "Include your EVM wallet to receive the referral bonus:\n\n**refer {} 0x...**",
                truncate_str(&referred, 16)
            )));
        };
        if referred == sender {
            return Ok(Reply::text("Nice try! You can't refer yourself."));
        }

        let mut counts: BTreeMap<String, u32> = self.load_map(GIFTER_REFERRAL_COUNTS_KEY).await?;
        let count = counts.get(sender).copied().unwrap_or(0);
        if count >= MAX_REFERRALS_PER_AGENT {
            return Ok(Reply::text(format!(
                "You've hit the referral limit ({MAX_REFERRALS_PER_AGENT}). Thanks for spreading the word!"
            )));
        }
        let mut referrals: BTreeMap<String, String> =
            self.load_map(GIFTER_REFERRAL_MAP_KEY).await?;
        if referrals.contains_key(&referred) {
            return Ok(Reply::text("That agent was already referred."));
        }

        if let Some(reply) = self.ensure_funds(REFERRAL_TOKEN_AMOUNT, "0").await? {
            return Ok(reply);
        }
        let tx = match self.treasury.send_token(&wallet, REFERRAL_TOKEN_AMOUNT).await {
            Ok(tx) => tx,
            Err(e) => {
                error!(wallet = %wallet, error = %e, "Referral transfer failed");
                return Ok(Reply::ending(format!(
                    "Transfer failed: {e}\n\nPlease try again later."
                )));
            }
        };

        counts.insert(sender.to_string(), count + 1);
        self.save_map(GIFTER_REFERRAL_COUNTS_KEY, &counts).await?;
        referrals.insert(referred.clone(), sender.to_string());
        self.save_map(GIFTER_REFERRAL_MAP_KEY, &referrals).await?;

        let notice = Notification {
            recipient: referred.clone(),
            text: format!(
                "You were referred by another agent!\n\nSay **'claim 0x...'** to get your \
                 welcome gift ({WELCOME_TOKEN_AMOUNT} {TOKEN_SYMBOL} + {WELCOME_NATIVE_AMOUNT} {NATIVE_SYMBOL})."
            ),
            end_session: true,
        };
        Ok(Reply::ending(format!(
            "**Referral recorded!**\n\nSent to `{}`:\n- **{REFERRAL_TOKEN_AMOUNT} {TOKEN_SYMBOL}** - tx: `{}`\n\n\
             {}... can now claim their welcome gift.\nTotal referrals: {}",
            short_address(&wallet),
            short_id(&tx),
            truncate_str(&referred, 20),
            count + 1
        ))
        .with_notification(notice))
    }

    async fn builder(&self, turn: &Turn) -> Result<Reply, SkillError> {
        let sender = turn.sender.as_str();
        let Some(wallet) = find_evm_address(&turn.text) else {
            return Ok(Reply::text(
                "To claim builder rewards, include your EVM wallet:\n\n**builder reward 0x...**",
            ));
        };

        let token = match self.services.market.agent_token(sender).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                return Ok(Reply::ending(
                    "Builder rewards are for agents with deployed tokens.\n\n\
                     Claim your welcome gift, tokenize yourself on the launchpad, \
                     then come back for weekly rewards!",
                ))
            }
            Err(e) => {
                warn!(error = %e, "Builder token check failed");
                return Ok(Reply::ending(
                    "Could not verify your token right now. Please try again in a moment.",
                ));
            }
        };

        let mut claims: BTreeMap<String, DateTime<Utc>> =
            self.load_map(GIFTER_BUILDER_CLAIMS_KEY).await?;
        if let Some(last) = claims.get(sender) {
            let next = *last + Duration::days(BUILDER_COOLDOWN_DAYS);
            if turn.received_at < next {
                return Ok(Reply::text(format!(
                    "Builder rewards are weekly. Next claim: {}",
                    next.format("%Y-%m-%d")
                )));
            }
        }

        if let Some(reply) = self.ensure_funds(BUILDER_TOKEN_AMOUNT, "0").await? {
            return Ok(reply);
        }
        let tx = match self.treasury.send_token(&wallet, BUILDER_TOKEN_AMOUNT).await {
            Ok(tx) => tx,
            Err(e) => {
                error!(wallet = %wallet, error = %e, "Builder transfer failed");
                return Ok(Reply::ending(format!(
                    "Transfer failed: {e}\n\nPlease try again later."
                )));
            }
        };
        claims.insert(sender.to_string(), turn.received_at);
        self.save_map(GIFTER_BUILDER_CLAIMS_KEY, &claims).await?;

        Ok(Reply::ending(format!(
            "**Builder Reward!**\n\nToken: {}\nSent to `{}`:\n- **{BUILDER_TOKEN_AMOUNT} {TOKEN_SYMBOL}** - tx: `{}`\n\n\
             Keep building! Come back next week for more.",
            token.label(),
            short_address(&wallet),
            short_id(&tx)
        )))
    }

    async fn status(&self) -> Result<Reply, SkillError> {
        let claims: BTreeMap<String, WelcomeClaim> =
            self.load_map(GIFTER_WELCOME_CLAIMS_KEY).await?;
        let counts: BTreeMap<String, u32> = self.load_map(GIFTER_REFERRAL_COUNTS_KEY).await?;
        let debts: BTreeMap<String, GasDebt> = self.load_map(GIFTER_GAS_PENDING_KEY).await?;

        let balances = match self.treasury.balances().await {
            Ok(b) => format!(
                "- {TOKEN_SYMBOL}: {}\n- {NATIVE_SYMBOL}: {}",
                format_units(b.token, TOKEN_DECIMALS),
                format_units(b.native, TOKEN_DECIMALS)
            ),
            Err(e) => {
                warn!(error = %e, "Treasury balance unavailable");
                "- balances unavailable".to_string()
            }
        };

        Ok(Reply::text(format!(
            "**Gifter Treasury Status**\n\nTreasury: `{}`\n{balances}\n\n**Distribution:**\n\
             - Welcome gifts given: {}\n- Total referrals: {}\n- Top referrer: {} referrals\n\
             - Pending gas transfers: {}\n\n{}",
            short_address(&self.treasury.address()),
            claims.len(),
            counts.values().sum::<u32>(),
            counts.values().max().copied().unwrap_or(0),
            debts.len(),
            self.services.health.report().summary()
        )))
    }

    async fn fallback(&self, sender: &str, greeting: bool) -> Result<Reply, SkillError> {
        let claims: BTreeMap<String, WelcomeClaim> =
            self.load_map(GIFTER_WELCOME_CLAIMS_KEY).await?;
        let text = match (claims.contains_key(sender), greeting) {
            (true, true) => format!(
                "Welcome back! You've already claimed your welcome gift.\n\nYou can still earn \
                 {REFERRAL_TOKEN_AMOUNT} {TOKEN_SYMBOL} per referral and \
                 {BUILDER_TOKEN_AMOUNT} {TOKEN_SYMBOL}/week as a builder. Say 'help' for details."
            ),
            (true, false) => format!(
                "I didn't catch that. Try `refer agent1q... 0x...`, `builder reward 0x...`, \
                 `status` or `help`.\n(Referrals pay {REFERRAL_TOKEN_AMOUNT} {TOKEN_SYMBOL}.)"
            ),
            (false, _) => format!(
                "Hey! I'm the Token Gifter. Say **'claim 0x...'** (your EVM wallet) to get \
                 {WELCOME_TOKEN_AMOUNT} {TOKEN_SYMBOL} + {WELCOME_NATIVE_AMOUNT} {NATIVE_SYMBOL}.\n\n\
                 Or say 'help' for all options."
            ),
        };
        Ok(Reply::text(text))
    }
}

#[async_trait]
impl Skill for GifterSkill {
    fn profile(&self) -> &SkillProfile {
        &PROFILE
    }

    async fn handle(&self, turn: &Turn) -> Result<Reply, SkillError> {
        match self.rules.classify(&turn.text).label {
            Intent::Help => Ok(common::help(&PROFILE, &self.services, &turn.sender).await),
            Intent::Tokenize => Ok(common::tokenize(&PROFILE, &self.services, &turn.sender).await),
            Intent::Claim => self.claim(turn).await,
            Intent::Refer => self.refer(turn).await,
            Intent::Builder => self.builder(turn).await,
            Intent::Status => self.status().await,
            Intent::Greeting => self.fallback(&turn.sender, true).await,
            Intent::Unknown => self.fallback(&turn.sender, false).await,
        }
    }
}
