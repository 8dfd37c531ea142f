//! Price watchlist with one-shot alerts
//!
//! Senders register `above`/`below` conditions on a token's price. The
//! periodic sweep fetches current prices for every active, untriggered watch
//! and fires exactly one notification per watch whose condition holds. A
//! triggered watch is persisted as such before the notification leaves, so a
//! restart never repeats an alert.
//!
//! The same sweep samples every watched token and reports unusual moves
//! between two sweeps (price spikes, crashes and volume surges) to everyone
//! watching it.

use super::common::{self, meter, premium_only, Metered};
use crate::agent::{Notification, Reply, Services, Skill, SkillError, SkillProfile, Turn};
use crate::gate::{QuotaLimits, QuotaTracker, Tier};
use crate::intent::{first_number, IntentRules};
use crate::storage::{self, watches_key, WATCH_OWNERS_KEY, WATCH_TRACKS_KEY};
use crate::upstream::{find_token, TokenSnapshot};
use crate::utils::{format_compact, format_price, short_address, truncate_str};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lazy_regex::regex_captures;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{info, warn};

const SKILL_ID: &str = "watchlist";

/// Active watches allowed on the free tier
pub const FREE_MAX_WATCHES: usize = 3;
/// Active watches allowed on the premium tier
pub const PREMIUM_MAX_WATCHES: usize = 100;

const QUOTA: QuotaLimits = QuotaLimits::new(10, Some(1000));
const SIGNAL_COUNT: usize = 5;

/// Rise between two sweeps (percent) reported as a spike
pub const PRICE_SPIKE_PCT: f64 = 15.0;
/// Fall between two sweeps (percent) reported as a crash
pub const PRICE_CRASH_PCT: f64 = -10.0;
/// Multiple of the average sampled volume reported as a surge
pub const VOLUME_SURGE_MULT: f64 = 3.0;
const VOLUME_SURGE_MIN_SAMPLES: usize = 5;
const TRACK_MAX_SAMPLES: usize = 100;

const PROFILE: SkillProfile = SkillProfile {
    id: SKILL_ID,
    name: "Price Watch",
    version: "1.0.0",
    description: "Watches token prices and alerts you when they cross your thresholds.",
    commands: &[
        "`watch <token> above|below <price>` - create an alert",
        "`list` - your active watches",
        "`remove #<id>` - delete a watch",
        "`check <token>` - price against your watches",
        "`price <token>` - current price",
        "`report <token>` - anomaly report for a watched token",
        "`signals` - top movers (premium)",
        "`portfolio` - your watched tokens (premium)",
        "`status` - agent health",
    ],
};

/// Direction of a price condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    /// Fires when price >= threshold
    Above,
    /// Fires when price <= threshold
    Below,
}

impl Condition {
    /// Whether `price` satisfies the condition for `threshold`
    #[must_use]
    pub fn holds(self, price: f64, threshold: f64) -> bool {
        match self {
            Self::Above => price >= threshold,
            Self::Below => price <= threshold,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Above => f.write_str("above"),
            Self::Below => f.write_str("below"),
        }
    }
}

/// One price watch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Watch {
    /// Per-sender id, shown as `#id`
    pub id: u32,
    /// Token contract address
    pub token: String,
    /// Token label at creation time
    pub label: String,
    /// Condition direction
    pub condition: Condition,
    /// Price threshold
    pub threshold: f64,
    /// Price when the watch was created
    pub baseline_price: f64,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Set once the alert fired
    pub triggered: bool,
    /// Cleared by `remove`
    pub active: bool,
}

/// Unusual move seen between two sweeps
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Anomaly {
    /// Price rose by at least [`PRICE_SPIKE_PCT`]
    Spike {
        /// Previous sample
        from: f64,
        /// Current price
        to: f64,
        /// Change in percent
        change_pct: f64,
    },
    /// Price fell by at least [`PRICE_CRASH_PCT`]
    Crash {
        /// Previous sample
        from: f64,
        /// Current price
        to: f64,
        /// Change in percent
        change_pct: f64,
    },
    /// 24h volume reached [`VOLUME_SURGE_MULT`] times its sampled average
    VolumeSurge {
        /// Current 24h volume
        volume: f64,
        /// Average of the previous samples
        average: f64,
    },
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Spike { from, to, change_pct } => write!(
                f,
                "Price spike {change_pct:+.2}% ({} -> {})",
                format_price(from),
                format_price(to)
            ),
            Self::Crash { from, to, change_pct } => write!(
                f,
                "Price crash {change_pct:+.2}% ({} -> {})",
                format_price(from),
                format_price(to)
            ),
            Self::VolumeSurge { volume, average } => write!(
                f,
                "Volume surge {:.1}x average ({} vs {})",
                volume / average,
                format_compact(volume),
                format_compact(average)
            ),
        }
    }
}

/// Sweep samples of one watched token
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenTrack {
    /// Sampled prices, oldest first
    pub prices: Vec<f64>,
    /// Sampled 24h volumes, oldest first
    pub volumes: Vec<f64>,
    /// Anomalies reported so far
    pub anomalies: u32,
}

impl TokenTrack {
    /// Anomalies of a new sample against the recorded ones.
    #[must_use]
    pub fn detect(&self, price: f64, volume: f64) -> Vec<Anomaly> {
        let mut found = Vec::new();
        if let Some(&from) = self.prices.last() {
            if from > 0.0 && price > 0.0 {
                let change_pct = (price - from) / from * 100.0;
                if change_pct >= PRICE_SPIKE_PCT {
                    found.push(Anomaly::Spike {
                        from,
                        to: price,
                        change_pct,
                    });
                } else if change_pct <= PRICE_CRASH_PCT {
                    found.push(Anomaly::Crash {
                        from,
                        to: price,
                        change_pct,
                    });
                }
            }
        }
        if self.volumes.len() >= VOLUME_SURGE_MIN_SAMPLES {
            let average = mean(&self.volumes);
            if average > 0.0 && volume >= average * VOLUME_SURGE_MULT {
                found.push(Anomaly::VolumeSurge { volume, average });
            }
        }
        found
    }

    /// Append a sample, keeping the most recent ones.
    pub fn record(&mut self, price: f64, volume: f64) {
        for (samples, value) in [(&mut self.prices, price), (&mut self.volumes, volume)] {
            samples.push(value);
            if samples.len() > TRACK_MAX_SAMPLES {
                samples.remove(0);
            }
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Parsed `watch` command
#[derive(Debug, Clone, PartialEq)]
pub struct WatchCommand {
    /// Token address or symbol as typed
    pub token: String,
    /// Condition direction
    pub condition: Condition,
    /// Price threshold
    pub threshold: f64,
}

/// Parses `watch|alert|notify|tell me when <token> [goes|is|reaches] above|below|over|under <price>`.
#[must_use]
pub fn parse_watch_command(text: &str) -> Option<WatchCommand> {
    let (_, token, direction, threshold) = regex_captures!(
        r"(?i)(?:watch|alert|notify|tell me when)\s+(?:when\s+|if\s+|me\s+(?:when|if)\s+)?(\S+)\s+(?:goes?\s+|is\s+|reaches?\s+)?(above|below|over|under)\s+\$?([\d.]+)",
        text
    )?;
    let condition = match direction.to_lowercase().as_str() {
        "above" | "over" => Condition::Above,
        _ => Condition::Below,
    };
    Some(WatchCommand {
        token: token.to_string(),
        condition,
        threshold: threshold.trim_end_matches('.').parse().ok()?,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intent {
    Help,
    Status,
    Tokenize,
    List,
    Remove,
    Watch,
    WatchUsage,
    Check,
    Report,
    Signals,
    Portfolio,
    Price,
    Greeting,
    Unknown,
}

fn rules() -> IntentRules<Intent> {
    IntentRules::new(Intent::Unknown)
        .exact_any(&["help", "?", "commands"], Intent::Help)
        .exact_any(&["status", "stats", "health"], Intent::Status)
        .prefix_any(&["tokenize"], Intent::Tokenize)
        .any_of(&["my alerts", "my watches", "list"], Intent::List)
        .exact_any(&["alerts", "watches"], Intent::List)
        .any_of(&["remove", "delete", "unwatch", "stop watching"], Intent::Remove)
        .when(|t| parse_watch_command(t).is_some(), Intent::Watch)
        .any_of(&["watch", "alert", "notify", "tell me when"], Intent::WatchUsage)
        .prefix_any(&["check"], Intent::Check)
        .prefix_any(&["report", "anomaly report", "anomalies"], Intent::Report)
        .any_of(&["signal"], Intent::Signals)
        .any_of(&["portfolio"], Intent::Portfolio)
        .any_of(&["price", "worth"], Intent::Price)
        .short_greeting(Intent::Greeting)
}

/// Price watchlist skill
pub struct WatchlistSkill {
    services: Services,
    quota: QuotaTracker,
    rules: IntentRules<Intent>,
}

impl WatchlistSkill {
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

    async fn watches(&self, sender: &str) -> Result<Vec<Watch>, SkillError> {
        Ok(storage::load(self.services.store.as_ref(), &watches_key(sender))
            .await?
            .unwrap_or_default())
    }

    async fn save_watches(&self, sender: &str, watches: &[Watch]) -> Result<(), SkillError> {
        storage::save(self.services.store.as_ref(), &watches_key(sender), &watches).await?;
        Ok(())
    }

    async fn owners(&self) -> Result<BTreeSet<String>, SkillError> {
        Ok(storage::load(self.services.store.as_ref(), WATCH_OWNERS_KEY)
            .await?
            .unwrap_or_default())
    }

    async fn add_owner(&self, sender: &str) -> Result<(), SkillError> {
        let mut owners = self.owners().await?;
        if owners.insert(sender.to_string()) {
            storage::save(self.services.store.as_ref(), WATCH_OWNERS_KEY, &owners).await?;
        }
        Ok(())
    }

    async fn remove_owner(&self, sender: &str) -> Result<(), SkillError> {
        let mut owners = self.owners().await?;
        if owners.remove(sender) {
            storage::save(self.services.store.as_ref(), WATCH_OWNERS_KEY, &owners).await?;
        }
        Ok(())
    }

    /// Resolve `query`, turning misses and upstream failures into replies.
    async fn resolve(&self, query: &str) -> Result<TokenSnapshot, Reply> {
        if query.is_empty() {
            return Err(Reply::text(
                "Which token? Send an address (0x...) or a symbol.",
            ));
        }
        match find_token(self.services.market.as_ref(), query).await {
            Ok(Some(token)) => Ok(token),
            Ok(None) => Err(Reply::text(format!("Token not found: {query}"))),
            Err(e) => {
                warn!(query, error = %e, "Token lookup failed");
                Err(Reply::text(format!(
                    "Could not fetch {query} right now. Please try again in a moment."
                )))
            }
        }
    }

    async fn create_watch(&self, turn: &Turn, command: WatchCommand) -> Result<Reply, SkillError> {
        let tier = match meter(&self.services, &self.quota, &turn.sender).await? {
            Metered::Allowed(tier) => tier,
            Metered::Rejected(reply) => return Ok(reply),
        };

        let mut watches = self.watches(&turn.sender).await?;
        let active = watches.iter().filter(|w| w.active && !w.triggered).count();
        let max = max_watches(tier);
        if active >= max {
            return Ok(Reply::text(format!(
                "You have {active} active watches (max {max} on the {tier} tier). \
                 Remove one with `remove #<id>` first."
            )));
        }

        let token = match self.resolve(&command.token).await {
            Ok(token) => token,
            Err(reply) => return Ok(reply),
        };
        let Some(baseline) = token.price else {
            return Ok(Reply::text(format!(
                "No price available for {} yet.",
                token.label()
            )));
        };

        let id = watches.iter().map(|w| w.id).max().unwrap_or(0) + 1;
        let watch = Watch {
            id,
            token: token.address.clone(),
            label: token.label(),
            condition: command.condition,
            threshold: command.threshold,
            baseline_price: baseline,
            created_at: turn.received_at,
            triggered: false,
            active: true,
        };
        let already_met = watch.condition.holds(baseline, watch.threshold);
        watches.push(watch);
        self.save_watches(&turn.sender, &watches).await?;
        self.add_owner(&turn.sender).await?;
        common::bump_stat(self.services.store.as_ref(), SKILL_ID, "alerts_created").await;

        info!(
            sender = %truncate_str(&turn.sender, 20),
            watch_id = id,
            token = %token.address,
            condition = %command.condition,
            threshold = command.threshold,
            "Watch created"
        );

        let mut text = format!(
            "Watch #{id} created\n\nToken: {}\nCondition: {} {}\nBaseline: {}",
            token.label(),
            command.condition,
            command.threshold,
            format_price(baseline)
        );
        if already_met {
            text.push_str("\n\nThe condition already holds; you will be alerted on the next check.");
        }
        Ok(Reply::text(text))
    }

    async fn list(&self, sender: &str) -> Result<Reply, SkillError> {
        let watches = self.watches(sender).await?;
        let lines: Vec<String> = watches
            .iter()
            .filter(|w| w.active)
            .map(|w| {
                format!(
                    "#{} {} {} {} (baseline {}){}",
                    w.id,
                    w.label,
                    w.condition,
                    w.threshold,
                    format_price(w.baseline_price),
                    if w.triggered { " - triggered" } else { "" }
                )
            })
            .collect();

        if lines.is_empty() {
            return Ok(Reply::text(
                "You have no watches. Try `watch <token> above <price>`.",
            ));
        }
        Ok(Reply::text(format!("**Your watches:**\n{}", lines.join("\n"))))
    }

    async fn remove(&self, sender: &str, text: &str) -> Result<Reply, SkillError> {
        let Some(id) = first_number(text).map(|n| n as u32) else {
            return Ok(Reply::text("Which watch? Use `remove #<id>` (see `list`)."));
        };

        let mut watches = self.watches(sender).await?;
        let Some(watch) = watches.iter_mut().find(|w| w.id == id && w.active) else {
            return Ok(Reply::text(format!("No active watch #{id}.")));
        };
        watch.active = false;
        if watches.iter().any(|w| w.active) {
            self.save_watches(sender, &watches).await?;
        } else {
            self.services.store.delete(&watches_key(sender)).await?;
            self.remove_owner(sender).await?;
        }
        Ok(Reply::text(format!("Watch #{id} removed.")))
    }

    async fn check(&self, turn: &Turn, query: &str) -> Result<Reply, SkillError> {
        if let Metered::Rejected(reply) = meter(&self.services, &self.quota, &turn.sender).await? {
            return Ok(reply);
        }
        let token = match self.resolve(query).await {
            Ok(token) => token,
            Err(reply) => return Ok(reply),
        };
        common::bump_stat(self.services.store.as_ref(), SKILL_ID, "checks_run").await;

        let Some(price) = token.price else {
            return Ok(Reply::text(format!("No price available for {}.", token.label())));
        };
        let mut text = format!("**{}**: {}", token.label(), format_price(price));

        let watches = self.watches(&turn.sender).await?;
        for watch in watches
            .iter()
            .filter(|w| w.active && w.token.eq_ignore_ascii_case(&token.address))
        {
            let state = if watch.triggered {
                "triggered".to_string()
            } else if watch.condition.holds(price, watch.threshold) {
                "condition met, alert pending".to_string()
            } else {
                format!("{:+.2}% from baseline", change_pct(watch.baseline_price, price))
            };
            text.push_str(&format!(
                "\n#{} {} {}: {state}",
                watch.id, watch.condition, watch.threshold
            ));
        }
        Ok(Reply::text(text))
    }

    async fn price(&self, turn: &Turn, query: &str) -> Result<Reply, SkillError> {
        if let Metered::Rejected(reply) = meter(&self.services, &self.quota, &turn.sender).await? {
            return Ok(reply);
        }
        let token = match self.resolve(query).await {
            Ok(token) => token,
            Err(reply) => return Ok(reply),
        };
        Ok(Reply::text(format!(
            "**{}**\nPrice: {}\nMarket cap: {}\nHolders: {}\nAddress: {}",
            token.label(),
            token.price.map_or_else(|| "n/a".to_string(), format_price),
            format_compact(token.market_cap),
            token.holders,
            short_address(&token.address)
        )))
    }

    async fn signals(&self, turn: &Turn) -> Result<Reply, SkillError> {
        match meter(&self.services, &self.quota, &turn.sender).await? {
            Metered::Rejected(reply) => return Ok(reply),
            Metered::Allowed(Tier::Free) => return Ok(premium_only(&self.services, "Signals")),
            Metered::Allowed(Tier::Premium) => {}
        }

        let mut tokens = match self.services.market.tokens(50).await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(error = %e, "Token list unavailable");
                Vec::new()
            }
        };
        if tokens.is_empty() {
            return Ok(Reply::text("No market data available right now."));
        }
        tokens.sort_by(|a, b| b.market_cap.total_cmp(&a.market_cap));

        let lines: Vec<String> = tokens
            .iter()
            .take(SIGNAL_COUNT)
            .enumerate()
            .map(|(i, t)| {
                format!(
                    "{}. {} - {} | vol {} | {} holders",
                    i + 1,
                    t.label(),
                    t.price.map_or_else(|| "n/a".to_string(), format_price),
                    format_compact(t.volume_24h),
                    t.holders
                )
            })
            .collect();
        Ok(Reply::text(format!("**Top signals:**\n{}", lines.join("\n"))))
    }

    async fn portfolio(&self, turn: &Turn) -> Result<Reply, SkillError> {
        match meter(&self.services, &self.quota, &turn.sender).await? {
            Metered::Rejected(reply) => return Ok(reply),
            Metered::Allowed(Tier::Free) => return Ok(premium_only(&self.services, "Portfolio")),
            Metered::Allowed(Tier::Premium) => {}
        }

        let watches = self.watches(&turn.sender).await?;
        let mut seen = BTreeSet::new();
        let mut lines = Vec::new();
        for watch in watches.iter().filter(|w| w.active) {
            if !seen.insert(watch.token.to_lowercase()) {
                continue;
            }
            let line = match self.services.market.token(&watch.token).await {
                Ok(TokenSnapshot {
                    price: Some(price), ..
                }) => format!(
                    "{}: {} ({:+.2}% since watch #{})",
                    watch.label,
                    format_price(price),
                    change_pct(watch.baseline_price, price),
                    watch.id
                ),
                Ok(_) => format!("{}: no price", watch.label),
                Err(e) => {
                    warn!(token = %watch.token, error = %e, "Portfolio price unavailable");
                    format!("{}: unavailable", watch.label)
                }
            };
            lines.push(line);
        }

        if lines.is_empty() {
            return Ok(Reply::text("Your portfolio is empty. Watch a token first."));
        }
        Ok(Reply::text(format!("**Portfolio:**\n{}", lines.join("\n"))))
    }

    async fn tracks(&self) -> Result<BTreeMap<String, TokenTrack>, SkillError> {
        Ok(storage::load(self.services.store.as_ref(), WATCH_TRACKS_KEY)
            .await?
            .unwrap_or_default())
    }

    async fn report(&self, turn: &Turn, query: &str) -> Result<Reply, SkillError> {
        if let Metered::Rejected(reply) = meter(&self.services, &self.quota, &turn.sender).await? {
            return Ok(reply);
        }
        let token = match self.resolve(query).await {
            Ok(token) => token,
            Err(reply) => return Ok(reply),
        };
        let tracks = self.tracks().await?;
        let Some(track) = tracks
            .get(&token.address.to_lowercase())
            .filter(|t| t.prices.len() >= 2)
        else {
            return Ok(Reply::text(format!(
                "Not enough data for {} yet. Watch it and check back after a few sweeps.",
                token.label()
            )));
        };

        let current = track.prices.last().copied().unwrap_or_default();
        let average = mean(&track.prices);
        let low = track.prices.iter().copied().fold(f64::INFINITY, f64::min);
        let high = track.prices.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let volatility = if average > 0.0 {
            (high - low) / average * 100.0
        } else {
            0.0
        };
        Ok(Reply::text(format!(
            "**Anomaly report: {}**\nSamples: {}\nCurrent: {}\nAverage: {}\nRange: {} - {}\nVolatility: {volatility:.2}%\nAverage volume: {}\nAnomalies: {}",
            token.label(),
            track.prices.len(),
            format_price(current),
            format_price(average),
            format_price(low),
            format_price(high),
            format_compact(mean(&track.volumes)),
            track.anomalies
        )))
    }

    /// Fetch each watched token once.
    async fn sample(&self, watched: &BTreeMap<String, WatchedToken>) -> BTreeMap<String, Sample> {
        let mut samples = BTreeMap::new();
        for (key, token) in watched {
            match self.services.market.token(&token.address).await {
                Ok(TokenSnapshot {
                    price: Some(price),
                    volume_24h,
                    ..
                }) => {
                    samples.insert(
                        key.clone(),
                        Sample {
                            price,
                            volume: volume_24h,
                        },
                    );
                }
                Ok(_) => {}
                Err(e) => warn!(token = %token.address, error = %e, "Sweep price fetch failed"),
            }
        }
        samples
    }

    /// Fire the watches of one owner whose condition holds, marking them triggered.
    async fn fire_owner(
        &self,
        owner: &str,
        mut watches: Vec<Watch>,
        samples: &BTreeMap<String, Sample>,
    ) -> Result<Vec<Notification>, SkillError> {
        let mut notifications = Vec::new();

        for watch in watches.iter_mut().filter(|w| w.active && !w.triggered) {
            let Some(price) = samples.get(&watch.token.to_lowercase()).map(|s| s.price) else {
                continue;
            };
            if !watch.condition.holds(price, watch.threshold) {
                continue;
            }

            watch.triggered = true;
            info!(
                owner = %truncate_str(owner, 20),
                watch_id = watch.id,
                price,
                "Watch triggered"
            );
            notifications.push(Notification {
                recipient: owner.to_string(),
                text: format!(
                    "**Alert Triggered!**\n\n{} is now {} ({} {})\nBaseline: {} ({:+.2}%)\nWatch #{} is done; create a new one to keep watching.",
                    watch.label,
                    format_price(price),
                    watch.condition,
                    watch.threshold,
                    format_price(watch.baseline_price),
                    change_pct(watch.baseline_price, price),
                    watch.id
                ),
                end_session: true,
            });
        }

        if !notifications.is_empty() {
            self.save_watches(owner, &watches).await?;
            for _ in &notifications {
                common::bump_stat(self.services.store.as_ref(), SKILL_ID, "alerts_triggered")
                    .await;
            }
        }
        Ok(notifications)
    }

    /// Record this sweep's samples and tell every watcher about anomalies.
    async fn report_anomalies(
        &self,
        watched: &BTreeMap<String, WatchedToken>,
        samples: &BTreeMap<String, Sample>,
    ) -> Result<Vec<Notification>, SkillError> {
        let mut tracks = self.tracks().await?;
        tracks.retain(|key, _| watched.contains_key(key));
        let mut notifications = Vec::new();

        for (key, token) in watched {
            let Some(sample) = samples.get(key) else {
                continue;
            };
            let track = tracks.entry(key.clone()).or_default();
            let anomalies = track.detect(sample.price, sample.volume);
            track.record(sample.price, sample.volume);
            if anomalies.is_empty() {
                continue;
            }

            track.anomalies += anomalies.len() as u32;
            info!(token = %token.address, count = anomalies.len(), "Anomaly detected");
            common::bump_stat(self.services.store.as_ref(), SKILL_ID, "anomalies_detected").await;
            let lines: Vec<String> = anomalies.iter().map(ToString::to_string).collect();
            let text = format!("**Anomaly: {}**\n\n{}", token.label, lines.join("\n"));
            notifications.extend(token.owners.iter().map(|owner| Notification {
                recipient: owner.clone(),
                text: text.clone(),
                end_session: true,
            }));
        }

        storage::save(self.services.store.as_ref(), WATCH_TRACKS_KEY, &tracks).await?;
        Ok(notifications)
    }
}

/// A token with at least one pending watch
struct WatchedToken {
    address: String,
    label: String,
    owners: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    price: f64,
    volume: f64,
}

const fn max_watches(tier: Tier) -> usize {
    match tier {
        Tier::Free => FREE_MAX_WATCHES,
        Tier::Premium => PREMIUM_MAX_WATCHES,
    }
}

fn change_pct(baseline: f64, price: f64) -> f64 {
    if baseline > 0.0 {
        (price - baseline) / baseline * 100.0
    } else {
        0.0
    }
}

#[async_trait]
impl Skill for WatchlistSkill {
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
            Intent::List => self.list(&turn.sender).await,
            Intent::Remove => self.remove(&turn.sender, &turn.text).await,
            Intent::Watch => match parse_watch_command(&turn.text) {
                Some(command) => self.create_watch(turn, command).await,
                None => Ok(watch_usage()),
            },
            Intent::WatchUsage => Ok(watch_usage()),
            Intent::Check => self.check(turn, &classified.argument).await,
            Intent::Report => self.report(turn, &classified.argument).await,
            Intent::Signals => self.signals(turn).await,
            Intent::Portfolio => self.portfolio(turn).await,
            Intent::Price => self.price(turn, &classified.argument).await,
            Intent::Unknown => Ok(Reply::text(
                "I didn't catch that. Try `watch <token> above <price>` or say 'help'.",
            )),
        }
    }

    async fn sweep(&self) -> Result<Vec<Notification>, SkillError> {
        let mut watched: BTreeMap<String, WatchedToken> = BTreeMap::new();
        let mut pending = Vec::new();
        for owner in self.owners().await? {
            let watches = match self.watches(&owner).await {
                Ok(watches) => watches,
                Err(e) => {
                    warn!(owner = %truncate_str(&owner, 20), error = %e, "Sweep failed for owner");
                    continue;
                }
            };
            for watch in watches.iter().filter(|w| w.active && !w.triggered) {
                watched
                    .entry(watch.token.to_lowercase())
                    .or_insert_with(|| WatchedToken {
                        address: watch.token.clone(),
                        label: watch.label.clone(),
                        owners: BTreeSet::new(),
                    })
                    .owners
                    .insert(owner.clone());
            }
            pending.push((owner, watches));
        }

        let samples = self.sample(&watched).await;
        let mut notifications = Vec::new();
        for (owner, watches) in pending {
            match self.fire_owner(&owner, watches, &samples).await {
                Ok(mut fired) => notifications.append(&mut fired),
                Err(e) => warn!(owner = %truncate_str(&owner, 20), error = %e, "Sweep failed for owner"),
            }
        }
        match self.report_anomalies(&watched, &samples).await {
            Ok(mut reported) => notifications.append(&mut reported),
            Err(e) => warn!(error = %e, "Anomaly tracking failed"),
        }
        Ok(notifications)
    }
}

fn watch_usage() -> Reply {
    Reply::text("Usage: `watch <token> above|below <price>`, e.g. `watch $FET above 0.5`.")
}
