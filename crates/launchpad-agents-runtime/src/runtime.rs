use crate::outbox::{InboundMessage, Outbox};
use launchpad_agents_core::agent::{Reply, Services, Skill, Turn};
use launchpad_agents_core::config::{get_max_input_chars, get_rate_limit_per_minute};
use launchpad_agents_core::gate::RateGate;
use launchpad_agents_core::reply::{acknowledge, render_at};
use launchpad_agents_core::utils::truncate_str;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Reply sent when a skill fails unexpectedly.
pub const APOLOGY: &str = "Sorry, something went wrong on my side. Please try again in a moment.";

/// One skill behind the shared turn pipeline.
///
/// Turns and sweeps run one at a time: the turn lock is held from gating
/// until the last notification is handed to the outbox, so skills can do
/// read-modify-write on the store without further coordination.
pub struct AgentRuntime {
    skill: Arc<dyn Skill>,
    services: Services,
    outbox: Arc<dyn Outbox>,
    gate: RateGate,
    turn_lock: Mutex<()>,
}

impl AgentRuntime {
    /// Create a runtime with the configured rate limit and input length.
    pub fn new(skill: Arc<dyn Skill>, services: Services, outbox: Arc<dyn Outbox>) -> Self {
        let gate = RateGate::new(
            get_rate_limit_per_minute(),
            get_max_input_chars(),
            services.clock.clone(),
        );
        Self::with_gate(skill, services, outbox, gate)
    }

    /// Create a runtime with an explicit rate gate.
    pub fn with_gate(
        skill: Arc<dyn Skill>,
        services: Services,
        outbox: Arc<dyn Outbox>,
        gate: RateGate,
    ) -> Self {
        Self {
            skill,
            services,
            outbox,
            gate,
            turn_lock: Mutex::new(()),
        }
    }

    /// The hosted skill.
    pub fn skill(&self) -> &Arc<dyn Skill> {
        &self.skill
    }

    /// Shared services.
    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Process one inbound message end to end.
    ///
    /// Never fails: delivery errors are logged and skill errors become
    /// [`APOLOGY`].
    #[instrument(skip_all, fields(skill = self.skill.profile().id, sender = %truncate_str(&inbound.sender, 20)))]
    pub async fn handle_inbound(&self, inbound: InboundMessage) {
        let ack = acknowledge(&inbound.msg_id, self.services.clock.now());
        if let Err(e) = self.outbox.send(&inbound.sender, ack).await {
            warn!(error = %e, "Acknowledgement failed");
        }

        let _turn = self.turn_lock.lock().await;
        let reply = self.answer(&inbound).await;
        self.deliver(&inbound.sender, &reply.text, reply.end_session)
            .await;
        for notification in reply.notifications {
            self.deliver(
                &notification.recipient,
                &notification.text,
                notification.end_session,
            )
            .await;
        }
    }

    async fn answer(&self, inbound: &InboundMessage) -> Reply {
        let text = match self.gate.check(&inbound.sender, &inbound.text) {
            Ok(text) => text,
            Err(e) => {
                info!(reason = %e, "Message rejected by gate");
                return Reply::ending(e.to_string());
            }
        };

        let turn = Turn::new(&inbound.sender, text, self.services.clock.now());
        match self.skill.handle(&turn).await {
            Ok(reply) => {
                self.services.health.record(true);
                reply
            }
            Err(e) => {
                error!(error = %e, "Skill failed to handle message");
                self.services.health.record(false);
                Reply::ending(APOLOGY)
            }
        }
    }

    async fn deliver(&self, recipient: &str, text: &str, end_session: bool) {
        let message = render_at(text, end_session, self.services.clock.now());
        if let Err(e) = self.outbox.send(recipient, message).await {
            error!(
                recipient = %truncate_str(recipient, 20),
                error = %e,
                "Reply delivery failed"
            );
        }
    }

    /// Run the skill's background check once and deliver what it produced.
    ///
    /// Returns the number of notifications handed to the outbox.
    #[instrument(skip_all, fields(skill = self.skill.profile().id))]
    pub async fn run_sweep(&self) -> usize {
        let _turn = self.turn_lock.lock().await;
        let notifications = match self.skill.sweep().await {
            Ok(notifications) => notifications,
            Err(e) => {
                error!(error = %e, "Sweep failed");
                return 0;
            }
        };
        if !notifications.is_empty() {
            info!(count = notifications.len(), "Sweep produced notifications");
        }
        let count = notifications.len();
        for notification in notifications {
            self.deliver(
                &notification.recipient,
                &notification.text,
                notification.end_session,
            )
            .await;
        }
        count
    }

    /// Run [`Self::run_sweep`] every `period` until `cancel` fires.
    ///
    /// The first sweep happens one period after spawning.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let runtime = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        runtime.run_sweep().await;
                    }
                }
            }
            debug!("Sweeper stopped");
        })
    }

    /// Log a health summary every `period` until `cancel` fires.
    pub fn spawn_health_log(self: &Arc<Self>, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let runtime = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = runtime.services.health.report();
                        info!(
                            skill = runtime.skill.profile().id,
                            status = report.status,
                            uptime_seconds = report.uptime_seconds,
                            requests = report.requests,
                            errors = report.errors,
                            "Health"
                        );
                    }
                }
            }
            debug!("Health log stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use launchpad_agents_core::agent::{Notification, SkillError, SkillProfile};
    use launchpad_agents_core::clock::{Clock, ManualClock};
    use launchpad_agents_core::config::AgentSettings;
    use launchpad_agents_core::reply::OutboundMessage;
    use launchpad_agents_core::storage::{KeyValueStore, MemoryStore};
    use launchpad_agents_core::upstream::{
        MarketData, TextGenerator, TokenSnapshot, TokenizeRequest, TokenizeResponse, UpstreamError,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PROFILE: SkillProfile = SkillProfile {
        id: "echo",
        name: "Echo",
        version: "0.0.1",
        description: "Repeats messages.",
        commands: &[],
    };

    /// Echoes text, fails on "boom", notifies "bob" on "tell bob".
    struct EchoSkill {
        sweeps: AtomicUsize,
    }

    #[async_trait]
    impl Skill for EchoSkill {
        fn profile(&self) -> &SkillProfile {
            &PROFILE
        }

        async fn handle(&self, turn: &Turn) -> Result<Reply, SkillError> {
            match turn.text.as_str() {
                "boom" => Err(SkillError::Internal("boom".to_string())),
                "tell bob" => Ok(Reply::ending("told").with_notification(Notification {
                    recipient: "bob".to_string(),
                    text: "hello from alice".to_string(),
                    end_session: true,
                })),
                text => Ok(Reply::text(format!("echo: {text}"))),
            }
        }

        async fn sweep(&self) -> Result<Vec<Notification>, SkillError> {
            let n = self.sweeps.fetch_add(1, Ordering::SeqCst);
            Ok(vec![Notification {
                recipient: "alice".to_string(),
                text: format!("sweep {n}"),
                end_session: true,
            }])
        }
    }

    struct NoMarket;

    #[async_trait]
    impl MarketData for NoMarket {
        async fn token(&self, _address: &str) -> Result<TokenSnapshot, UpstreamError> {
            Err(UpstreamError::Timeout)
        }
        async fn tokens(&self, _limit: usize) -> Result<Vec<TokenSnapshot>, UpstreamError> {
            Ok(Vec::new())
        }
        async fn holder_balance(&self, _token: &str, _holder: &str) -> Result<f64, UpstreamError> {
            Ok(0.0)
        }
        async fn agent_token(&self, _agent: &str) -> Result<Option<TokenSnapshot>, UpstreamError> {
            Ok(None)
        }
        async fn tokenize(
            &self,
            _request: &TokenizeRequest,
        ) -> Result<TokenizeResponse, UpstreamError> {
            Err(UpstreamError::Timeout)
        }
    }

    struct Silent;

    #[async_trait]
    impl TextGenerator for Silent {
        async fn generate(&self, _prompt: &str) -> Result<String, UpstreamError> {
            Ok(String::new())
        }
    }

    #[derive(Default)]
    struct RecordingOutbox {
        sent: std::sync::Mutex<Vec<(String, OutboundMessage)>>,
        fail_acks: bool,
    }

    impl RecordingOutbox {
        fn sent(&self) -> Vec<(String, OutboundMessage)> {
            self.sent
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone()
        }
    }

    #[async_trait]
    impl Outbox for RecordingOutbox {
        async fn send(&self, recipient: &str, message: OutboundMessage) -> Result<()> {
            if self.fail_acks && matches!(message, OutboundMessage::Ack { .. }) {
                anyhow::bail!("ack rejected");
            }
            self.sent
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push((recipient.to_string(), message));
            Ok(())
        }
    }

    fn runtime(outbox: Arc<RecordingOutbox>, rate_limit: usize) -> Arc<AgentRuntime> {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0)
                .single()
                .expect("valid date"),
        ));
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let services = Services::new(
            AgentSettings::default(),
            clock.clone(),
            store,
            Arc::new(NoMarket),
            Arc::new(Silent),
        );
        let skill = Arc::new(EchoSkill {
            sweeps: AtomicUsize::new(0),
        });
        let gate = RateGate::new(rate_limit, 50, clock);
        Arc::new(AgentRuntime::with_gate(skill, services, outbox, gate))
    }

    #[tokio::test]
    async fn acknowledges_before_replying() {
        let outbox = Arc::new(RecordingOutbox::default());
        let runtime = runtime(outbox.clone(), 5);

        runtime
            .handle_inbound(InboundMessage::new("alice", "  hi there ", "m-1"))
            .await;

        let sent = outbox.sent();
        assert_eq!(sent.len(), 2);
        assert!(matches!(
            &sent[0].1,
            OutboundMessage::Ack { acknowledged_msg_id, .. } if acknowledged_msg_id == "m-1"
        ));
        assert_eq!(sent[1].0, "alice");
        assert_eq!(sent[1].1.text(), "echo: hi there");
        assert!(!sent[1].1.ends_session());
    }

    #[tokio::test]
    async fn failed_ack_does_not_stop_the_turn() {
        let outbox = Arc::new(RecordingOutbox {
            fail_acks: true,
            ..RecordingOutbox::default()
        });
        let runtime = runtime(outbox.clone(), 5);

        runtime
            .handle_inbound(InboundMessage::new("alice", "hello", "m-1"))
            .await;

        let sent = outbox.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.text(), "echo: hello");
    }

    #[tokio::test]
    async fn gate_rejections_end_the_session() {
        let outbox = Arc::new(RecordingOutbox::default());
        let runtime = runtime(outbox.clone(), 2);

        for (text, id) in [("   ", "m-1"), (&*"x".repeat(51), "m-2"), ("hello", "m-3")] {
            runtime
                .handle_inbound(InboundMessage::new("alice", text, id))
                .await;
        }

        let replies: Vec<OutboundMessage> = outbox
            .sent()
            .into_iter()
            .map(|(_, m)| m)
            .filter(|m| matches!(m, OutboundMessage::Chat { .. }))
            .collect();
        assert_eq!(replies[0].text(), "Empty message.");
        assert_eq!(replies[1].text(), "Message too long (max 50 chars).");
        assert_eq!(replies[2].text(), "Rate limit exceeded. Please wait a moment.");
        assert!(replies.iter().all(OutboundMessage::ends_session));
        assert_eq!(runtime.services().health.report().requests, 0);
    }

    #[tokio::test]
    async fn skill_error_becomes_apology_and_counts() {
        let outbox = Arc::new(RecordingOutbox::default());
        let runtime = runtime(outbox.clone(), 5);

        runtime
            .handle_inbound(InboundMessage::new("alice", "boom", "m-1"))
            .await;

        let sent = outbox.sent();
        assert_eq!(sent[1].1.text(), APOLOGY);
        assert!(sent[1].1.ends_session());
        let report = runtime.services().health.report();
        assert_eq!((report.requests, report.errors), (1, 1));
    }

    #[tokio::test]
    async fn notifications_follow_the_reply() {
        let outbox = Arc::new(RecordingOutbox::default());
        let runtime = runtime(outbox.clone(), 5);

        runtime
            .handle_inbound(InboundMessage::new("alice", "tell bob", "m-1"))
            .await;

        let sent = outbox.sent();
        let recipients: Vec<&str> = sent.iter().map(|(r, _)| r.as_str()).collect();
        assert_eq!(recipients, vec!["alice", "alice", "bob"]);
        assert_eq!(sent[2].1.text(), "hello from alice");
        assert!(sent[2].1.ends_session());
    }

    #[tokio::test]
    async fn sweep_delivers_notifications() {
        let outbox = Arc::new(RecordingOutbox::default());
        let runtime = runtime(outbox.clone(), 5);

        assert_eq!(runtime.run_sweep().await, 1);
        let sent = outbox.sent();
        assert_eq!(sent[0].0, "alice");
        assert_eq!(sent[0].1.text(), "sweep 0");
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_runs_on_interval_until_cancelled() {
        let outbox = Arc::new(RecordingOutbox::default());
        let runtime = runtime(outbox.clone(), 5);
        let cancel = CancellationToken::new();

        let handle = runtime.spawn_sweeper(Duration::from_secs(300), cancel.clone());
        tokio::time::sleep(Duration::from_secs(301)).await;
        tokio::time::sleep(Duration::from_secs(300)).await;
        cancel.cancel();
        handle.await.expect("sweeper joins");

        let texts: Vec<String> = outbox.sent().iter().map(|(_, m)| m.text()).collect();
        assert_eq!(texts, vec!["sweep 0".to_string(), "sweep 1".to_string()]);
    }
}
