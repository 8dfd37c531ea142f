use dotenvy::dotenv;
use launchpad_agents_core::agent::Services;
use launchpad_agents_core::config::{get_sweep_interval_secs, AgentSettings, HEALTH_LOG_INTERVAL_SECS};
use launchpad_agents_core::skills::{build_skill, SkillKind};
use launchpad_agents_runtime::AgentRuntime;
use launchpad_agents_transport_telegram::config::TelegramSettings;
use launchpad_agents_transport_telegram::runner::run_bot;
use launchpad_agents_transport_telegram::TelegramOutbox;
use regex::Regex;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use teloxide::Bot;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Regex patterns for redacting secrets from log output
struct RedactionPatterns {
    token1: Regex,
    token2: Regex,
    token3: Regex,
    api_key_header: Regex,
    bearer: Regex,
    env_secret: Regex,
    r2_1: Regex,
    r2_2: Regex,
}

impl RedactionPatterns {
    /// Compile all patterns
    ///
    /// # Errors
    ///
    /// Returns an error if any regex pattern is invalid
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            token1: Regex::new(r"(https?://[^/]+/bot)([0-9]+:[A-Za-z0-9_-]+)(/['\s]*)")?,
            token2: Regex::new(r"([0-9]{8,10}:[A-Za-z0-9_-]{35})")?,
            token3: Regex::new(r"(bot[0-9]{8,10}:)[A-Za-z0-9_-]+")?,
            api_key_header: Regex::new(r#"(?i)("?x-api-key"?\s*[:=]\s*"?)[^\s",}]+"#)?,
            bearer: Regex::new(r"(Bearer\s+)[A-Za-z0-9._-]+")?,
            env_secret: Regex::new(r"((?:AGENT_LAUNCH_API_KEY|HUGGINGFACE_API_KEY)=)[^\s&]+")?,
            r2_1: Regex::new(r"R2_ACCESS_KEY_ID=[^\s&]+")?,
            r2_2: Regex::new(r"R2_SECRET_ACCESS_KEY=[^\s&]+")?,
        })
    }

    fn redact(&self, input: &str) -> String {
        let mut output = self
            .token1
            .replace_all(input, "$1[TELEGRAM_TOKEN]$3")
            .to_string();
        output = self
            .token2
            .replace_all(&output, "[TELEGRAM_TOKEN]")
            .to_string();
        output = self
            .token3
            .replace_all(&output, "$1[TELEGRAM_TOKEN]")
            .to_string();
        output = self
            .api_key_header
            .replace_all(&output, "${1}[MASKED]")
            .to_string();
        output = self.bearer.replace_all(&output, "${1}[MASKED]").to_string();
        output = self
            .env_secret
            .replace_all(&output, "${1}[MASKED]")
            .to_string();
        output = self
            .r2_1
            .replace_all(&output, "R2_ACCESS_KEY_ID=[MASKED]")
            .to_string();
        self.r2_2
            .replace_all(&output, "R2_SECRET_ACCESS_KEY=[MASKED]")
            .to_string()
    }
}

struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> RedactingWriter<W> {
    const fn new(inner: W, patterns: Arc<RedactionPatterns>) -> Self {
        Self { inner, patterns }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let redacted = self.patterns.redact(&s);
        self.inner.write_all(redacted.as_bytes())?;
        // The whole input was consumed even if the redacted text is shorter.
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<F> RedactingMakeWriter<F> {
    const fn new(make_inner: F, patterns: Arc<RedactionPatterns>) -> Self {
        Self {
            make_inner,
            patterns,
        }
    }
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::new((self.make_inner)(), self.patterns.clone())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let patterns = Arc::new(RedactionPatterns::new().map_err(|e| {
        eprintln!("Failed to compile regex patterns: {e}");
        e
    })?);
    init_logging(patterns);

    info!("Starting launchpad agent bot...");

    let (agent_settings, telegram_settings) = init_settings();
    let kind = select_skill(&agent_settings);
    let services = init_services(agent_settings).await;
    let skill = match build_skill(kind, services.clone()) {
        Ok(skill) => skill,
        Err(e) => {
            error!(skill = %kind, error = %e, "Failed to build skill");
            std::process::exit(1);
        }
    };
    let profile = skill.profile();
    info!(skill = profile.id, name = profile.name, version = profile.version, "Skill ready");

    let bot = Bot::new(telegram_settings.telegram_token.clone());
    let outbox = Arc::new(TelegramOutbox::new(bot.clone()));
    let runtime = Arc::new(AgentRuntime::new(skill, services, outbox));

    let cancel = CancellationToken::new();
    let sweeper = runtime.spawn_sweeper(
        Duration::from_secs(get_sweep_interval_secs()),
        cancel.clone(),
    );
    let health_log =
        runtime.spawn_health_log(Duration::from_secs(HEALTH_LOG_INTERVAL_SECS), cancel.clone());

    run_bot(bot, Arc::new(telegram_settings), runtime).await;

    info!("Stopping background tasks...");
    cancel.cancel();
    let (sweeper, health_log) = tokio::join!(sweeper, health_log);
    if let Err(e) = sweeper.and(health_log) {
        error!(error = %e, "Background task ended abnormally");
    }
    Ok(())
}

fn init_logging(patterns: Arc<RedactionPatterns>) {
    let make_writer = RedactingMakeWriter::new(io::stderr, patterns);

    let debug_mode = std::env::var("DEBUG_MODE")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);

    let filter = if debug_mode {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(
                "launchpad_agents_core=info,launchpad_agents_runtime=info,launchpad_agents_transport_telegram=info,launchpad_agents_bot=info,hyper=warn,h2=error,reqwest=warn,tokio=warn,tower=warn,aws_config=warn",
            )
        })
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}

fn init_settings() -> (AgentSettings, TelegramSettings) {
    let agent_settings = match AgentSettings::new() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to load agent configuration: {}", e);
            std::process::exit(1);
        }
    };
    let telegram_settings = match TelegramSettings::new() {
        Ok(settings) if !settings.telegram_token.trim().is_empty() => settings,
        Ok(_) => {
            error!("TELEGRAM_TOKEN is empty");
            std::process::exit(1);
        }
        Err(e) => {
            error!("Failed to load telegram configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("Configuration loaded successfully.");
    (agent_settings, telegram_settings)
}

/// Resolves `AGENT_SKILL` and checks the secrets that skill cannot run without.
fn select_skill(settings: &AgentSettings) -> SkillKind {
    let kind = match settings.agent_skill.parse::<SkillKind>() {
        Ok(kind) => kind,
        Err(e) => {
            error!("Invalid AGENT_SKILL: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(missing) = missing_secret(kind, settings) {
        error!(skill = %kind, "{} is required for this skill", missing);
        std::process::exit(1);
    }
    kind
}

fn missing_secret(kind: SkillKind, settings: &AgentSettings) -> Option<&'static str> {
    let is_blank = |value: &Option<String>| value.as_deref().is_none_or(|v| v.trim().is_empty());
    match kind {
        SkillKind::Content if is_blank(&settings.huggingface_api_key) => {
            Some("HUGGINGFACE_API_KEY")
        }
        _ => None,
    }
}

async fn init_services(settings: AgentSettings) -> Services {
    match Services::connect(settings).await {
        Ok(services) => services,
        Err(e) => {
            error!("Failed to initialize storage: {}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redaction_masks_secrets() {
        let patterns = RedactionPatterns::new().expect("patterns compile");

        let url = "POST https://api.telegram.org/bot123456789:AAEhBP0av28SxBqYlHw1PFmQj5g1yHhVhXo/sendMessage";
        let redacted = patterns.redact(url);
        assert!(redacted.contains("[TELEGRAM_TOKEN]"), "{redacted}");
        assert!(!redacted.contains("AAEhBP0av28"));

        let redacted = patterns.redact(r#"headers: {"X-API-Key": "sk_live_123"} Bearer hf_abc.def"#);
        assert!(!redacted.contains("sk_live_123"), "{redacted}");
        assert!(!redacted.contains("hf_abc"), "{redacted}");

        let redacted = patterns.redact("HUGGINGFACE_API_KEY=hf_secret R2_SECRET_ACCESS_KEY=xyz");
        assert_eq!(
            redacted,
            "HUGGINGFACE_API_KEY=[MASKED] R2_SECRET_ACCESS_KEY=[MASKED]"
        );
    }

    #[test]
    fn test_content_skill_needs_inference_key() {
        let mut settings = AgentSettings::default();
        assert_eq!(
            missing_secret(SkillKind::Content, &settings),
            Some("HUGGINGFACE_API_KEY")
        );
        settings.huggingface_api_key = Some("hf_x".to_string());
        assert_eq!(missing_secret(SkillKind::Content, &settings), None);
        assert_eq!(missing_secret(SkillKind::Market, &AgentSettings::default()), None);
    }
}
