//! Creates a token on the launch platform and prints the handoff link a
//! human uses to deploy it on-chain.

use anyhow::{bail, Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use launchpad_agents_core::config::AgentSettings;
use launchpad_agents_core::upstream::{LaunchpadClient, MarketData, TokenizeRequest};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const MAX_NAME_CHARS: usize = 32;
const MAX_TICKER_CHARS: usize = 11;
const DEFAULT_TICKER_CHARS: usize = 6;

/// Create a launchpad token for an agent
#[derive(Parser, Debug)]
#[command(name = "launch-token", version)]
struct Args {
    /// Token name (max 32 chars)
    #[arg(long)]
    name: String,
    /// Token symbol (max 11 chars); defaults to the first 6 chars of the name
    #[arg(long)]
    ticker: Option<String>,
    /// Token description
    #[arg(long, default_value = "")]
    description: String,
    /// Logo URL
    #[arg(long)]
    logo: Option<String>,
    /// Chain id: 97 (BSC testnet) or 56 (BSC mainnet)
    #[arg(long, default_value_t = 97)]
    chain_id: u64,
    /// Address of the agent the token represents
    #[arg(long, env = "AGENT_ADDRESS")]
    agent_address: String,
}

impl Args {
    fn into_request(self) -> Result<TokenizeRequest> {
        let name: String = self.name.trim().chars().take(MAX_NAME_CHARS).collect();
        if name.is_empty() {
            bail!("--name must not be empty");
        }
        let ticker = self
            .ticker
            .as_deref()
            .map(|t| t.trim().trim_start_matches('$').to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| name.chars().take(DEFAULT_TICKER_CHARS).collect())
            .to_uppercase()
            .chars()
            .take(MAX_TICKER_CHARS)
            .collect();
        let description = if self.description.trim().is_empty() {
            format!("AI agent token: {name}")
        } else {
            self.description.trim().to_string()
        };

        Ok(TokenizeRequest {
            agent_address: self.agent_address.trim().to_string(),
            name,
            symbol: ticker,
            description,
            image: self.logo.filter(|l| !l.trim().is_empty()),
            chain_id: self.chain_id,
        })
    }
}

async fn run(args: Args) -> Result<()> {
    let settings = AgentSettings::new().context("Failed to load configuration")?;
    if settings
        .agent_launch_api_key
        .as_deref()
        .is_none_or(|k| k.trim().is_empty())
    {
        bail!("AGENT_LAUNCH_API_KEY environment variable required");
    }

    let request = args.into_request()?;
    info!(name = %request.name, symbol = %request.symbol, chain_id = request.chain_id, "Creating token");

    let client = LaunchpadClient::from_settings(&settings);
    let response = client
        .tokenize(&request)
        .await
        .context("Token creation failed")?;

    println!("Token created successfully!");
    println!("  Name:   {}", request.name);
    println!("  Symbol: {}", request.symbol);
    println!("  ID:     {}", response.token_id);
    println!();
    println!("Handoff link (send to a human to deploy):");
    println!("  {}", settings.handoff_link(&response.token_id));
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
