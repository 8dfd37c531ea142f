//! On-chain treasury client
//!
//! Talks JSON-RPC to an EVM node. Transactions are submitted with
//! `eth_sendTransaction` from an account managed by the node's signer, so no
//! key material lives in this process. Amounts are decimal strings converted
//! to base units with integer arithmetic only.

use crate::config::{get_upstream_http_timeout_secs, AgentSettings};
use crate::upstream::http::{create_http_client, post_json};
use crate::upstream::UpstreamError;
use async_trait::async_trait;
use lazy_regex::regex_is_match;
use reqwest::Client as HttpClient;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Decimals of both the native coin and the gift token
pub const TOKEN_DECIMALS: u32 = 18;

/// `balanceOf(address)` selector
const BALANCE_OF_SELECTOR: &str = "70a08231";
/// `transfer(address,uint256)` selector
const TRANSFER_SELECTOR: &str = "a9059cbb";

const TOKEN_TRANSFER_GAS: u64 = 100_000;
const NATIVE_TRANSFER_GAS: u64 = 21_000;

/// Failure of a treasury operation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// Recipient is not `0x` followed by 40 hex characters
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    /// Amount is not a non-negative decimal with at most 18 fractional digits
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    /// The node answered with a JSON-RPC error
    #[error("RPC error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code
        code: i64,
        /// Error message from the node
        message: String,
    },
    /// Transport failure reaching the node
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    /// Required chain settings are missing
    #[error("Chain is not configured: {0} is not set")]
    NotConfigured(&'static str),
}

/// Treasury holdings in base units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TreasuryBalance {
    /// Gift token balance
    pub token: u128,
    /// Native coin balance
    pub native: u128,
}

/// Treasury account able to pay out tokens and gas
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Treasury: Send + Sync {
    /// Treasury account address
    fn address(&self) -> String;
    /// Current token and native balances
    async fn balances(&self) -> Result<TreasuryBalance, ChainError>;
    /// Transfer `amount` gift tokens to `recipient`, returning the tx hash
    async fn send_token(&self, recipient: &str, amount: &str) -> Result<String, ChainError>;
    /// Transfer `amount` native coin to `recipient`, returning the tx hash
    async fn send_native(&self, recipient: &str, amount: &str) -> Result<String, ChainError>;
}

/// [`Treasury`] backed by a JSON-RPC node
pub struct RpcTreasury {
    http: HttpClient,
    rpc_url: String,
    treasury: String,
    token: String,
    chain_id: u64,
}

impl RpcTreasury {
    /// Create a client for `treasury` paying out `token` on `chain_id`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAddress` if either address is malformed.
    pub fn new(
        rpc_url: &str,
        treasury: &str,
        token: &str,
        chain_id: u64,
        timeout: Duration,
    ) -> Result<Self, ChainError> {
        validate_address(treasury)?;
        validate_address(token)?;
        Ok(Self {
            http: create_http_client(timeout),
            rpc_url: rpc_url.to_string(),
            treasury: treasury.to_string(),
            token: token.to_string(),
            chain_id,
        })
    }

    /// Create a client from agent settings.
    ///
    /// # Errors
    ///
    /// Returns `NotConfigured` when the RPC URL, treasury or token address is
    /// missing.
    pub fn from_settings(settings: &AgentSettings) -> Result<Self, ChainError> {
        let rpc_url = settings
            .chain_rpc_url
            .as_deref()
            .filter(|v| !v.is_empty())
            .ok_or(ChainError::NotConfigured("CHAIN_RPC_URL"))?;
        let treasury = settings
            .treasury_address
            .as_deref()
            .filter(|v| !v.is_empty())
            .ok_or(ChainError::NotConfigured("TREASURY_ADDRESS"))?;
        let token = settings
            .gift_token_address
            .as_deref()
            .filter(|v| !v.is_empty())
            .ok_or(ChainError::NotConfigured("GIFT_TOKEN_ADDRESS"))?;
        Self::new(
            rpc_url,
            treasury,
            token,
            settings.chain_id,
            Duration::from_secs(get_upstream_http_timeout_secs()),
        )
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let response = post_json(&self.http, &self.rpc_url, &body, &[]).await?;

        if let Some(error) = response.get("error") {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            warn!(method, code, message = %message, "RPC call failed");
            return Err(ChainError::Rpc { code, message });
        }

        response
            .get("result")
            .cloned()
            .ok_or_else(|| UpstreamError::Parse(format!("{method}: missing result")).into())
    }

    async fn quantity(&self, method: &str, params: Value) -> Result<u128, ChainError> {
        let result = self.call(method, params).await?;
        let hex = result
            .as_str()
            .ok_or_else(|| UpstreamError::Parse(format!("{method}: result is not a string")))?;
        parse_quantity(hex)
    }

    async fn submit(&self, mut tx: Value) -> Result<String, ChainError> {
        let gas_price = self.quantity("eth_gasPrice", json!([])).await?;
        tx["from"] = json!(self.treasury);
        tx["gasPrice"] = json!(format!("{gas_price:#x}"));
        tx["chainId"] = json!(format!("{:#x}", self.chain_id));

        let hash = self.call("eth_sendTransaction", json!([tx])).await?;
        hash.as_str()
            .map(ToString::to_string)
            .ok_or_else(|| UpstreamError::Parse("eth_sendTransaction: missing hash".into()).into())
    }
}

#[async_trait]
impl Treasury for RpcTreasury {
    fn address(&self) -> String {
        self.treasury.clone()
    }

    async fn balances(&self) -> Result<TreasuryBalance, ChainError> {
        let native = self
            .quantity("eth_getBalance", json!([self.treasury, "latest"]))
            .await?;
        let call = json!({
            "to": self.token,
            "data": format!("0x{BALANCE_OF_SELECTOR}{}", encode_address(&self.treasury)?),
        });
        let token = self.quantity("eth_call", json!([call, "latest"])).await?;
        Ok(TreasuryBalance { token, native })
    }

    async fn send_token(&self, recipient: &str, amount: &str) -> Result<String, ChainError> {
        let data = transfer_calldata(recipient, to_base_units(amount, TOKEN_DECIMALS)?)?;
        let hash = self
            .submit(json!({
                "to": self.token,
                "data": data,
                "gas": format!("{TOKEN_TRANSFER_GAS:#x}"),
            }))
            .await?;
        info!(recipient = %recipient, amount, tx = %hash, "Token transfer submitted");
        Ok(hash)
    }

    async fn send_native(&self, recipient: &str, amount: &str) -> Result<String, ChainError> {
        validate_address(recipient)?;
        let value = to_base_units(amount, TOKEN_DECIMALS)?;
        let hash = self
            .submit(json!({
                "to": recipient,
                "value": format!("{value:#x}"),
                "gas": format!("{NATIVE_TRANSFER_GAS:#x}"),
            }))
            .await?;
        info!(recipient = %recipient, amount, tx = %hash, "Native transfer submitted");
        Ok(hash)
    }
}

/// Checks that `address` is `0x` followed by 40 hex characters.
///
/// # Errors
///
/// Returns `InvalidAddress` otherwise.
pub fn validate_address(address: &str) -> Result<(), ChainError> {
    if regex_is_match!(r"^0x[a-fA-F0-9]{40}$", address) {
        Ok(())
    } else {
        Err(ChainError::InvalidAddress(address.to_string()))
    }
}

fn encode_address(address: &str) -> Result<String, ChainError> {
    validate_address(address)?;
    Ok(format!("{:0>64}", address[2..].to_lowercase()))
}

/// ABI-encoded `transfer(recipient, amount)` call data.
///
/// # Errors
///
/// Returns `InvalidAddress` for a malformed recipient.
pub fn transfer_calldata(recipient: &str, amount: u128) -> Result<String, ChainError> {
    Ok(format!(
        "0x{TRANSFER_SELECTOR}{}{amount:064x}",
        encode_address(recipient)?
    ))
}

/// Converts a decimal string to base units with `decimals` fractional digits.
///
/// # Errors
///
/// Returns `InvalidAmount` for signs, exponents, too many fractional digits
/// or values that overflow `u128`.
pub fn to_base_units(amount: &str, decimals: u32) -> Result<u128, ChainError> {
    let invalid = || ChainError::InvalidAmount(amount.to_string());
    let amount_trimmed = amount.trim();
    let (whole, fraction) = amount_trimmed
        .split_once('.')
        .unwrap_or((amount_trimmed, ""));

    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if (whole.is_empty() && fraction.is_empty())
        || !all_digits(whole)
        || !all_digits(fraction)
        || fraction.len() > decimals as usize
    {
        return Err(invalid());
    }

    let scale = 10u128.checked_pow(decimals).ok_or_else(invalid)?;
    let whole: u128 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| invalid())?
    };
    let fraction: u128 = if fraction.is_empty() {
        0
    } else {
        let padded = format!("{fraction:0<width$}", width = decimals as usize);
        padded.parse().map_err(|_| invalid())?
    };

    whole
        .checked_mul(scale)
        .and_then(|w| w.checked_add(fraction))
        .ok_or_else(invalid)
}

/// Formats base units as a decimal string without trailing zeros.
#[must_use]
pub fn format_units(value: u128, decimals: u32) -> String {
    let scale = 10u128.pow(decimals);
    let whole = value / scale;
    let fraction = value % scale;
    if fraction == 0 {
        return whole.to_string();
    }
    let fraction = format!("{fraction:0>width$}", width = decimals as usize);
    format!("{whole}.{}", fraction.trim_end_matches('0'))
}

/// Parses a `0x`-prefixed hex quantity.
///
/// # Errors
///
/// Returns `Upstream(Parse)` for malformed or oversized values.
pub fn parse_quantity(hex: &str) -> Result<u128, ChainError> {
    let digits = hex.strip_prefix("0x").unwrap_or(hex).trim_start_matches('0');
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16)
        .map_err(|e| UpstreamError::Parse(format!("bad quantity {hex}: {e}")).into())
}
