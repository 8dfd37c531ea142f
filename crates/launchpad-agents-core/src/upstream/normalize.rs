//! Token record normalization
//!
//! The launch API is inconsistent about key names and value types. Every
//! handler reads token data through [`normalize_token`], which applies one
//! precedence table: for each field the first key that is present, non-null
//! and parseable wins. Numeric fields accept JSON numbers or numeric strings.

use super::UpstreamError;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field precedence table: normalized field, then source keys in priority order.
pub const FIELD_PRECEDENCE: &[(&str, &[&str])] = &[
    ("address", &["address", "tokenAddress"]),
    ("name", &["name"]),
    ("symbol", &["symbol", "ticker"]),
    ("price", &["price", "currentPrice"]),
    ("holders", &["holders", "holderCount"]),
    ("volume_24h", &["volume24h", "volume"]),
    ("liquidity", &["liquidity", "totalLiquidity"]),
    ("market_cap", &["marketCap", "market_cap"]),
    ("listed", &["listed"]),
    ("created_at", &["createdAt", "created_at"]),
    ("remaining_amount", &["remainingAmount"]),
];

const ENVELOPE_KEYS: &[&str] = &["data", "token"];
const LIST_KEYS: &[&str] = &["data", "tokens", "items"];

/// Normalized token record
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TokenSnapshot {
    /// Contract address (may be empty when the API omits it)
    pub address: String,
    /// Display name
    pub name: String,
    /// Ticker symbol
    pub symbol: String,
    /// Current price, `None` when the API reports none
    pub price: Option<f64>,
    /// Holder count
    pub holders: u64,
    /// 24h traded volume
    pub volume_24h: f64,
    /// Liquidity in the bonding curve or pool
    pub liquidity: f64,
    /// Market capitalization
    pub market_cap: f64,
    /// Whether the token graduated to a DEX
    pub listed: bool,
    /// Creation time
    pub created_at: Option<DateTime<Utc>>,
    /// Tokens left in the bonding curve
    pub remaining_amount: Option<f64>,
}

impl TokenSnapshot {
    /// Name with symbol, e.g. `Watcher ($WATCH)`
    #[must_use]
    pub fn label(&self) -> String {
        match (self.name.is_empty(), self.symbol.is_empty()) {
            (false, false) => format!("{} ({})", self.name, self.symbol),
            (false, true) => self.name.clone(),
            (true, false) => self.symbol.clone(),
            (true, true) => crate::utils::short_address(&self.address),
        }
    }
}

/// Normalizes a single token response.
///
/// Accepts a bare object or one wrapped in `{"data": ...}` / `{"token": ...}`.
///
/// # Errors
///
/// Returns `Parse` if no JSON object is found.
pub fn normalize_token(value: &Value) -> Result<TokenSnapshot, UpstreamError> {
    let object = unwrap_envelope(value)
        .as_object()
        .ok_or_else(|| UpstreamError::Parse("expected a token object".to_string()))?;
    Ok(snapshot_from(object))
}

/// Normalizes a token list response.
///
/// Accepts a bare array or an object with a `data`, `tokens` or `items` array.
/// Entries that are not objects or have no address are skipped.
///
/// # Errors
///
/// Returns `Parse` if no array is found.
pub fn normalize_token_list(value: &Value) -> Result<Vec<TokenSnapshot>, UpstreamError> {
    let items = list_items(value)
        .ok_or_else(|| UpstreamError::Parse("expected a token list".to_string()))?;
    Ok(items
        .iter()
        .filter_map(Value::as_object)
        .map(snapshot_from)
        .filter(|token| !token.address.is_empty())
        .collect())
}

/// Extracts a holder balance from a holders response.
///
/// Accepts `{"balance": x}` (optionally enveloped) or a holder list whose
/// entries carry `address`/`holder` and `balance`/`amount`. Unknown holders
/// have a zero balance.
///
/// # Errors
///
/// Returns `Parse` if the response has neither shape.
pub fn normalize_holder_balance(value: &Value, holder: &str) -> Result<f64, UpstreamError> {
    let inner = unwrap_envelope(value);
    if let Some(object) = inner.as_object() {
        if let Some(balance) = number_field(object, &["balance", "amount"]) {
            return Ok(balance);
        }
    }

    let holders = list_items(value)
        .or_else(|| inner.get("holders").and_then(Value::as_array))
        .ok_or_else(|| UpstreamError::Parse("expected a holder balance".to_string()))?;

    Ok(holders
        .iter()
        .filter_map(Value::as_object)
        .find(|entry| {
            string_field(entry, &["address", "holder"])
                .is_some_and(|address| address.eq_ignore_ascii_case(holder))
        })
        .and_then(|entry| number_field(entry, &["balance", "amount"]))
        .unwrap_or(0.0))
}

fn unwrap_envelope(value: &Value) -> &Value {
    let mut current = value;
    // Envelopes nest at most twice in practice (`{"data": {"token": ...}}`)
    for _ in 0..2 {
        let next = ENVELOPE_KEYS
            .iter()
            .find_map(|key| current.get(*key).filter(|inner| inner.is_object()));
        match next {
            Some(inner) => current = inner,
            None => break,
        }
    }
    current
}

fn list_items(value: &Value) -> Option<&Vec<Value>> {
    value.as_array().or_else(|| {
        LIST_KEYS
            .iter()
            .find_map(|key| value.get(*key).and_then(Value::as_array))
    })
}

fn keys_for(field: &str) -> &'static [&'static str] {
    FIELD_PRECEDENCE
        .iter()
        .find(|(name, _)| *name == field)
        .map(|(_, keys)| *keys)
        .unwrap_or_default()
}

fn snapshot_from(object: &Map<String, Value>) -> TokenSnapshot {
    let number = |field: &str| number_field(object, keys_for(field));
    let text = |field: &str| string_field(object, keys_for(field)).unwrap_or_default();

    TokenSnapshot {
        address: text("address"),
        name: text("name"),
        symbol: text("symbol"),
        price: number("price"),
        holders: number("holders").map_or(0, |h| h.max(0.0).round() as u64),
        volume_24h: number("volume_24h").unwrap_or(0.0),
        liquidity: number("liquidity").unwrap_or(0.0),
        market_cap: number("market_cap").unwrap_or(0.0),
        listed: keys_for("listed")
            .iter()
            .find_map(|key| object.get(*key).and_then(Value::as_bool))
            .unwrap_or(false),
        created_at: keys_for("created_at")
            .iter()
            .find_map(|key| object.get(*key).and_then(parse_timestamp)),
        remaining_amount: number("remaining_amount"),
    }
}

fn number_field(object: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .find_map(|key| object.get(*key).and_then(parse_number))
}

fn string_field(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        object
            .get(*key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
    })
}

fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite())
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok(),
        Value::Number(n) => {
            let raw = n.as_i64()?;
            // Millisecond timestamps are 13 digits
            if raw > 100_000_000_000 {
                Utc.timestamp_millis_opt(raw).single()
            } else {
                Utc.timestamp_opt(raw, 0).single()
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_primary_keys_win_over_fallbacks() {
        let raw = json!({
            "address": "0xaaa",
            "tokenAddress": "0xbbb",
            "price": 2.5,
            "currentPrice": 9.0,
            "holders": 12,
            "holderCount": 99
        });
        let token = normalize_token(&raw).expect("object");
        assert_eq!(token.address, "0xaaa");
        assert_eq!(token.price, Some(2.5));
        assert_eq!(token.holders, 12);
    }

    #[test]
    fn test_fallback_keys_and_numeric_strings() {
        let raw = json!({
            "success": true,
            "data": {
                "tokenAddress": "0xccc",
                "ticker": "WATCH",
                "price": null,
                "currentPrice": "0.00042",
                "holderCount": "37",
                "volume": "1200.5",
                "totalLiquidity": 800,
                "market_cap": "15000",
                "listed": true,
                "created_at": "2026-01-05T10:00:00Z"
            }
        });
        let token = normalize_token(&raw).expect("object");
        assert_eq!(token.address, "0xccc");
        assert_eq!(token.symbol, "WATCH");
        assert_eq!(token.price, Some(0.00042));
        assert_eq!(token.holders, 37);
        assert!((token.volume_24h - 1200.5).abs() < f64::EPSILON);
        assert!((token.liquidity - 800.0).abs() < f64::EPSILON);
        assert!((token.market_cap - 15000.0).abs() < f64::EPSILON);
        assert!(token.listed);
        assert_eq!(
            token.created_at.map(|dt| dt.to_rfc3339()),
            Some("2026-01-05T10:00:00+00:00".to_string())
        );
    }

    #[test]
    fn test_unparseable_primary_falls_through() {
        let raw = json!({"price": "n/a", "currentPrice": 3});
        assert_eq!(normalize_token(&raw).expect("object").price, Some(3.0));
    }

    #[test]
    fn test_millisecond_timestamps() {
        let raw = json!({"createdAt": 1_767_225_600_000_i64});
        let token = normalize_token(&raw).expect("object");
        assert_eq!(
            token.created_at.map(|dt| dt.timestamp()),
            Some(1_767_225_600)
        );
    }

    #[test]
    fn test_non_object_is_parse_error() {
        assert!(matches!(
            normalize_token(&json!("oops")),
            Err(UpstreamError::Parse(_))
        ));
    }

    #[test]
    fn test_list_shapes() {
        let bare = json!([{"address": "0x1"}, {"name": "no address"}, 5]);
        assert_eq!(normalize_token_list(&bare).expect("list").len(), 1);

        let wrapped = json!({"success": true, "data": [{"address": "0x1"}, {"address": "0x2"}]});
        assert_eq!(normalize_token_list(&wrapped).expect("list").len(), 2);

        let tokens = json!({"tokens": [{"tokenAddress": "0x3"}]});
        assert_eq!(
            normalize_token_list(&tokens).expect("list")[0].address,
            "0x3"
        );

        assert!(normalize_token_list(&json!({"data": {}})).is_err());
    }

    #[test]
    fn test_holder_balance_shapes() {
        let direct = json!({"data": {"balance": "1500"}});
        assert!((normalize_holder_balance(&direct, "tg:1").expect("balance") - 1500.0).abs() < 1e-9);

        let list = json!({"holders": [
            {"address": "0xAbC", "balance": 20},
            {"address": "0xdef", "balance": 5}
        ]});
        assert!((normalize_holder_balance(&list, "0xabc").expect("balance") - 20.0).abs() < 1e-9);
        assert!(normalize_holder_balance(&list, "0x999").expect("balance").abs() < 1e-9);

        assert!(normalize_holder_balance(&json!("nope"), "x").is_err());
    }

    #[test]
    fn test_label() {
        let token = TokenSnapshot {
            name: "Watcher".into(),
            symbol: "WATCH".into(),
            ..TokenSnapshot::default()
        };
        assert_eq!(token.label(), "Watcher (WATCH)");
    }
}
