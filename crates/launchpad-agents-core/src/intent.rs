//! Keyword intent classification
//!
//! An [`IntentRules`] is an ordered list of `(matcher, label)` pairs. The
//! first matcher that accepts the lowercased, trimmed text decides the label;
//! if none does, the default label is used. There is no grammar and no
//! ambiguity resolution beyond rule order.

use lazy_regex::regex_find;

/// Greeting words recognised by [`IntentRules::short_greeting`]
pub const GREETING_WORDS: &[&str] = &["hi", "hello", "hey", "yo", "sup", "gm"];

/// Greetings longer than this are treated as regular text
const SHORT_GREETING_MAX_CHARS: usize = 20;

/// Filler words dropped after a matched keyword (`tweet about x` -> `x`)
const FILLER_WORDS: &[&str] = &["about", "on", "of", "for"];

type Predicate = Box<dyn Fn(&str) -> bool + Send + Sync>;

enum Matcher {
    AnyOf(&'static [&'static str]),
    Exact(&'static [&'static str]),
    Prefix(&'static [&'static str]),
    ShortGreeting,
    Custom(Predicate),
}

impl Matcher {
    /// Byte offset in `lower` where the argument starts, if the rule matches.
    fn matches(&self, lower: &str) -> Option<usize> {
        match self {
            Self::AnyOf(words) => words
                .iter()
                .find_map(|w| lower.find(w).map(|pos| pos + w.len())),
            Self::Exact(words) => words.contains(&lower).then_some(lower.len()),
            Self::Prefix(words) => words
                .iter()
                .find(|w| lower.starts_with(**w))
                .map(|w| w.len()),
            Self::ShortGreeting => is_short_greeting(lower).then_some(0),
            Self::Custom(predicate) => predicate(lower).then_some(0),
        }
    }
}

/// Result of classifying one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified<L> {
    /// Matched (or default) label
    pub label: L,
    /// Text following the matched keyword, or the whole message for
    /// predicate rules and the default
    pub argument: String,
}

/// Ordered keyword rules with a fallback label
pub struct IntentRules<L> {
    rules: Vec<(Matcher, L)>,
    default: L,
}

impl<L: Copy> IntentRules<L> {
    /// Empty rule list; unmatched text gets `default`
    #[must_use]
    pub fn new(default: L) -> Self {
        Self {
            rules: Vec::new(),
            default,
        }
    }

    /// Match when the text contains any of `words`
    #[must_use]
    pub fn any_of(mut self, words: &'static [&'static str], label: L) -> Self {
        self.rules.push((Matcher::AnyOf(words), label));
        self
    }

    /// Match when the whole text equals one of `words`
    #[must_use]
    pub fn exact_any(mut self, words: &'static [&'static str], label: L) -> Self {
        self.rules.push((Matcher::Exact(words), label));
        self
    }

    /// Match when the text starts with one of `words`
    #[must_use]
    pub fn prefix_any(mut self, words: &'static [&'static str], label: L) -> Self {
        self.rules.push((Matcher::Prefix(words), label));
        self
    }

    /// Match short messages containing a greeting word
    #[must_use]
    pub fn short_greeting(mut self, label: L) -> Self {
        self.rules.push((Matcher::ShortGreeting, label));
        self
    }

    /// Match with an arbitrary predicate over the lowercased text
    #[must_use]
    pub fn when<F>(mut self, predicate: F, label: L) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.rules.push((Matcher::Custom(Box::new(predicate)), label));
        self
    }

    /// Label `text` with the first matching rule.
    #[must_use]
    pub fn classify(&self, text: &str) -> Classified<L> {
        let trimmed = text.trim();
        let lower = trimmed.to_lowercase();

        for (matcher, label) in &self.rules {
            if let Some(end) = matcher.matches(&lower) {
                let argument = if end == 0 {
                    trimmed.to_string()
                } else {
                    remainder(trimmed, &lower, end)
                };
                return Classified {
                    label: *label,
                    argument,
                };
            }
        }

        Classified {
            label: self.default,
            argument: trimmed.to_string(),
        }
    }
}

/// Rest of the message after byte `end` of its lowercased form, keeping the
/// original casing whenever lowercasing did not shift byte offsets.
fn remainder(original: &str, lower: &str, end: usize) -> String {
    let rest = if original.len() == lower.len() && original.is_char_boundary(end) {
        &original[end..]
    } else {
        &lower[end..]
    };
    strip_filler(rest)
}

fn strip_filler(rest: &str) -> String {
    let rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ':' || c == ',');
    for filler in FILLER_WORDS {
        let Some(head) = rest.get(..filler.len()) else {
            continue;
        };
        let after = &rest[filler.len()..];
        if head.eq_ignore_ascii_case(filler) && after.starts_with(char::is_whitespace) {
            return after.trim().to_string();
        }
    }
    rest.trim().to_string()
}

/// Returns `true` when `text` contains any of `words` (case-insensitive).
#[must_use]
pub fn contains_any(text: &str, words: &[&str]) -> bool {
    let lower = text.to_lowercase();
    words.iter().any(|w| lower.contains(w))
}

/// Returns `true` for a short message containing a greeting word.
#[must_use]
pub fn is_short_greeting(text: &str) -> bool {
    if text.chars().count() >= SHORT_GREETING_MAX_CHARS {
        return false;
    }
    let lower = text.to_lowercase();
    lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| GREETING_WORDS.contains(&word))
}

/// Everything after the first of `keywords` (and an optional
/// `about`/`on`/`of`/`for`), or `None` if no keyword occurs.
#[must_use]
pub fn strip_through_keyword(text: &str, keywords: &[&str]) -> Option<String> {
    let trimmed = text.trim();
    let lower = trimmed.to_lowercase();
    keywords
        .iter()
        .find_map(|k| lower.find(k).map(|pos| pos + k.len()))
        .map(|end| remainder(trimmed, &lower, end))
}

/// First `0x`-prefixed 20-byte hex address in `text`.
#[must_use]
pub fn find_evm_address(text: &str) -> Option<String> {
    regex_find!(r"0x[a-fA-F0-9]{40}", text).map(str::to_string)
}

/// First agent address (`agent1q...`) in `text`.
#[must_use]
pub fn find_agent_address(text: &str) -> Option<String> {
    regex_find!(r"agent1q[a-z0-9]{38,60}", text).map(str::to_string)
}

/// First decimal number in `text`, ignoring digits inside hex addresses.
#[must_use]
pub fn first_number(text: &str) -> Option<f64> {
    regex_find!(r"\b\d+(?:\.\d+)?\b", text).and_then(|n| n.parse().ok())
}
