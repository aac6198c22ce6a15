//! Sensitive-data scrubbing for audit payloads.
//!
//! Two passes over every value:
//! - field-name masking: any key in [`SENSITIVE_FIELD_NAMES`] is replaced wholesale
//! - pattern masking: secrets embedded inside free-text strings

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};

pub const REDACTED: &str = "***REDACTED***";

const MAX_DEPTH: usize = 10;

/// Keys whose values are always replaced (compared case-insensitively).
pub const SENSITIVE_FIELD_NAMES: &[&str] = &[
    "password",
    "passwd",
    "pwd",
    "secret",
    "api_key",
    "apikey",
    "api_keys",
    "x-api-key",
    "token",
    "bearer",
    "authorization",
    "auth",
    "credentials",
    "private_key",
    "aws_secret_access_key",
    "aws_access_key_id",
    "database_url",
    "connection_string",
];

enum Mask {
    KeyValue,
    Email,
    LastFour { prefix: &'static str },
}

static PATTERNS: LazyLock<Vec<(Mask, Regex)>> = LazyLock::new(|| {
    let specs: [(Mask, &str); 6] = [
        (
            Mask::KeyValue,
            r#"(?i)(api[_-]?key|apikey)["']?\s*[:=]\s*["']?([a-zA-Z0-9_\-]+)"#,
        ),
        (
            Mask::KeyValue,
            r#"(?i)(password|passwd|pwd)["']?\s*[:=]\s*["']?([^\s"']+)"#,
        ),
        (
            Mask::KeyValue,
            r#"(?i)(token|bearer)["']?\s*[:=]\s*["']?([a-zA-Z0-9_.\-]+)"#,
        ),
        (
            Mask::LastFour { prefix: "****-****-****-" },
            r"\b\d{4}[\s\-]?\d{4}[\s\-]?\d{4}[\s\-]?\d{4}\b",
        ),
        (Mask::LastFour { prefix: "***-**-" }, r"\b\d{3}-\d{2}-\d{4}\b"),
        (
            Mask::Email,
            r"\b[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}\b",
        ),
    ];

    specs
        .into_iter()
        .filter_map(|(mask, pattern)| match Regex::new(pattern) {
            Ok(re) => Some((mask, re)),
            Err(e) => {
                tracing::error!(pattern, error = %e, "Invalid redaction pattern");
                None
            }
        })
        .collect()
});

/// Redacts sensitive information from audit and config payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct Redactor;

impl Redactor {
    pub fn is_sensitive_field(name: &str) -> bool {
        let lowered = name.to_ascii_lowercase();
        SENSITIVE_FIELD_NAMES.contains(&lowered.as_str())
    }

    /// Mask secret-looking substrings in free text.
    pub fn redact_string(&self, text: &str) -> String {
        let mut redacted = text.to_string();
        for (mask, re) in PATTERNS.iter() {
            redacted = match mask {
                Mask::KeyValue => re
                    .replace_all(&redacted, |caps: &Captures| format!("{}={}", &caps[1], REDACTED))
                    .into_owned(),
                Mask::LastFour { prefix } => re
                    .replace_all(&redacted, |caps: &Captures| {
                        let digits = &caps[0];
                        let tail = &digits[digits.len().saturating_sub(4)..];
                        format!("{prefix}{tail}")
                    })
                    .into_owned(),
                Mask::Email => re
                    .replace_all(&redacted, |caps: &Captures| {
                        let whole = &caps[0];
                        match whole.split_once('@') {
                            Some((local, domain)) => {
                                let keep: String = local.chars().take(3).collect();
                                format!("{keep}***@{domain}")
                            }
                            None => REDACTED.to_string(),
                        }
                    })
                    .into_owned(),
            };
        }
        redacted
    }

    /// Recursively scrub a JSON value.
    pub fn redact_value(&self, value: Value) -> Value {
        self.redact_at_depth(value, MAX_DEPTH)
    }

    fn redact_at_depth(&self, value: Value, depth: usize) -> Value {
        if depth == 0 {
            return value;
        }
        match value {
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, inner) in map {
                    let scrubbed = if Self::is_sensitive_field(&key) {
                        Value::String(REDACTED.to_string())
                    } else {
                        self.redact_at_depth(inner, depth - 1)
                    };
                    out.insert(key, scrubbed);
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| self.redact_at_depth(item, depth - 1))
                    .collect(),
            ),
            Value::String(s) => Value::String(self.redact_string(&s)),
            other => other,
        }
    }
}
