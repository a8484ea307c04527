//! Argument redaction for audit records and approval prompts

use regex::Regex;
use serde_json::{Map, Value};

/// Replacement written in place of sensitive values
pub const REDACTED: &str = "[REDACTED]";

/// Key fragments treated as sensitive unless configured otherwise
pub const DEFAULT_SENSITIVE_KEYS: &[&str] =
    &["password", "secret", "token", "api_key", "authorization"];

/// Masks secrets in tool arguments before they leave the gate
///
/// A value is masked when its object key contains one of the sensitive key
/// fragments (case-insensitive), or when it is a string matching one of the
/// value patterns.
#[derive(Debug, Clone)]
pub struct ArgumentRedactor {
    enabled: bool,
    keys: Vec<String>,
    patterns: Vec<Regex>,
}

impl Default for ArgumentRedactor {
    fn default() -> Self {
        Self {
            enabled: true,
            keys: DEFAULT_SENSITIVE_KEYS.iter().map(|k| k.to_string()).collect(),
            patterns: Vec::new(),
        }
    }
}

impl ArgumentRedactor {
    /// Build a redactor from key fragments and value regexes
    pub fn new<K, S>(keys: K, patterns: &[&str]) -> Result<Self, regex::Error>
    where
        K: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            enabled: true,
            keys: keys
                .into_iter()
                .map(|k| k.as_ref().to_lowercase())
                .collect(),
            patterns,
        })
    }

    /// A redactor that passes arguments through unchanged
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            keys: Vec::new(),
            patterns: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Return a redacted copy of `args`
    pub fn redact(&self, args: &Value) -> Value {
        if !self.enabled {
            return args.clone();
        }
        self.redact_value(args)
    }

    fn redact_value(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, inner) in map {
                    let replaced = if self.is_sensitive_key(key) {
                        Value::String(REDACTED.to_string())
                    } else {
                        self.redact_value(inner)
                    };
                    out.insert(key.clone(), replaced);
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(|v| self.redact_value(v)).collect()),
            Value::String(s) if self.patterns.iter().any(|p| p.is_match(s)) => {
                Value::String(REDACTED.to_string())
            }
            other => other.clone(),
        }
    }

    fn is_sensitive_key(&self, key: &str) -> bool {
        let key = key.to_lowercase();
        self.keys.iter().any(|fragment| key.contains(fragment.as_str()))
    }
}
