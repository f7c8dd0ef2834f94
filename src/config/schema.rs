//! KDL schema for config.kdl.
//!
//! ```kdl
//! lock-timeout-ms 5000
//! lock-initial-backoff-ms 10
//! lock-max-backoff-ms 250
//! default-priority "medium"
//! ```

use crate::models::Priority;
use kdl::{KdlDocument, KdlEntry, KdlNode, KdlValue};

/// Mode for config.kdl (owner read/write only).
#[cfg(unix)]
pub const CONFIG_FILE_MODE: u32 = 0o600;

/// Upper bound accepted for any millisecond setting (10 minutes).
pub const MAX_MILLIS: u64 = 600_000;

pub const LOCK_TIMEOUT_KEY: &str = "lock-timeout-ms";
pub const LOCK_INITIAL_BACKOFF_KEY: &str = "lock-initial-backoff-ms";
pub const LOCK_MAX_BACKOFF_KEY: &str = "lock-max-backoff-ms";
pub const DEFAULT_PRIORITY_KEY: &str = "default-priority";

/// Every key `config set` accepts.
pub const CONFIG_KEYS: &[&str] = &[
    LOCK_TIMEOUT_KEY,
    LOCK_INITIAL_BACKOFF_KEY,
    LOCK_MAX_BACKOFF_KEY,
    DEFAULT_PRIORITY_KEY,
];

/// Settings stored in a data directory's config.kdl.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeferralConfig {
    /// How long a writer waits for the lock before giving up
    pub lock_timeout_ms: Option<u64>,

    /// First backoff delay between lock attempts
    pub lock_initial_backoff_ms: Option<u64>,

    /// Cap on a single backoff delay
    pub lock_max_backoff_ms: Option<u64>,

    /// Priority for captured items that do not specify one
    pub default_priority: Option<Priority>,
}

impl DeferralConfig {
    /// Create an empty config with no values set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the config values.
    ///
    /// Returns an error message if any value is invalid.
    pub fn validate(&self) -> Result<(), String> {
        for (key, value) in [
            (LOCK_TIMEOUT_KEY, self.lock_timeout_ms),
            (LOCK_INITIAL_BACKOFF_KEY, self.lock_initial_backoff_ms),
            (LOCK_MAX_BACKOFF_KEY, self.lock_max_backoff_ms),
        ] {
            if let Some(ms) = value {
                if ms > MAX_MILLIS {
                    return Err(format!("{} must be at most {}, got {}", key, MAX_MILLIS, ms));
                }
            }
        }
        if self.lock_initial_backoff_ms == Some(0) {
            return Err(format!("{} must be at least 1", LOCK_INITIAL_BACKOFF_KEY));
        }
        if let (Some(initial), Some(max)) = (self.lock_initial_backoff_ms, self.lock_max_backoff_ms)
        {
            if max < initial {
                return Err(format!(
                    "{} ({}) must not be below {} ({})",
                    LOCK_MAX_BACKOFF_KEY, max, LOCK_INITIAL_BACKOFF_KEY, initial
                ));
            }
        }
        Ok(())
    }

    /// Parse config from a KDL document. Unknown nodes and malformed values are ignored.
    pub fn from_kdl(doc: &KdlDocument) -> Self {
        let mut config = Self::new();

        config.lock_timeout_ms = millis_node(doc, LOCK_TIMEOUT_KEY);
        config.lock_initial_backoff_ms = millis_node(doc, LOCK_INITIAL_BACKOFF_KEY);
        config.lock_max_backoff_ms = millis_node(doc, LOCK_MAX_BACKOFF_KEY);

        if let Some(node) = doc.get(DEFAULT_PRIORITY_KEY) {
            if let Some(entry) = node.entries().first() {
                if let Some(s) = entry.value().as_string() {
                    config.default_priority = s.parse().ok();
                }
            }
        }

        config
    }

    /// Convert config to a KDL document.
    pub fn to_kdl(&self) -> KdlDocument {
        let mut doc = KdlDocument::new();

        for (key, value) in [
            (LOCK_TIMEOUT_KEY, self.lock_timeout_ms),
            (LOCK_INITIAL_BACKOFF_KEY, self.lock_initial_backoff_ms),
            (LOCK_MAX_BACKOFF_KEY, self.lock_max_backoff_ms),
        ] {
            if let Some(ms) = value {
                let mut node = KdlNode::new(key);
                node.push(KdlEntry::new(KdlValue::Integer(ms as i128)));
                doc.nodes_mut().push(node);
            }
        }

        if let Some(priority) = self.default_priority {
            let mut node = KdlNode::new(DEFAULT_PRIORITY_KEY);
            node.push(KdlEntry::new(KdlValue::String(priority.as_str().to_string())));
            doc.nodes_mut().push(node);
        }

        doc
    }

    /// Set a value from its string form, validating the result.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        let mut next = self.clone();
        match key {
            LOCK_TIMEOUT_KEY => next.lock_timeout_ms = Some(parse_millis(key, value)?),
            LOCK_INITIAL_BACKOFF_KEY => {
                next.lock_initial_backoff_ms = Some(parse_millis(key, value)?)
            }
            LOCK_MAX_BACKOFF_KEY => next.lock_max_backoff_ms = Some(parse_millis(key, value)?),
            DEFAULT_PRIORITY_KEY => next.default_priority = Some(value.parse()?),
            _ => {
                return Err(format!(
                    "Unknown config key: {} (expected one of: {})",
                    key,
                    CONFIG_KEYS.join(", ")
                ));
            }
        }
        next.validate()?;
        *self = next;
        Ok(())
    }
}

fn millis_node(doc: &KdlDocument, key: &str) -> Option<u64> {
    let node = doc.get(key)?;
    let entry = node.entries().first()?;
    let value = entry.value().as_integer()?;
    u64::try_from(value).ok()
}

fn parse_millis(key: &str, value: &str) -> Result<u64, String> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| format!("{} must be a non-negative integer, got {:?}", key, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_document() {
        let doc: KdlDocument = r#"
            lock-timeout-ms 1500
            lock-initial-backoff-ms 5
            lock-max-backoff-ms 100
            default-priority "high"
        "#
        .parse()
        .unwrap();

        let config = DeferralConfig::from_kdl(&doc);
        assert_eq!(config.lock_timeout_ms, Some(1500));
        assert_eq!(config.lock_initial_backoff_ms, Some(5));
        assert_eq!(config.lock_max_backoff_ms, Some(100));
        assert_eq!(config.default_priority, Some(Priority::High));
    }

    #[test]
    fn test_parse_ignores_unknown_and_malformed() {
        let doc: KdlDocument = r#"
            future-key "value"
            lock-timeout-ms -4
            default-priority "urgent"
        "#
        .parse()
        .unwrap();

        assert_eq!(DeferralConfig::from_kdl(&doc), DeferralConfig::new());
    }

    #[test]
    fn test_kdl_roundtrip() {
        let config = DeferralConfig {
            lock_timeout_ms: Some(2000),
            lock_initial_backoff_ms: None,
            lock_max_backoff_ms: Some(50),
            default_priority: Some(Priority::Low),
        };

        let text = config.to_kdl().to_string();
        let doc: KdlDocument = text.parse().unwrap();
        assert_eq!(DeferralConfig::from_kdl(&doc), config);
    }

    #[test]
    fn test_set_validates() {
        let mut config = DeferralConfig::new();

        config.set(LOCK_TIMEOUT_KEY, "750").unwrap();
        config.set(DEFAULT_PRIORITY_KEY, "HIGH").unwrap();
        assert_eq!(config.lock_timeout_ms, Some(750));
        assert_eq!(config.default_priority, Some(Priority::High));

        assert!(config.set(LOCK_TIMEOUT_KEY, "soon").is_err());
        assert!(config.set(LOCK_TIMEOUT_KEY, "999999999").is_err());
        assert!(config.set(DEFAULT_PRIORITY_KEY, "urgent").is_err());
        assert!(config.set("editor", "vim").is_err());
        assert_eq!(config.lock_timeout_ms, Some(750));
    }

    #[test]
    fn test_backoff_bounds() {
        let mut config = DeferralConfig::new();
        config.set(LOCK_INITIAL_BACKOFF_KEY, "20").unwrap();
        assert!(config.set(LOCK_MAX_BACKOFF_KEY, "10").is_err());
        assert!(config.set(LOCK_INITIAL_BACKOFF_KEY, "0").is_err());
        config.set(LOCK_MAX_BACKOFF_KEY, "40").unwrap();
        assert_eq!(config.lock_max_backoff_ms, Some(40));
    }
}
