//! Topic patterns stored in broker ACL records
//!
//! Patterns follow MQTT topic filter rules: single-level (`+`) and
//! multi-level (`#`) wildcards are allowed, empty levels are not.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A validated MQTT topic filter, serialized as `{"pattern": "..."}`
/// the way VerneMQ ACL documents store it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicPattern {
    pattern: String,
}

impl TopicPattern {
    /// Validate and wrap a topic filter
    pub fn new(pattern: impl Into<String>) -> Result<Self> {
        let pattern = pattern.into();
        if !is_valid_filter(&pattern) {
            return Err(Error::Config(format!("invalid topic pattern: {:?}", pattern)));
        }
        Ok(Self { pattern })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}

/// Check if a topic filter is valid
///
/// # Rules
/// * `#` must be the last level and alone in it
/// * `+` must be the entire level
/// * Empty levels are not allowed (no `//`)
pub fn is_valid_filter(filter: &str) -> bool {
    if filter.is_empty() {
        return false;
    }

    let levels: Vec<&str> = filter.split('/').collect();

    for (i, level) in levels.iter().enumerate() {
        if level.is_empty() {
            return false;
        }

        if level.contains('#') && (*level != "#" || i != levels.len() - 1) {
            return false;
        }

        if level.contains('+') && *level != "+" {
            return false;
        }
    }

    true
}

/// Check if a string can be used as a single topic level (no separators, no wildcards)
pub fn is_valid_level(level: &str) -> bool {
    !level.is_empty() && !level.contains(['/', '+', '#'])
}
