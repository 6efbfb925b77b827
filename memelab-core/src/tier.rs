//! Subscription tiers and tool names.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// Separator between the tool name and the canonical parameters in a cache key.
pub const KEY_SEPARATOR: char = ':';

// ============================================================================
// TIER
// ============================================================================

/// Subscription tier of the caller.
///
/// Higher tiers get fresher (shorter-lived) cache entries. How a caller's tier
/// is resolved is not the cache's concern; it arrives here already decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Premium,
    Enterprise,
}

impl Tier {
    /// All tiers, lowest first.
    pub const ALL: [Tier; 3] = [Tier::Free, Tier::Premium, Tier::Enterprise];

    /// Lowercase wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Premium => "premium",
            Tier::Enterprise => "enterprise",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Tier {
    type Err = TierParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "premium" => Ok(Tier::Premium),
            "enterprise" => Ok(Tier::Enterprise),
            _ => Err(TierParseError(s.to_string())),
        }
    }
}

/// Error when parsing an invalid tier string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierParseError(pub String);

impl fmt::Display for TierParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid tier: {}", self.0)
    }
}

impl std::error::Error for TierParseError {}

// ============================================================================
// TOOL NAME
// ============================================================================

/// Validated name of a cached operation category (`trending`, `translate`, ...).
///
/// The only way to obtain one is [`ToolName::new`], so every cache operation
/// that takes a `ToolName` has already passed input validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ToolName(String);

impl ToolName {
    /// Validate and wrap a tool name.
    ///
    /// Rejects empty or whitespace-only names and names containing the key
    /// separator, which would make tool-scoped prefix scans ambiguous.
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "tool".to_string(),
            });
        }
        if name.contains(KEY_SEPARATOR) {
            return Err(ValidationError::InvalidValue {
                field: "tool".to_string(),
                reason: format!("must not contain '{}'", KEY_SEPARATOR),
            });
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ToolName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for ToolName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<&str> for ToolName {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<String> for ToolName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl<'de> Deserialize<'de> for ToolName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        ToolName::new(raw).map_err(serde::de::Error::custom)
    }
}
