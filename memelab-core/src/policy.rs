//! Tool- and tier-dependent expiry policy.
//!
//! Every cached tool has a row of three durations, one per [`Tier`]. Tools
//! without a row fall back to the `default` row. Rows must be monotonic:
//! enterprise entries never outlive premium ones, premium never outlive free.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{ConfigError, MemelabError, MemelabResult};
use crate::tier::{Tier, ToolName};

const SECS_PER_MINUTE: u64 = 60;

/// Longest TTL a row may carry: 100 years.
pub const MAX_TTL_MINUTES: u64 = 100 * 365 * 24 * 60;

/// TTL durations for one tool, in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierTtls {
    pub free: u64,
    pub premium: u64,
    pub enterprise: u64,
}

impl TierTtls {
    pub const fn minutes(free: u64, premium: u64, enterprise: u64) -> Self {
        Self {
            free,
            premium,
            enterprise,
        }
    }

    /// Minutes configured for `tier`.
    pub fn minutes_for(&self, tier: Tier) -> u64 {
        match tier {
            Tier::Free => self.free,
            Tier::Premium => self.premium,
            Tier::Enterprise => self.enterprise,
        }
    }

    /// Duration configured for `tier`.
    pub fn duration_for(&self, tier: Tier) -> Duration {
        Duration::from_secs(self.minutes_for(tier).saturating_mul(SECS_PER_MINUTE))
    }

    /// True when `enterprise <= premium <= free`.
    pub fn is_monotonic(&self) -> bool {
        self.enterprise <= self.premium && self.premium <= self.free
    }

    fn check(&self, tool: &str) -> Result<(), ConfigError> {
        if !self.is_monotonic() {
            return Err(ConfigError::NonMonotonicTtl {
                tool: tool.to_string(),
                free_mins: self.free,
                premium_mins: self.premium,
                enterprise_mins: self.enterprise,
            });
        }
        // Monotonic, so free is the largest.
        if self.free > MAX_TTL_MINUTES {
            return Err(ConfigError::InvalidValue {
                field: format!("ttl.{tool}.free"),
                value: self.free.to_string(),
                reason: format!("exceeds the maximum of {MAX_TTL_MINUTES} minutes"),
            });
        }
        Ok(())
    }
}

/// Tools the product caches, with their standard TTL rows.
pub const STANDARD_TTLS: [(&str, TierTtls); 5] = [
    ("trending", TierTtls::minutes(360, 60, 5)),
    ("analyze-token", TierTtls::minutes(1440, 360, 15)),
    ("contract-meme", TierTtls::minutes(720, 180, 10)),
    ("translate", TierTtls::minutes(1440, 720, 60)),
    ("trend-meme", TierTtls::minutes(180, 30, 5)),
];

/// Row used for tools without an entry of their own.
pub const STANDARD_DEFAULT_TTLS: TierTtls = TierTtls::minutes(360, 60, 5);

/// Lookup table mapping `(tool, tier)` to a TTL.
///
/// Built once at startup and injected into the cache. Construction validates
/// monotonicity and the [`MAX_TTL_MINUTES`] bound, so a `TtlPolicy` in hand is
/// always well-formed and every TTL it yields fits a timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TtlPolicy {
    default: TierTtls,
    tools: BTreeMap<String, TierTtls>,
}

/// On-disk shape of a TTL override file.
#[derive(Debug, Clone, Deserialize)]
struct TtlPolicyFile {
    default: Option<TierTtls>,
    #[serde(default)]
    tools: BTreeMap<String, TierTtls>,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

impl TtlPolicy {
    /// Build a policy from a default row and per-tool rows.
    pub fn new(default: TierTtls, tools: BTreeMap<String, TierTtls>) -> MemelabResult<Self> {
        default.check("default")?;
        for (tool, ttls) in &tools {
            ToolName::new(tool.as_str())?;
            ttls.check(tool)?;
        }
        Ok(Self { default, tools })
    }

    /// The standard table shipped with the product.
    pub fn standard() -> Self {
        Self {
            default: STANDARD_DEFAULT_TTLS,
            tools: STANDARD_TTLS
                .iter()
                .map(|(tool, ttls)| (tool.to_string(), *ttls))
                .collect(),
        }
    }

    /// Parse a TOML override and layer it over the standard table.
    ///
    /// Tools named in the file replace their standard row; a `[default]`
    /// section replaces the fallback row. The merged table is validated.
    pub fn from_toml_str(input: &str) -> MemelabResult<Self> {
        let file: TtlPolicyFile = toml::from_str(input).map_err(|e| {
            MemelabError::Config(ConfigError::InvalidValue {
                field: "ttl_policy".to_string(),
                value: "<toml>".to_string(),
                reason: e.to_string(),
            })
        })?;

        let standard = Self::standard();
        let default = file.default.unwrap_or(standard.default);
        let mut tools = standard.tools;
        tools.extend(file.tools);
        Self::new(default, tools)
    }

    /// TTL for `tool` at `tier`, falling back to the default row.
    pub fn resolve(&self, tool: &ToolName, tier: Tier) -> Duration {
        self.row(tool.as_str()).duration_for(tier)
    }

    /// Row for `tool`, or the default row.
    pub fn row(&self, tool: &str) -> &TierTtls {
        self.tools.get(tool).unwrap_or(&self.default)
    }

    pub fn default_row(&self) -> &TierTtls {
        &self.default
    }

    /// Tools with an explicit row.
    pub fn tools(&self) -> impl Iterator<Item = (&str, &TierTtls)> {
        self.tools.iter().map(|(tool, ttls)| (tool.as_str(), ttls))
    }

    /// Longest TTL any entry can receive under this policy.
    pub fn max_ttl(&self) -> Duration {
        self.tools
            .values()
            .chain(std::iter::once(&self.default))
            .map(|ttls| ttls.duration_for(Tier::Free))
            .max()
            .unwrap_or(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str) -> ToolName {
        ToolName::new(name).unwrap()
    }

    fn mins(n: u64) -> Duration {
        Duration::from_secs(n * 60)
    }

    #[test]
    fn test_standard_table_exact_values() {
        let policy = TtlPolicy::standard();
        let expected = [
            ("trending", 360, 60, 5),
            ("analyze-token", 1440, 360, 15),
            ("contract-meme", 720, 180, 10),
            ("translate", 1440, 720, 60),
            ("trend-meme", 180, 30, 5),
        ];
        for (name, free, premium, enterprise) in expected {
            let t = tool(name);
            assert_eq!(policy.resolve(&t, Tier::Free), mins(free), "{name} free");
            assert_eq!(policy.resolve(&t, Tier::Premium), mins(premium), "{name} premium");
            assert_eq!(
                policy.resolve(&t, Tier::Enterprise),
                mins(enterprise),
                "{name} enterprise"
            );
        }
    }

    #[test]
    fn test_unknown_tool_uses_default() {
        let policy = TtlPolicy::standard();
        let t = tool("blog-generator");
        assert_eq!(policy.resolve(&t, Tier::Free), mins(360));
        assert_eq!(policy.resolve(&t, Tier::Premium), mins(60));
        assert_eq!(policy.resolve(&t, Tier::Enterprise), mins(5));
    }

    #[test]
    fn test_every_standard_row_is_monotonic() {
        let policy = TtlPolicy::standard();
        assert_eq!(policy.tools().count(), 5);
        for (name, _) in policy.tools() {
            let t = tool(name);
            let free = policy.resolve(&t, Tier::Free);
            let premium = policy.resolve(&t, Tier::Premium);
            let enterprise = policy.resolve(&t, Tier::Enterprise);
            assert!(enterprise <= premium && premium <= free, "{name}");
        }
        assert!(policy.default_row().is_monotonic());
    }

    #[test]
    fn test_new_rejects_non_monotonic_row() {
        let mut tools = BTreeMap::new();
        tools.insert("trending".to_string(), TierTtls::minutes(5, 60, 360));
        let err = TtlPolicy::new(STANDARD_DEFAULT_TTLS, tools).unwrap_err();
        assert!(matches!(
            err,
            MemelabError::Config(ConfigError::NonMonotonicTtl { ref tool, .. }) if tool == "trending"
        ));
    }

    #[test]
    fn test_new_rejects_invalid_tool_name() {
        let mut tools = BTreeMap::new();
        tools.insert("bad:name".to_string(), TierTtls::minutes(10, 5, 1));
        let err = TtlPolicy::new(STANDARD_DEFAULT_TTLS, tools).unwrap_err();
        assert!(err.is_invalid_input());
    }

    #[test]
    fn test_toml_override_merges_with_standard() {
        let policy = TtlPolicy::from_toml_str(
            r#"
            [default]
            free = 120
            premium = 30
            enterprise = 2

            [tools.translate]
            free = 2880
            premium = 1440
            enterprise = 120

            [tools.meme-of-the-day]
            free = 60
            premium = 10
            enterprise = 1
            "#,
        )
        .unwrap();

        assert_eq!(policy.resolve(&tool("translate"), Tier::Free), mins(2880));
        assert_eq!(policy.resolve(&tool("meme-of-the-day"), Tier::Premium), mins(10));
        // untouched standard rows survive
        assert_eq!(policy.resolve(&tool("trending"), Tier::Premium), mins(60));
        assert_eq!(policy.resolve(&tool("unknown"), Tier::Free), mins(120));
    }

    #[test]
    fn test_toml_override_rejects_non_monotonic() {
        let result = TtlPolicy::from_toml_str(
            r#"
            [tools.trending]
            free = 1
            premium = 2
            enterprise = 3
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_toml_override_rejects_out_of_range_row() {
        let err = TtlPolicy::from_toml_str(
            r#"
            [tools.trending]
            free = 9223372036854775807
            premium = 60
            enterprise = 5
            "#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            MemelabError::Config(ConfigError::InvalidValue { ref field, .. }) if field == "ttl.trending.free"
        ));
    }

    #[test]
    fn test_new_accepts_row_at_max_ttl() {
        let mut tools = BTreeMap::new();
        tools.insert(
            "archive".to_string(),
            TierTtls::minutes(MAX_TTL_MINUTES, MAX_TTL_MINUTES, 1),
        );
        assert!(TtlPolicy::new(STANDARD_DEFAULT_TTLS, tools.clone()).is_ok());

        tools.insert(
            "archive".to_string(),
            TierTtls::minutes(MAX_TTL_MINUTES + 1, 60, 1),
        );
        assert!(TtlPolicy::new(STANDARD_DEFAULT_TTLS, tools).is_err());

        let err = TtlPolicy::new(TierTtls::minutes(u64::MAX, 1, 1), BTreeMap::new()).unwrap_err();
        assert!(matches!(err, MemelabError::Config(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_toml_override_rejects_garbage() {
        let err = TtlPolicy::from_toml_str("this is = not [toml").unwrap_err();
        assert!(matches!(err, MemelabError::Config(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_max_ttl() {
        assert_eq!(TtlPolicy::standard().max_ttl(), mins(1440));
    }
}
