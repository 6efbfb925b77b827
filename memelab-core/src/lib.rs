//! Memelab Core - Cache Vocabulary
//!
//! Pure types shared by every Memelab crate: subscription tiers, validated
//! tool names, canonical cache keys, the TTL policy table and the error
//! taxonomy. No I/O happens here.

use chrono::{DateTime, Utc};

pub mod error;
pub mod key;
pub mod policy;
pub mod tier;

pub use error::{ConfigError, MemelabError, MemelabResult, StorageError, ValidationError};
pub use key::{canonical_json, normalize_params, CacheKey};
pub use policy::{TierTtls, TtlPolicy, MAX_TTL_MINUTES, STANDARD_DEFAULT_TTLS, STANDARD_TTLS};
pub use tier::{Tier, TierParseError, ToolName, KEY_SEPARATOR};

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;
