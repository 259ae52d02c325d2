//! Deserializable configuration.
//!
//! Host applications embed [`AccessConfig`] in their own configuration file
//! and hand it to [`PermissionResolverBuilder::config`](crate::PermissionResolverBuilder::config).
//! Every field has a default, so an empty section is valid.

use crate::dialect::DialectKind;
use crate::types::ModuleName;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default lifetime of persisted resolved sets.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// Default key prefix of persisted resolved sets.
pub const DEFAULT_CACHE_PREFIX: &str = "gatekeeper:perms:";

/// Resolver and store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Lifetime of persisted resolved sets, in seconds.
    pub cache_ttl_secs: u64,
    /// Key prefix of persisted resolved sets.
    pub cache_prefix: String,
    /// Storage dialect of individual grant rows.
    pub dialect: DialectKind,
    /// Module gating section.
    pub modules: ModuleConfig,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            cache_prefix: DEFAULT_CACHE_PREFIX.to_string(),
            dialect: DialectKind::default(),
            modules: ModuleConfig::default(),
        }
    }
}

impl AccessConfig {
    /// Returns the cache TTL as a [`Duration`].
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Module gating configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleConfig {
    /// Whether modules are gated per principal.
    pub gating_enabled: bool,
    /// Modules open to everyone.
    pub public: Vec<ModuleName>,
}
