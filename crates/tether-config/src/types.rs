//! Configuration types.
//!
//! Every section is optional in the file; missing values fall back to the
//! defaults below, which match the deadlines the hydration chain was tuned
//! with on mobile webviews.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

/// Default deadlines and keys.
pub mod defaults {
    /// Safety buffer applied before a cached access token's expiry.
    pub const SAFETY_BUFFER_SECS: u64 = 30;
    /// How long a successful mirror read is served from memory.
    pub const MIRROR_MEMORY_TTL_MS: u64 = 5_000;
    /// Deadline for reading the durable mirror.
    pub const MIRROR_LOAD_TIMEOUT_MS: u64 = 800;
    /// Deadline for re-establishing a session from mirrored tokens.
    pub const MIRROR_RESTORE_TIMEOUT_MS: u64 = 1_500;
    /// Per-query deadline for the data client.
    pub const QUERY_TIMEOUT_MS: u64 = 8_000;
    /// Hydration stage 1: direct session lookup.
    pub const DIRECT_MS: u64 = 4_000;
    /// Hydration stage 2: session from cached refresh token.
    pub const CACHE_HYDRATION_MS: u64 = 3_000;
    /// Hydration stage 3: mirror restoration.
    pub const MIRROR_RESTORE_MS: u64 = 2_500;
    /// Hydration stage 4: verification lookup.
    pub const VERIFICATION_MS: u64 = 1_500;
    /// Deadline for the user-id fallback lookup.
    pub const USER_LOOKUP_MS: u64 = 3_000;
    /// Delay before warming the session after a resume.
    pub const WARM_DELAY_MS: u64 = 2_000;
    /// Key of the durable mirror record.
    pub const MIRROR_KEY: &str = "authTokenMirror";
    /// Header carrying the static API key.
    pub const API_KEY_HEADER: &str = "apikey";
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    /// Remote backend connection.
    pub backend: BackendConfig,
    /// Primary cache and durable mirror.
    pub cache: CacheConfig,
    /// Data client behaviour.
    pub client: ClientConfig,
    /// Hydration stage deadlines.
    pub hydration: HydrationConfig,
    /// App-resume handling.
    pub resume: ResumeConfig,
    /// Local storage locations.
    pub storage: StorageConfig,
}

impl TetherConfig {
    /// Create a configuration with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: TetherConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Set the backend URL.
    pub fn with_backend_url(mut self, url: impl Into<String>) -> Self {
        self.backend.url = url.into();
        self
    }

    /// Set the static API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.backend.api_key = Some(key.into());
        self
    }

    /// Enable or disable the mirror fallback for data-client tokens.
    pub fn with_mirror_fallback(mut self, enabled: bool) -> Self {
        self.client.mirror_fallback = enabled;
        self
    }

    /// Set the storage directory.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage.data_dir = Some(dir.into());
        self
    }

    /// Reject values that would make a deadline meaningless.
    pub fn validate(&self) -> Result<()> {
        let deadlines = [
            ("client.query_timeout_ms", self.client.query_timeout_ms),
            ("cache.mirror_load_timeout_ms", self.cache.mirror_load_timeout_ms),
            (
                "cache.mirror_restore_timeout_ms",
                self.cache.mirror_restore_timeout_ms,
            ),
            ("hydration.direct_ms", self.hydration.direct_ms),
            ("hydration.cache_hydration_ms", self.hydration.cache_hydration_ms),
            ("hydration.mirror_restore_ms", self.hydration.mirror_restore_ms),
            ("hydration.verification_ms", self.hydration.verification_ms),
        ];
        for (field, value) in deadlines {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field: field.to_string(),
                    reason: "deadline must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend
// ─────────────────────────────────────────────────────────────────────────────

/// Remote backend connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the backend (e.g. `https://abc.example.co`).
    pub url: String,
    /// Static API key sent with every request.
    pub api_key: Option<String>,
    /// Project identifier, used to derive the primary cache key.
    pub project_id: Option<String>,
    /// Name of the header carrying the API key.
    pub api_key_header: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:54321".to_string(),
            api_key: None,
            project_id: None,
            api_key_header: defaults::API_KEY_HEADER.to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cache
// ─────────────────────────────────────────────────────────────────────────────

/// Primary cache and durable mirror settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Explicit primary cache key. Derived from the project id when unset.
    pub primary_key: Option<String>,
    /// Durable mirror key.
    pub mirror_key: String,
    /// Seconds subtracted from a token's expiry before it is considered stale.
    pub safety_buffer_secs: u64,
    /// How long a mirror read is served from memory.
    pub mirror_memory_ttl_ms: u64,
    /// Deadline for a durable mirror read.
    pub mirror_load_timeout_ms: u64,
    /// Deadline for a mirror-driven session restore.
    pub mirror_restore_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            primary_key: None,
            mirror_key: defaults::MIRROR_KEY.to_string(),
            safety_buffer_secs: defaults::SAFETY_BUFFER_SECS,
            mirror_memory_ttl_ms: defaults::MIRROR_MEMORY_TTL_MS,
            mirror_load_timeout_ms: defaults::MIRROR_LOAD_TIMEOUT_MS,
            mirror_restore_timeout_ms: defaults::MIRROR_RESTORE_TIMEOUT_MS,
        }
    }
}

impl CacheConfig {
    /// Primary cache key, e.g. `sb-<project>-auth-token`.
    pub fn primary_key(&self, backend: &BackendConfig) -> String {
        if let Some(key) = &self.primary_key {
            return key.clone();
        }
        let project = backend.project_id.as_deref().unwrap_or("local");
        format!("sb-{}-auth-token", project)
    }

    pub fn safety_buffer(&self) -> Duration {
        Duration::from_secs(self.safety_buffer_secs)
    }

    pub fn mirror_memory_ttl(&self) -> Duration {
        Duration::from_millis(self.mirror_memory_ttl_ms)
    }

    pub fn mirror_load_timeout(&self) -> Duration {
        Duration::from_millis(self.mirror_load_timeout_ms)
    }

    pub fn mirror_restore_timeout(&self) -> Duration {
        Duration::from_millis(self.mirror_restore_timeout_ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

/// Data client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Deadline applied to every query.
    pub query_timeout_ms: u64,
    /// Fall back to the mirrored access token when the primary cache misses.
    ///
    /// Enable on platforms where the primary store is known to be unreliable.
    pub mirror_fallback: bool,
    /// Custom user agent.
    pub user_agent: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            query_timeout_ms: defaults::QUERY_TIMEOUT_MS,
            mirror_fallback: false,
            user_agent: None,
        }
    }
}

impl ClientConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Hydration
// ─────────────────────────────────────────────────────────────────────────────

/// Per-stage hydration deadlines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HydrationConfig {
    pub direct_ms: u64,
    pub cache_hydration_ms: u64,
    pub mirror_restore_ms: u64,
    pub verification_ms: u64,
    /// Deadline for the user-id fallback lookup.
    pub user_lookup_ms: u64,
}

impl Default for HydrationConfig {
    fn default() -> Self {
        Self {
            direct_ms: defaults::DIRECT_MS,
            cache_hydration_ms: defaults::CACHE_HYDRATION_MS,
            mirror_restore_ms: defaults::MIRROR_RESTORE_MS,
            verification_ms: defaults::VERIFICATION_MS,
            user_lookup_ms: defaults::USER_LOOKUP_MS,
        }
    }
}

impl HydrationConfig {
    pub fn direct(&self) -> Duration {
        Duration::from_millis(self.direct_ms)
    }

    pub fn cache_hydration(&self) -> Duration {
        Duration::from_millis(self.cache_hydration_ms)
    }

    pub fn mirror_restore(&self) -> Duration {
        Duration::from_millis(self.mirror_restore_ms)
    }

    pub fn verification(&self) -> Duration {
        Duration::from_millis(self.verification_ms)
    }

    pub fn user_lookup(&self) -> Duration {
        Duration::from_millis(self.user_lookup_ms)
    }

    /// Upper bound on a full hydration run.
    pub fn worst_case(&self) -> Duration {
        self.direct() + self.cache_hydration() + self.mirror_restore() + self.verification()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Resume
// ─────────────────────────────────────────────────────────────────────────────

/// App-resume handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResumeConfig {
    /// Warm the auth session in the background after a resume.
    ///
    /// Disable on platforms where resume-time auth calls hang.
    pub warm_session: bool,
    /// Delay before the warm-up call, leaving room for hydration to finish.
    pub warm_delay_ms: u64,
}

impl Default for ResumeConfig {
    fn default() -> Self {
        Self {
            warm_session: true,
            warm_delay_ms: defaults::WARM_DELAY_MS,
        }
    }
}

impl ResumeConfig {
    pub fn warm_delay(&self) -> Duration {
        Duration::from_millis(self.warm_delay_ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Storage
// ─────────────────────────────────────────────────────────────────────────────

/// Local storage locations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the primary cache and mirror files.
    pub data_dir: Option<PathBuf>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = TetherConfig::from_toml("").unwrap();
        assert_eq!(config.cache.safety_buffer_secs, 30);
        assert_eq!(config.client.query_timeout(), Duration::from_secs(8));
        assert_eq!(config.hydration.direct(), Duration::from_secs(4));
        assert_eq!(config.cache.mirror_key, "authTokenMirror");
        assert!(!config.client.mirror_fallback);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = TetherConfig::from_toml(
            r#"
[hydration]
direct_ms = 1000

[backend]
url = "https://abc.example.co"
project_id = "abc"
"#,
        )
        .unwrap();

        assert_eq!(config.hydration.direct_ms, 1000);
        assert_eq!(config.hydration.verification_ms, 1500);
        assert_eq!(config.backend.api_key_header, "apikey");
        assert_eq!(
            config.cache.primary_key(&config.backend),
            "sb-abc-auth-token"
        );
    }

    #[test]
    fn test_explicit_primary_key_wins() {
        let mut config = TetherConfig::new();
        config.cache.primary_key = Some("custom".to_string());
        assert_eq!(config.cache.primary_key(&config.backend), "custom");
    }

    #[test]
    fn test_zero_deadline_rejected() {
        let err = TetherConfig::from_toml("[client]\nquery_timeout_ms = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "client.query_timeout_ms"));
    }

    #[test]
    fn test_worst_case_is_sum_of_stages() {
        let hydration = HydrationConfig::default();
        assert_eq!(hydration.worst_case(), Duration::from_millis(11_000));
    }

    #[test]
    fn test_toml_roundtrip_preserves_overrides() {
        let config = TetherConfig::new()
            .with_backend_url("https://abc.example.co")
            .with_api_key("anon")
            .with_mirror_fallback(true);
        let parsed = TetherConfig::from_toml(&config.to_toml().unwrap()).unwrap();
        assert_eq!(parsed.backend.url, "https://abc.example.co");
        assert_eq!(parsed.backend.api_key.as_deref(), Some("anon"));
        assert!(parsed.client.mirror_fallback);
    }
}
