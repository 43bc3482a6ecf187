//! Runtime configuration for the conversation store.
//!
//! Policy constants (cache quotas, debounce windows, retry caps) live here
//! rather than in the components so clients can tune them from a JSON file
//! or `DRAWCHAT_*` environment variables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::{is_http_url, normalize_text_option};

const DEFAULT_STORAGE_MAX_BYTES: u64 = 5 * 1024 * 1024;
const DEFAULT_MAX_DIAGRAM_VERSIONS: usize = 100;

/// Top-level store configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    pub quota: QuotaConfig,
    /// Byte budget of the local store; `None` disables the check
    pub storage_max_bytes: Option<u64>,
    /// Oldest diagram versions are pruned beyond this many per conversation
    pub max_diagram_versions: usize,
    pub sync: SyncConfig,
    pub retry: RetryConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            quota: QuotaConfig::default(),
            storage_max_bytes: Some(DEFAULT_STORAGE_MAX_BYTES),
            max_diagram_versions: DEFAULT_MAX_DIAGRAM_VERSIONS,
            sync: SyncConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// Cached-conversation caps per account tier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QuotaConfig {
    pub authenticated_max_conversations: usize,
    /// Anonymous users have no remote backup, so their cap is higher
    pub anonymous_max_conversations: usize,
    pub stale_after_days: u32,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            authenticated_max_conversations: 50,
            anonymous_max_conversations: 100,
            stale_after_days: 30,
        }
    }
}

impl QuotaConfig {
    #[must_use]
    pub const fn max_conversations(&self, is_authenticated: bool) -> usize {
        if is_authenticated {
            self.authenticated_max_conversations
        } else {
            self.anonymous_max_conversations
        }
    }

    #[must_use]
    pub const fn stale_after_ms(&self) -> i64 {
        self.stale_after_days as i64 * 24 * 60 * 60 * 1000
    }
}

/// Timing and paging for the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncConfig {
    /// Remote store base URL (e.g. `https://api.example.com`)
    pub endpoint: Option<String>,
    pub debounce_ms: u64,
    pub poll_interval_ms: u64,
    /// Delay of the follow-up pull scheduled after a successful push
    pub post_push_pull_delay_ms: u64,
    pub page_size: usize,
    /// How often the background runner checks timers
    pub tick_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            debounce_ms: 1_000,
            poll_interval_ms: 60_000,
            post_push_pull_delay_ms: 1_500,
            page_size: 200,
            tick_ms: 250,
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Normalized endpoint, only when it carries an http(s) scheme.
    #[must_use]
    pub fn endpoint(&self) -> Option<String> {
        normalize_text_option(self.endpoint.clone())
            .filter(|endpoint| is_http_url(endpoint))
            .map(|endpoint| endpoint.trim_end_matches('/').to_string())
    }
}

/// Bounds of the tool-call retry controller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_auto_retries: u32,
    /// Consecutive `edit_diagram` failures before forcing a full redraw
    pub max_edit_failures: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_auto_retries: 3,
            max_edit_failures: 2,
        }
    }
}

impl StoreConfig {
    /// Load from a JSON file; a missing file yields the defaults.
    pub fn load_from_path(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|error| format!("Failed to read config at {}: {}", path.display(), error))?;
        let mut config = serde_json::from_str::<Self>(&raw)
            .map_err(|error| format!("Failed to parse config at {}: {}", path.display(), error))?;
        config.normalize();
        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    error
                )
            })?;
        }

        let mut normalized = self.clone();
        normalized.normalize();
        let serialized = serde_json::to_string_pretty(&normalized)
            .map_err(|error| format!("Failed to serialize config: {error}"))?;
        std::fs::write(path, serialized)
            .map_err(|error| format!("Failed to write config at {}: {}", path.display(), error))
    }

    /// Apply `DRAWCHAT_*` overrides from the process environment.
    #[must_use]
    pub fn apply_env(self) -> Self {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (testable without env mutation).
    #[must_use]
    pub fn apply_env_with(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
        ) -> Option<T> {
            let raw = normalize_text_option(lookup(key))?;
            match raw.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!("Ignoring invalid value for {key}: {raw}");
                    None
                }
            }
        }

        if let Some(endpoint) = normalize_text_option(lookup("DRAWCHAT_SYNC_ENDPOINT")) {
            self.sync.endpoint = Some(endpoint);
        }
        if let Some(value) = parsed(&lookup, "DRAWCHAT_STORAGE_MAX_BYTES") {
            self.storage_max_bytes = Some(value);
        }
        if let Some(value) = parsed(&lookup, "DRAWCHAT_MAX_DIAGRAM_VERSIONS") {
            self.max_diagram_versions = value;
        }
        if let Some(value) = parsed(&lookup, "DRAWCHAT_DEBOUNCE_MS") {
            self.sync.debounce_ms = value;
        }
        if let Some(value) = parsed(&lookup, "DRAWCHAT_POLL_INTERVAL_MS") {
            self.sync.poll_interval_ms = value;
        }
        if let Some(value) = parsed(&lookup, "DRAWCHAT_AUTH_QUOTA") {
            self.quota.authenticated_max_conversations = value;
        }
        if let Some(value) = parsed(&lookup, "DRAWCHAT_ANON_QUOTA") {
            self.quota.anonymous_max_conversations = value;
        }

        self.normalize();
        self
    }

    fn normalize(&mut self) {
        self.sync.endpoint = normalize_text_option(self.sync.endpoint.take());
        self.max_diagram_versions = self.max_diagram_versions.max(1);
        self.sync.page_size = self.sync.page_size.max(1);
        self.sync.tick_ms = self.sync.tick_ms.max(10);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_favor_anonymous_quota() {
        let config = StoreConfig::default();
        assert!(config.quota.max_conversations(false) > config.quota.max_conversations(true));
        assert_eq!(config.retry.max_auto_retries, 3);
        assert_eq!(config.quota.stale_after_ms(), 30 * 86_400_000);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: StoreConfig =
            serde_json::from_str(r#"{"sync": {"debounce_ms": 50}}"#).unwrap();
        assert_eq!(config.sync.debounce_ms, 50);
        assert_eq!(config.sync.poll_interval_ms, 60_000);
        assert_eq!(config.max_diagram_versions, 100);
    }

    #[test]
    fn env_overrides_apply_and_ignore_garbage() {
        let env = HashMap::from([
            ("DRAWCHAT_SYNC_ENDPOINT", " https://sync.example.com/ "),
            ("DRAWCHAT_DEBOUNCE_MS", "250"),
            ("DRAWCHAT_POLL_INTERVAL_MS", "soon"),
            ("DRAWCHAT_MAX_DIAGRAM_VERSIONS", "0"),
        ]);
        let config = StoreConfig::default()
            .apply_env_with(|key| env.get(key).map(|value| (*value).to_string()));

        assert_eq!(config.sync.debounce_ms, 250);
        assert_eq!(config.sync.poll_interval_ms, 60_000);
        assert_eq!(config.max_diagram_versions, 1);
        assert_eq!(
            config.sync.endpoint().as_deref(),
            Some("https://sync.example.com")
        );
    }

    #[test]
    fn endpoint_requires_http_scheme() {
        let sync = SyncConfig {
            endpoint: Some("sync.example.com".to_string()),
            ..SyncConfig::default()
        };
        assert!(sync.endpoint().is_none());
    }

    #[test]
    fn config_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = StoreConfig::default();
        config.quota.authenticated_max_conversations = 40;
        config.sync.endpoint = Some("  https://api.example.com ".to_string());
        config.save_to_path(&path).unwrap();

        let loaded = StoreConfig::load_from_path(&path).unwrap();
        assert_eq!(loaded.quota.authenticated_max_conversations, 40);
        assert_eq!(loaded.sync.endpoint.as_deref(), Some("https://api.example.com"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = StoreConfig::load_from_path(&dir.path().join("absent.json")).unwrap();
        assert_eq!(loaded, StoreConfig::default());
    }
}
