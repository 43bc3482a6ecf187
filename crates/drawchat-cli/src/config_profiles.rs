//! Persistent CLI profile configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

const CONFIG_FILE_NAME: &str = "cli-config.json";
pub const ACCESS_TOKEN_ENV: &str = "DRAWCHAT_ACCESS_TOKEN";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliProfilesConfig {
    #[serde(default = "default_config_version")]
    pub version: u32,
    #[serde(default)]
    pub active_profile: Option<String>,
    #[serde(default)]
    pub profiles: BTreeMap<String, CliProfile>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliProfile {
    /// Remote store base URL
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Account the sync cursor and remote-known set are scoped to
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Everything needed to talk to the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCredentials {
    pub endpoint: String,
    pub user_id: String,
    pub access_token: String,
}

const fn default_config_version() -> u32 {
    1
}

pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("drawchat")
}

pub fn default_config_path() -> PathBuf {
    config_dir().join(CONFIG_FILE_NAME)
}

pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    drawchat_core::util::normalize_text_option(value)
}

pub fn normalize_profile_name(value: Option<&str>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

impl CliProfilesConfig {
    pub fn load() -> Result<Self, String> {
        Self::load_from_path(&default_config_path())
    }

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

    pub fn save(&self) -> Result<PathBuf, String> {
        let path = default_config_path();
        self.save_to_path(&path)?;
        Ok(path)
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

    pub fn resolve_profile_name(&self, explicit: Option<&str>) -> String {
        self.resolve_profile_name_with(explicit, std::env::var("DRAWCHAT_PROFILE").ok())
    }

    fn resolve_profile_name_with(&self, explicit: Option<&str>, env_profile: Option<String>) -> String {
        normalize_profile_name(explicit)
            .or_else(|| normalize_profile_name(env_profile.as_deref()))
            .or_else(|| normalize_profile_name(self.active_profile.as_deref()))
            .unwrap_or_else(|| "default".to_string())
    }

    pub fn profile(&self, name: &str) -> Option<&CliProfile> {
        self.profiles.get(name)
    }

    pub fn profile_mut_or_default(&mut self, name: &str) -> &mut CliProfile {
        self.profiles.entry(name.to_string()).or_default()
    }

    fn normalize(&mut self) {
        self.active_profile = normalize_profile_name(self.active_profile.as_deref());
        for profile in self.profiles.values_mut() {
            profile.normalize();
        }
    }
}

impl CliProfile {
    pub fn endpoint(&self) -> Option<String> {
        normalize_text_option(self.endpoint.clone())
    }

    pub fn user_id(&self) -> Option<String> {
        normalize_text_option(self.user_id.clone())
    }

    /// Combine the profile with an access token; `None` when anything is missing.
    pub fn credentials(
        &self,
        fallback_endpoint: Option<String>,
        access_token: Option<String>,
    ) -> Option<SyncCredentials> {
        Some(SyncCredentials {
            endpoint: self.endpoint().or(fallback_endpoint)?,
            user_id: self.user_id()?,
            access_token: normalize_text_option(access_token)?,
        })
    }

    fn normalize(&mut self) {
        self.endpoint =
            normalize_text_option(self.endpoint.clone()).map(|url| url.trim_end_matches('/').to_string());
        self.user_id = normalize_text_option(self.user_id.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_profile_name_rejects_empty() {
        assert_eq!(normalize_profile_name(None), None);
        assert_eq!(normalize_profile_name(Some(" ")), None);
    }

    #[test]
    fn config_roundtrip_preserves_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        let mut config = CliProfilesConfig {
            version: 1,
            active_profile: Some("default".to_string()),
            profiles: BTreeMap::new(),
        };
        config.profiles.insert(
            "default".to_string(),
            CliProfile {
                endpoint: Some(" https://api.example.com/ ".to_string()),
                user_id: Some(" user-1 ".to_string()),
            },
        );

        config.save_to_path(&path).unwrap();
        let loaded = CliProfilesConfig::load_from_path(&path).unwrap();
        let profile = loaded.profiles.get("default").unwrap();
        assert_eq!(profile.endpoint.as_deref(), Some("https://api.example.com"));
        assert_eq!(profile.user_id.as_deref(), Some("user-1"));
    }

    #[test]
    fn resolve_profile_name_prefers_explicit_then_env_then_active() {
        let config = CliProfilesConfig {
            version: 1,
            active_profile: Some("work".to_string()),
            profiles: BTreeMap::new(),
        };
        assert_eq!(
            config.resolve_profile_name_with(Some("mobile"), Some("env".to_string())),
            "mobile"
        );
        assert_eq!(
            config.resolve_profile_name_with(None, Some("env".to_string())),
            "env"
        );
        assert_eq!(config.resolve_profile_name_with(None, None), "work");
        assert_eq!(
            CliProfilesConfig::default().resolve_profile_name_with(None, None),
            "default"
        );
    }

    #[test]
    fn credentials_require_every_part() {
        let profile = CliProfile {
            endpoint: None,
            user_id: Some("user-1".to_string()),
        };
        assert_eq!(profile.credentials(None, Some("token".to_string())), None);

        let credentials = profile
            .credentials(
                Some("https://api.example.com".to_string()),
                Some(" token ".to_string()),
            )
            .unwrap();
        assert_eq!(credentials.endpoint, "https://api.example.com");
        assert_eq!(credentials.access_token, "token");

        assert_eq!(
            profile.credentials(Some("https://api.example.com".to_string()), Some("  ".to_string())),
            None
        );
    }
}
