use crate::error::{PanupError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding comma-separated access tokens. When set and
/// non-empty it replaces the tokens from the config file.
pub const TOKENS_ENV: &str = "PANUP_ACCESS_TOKENS";

/// Top-level panup configuration stored as TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanupConfig {
    pub panup: PanupSettings,
    #[serde(default)]
    pub endpoints: EndpointConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub credentials: CredentialConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanupSettings {
    /// Directory holding in-flight upload sessions.
    pub state_dir: String,
    /// Sessions untouched for this many days are garbage-collected (0 = never).
    #[serde(default = "default_session_max_age_days")]
    pub session_max_age_days: u64,
    /// Log every HTTP exchange at debug level.
    #[serde(default)]
    pub debug: bool,
}

fn default_session_max_age_days() -> u64 {
    7
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Drive API host.
    #[serde(default = "default_drive_url")]
    pub drive_url: String,
    /// Account API host (identity check).
    #[serde(default = "default_account_url")]
    pub account_url: String,
    /// Address the object store as `{upload_url}/{bucket}/{key}` instead of
    /// `https://{bucket}.{host}/{key}`. Needed behind proxies and test servers.
    #[serde(default)]
    pub path_style: bool,
}

fn default_drive_url() -> String {
    "https://drive-pc.quark.cn".to_string()
}

fn default_account_url() -> String {
    "https://pan.quark.cn".to_string()
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            drive_url: default_drive_url(),
            account_url: default_account_url(),
            path_style: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_api_secs")]
    pub api_secs: u64,
    #[serde(default = "default_part_secs")]
    pub part_secs: u64,
    #[serde(default = "default_commit_secs")]
    pub commit_secs: u64,
}

fn default_api_secs() -> u64 {
    30
}

fn default_part_secs() -> u64 {
    30 * 60
}

fn default_commit_secs() -> u64 {
    5 * 60
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            api_secs: default_api_secs(),
            part_secs: default_part_secs(),
            commit_secs: default_commit_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn api(&self) -> Duration {
        Duration::from_secs(self.api_secs)
    }

    pub fn part(&self) -> Duration {
        Duration::from_secs(self.part_secs)
    }

    pub fn commit(&self) -> Duration {
        Duration::from_secs(self.commit_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialConfig {
    /// Cookie strings, one per account.
    #[serde(default)]
    pub access_tokens: Vec<String>,
    /// How long a successful identity check is trusted.
    #[serde(default = "default_auth_check_ttl_secs")]
    pub auth_check_ttl_secs: u64,
}

fn default_auth_check_ttl_secs() -> u64 {
    300
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            access_tokens: vec![],
            auth_check_ttl_secs: default_auth_check_ttl_secs(),
        }
    }
}

impl CredentialConfig {
    pub fn auth_check_ttl(&self) -> Duration {
        Duration::from_secs(self.auth_check_ttl_secs)
    }
}

/// `days` as a duration, saturating instead of overflowing.
pub fn retention_period(days: u64) -> Duration {
    Duration::from_secs(days.saturating_mul(24 * 3600))
}

impl PanupConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PanupError::ConfigNotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| PanupError::TomlDe(e.to_string()))
    }

    /// Save config to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| PanupError::TomlSer(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Default config for `panup init`.
    pub fn default_config() -> Self {
        Self {
            panup: PanupSettings {
                state_dir: crate::session::ResumeStore::default_dir()
                    .display()
                    .to_string(),
                session_max_age_days: default_session_max_age_days(),
                debug: false,
            },
            endpoints: EndpointConfig::default(),
            timeouts: TimeoutConfig::default(),
            credentials: CredentialConfig::default(),
        }
    }

    /// Resolve the config file path: `<base_dir>/panup.toml`
    pub fn default_path(base_dir: &Path) -> PathBuf {
        base_dir.join("panup.toml")
    }

    /// Resolve the default panup home directory: `~/.panup`
    pub fn default_base_dir() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|h| h.join(".panup"))
            .ok_or_else(|| PanupError::Config("Cannot determine home directory".to_string()))
    }

    pub fn state_dir(&self) -> PathBuf {
        PathBuf::from(&self.panup.state_dir)
    }

    /// Session retention, `None` when garbage collection is disabled.
    pub fn session_max_age(&self) -> Option<Duration> {
        match self.panup.session_max_age_days {
            0 => None,
            days => Some(retention_period(days)),
        }
    }

    /// Tokens to use, honouring the `PANUP_ACCESS_TOKENS` override.
    pub fn access_tokens(&self) -> Vec<String> {
        self.tokens_with_override(std::env::var(TOKENS_ENV).ok().as_deref())
    }

    fn tokens_with_override(&self, env: Option<&str>) -> Vec<String> {
        let from_env: Vec<String> = env
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect();
        if !from_env.is_empty() {
            return from_env;
        }
        self.credentials
            .access_tokens
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()
    }
}
