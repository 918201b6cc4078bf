//! Client configuration management

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::network::DeviceFilter;

/// Default provider endpoint
pub const DEFAULT_PROVIDER_URL: &str = "ws://127.0.0.1:33881/";

/// Default origin presented to the provider and used to key authorizations
pub const DEFAULT_ORIGIN: &str = "hid-bridge://localhost";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub client: ClientSettings,
    pub provider: ProviderSettings,
    #[serde(default)]
    pub authorization: AuthorizationSettings,
    #[serde(default)]
    pub prompt: PromptSettings,
    #[serde(default)]
    pub watch: WatchSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSettings {
    pub log_level: String,
    /// Origin sent in the WebSocket handshake
    #[serde(default = "default_origin")]
    pub origin: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub url: String,
    /// Connect to the `/r1` endpoint so input reports carry their report id
    #[serde(default = "default_true")]
    pub report_ids: bool,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: Option<u64>,
    /// Bound for list refreshes and feature report reads
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationSettings {
    /// JSON file of authorized devices per origin
    /// If None, uses default XDG path: ~/.config/hid-bridge/authorizations.json
    #[serde(default)]
    pub store_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptSettings {
    /// How often the candidate list is refreshed while a prompt is open
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchSettings {
    /// Period of the background list refresh in `monitor`
    pub interval_ms: u64,
}

fn default_origin() -> String {
    DEFAULT_ORIGIN.to_string()
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout() -> Option<u64> {
    Some(5000)
}

fn default_request_timeout() -> Option<u64> {
    Some(10_000)
}

impl Default for PromptSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
        }
    }
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self { interval_ms: 2000 }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client: ClientSettings {
                log_level: "info".to_string(),
                origin: default_origin(),
            },
            provider: ProviderSettings {
                url: DEFAULT_PROVIDER_URL.to_string(),
                report_ids: true,
                connect_timeout_ms: default_connect_timeout(),
                request_timeout_ms: default_request_timeout(),
            },
            authorization: AuthorizationSettings::default(),
            prompt: PromptSettings::default(),
            watch: WatchSettings::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/hid-bridge/client.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: ClientConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        tracing::debug!(
            "Config: provider={}, report_ids={}, origin={}",
            config.provider.url,
            config.provider.report_ids,
            config.client.origin
        );
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                // Print to stderr since logging might not be initialized yet
                eprintln!("Config: {}", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("client.toml")
    }

    fn config_dir() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("hid-bridge")
        } else {
            PathBuf::from(".config/hid-bridge")
        }
    }

    /// Authorization file, with `~` expanded
    pub fn store_path(&self) -> PathBuf {
        match &self.authorization.store_path {
            Some(path) => expand_path(path),
            None => Self::config_dir().join("authorizations.json"),
        }
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.provider.connect_timeout_ms.map(Duration::from_millis)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.provider.request_timeout_ms.map(Duration::from_millis)
    }

    pub fn prompt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.prompt.poll_interval_ms)
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch.interval_ms)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.client.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.client.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.client.origin.trim().is_empty() {
            return Err(anyhow!("Origin must not be empty"));
        }

        if !(self.provider.url.starts_with("ws://") || self.provider.url.starts_with("wss://")) {
            return Err(anyhow!(
                "Provider URL '{}' must use ws:// or wss://",
                self.provider.url
            ));
        }

        for (name, value) in [
            ("provider.connect_timeout_ms", self.provider.connect_timeout_ms),
            ("provider.request_timeout_ms", self.provider.request_timeout_ms),
            ("prompt.poll_interval_ms", Some(self.prompt.poll_interval_ms)),
            ("watch.interval_ms", Some(self.watch.interval_ms)),
        ] {
            if value == Some(0) {
                return Err(anyhow!("{} must be greater than zero", name));
            }
        }

        Ok(())
    }
}

fn expand_path(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref())
}

/// Parse a device filter pattern
///
/// Pattern formats:
/// - "vid:pid" (e.g., "046d:c52b") - exact vendor:product match
/// - "vid:*" (e.g., "046d:*") - all devices from vendor
/// - "*:*" - any device
/// - any of the above followed by "@page:usage" (e.g., "*:*@ff00:*") to
///   require a top-level collection; either half may be "*"
///
/// All numbers are hexadecimal.
pub fn parse_filter(pattern: &str) -> Result<DeviceFilter> {
    let pattern_lower = pattern.trim().to_lowercase();
    let (ids, usage) = match pattern_lower.split_once('@') {
        Some((ids, usage)) => (ids, Some(usage)),
        None => (pattern_lower.as_str(), None),
    };

    let (vendor_id, product_id) = parse_pair(ids)
        .with_context(|| format!("Invalid filter '{}': expected vid:pid", pattern))?;
    let (usage_page, usage) = match usage {
        Some(usage) => parse_pair(usage)
            .with_context(|| format!("Invalid filter '{}': expected @page:usage", pattern))?,
        None => (None, None),
    };

    Ok(DeviceFilter {
        vendor_id,
        product_id,
        usage_page,
        usage,
    })
}

fn parse_pair(pair: &str) -> Result<(Option<u16>, Option<u16>)> {
    let (first, second) = pair
        .split_once(':')
        .ok_or_else(|| anyhow!("missing ':' in '{}'", pair))?;
    Ok((parse_hex(first)?, parse_hex(second)?))
}

fn parse_hex(field: &str) -> Result<Option<u16>> {
    if field == "*" {
        return Ok(None);
    }
    let digits = field.strip_prefix("0x").unwrap_or(field);
    u16::from_str_radix(digits, 16)
        .map(Some)
        .with_context(|| format!("'{}' is not a 16-bit hex number", field))
}
