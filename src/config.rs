//! Layered configuration for the watcher subsystem.
//!
//! Sources, lowest to highest precedence:
//! - Built-in defaults
//! - TOML configuration file (`r4dar.toml`, `R4DAR_CONFIG`, or `--config`)
//! - Environment variables prefixed with `R4DAR_`
//! - The `R4DAR_WATCHERS` active-watcher override
//!
//! # Environment Variables
//!
//! Nested keys use double underscores:
//! - `R4DAR_WATCHERS__WEBHOOK_PORT=9090` sets `watchers.webhook_port`
//! - `R4DAR_GITHUB__API_TOKEN=ghp_...` sets `github.api_token`
//! - `R4DAR_LOGGING__DEFAULT=debug` sets `logging.default`
//!
//! `R4DAR_WATCHERS=repo_watcher,github_webhook` replaces the configured
//! active list and switches the subsystem on regardless of `enabled`.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::error::{WatchError, WatchResult};

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "R4DAR_";

/// Comma-separated active-watcher override.
pub const ACTIVE_WATCHERS_ENV: &str = "R4DAR_WATCHERS";

/// Explicit configuration file path.
pub const CONFIG_PATH_ENV: &str = "R4DAR_CONFIG";

/// Config file looked up in the working directory when nothing else is given.
pub const DEFAULT_CONFIG_FILE: &str = "r4dar.toml";

// Keys under the prefix that are not settings paths.
const RESERVED_ENV_KEYS: &[&str] = &["watchers", "config"];

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Watcher orchestration settings
    #[serde(default)]
    pub watchers: WatcherSettings,

    /// GitHub credentials and built-in GitHub watcher options
    #[serde(default)]
    pub github: GithubConfig,

    /// Notification transport settings
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WatcherSettings {
    /// Master switch. Off unless set explicitly or forced by `R4DAR_WATCHERS`.
    #[serde(default)]
    pub enabled: bool,

    /// Watchers to run, in startup order.
    #[serde(default)]
    pub active_watchers: Vec<String>,

    /// Port of the shared webhook listener.
    #[serde(default = "default_webhook_port")]
    pub webhook_port: u16,

    /// Interface the webhook listener binds to.
    #[serde(default = "default_bind_host")]
    pub bind_host: String,

    /// Upper bound on a single watcher's `initialize` or `start`, in milliseconds.
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,

    /// Upper bound on a single watcher's stop, in milliseconds.
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,

    /// How long the listener drains in-flight requests before force-closing.
    #[serde(default = "default_drain_grace_ms")]
    pub drain_grace_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct GithubConfig {
    /// API token used by sync jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,

    /// Poll interval of the `repo_watcher` plugin.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Path the `github_webhook` plugin claims on the listener.
    #[serde(default = "default_webhook_path")]
    pub webhook_path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NotificationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default level for every target.
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-target overrides, e.g. `r4dar::webhook = "debug"`.
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_version() -> u32 {
    1
}
fn default_webhook_port() -> u16 {
    8080
}
fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}
fn default_startup_timeout_ms() -> u64 {
    30_000
}
fn default_stop_grace_ms() -> u64 {
    5_000
}
fn default_drain_grace_ms() -> u64 {
    3_000
}
fn default_poll_interval_secs() -> u64 {
    300
}
fn default_webhook_path() -> String {
    "/webhooks/github".to_string()
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            watchers: WatcherSettings::default(),
            github: GithubConfig::default(),
            notifications: NotificationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            active_watchers: Vec::new(),
            webhook_port: default_webhook_port(),
            bind_host: default_bind_host(),
            startup_timeout_ms: default_startup_timeout_ms(),
            stop_grace_ms: default_stop_grace_ms(),
            drain_grace_ms: default_drain_grace_ms(),
        }
    }
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_token: None,
            poll_interval_secs: default_poll_interval_secs(),
            webhook_path: default_webhook_path(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

/// Validated view of [`WatcherSettings`] the orchestrator acts on.
#[derive(Debug, Clone, PartialEq)]
pub struct WatcherPlan {
    /// Deduplicated watcher names in configured order.
    pub names: Vec<String>,
    pub host: IpAddr,
    pub port: u16,
    pub startup_timeout: Duration,
    pub stop_grace: Duration,
    pub drain_grace: Duration,
}

impl WatcherSettings {
    /// Validate the settings into a plan.
    ///
    /// `Ok(None)` means there is nothing to run: the subsystem is disabled or
    /// no watcher is listed. That is a valid outcome, not an error.
    pub fn plan(&self) -> WatchResult<Option<WatcherPlan>> {
        if !self.enabled {
            crate::debug_event!("config", "watchers disabled");
            return Ok(None);
        }

        let mut names = IndexSet::new();
        for raw in &self.active_watchers {
            let name = raw.trim();
            if name.is_empty() {
                return Err(WatchError::config(
                    "watchers.active_watchers contains a blank name",
                ));
            }
            if !names.insert(name.to_string()) {
                tracing::warn!("[config] duplicate watcher '{name}' ignored");
            }
        }

        if names.is_empty() {
            crate::debug_event!("config", "no active watchers configured");
            return Ok(None);
        }

        let host: IpAddr = self.bind_host.parse().map_err(|e| {
            WatchError::config(format!(
                "watchers.bind_host '{}' is not an IP address: {e}",
                self.bind_host
            ))
        })?;

        if self.startup_timeout_ms == 0 || self.stop_grace_ms == 0 || self.drain_grace_ms == 0 {
            return Err(WatchError::config(
                "watchers startup, stop and drain timeouts must be positive",
            ));
        }

        Ok(Some(WatcherPlan {
            names: names.into_iter().collect(),
            host,
            port: self.webhook_port,
            startup_timeout: Duration::from_millis(self.startup_timeout_ms),
            stop_grace: Duration::from_millis(self.stop_grace_ms),
            drain_grace: Duration::from_millis(self.drain_grace_ms),
        }))
    }

    /// Apply a comma-separated active-watcher override.
    ///
    /// Entries are trimmed and blanks dropped. A present override also forces
    /// `enabled = true`.
    pub fn apply_active_override(&mut self, raw: &str) {
        self.active_watchers = raw
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        self.enabled = true;
    }
}

impl Settings {
    /// Load configuration from all sources.
    ///
    /// The file is `explicit` if given, else `R4DAR_CONFIG`, else
    /// `r4dar.toml` in the working directory. A missing file means defaults.
    pub fn load(explicit: Option<&Path>) -> WatchResult<Self> {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        Self::load_from(path)
    }

    /// Load configuration from a specific file plus environment overrides.
    pub fn load_from(path: impl AsRef<Path>) -> WatchResult<Self> {
        let path = path.as_ref();
        if path.exists() {
            crate::debug_event!("config", "loading", "{}", path.display());
        }

        let mut settings: Settings = Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            // Double underscore separates nesting levels
            .merge(
                Env::prefixed(ENV_PREFIX)
                    .filter(|key| {
                        !RESERVED_ENV_KEYS
                            .iter()
                            .any(|reserved| key.as_str().eq_ignore_ascii_case(reserved))
                    })
                    .map(|key| key.as_str().to_lowercase().replace("__", ".").into()),
            )
            .extract()
            .map_err(Box::new)?;

        // An empty override falls back to the file
        if let Ok(raw) = std::env::var(ACTIVE_WATCHERS_ENV) {
            if !raw.trim().is_empty() {
                crate::log_event!("config", "watchers from environment", "{raw}");
                settings.watchers.apply_active_override(&raw);
            }
        }

        Ok(settings)
    }

    /// Parse settings from a TOML string, without environment overrides.
    pub fn from_toml(content: &str) -> WatchResult<Self> {
        let settings = Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::string(content))
            .extract()
            .map_err(Box::new)?;
        Ok(settings)
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> WatchResult<String> {
        toml::to_string_pretty(self).map_err(|e| WatchError::config(e.to_string()))
    }
}
