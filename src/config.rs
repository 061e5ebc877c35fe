//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `dashboard.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - SourceConfig: which telemetry source feeds the dashboard.
//!     - PollingConfig: refresh period and transport timeout.
//!     - ServerConfig: where the web dashboard listens.
//!     - DisplayConfig: timezone used for "last updated" strings.
//!     - SessionConfig: the signed-in user handed over by the identity provider.
//!
//! ==============================================================================

use crate::render::DisplayZone;

use chrono::FixedOffset;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// env var naming an explicit config file
pub const CONFIG_ENV: &str = "DASHBOARD_CONFIG";

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DashboardConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Rest,
    Realtime,
    #[default]
    Mock,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourceConfig {
    #[serde(default)]
    pub kind: SourceKind,
    #[serde(default)]
    pub rest: RestConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub mock: MockConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RestConfig {
    pub base_url: String,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self { base_url: "http://localhost:8000".to_string() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RealtimeConfig {
    pub database_url: String,
    #[serde(default = "default_node")]
    pub node: String,
}

fn default_node() -> String {
    "devices".to_string()
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            database_url: "http://localhost:9000".to_string(),
            node: default_node(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MockConfig {
    pub devices: Vec<String>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            devices: ["sensor1", "sensor2", "sensor3", "sensor4"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollingConfig {
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,
    #[serde(default = "default_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_interval() -> u64 {
    120
}

fn default_timeout() -> u64 {
    10
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval(),
            request_timeout_seconds: default_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0:3000".to_string() }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DisplayConfig {
    /// offset from utc; unset means the host's local zone
    pub utc_offset_minutes: Option<i32>,
}

impl DisplayConfig {
    pub fn zone(&self) -> anyhow::Result<DisplayZone> {
        match self.utc_offset_minutes {
            None => Ok(DisplayZone::Local),
            Some(minutes) => minutes
                .checked_mul(60)
                .and_then(FixedOffset::east_opt)
                .map(DisplayZone::Fixed)
                .ok_or_else(|| anyhow::anyhow!("utc_offset_minutes out of range: {}", minutes)),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SessionConfig {
    pub user_display_name: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

impl DashboardConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: DashboardConfig = toml::from_str(content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;
        if config.polling.interval_seconds == 0 {
            anyhow::bail!("polling.interval_seconds must be at least 1");
        }
        Ok(config)
    }

    /// Load with default fallback.
    ///
    /// runs before logging is up, so it reports on stdout.
    pub fn load_or_default() -> anyhow::Result<Self> {
        if let Ok(explicit) = std::env::var(CONFIG_ENV) {
            let config = Self::load(&explicit)?;
            println!("[CONFIG] Loaded from {}", explicit);
            return Ok(config);
        }

        let paths = [
            PathBuf::from("config").join("dashboard.toml"),
            PathBuf::from("..").join("config").join("dashboard.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        println!("[CONFIG] Loaded from {}", path.display());
                        return Ok(config);
                    }
                    Err(e) => {
                        println!("[CONFIG] Warning: Failed to load {}: {}", path.display(), e);
                    }
                }
            }
        }

        println!("[CONFIG] Warning: No config file found - using defaults");
        Ok(Self::default())
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        let source = match self.source.kind {
            SourceKind::Rest => format!("rest ({})", self.source.rest.base_url),
            SourceKind::Realtime => format!(
                "realtime ({}/{})",
                self.source.realtime.database_url, self.source.realtime.node
            ),
            SourceKind::Mock => format!("mock ({} devices)", self.source.mock.devices.len()),
        };
        println!("┌─────────────────────────────────────────┐");
        println!("│        DASHBOARD CONFIGURATION          │");
        println!("├─────────────────────────────────────────┤");
        println!("│ Source: {}", source);
        println!("│ Poll Interval: {}s", self.polling.interval_seconds);
        println!("│ Request Timeout: {}s", self.polling.request_timeout_seconds);
        println!("│ Listen: {}", self.server.bind);
        println!("│ Log Level: {}", self.logging.level);
        println!("└─────────────────────────────────────────┘");
    }
}
