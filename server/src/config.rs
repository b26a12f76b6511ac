use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::chat::presence::PresenceSettings;

/// Command-line flags. Only flags actually given are serialized, so unset
/// flags never shadow the TOML file or the environment.
#[derive(Parser, Serialize, Clone, Debug, Default)]
#[command(name = "duet-server", version, about = "Duet real-time chat server")]
pub struct Cli {
    /// Port to listen on (default: 4000)
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address (default: 0.0.0.0)
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file
    #[arg(long, default_value = "./duet.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, keys) (default: ./data)
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
}

/// Duet real-time chat server configuration, after all layers are merged.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub config: String,
    pub json_logs: bool,
    #[serde(default)]
    pub generate_config: bool,
    pub data_dir: String,

    /// Heartbeat and staleness windows ([presence] section)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence: Option<PresenceConfig>,

    /// Typing indicator lifetime ([typing] section)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typing: Option<TypingConfig>,
}

/// Presence heartbeat and sweep timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Expected client heartbeat period in seconds (default: 30)
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Seconds without a heartbeat before a user is swept offline (default: 120)
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,

    /// Seconds between sweep runs (default: 60)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval(),
            stale_after_secs: default_stale_after(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_stale_after() -> u64 {
    120
}

fn default_sweep_interval() -> u64 {
    60
}

/// Typing indicator timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingConfig {
    /// Seconds an indicator lives after the last start signal (default: 3)
    #[serde(default = "default_typing_ttl")]
    pub ttl_secs: u64,
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_typing_ttl(),
        }
    }
}

fn default_typing_ttl() -> u64 {
    3
}

/// A stale window shorter than this many heartbeats flaps healthy clients.
const MIN_HEARTBEATS_PER_STALE_WINDOW: u64 = 3;

impl PresenceConfig {
    /// Resolve into runtime settings, raising a stale window that would
    /// sweep users who are still heartbeating.
    pub fn settings(&self) -> PresenceSettings {
        let heartbeat = self.heartbeat_interval_secs.max(1);
        let floor = heartbeat * MIN_HEARTBEATS_PER_STALE_WINDOW;
        let stale_after = if self.stale_after_secs < floor {
            tracing::warn!(
                stale_after_secs = self.stale_after_secs,
                heartbeat_interval_secs = heartbeat,
                raised_to = floor,
                "presence.stale_after_secs too short for heartbeat interval, raising"
            );
            floor
        } else {
            self.stale_after_secs
        };

        PresenceSettings {
            heartbeat_interval: Duration::from_secs(heartbeat),
            stale_after: Duration::from_secs(stale_after),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs.max(1)),
        }
    }
}

impl TypingConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs.max(1))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 4000,
            bind_address: "0.0.0.0".to_string(),
            config: "./duet.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            presence: None,
            typing: None,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (DUET_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment(Cli::parse()).extract()
    }

    fn figment(cli: Cli) -> Figment {
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("DUET_").split("__"))
            .merge(Serialized::defaults(cli))
    }

    pub fn presence_settings(&self) -> PresenceSettings {
        self.presence.clone().unwrap_or_default().settings()
    }

    pub fn typing_ttl(&self) -> Duration {
        self.typing.clone().unwrap_or_default().ttl()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Duet Server Configuration
# Place this file at ./duet.toml or specify with --config <path>
# All settings can be overridden via environment variables (DUET_PORT, etc.)
# or CLI flags (--port, etc.). Nested keys use a double underscore,
# e.g. DUET_PRESENCE__STALE_AFTER_SECS=180

# Server port (default: 4000)
# port = 4000

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for SQLite database and JWT signing key
# data_dir = "./data"

# ---- Presence ----
# [presence]

# How often clients send a heartbeat (default: 30)
# heartbeat_interval_secs = 30

# Users with no heartbeat for this long are swept offline (default: 120)
# Must be at least 3x heartbeat_interval_secs; smaller values are raised.
# stale_after_secs = 120

# How often the sweep runs (default: 60)
# sweep_interval_secs = 60

# ---- Typing Indicators ----
# [typing]

# Seconds an indicator lives after the last "typing" signal (default: 3)
# ttl_secs = 3
"#
    .to_string()
}
