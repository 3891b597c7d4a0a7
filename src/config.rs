use std::time::Duration;

use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::hub::{HubSettings, OverflowPolicy};
use crate::state::KeepaliveSettings;

/// Command-line flags. Only flags actually given (or set through their
/// environment variable) are serialized, so absent flags never mask TOML.
#[derive(Parser, Serialize, Clone, Debug)]
#[command(name = "chat-relay", version, about = "Real-time chat relay server")]
pub struct Cli {
    /// Port to listen on [default: 8080]
    #[arg(long, env = "RELAY_PORT")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long, env = "RELAY_BIND_ADDRESS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file
    #[arg(long, default_value = "./relay.toml")]
    #[serde(skip)]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "RELAY_JSON_LOGS")]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, keys) [default: ./data]
    #[arg(long, env = "RELAY_DATA_DIR")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
}

/// Effective server configuration after all layers are merged.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub json_logs: bool,
    pub generate_config: bool,
    pub data_dir: String,
    /// Event hub and keepalive tuning ([hub] section in TOML)
    pub hub: HubConfig,
}

/// Configuration for the event hub and per-session queues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Capacity of the queue feeding the dispatcher (default: 1024)
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,

    /// Capacity of each session's outbound queue (default: 64)
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// What to do when a session's outbound queue is full: "drop" or "close"
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,

    /// Seconds between server pings (default: 30)
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Seconds to wait for a pong before closing (default: 10)
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_secs: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            event_queue_capacity: default_event_queue_capacity(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            overflow_policy: OverflowPolicy::default(),
            ping_interval_secs: default_ping_interval(),
            pong_timeout_secs: default_pong_timeout(),
        }
    }
}

fn default_event_queue_capacity() -> usize {
    1024
}

fn default_outbound_queue_capacity() -> usize {
    64
}

fn default_ping_interval() -> u64 {
    30
}

fn default_pong_timeout() -> u64 {
    10
}

impl HubConfig {
    pub fn hub_settings(&self) -> HubSettings {
        HubSettings {
            event_queue_capacity: self.event_queue_capacity,
            outbound_queue_capacity: self.outbound_queue_capacity,
            overflow_policy: self.overflow_policy,
        }
    }

    pub fn keepalive_settings(&self) -> KeepaliveSettings {
        KeepaliveSettings {
            ping_interval: Duration::from_secs(self.ping_interval_secs.max(1)),
            pong_timeout: Duration::from_secs(self.pong_timeout_secs.max(1)),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_address: "0.0.0.0".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            hub: HubConfig::default(),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (RELAY_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        Self::from_cli(Cli::parse())
    }

    pub fn from_cli(cli: Cli) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&cli.config))
            .merge(Env::prefixed("RELAY_").split("__"))
            .merge(Serialized::defaults(cli))
            .extract()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Chat Relay Server Configuration
# Place this file at ./relay.toml or specify with --config <path>
# All settings can be overridden via environment variables (RELAY_PORT,
# RELAY_HUB__OVERFLOW_POLICY, etc.) or CLI flags (--port, etc.)

# Server port (default: 8080)
# port = 8080

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database and JWT signing key
# data_dir = "./data"

# ---- Event Hub ----
# [hub]

# Queue feeding the single dispatcher task
# event_queue_capacity = 1024

# Per-session outbound queue; a full queue triggers the overflow policy
# outbound_queue_capacity = 64

# "drop" skips the event for the slow session only,
# "close" disconnects it with close code 4008
# overflow_policy = "drop"

# WebSocket keepalive
# ping_interval_secs = 30
# pong_timeout_secs = 10
"#
    .to_string()
}
