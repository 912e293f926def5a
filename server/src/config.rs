use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ws::liveness::LivenessConfig;

/// Command-line flags. Anything left unset falls through to env, TOML or defaults.
#[derive(Parser, Serialize, Debug)]
#[command(name = "social-server", version, about = "Social network chat and presence server")]
struct Cli {
    /// Port to listen on
    #[arg(long, env = "SOCIAL_PORT")]
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u16>,

    /// Bind address
    #[arg(long, env = "SOCIAL_BIND_ADDRESS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    bind_address: Option<String>,

    /// Path to TOML config file
    #[arg(long, default_value = "./social.toml")]
    #[serde(skip)]
    config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    generate_config: bool,

    /// Data directory for persistent state (SQLite database)
    #[arg(long, env = "SOCIAL_DATA_DIR")]
    #[serde(skip_serializing_if = "Option::is_none")]
    data_dir: Option<String>,
}

/// Resolved server configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub json_logs: bool,
    pub generate_config: bool,
    pub data_dir: String,

    /// Socket keepalive settings (loaded from [liveness] section in TOML)
    #[serde(default)]
    pub liveness: LivenessSettings,
}

/// Keepalive tuning for chat, group and presence sockets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessSettings {
    /// Seconds a socket may stay silent before it is dropped (default: 60).
    /// Pings go out at nine tenths of this.
    #[serde(default = "default_pong_wait_secs")]
    pub pong_wait_secs: u64,
}

impl Default for LivenessSettings {
    fn default() -> Self {
        Self {
            pong_wait_secs: default_pong_wait_secs(),
        }
    }
}

impl LivenessSettings {
    pub fn to_config(&self) -> LivenessConfig {
        LivenessConfig::from_pong_wait(Duration::from_secs(self.pong_wait_secs.max(1)))
    }
}

fn default_pong_wait_secs() -> u64 {
    60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_address: "0.0.0.0".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            liveness: LivenessSettings::default(),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (SOCIAL_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Cli::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("SOCIAL_").split("__"))
            .merge(Serialized::defaults(cli))
            .extract()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Social network chat server configuration
# Place this file at ./social.toml or specify with --config <path>
# All settings can be overridden via environment variables (SOCIAL_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 8080)
# port = 8080

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database
# data_dir = "./data"

# ---- Socket keepalive ----
# [liveness]

# Seconds a chat/presence socket may stay silent before it is dropped.
# The server pings every 0.9 x this value; browsers answer automatically.
# Override with SOCIAL_LIVENESS__PONG_WAIT_SECS.
# pong_wait_secs = 60
"#
    .to_string()
}
