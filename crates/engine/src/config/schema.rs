use std::collections::HashMap;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EngineConfig {
    #[serde(default)]
    pub mode: ChannelMode,
    #[serde(default = "default_socket_dir")]
    pub socket_dir: String,
    pub rules_path: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_action_timeout")]
    pub action_timeout_seconds: u64,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default)]
    pub egress: HashMap<String, EgressConfig>,
}

/// How the engine reaches its targets: `connect` dials per-process sockets,
/// `listen` exposes one socket that processes dial at their own startup.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChannelMode {
    #[default]
    Connect,
    Listen,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EgressConfig {
    Filesystem { directory: String },
}

impl EngineConfig {
    pub fn listen_socket_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.socket_dir).join("vigil.sock")
    }
}

fn default_socket_dir() -> String {
    std::env::var("XDG_RUNTIME_DIR")
        .map(|d| format!("{d}/vigil"))
        .unwrap_or_else(|_| "/tmp/vigil".to_string())
}

fn default_poll_interval() -> u64 {
    5
}

fn default_connect_timeout() -> u64 {
    2_000
}

fn default_handshake_timeout() -> u64 {
    5_000
}

fn default_action_timeout() -> u64 {
    30
}

fn default_api_port() -> u16 {
    9821
}
