use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// =============================================================================
// File config (figment-deserialized from defaults / relay.toml / env vars)
// =============================================================================
//
//   relay.toml:      [relay]
//                    send_timeout_ms = 500
//
//   env var:         RELAY_RELAY__SEND_TIMEOUT_MS=500   (double underscore = nesting)

/// What to do when a `register_host` names an id that is already live on
/// another connection.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateHostPolicy {
    /// Refuse the newcomer with a `DuplicateId` error.
    #[default]
    Reject,
    /// Evict the current host (its viewers get `host_disconnected`) and
    /// register the newcomer in its place.
    Replace,
}

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub relay: RelayFileConfig,
}

/// Listener settings (lives under `[server]` in relay.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Relay tuning knobs (lives under `[relay]` in relay.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelayFileConfig {
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    #[serde(default = "default_send_queue_capacity")]
    pub send_queue_capacity: usize,
    #[serde(default)]
    pub duplicate_host_policy: DuplicateHostPolicy,
    #[serde(default = "default_max_message_mb")]
    pub max_message_mb: usize,
}

impl Default for RelayFileConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: default_send_timeout_ms(),
            send_queue_capacity: default_send_queue_capacity(),
            duplicate_host_policy: DuplicateHostPolicy::default(),
            max_message_mb: default_max_message_mb(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_send_timeout_ms() -> u64 {
    2000
}
fn default_send_queue_capacity() -> usize {
    256
}
fn default_max_message_mb() -> usize {
    16
}

/// Build a figment that layers: defaults → relay.toml → RELAY_* env vars.
///
/// `config_file` falls back to `relay.toml` in the working directory; a
/// missing file is not an error.
pub fn load_config(config_file: Option<&Path>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let path = config_file.unwrap_or_else(|| Path::new("relay.toml"));

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("RELAY_").split("__"))
}

// =============================================================================
// Runtime config (derived from FileConfig, used throughout the relay)
// =============================================================================

#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Upper bound on a single enqueue into a peer's outbound queue
    pub send_timeout: Duration,
    /// Outbound queue depth per connection
    pub send_queue_capacity: usize,
    pub duplicate_host_policy: DuplicateHostPolicy,
    /// Largest inbound WebSocket message accepted
    pub max_message_bytes: usize,
}

impl RelayConfig {
    pub fn from_file(fc: &RelayFileConfig) -> Self {
        Self {
            send_timeout: Duration::from_millis(fc.send_timeout_ms.max(1)),
            send_queue_capacity: fc.send_queue_capacity.max(1),
            duplicate_host_policy: fc.duplicate_host_policy,
            max_message_bytes: fc.max_message_mb.max(1) * 1024 * 1024,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::from_file(&RelayFileConfig::default())
    }
}
