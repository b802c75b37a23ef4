//! Relay Protocol Types
//!
//! Every frame on the wire is one JSON object tagged by `type`. Extra keys are
//! ignored; a field that is missing, `null` or empty counts as absent.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RelayError;
use crate::metrics::ServerStats;

/// Messages sent FROM a host or viewer TO the relay
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    RegisterHost {
        #[serde(default)]
        host_id: Option<String>,
    },
    RegisterClient {
        #[serde(default)]
        client_id: Option<String>,
        #[serde(default)]
        target_host: Option<String>,
    },
    ScreenFrame {
        #[serde(default)]
        host_id: Option<String>,
        /// Already-encoded image payload, never inspected
        #[serde(default)]
        data: Option<Value>,
        #[serde(default)]
        timestamp: Option<Value>,
    },
    ControlCommand {
        #[serde(default)]
        client_id: Option<String>,
        #[serde(default)]
        target_host: Option<String>,
        /// Forwarded verbatim to the host
        #[serde(default)]
        command: Option<Value>,
    },
    GetHosts,
}

impl ClientMessage {
    pub const TYPES: &'static [&'static str] = &[
        "register_host",
        "register_client",
        "screen_frame",
        "control_command",
        "get_hosts",
    ];

    /// Parse one text frame.
    pub fn parse(text: &str) -> Result<Self, RelayError> {
        let value: Value = serde_json::from_str(text).map_err(|_| RelayError::InvalidJson)?;
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_string);

        match tag {
            Some(tag) if Self::TYPES.contains(&tag.as_str()) => {
                serde_json::from_value(value).map_err(|e| RelayError::Malformed {
                    tag,
                    reason: e.to_string(),
                })
            }
            other => Err(RelayError::UnknownType(other)),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::RegisterHost { .. } => "register_host",
            Self::RegisterClient { .. } => "register_client",
            Self::ScreenFrame { .. } => "screen_frame",
            Self::ControlCommand { .. } => "control_command",
            Self::GetHosts => "get_hosts",
        }
    }
}

/// Messages sent FROM the relay TO hosts and viewers.
///
/// Forwarded control commands are not listed here: they go to the host as
/// the viewer's raw `command` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    HostRegistered {
        host_id: String,
        room_id: String,
        server_time: String,
    },
    ClientRegistered {
        client_id: String,
        target_host: String,
        available_hosts: Vec<String>,
        server_time: String,
    },
    ScreenFrame {
        host_id: String,
        data: Value,
        timestamp: Value,
    },
    HostsList {
        hosts: Vec<HostSummary>,
        server_stats: ServerStats,
    },
    HostDisconnected {
        host_id: String,
        message: String,
    },
    Error {
        message: String,
        timestamp: String,
    },
}

impl ServerMessage {
    pub fn error(err: &RelayError) -> Self {
        Self::Error {
            message: err.to_string(),
            timestamp: server_time(),
        }
    }

    pub fn host_disconnected(host_id: &str) -> Self {
        Self::HostDisconnected {
            host_id: host_id.to_string(),
            message: "Host disconnected".to_string(),
        }
    }
}

/// One row of a `hosts_list` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSummary {
    pub host_id: String,
    pub connected_at: String,
    pub last_frame: Option<String>,
    pub clients_connected: usize,
}

/// Current time as RFC 3339, the format of every `*_time`/`timestamp` string.
pub fn server_time() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current Unix time in fractional seconds, stamped on frames that arrive
/// without their own `timestamp`.
pub fn unix_timestamp() -> Value {
    let now = Utc::now();
    let secs = now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1e6;
    Value::from(secs)
}

/// Treat empty identifiers the same as missing ones.
pub(crate) fn present(field: Option<String>) -> Option<String> {
    field.filter(|s| !s.is_empty())
}

/// `false` for values a sender would not mean as content: null, false, zero,
/// and empty strings, arrays and objects.
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
