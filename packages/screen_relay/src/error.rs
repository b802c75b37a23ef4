//! Protocol-level errors reported back to the originating connection.

/// Errors raised while validating or routing an inbound message.
///
/// None of these close the connection: the router turns each one into an
/// `error` reply whose `message` is the `Display` text below.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("Invalid JSON format")]
    InvalidJson,

    #[error("Unknown message type: {}", .0.as_deref().unwrap_or("null"))]
    UnknownType(Option<String>),

    #[error("Invalid {tag} message: {reason}")]
    Malformed { tag: String, reason: String },

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Host {0} is not connected")]
    UnknownHost(String),

    #[error("Client {0} is not registered")]
    UnknownClient(String),

    #[error("Host {0} is already registered")]
    DuplicateId(String),

    #[error("Host {0} disconnected")]
    HostGone(String),
}

impl RelayError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidJson => "invalid_json",
            Self::UnknownType(_) => "unknown_type",
            Self::Malformed { .. } => "malformed",
            Self::MissingField(_) => "missing_field",
            Self::UnknownHost(_) => "unknown_host",
            Self::UnknownClient(_) => "unknown_client",
            Self::DuplicateId(_) => "duplicate_id",
            Self::HostGone(_) => "host_gone",
        }
    }
}
