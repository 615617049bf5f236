// vim: cc=81
use std::path::PathBuf;
use thiserror::Error;

pub const BLUEZ_REJECTED_ERROR: &str = "org.bluez.Error.Rejected";
pub const BLUEZ_CANCELED_ERROR: &str = "org.bluez.Error.Canceled";
pub const BLUEZ_FAILED_ERROR: &str = "org.bluez.Error.Failed";

/// Failure of a call against the Bluetooth service or the radio switch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("{method} on {path} failed: {message}")]
    Call {
        path: String,
        method: String,
        message: String,
    },

    #[error("connection to the system bus was lost: {0}")]
    ConnectionLost(String),

    #[error("radio switch failed: {0}")]
    Radio(String),
}

impl TransportError {
    pub fn call(path: &str, method: &str, message: impl Into<String>) -> Self {
        Self::Call {
            path: path.to_string(),
            method: method.to_string(),
            message: message.into(),
        }
    }

    /// Only a lost connection ends the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ConnectionLost(_))
    }
}

/// A signal payload that does not have the shape its member promises.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("{member}: missing argument {index}")]
    MissingArgument { member: String, index: usize },

    #[error("{member}: argument {index} should be {expected}")]
    UnexpectedType {
        member: String,
        index: usize,
        expected: &'static str,
    },

    #[error("{key}: expected {expected}")]
    InvalidValue { key: String, expected: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
    #[error("agent not ready")]
    NotReady,

    #[error("another pairing request is still waiting for an answer")]
    Busy,

    #[error("pairing rejected")]
    Rejected,

    #[error("pairing canceled")]
    Canceled,
}

impl AgentError {
    /// The BlueZ error name returned to the caller of the agent method.
    pub fn dbus_name(&self) -> &'static str {
        match self {
            Self::NotReady => BLUEZ_FAILED_ERROR,
            Self::Busy | Self::Rejected => BLUEZ_REJECTED_ERROR,
            Self::Canceled => BLUEZ_CANCELED_ERROR,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connection_loss_is_fatal() {
        assert!(TransportError::ConnectionLost("eof".into()).is_fatal());
        assert!(!TransportError::call("/org/bluez/hci0", "Pair", "x").is_fatal());
        assert!(!TransportError::Radio("rfkill missing".into()).is_fatal());
    }

    #[test]
    fn agent_errors_map_to_bluez_names() {
        assert_eq!(AgentError::Rejected.dbus_name(), BLUEZ_REJECTED_ERROR);
        assert_eq!(AgentError::Busy.dbus_name(), BLUEZ_REJECTED_ERROR);
        assert_eq!(AgentError::Canceled.dbus_name(), BLUEZ_CANCELED_ERROR);
        assert_eq!(AgentError::NotReady.dbus_name(), BLUEZ_FAILED_ERROR);
        assert_eq!(AgentError::Rejected.to_string(), "pairing rejected");
    }
}
