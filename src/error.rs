//! Typed failures surfaced by sessions, the script parser and the engine.

use std::time::Duration;
use thiserror::Error;

/// Why a session could not connect or a command could not complete.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("connection to {host} timed out after {}ms", .timeout.as_millis())]
    ConnectionTimeout { host: String, timeout: Duration },

    #[error("failed to connect to {host}: {message}")]
    ConnectFailed { host: String, message: String },

    #[error("authentication to {host} failed: {message}")]
    AuthenticationFailed { host: String, message: String },

    #[error("no prompt detected from {host} within {}ms", .timeout.as_millis())]
    PromptDetectionFailed { host: String, timeout: Duration },

    #[error("command `{command}` timed out after {}ms", .timeout.as_millis())]
    CommandTimedOut { command: String, timeout: Duration },

    #[error("cancelled")]
    Cancelled,

    #[error("no connected session for {host}")]
    NotConnected { host: String },

    #[error("connection to {host} closed{}", closed_detail(.detail))]
    TransportClosed { host: String, detail: String },

    #[error("failed to write to {host}: {message}")]
    WriteFailed { host: String, message: String },
}

fn closed_detail(detail: &str) -> String {
    if detail.is_empty() {
        String::new()
    } else {
        format!(": {detail}")
    }
}

impl SessionError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SessionError::Cancelled)
    }
}

/// A script document that cannot be turned into a [`Script`](crate::script::Script).
#[derive(Debug, Error)]
pub enum ScriptParseError {
    #[error("invalid script document: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0}")]
    Document(String),

    #[error("{path}: {message}")]
    Step { path: String, message: String },
}

impl ScriptParseError {
    pub(crate) fn step(path: &str, message: impl Into<String>) -> Self {
        ScriptParseError::Step {
            path: path.to_string(),
            message: message.into(),
        }
    }
}

/// A batch that could not start.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Parse(#[from] ScriptParseError),

    #[error("no hosts to run on")]
    NoHosts,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_mentions_timed_out() {
        let err = SessionError::CommandTimedOut {
            command: "show run".into(),
            timeout: Duration::from_millis(2000),
        };
        assert_eq!(err.to_string(), "command `show run` timed out after 2000ms");
    }

    #[test]
    fn test_transport_closed_detail() {
        let bare = SessionError::TransportClosed {
            host: "r1:22".into(),
            detail: String::new(),
        };
        assert_eq!(bare.to_string(), "connection to r1:22 closed");

        let detailed = SessionError::TransportClosed {
            host: "r1:22".into(),
            detail: "Connection refused".into(),
        };
        assert_eq!(detailed.to_string(), "connection to r1:22 closed: Connection refused");
    }

    #[test]
    fn test_step_error_display() {
        let err = ScriptParseError::step("steps[2].extract", "`into` must be a string or list");
        assert_eq!(err.to_string(), "steps[2].extract: `into` must be a string or list");
    }
}
