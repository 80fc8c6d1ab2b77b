//! Shared error types for the Crossbar router.

use thiserror::Error;

/// Top-level error type returned by the registry API.
#[derive(Error, Debug)]
pub enum CrossbarError {
    /// The command name is already owned locally or by a different channel.
    #[error("Command already registered: {0}")]
    AlreadyRegistered(String),

    /// The command is unknown and no router channel is configured.
    #[error("Command and router channel not found: {0}")]
    CommandNotFound(String),

    /// The channel needed to deliver a message does not exist.
    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    /// The channel a pending call was waiting on was closed.
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// The remote side rejected the call. Only the text survives the wire.
    #[error("{0}")]
    Remote(String),

    /// A local handler failed.
    #[error("Handler failed: {0:#}")]
    Handler(anyhow::Error),

    /// A pending call did not complete within the configured timeout.
    #[error("Timed out after {timeout_ms} ms waiting for '{command}'")]
    Timeout {
        /// The command (or registration) that was waiting.
        command: String,
        /// The configured timeout.
        timeout_ms: u64,
    },

    /// The underlying transport failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CrossbarError {
    /// The text sent in a wire `error` message for this failure.
    ///
    /// Handler errors carry their full context chain; everything else uses
    /// its display form.
    pub fn wire_reason(&self) -> String {
        match self {
            CrossbarError::Handler(e) => format!("{e:#}"),
            other => other.to_string(),
        }
    }
}

/// Alias for Result with CrossbarError.
pub type CrossbarResult<T> = Result<T, CrossbarError>;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_already_registered_message() {
        let err = CrossbarError::AlreadyRegistered("echo".to_string());
        assert!(err.to_string().contains("already registered"));
        assert!(err.to_string().contains("echo"));
    }

    #[test]
    fn test_remote_error_is_verbatim() {
        let err = CrossbarError::Remote("disk full".to_string());
        assert_eq!(err.to_string(), "disk full");
        assert_eq!(err.wire_reason(), "disk full");
    }

    #[test]
    fn test_handler_wire_reason_keeps_context() {
        let inner: anyhow::Result<()> = Err(anyhow::anyhow!("row 7 missing"));
        let err = inner.context("loading ledger").unwrap_err();
        let err = CrossbarError::Handler(err);
        assert_eq!(err.wire_reason(), "loading ledger: row 7 missing");
    }
}
