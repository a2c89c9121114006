//! Errors surfaced by the session engine.
//!
//! Protocol-level failures reported by the server (FAIL/WARN/NOTE, numeric
//! error replies) are not errors here: they become [`crate::event::Event::Error`]
//! values. `SessionError` only covers messages this engine could not process.

/// A single inbound message could not be processed.
///
/// Returning one of these never leaves the session half-updated: handlers
/// validate a message fully before touching any state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("{command}: expected at least {expected} parameters, got {got}")]
    NotEnoughParams {
        command: String,
        expected: usize,
        got: usize,
    },
    #[error("{0}: message has no prefix")]
    MissingPrefix(String),
    #[error("BATCH: empty batch id")]
    EmptyBatchId,
    #[error("MODE {channel}: missing argument for mode '{mode}'")]
    MissingModeArgument { channel: String, mode: char },
}

/// Errors loading a [`crate::config::SessionConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("can't read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("bad config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("can't serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}
