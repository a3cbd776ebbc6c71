//! Error types shared by both participants

use std::time::Duration;
use thiserror::Error;

/// Errors reported by a broker implementation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    #[error("Connection refused by {address}: {reason}")]
    ConnectionRefused { address: String, reason: String },

    #[error("Connection is closed")]
    ConnectionClosed,

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Exchange not found: {0}")]
    ExchangeNotFound(String),

    #[error("Queue {0} already has a consumer")]
    AlreadyConsuming(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl BrokerError {
    /// Wrap any displayable transport failure
    pub fn transport<E: std::fmt::Display>(err: E) -> Self {
        BrokerError::Transport(err.to_string())
    }
}

/// Terminal failure of the connection manager
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Gave up connecting to {address} after {attempts} attempts")]
    Exhausted {
        address: String,
        attempts: u32,
        #[source]
        last: BrokerError,
    },
}

/// Failure to bring all communication channels up
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Channel setup timed out after {timeout:?} ({ready} of {expected} channels ready)")]
    Timeout {
        timeout: Duration,
        ready: usize,
        expected: usize,
    },

    #[error("Connection is not open")]
    ConnectionFailed,

    #[error("Setup of channel '{channel}' failed: {source}")]
    ChannelFailed {
        channel: String,
        #[source]
        source: BrokerError,
    },

    #[error("Channel '{0}' is not part of this setup")]
    MissingChannel(String),

    #[error("Channel '{0}' is requested more than once")]
    DuplicateChannel(String),

    #[error("Readiness barrier was already consumed")]
    AlreadyConsumed,
}

/// Reasons a raw command envelope cannot be decoded
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Envelope too short: {len} bytes")]
    TooShort { len: usize },

    #[error("Session id length {declared} exceeds the {available} bytes available")]
    SessionIdOverrun { declared: usize, available: usize },

    #[error("Session id is not valid UTF-8")]
    InvalidSessionId,

    #[error("Envelope has no command id")]
    MissingCommandId,
}

/// Failure to interpret a decoded envelope as a known command
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command id {0}")]
    UnknownCommand(u8),

    #[error("Invalid payload for {command}: {reason}")]
    InvalidPayload { command: &'static str, reason: String },
}

/// Worker pool submission failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("Worker pool '{0}' is full")]
    Full(String),

    #[error("Worker pool '{0}' is shut down")]
    Closed(String),
}
