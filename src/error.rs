//! Error types for the jog control core

use thiserror::Error;

/// Errors raised while establishing one of the robot connections.
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("robot unreachable: {0}")]
    Unreachable(String),

    #[error("connection timed out: {0}")]
    Timeout(String),

    #[error("already connected")]
    AlreadyConnected,
}

/// Errors detected while decoding the real-time telemetry stream.
///
/// These are always recovered inside the receive loop (the offending packet
/// is dropped and the last known good state retained); they never cross the
/// public API except through logging.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("packet undersized: declared {declared} bytes, minimum {minimum}")]
    Undersized { declared: usize, minimum: usize },

    #[error("implausible declared packet length {0}, stream desynchronized")]
    ImplausibleLength(usize),

    #[error("declared length {declared} does not match the selected layout ({expected})")]
    LengthMismatch { declared: usize, expected: usize },

    #[error("no known field layout for packet length {0}")]
    UnknownLayout(usize),

    #[error("{field} outside plausible range")]
    OutOfRange { field: &'static str },
}

/// Errors raised while sending a command over the script or dashboard channel.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("channel not connected")]
    NotConnected,

    #[error("command channel I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("response timed out")]
    Timeout,

    #[error("robot rejected command: {0}")]
    Rejected(String),
}

/// Outcomes of jog and power operations that were rejected or failed.
///
/// Public jog operations report these as boolean results; the typed value is
/// logged so the caller can surface the reason.
#[derive(Error, Debug)]
pub enum JogError {
    #[error("safety interlock: {0}")]
    SafetyInterlock(String),

    #[error("invalid axis: {0}")]
    InvalidAxis(String),

    #[error("speed scale {0} outside (0, 1]")]
    InvalidSpeed(f64),

    #[error("step size {0} must be positive")]
    InvalidStep(f64),

    #[error("cannot change jog mode while jogging")]
    ModeChangeWhileJogging,

    #[error("a continuous jog is already active")]
    AlreadyJogging,

    #[error("not connected to the robot")]
    NotConnected,

    #[error("no telemetry received yet")]
    NoTelemetry,

    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
