//! Error types for the lanbridge relay.

use std::io;

use thiserror::Error;

/// Main error type for lanbridge operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("engine start failed: {0}")]
    Start(#[from] StartError),

    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    #[error("metrics error: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[source] io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),

    #[error("validation failed: {0}")]
    Validation(String),
}

/// Errors surfaced by [`RelayEngine::start`](crate::engine::RelayEngine::start).
///
/// Each variant maps to a distinct user action: `Privilege` means "run
/// elevated", `Bind` means the port or interface is unavailable, and
/// `HostAddress` means the machine has no usable IPv4 address.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("raw socket access denied (are you running elevated?): {0}")]
    Privilege(#[source] io::Error),

    #[error("network stack initialisation failed: {0}")]
    PlatformInit(#[source] io::Error),

    #[error("no IPv4 address could be determined for the capture interface")]
    HostAddress,

    #[error("failed to bind capture socket: {0}")]
    Bind(#[source] io::Error),
}

/// Per-packet errors on the relay path.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("malformed datagram: {0}")]
    MalformedDatagram(&'static str),

    #[error("failed to send datagram: {0}")]
    SendFailed(#[source] io::Error),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;
