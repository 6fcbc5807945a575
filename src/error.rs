//! Error types for the IPoE session controller.
//!
//! Fallible operations return [`Result<T>`]. Failures that only concern one
//! client session are not errors: they end the session with a
//! [`TerminateReason`](crate::session::TerminateReason) instead.

/// Errors surfaced by configuration, interface binding and the DHCP transport.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File system or network I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (configuration file).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed DHCP packet received.
    ///
    /// This includes packets that are too short, have invalid magic cookies,
    /// invalid option lengths, or other protocol violations.
    #[error("Invalid DHCP packet: {0}")]
    InvalidPacket(String),

    /// Invalid configuration.
    ///
    /// Returned by [`Config::validate`](crate::Config::validate).
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An interface option string contained an unknown token.
    #[error("Invalid interface options '{0}'")]
    InvalidOptions(String),

    /// Socket creation or configuration error.
    ///
    /// Typically occurs when binding to port 67 without administrator privileges,
    /// or when the specified network interface doesn't exist.
    #[error("Socket error: {0}")]
    Socket(String),

    /// No service is bound to the named interface.
    #[error("Interface {0} is not bound")]
    UnknownInterface(String),
}

/// A specialized Result type for IPoE operations.
pub type Result<T> = std::result::Result<T, Error>;
