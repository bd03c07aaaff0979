//! Pairing error types.

/// Errors that can occur during the pairing handshake. All of them leave
/// the device unconfigured; no partial state is persisted.
#[derive(Debug, thiserror::Error)]
pub enum PairingError {
    /// No complete response line arrived within the timeout.
    #[error("No response from device within timeout")]
    NoResponse,

    /// The device answered with something other than the expected
    /// response format.
    #[error("Malformed response from device: {0:?}")]
    MalformedResponse(String),

    /// A serial-port fault (port busy, permission denied, disconnected).
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// An I/O error on the open port.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
