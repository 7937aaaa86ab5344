//! Error types and result definitions for the roomctl crate.
//! Each transport reports its own failure kind; the controller wraps the
//! final socket failure so callers can tell a failed read from a failed write.

use thiserror::Error;
use uuid::Uuid;

/// Failures reported by a radio backend (adapter, scan, GATT link).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RadioError {
    /// No Bluetooth adapter is available on this host
    #[error("No Bluetooth adapter found")]
    NoAdapter,

    /// The adapter is present but switched off
    #[error("Bluetooth adapter is powered off")]
    PoweredOff,

    /// The peer was never seen during a scan
    #[error("Unknown peer '{0}'")]
    UnknownPeer(String),

    /// The peer does not expose the requested control point
    #[error("Characteristic {0} not found")]
    CharacteristicNotFound(Uuid),

    /// The link was closed by the peer or the platform
    #[error("Link severed")]
    Disconnected,

    /// A characteristic value could not be framed for the link
    #[error("Framing error: {0}")]
    Framing(String),

    /// Error surfaced by the platform Bluetooth stack
    #[error("Bluetooth stack error: {0}")]
    Backend(String),
}

#[cfg(feature = "btleplug")]
impl From<btleplug::Error> for RadioError {
    fn from(err: btleplug::Error) -> Self {
        match err {
            btleplug::Error::NotConnected => RadioError::Disconnected,
            other => RadioError::Backend(other.to_string()),
        }
    }
}

/// Errors of the Bluetooth LE transport.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WirelessError {
    /// The platform has no usable Bluetooth LE stack
    #[error("Wireless transport unsupported on this platform")]
    Unsupported,

    /// No peer advertising the configured name was seen before the scan timed out
    #[error("Device not found")]
    DeviceNotFound,

    /// The radio reported an error while scanning
    #[error("Scan error: {0}")]
    ScanError(String),

    /// Connect, service discovery or identify failed
    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    /// No authenticated session is installed
    #[error("Not connected")]
    NotConnected,

    /// A connect attempt is already scanning or connecting
    #[error("Connect already in progress")]
    AlreadyConnecting,

    /// The get-state payload was not a valid state document
    #[error("Decode error: {reason} (payload: {raw:?})")]
    DecodeError { reason: String, raw: String },

    /// Reading the get-state control point failed
    #[error("Read failed: {0}")]
    ReadError(String),

    /// Writing the set-state control point failed
    #[error("Write failed: {0}")]
    WriteError(String),

    /// The operation was aborted by the owner of the transport
    #[error("Cancelled")]
    Cancelled,
}

/// Errors of the TCP socket transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SocketError {
    /// The platform cannot open local sockets
    #[error("Socket transport unsupported on this platform")]
    Unsupported,

    /// Connection refused, unreachable or timed out
    #[error("Connect failed: {0}")]
    Connect(String),

    /// I/O error in the middle of an exchange
    #[error("IO error: {0}")]
    Io(String),

    /// Response frame was malformed, incomplete or lacked the state object
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No response arrived in time
    #[error("Timeout waiting for controller")]
    Timeout,

    /// The operation was aborted by the owner of the transport
    #[error("Cancelled")]
    Cancelled,
}

impl From<std::io::Error> for SocketError {
    fn from(err: std::io::Error) -> Self {
        SocketError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for SocketError {
    fn from(err: serde_json::Error) -> Self {
        SocketError::Protocol(err.to_string())
    }
}

/// Errors surfaced by the [`Controller`](crate::Controller) once fallback is exhausted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControllerError {
    /// Neither transport produced a device state
    #[error("No state available: {0}")]
    StateUnavailable(#[source] SocketError),

    /// The command was not acknowledged by the controller
    #[error("Command not applied: {0}")]
    CommandNotApplied(#[source] SocketError),

    /// The controller was shut down while the call was in flight
    #[error("Controller shut down")]
    Cancelled,
}

/// Errors from encoding or decoding wire documents.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("invalid base64: {0}")]
    Base64(String),

    #[error("invalid UTF-8 text")]
    Utf8,

    #[error("invalid JSON: {0}")]
    Json(String),

    #[error("expected a JSON object")]
    NotObject,

    #[error("response has no state field")]
    MissingState,
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        CodecError::Json(err.to_string())
    }
}

/// A specialized Result type for wireless operations.
pub type Result<T> = std::result::Result<T, WirelessError>;

impl WirelessError {
    pub fn code(&self) -> u32 {
        match self {
            WirelessError::Unsupported => ERR_UNSUPPORTED,
            WirelessError::DeviceNotFound => ERR_DEVICE_NOT_FOUND,
            WirelessError::ScanError(_) => ERR_SCAN,
            WirelessError::HandshakeError(_) => ERR_HANDSHAKE,
            WirelessError::NotConnected => ERR_NOT_CONNECTED,
            WirelessError::AlreadyConnecting => ERR_BUSY,
            WirelessError::DecodeError { .. } => ERR_DECODE,
            WirelessError::ReadError(_) => ERR_READ,
            WirelessError::WriteError(_) => ERR_WRITE,
            WirelessError::Cancelled => ERR_CANCELLED,
        }
    }
}

impl SocketError {
    pub fn code(&self) -> u32 {
        match self {
            SocketError::Unsupported => ERR_UNSUPPORTED,
            SocketError::Connect(_) => ERR_CONNECT,
            SocketError::Io(_) => ERR_IO,
            SocketError::Protocol(_) => ERR_PROTOCOL,
            SocketError::Timeout => ERR_TIMEOUT,
            SocketError::Cancelled => ERR_CANCELLED,
        }
    }
}

impl ControllerError {
    pub fn code(&self) -> u32 {
        match self {
            ControllerError::StateUnavailable(_) => ERR_STATE_UNAVAILABLE,
            ControllerError::CommandNotApplied(_) => ERR_COMMAND_NOT_APPLIED,
            ControllerError::Cancelled => ERR_CANCELLED,
        }
    }

    /// The socket failure that ended the call, if any.
    pub fn transport_error(&self) -> Option<&SocketError> {
        match self {
            ControllerError::StateUnavailable(e) | ControllerError::CommandNotApplied(e) => Some(e),
            ControllerError::Cancelled => None,
        }
    }
}

define_error_codes! {
    ERR_SUCCESS = 0 => "Success",
    ERR_UNSUPPORTED = 1001 => "Transport Unsupported on this Platform",
    ERR_DEVICE_NOT_FOUND = 1002 => "Controller Not Found During Scan",
    ERR_SCAN = 1003 => "Bluetooth Scan Failed",
    ERR_HANDSHAKE = 1004 => "Connect or Identify Handshake Failed",
    ERR_NOT_CONNECTED = 1005 => "No Wireless Session",
    ERR_BUSY = 1006 => "Connect Already in Progress",
    ERR_DECODE = 1007 => "Invalid State Payload",
    ERR_READ = 1008 => "Control Point Read Failed",
    ERR_WRITE = 1009 => "Control Point Write Failed",
    ERR_CONNECT = 1010 => "Network Error: Unable to Connect",
    ERR_IO = 1011 => "Network Error: Exchange Interrupted",
    ERR_PROTOCOL = 1012 => "Unexpected Response from Controller",
    ERR_TIMEOUT = 1013 => "Timeout Waiting for Controller",
    ERR_CANCELLED = 1014 => "Operation Cancelled",
    ERR_STATE_UNAVAILABLE = 1020 => "No State Available",
    ERR_COMMAND_NOT_APPLIED = 1021 => "Command Not Applied",
}
