//! Error types for the protocol layer.

use std::time::Duration;

use thiserror::Error;

use crate::registry::Channel;
use crate::session::SessionState;

/// Library-wide result alias.
pub type Result<T, E = MyoError> = std::result::Result<T, E>;

/// Why a single payload could not be decoded.
///
/// Always scoped to one notification or read; never ends a stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("{payload} payload must be {expected} bytes, got {actual}")]
    Length {
        payload: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("unknown {field} value {value:#04x}")]
    UnknownValue { field: &'static str, value: u16 },

    #[error("battery level {0}% is above 100%")]
    BatteryOutOfRange(u8),

    #[error("device name is not valid UTF-8")]
    InvalidName,
}

/// Failure reported by a [`crate::transport::BleTransport`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("peripheral is not connected")]
    NotConnected,

    #[error("characteristic {0} not found on peripheral")]
    CharacteristicNotFound(uuid::Uuid),

    #[error("BLE backend error: {0}")]
    Backend(String),
}

/// Every error the session and facade can report.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MyoError {
    /// The transport could not establish the link.
    #[error("connect failed: {0}")]
    Connect(#[source] TransportError),

    /// Discovery found a peripheral without the armband's required channels.
    #[error("device incompatible, missing channels: {missing:?}")]
    DeviceIncompatible { missing: Vec<Channel> },

    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] DecodeError),

    /// The transport rejected a command write.  Not retried.
    #[error("command write failed: {0}")]
    WriteFailed(#[source] TransportError),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The link dropped mid-operation; the session is gone and the effect of
    /// the interrupted operation is unknown.
    #[error("session faulted: {0}")]
    Faulted(String),

    /// A command argument was rejected before encoding.
    #[error("invalid command argument: {0}")]
    InvalidCommandArgument(String),

    #[error("cannot {operation} while {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("a session is already active ({0:?})")]
    AlreadyConnected(SessionState),

    /// The peripheral does not expose an optional channel the request needs.
    #[error("channel {0:?} is not available on this device")]
    ChannelUnavailable(Channel),

    /// Subscribe, unsubscribe, read or disconnect failed in the transport.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}
