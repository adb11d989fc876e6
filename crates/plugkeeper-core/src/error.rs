// ── Core error types ──
//
// `DeviceError` is what collaborators (device handles, discovery) return.
// `CoreError` is what the manager reports. The reconciliation loop never
// returns either one; per-device and per-cycle failures are logged and
// broadcast, then the loop moves on.

use std::time::Duration;

use serde::Serialize;
use strum::Display;
use thiserror::Error;

use crate::device::Label;

/// Failure reported by a [`DeviceHandle`](crate::DeviceHandle) or a
/// [`Discovery`](crate::Discovery) implementation.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Socket-level failure (connection refused, reset, unreachable host).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The device answered with something the protocol layer could not use.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// The device at `address` could not be reached.
    #[error("device at {address} is unreachable")]
    Unreachable { address: String },

    /// The call did not complete within the per-call timeout.
    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
}

impl DeviceError {
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

/// The collaborator call that failed, for logs and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeviceOperation {
    IsOn,
    SetOn,
}

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Construction ─────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    // ── Caller errors ────────────────────────────────────────────────
    #[error("Label is not managed: {label}")]
    UnknownLabel { label: String },

    // ── Transient collaborator failures ─────────────────────────────
    #[error("Discovery failed: {source}")]
    Discovery {
        #[source]
        source: DeviceError,
    },

    #[error("Reading label of device at {address} failed: {source}")]
    LabelRead {
        address: String,
        #[source]
        source: DeviceError,
    },

    #[error("{operation} on device {label} failed: {source}")]
    DeviceIo {
        label: Label,
        operation: DeviceOperation,
        #[source]
        source: DeviceError,
    },
}

impl CoreError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_io_message_names_label_and_operation() {
        let err = CoreError::DeviceIo {
            label: Label::from("porch"),
            operation: DeviceOperation::SetOn,
            source: DeviceError::Timeout(Duration::from_millis(250)),
        };
        assert_eq!(
            err.to_string(),
            "set_on on device porch failed: timed out after 250ms"
        );
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: DeviceError = io.into();
        assert!(matches!(err, DeviceError::Io(_)));
    }
}
