// ── Telemetry emitted by the reconciliation loop ──

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::device::Label;
use crate::error::DeviceOperation;

/// Something the loop did or failed to do, broadcast to subscribers.
///
/// Serializes as an internally tagged object (`{"event": "corrected", ...}`)
/// so it can be shipped to log pipelines as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ManagerEvent {
    /// A disconnected label was matched to a discovered device.
    Reconnected {
        label: Label,
        address: Option<String>,
    },
    /// A connected device failed and was queued for rediscovery.
    Disconnected {
        label: Label,
        operation: DeviceOperation,
        reason: String,
    },
    /// The device was switched to its desired state.
    Corrected { label: Label, on: bool },
    /// Discovery failed; reconnect was abandoned for this tick.
    DiscoveryFailed {
        reason: String,
        consecutive_failures: u32,
    },
    /// A discovered device could not report its label and was skipped.
    LabelReadFailed {
        address: Option<String>,
        reason: String,
    },
}

/// Most recent discovery failure, cleared by the next successful discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryFailure {
    pub message: String,
    pub at: DateTime<Utc>,
    pub consecutive_failures: u32,
}

/// Connected and disconnected labels captured at the same instant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionSnapshot {
    pub connected: Vec<Label>,
    pub disconnected: Vec<Label>,
}

/// Summary of a single tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Discovery was invoked this tick.
    pub discovery_attempted: bool,
    /// Labels promoted to Connected by this tick's reconnect pass.
    pub reconnected: Vec<Label>,
    /// Number of connected devices polled.
    pub polled: usize,
    /// Labels that received a corrective write.
    pub corrected: Vec<Label>,
    /// Labels demoted to Disconnected by this tick's poll pass.
    pub disconnected: Vec<Label>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_tag() {
        let event = ManagerEvent::Disconnected {
            label: Label::from("heater"),
            operation: DeviceOperation::IsOn,
            reason: "timed out".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "event": "disconnected",
                "label": "heater",
                "operation": "is_on",
                "reason": "timed out",
            })
        );
    }
}
