// ── Collaborator contracts ──
//
// The manager never speaks a wire protocol itself. A `Discovery` finds the
// devices that are reachable right now and hands back `DeviceHandle`s; the
// manager addresses each one only through that handle. Every call may block
// on the network and every call may fail.

use std::borrow::Borrow;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DeviceError;

// ── Label ───────────────────────────────────────────────────────────

/// Stable, human-assigned name of a managed device.
///
/// Addresses change when DHCP leases do; the label (the name configured on
/// the plug itself) is what the manager keys every map on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Label(String);

impl Label {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Label {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<String> for Label {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Label {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ── DeviceHandle ────────────────────────────────────────────────────

/// A live connection to one power switch.
#[async_trait]
pub trait DeviceHandle: Send + Sync {
    /// Read the label configured on the device.
    async fn label(&self) -> Result<String, DeviceError>;

    /// Read whether the relay is currently on.
    async fn is_on(&self) -> Result<bool, DeviceError>;

    /// Switch the relay on or off.
    async fn set_on(&self, on: bool) -> Result<(), DeviceError>;

    /// Network address, used only for log context.
    fn address(&self) -> Option<String> {
        None
    }
}

// ── Discovery ───────────────────────────────────────────────────────

/// Produces the set of devices reachable at the time of the call.
///
/// Implemented for any `Fn() -> impl Future<Output = Result<Vec<..>, _>>`,
/// so a plain async closure can be handed to the builder.
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn discover(&self) -> Result<Vec<Arc<dyn DeviceHandle>>, DeviceError>;
}

#[async_trait]
impl<F, Fut> Discovery for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<Arc<dyn DeviceHandle>>, DeviceError>> + Send + 'static,
{
    async fn discover(&self) -> Result<Vec<Arc<dyn DeviceHandle>>, DeviceError> {
        (self)().await
    }
}
