//! Label-keyed reconciliation of network power switches.
//!
//! A [`Manager`] is handed a fixed set of device labels and a [`Discovery`]
//! collaborator. Every poll interval it:
//!
//! - **Reconnects**: if any label is disconnected, calls discovery once,
//!   reads each discovered device's label, and adopts the ones it is
//!   waiting for.
//! - **Polls and enforces**: reads the on/off state of every connected
//!   device, records it, and switches any device whose state differs from
//!   the desired state set through [`Manager::set_desired_state`].
//!
//! Any failed device call (including one that exceeds the per-call
//! timeout) moves that device back to the disconnected set until discovery
//! finds it again, typically at a new address. Failures never stop the loop;
//! they are logged through `tracing` and broadcast as [`ManagerEvent`]s.
//!
//! The wire protocol lives behind [`DeviceHandle`]; this crate never opens
//! a socket itself.

pub mod config;
pub mod device;
pub mod error;
pub mod event;
pub mod manager;
mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{DiscoveryBackoff, ManagerConfig};
pub use device::{DeviceHandle, Discovery, Label};
pub use error::{CoreError, DeviceError, DeviceOperation};
pub use event::{ConnectionSnapshot, DiscoveryFailure, ManagerEvent, TickReport};
pub use manager::{Manager, ManagerBuilder};
pub use store::ConnectionStatus;

pub use tokio_util::sync::CancellationToken;
