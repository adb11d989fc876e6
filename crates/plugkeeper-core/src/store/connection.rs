// ── Connection table ──
//
// Every managed label owns exactly one slot for the lifetime of the
// manager. A slot is either Connected (holding the live handle) or
// Disconnected (waiting for rediscovery). Keys are fixed at construction,
// so a label can never be in both partitions or in neither.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use strum::Display;

use crate::device::{DeviceHandle, Label};

/// Reachability of a managed label, as last determined by the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

enum Slot {
    Connected(Arc<dyn DeviceHandle>),
    Disconnected,
}

impl Slot {
    fn status(&self) -> ConnectionStatus {
        match self {
            Self::Connected(_) => ConnectionStatus::Connected,
            Self::Disconnected => ConnectionStatus::Disconnected,
        }
    }
}

pub(crate) struct ConnectionTable {
    slots: HashMap<Label, Slot>,
}

impl ConnectionTable {
    /// Build a table with every label disconnected.
    pub(crate) fn new(labels: impl IntoIterator<Item = Label>) -> Self {
        Self {
            slots: labels
                .into_iter()
                .map(|label| (label, Slot::Disconnected))
                .collect(),
        }
    }

    pub(crate) fn contains(&self, label: &str) -> bool {
        self.slots.contains_key(label)
    }

    pub(crate) fn status(&self, label: &str) -> Option<ConnectionStatus> {
        self.slots.get(label).map(Slot::status)
    }

    pub(crate) fn has_disconnected(&self) -> bool {
        self.slots
            .values()
            .any(|slot| matches!(slot, Slot::Disconnected))
    }

    /// Move a disconnected label to Connected. Returns `false` (and leaves
    /// the table untouched) if the label is unmanaged or already connected.
    pub(crate) fn promote(&mut self, label: &str, handle: Arc<dyn DeviceHandle>) -> bool {
        let Some(slot) = self.slots.get_mut(label) else {
            return false;
        };
        if matches!(slot, Slot::Connected(_)) {
            return false;
        }
        *slot = Slot::Connected(handle);
        true
    }

    /// Move a connected label to Disconnected, dropping its handle.
    /// Returns `false` if the label was not connected.
    pub(crate) fn demote(&mut self, label: &str) -> bool {
        let Some(slot) = self.slots.get_mut(label) else {
            return false;
        };
        if matches!(slot, Slot::Disconnected) {
            return false;
        }
        *slot = Slot::Disconnected;
        true
    }

    /// Clone out every connected handle so I/O can happen without the lock.
    pub(crate) fn connected(&self) -> Vec<(Label, Arc<dyn DeviceHandle>)> {
        self.slots
            .iter()
            .filter_map(|(label, slot)| match slot {
                Slot::Connected(handle) => Some((label.clone(), Arc::clone(handle))),
                Slot::Disconnected => None,
            })
            .collect()
    }

    /// Labels in the given partition, sorted.
    pub(crate) fn labels_with(&self, status: ConnectionStatus) -> Vec<Label> {
        let mut labels: Vec<Label> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.status() == status)
            .map(|(label, _)| label.clone())
            .collect();
        labels.sort();
        labels
    }
}
