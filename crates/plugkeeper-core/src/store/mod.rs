// ── Shared manager state ──
//
// Everything the loop and external callers both touch lives in one
// `StateStore`, which the manager keeps behind a single mutex. Nothing in
// here performs I/O; callers lock, read or commit, and unlock.

mod connection;

use std::collections::HashMap;

pub use connection::ConnectionStatus;
pub(crate) use connection::ConnectionTable;

use crate::device::Label;
use crate::error::CoreError;

pub(crate) struct StateStore {
    pub(crate) connections: ConnectionTable,
    desired: HashMap<Label, bool>,
    observed: HashMap<Label, bool>,
}

impl StateStore {
    pub(crate) fn new(labels: &[Label]) -> Self {
        Self {
            connections: ConnectionTable::new(labels.iter().cloned()),
            desired: HashMap::with_capacity(labels.len()),
            observed: HashMap::with_capacity(labels.len()),
        }
    }

    fn managed(&self, label: &str) -> Result<Label, CoreError> {
        if self.connections.contains(label) {
            Ok(Label::from(label))
        } else {
            Err(CoreError::UnknownLabel {
                label: label.to_owned(),
            })
        }
    }

    // ── Desired state ───────────────────────────────────────────────

    pub(crate) fn set_desired(&mut self, label: &str, on: bool) -> Result<(), CoreError> {
        let label = self.managed(label)?;
        self.desired.insert(label, on);
        Ok(())
    }

    /// Validate every label first so an unknown one leaves the map untouched.
    pub(crate) fn set_desired_many(&mut self, states: Vec<(String, bool)>) -> Result<(), CoreError> {
        let validated = states
            .into_iter()
            .map(|(label, on)| self.managed(&label).map(|label| (label, on)))
            .collect::<Result<Vec<_>, _>>()?;
        self.desired.extend(validated);
        Ok(())
    }

    pub(crate) fn clear_desired(&mut self, label: &str) -> Result<Option<bool>, CoreError> {
        self.managed(label)?;
        Ok(self.desired.remove(label))
    }

    pub(crate) fn desired(&self, label: &str) -> Option<bool> {
        self.desired.get(label).copied()
    }

    // ── Observed state ──────────────────────────────────────────────

    pub(crate) fn observed(&self, label: &str) -> Option<bool> {
        self.observed.get(label).copied()
    }

    /// Record a fresh observation and return the desired value to enforce,
    /// if it differs. Both happen in the same critical section.
    pub(crate) fn observe(&mut self, label: &Label, on: bool) -> Option<bool> {
        self.record_observed(label, on);
        self.desired(label.as_str()).filter(|&desired| desired != on)
    }

    pub(crate) fn record_observed(&mut self, label: &Label, on: bool) {
        self.observed.insert(label.clone(), on);
    }
}
