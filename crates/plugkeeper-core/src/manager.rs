// ── Reconciliation manager ──
//
// Owns the connection table and the desired/observed maps, and drives the
// reconcile loop: reconnect disconnected labels through discovery, then
// poll every connected device and correct any that drifted from the
// desired state. Device I/O never happens while the state lock is held.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info, trace, warn};

use crate::config::{DiscoveryBackoff, ManagerConfig};
use crate::device::{DeviceHandle, Discovery, Label};
use crate::error::{CoreError, DeviceError, DeviceOperation};
use crate::event::{ConnectionSnapshot, DiscoveryFailure, ManagerEvent, TickReport};
use crate::store::{ConnectionStatus, StateStore};

const EVENT_CHANNEL_SIZE: usize = 256;

// ── Builder ──────────────────────────────────────────────────────

/// Collects the construction inputs for a [`Manager`].
///
/// `build()` only validates and allocates; it never touches the network.
#[derive(Default)]
pub struct ManagerBuilder {
    discovery: Option<Arc<dyn Discovery>>,
    config: ManagerConfig,
    span: Option<Span>,
}

impl ManagerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed every tunable from a [`ManagerConfig`]. Discovery still has to
    /// be supplied separately.
    pub fn from_config(config: ManagerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn discovery(mut self, discovery: impl Discovery + 'static) -> Self {
        self.discovery = Some(Arc::new(discovery));
        self
    }

    pub fn shared_discovery(mut self, discovery: Arc<dyn Discovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn labels<I, L>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<Label>,
    {
        self.config.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn io_timeout(mut self, timeout: Duration) -> Self {
        self.config.io_timeout = timeout;
        self
    }

    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.config.max_concurrency = limit;
        self
    }

    pub fn discovery_backoff(mut self, backoff: DiscoveryBackoff) -> Self {
        self.config.discovery_backoff = Some(backoff);
        self
    }

    /// Span that all loop logging is recorded under.
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn build(self) -> Result<Manager, CoreError> {
        let Some(discovery) = self.discovery else {
            return Err(CoreError::configuration(
                "a discovery collaborator is required",
            ));
        };
        let config = self.config;

        if config.labels.is_empty() {
            return Err(CoreError::configuration("at least one label is required"));
        }
        if config.labels.iter().any(|l| l.as_str().trim().is_empty()) {
            return Err(CoreError::configuration("labels must not be blank"));
        }
        if config.poll_interval.is_zero() {
            return Err(CoreError::configuration("poll interval must be non-zero"));
        }
        if config.io_timeout.is_zero() {
            return Err(CoreError::configuration("I/O timeout must be non-zero"));
        }
        if config.max_concurrency == 0 {
            return Err(CoreError::configuration("max concurrency must be at least 1"));
        }
        if let Some(backoff) = config.discovery_backoff {
            if backoff.initial_delay.is_zero() || backoff.max_delay < backoff.initial_delay {
                return Err(CoreError::configuration(
                    "discovery backoff needs 0 < initial_delay <= max_delay",
                ));
            }
        }

        // Duplicates collapse: the managed set is a set.
        let labels: Vec<Label> = config
            .labels
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let (last_tick, _) = watch::channel(None);
        let (last_discovery_error, _) = watch::channel(None);

        Ok(Manager {
            inner: Arc::new(ManagerInner {
                discovery,
                state: Mutex::new(StateStore::new(&labels)),
                labels,
                poll_interval: config.poll_interval,
                io_timeout: config.io_timeout,
                max_concurrency: config.max_concurrency,
                discovery_backoff: config.discovery_backoff,
                span: self
                    .span
                    .unwrap_or_else(|| tracing::info_span!("plugkeeper")),
                tick_gate: Mutex::new(DiscoveryGate::default()),
                event_tx,
                last_tick,
                last_discovery_error,
            }),
        })
    }
}

// ── Manager ──────────────────────────────────────────────────────

/// Keeps a fixed set of labelled power switches at their desired state.
///
/// Cheaply cloneable; clones share state. Nothing happens until
/// [`run()`](Self::run) is awaited (or [`tick()`](Self::tick) is called).
#[derive(Clone)]
pub struct Manager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    discovery: Arc<dyn Discovery>,
    /// Sorted, deduplicated managed set.
    labels: Vec<Label>,
    poll_interval: Duration,
    io_timeout: Duration,
    max_concurrency: usize,
    discovery_backoff: Option<DiscoveryBackoff>,
    span: Span,
    /// The one lock over connections, desired and observed state.
    state: Mutex<StateStore>,
    /// Held for the whole of a tick so ticks never overlap.
    tick_gate: Mutex<DiscoveryGate>,
    event_tx: broadcast::Sender<ManagerEvent>,
    last_tick: watch::Sender<Option<DateTime<Utc>>>,
    last_discovery_error: watch::Sender<Option<DiscoveryFailure>>,
}

/// Loop-private discovery retry bookkeeping.
#[derive(Default)]
struct DiscoveryGate {
    consecutive_failures: u32,
    retry_at: Option<Instant>,
}

enum DeviceOutcome {
    InSync,
    Corrected(Label),
    Disconnected(Label),
}

impl Manager {
    pub fn builder() -> ManagerBuilder {
        ManagerBuilder::new()
    }

    // ── Caller surface ───────────────────────────────────────────

    /// The managed label set, sorted.
    pub fn labels(&self) -> &[Label] {
        &self.inner.labels
    }

    pub fn poll_interval(&self) -> Duration {
        self.inner.poll_interval
    }

    /// Set the desired state of one label. Takes effect on the next
    /// enforcement pass that reaches it.
    pub async fn set_desired_state(&self, label: &str, on: bool) -> Result<(), CoreError> {
        self.inner.state.lock().await.set_desired(label, on)?;
        debug!(parent: &self.inner.span, label, on, "desired state updated");
        Ok(())
    }

    /// Set several desired states at once. If any label is unmanaged,
    /// nothing is changed.
    pub async fn set_desired_states<I, S>(&self, states: I) -> Result<(), CoreError>
    where
        I: IntoIterator<Item = (S, bool)>,
        S: Into<String>,
    {
        let states: Vec<(String, bool)> = states.into_iter().map(|(l, on)| (l.into(), on)).collect();
        let count = states.len();
        self.inner.state.lock().await.set_desired_many(states)?;
        debug!(parent: &self.inner.span, count, "desired states updated");
        Ok(())
    }

    /// Stop enforcing a label. Returns the desired value that was cleared.
    pub async fn clear_desired_state(&self, label: &str) -> Result<Option<bool>, CoreError> {
        self.inner.state.lock().await.clear_desired(label)
    }

    pub async fn desired_state(&self, label: &str) -> Option<bool> {
        self.inner.state.lock().await.desired(label)
    }

    /// Last polled on/off state, `None` if the label was never polled.
    /// May be stale while the device is disconnected.
    pub async fn observed_state(&self, label: &str) -> Option<bool> {
        self.inner.state.lock().await.observed(label)
    }

    pub async fn connection_status(&self, label: &str) -> Option<ConnectionStatus> {
        self.inner.state.lock().await.connections.status(label)
    }

    pub async fn connected_labels(&self) -> Vec<Label> {
        self.inner
            .state
            .lock()
            .await
            .connections
            .labels_with(ConnectionStatus::Connected)
    }

    pub async fn disconnected_labels(&self) -> Vec<Label> {
        self.inner
            .state
            .lock()
            .await
            .connections
            .labels_with(ConnectionStatus::Disconnected)
    }

    /// Both partitions, read under one lock acquisition.
    pub async fn connection_snapshot(&self) -> ConnectionSnapshot {
        let state = self.inner.state.lock().await;
        ConnectionSnapshot {
            connected: state.connections.labels_with(ConnectionStatus::Connected),
            disconnected: state.connections.labels_with(ConnectionStatus::Disconnected),
        }
    }

    /// Subscribe to loop telemetry.
    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.inner.event_tx.subscribe()
    }

    /// The most recent discovery failure, if the last attempt failed.
    pub fn last_discovery_error(&self) -> Option<DiscoveryFailure> {
        self.inner.last_discovery_error.borrow().clone()
    }

    pub fn watch_discovery_error(&self) -> watch::Receiver<Option<DiscoveryFailure>> {
        self.inner.last_discovery_error.subscribe()
    }

    /// Completion time of the most recent tick.
    pub fn last_tick(&self) -> watch::Receiver<Option<DateTime<Utc>>> {
        self.inner.last_tick.subscribe()
    }

    // ── Loop ─────────────────────────────────────────────────────

    /// Reconcile every `poll_interval` until `cancel` fires.
    ///
    /// Cancellation is only observed between ticks; a tick in progress
    /// always runs to completion first.
    pub async fn run(&self, cancel: CancellationToken) {
        let span = self.inner.span.clone();
        async {
            info!(
                labels = self.inner.labels.len(),
                interval_ms = u64::try_from(self.inner.poll_interval.as_millis()).unwrap_or(u64::MAX),
                "reconciliation loop started"
            );

            let mut interval = tokio::time::interval(self.inner.poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await; // consume the immediate first tick

            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let report = self.reconcile_once().await;
                        trace!(?report, "tick complete");
                    }
                }
            }

            info!("reconciliation loop stopped");
        }
        .instrument(span)
        .await;
    }

    /// Run a single reconnect + poll/enforce pass right now.
    pub async fn tick(&self) -> TickReport {
        self.reconcile_once()
            .instrument(self.inner.span.clone())
            .await
    }

    async fn reconcile_once(&self) -> TickReport {
        let mut gate = self.inner.tick_gate.lock().await;
        let mut report = TickReport::default();

        self.attempt_reconnect(&mut gate, &mut report).await;
        debug!("validating health and state of connected devices");
        self.update_state(&mut report).await;

        self.inner.last_tick.send_replace(Some(Utc::now()));
        report
    }

    // ── Reconnect ────────────────────────────────────────────────

    async fn attempt_reconnect(&self, gate: &mut DiscoveryGate, report: &mut TickReport) {
        if !self.inner.state.lock().await.connections.has_disconnected() {
            return;
        }
        if let Some(retry_at) = gate.retry_at {
            if Instant::now() < retry_at {
                debug!(
                    consecutive_failures = gate.consecutive_failures,
                    "discovery backing off, skipping reconnect"
                );
                return;
            }
        }

        debug!("attempting to reconnect disconnected devices");
        report.discovery_attempted = true;

        let discovered = match self.bounded(self.inner.discovery.discover()).await {
            Ok(handles) => {
                *gate = DiscoveryGate::default();
                self.inner.last_discovery_error.send_replace(None);
                handles
            }
            Err(source) => {
                self.discovery_failed(gate, source);
                return;
            }
        };
        trace!(count = discovered.len(), "discovery returned devices");

        for handle in discovered {
            let name = match self.bounded(handle.label()).await {
                Ok(name) => name,
                Err(source) => {
                    let address = handle.address();
                    let err = CoreError::LabelRead {
                        address: address.clone().unwrap_or_else(|| "<unknown>".into()),
                        source,
                    };
                    warn!(error = %err, "skipping discovered device");
                    self.emit(ManagerEvent::LabelReadFailed {
                        address,
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            let address = handle.address();
            let promoted = self
                .inner
                .state
                .lock()
                .await
                .connections
                .promote(&name, handle);
            if promoted {
                let label = Label::from(name);
                info!(label = %label, address = address.as_deref().unwrap_or("<unknown>"), "device reconnected");
                self.emit(ManagerEvent::Reconnected {
                    label: label.clone(),
                    address,
                });
                report.reconnected.push(label);
            } else {
                trace!(label = %name, "ignoring discovered device that is not awaiting reconnect");
            }
        }
        report.reconnected.sort();
    }

    fn discovery_failed(&self, gate: &mut DiscoveryGate, source: DeviceError) {
        gate.consecutive_failures = gate.consecutive_failures.saturating_add(1);
        gate.retry_at = self.inner.discovery_backoff.map(|backoff| {
            Instant::now() + backoff.delay_for(gate.consecutive_failures.saturating_sub(1))
        });

        let err = CoreError::Discovery { source };
        warn!(
            error = %err,
            consecutive_failures = gate.consecutive_failures,
            "reconnect abandoned for this tick"
        );

        let message = err.to_string();
        self.inner
            .last_discovery_error
            .send_replace(Some(DiscoveryFailure {
                message: message.clone(),
                at: Utc::now(),
                consecutive_failures: gate.consecutive_failures,
            }));
        self.emit(ManagerEvent::DiscoveryFailed {
            reason: message,
            consecutive_failures: gate.consecutive_failures,
        });
    }

    // ── Poll + enforce ───────────────────────────────────────────

    async fn update_state(&self, report: &mut TickReport) {
        let connected = self.inner.state.lock().await.connections.connected();
        report.polled = connected.len();

        // Collected before streaming so the `run()` future stays `Send`.
        let pending: Vec<_> = connected
            .into_iter()
            .map(|(label, handle)| self.reconcile_device(label, handle))
            .collect();
        let outcomes: Vec<DeviceOutcome> = futures_util::stream::iter(pending)
            .buffer_unordered(self.inner.max_concurrency)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                DeviceOutcome::InSync => {}
                DeviceOutcome::Corrected(label) => report.corrected.push(label),
                DeviceOutcome::Disconnected(label) => report.disconnected.push(label),
            }
        }
        report.corrected.sort();
        report.disconnected.sort();
    }

    /// Read, record, and if needed correct one device. The read always
    /// precedes the write for a given device.
    async fn reconcile_device(&self, label: Label, handle: Arc<dyn DeviceHandle>) -> DeviceOutcome {
        let is_on = match self.bounded(handle.is_on()).await {
            Ok(is_on) => is_on,
            Err(source) => {
                return self
                    .disconnect(label, DeviceOperation::IsOn, source, handle.address())
                    .await;
            }
        };

        let enforce = self.inner.state.lock().await.observe(&label, is_on);
        let Some(desired) = enforce else {
            trace!(label = %label, on = is_on, "device in desired state");
            return DeviceOutcome::InSync;
        };

        debug!(label = %label, observed = is_on, desired, "enforcing desired state");
        if let Err(source) = self.bounded(handle.set_on(desired)).await {
            return self
                .disconnect(label, DeviceOperation::SetOn, source, handle.address())
                .await;
        }

        self.inner
            .state
            .lock()
            .await
            .record_observed(&label, desired);
        info!(label = %label, on = desired, "device switched to desired state");
        self.emit(ManagerEvent::Corrected {
            label: label.clone(),
            on: desired,
        });
        DeviceOutcome::Corrected(label)
    }

    async fn disconnect(
        &self,
        label: Label,
        operation: DeviceOperation,
        source: DeviceError,
        address: Option<String>,
    ) -> DeviceOutcome {
        self.inner.state.lock().await.connections.demote(label.as_str());

        let err = CoreError::DeviceIo {
            label: label.clone(),
            operation,
            source,
        };
        warn!(
            error = %err,
            address = address.as_deref().unwrap_or("<unknown>"),
            "device unreachable, queued for rediscovery"
        );
        self.emit(ManagerEvent::Disconnected {
            label: label.clone(),
            operation,
            reason: err.to_string(),
        });
        DeviceOutcome::Disconnected(label)
    }

    // ── Helpers ──────────────────────────────────────────────────

    /// Bound a collaborator call by the per-call timeout.
    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, DeviceError>>,
    ) -> Result<T, DeviceError> {
        let timeout = self.inner.io_timeout;
        tokio::time::timeout(timeout, call)
            .await
            .unwrap_or(Err(DeviceError::Timeout(timeout)))
    }

    fn emit(&self, event: ManagerEvent) {
        // No subscribers is fine.
        let _ = self.inner.event_tx.send(event);
    }
}
