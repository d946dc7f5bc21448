use bytes::Bytes;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, future::Future, sync::Arc, time::Duration};
use tracing::{debug, error, info, warn};

use crate::{
    error::{BedError, Result},
    movement::Movement,
    registry::SessionRegistry,
    session::DeviceSession,
    types::Percentage,
};

/// Three-valued reduction of per-device results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Every device succeeded
    Success,
    /// Some devices succeeded, some failed
    PartialError,
    /// No device succeeded, or a precondition failed before dispatch
    Error,
}

impl OutcomeStatus {
    /// Wire label
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::PartialError => "partial_error",
            Self::Error => "error",
        }
    }

    /// Reduce per-device success flags
    #[must_use]
    pub fn reduce<I: IntoIterator<Item = bool>>(results: I) -> Self {
        let (mut ok, mut failed) = (0usize, 0usize);
        for result in results {
            if result {
                ok += 1;
            } else {
                failed += 1;
            }
        }
        match (ok, failed) {
            (_, 0) => Self::Success,
            (0, _) => Self::Error,
            _ => Self::PartialError,
        }
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of one dispatch invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    /// Not started
    Pending,
    /// Reading current values from every device
    Reading,
    /// A read failed; no write was issued
    Aborted,
    /// Writing to every device
    Writing,
    /// Every device succeeded
    Success,
    /// Some devices failed
    Partial,
    /// Every device failed
    Failed,
}

impl DispatchState {
    /// Whether moving to `next` is a legal transition
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Reading | Self::Writing)
                | (Self::Reading, Self::Aborted | Self::Writing)
                | (Self::Writing, Self::Success | Self::Partial | Self::Failed)
        )
    }

    /// Whether no further transition is possible
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Aborted | Self::Success | Self::Partial | Self::Failed
        )
    }

    /// Aggregate label for a terminal state
    #[must_use]
    pub const fn status(self) -> OutcomeStatus {
        match self {
            Self::Success => OutcomeStatus::Success,
            Self::Partial => OutcomeStatus::PartialError,
            _ => OutcomeStatus::Error,
        }
    }

    const fn from_status(status: OutcomeStatus) -> Self {
        match status {
            OutcomeStatus::Success => Self::Success,
            OutcomeStatus::PartialError => Self::Partial,
            OutcomeStatus::Error => Self::Failed,
        }
    }
}

struct Progress {
    label: String,
    state: DispatchState,
}

impl Progress {
    fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: DispatchState::Pending,
        }
    }

    fn advance(&mut self, next: DispatchState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal dispatch transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!("{}: {:?} -> {:?}", self.label, self.state, next);
        self.state = next;
    }
}

/// Result of one dispatch: per-device values plus the aggregate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome<T> {
    /// Final state of the dispatch
    pub state: DispatchState,
    /// Per-device result, keyed by device name
    pub results: BTreeMap<String, T>,
    /// Devices that failed
    pub failed: Vec<String>,
}

impl<T> CommandOutcome<T> {
    /// Aggregate label
    #[must_use]
    pub const fn status(&self) -> OutcomeStatus {
        self.state.status()
    }

    /// Whether every device succeeded
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.status(), OutcomeStatus::Success)
    }

    /// Whether the write phase was never entered
    #[must_use]
    pub const fn is_aborted(&self) -> bool {
        matches!(self.state, DispatchState::Aborted)
    }
}

impl CommandOutcome<bool> {
    /// Combine two sequential dispatches over the same devices
    ///
    /// A device succeeds only if it succeeded in both.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        let entries: Vec<(String, bool)> = self
            .results
            .into_iter()
            .map(|(name, ok)| {
                let also = other.results.get(&name).copied().unwrap_or(false);
                (name, ok && also)
            })
            .collect();
        settle(entries, DispatchState::Writing)
    }
}

impl<T> fmt::Display for CommandOutcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failed.is_empty() {
            write!(f, "{}", self.status())
        } else {
            write!(f, "{} (failed: {})", self.status(), self.failed.join(", "))
        }
    }
}

fn settle(entries: Vec<(String, bool)>, from: DispatchState) -> CommandOutcome<bool> {
    let status = OutcomeStatus::reduce(entries.iter().map(|(_, ok)| *ok));
    let state = DispatchState::from_status(status);
    debug_assert!(from.can_transition_to(state));

    let failed = entries
        .iter()
        .filter(|(_, ok)| !ok)
        .map(|(name, _)| name.clone())
        .collect();

    CommandOutcome {
        state,
        results: entries.into_iter().collect(),
        failed,
    }
}

/// A write with no position dependency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteCommand {
    /// Characteristic name
    pub characteristic: String,
    /// Sub-index for compound characteristics
    pub sub_index: Option<usize>,
    /// Raw payload
    pub payload: Bytes,
}

impl WriteCommand {
    /// Write a percentage to a plain characteristic
    #[must_use]
    pub fn percentage(characteristic: impl Into<String>, value: Percentage) -> Self {
        Self {
            characteristic: characteristic.into(),
            sub_index: None,
            payload: value.to_payload(),
        }
    }
}

/// A position-dependent target, applied to every device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionTarget {
    /// Characteristic name
    pub characteristic: String,
    /// Sub-index for compound characteristics
    pub sub_index: Option<usize>,
    /// Commanded value
    pub target: Percentage,
}

impl PositionTarget {
    /// Target on a plain characteristic
    #[must_use]
    pub fn new(characteristic: impl Into<String>, target: Percentage) -> Self {
        Self {
            characteristic: characteristic.into(),
            sub_index: None,
            target,
        }
    }

    /// Target on one member of a compound characteristic
    #[must_use]
    pub fn indexed(characteristic: impl Into<String>, sub_index: usize, target: Percentage) -> Self {
        Self {
            characteristic: characteristic.into(),
            sub_index: Some(sub_index),
            target,
        }
    }
}

/// Issues commands across every registered session
///
/// Each dispatch spawns one task per device, so the worker count equals the
/// device count. Tasks block on I/O, retry backoff and movement holds for
/// multi-second stretches; with the default policy a single device can take
/// over a minute before giving up. There is no caller-side cancellation.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
    max_travel: Duration,
}

impl Dispatcher {
    /// Create a dispatcher
    #[must_use]
    pub const fn new(registry: Arc<SessionRegistry>, max_travel: Duration) -> Self {
        Self {
            registry,
            max_travel,
        }
    }

    /// The registry commands are dispatched over
    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Apply one write to every device concurrently
    ///
    /// A failing or panicking device is recorded as `false` and never
    /// affects the others.
    pub async fn broadcast(&self, command: WriteCommand) -> CommandOutcome<bool> {
        let mut progress = Progress::new(format!("broadcast {}", command.characteristic));
        progress.advance(DispatchState::Writing);

        let results = self
            .fan_out(move |session| {
                let command = command.clone();
                async move {
                    session
                        .write(&command.characteristic, command.sub_index, command.payload)
                        .await
                }
            })
            .await;

        let entries = results
            .into_iter()
            .map(|(name, result)| {
                let ok = matches!(result, Some(Ok(())));
                if let Some(Err(e)) = result {
                    warn!("[{}] Broadcast write failed: {}", name, e);
                }
                (name, ok)
            })
            .collect();

        let outcome = settle(entries, progress.state);
        progress.advance(outcome.state);
        info!("{}: {}", progress.label, outcome);
        outcome
    }

    /// Read every device's current values, then write every target
    ///
    /// If any device fails any read the whole dispatch is aborted before a
    /// single write is issued. Otherwise each device moves from its own
    /// initial values; its targets are written in order. An empty target
    /// list is aborted without touching any device.
    pub async fn read_then_write(&self, targets: Vec<PositionTarget>) -> CommandOutcome<bool> {
        let label = targets
            .iter()
            .map(|t| format!("{}->{}", t.characteristic, t.target))
            .collect::<Vec<_>>()
            .join(", ");
        let mut progress = Progress::new(format!("read-then-write [{label}]"));
        progress.advance(DispatchState::Reading);

        if targets.is_empty() {
            progress.advance(DispatchState::Aborted);
            warn!("{}: nothing to write", progress.label);
            return CommandOutcome {
                state: DispatchState::Aborted,
                results: self.registry.names().map(|n| (n.to_string(), false)).collect(),
                failed: Vec::new(),
            };
        }
        let targets = Arc::new(targets);

        let reads = {
            let targets = Arc::clone(&targets);
            self.fan_out(move |session| {
                let targets = Arc::clone(&targets);
                async move {
                    let mut initial = Vec::with_capacity(targets.len());
                    for target in targets.iter() {
                        initial.push(
                            session
                                .read(&target.characteristic, target.sub_index)
                                .await?,
                        );
                    }
                    Ok::<_, BedError>(initial)
                }
            })
            .await
        };

        let mut initial_values = BTreeMap::new();
        let mut failed_reads = Vec::new();
        for (name, result) in reads {
            match result {
                Some(Ok(values)) => {
                    initial_values.insert(name, values);
                }
                Some(Err(e)) => {
                    warn!("[{}] Could not read initial position: {}", name, e);
                    failed_reads.push(name);
                }
                None => failed_reads.push(name),
            }
        }

        if !failed_reads.is_empty() {
            progress.advance(DispatchState::Aborted);
            let error = BedError::PreconditionFailed {
                devices: failed_reads.clone(),
            };
            error!("{}: {}", progress.label, error);
            return CommandOutcome {
                state: DispatchState::Aborted,
                results: self.registry.names().map(|n| (n.to_string(), false)).collect(),
                failed: failed_reads,
            };
        }

        progress.advance(DispatchState::Writing);
        let initial_values = Arc::new(initial_values);
        let max_travel = self.max_travel;
        let writes = self
            .fan_out(move |session| {
                let targets = Arc::clone(&targets);
                let initial_values = Arc::clone(&initial_values);
                async move {
                    let initial = initial_values
                        .get(session.name())
                        .cloned()
                        .unwrap_or_default();
                    let mut ok = true;
                    for (target, initial) in targets.iter().zip(initial) {
                        let movement = Movement {
                            characteristic: target.characteristic.as_str(),
                            sub_index: target.sub_index,
                            initial,
                            target: target.target,
                        };
                        if let Err(e) = movement.execute(&session, max_travel).await {
                            error!(
                                "[{}] Failed to set {} to {}: {}",
                                session.name(),
                                target.characteristic,
                                target.target,
                                e
                            );
                            ok = false;
                        }
                    }
                    ok
                }
            })
            .await;

        let entries = writes
            .into_iter()
            .map(|(name, ok)| (name, ok.unwrap_or(false)))
            .collect();

        let outcome = settle(entries, progress.state);
        progress.advance(outcome.state);
        info!("{}: {}", progress.label, outcome);
        outcome
    }

    /// Read one characteristic from every device concurrently
    pub async fn read_all(
        &self,
        characteristic: &str,
        sub_index: Option<usize>,
    ) -> CommandOutcome<Option<u64>> {
        let name = characteristic.to_string();
        let results = self
            .fan_out(move |session| {
                let name = name.clone();
                async move { session.read(&name, sub_index).await }
            })
            .await;

        let entries: Vec<(String, Option<u64>)> = results
            .into_iter()
            .map(|(device, result)| {
                let value = match result {
                    Some(Ok(value)) => Some(value),
                    Some(Err(e)) => {
                        warn!("[{}] Read of {} failed: {}", device, characteristic, e);
                        None
                    }
                    None => None,
                };
                (device, value)
            })
            .collect();

        let status = OutcomeStatus::reduce(entries.iter().map(|(_, v)| v.is_some()));
        CommandOutcome {
            state: DispatchState::from_status(status),
            failed: entries
                .iter()
                .filter(|(_, v)| v.is_none())
                .map(|(device, _)| device.clone())
                .collect(),
            results: entries.into_iter().collect(),
        }
    }

    /// Read one characteristic from one device
    ///
    /// # Errors
    ///
    /// Returns [`BedError::UnknownDevice`] for an unregistered name, or the
    /// session's read error.
    pub async fn read_one(
        &self,
        device: &str,
        characteristic: &str,
        sub_index: Option<usize>,
    ) -> Result<u64> {
        self.registry
            .get(device)?
            .read(characteristic, sub_index)
            .await
    }

    /// Read one characteristic from the primary device
    ///
    /// # Errors
    ///
    /// Returns [`BedError::NoDevices`] on an empty registry, or the session's
    /// read error.
    pub async fn read_primary(&self, characteristic: &str, sub_index: Option<usize>) -> Result<u64> {
        self.registry
            .primary()
            .ok_or(BedError::NoDevices)?
            .read(characteristic, sub_index)
            .await
    }

    /// Run `work` once per device on its own task and collect results in
    /// configuration order; `None` marks a task that panicked
    async fn fan_out<T, F, Fut>(&self, work: F) -> Vec<(String, Option<T>)>
    where
        F: Fn(Arc<DeviceSession>) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let sessions = self.registry.sessions();
        let handles = sessions
            .iter()
            .map(|session| tokio::spawn(work(Arc::clone(session))))
            .collect::<Vec<_>>();

        sessions
            .iter()
            .zip(join_all(handles).await)
            .map(|(session, joined)| {
                let value = joined
                    .map_err(|e| error!("[{}] Exception occurred: {}", session.name(), e))
                    .ok();
                (session.name().to_string(), value)
            })
            .collect()
    }
}
