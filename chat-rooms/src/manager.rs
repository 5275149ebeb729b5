//! Room lifecycle coordination
//!
//! The [`RoomLifecycleManager`] folds the independent lifecycles of a fixed
//! set of feature contributors into a single room status. It runs five kinds
//! of operation — ATTACH, DETACH, RELEASE, and the scheduled RETRY and
//! RUNDOWN — with the rule that at most one operation is in progress at a
//! time; later operations register continuations and resume once the earlier
//! operation has published its final status transition.
//!
//! ## Isolation
//!
//! All internal state lives behind one mutex that is held only across
//! synchronous segments and released across every `await` point. Status
//! transitions, timeout bookkeeping and continuation registration happen
//! under the lock, so a waiter registered by a manager method is always
//! visible to a later `operation_did_complete`, and status-change events are
//! emitted in transition order.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::channel::{ChannelEvent, ChannelState, ChannelStateChange};
use crate::contributor::{Contributor, ContributorId, DiscontinuityEvent, Feature};
use crate::error::{ErrorInfo, RoomResult};
use crate::status::{RoomStatus, RoomStatusChange};
use crate::subscription::{BufferingPolicy, Emitter, Subscription};

/// Grace period for a contributor that transiently drops to `attaching`.
pub const TRANSIENT_DISCONNECT_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Spacing between detach attempts inside the detachment and release cycles.
pub const DETACH_RETRY_INTERVAL: Duration = Duration::from_millis(250);

/// Identifies one lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationId(Uuid);

impl OperationId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op_{}", self.0)
    }
}

/// Identifies one transient-disconnect timer.
///
/// Each timer gets a fresh id, so replacing a timer without cancelling it
/// first is observable rather than silent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeoutId(Uuid);

impl TimeoutId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for TimeoutId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TimeoutId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tdt_{}", self.0)
    }
}

/// Internal room status.
///
/// Finer than [`RoomStatus`]: it records which operation induced the status
/// and, for scheduled operations, the handle of the not-yet-started task.
#[derive(Debug)]
enum Status {
    Initialized,
    AttachingDueToAttachOperation {
        operation_id: OperationId,
    },
    AttachingDueToRetryOperation {
        operation_id: OperationId,
    },
    AttachingDueToContributorStateChange {
        attach_error: Option<ErrorInfo>,
    },
    Attached,
    Detaching {
        operation_id: OperationId,
    },
    Detached,
    DetachedDueToRetryOperation {
        operation_id: OperationId,
    },
    SuspendedAwaitingStartOfRetryOperation {
        retry_task: JoinHandle<()>,
        error: ErrorInfo,
    },
    Suspended {
        retry_operation_id: OperationId,
        error: ErrorInfo,
    },
    FailedAwaitingStartOfRundownOperation {
        rundown_task: JoinHandle<()>,
        error: ErrorInfo,
    },
    FailedAndPerformingRundownOperation {
        operation_id: OperationId,
        error: ErrorInfo,
    },
    Failed {
        error: ErrorInfo,
    },
    Releasing {
        operation_id: OperationId,
    },
    Released,
}

impl Status {
    /// The id of the operation this status belongs to, if any.
    ///
    /// `Some` here is what "an operation is in progress" means.
    fn operation_id(&self) -> Option<OperationId> {
        match self {
            Status::AttachingDueToAttachOperation { operation_id }
            | Status::AttachingDueToRetryOperation { operation_id }
            | Status::Detaching { operation_id }
            | Status::DetachedDueToRetryOperation { operation_id }
            | Status::Suspended {
                retry_operation_id: operation_id,
                ..
            }
            | Status::FailedAndPerformingRundownOperation { operation_id, .. }
            | Status::Releasing { operation_id } => Some(*operation_id),
            _ => None,
        }
    }

    /// The public status this internal status maps to.
    fn room_status(&self) -> RoomStatus {
        match self {
            Status::Initialized => RoomStatus::Initialized,
            Status::AttachingDueToAttachOperation { .. }
            | Status::AttachingDueToRetryOperation { .. } => RoomStatus::Attaching { error: None },
            Status::AttachingDueToContributorStateChange { attach_error } => RoomStatus::Attaching {
                error: attach_error.clone(),
            },
            Status::Attached => RoomStatus::Attached,
            Status::Detaching { .. } => RoomStatus::Detaching,
            Status::Detached | Status::DetachedDueToRetryOperation { .. } => RoomStatus::Detached,
            Status::SuspendedAwaitingStartOfRetryOperation { error, .. }
            | Status::Suspended { error, .. } => RoomStatus::Suspended {
                error: error.clone(),
            },
            Status::FailedAwaitingStartOfRundownOperation { error, .. }
            | Status::FailedAndPerformingRundownOperation { error, .. }
            | Status::Failed { error } => RoomStatus::Failed {
                error: error.clone(),
            },
            Status::Releasing { .. } => RoomStatus::Releasing,
            Status::Released => RoomStatus::Released,
        }
    }
}

/// A running 5-second grace timer for one contributor.
#[derive(Debug)]
struct TransientDisconnectTimeout {
    id: TimeoutId,
    task: Option<JoinHandle<()>>,
}

/// Manager-owned bookkeeping for one contributor.
#[derive(Debug, Default)]
struct ContributorAnnotation {
    /// Discontinuity to emit after the next successful attachment cycle.
    pending_discontinuity: Option<DiscontinuityEvent>,
    transient_disconnect_timeout: Option<TransientDisconnectTimeout>,
    /// Monotonic: set once the contributor first reaches `attached`.
    has_been_attached: bool,
}

struct ManagerState {
    status: Status,
    annotations: HashMap<ContributorId, ContributorAnnotation>,
    /// Waiters keyed by the operation whose result they want.
    continuations: HashMap<OperationId, Vec<oneshot::Sender<RoomResult<()>>>>,
    /// Set on drop; breaks the otherwise-unbounded detach retry loops.
    tearing_down: bool,
}

impl ManagerState {
    fn annotation_mut(&mut self, id: ContributorId) -> &mut ContributorAnnotation {
        self.annotations.entry(id).or_default()
    }
}

struct ManagerInner {
    contributors: Vec<Contributor>,
    state: Mutex<ManagerState>,
    status_changes: Emitter<RoomStatusChange>,
    /// Self-handle for the tasks this manager spawns. Weak, so a dropped
    /// manager is not kept alive by its own timers.
    weak_self: Weak<ManagerInner>,
}

/// Coordinates the lifecycle of a room's feature contributors.
pub struct RoomLifecycleManager {
    inner: Arc<ManagerInner>,
    listener_tasks: Vec<JoinHandle<()>>,
}

impl RoomLifecycleManager {
    /// Create a manager over a fixed set of contributors and start listening
    /// to their state changes.
    ///
    /// Must be called within a tokio runtime; the per-contributor listener
    /// tasks are spawned here and aborted when the manager is dropped.
    pub fn new(contributors: Vec<Contributor>) -> Self {
        let annotations = contributors
            .iter()
            .map(|contributor| (contributor.id(), ContributorAnnotation::default()))
            .collect();
        let inner = Arc::new_cyclic(|weak| ManagerInner {
            contributors,
            state: Mutex::new(ManagerState {
                status: Status::Initialized,
                annotations,
                continuations: HashMap::new(),
                tearing_down: false,
            }),
            status_changes: Emitter::new(),
            weak_self: weak.clone(),
        });

        let listener_tasks = inner
            .contributors
            .iter()
            .enumerate()
            .map(|(index, contributor)| {
                let inner = Arc::clone(&inner);
                let mut changes = contributor.channel().subscribe_state_changes();
                tokio::spawn(async move {
                    // One task per contributor: state changes for a single
                    // contributor are handled strictly one at a time.
                    while let Some(change) = changes.next().await {
                        inner.handle_contributor_state_change(index, change).await;
                    }
                })
            })
            .collect();

        Self {
            inner,
            listener_tasks,
        }
    }

    /// Current public room status.
    pub fn room_status(&self) -> RoomStatus {
        self.inner.state().status.room_status()
    }

    /// Subscribe to room status changes.
    pub fn on_room_status_change(&self, policy: BufferingPolicy) -> Subscription<RoomStatusChange> {
        self.inner.status_changes.subscribe(policy)
    }

    /// The contributors participating in this room's lifecycle.
    pub fn contributors(&self) -> &[Contributor] {
        &self.inner.contributors
    }

    /// Attach the room.
    ///
    /// Idempotent when already attached. Fails with `roomIsReleasing` or
    /// `roomIsReleased` in those statuses; otherwise awaits any in-progress
    /// operation and runs the attachment cycle.
    pub async fn attach(&self) -> RoomResult<()> {
        self.inner.attach().await
    }

    /// Detach the room.
    ///
    /// Idempotent when already detached. Fails with `roomIsReleasing`,
    /// `roomIsReleased` or `roomInFailedState`; otherwise awaits any
    /// in-progress operation, cancels transient-disconnect timers and runs
    /// the detachment cycle.
    pub async fn detach(&self) -> RoomResult<()> {
        self.inner.detach().await
    }

    /// Release the room. Never fails.
    ///
    /// Immediate from `initialized` or any detached status; otherwise awaits
    /// any in-progress operation and drains every non-failed contributor
    /// before transitioning to `released`.
    pub async fn release(&self) {
        self.inner.release().await;
    }

    /// Wait until presence operations are valid.
    ///
    /// Returns immediately when the room is attached. When the room is
    /// attaching, waits for exactly one status change and succeeds only if
    /// it was to `attached`. Any other status fails immediately.
    pub async fn wait_to_be_able_to_perform_presence_operations(
        &self,
        requester: Feature,
    ) -> RoomResult<()> {
        self.inner
            .wait_to_be_able_to_perform_presence_operations(requester)
            .await
    }

    /// The id of the running transient-disconnect timer for a contributor,
    /// if any.
    ///
    /// Timer ids are never reused, so a caller can detect a timer being
    /// silently replaced rather than cancelled.
    pub fn transient_disconnect_timeout_id(
        &self,
        contributor_id: ContributorId,
    ) -> Option<TimeoutId> {
        self.inner
            .state()
            .annotation_mut(contributor_id)
            .transient_disconnect_timeout
            .as_ref()
            .map(|timeout| timeout.id)
    }

    /// Whether a discontinuity is pending for a contributor, waiting for the
    /// next successful attachment cycle.
    pub fn has_pending_discontinuity(&self, contributor_id: ContributorId) -> bool {
        self.inner
            .state()
            .annotation_mut(contributor_id)
            .pending_discontinuity
            .is_some()
    }
}

impl Drop for RoomLifecycleManager {
    fn drop(&mut self) {
        for task in self.listener_tasks.drain(..) {
            task.abort();
        }
        let mut state = self.inner.state();
        state.tearing_down = true;
        for annotation in state.annotations.values_mut() {
            if let Some(timeout) = annotation.transient_disconnect_timeout.take() {
                if let Some(task) = timeout.task {
                    task.abort();
                }
            }
        }
        // A scheduled operation that has not yet started dies with the
        // manager; one that is already running observes `tearing_down`.
        match &state.status {
            Status::SuspendedAwaitingStartOfRetryOperation { retry_task, .. } => retry_task.abort(),
            Status::FailedAwaitingStartOfRundownOperation { rundown_task, .. } => {
                rundown_task.abort();
            }
            _ => {}
        }
    }
}

impl fmt::Debug for RoomLifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomLifecycleManager")
            .field("status", &self.room_status())
            .field("contributors", &self.inner.contributors.len())
            .finish()
    }
}

/// Which operation is driving an attachment cycle.
#[derive(Debug, Clone, Copy)]
enum AttachCycleTrigger {
    AttachOperation(OperationId),
    RetryOperation(OperationId),
}

/// Which operation is driving a detachment cycle.
#[derive(Debug, Clone, Copy)]
enum DetachCycleTrigger {
    DetachOperation(OperationId),
    /// The triggering contributor is skipped: it is expected to recover on
    /// its own and is awaited separately by the retry operation.
    RetryOperation {
        operation_id: OperationId,
        triggered_by: ContributorId,
    },
}

enum ReleaseStep {
    AlreadyReleased,
    ReleasedImmediately,
    JoinInFlightRelease(oneshot::Receiver<RoomResult<()>>),
    Run(Option<oneshot::Receiver<RoomResult<()>>>),
}

impl ManagerInner {
    fn state(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the internal status, emitting a public status change iff the
    /// public case changed. Must be called with the state lock held so that
    /// events are emitted in transition order.
    fn transition_to(&self, state: &mut ManagerState, new_status: Status) {
        let previous = state.status.room_status();
        state.status = new_status;
        let current = state.status.room_status();
        if !current.same_case(&previous) {
            tracing::debug!(from = previous.as_str(), to = current.as_str(), "room status changed");
            self.status_changes.emit(RoomStatusChange { current, previous });
        }
    }

    /// Register a continuation on `waited`. The enqueue happens under the
    /// state lock, so it is ordered before any later completion.
    fn register_waiter(
        &self,
        state: &mut ManagerState,
        waited: OperationId,
        waiting: OperationId,
    ) -> oneshot::Receiver<RoomResult<()>> {
        tracing::debug!(%waiting, %waited, "waiting for in-progress operation");
        let (tx, rx) = oneshot::channel();
        state.continuations.entry(waited).or_default().push(tx);
        rx
    }

    /// Resume every waiter registered on `operation_id`, in FIFO order.
    fn operation_did_complete(&self, operation_id: OperationId, result: RoomResult<()>) {
        let waiters = self
            .state()
            .continuations
            .remove(&operation_id)
            .unwrap_or_default();
        if !waiters.is_empty() {
            tracing::debug!(%operation_id, waiters = waiters.len(), "resuming operation waiters");
        }
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }

    fn clear_transient_disconnect_timeout(&self, state: &mut ManagerState, id: ContributorId) {
        if let Some(timeout) = state.annotation_mut(id).transient_disconnect_timeout.take() {
            tracing::debug!(timeout_id = %timeout.id, "cancelling transient disconnect timeout");
            if let Some(task) = timeout.task {
                task.abort();
            }
        }
    }

    fn clear_all_transient_disconnect_timeouts(&self, state: &mut ManagerState) {
        for annotation in state.annotations.values_mut() {
            if let Some(timeout) = annotation.transient_disconnect_timeout.take() {
                if let Some(task) = timeout.task {
                    task.abort();
                }
            }
        }
    }

    // ATTACH

    async fn attach(&self) -> RoomResult<()> {
        let operation_id = OperationId::new();
        let waiter = {
            let mut state = self.state();
            match &state.status {
                Status::Attached => return Ok(()),
                Status::Releasing { .. } => return Err(ErrorInfo::room_is_releasing()),
                Status::Released => return Err(ErrorInfo::room_is_released()),
                _ => {}
            }
            state
                .status
                .operation_id()
                .map(|waited| self.register_waiter(&mut state, waited, operation_id))
        };
        if let Some(waiter) = waiter {
            // The waited operation's own outcome does not gate the attach;
            // the attachment cycle re-evaluates every contributor.
            let _ = waiter.await;
        }

        let result = self
            .attachment_cycle(AttachCycleTrigger::AttachOperation(operation_id))
            .await;
        self.operation_did_complete(operation_id, result.clone());
        result
    }

    /// Attach every contributor in order, branching to a scheduled RETRY or
    /// RUNDOWN when one fails, and flushing pending discontinuities once all
    /// are attached.
    async fn attachment_cycle(&self, trigger: AttachCycleTrigger) -> RoomResult<()> {
        {
            let mut state = self.state();
            let status = match trigger {
                AttachCycleTrigger::AttachOperation(operation_id) => {
                    Status::AttachingDueToAttachOperation { operation_id }
                }
                AttachCycleTrigger::RetryOperation(operation_id) => {
                    Status::AttachingDueToRetryOperation { operation_id }
                }
            };
            self.transition_to(&mut state, status);
        }

        for contributor in &self.contributors {
            let Err(cause) = contributor.channel().attach().await else {
                continue;
            };
            let error = ErrorInfo::attachment_failed(contributor.feature(), cause);
            let channel_state = contributor.channel().state();
            let mut state = self.state();
            match channel_state {
                ChannelState::Suspended => {
                    let retry_task = self.schedule_retry(contributor.id(), error.clone());
                    self.transition_to(
                        &mut state,
                        Status::SuspendedAwaitingStartOfRetryOperation {
                            retry_task,
                            error: error.clone(),
                        },
                    );
                }
                ChannelState::Failed => {
                    let rundown_task = self.schedule_rundown(error.clone());
                    self.transition_to(
                        &mut state,
                        Status::FailedAwaitingStartOfRundownOperation {
                            rundown_task,
                            error: error.clone(),
                        },
                    );
                }
                other => {
                    // The transport contract says a failed attach leaves the
                    // channel suspended or failed. Recover instead of
                    // aborting: record the failure and surface it.
                    tracing::error!(
                        feature = %contributor.feature(),
                        state = ?other,
                        "contributor in unexpected state after failed attach"
                    );
                    self.transition_to(
                        &mut state,
                        Status::Failed {
                            error: error.clone(),
                        },
                    );
                }
            }
            return Err(error);
        }

        let pending = {
            let mut state = self.state();
            self.clear_all_transient_disconnect_timeouts(&mut state);
            self.transition_to(&mut state, Status::Attached);
            self.contributors
                .iter()
                .enumerate()
                .filter_map(|(index, contributor)| {
                    state
                        .annotation_mut(contributor.id())
                        .pending_discontinuity
                        .take()
                        .map(|event| (index, event))
                })
                .collect::<Vec<_>>()
        };
        for (index, event) in pending {
            self.contributors[index].emit_discontinuity(event);
        }
        Ok(())
    }

    // DETACH

    async fn detach(&self) -> RoomResult<()> {
        let operation_id = OperationId::new();
        let waiter = {
            let mut state = self.state();
            match &state.status {
                Status::Detached | Status::DetachedDueToRetryOperation { .. } => return Ok(()),
                Status::Releasing { .. } => return Err(ErrorInfo::room_is_releasing()),
                Status::Released => return Err(ErrorInfo::room_is_released()),
                Status::Failed { .. }
                | Status::FailedAwaitingStartOfRundownOperation { .. }
                | Status::FailedAndPerformingRundownOperation { .. } => {
                    return Err(ErrorInfo::room_in_failed_state());
                }
                _ => {}
            }
            state
                .status
                .operation_id()
                .map(|waited| self.register_waiter(&mut state, waited, operation_id))
        };
        if let Some(waiter) = waiter {
            let _ = waiter.await;
        }

        {
            let mut state = self.state();
            self.clear_all_transient_disconnect_timeouts(&mut state);
            self.transition_to(&mut state, Status::Detaching { operation_id });
        }
        let result = self
            .detachment_cycle(DetachCycleTrigger::DetachOperation(operation_id))
            .await;
        self.operation_did_complete(operation_id, result.clone());
        result
    }

    /// Detach contributors one at a time, retrying each at a fixed spacing
    /// until it succeeds or its channel turns out to be failed.
    ///
    /// A contributor in `failed` marks the room failed but does not stop the
    /// cycle; the remaining contributors are still drained. The operation
    /// then fails with the first such cause.
    async fn detachment_cycle(&self, trigger: DetachCycleTrigger) -> RoomResult<()> {
        let mut first_failure: Option<ErrorInfo> = None;

        for contributor in &self.contributors {
            if let DetachCycleTrigger::RetryOperation { triggered_by, .. } = &trigger {
                if contributor.id() == *triggered_by {
                    continue;
                }
            }
            loop {
                match contributor.channel().detach().await {
                    Ok(()) => break,
                    Err(cause) => {
                        if contributor.channel().state() == ChannelState::Failed {
                            let error = ErrorInfo::detachment_failed(contributor.feature(), cause);
                            let mut state = self.state();
                            if !matches!(state.status.room_status(), RoomStatus::Failed { .. }) {
                                self.transition_to(
                                    &mut state,
                                    Status::Failed {
                                        error: error.clone(),
                                    },
                                );
                            }
                            first_failure.get_or_insert(error);
                            break;
                        }
                        tracing::debug!(
                            feature = %contributor.feature(),
                            error = %cause,
                            "detach failed; retrying"
                        );
                        if self.state().tearing_down {
                            return Err(ErrorInfo::room_is_released());
                        }
                        tokio::time::sleep(DETACH_RETRY_INTERVAL).await;
                    }
                }
            }
        }

        if let Some(error) = first_failure {
            return Err(error);
        }
        let mut state = self.state();
        let detached = match trigger {
            DetachCycleTrigger::DetachOperation(_) => Status::Detached,
            DetachCycleTrigger::RetryOperation { operation_id, .. } => {
                Status::DetachedDueToRetryOperation { operation_id }
            }
        };
        self.transition_to(&mut state, detached);
        Ok(())
    }

    // RELEASE

    async fn release(&self) {
        let operation_id = OperationId::new();
        let step = {
            let mut state = self.state();
            let releasing_in_flight = match &state.status {
                Status::Releasing {
                    operation_id: in_flight,
                } => Some(*in_flight),
                _ => None,
            };
            if let Some(in_flight) = releasing_in_flight {
                ReleaseStep::JoinInFlightRelease(self.register_waiter(
                    &mut state,
                    in_flight,
                    operation_id,
                ))
            } else {
                match &state.status {
                    Status::Released => ReleaseStep::AlreadyReleased,
                    Status::Initialized
                    | Status::Detached
                    | Status::DetachedDueToRetryOperation { .. } => {
                        self.transition_to(&mut state, Status::Released);
                        ReleaseStep::ReleasedImmediately
                    }
                    _ => ReleaseStep::Run(
                        state
                            .status
                            .operation_id()
                            .map(|waited| self.register_waiter(&mut state, waited, operation_id)),
                    ),
                }
            }
        };

        let waiter = match step {
            ReleaseStep::AlreadyReleased | ReleaseStep::ReleasedImmediately => return,
            ReleaseStep::JoinInFlightRelease(waiter) => {
                let _ = waiter.await;
                return;
            }
            ReleaseStep::Run(waiter) => waiter,
        };
        if let Some(waiter) = waiter {
            let _ = waiter.await;
        }

        {
            let mut state = self.state();
            self.clear_all_transient_disconnect_timeouts(&mut state);
            self.transition_to(&mut state, Status::Releasing { operation_id });
        }
        self.release_cycle().await;
        {
            let mut state = self.state();
            self.transition_to(&mut state, Status::Released);
        }
        self.operation_did_complete(operation_id, Ok(()));
    }

    /// Drain every contributor that is not failed, retrying detach at the
    /// fixed spacing. Detach failures never fail a release.
    async fn release_cycle(&self) {
        for contributor in &self.contributors {
            loop {
                if contributor.channel().state() == ChannelState::Failed {
                    break;
                }
                match contributor.channel().detach().await {
                    Ok(()) => break,
                    Err(error) => {
                        tracing::debug!(
                            feature = %contributor.feature(),
                            %error,
                            "detach failed during release; retrying"
                        );
                        if self.state().tearing_down {
                            return;
                        }
                        tokio::time::sleep(DETACH_RETRY_INTERVAL).await;
                    }
                }
            }
        }
    }

    // RETRY

    /// Spawn the retry operation triggered by `triggered_by` entering
    /// `suspended`. The returned handle is stored in the
    /// `suspendedAwaitingStartOfRetry` status.
    fn schedule_retry(&self, triggered_by: ContributorId, error: ErrorInfo) -> JoinHandle<()> {
        let weak = self.weak_self.clone();
        tokio::spawn(async move {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let operation_id = OperationId::new();
            let result = inner.retry_operation(operation_id, triggered_by, error).await;
            inner.operation_did_complete(operation_id, result);
        })
    }

    async fn retry_operation(
        &self,
        operation_id: OperationId,
        triggered_by: ContributorId,
        error: ErrorInfo,
    ) -> RoomResult<()> {
        {
            let mut state = self.state();
            // A release that slipped in between scheduling and start wins;
            // the room must emit nothing further once released.
            if matches!(state.status, Status::Releasing { .. } | Status::Released) {
                return Err(ErrorInfo::room_is_released());
            }
            self.transition_to(
                &mut state,
                Status::Suspended {
                    retry_operation_id: operation_id,
                    error,
                },
            );
        }

        if let Err(detach_error) = self
            .detachment_cycle(DetachCycleTrigger::RetryOperation {
                operation_id,
                triggered_by,
            })
            .await
        {
            // The failure transition was already recorded by the cycle.
            return Err(detach_error);
        }

        let Some(contributor) = self
            .contributors
            .iter()
            .find(|contributor| contributor.id() == triggered_by)
        else {
            return Err(ErrorInfo::unknown_error(
                "retry-triggering contributor is not part of this room",
            ));
        };

        // Subscribe before reading the snapshot: a mismatched state /
        // error-reason pair is corrected by the next event instead of
        // being missed.
        let mut changes = contributor.channel().subscribe_state_changes();
        match contributor.channel().state() {
            ChannelState::Attached => {}
            ChannelState::Failed => {
                let failure = contributor.channel().error_reason().unwrap_or_else(|| {
                    tracing::warn!(
                        feature = %contributor.feature(),
                        "failed channel has no error reason"
                    );
                    ErrorInfo::unknown_error("channel failed without a reason")
                });
                let mut state = self.state();
                self.transition_to(
                    &mut state,
                    Status::Failed {
                        error: failure.clone(),
                    },
                );
                return Err(failure);
            }
            _ => loop {
                let Some(change) = changes.next().await else {
                    return Err(ErrorInfo::unknown_error(
                        "channel state stream ended while awaiting reattachment",
                    ));
                };
                match change.current {
                    ChannelState::Attached => break,
                    ChannelState::Failed => {
                        let failure = change.reason.unwrap_or_else(|| {
                            tracing::warn!(
                                feature = %contributor.feature(),
                                "failed state change has no reason"
                            );
                            ErrorInfo::unknown_error("channel failed without a reason")
                        });
                        let mut state = self.state();
                        self.transition_to(
                            &mut state,
                            Status::Failed {
                                error: failure.clone(),
                            },
                        );
                        return Err(failure);
                    }
                    _ => continue,
                }
            },
        }

        self.attachment_cycle(AttachCycleTrigger::RetryOperation(operation_id))
            .await
    }

    // RUNDOWN

    /// Spawn the rundown operation that tears down the non-failed
    /// contributors after an attach left one of them failed.
    fn schedule_rundown(&self, error: ErrorInfo) -> JoinHandle<()> {
        let weak = self.weak_self.clone();
        tokio::spawn(async move {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let operation_id = OperationId::new();
            let result = inner.rundown_operation(operation_id, error).await;
            inner.operation_did_complete(operation_id, result);
        })
    }

    async fn rundown_operation(
        &self,
        operation_id: OperationId,
        error: ErrorInfo,
    ) -> RoomResult<()> {
        {
            let mut state = self.state();
            if matches!(state.status, Status::Releasing { .. } | Status::Released) {
                return Err(ErrorInfo::room_is_released());
            }
            self.transition_to(
                &mut state,
                Status::FailedAndPerformingRundownOperation {
                    operation_id,
                    error: error.clone(),
                },
            );
        }

        for contributor in &self.contributors {
            loop {
                if contributor.channel().state() == ChannelState::Failed {
                    break;
                }
                match contributor.channel().detach().await {
                    Ok(()) => break,
                    Err(detach_error) => {
                        tracing::debug!(
                            feature = %contributor.feature(),
                            error = %detach_error,
                            "detach failed during rundown; retrying"
                        );
                        if self.state().tearing_down {
                            return Err(ErrorInfo::room_is_released());
                        }
                        tokio::time::sleep(DETACH_RETRY_INTERVAL).await;
                    }
                }
            }
        }

        let mut state = self.state();
        self.transition_to(&mut state, Status::Failed { error });
        Ok(())
    }

    // PRESENCE-READINESS GATE

    async fn wait_to_be_able_to_perform_presence_operations(
        &self,
        requester: Feature,
    ) -> RoomResult<()> {
        // Subscribing happens under the state lock so the next transition
        // cannot slip between the status check and the subscription.
        let subscription = {
            let state = self.state();
            match state.status.room_status() {
                RoomStatus::Attached => return Ok(()),
                RoomStatus::Attaching { .. } => {
                    Some(self.status_changes.subscribe(BufferingPolicy::Unbounded))
                }
                _ => None,
            }
        };
        let Some(mut subscription) = subscription else {
            return Err(ErrorInfo::presence_operation_requires_room_attach(requester));
        };

        match subscription.next().await {
            Some(RoomStatusChange {
                current: RoomStatus::Attached,
                ..
            }) => Ok(()),
            Some(RoomStatusChange { current, .. }) => Err(
                ErrorInfo::room_transitioned_to_invalid_state_for_presence_operation(
                    current.error().cloned(),
                ),
            ),
            None => Err(
                ErrorInfo::room_transitioned_to_invalid_state_for_presence_operation(None),
            ),
        }
    }

    // CONTRIBUTOR STATE CHANGES

    /// Spawn the 5-second grace timer for a contributor that transiently
    /// entered `attaching`. On expiry the timer clears itself and moves the
    /// room to `attaching` with the contributor's reason; a cancelled timer
    /// does nothing.
    fn spawn_transient_disconnect_timeout(
        &self,
        contributor_id: ContributorId,
        timeout_id: TimeoutId,
        reason: Option<ErrorInfo>,
    ) -> JoinHandle<()> {
        let weak = self.weak_self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(TRANSIENT_DISCONNECT_TIMEOUT).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let mut state = inner.state();
            let still_current = state
                .annotation_mut(contributor_id)
                .transient_disconnect_timeout
                .as_ref()
                .is_some_and(|timeout| timeout.id == timeout_id);
            if !still_current {
                return;
            }
            state.annotation_mut(contributor_id).transient_disconnect_timeout = None;
            tracing::debug!(%timeout_id, "transient disconnect timeout expired");
            inner.transition_to(
                &mut state,
                Status::AttachingDueToContributorStateChange {
                    attach_error: reason,
                },
            );
        })
    }

    async fn handle_contributor_state_change(
        &self,
        index: usize,
        change: ChannelStateChange,
    ) {
        enum FollowUp {
            None,
            EmitDiscontinuity(DiscontinuityEvent),
            DetachAll,
        }

        let contributor = &self.contributors[index];
        let follow_up = {
            let mut state = self.state();

            // A released room has nothing left to coordinate.
            if matches!(state.status, Status::Released) {
                return;
            }

            let had_already_attached = state.annotation_mut(contributor.id()).has_been_attached;
            if change.event == ChannelEvent::Attached {
                state.annotation_mut(contributor.id()).has_been_attached = true;
            }
            let operation_in_progress = state.status.operation_id().is_some();

            match change.event {
                ChannelEvent::Update => {
                    if change.resumed || !had_already_attached {
                        FollowUp::None
                    } else {
                        let event = DiscontinuityEvent {
                            error: change.reason.clone(),
                        };
                        if operation_in_progress {
                            let annotation = state.annotation_mut(contributor.id());
                            if annotation.pending_discontinuity.is_some() {
                                // First write wins.
                                tracing::debug!(
                                    feature = %contributor.feature(),
                                    "pending discontinuity already recorded; dropping newer cause"
                                );
                            } else {
                                annotation.pending_discontinuity = Some(event);
                            }
                            FollowUp::None
                        } else {
                            FollowUp::EmitDiscontinuity(event)
                        }
                    }
                }
                ChannelEvent::Attached => {
                    if operation_in_progress && !change.resumed && had_already_attached {
                        let annotation = state.annotation_mut(contributor.id());
                        if annotation.pending_discontinuity.is_some() {
                            tracing::debug!(
                                feature = %contributor.feature(),
                                "pending discontinuity already recorded; dropping newer cause"
                            );
                        } else {
                            annotation.pending_discontinuity = Some(DiscontinuityEvent {
                                error: change.reason.clone(),
                            });
                        }
                    } else {
                        // Runs whenever no discontinuity is recorded, even
                        // mid-operation: a timer left over from before the
                        // operation started must not outlive the
                        // reattachment it was guarding against.
                        self.clear_transient_disconnect_timeout(&mut state, contributor.id());
                        let all_attached = self
                            .contributors
                            .iter()
                            .all(|contributor| contributor.channel().state() == ChannelState::Attached);
                        if !matches!(state.status, Status::Attached) && all_attached {
                            self.transition_to(&mut state, Status::Attached);
                        }
                    }
                    FollowUp::None
                }
                ChannelEvent::Failed => {
                    if operation_in_progress {
                        FollowUp::None
                    } else {
                        self.clear_all_transient_disconnect_timeouts(&mut state);
                        let reason = change.reason.clone().unwrap_or_else(|| {
                            tracing::warn!(
                                feature = %contributor.feature(),
                                "failed state change has no reason"
                            );
                            ErrorInfo::unknown_error("channel failed without a reason")
                        });
                        self.transition_to(&mut state, Status::Failed { error: reason });
                        FollowUp::DetachAll
                    }
                }
                ChannelEvent::Suspended => {
                    if operation_in_progress {
                        FollowUp::None
                    } else {
                        self.clear_all_transient_disconnect_timeouts(&mut state);
                        let reason = change.reason.clone().unwrap_or_else(|| {
                            tracing::warn!(
                                feature = %contributor.feature(),
                                "suspended state change has no reason"
                            );
                            ErrorInfo::unknown_error("channel suspended without a reason")
                        });
                        let retry_task = self.schedule_retry(contributor.id(), reason.clone());
                        self.transition_to(
                            &mut state,
                            Status::SuspendedAwaitingStartOfRetryOperation {
                                retry_task,
                                error: reason,
                            },
                        );
                        FollowUp::None
                    }
                }
                ChannelEvent::Attaching => {
                    let has_timeout = state
                        .annotation_mut(contributor.id())
                        .transient_disconnect_timeout
                        .is_some();
                    if !operation_in_progress && !has_timeout {
                        let timeout_id = TimeoutId::new();
                        let task = self.spawn_transient_disconnect_timeout(
                            contributor.id(),
                            timeout_id,
                            change.reason.clone(),
                        );
                        state.annotation_mut(contributor.id()).transient_disconnect_timeout =
                            Some(TransientDisconnectTimeout {
                                id: timeout_id,
                                task: Some(task),
                            });
                    }
                    FollowUp::None
                }
                ChannelEvent::Detached => FollowUp::None,
            }
        };

        match follow_up {
            FollowUp::None => {}
            FollowUp::EmitDiscontinuity(event) => contributor.emit_discontinuity(event),
            FollowUp::DetachAll => {
                // Best effort: tear every channel down, log what refuses.
                let detaches = self.contributors.iter().map(|contributor| async move {
                    if let Err(error) = contributor.channel().detach().await {
                        tracing::warn!(
                            feature = %contributor.feature(),
                            %error,
                            "best-effort detach after channel failure"
                        );
                    }
                });
                futures::future::join_all(detaches).await;
            }
        }
    }
}
