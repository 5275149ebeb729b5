//! Scriptable mock channel for lifecycle tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use crate::channel::{
    ChannelAdapter, ChannelEvent, ChannelFuture, ChannelState, ChannelStateChange, RealtimeChannel,
};
use crate::contributor::{Contributor, Feature};
use crate::error::ErrorInfo;
use crate::subscription::{BufferingPolicy, Emitter, Subscription};

/// One scripted attach/detach call.
///
/// When the script is empty, attach succeeds leaving the channel `attached`
/// and detach succeeds leaving it `detached`.
pub struct ScriptedCall {
    outcome: Result<(), ErrorInfo>,
    leaves_state: ChannelState,
    gate: Option<oneshot::Receiver<()>>,
}

/// A mock realtime channel whose attach/detach outcomes and state-change
/// stream are driven by the test.
pub struct MockChannel {
    name: String,
    snapshot: Mutex<(ChannelState, Option<ErrorInfo>)>,
    changes: Emitter<ChannelStateChange>,
    attach_script: Mutex<VecDeque<ScriptedCall>>,
    detach_script: Mutex<VecDeque<ScriptedCall>>,
    attach_calls: AtomicUsize,
    detach_calls: AtomicUsize,
}

impl MockChannel {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            snapshot: Mutex::new((ChannelState::Initialized, None)),
            changes: Emitter::new(),
            attach_script: Mutex::new(VecDeque::new()),
            detach_script: Mutex::new(VecDeque::new()),
            attach_calls: AtomicUsize::new(0),
            detach_calls: AtomicUsize::new(0),
        })
    }

    pub fn attach_calls(&self) -> usize {
        self.attach_calls.load(Ordering::SeqCst)
    }

    pub fn detach_calls(&self) -> usize {
        self.detach_calls.load(Ordering::SeqCst)
    }

    /// Script the next attach call to fail, leaving the channel in
    /// `leaves_state` with `error` as its error reason.
    pub fn script_attach_failure(&self, leaves_state: ChannelState, error: ErrorInfo) {
        self.attach_script.lock().unwrap().push_back(ScriptedCall {
            outcome: Err(error),
            leaves_state,
            gate: None,
        });
    }

    /// Script the next detach call to fail, leaving the channel in
    /// `leaves_state` with `error` as its error reason.
    pub fn script_detach_failure(&self, leaves_state: ChannelState, error: ErrorInfo) {
        self.detach_script.lock().unwrap().push_back(ScriptedCall {
            outcome: Err(error),
            leaves_state,
            gate: None,
        });
    }

    /// Script the next attach call to succeed only once the returned sender
    /// fires, so the test can interleave work with an in-progress operation.
    pub fn gate_next_attach(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.attach_script.lock().unwrap().push_back(ScriptedCall {
            outcome: Ok(()),
            leaves_state: ChannelState::Attached,
            gate: Some(rx),
        });
        tx
    }

    /// Emit a state-change record, updating the snapshot first.
    pub fn emit(
        &self,
        event: ChannelEvent,
        current: ChannelState,
        resumed: bool,
        reason: Option<ErrorInfo>,
    ) {
        let previous = {
            let mut snapshot = self.snapshot.lock().unwrap();
            let previous = snapshot.0;
            snapshot.0 = current;
            if reason.is_some() {
                snapshot.1 = reason.clone();
            }
            previous
        };
        self.changes.emit(ChannelStateChange {
            current,
            previous,
            event,
            resumed,
            reason,
        });
    }

    fn run_script(
        script: &Mutex<VecDeque<ScriptedCall>>,
        default_state: ChannelState,
    ) -> ScriptedCall {
        script.lock().unwrap().pop_front().unwrap_or(ScriptedCall {
            outcome: Ok(()),
            leaves_state: default_state,
            gate: None,
        })
    }
}

impl RealtimeChannel for MockChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn attach(&self) -> ChannelFuture<'_> {
        Box::pin(async move {
            self.attach_calls.fetch_add(1, Ordering::SeqCst);
            let scripted = Self::run_script(&self.attach_script, ChannelState::Attached);
            if let Some(gate) = scripted.gate {
                let _ = gate.await;
            }
            let mut snapshot = self.snapshot.lock().unwrap();
            snapshot.0 = scripted.leaves_state;
            if let Err(error) = &scripted.outcome {
                snapshot.1 = Some(error.clone());
            }
            scripted.outcome
        })
    }

    fn detach(&self) -> ChannelFuture<'_> {
        Box::pin(async move {
            self.detach_calls.fetch_add(1, Ordering::SeqCst);
            let scripted = Self::run_script(&self.detach_script, ChannelState::Detached);
            if let Some(gate) = scripted.gate {
                let _ = gate.await;
            }
            let mut snapshot = self.snapshot.lock().unwrap();
            snapshot.0 = scripted.leaves_state;
            if let Err(error) = &scripted.outcome {
                snapshot.1 = Some(error.clone());
            }
            scripted.outcome
        })
    }

    fn state(&self) -> ChannelState {
        self.snapshot.lock().unwrap().0
    }

    fn error_reason(&self) -> Option<ErrorInfo> {
        self.snapshot.lock().unwrap().1.clone()
    }

    fn subscribe_state_changes(&self) -> Subscription<ChannelStateChange> {
        self.changes.subscribe(BufferingPolicy::Unbounded)
    }
}

/// Build a contributor backed by a mock channel.
pub fn contributor(feature: Feature, channel: &Arc<MockChannel>) -> Contributor {
    let channel: Arc<dyn RealtimeChannel> = Arc::clone(channel) as Arc<dyn RealtimeChannel>;
    Contributor::new(feature, ChannelAdapter::new(channel))
}

/// A transport error with an arbitrary wire code.
pub fn transport_error(code: u32, message: &str) -> ErrorInfo {
    ErrorInfo::new(code, 500, message)
}

/// Let spawned listener tasks drain their queued state changes.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}
