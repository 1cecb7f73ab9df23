// Refresh coalescing engine
//
// Collapses bursts of webhook events into one library refresh per key. Each
// key owns a pending batch with a debounce timer (re-armed on every event) and
// an optional max-wait ceiling (armed once). Whichever fires first completes
// the batch and hands its command to a single dispatcher task that calls the
// flusher outside the lock.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use metrics::{counter, histogram};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace, warn};

mod pending_batch;
pub mod scope;

use pending_batch::{PendingBatch, TimerSlot};
pub use scope::{Credentials, LibraryScope, ScopeFilter, ScopeKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Quiet period after the last event. Zero flushes every event on arrival.
    pub debounce: Duration,
    /// Ceiling measured from the first event of a batch. `None` is unbounded.
    pub max_wait: Option<Duration>,
}

impl EngineConfig {
    pub fn new(debounce: Duration, max_wait: Option<Duration>) -> Self {
        Self {
            debounce,
            max_wait: max_wait.filter(|wait| !wait.is_zero()),
        }
    }

    /// Whole-second settings as they appear in configuration; `max_wait_secs`
    /// of 0 disables the ceiling.
    pub fn from_secs(debounce_secs: u64, max_wait_secs: u64) -> Self {
        Self::new(
            Duration::from_secs(debounce_secs),
            Some(Duration::from_secs(max_wait_secs)),
        )
    }

    pub fn is_immediate(&self) -> bool {
        self.debounce.is_zero()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_secs(10, 60)
    }
}

/// What completed a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    Immediate,
    Debounce,
    MaxWait,
}

impl FlushTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushTrigger::Immediate => "immediate",
            FlushTrigger::Debounce => "debounce",
            FlushTrigger::MaxWait => "max_wait",
        }
    }
}

/// A completed batch, ready for the downstream refresh.
#[derive(Debug, Clone)]
pub struct FlushCommand {
    pub key: ScopeKey,
    pub batch_id: u64,
    pub scope: LibraryScope,
    pub event_count: usize,
    pub first_seen: Instant,
    pub last_seen: Instant,
    pub trigger: FlushTrigger,
}

impl FlushCommand {
    pub fn credentials(&self) -> &Credentials {
        self.key.credentials()
    }

    /// Time between the first and last event of the batch.
    pub fn span(&self) -> Duration {
        self.last_seen.saturating_duration_since(self.first_seen)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushReport {
    pub message: String,
}

impl FlushReport {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Performs the downstream call for a completed batch. Called at most once per
/// batch; failures are logged and counted, never retried.
///
/// Timer-driven flushes run one at a time on a single dispatcher task, in the
/// order their batches completed. A slow server therefore delays flushes for
/// every other key; new events still queue while a flush is in flight.
#[async_trait]
pub trait Flusher: Send + Sync + 'static {
    async fn flush(&self, command: &FlushCommand) -> Result<FlushReport>;
}

#[derive(Debug)]
pub enum RecordOutcome {
    /// Event joined a pending batch that will flush later.
    Queued { batch_id: u64, pending_events: usize },
    /// Immediate mode: the flusher already ran for this event.
    Flushed(Result<FlushReport>),
}

struct EngineState {
    batches: HashMap<ScopeKey, PendingBatch>,
    batch_ids: BatchIds,
    /// `None` once the engine is shut down.
    outbox: Option<mpsc::UnboundedSender<FlushCommand>>,
}

/// Monotonic batch id source, starting at 1.
#[derive(Default)]
struct BatchIds(u64);

impl BatchIds {
    fn allocate(&mut self) -> u64 {
        self.0 += 1;
        self.0
    }
}

impl EngineState {

    /// Complete the batch for `key` if it still expects this timer.
    fn fire(&mut self, key: ScopeKey, batch_id: u64, slot: TimerSlot) {
        let current = match self.batches.get(&key) {
            Some(batch) if batch.accepts(batch_id, slot) => batch.batch_id(),
            _ => {
                trace!(batch_id, ?slot, "ignoring stale flush timer");
                return;
            }
        };
        let Some(batch) = self.batches.remove(&key) else {
            return;
        };

        let trigger = match slot {
            TimerSlot::Debounce(_) => FlushTrigger::Debounce,
            TimerSlot::Ceiling => FlushTrigger::MaxWait,
        };
        let command = batch.into_command(key, trigger);

        match &self.outbox {
            Some(outbox) => {
                if outbox.send(command).is_err() {
                    warn!(batch_id = current, "flush dispatcher gone, dropping batch");
                }
            }
            None => debug!(batch_id = current, "engine shut down, dropping batch"),
        }
    }
}

enum Admission {
    Immediate(FlushCommand),
    Queued { batch_id: u64, pending_events: usize },
}

/// Thread-safe coalescing engine shared across handlers.
pub struct CoalescingEngine<F: Flusher> {
    config: EngineConfig,
    flusher: Arc<F>,
    inner: Arc<Mutex<EngineState>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl<F: Flusher> CoalescingEngine<F> {
    /// Build the engine and spawn its dispatcher. Must run inside a tokio
    /// runtime.
    pub fn start(config: EngineConfig, flusher: F) -> Self {
        let flusher = Arc::new(flusher);
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = tokio::spawn(run_dispatcher(Arc::clone(&flusher), rx));

        info!(
            debounce_secs = config.debounce.as_secs_f64(),
            max_wait_secs = config.max_wait.map(|wait| wait.as_secs_f64()),
            immediate = config.is_immediate(),
            "refresh coalescing engine started"
        );

        Self {
            config,
            flusher,
            inner: Arc::new(Mutex::new(EngineState {
                batches: HashMap::new(),
                batch_ids: BatchIds::default(),
                outbox: Some(tx),
            })),
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    pub fn flusher(&self) -> &F {
        &self.flusher
    }

    pub fn pending_batches(&self) -> usize {
        self.inner.lock().batches.len()
    }

    /// Record one event for `key`. In immediate mode the flush runs before
    /// this returns and its outcome is handed back.
    pub async fn record_event(&self, key: ScopeKey, scope: LibraryScope) -> Result<RecordOutcome> {
        match self.admit(key, scope)? {
            Admission::Immediate(command) => {
                let outcome = execute_flush(self.flusher.as_ref(), &command).await;
                Ok(RecordOutcome::Flushed(outcome))
            }
            Admission::Queued {
                batch_id,
                pending_events,
            } => Ok(RecordOutcome::Queued {
                batch_id,
                pending_events,
            }),
        }
    }

    fn admit(&self, key: ScopeKey, scope: LibraryScope) -> Result<Admission> {
        let now = Instant::now();
        let mut guard = self.inner.lock();
        let state = &mut *guard;

        if state.outbox.is_none() {
            bail!("refresh engine is shut down");
        }
        counter!("notifier.events.recorded").increment(1);

        if self.config.is_immediate() {
            let batch_id = state.batch_ids.allocate();
            let command = PendingBatch::new(batch_id, scope, now)
                .into_command(key, FlushTrigger::Immediate);
            return Ok(Admission::Immediate(command));
        }

        let weak = Arc::downgrade(&self.inner);
        let batch = match state.batches.entry(key.clone()) {
            Entry::Occupied(entry) => {
                let batch = entry.into_mut();
                batch.absorb(scope, now);
                batch
            }
            Entry::Vacant(entry) => {
                let batch_id = state.batch_ids.allocate();
                let batch = entry.insert(PendingBatch::new(batch_id, scope, now));
                // A ceiling past the end of the clock is no ceiling.
                let ceiling_at = self
                    .config
                    .max_wait
                    .and_then(|max_wait| batch.first_seen().checked_add(max_wait));
                if let Some(deadline) = ceiling_at {
                    let ceiling = spawn_timer(
                        weak.clone(),
                        key.clone(),
                        batch.batch_id(),
                        TimerSlot::Ceiling,
                        deadline,
                    );
                    batch.arm_ceiling(ceiling);
                }
                batch
            }
        };

        // Bumping the sequence stales the previous debounce timer even when
        // the new deadline is unrepresentable and no timer replaces it.
        let seq = batch.next_debounce_seq();
        if let Some(deadline) = now.checked_add(self.config.debounce) {
            let debounce = spawn_timer(
                weak,
                key.clone(),
                batch.batch_id(),
                TimerSlot::Debounce(seq),
                deadline,
            );
            batch.rearm_debounce(debounce);
        }

        debug!(
            key = %key,
            batch_id = batch.batch_id(),
            pending_events = batch.event_count(),
            "refresh queued"
        );

        Ok(Admission::Queued {
            batch_id: batch.batch_id(),
            pending_events: batch.event_count(),
        })
    }

    /// Stop accepting events and discard every pending batch without flushing
    /// it. Commands already handed to the dispatcher are still delivered.
    /// Returns the number of discarded batches.
    pub async fn shutdown(&self) -> usize {
        let discarded = {
            let mut state = self.inner.lock();
            state.outbox = None;
            let batches = std::mem::take(&mut state.batches);
            let count = batches.len();
            for (_, mut batch) in batches {
                batch.cancel_timers();
            }
            count
        };

        if discarded > 0 {
            warn!(discarded, "discarded pending refresh batches on shutdown");
        } else {
            info!("refresh engine shut down with no pending batches");
        }

        let dispatcher = self.dispatcher.lock().take();
        if let Some(handle) = dispatcher {
            if let Err(e) = handle.await {
                warn!(error = %e, "flush dispatcher ended abnormally");
            }
        }

        discarded
    }
}

fn spawn_timer(
    inner: Weak<Mutex<EngineState>>,
    key: ScopeKey,
    batch_id: u64,
    slot: TimerSlot,
    deadline: Instant,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        sleep_until(deadline).await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        inner.lock().fire(key, batch_id, slot);
    })
}

/// Drains completed batches serially. Immediate-mode flushes bypass this task.
async fn run_dispatcher<F: Flusher>(flusher: Arc<F>, mut outbox: mpsc::UnboundedReceiver<FlushCommand>) {
    while let Some(command) = outbox.recv().await {
        let _ = execute_flush(flusher.as_ref(), &command).await;
    }
    debug!("flush dispatcher stopped");
}

async fn execute_flush<F: Flusher>(flusher: &F, command: &FlushCommand) -> Result<FlushReport> {
    histogram!("notifier.batch.events").record(command.event_count as f64);

    let outcome = flusher.flush(command).await;
    match &outcome {
        Ok(report) => {
            counter!("notifier.flush.completed", "trigger" => command.trigger.as_str())
                .increment(1);
            info!(
                server = %command.credentials(),
                targets = %command.scope,
                batch_id = command.batch_id,
                events = command.event_count,
                trigger = command.trigger.as_str(),
                span_secs = command.span().as_secs_f64(),
                "{}",
                report.message
            );
        }
        Err(e) => {
            counter!("notifier.flush.failed", "trigger" => command.trigger.as_str()).increment(1);
            warn!(
                server = %command.credentials(),
                targets = %command.scope,
                batch_id = command.batch_id,
                events = command.event_count,
                trigger = command.trigger.as_str(),
                error = %e,
                "refresh failed"
            );
        }
    }
    outcome
}
