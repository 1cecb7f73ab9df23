// Per-key pending batch state
//
// Accumulates the scope union for one key and tracks the timers that will
// eventually flush it.

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::scope::{LibraryScope, ScopeKey};
use crate::{FlushCommand, FlushTrigger};

/// Which timer a firing task belongs to. Debounce timers carry the re-arm
/// sequence they were scheduled with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerSlot {
    Debounce(u64),
    Ceiling,
}

#[derive(Debug)]
pub(crate) struct PendingBatch {
    batch_id: u64,
    scope_union: LibraryScope,
    event_count: usize,
    first_seen: Instant,
    last_seen: Instant,
    debounce_seq: u64,
    debounce_timer: Option<JoinHandle<()>>,
    ceiling_timer: Option<JoinHandle<()>>,
}

impl PendingBatch {
    pub fn new(batch_id: u64, scope: LibraryScope, now: Instant) -> Self {
        Self {
            batch_id,
            scope_union: scope,
            event_count: 1,
            first_seen: now,
            last_seen: now,
            debounce_seq: 0,
            debounce_timer: None,
            ceiling_timer: None,
        }
    }

    pub fn batch_id(&self) -> u64 {
        self.batch_id
    }

    pub fn event_count(&self) -> usize {
        self.event_count
    }

    pub fn first_seen(&self) -> Instant {
        self.first_seen
    }

    pub fn absorb(&mut self, scope: LibraryScope, now: Instant) {
        self.scope_union.merge(scope);
        self.last_seen = now;
        self.event_count += 1;
    }

    /// Bump the debounce sequence and return it. Any timer still holding an
    /// older sequence becomes stale.
    pub fn next_debounce_seq(&mut self) -> u64 {
        self.debounce_seq += 1;
        self.debounce_seq
    }

    pub fn rearm_debounce(&mut self, timer: JoinHandle<()>) {
        if let Some(previous) = self.debounce_timer.replace(timer) {
            previous.abort();
        }
    }

    pub fn arm_ceiling(&mut self, timer: JoinHandle<()>) {
        if let Some(previous) = self.ceiling_timer.replace(timer) {
            previous.abort();
        }
    }

    /// Whether a timer scheduled for `batch_id` in `slot` is still the one
    /// this batch is waiting on.
    pub fn accepts(&self, batch_id: u64, slot: TimerSlot) -> bool {
        if batch_id != self.batch_id {
            return false;
        }
        match slot {
            TimerSlot::Debounce(seq) => seq == self.debounce_seq,
            TimerSlot::Ceiling => self.ceiling_timer.is_some(),
        }
    }

    pub fn cancel_timers(&mut self) {
        if let Some(timer) = self.debounce_timer.take() {
            timer.abort();
        }
        if let Some(timer) = self.ceiling_timer.take() {
            timer.abort();
        }
    }

    /// Consume the batch into its flush command. The timer behind `trigger` is
    /// the task running this call, so only the other one is aborted.
    pub fn into_command(mut self, key: ScopeKey, trigger: FlushTrigger) -> FlushCommand {
        match trigger {
            FlushTrigger::Debounce => {
                self.debounce_timer.take();
            }
            FlushTrigger::MaxWait => {
                self.ceiling_timer.take();
            }
            FlushTrigger::Immediate => {}
        }
        self.cancel_timers();

        FlushCommand {
            key,
            batch_id: self.batch_id,
            scope: self.scope_union,
            event_count: self.event_count,
            first_seen: self.first_seen,
            last_seen: self.last_seen,
            trigger,
        }
    }
}
