//! Timer and task queues owned by the loop worker.
//!
//! Host timers and script timers share one id counter and one queue ordered
//! by (due time, submission sequence). Cancellation goes through a
//! [`TimerState`] that both sides hold, so a handle can be cleared from any
//! thread while the entry itself stays on the worker.

use crate::engine::ScriptEngine;
use rquickjs::{Function, Persistent, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// One-shot host closure run on the loop.
pub(crate) type HostTask = Box<dyn FnOnce(&ScriptEngine) + Send + 'static>;

/// Repeating host closure run on the loop.
pub(crate) type HostTick = Box<dyn FnMut(&ScriptEngine) + Send + 'static>;

/// Longest delay a timer is scheduled with. Larger delays never fire in
/// practice and would overflow `Instant`.
const MAX_DELAY: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Due time `delay` from now, clamped to [`MAX_DELAY`].
pub(crate) fn deadline_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay.min(MAX_DELAY))
        .or_else(|| now.checked_add(Duration::from_secs(24 * 60 * 60)))
        .unwrap_or(now)
}

const PENDING: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

/// Shared cancellation state of a scheduled timer.
#[derive(Debug, Default)]
pub(crate) struct TimerState {
    status: AtomicU8,
}

impl TimerState {
    /// Cancel unless a one-shot timer already fired. Never fails.
    pub fn cancel(&self) {
        let _ = self
            .status
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Claim the next firing. One-shot timers can be claimed once.
    pub fn begin_fire(&self, repeating: bool) -> bool {
        if repeating {
            self.status.load(Ordering::Acquire) == PENDING
        } else {
            self.status
                .compare_exchange(PENDING, FIRED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status.load(Ordering::Acquire) == PENDING
    }

    pub fn is_cancelled(&self) -> bool {
        self.status.load(Ordering::Acquire) == CANCELLED
    }
}

/// Id and sequence source shared by the host side and the worker.
#[derive(Debug, Clone)]
pub(crate) struct TimerIds(Arc<AtomicU64>);

impl TimerIds {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU64::new(1)))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

pub(crate) enum HostCallback {
    Once(HostTask),
    Repeat(HostTick),
}

/// Host timer as it travels to the worker.
pub(crate) struct HostTimer {
    pub id: u64,
    pub when: Instant,
    pub interval: Option<Duration>,
    pub state: Arc<TimerState>,
    pub callback: HostCallback,
}

pub(crate) enum TimerCallback {
    Host(HostCallback),
    Script {
        function: Persistent<Function<'static>>,
        args: Vec<Persistent<Value<'static>>>,
    },
}

pub(crate) struct TimerEntry {
    pub id: u64,
    pub seq: u64,
    pub when: Instant,
    pub interval: Option<Duration>,
    pub state: Arc<TimerState>,
    pub callback: TimerCallback,
}

impl TimerEntry {
    pub fn is_repeating(&self) -> bool {
        self.interval.is_some()
    }
}

impl From<HostTimer> for TimerEntry {
    fn from(timer: HostTimer) -> Self {
        Self {
            id: timer.id,
            seq: timer.id,
            when: timer.when,
            interval: timer.interval,
            state: timer.state,
            callback: TimerCallback::Host(timer.callback),
        }
    }
}

/// Queued work for the worker.
pub(crate) struct EventLoop {
    timers: BTreeMap<(Instant, u64), TimerEntry>,
    live: HashMap<u64, Arc<TimerState>>,
    tasks: VecDeque<HostTask>,
    ids: TimerIds,
}

impl EventLoop {
    pub fn new(ids: TimerIds) -> Self {
        Self {
            timers: BTreeMap::new(),
            live: HashMap::new(),
            tasks: VecDeque::new(),
            ids,
        }
    }

    /// Queue a script timer and return its id.
    pub fn schedule_script(
        &mut self,
        function: Persistent<Function<'static>>,
        args: Vec<Persistent<Value<'static>>>,
        delay: Duration,
        repeating: bool,
    ) -> u64 {
        let id = self.ids.next();
        self.insert(TimerEntry {
            id,
            seq: id,
            when: deadline_after(delay),
            interval: repeating.then_some(delay),
            state: Arc::new(TimerState::default()),
            callback: TimerCallback::Script { function, args },
        });
        id
    }

    pub fn insert(&mut self, entry: TimerEntry) {
        self.live.insert(entry.id, entry.state.clone());
        self.timers.insert((entry.when, entry.seq), entry);
    }

    /// Put a repeating timer back one interval from now.
    pub fn rearm(&mut self, mut entry: TimerEntry) {
        let interval = entry.interval.unwrap_or_default();
        entry.when = deadline_after(interval);
        entry.seq = self.ids.next();
        self.insert(entry);
    }

    /// Cancel by id. Unknown ids are ignored.
    pub fn cancel(&mut self, id: u64) {
        if let Some(state) = self.live.get(&id) {
            state.cancel();
        }
    }

    /// Forget a timer that will not run again.
    pub fn finish(&mut self, id: u64) {
        self.live.remove(&id);
    }

    /// Pop the earliest timer due at or before `cutoff`.
    pub fn pop_due(&mut self, cutoff: Instant) -> Option<TimerEntry> {
        let entry = self.timers.first_entry()?;
        if entry.key().0 > cutoff {
            return None;
        }
        Some(entry.remove())
    }

    fn prune_cancelled(&mut self) {
        let cancelled: Vec<_> = self
            .timers
            .iter()
            .filter(|(_, entry)| entry.state.is_cancelled())
            .map(|(key, entry)| (*key, entry.id))
            .collect();
        for (key, id) in cancelled {
            self.timers.remove(&key);
            self.live.remove(&id);
        }
    }

    pub fn has_live_timers(&mut self) -> bool {
        self.prune_cancelled();
        !self.timers.is_empty()
    }

    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.prune_cancelled();
        self.timers.keys().next().map(|(when, _)| *when)
    }

    pub fn has_due_timer(&mut self, cutoff: Instant) -> bool {
        self.next_deadline().is_some_and(|when| when <= cutoff)
    }

    /// Drop every timer that is not yet due at `cutoff`.
    pub fn discard_after(&mut self, cutoff: Instant) -> usize {
        let later = self.timers.split_off(&(cutoff, u64::MAX));
        for entry in later.values() {
            self.live.remove(&entry.id);
        }
        later.len()
    }

    pub fn push_task(&mut self, task: HostTask) {
        self.tasks.push_back(task);
    }

    pub fn take_tasks(&mut self) -> VecDeque<HostTask> {
        std::mem::take(&mut self.tasks)
    }

    pub fn has_tasks(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Drop all queued work, releasing script values while the engine is alive.
    pub fn clear(&mut self) {
        self.timers.clear();
        self.live.clear();
        self.tasks.clear();
    }
}
