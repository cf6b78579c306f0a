//! Event-loop runner
//!
//! An [`EventLoopRunner`] owns one worker thread with its own engine, timer
//! queue and task queue. The runner itself is `Send + Sync`: any host thread
//! can queue closures, schedule timers, pump scripts to completion or await
//! promises while the worker keeps every script value on its own thread.
//!
//! # Example
//!
//! ```no_run
//! use jsrunner::EventLoopRunner;
//!
//! let runner = EventLoopRunner::new().unwrap();
//! runner.start().unwrap();
//! let value = runner
//!     .await_promise("new Promise(resolve => setTimeout(() => resolve(42), 10))")
//!     .unwrap();
//! assert_eq!(value.export_int(), 42);
//! runner.stop();
//! ```

use crate::config::RunnerConfig;
use crate::engine::ScriptEngine;
use crate::error::{RunnerError, RunnerResult};
use crate::event_loop::{HostCallback, HostTimer, TimerIds, TimerState, deadline_after};
use crate::host::HostValue;
use crate::value::JsValue;
use crate::worker::{Command, WorkerSetup, execute_with_panic_handler, run_worker};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

/// Lifecycle of an [`EventLoopRunner`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Worker is up but the loop is not driven yet
    Created,
    /// Loop is driven continuously
    Running,
    /// `stop` is running queued work before the worker exits
    Draining,
    /// Worker has exited after a stop
    Stopped,
    /// `stop_no_wait` dropped all pending work
    Aborted,
}

impl LoopState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Running,
            2 => Self::Draining,
            3 => Self::Stopped,
            _ => Self::Aborted,
        }
    }

    /// Whether new work is accepted.
    pub fn is_accepting(self) -> bool {
        matches!(self, Self::Created | Self::Running)
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Loop state shared with the worker
#[derive(Debug, Default)]
pub(crate) struct SharedState(AtomicU8);

impl SharedState {
    pub fn get(&self) -> LoopState {
        LoopState::from_u8(self.0.load(Ordering::SeqCst))
    }

    fn transition(&self, from: LoopState, to: LoopState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn abort(&self) -> LoopState {
        LoopState::from_u8(self.0.swap(LoopState::Aborted as u8, Ordering::SeqCst))
    }

    /// Called by the worker on exit.
    pub fn finish(&self) {
        let _ = self.transition(LoopState::Draining, LoopState::Stopped);
    }
}

/// Statistics about runner operation
///
/// All counters are atomic and can be read at any time without locking.
#[derive(Debug, Default)]
pub struct EventLoopStats {
    /// Host closures submitted with `run` or `run_on_loop`
    pub tasks_submitted: AtomicU64,
    /// Host closures that finished (successfully or with a panic)
    pub tasks_completed: AtomicU64,
    /// Host closures that panicked
    pub tasks_failed: AtomicU64,
    /// Host and script timer callbacks fired
    pub timers_fired: AtomicU64,
}

impl EventLoopStats {
    pub fn snapshot(&self) -> EventLoopStatsSnapshot {
        EventLoopStatsSnapshot {
            tasks_submitted: self.tasks_submitted.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            timers_fired: self.timers_fired.load(Ordering::Relaxed),
        }
    }

    /// Closures submitted but not yet finished
    pub fn tasks_in_flight(&self) -> u64 {
        let submitted = self.tasks_submitted.load(Ordering::Relaxed);
        let completed = self.tasks_completed.load(Ordering::Relaxed);
        submitted.saturating_sub(completed)
    }
}

/// A point-in-time snapshot of runner statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventLoopStatsSnapshot {
    pub tasks_submitted: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub timers_fired: u64,
}

/// Handle to a host timer. Cancelling is idempotent and never fails.
#[derive(Clone)]
pub struct TimerHandle {
    id: u64,
    state: Arc<TimerState>,
    wake: Sender<Command>,
}

impl TimerHandle {
    /// Id shared with script timers; scripts may pass it to `clearTimeout`.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the timer can still fire.
    pub fn is_active(&self) -> bool {
        self.state.is_pending()
    }

    pub fn cancel(&self) {
        self.state.cancel();
        let _ = self.wake.send(Command::Wake);
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Builder for an [`EventLoopRunner`]
#[derive(Debug, Default)]
pub struct RunnerBuilder {
    config: RunnerConfig,
    globals: BTreeMap<String, HostValue>,
}

impl RunnerBuilder {
    pub fn config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn global(mut self, name: impl Into<String>, value: impl Into<HostValue>) -> Self {
        self.globals.insert(name.into(), value.into());
        self
    }

    /// Spawn the worker and wait until its engine is ready.
    pub fn build(self) -> RunnerResult<EventLoopRunner> {
        EventLoopRunner::spawn(self)
    }
}

static RUNNER_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Event loop on a dedicated worker thread
pub struct EventLoopRunner {
    commands: Sender<Command>,
    state: Arc<SharedState>,
    worker: Mutex<Option<JoinHandle<()>>>,
    globals: Arc<RwLock<BTreeMap<String, HostValue>>>,
    ids: TimerIds,
    interrupt: Arc<AtomicBool>,
    stats: Arc<EventLoopStats>,
}

impl EventLoopRunner {
    /// Create a runner with default configuration.
    pub fn new() -> RunnerResult<Self> {
        Self::builder().build()
    }

    pub fn with_config(config: RunnerConfig) -> RunnerResult<Self> {
        Self::builder().config(config).build()
    }

    pub fn builder() -> RunnerBuilder {
        RunnerBuilder::default()
    }

    fn spawn(builder: RunnerBuilder) -> RunnerResult<Self> {
        let (commands, command_rx) = unbounded::<Command>();
        let (ready_tx, ready_rx) = bounded(1);
        let state = Arc::new(SharedState::default());
        let globals = Arc::new(RwLock::new(builder.globals));
        let ids = TimerIds::new();
        let stats = Arc::new(EventLoopStats::default());

        let setup = WorkerSetup {
            config: builder.config,
            commands: command_rx,
            ready: ready_tx,
            state: state.clone(),
            globals: globals.clone(),
            ids: ids.clone(),
            stats: stats.clone(),
        };

        let index = RUNNER_COUNTER.fetch_add(1, Ordering::Relaxed);
        let handle = std::thread::Builder::new()
            .name(format!("jsrunner-loop-{}", index))
            .spawn(move || run_worker(setup))
            .map_err(|e| RunnerError::internal(format!("Failed to spawn worker: {}", e)))?;

        let interrupt = match ready_rx.recv() {
            Ok(ready) => ready?,
            Err(_) => return Err(RunnerError::internal("Worker exited during startup")),
        };

        Ok(Self {
            commands,
            state,
            worker: Mutex::new(Some(handle)),
            globals,
            ids,
            interrupt,
            stats,
        })
    }

    pub fn state(&self) -> LoopState {
        self.state.get()
    }

    /// Record `value` under `name`. It is bound before the next closure or script runs.
    pub fn set_global(&self, name: impl Into<String>, value: impl Into<HostValue>) {
        self.globals.write().insert(name.into(), value.into());
    }

    /// Copy of the current global registry.
    pub fn globals(&self) -> BTreeMap<String, HostValue> {
        self.globals.read().clone()
    }

    /// Start driving the loop. A second call is a usage error.
    pub fn start(&self) -> RunnerResult<()> {
        if !self.state.transition(LoopState::Created, LoopState::Running) {
            return Err(RunnerError::usage(format!(
                "cannot start an event loop that is {}",
                self.state()
            )));
        }
        debug!("Event loop started");
        self.send(Command::Wake)
    }

    fn ensure_accepting(&self) -> RunnerResult<()> {
        let state = self.state();
        if state.is_accepting() {
            Ok(())
        } else {
            Err(RunnerError::usage(format!("event loop is {}", state)))
        }
    }

    fn send(&self, command: Command) -> RunnerResult<()> {
        self.commands
            .send(command)
            .map_err(|_| RunnerError::usage("event loop worker has exited"))
    }

    /// Run `f` once on the loop thread with globals bound and return its result.
    ///
    /// Promise jobs queued by `f` are drained; timers are not pumped.
    pub fn run<F, R>(&self, f: F) -> RunnerResult<R>
    where
        F: FnOnce(&ScriptEngine) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.ensure_accepting()?;
        let (tx, rx) = bounded(1);
        self.stats.tasks_submitted.fetch_add(1, Ordering::Relaxed);
        let stats = self.stats.clone();
        self.send(Command::Run(Box::new(move |engine: &ScriptEngine| {
            let result = execute_with_panic_handler(|| f(engine));
            if result.is_err() {
                stats.tasks_failed.fetch_add(1, Ordering::Relaxed);
            }
            let _ = tx.send(result.map_err(RunnerError::Internal));
        })))?;

        rx.recv()
            .map_err(|_| RunnerError::usage("event loop stopped before the closure ran"))?
    }

    /// Queue `f` to run on the loop. In the created state it waits for `start`
    /// or a pump.
    pub fn run_on_loop<F>(&self, f: F) -> RunnerResult<()>
    where
        F: FnOnce(&ScriptEngine) + Send + 'static,
    {
        self.ensure_accepting()?;
        self.stats.tasks_submitted.fetch_add(1, Ordering::Relaxed);
        self.send(Command::Submit(Box::new(f)))
    }

    /// Run `f` once after `delay`.
    pub fn set_timeout<F>(&self, delay: Duration, f: F) -> RunnerResult<TimerHandle>
    where
        F: FnOnce(&ScriptEngine) + Send + 'static,
    {
        self.schedule(delay, None, HostCallback::Once(Box::new(f)))
    }

    /// Run `f` every `interval` until the handle is cancelled.
    pub fn set_interval<F>(&self, interval: Duration, f: F) -> RunnerResult<TimerHandle>
    where
        F: FnMut(&ScriptEngine) + Send + 'static,
    {
        self.schedule(interval, Some(interval), HostCallback::Repeat(Box::new(f)))
    }

    fn schedule(
        &self,
        delay: Duration,
        interval: Option<Duration>,
        callback: HostCallback,
    ) -> RunnerResult<TimerHandle> {
        self.ensure_accepting()?;
        let id = self.ids.next();
        let state = Arc::new(TimerState::default());
        self.send(Command::Schedule(HostTimer {
            id,
            when: deadline_after(delay),
            interval,
            state: state.clone(),
            callback,
        }))?;

        Ok(TimerHandle {
            id,
            state,
            wake: self.commands.clone(),
        })
    }

    /// Cancel a timeout. Cancelling a fired or cancelled timer does nothing.
    pub fn clear_timeout(&self, handle: &TimerHandle) {
        handle.cancel();
    }

    /// Cancel an interval. Cancelling twice does nothing.
    pub fn clear_interval(&self, handle: &TimerHandle) {
        handle.cancel();
    }

    /// Evaluate `source`, then drive the loop until no closures, live timers
    /// or promise jobs remain. Returns the script's completion value.
    pub fn run_async(&self, source: &str) -> RunnerResult<JsValue> {
        let rx = self.submit_pump(source)?;
        rx.recv()
            .map_err(|_| RunnerError::usage("event loop stopped before the script finished"))?
    }

    /// Like [`run_async`](Self::run_async), but aborts the loop when `timeout`
    /// passes first.
    pub fn run_async_with_timeout(&self, source: &str, timeout: Duration) -> RunnerResult<JsValue> {
        let rx = self.submit_pump(source)?;
        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                debug!(?timeout, "Pump timed out, aborting event loop");
                self.stop_no_wait();
                Err(RunnerError::Timeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(RunnerError::usage("event loop stopped before the script finished"))
            }
        }
    }

    fn submit_pump(&self, source: &str) -> RunnerResult<Receiver<RunnerResult<JsValue>>> {
        self.ensure_accepting()?;
        let (reply, rx) = bounded(1);
        self.send(Command::Pump {
            source: source.to_string(),
            reply,
        })?;
        Ok(rx)
    }

    /// Evaluate `source` on the running loop and block until the resulting
    /// promise settles. Non-promise values are returned directly.
    ///
    /// Must not be called from inside an async runtime; use
    /// [`await_promise_async`](Self::await_promise_async) there.
    pub fn await_promise(&self, source: &str) -> RunnerResult<JsValue> {
        let rx = self.submit_await(source)?;
        rx.blocking_recv().map_err(|_| settle_lost())?
    }

    /// Async form of [`await_promise`](Self::await_promise).
    pub async fn await_promise_async(&self, source: &str) -> RunnerResult<JsValue> {
        let rx = self.submit_await(source)?;
        rx.await.map_err(|_| settle_lost())?
    }

    fn submit_await(&self, source: &str) -> RunnerResult<oneshot::Receiver<RunnerResult<JsValue>>> {
        let state = self.state();
        if state != LoopState::Running {
            return Err(RunnerError::usage(format!(
                "await_promise requires a running event loop (loop is {})",
                state
            )));
        }
        let (reply, rx) = oneshot::channel();
        self.send(Command::Await {
            source: source.to_string(),
            reply,
        })?;
        Ok(rx)
    }

    /// Run queued work and due timers, drop later timers, and wait for the
    /// worker to exit. Calling it again does nothing.
    pub fn stop(&self) {
        let drain = self.state.transition(LoopState::Running, LoopState::Draining);
        if drain || self.state.transition(LoopState::Created, LoopState::Stopped) {
            debug!(drain, "Stopping event loop");
            let _ = self.commands.send(Command::Stop);
        }

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if self.state() == LoopState::Aborted {
                return;
            }
            let _ = handle.join();
        }
    }

    /// Interrupt running script and drop all pending work without waiting.
    pub fn stop_no_wait(&self) {
        let previous = self.state.abort();
        if previous == LoopState::Aborted {
            return;
        }
        debug!(%previous, "Aborting event loop");
        self.interrupt.store(true, Ordering::SeqCst);
        let _ = self.commands.send(Command::Wake);
        // Detach: the worker exits on its own once the interrupt lands.
        drop(self.worker.lock().take());
    }

    pub fn stats(&self) -> &EventLoopStats {
        &self.stats
    }

    pub fn is_running(&self) -> bool {
        self.state() == LoopState::Running
    }
}

fn settle_lost() -> RunnerError {
    RunnerError::usage("event loop stopped before the promise settled")
}

impl Drop for EventLoopRunner {
    fn drop(&mut self) {
        if self.state().is_accepting() {
            self.stop_no_wait();
        }
    }
}

impl fmt::Debug for EventLoopRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoopRunner")
            .field("state", &self.state())
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runner_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<EventLoopRunner>();
        assert_sync::<EventLoopRunner>();
        assert_send::<TimerHandle>();
    }

    #[test]
    fn test_state_round_trip() {
        for state in [
            LoopState::Created,
            LoopState::Running,
            LoopState::Draining,
            LoopState::Stopped,
            LoopState::Aborted,
        ] {
            assert_eq!(LoopState::from_u8(state as u8), state);
        }
        assert!(LoopState::Created.is_accepting());
        assert!(!LoopState::Draining.is_accepting());
    }

    #[test]
    fn test_shared_state_transitions() {
        let state = SharedState::default();
        assert_eq!(state.get(), LoopState::Created);
        assert!(state.transition(LoopState::Created, LoopState::Running));
        assert!(!state.transition(LoopState::Created, LoopState::Running));
        assert_eq!(state.abort(), LoopState::Running);
        state.finish();
        assert_eq!(state.get(), LoopState::Aborted);
    }

    #[test]
    fn test_stats_snapshot() {
        let stats = EventLoopStats::default();
        stats.tasks_submitted.fetch_add(3, Ordering::Relaxed);
        stats.tasks_completed.fetch_add(2, Ordering::Relaxed);
        assert_eq!(stats.tasks_in_flight(), 1);
        assert_eq!(stats.snapshot().tasks_submitted, 3);
    }
}
