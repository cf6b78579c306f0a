//! Loop worker thread
//!
//! The worker owns the [`ScriptEngine`] for its whole life. Host threads talk
//! to it through [`Command`]s. Commands are always processed; queued tasks and
//! timers only run while the loop is driven, that is while it is running,
//! draining for a stop, or pumping for a `run_async` caller.

use crate::config::RunnerConfig;
use crate::engine::{ScriptEngine, caught, eval_value, is_thenable, subscribe};
use crate::error::{RunnerError, RunnerResult};
use crate::event_loop::{
    EventLoop, HostCallback, HostTask, HostTimer, TimerCallback, TimerEntry, TimerIds,
};
use crate::host::HostValue;
use crate::runner::{EventLoopStats, LoopState, SharedState};
use crate::timers;
use crate::value::JsValue;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::RwLock;
use rquickjs::function::Rest;
use rquickjs::{Function, Value};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, error, info_span, trace, warn};

pub(crate) type PumpReply = Sender<RunnerResult<JsValue>>;
pub(crate) type AwaitReply = oneshot::Sender<RunnerResult<JsValue>>;

/// Message sent from a host thread to the worker
pub(crate) enum Command {
    /// Queue a closure for the next turn
    Submit(HostTask),
    /// Queue a host timer
    Schedule(HostTimer),
    /// Run a closure right away, whether or not the loop is driven
    Run(HostTask),
    /// Evaluate and drive the loop until it is idle
    Pump { source: String, reply: PumpReply },
    /// Evaluate and report the settled promise
    Await { source: String, reply: AwaitReply },
    /// Re-read the shared state (start, abort, cancelled handle)
    Wake,
    /// Leave the loop, draining first when the state says so
    Stop,
}

/// Everything the worker needs from the runner
pub(crate) struct WorkerSetup {
    pub config: RunnerConfig,
    pub commands: Receiver<Command>,
    pub ready: Sender<RunnerResult<Arc<AtomicBool>>>,
    pub state: Arc<SharedState>,
    pub globals: Arc<RwLock<BTreeMap<String, HostValue>>>,
    pub ids: TimerIds,
    pub stats: Arc<EventLoopStats>,
}

/// Awaits waiting for their promise to settle
#[derive(Default)]
struct PendingAwaits {
    next: u64,
    waiting: HashMap<u64, AwaitReply>,
}

impl PendingAwaits {
    fn insert(&mut self, reply: AwaitReply) -> u64 {
        self.next += 1;
        self.waiting.insert(self.next, reply);
        self.next
    }

    fn settle(&mut self, id: u64, result: RunnerResult<JsValue>) {
        if let Some(reply) = self.waiting.remove(&id) {
            let _ = reply.send(result);
        }
    }

    /// Fail every waiter because the loop is going away.
    fn abandon(&mut self) {
        for (_, reply) in self.waiting.drain() {
            let _ = reply.send(Err(RunnerError::usage(
                "event loop stopped before the promise settled",
            )));
        }
    }
}

/// Run the worker until it is stopped, aborted, or its runner is dropped.
pub(crate) fn run_worker(setup: WorkerSetup) {
    let thread_name = std::thread::current()
        .name()
        .unwrap_or("jsrunner-loop")
        .to_string();

    let _span = info_span!("event_loop", name = %thread_name).entered();
    debug!("Worker starting");

    let engine = match ScriptEngine::new(&setup.config) {
        Ok(engine) => engine,
        Err(e) => {
            error!(error = %e, "Failed to create script engine");
            let _ = setup.ready.send(Err(e));
            return;
        }
    };

    let event_loop = Rc::new(RefCell::new(EventLoop::new(setup.ids.clone())));
    if let Err(e) = engine.with_context(|ctx| timers::install(&ctx, event_loop.clone())) {
        error!(error = %e, "Failed to register timers");
        let _ = setup.ready.send(Err(RunnerError::engine(e)));
        return;
    }

    // Persistent script values must be released before the engine goes away.
    let _release = scopeguard::guard(event_loop.clone(), |event_loop| {
        event_loop.borrow_mut().clear();
    });
    let awaits = Rc::new(RefCell::new(PendingAwaits::default()));
    let _abandon = scopeguard::guard(awaits.clone(), |awaits| awaits.borrow_mut().abandon());

    let _ = setup.ready.send(Ok(engine.interrupt_flag()));
    debug!("Worker initialized");

    let state = setup.state.clone();
    let mut worker = LoopWorker {
        engine: &engine,
        event_loop,
        awaits,
        commands: setup.commands,
        state: setup.state,
        globals: setup.globals,
        stats: setup.stats,
        pumps: Vec::new(),
        stop_at: None,
    };
    worker.run();
    drop(worker);
    state.finish();

    debug!("Worker stopped");
}

struct LoopWorker<'e> {
    engine: &'e ScriptEngine,
    event_loop: Rc<RefCell<EventLoop>>,
    awaits: Rc<RefCell<PendingAwaits>>,
    commands: Receiver<Command>,
    state: Arc<SharedState>,
    globals: Arc<RwLock<BTreeMap<String, HostValue>>>,
    stats: Arc<EventLoopStats>,
    pumps: Vec<(PumpReply, JsValue)>,
    /// Set once a stop arrives; only timers due by then still run.
    stop_at: Option<Instant>,
}

impl LoopWorker<'_> {
    fn run(&mut self) {
        loop {
            if self.state.get() == LoopState::Aborted {
                debug!("Worker abort flag set");
                return;
            }

            // Everything already queued, without blocking
            loop {
                match self.commands.try_recv() {
                    Ok(command) => {
                        if !self.handle(command) {
                            return;
                        }
                    }
                    Err(crossbeam_channel::TryRecvError::Empty) => break,
                    Err(crossbeam_channel::TryRecvError::Disconnected) => {
                        debug!("Command channel disconnected");
                        return;
                    }
                }
            }

            if self.state.get() == LoopState::Aborted {
                return;
            }

            if self.is_driven() {
                self.turn();
            }

            if !self.pumps.is_empty() && self.is_idle() {
                for (reply, value) in self.pumps.drain(..) {
                    let _ = reply.send(Ok(value));
                }
            }

            if let Some(cutoff) = self.stop_at {
                if self.is_drained(cutoff) {
                    let discarded = self.event_loop.borrow_mut().discard_after(cutoff);
                    debug!(discarded, "Drain complete");
                    return;
                }
                continue;
            }

            let received = match self.wait_time() {
                Some(wait) if wait.is_zero() => continue,
                Some(wait) => match self.commands.recv_timeout(wait) {
                    Ok(command) => command,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => return,
                },
                None => match self.commands.recv() {
                    Ok(command) => command,
                    Err(_) => return,
                },
            };
            if !self.handle(received) {
                return;
            }
        }
    }

    /// Apply one command. Returns false when the worker should exit now.
    fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Submit(task) => self.event_loop.borrow_mut().push_task(task),
            Command::Schedule(timer) => self.event_loop.borrow_mut().insert(timer.into()),
            Command::Run(task) => {
                let _span = info_span!("run").entered();
                let ok = self.run_host(task);
                self.record_task(ok);
                self.engine.run_pending_jobs();
            }
            Command::Pump { source, reply } => {
                let _span = info_span!("run_async").entered();
                self.apply_globals();
                match self.engine.eval(&source) {
                    Ok(value) => self.pumps.push((reply, value)),
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }
            Command::Await { source, reply } => {
                let _span = info_span!("await_promise").entered();
                self.start_await(&source, reply);
            }
            Command::Wake => trace!("Worker woken"),
            Command::Stop => {
                if self.state.get() != LoopState::Draining {
                    debug!("Stop before start");
                    return false;
                }
                debug!("Draining");
                self.stop_at = Some(Instant::now());
            }
        }
        true
    }

    fn is_driven(&self) -> bool {
        matches!(self.state.get(), LoopState::Running | LoopState::Draining)
            || !self.pumps.is_empty()
            || self.stop_at.is_some()
    }

    /// Nothing queued, no live timers, no promise jobs.
    fn is_idle(&self) -> bool {
        let mut event_loop = self.event_loop.borrow_mut();
        !event_loop.has_tasks() && !event_loop.has_live_timers() && !self.engine.has_pending_jobs()
    }

    fn is_drained(&self, cutoff: Instant) -> bool {
        let mut event_loop = self.event_loop.borrow_mut();
        !event_loop.has_tasks() && !event_loop.has_due_timer(cutoff) && !self.engine.has_pending_jobs()
    }

    /// How long to block for the next command. `None` blocks until one arrives.
    fn wait_time(&self) -> Option<Duration> {
        if !self.is_driven() {
            return None;
        }
        let mut event_loop = self.event_loop.borrow_mut();
        if event_loop.has_tasks() || self.engine.has_pending_jobs() {
            return Some(Duration::ZERO);
        }
        event_loop
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// One pass: queued tasks, then due timers, each followed by promise jobs.
    fn turn(&mut self) {
        let tasks = self.event_loop.borrow_mut().take_tasks();
        for task in tasks {
            if self.state.get() == LoopState::Aborted {
                return;
            }
            let ok = self.run_host(task);
            self.record_task(ok);
            self.engine.run_pending_jobs();
        }

        let cutoff = match self.stop_at {
            Some(stop_at) => stop_at.min(Instant::now()),
            None => Instant::now(),
        };
        loop {
            if self.state.get() == LoopState::Aborted {
                return;
            }
            let due = self.event_loop.borrow_mut().pop_due(cutoff);
            let Some(entry) = due else {
                break;
            };
            self.fire(entry);
            self.engine.run_pending_jobs();
        }

        self.engine.run_pending_jobs();
    }

    fn fire(&mut self, mut entry: TimerEntry) {
        let repeating = entry.is_repeating();
        if !entry.state.begin_fire(repeating) {
            self.event_loop.borrow_mut().finish(entry.id);
            return;
        }

        trace!(timer = entry.id, "Timer fired");
        self.stats.timers_fired.fetch_add(1, Ordering::Relaxed);

        match entry.callback {
            TimerCallback::Host(HostCallback::Once(task)) => {
                if !self.run_host(task) {
                    warn!(timer = entry.id, "Timer callback panicked");
                }
                self.event_loop.borrow_mut().finish(entry.id);
                return;
            }
            TimerCallback::Host(HostCallback::Repeat(ref mut tick)) => {
                self.apply_globals();
                let engine = self.engine;
                if execute_with_panic_handler(|| tick(engine)).is_err() {
                    warn!(timer = entry.id, "Interval callback panicked");
                }
            }
            TimerCallback::Script {
                ref function,
                ref args,
            } => {
                let result = self.engine.with_context(|ctx| {
                    let call = || -> rquickjs::Result<()> {
                        let function: Function = function.clone().restore(&ctx)?;
                        let mut restored = Vec::with_capacity(args.len());
                        for arg in args {
                            restored.push(arg.clone().restore(&ctx)?);
                        }
                        function.call::<_, Value>((Rest(restored),))?;
                        Ok(())
                    };
                    call().map_err(|e| caught(&ctx, e))
                });
                if let Err(e) = result {
                    warn!(timer = entry.id, error = %e, "Timer callback failed");
                }
            }
        }

        if repeating && !entry.state.is_cancelled() {
            self.event_loop.borrow_mut().rearm(entry);
        } else {
            self.event_loop.borrow_mut().finish(entry.id);
        }
    }

    /// Run a host closure with the registry bound. Returns false if it panicked.
    fn run_host(&self, task: HostTask) -> bool {
        self.apply_globals();
        let engine = self.engine;
        execute_with_panic_handler(|| task(engine)).is_ok()
    }

    fn record_task(&self, ok: bool) {
        self.stats.tasks_completed.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.stats.tasks_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn apply_globals(&self) {
        let globals = self.globals.read();
        if let Err(e) = self.engine.bind_globals(globals.iter()) {
            warn!(error = %e, "Failed to bind globals");
        }
    }

    fn start_await(&mut self, source: &str, reply: AwaitReply) {
        self.apply_globals();
        let id = self.awaits.borrow_mut().insert(reply);
        let awaits = self.awaits.clone();

        let outcome = self.engine.with_context(|ctx| -> RunnerResult<Option<JsValue>> {
            let value = eval_value(&ctx, source).map_err(|e| caught(&ctx, e))?;
            if !is_thenable(&value) {
                return Ok(Some(JsValue::from_js(&ctx, &value)));
            }

            let fulfilled = awaits.clone();
            let rejected = awaits;
            subscribe(
                &ctx,
                &value,
                move |ctx, value| {
                    let value = JsValue::from_js(ctx, &value);
                    fulfilled.borrow_mut().settle(id, Ok(value));
                },
                move |ctx, reason| {
                    let reason = JsValue::from_js(ctx, &reason);
                    rejected.borrow_mut().settle(id, Err(RunnerError::Rejection { reason }));
                },
            )
            .map_err(|e| caught(&ctx, e))?;
            Ok(None)
        });

        match outcome {
            Ok(Some(value)) => self.awaits.borrow_mut().settle(id, Ok(value)),
            Ok(None) => {}
            Err(e) => self.awaits.borrow_mut().settle(id, Err(e)),
        }
        self.engine.run_pending_jobs();
    }
}

/// Execute a closure, turning a panic into an error message
pub(crate) fn execute_with_panic_handler<F, R>(f: F) -> Result<R, String>
where
    F: FnOnce() -> R,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => Ok(result),
        Err(panic) => {
            let message = if let Some(s) = panic.downcast_ref::<&str>() {
                format!("Worker panic: {}", s)
            } else if let Some(s) = panic.downcast_ref::<String>() {
                format!("Worker panic: {}", s)
            } else {
                "Worker panic: unknown error".to_string()
            };
            error!("{}", message);
            Err(message)
        }
    }
}
