//! Single-threaded script engine
//!
//! [`ScriptEngine`] owns one QuickJS runtime and context. It is not `Send`:
//! a [`Session`](crate::Session) keeps it on the caller's thread and an
//! [`EventLoopRunner`](crate::EventLoopRunner) keeps it on its worker.
//!
//! # Example
//!
//! ```no_run
//! use jsrunner::{RunnerConfig, ScriptEngine};
//!
//! let engine = ScriptEngine::new(&RunnerConfig::default()).unwrap();
//! let value = engine.eval("6 * 7").unwrap();
//! assert_eq!(value.export_int(), 42);
//! ```

use crate::config::RunnerConfig;
use crate::error::{InvocationFailure, RunnerError, RunnerResult, ScriptException};
use crate::host::HostValue;
use crate::value::JsValue;
use crate::{console, fetch, value};
use regex::Regex;
use rquickjs::context::EvalOptions;
use rquickjs::convert::Coerced;
use rquickjs::function::{Rest, This};
use rquickjs::{Context, Ctx, Function, IntoJs, Object, Runtime, Value};
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use tracing::warn;

/// `name` or `a.b.c` where every segment is an identifier.
static CALL_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*(\.[A-Za-z_$][A-Za-z0-9_$]*)*$")
        .unwrap_or_else(|e| panic!("invalid call path pattern: {e}"))
});

/// Whether `path` names a function the engine can look up on the global object.
pub fn is_call_path(path: &str) -> bool {
    CALL_PATH.is_match(path)
}

/// A QuickJS runtime plus its single context.
pub struct ScriptEngine {
    context: Context,
    runtime: Runtime,
    interrupt: Arc<AtomicBool>,
}

impl ScriptEngine {
    /// Create an engine with `console` and the fetch helpers installed.
    pub fn new(config: &RunnerConfig) -> RunnerResult<Self> {
        let runtime = Runtime::new().map_err(RunnerError::engine)?;
        if let Some(limit) = config.memory_limit {
            runtime.set_memory_limit(limit);
        }
        if let Some(size) = config.max_stack_size {
            runtime.set_max_stack_size(size);
        }

        let interrupt = Arc::new(AtomicBool::new(false));
        let flag = interrupt.clone();
        runtime.set_interrupt_handler(Some(Box::new(move || flag.load(Ordering::Relaxed))));

        let context = Context::full(&runtime).map_err(RunnerError::engine)?;
        context
            .with(|ctx| {
                value::install(&ctx)?;
                console::install(&ctx)?;
                fetch::install(&ctx, config.web_access.as_ref())
            })
            .map_err(RunnerError::engine)?;

        Ok(Self {
            context,
            runtime,
            interrupt,
        })
    }

    /// Run `f` inside the context.
    ///
    /// Promise jobs queued by `f` stay queued; call
    /// [`run_pending_jobs`](Self::run_pending_jobs) afterwards.
    pub fn with_context<F, R>(&self, f: F) -> R
    where
        F: for<'js> FnOnce(Ctx<'js>) -> R,
    {
        self.context.with(f)
    }

    /// Bind `value` to the global `name`.
    pub fn bind_global(&self, name: &str, value: HostValue) -> RunnerResult<()> {
        self.context.with(|ctx| {
            let converted = value.into_js(&ctx).map_err(|err| caught(&ctx, err))?;
            ctx.globals().set(name, converted).map_err(|err| caught(&ctx, err))
        })
    }

    /// Bind every entry of `globals`.
    pub fn bind_globals<'a, I>(&self, globals: I) -> RunnerResult<()>
    where
        I: IntoIterator<Item = (&'a String, &'a HostValue)>,
    {
        for (name, value) in globals {
            self.bind_global(name, value.clone())?;
        }
        Ok(())
    }

    /// Evaluate `source` as a classic script and snapshot the completion value.
    pub fn eval(&self, source: &str) -> RunnerResult<JsValue> {
        self.context.with(|ctx| {
            let value = eval_value(&ctx, source).map_err(|err| caught(&ctx, err))?;
            Ok(JsValue::from_js(&ctx, &value))
        })
    }

    /// Call the function at `path` (`render`, `app.render`) with `this` bound
    /// to its owner. Arguments are converted, never spliced into source.
    pub fn call(&self, path: &str, args: &[HostValue]) -> RunnerResult<JsValue> {
        if !is_call_path(path) {
            return Err(not_callable(path, "is not a valid function name"));
        }

        self.context.with(|ctx| {
            let (owner, callee) =
                resolve_path(&ctx, path).map_err(|err| caught(&ctx, err).into_invocation(path))?;
            let Some(function) = callee.as_function().cloned() else {
                return Err(not_callable(path, "is not a function"));
            };

            let mut converted = Vec::with_capacity(args.len());
            for arg in args {
                converted.push(arg.clone().into_js(&ctx).map_err(|err| caught(&ctx, err))?);
            }

            let result: Value = function
                .call((This(owner), Rest(converted)))
                .map_err(|err| caught(&ctx, err).into_invocation(path))?;
            Ok(JsValue::from_js(&ctx, &result))
        })
    }

    /// Run queued promise jobs until none remain. Returns how many ran.
    ///
    /// A job that throws is logged and skipped.
    pub fn run_pending_jobs(&self) -> usize {
        let mut ran = 0;
        loop {
            if self.is_interrupted() {
                break;
            }
            match self.runtime.execute_pending_job() {
                Ok(true) => ran += 1,
                Ok(false) => break,
                Err(_) => {
                    ran += 1;
                    let exception = self.context.with(|ctx| exception_from_value(&ctx, ctx.catch()));
                    warn!(error = %exception, "promise job failed");
                }
            }
        }
        ran
    }

    pub fn has_pending_jobs(&self) -> bool {
        self.runtime.is_job_pending()
    }

    /// Flag polled by the interrupt handler. Setting it aborts running script.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.interrupt.clone()
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::Relaxed)
    }

    /// Run the garbage collector.
    pub fn collect_garbage(&self) {
        self.runtime.run_gc();
    }
}

/// Classic-script evaluation in sloppy mode.
pub(crate) fn eval_value<'js>(ctx: &Ctx<'js>, source: &str) -> rquickjs::Result<Value<'js>> {
    let mut options = EvalOptions::default();
    options.strict = false;
    ctx.eval_with_options(source, options)
}

fn resolve_path<'js>(ctx: &Ctx<'js>, path: &str) -> rquickjs::Result<(Value<'js>, Value<'js>)> {
    let mut owner = ctx.globals().into_value();
    let mut current = owner.clone();

    for segment in path.split('.') {
        let Some(object) = current.as_object() else {
            return Ok((owner, Value::new_undefined(ctx.clone())));
        };
        let next: Value = object.get(segment)?;
        owner = current;
        current = next;
    }

    Ok((owner, current))
}

fn not_callable(path: &str, detail: &str) -> RunnerError {
    RunnerError::Invocation {
        function: path.to_string(),
        reason: InvocationFailure::NotCallable(format!("{} {}", path, detail)),
    }
}

/// Map an engine error, taking the pending exception when there is one.
pub(crate) fn caught(ctx: &Ctx<'_>, err: rquickjs::Error) -> RunnerError {
    if err.is_exception() {
        RunnerError::from_exception(exception_from_value(ctx, ctx.catch()))
    } else {
        RunnerError::engine(err)
    }
}

/// Read `name`, `message` and `stack` off a thrown value.
pub(crate) fn exception_from_value<'js>(ctx: &Ctx<'js>, thrown: Value<'js>) -> ScriptException {
    let Some(object) = thrown.as_object() else {
        return ScriptException::new("", JsValue::from_js(ctx, &thrown).export_string());
    };

    let text = |object: &Object<'js>, key: &str| -> Option<String> {
        object
            .get::<_, Option<Coerced<String>>>(key)
            .ok()
            .flatten()
            .map(|coerced| coerced.0)
    };

    match text(object, "message") {
        Some(message) => ScriptException {
            name: text(object, "name").unwrap_or_default(),
            message,
            stack: text(object, "stack").filter(|stack| !stack.is_empty()),
        },
        None => ScriptException::new("", JsValue::from_js(ctx, &thrown).export_string()),
    }
}

/// Whether `value` has a callable `then`.
pub(crate) fn is_thenable(value: &Value<'_>) -> bool {
    value
        .as_object()
        .and_then(|object| object.get::<_, Value>("then").ok())
        .is_some_and(|then| then.is_function())
}

/// Attach fulfilment and rejection continuations to a thenable.
pub(crate) fn subscribe<'js, F, R>(
    ctx: &Ctx<'js>,
    thenable: &Value<'js>,
    on_fulfilled: F,
    on_rejected: R,
) -> rquickjs::Result<()>
where
    F: FnOnce(&Ctx<'js>, Value<'js>) + 'js,
    R: FnOnce(&Ctx<'js>, Value<'js>) + 'js,
{
    let Some(object) = thenable.as_object() else {
        return Ok(());
    };
    let then: Function = object.get("then")?;

    let fulfilled = Cell::new(Some(on_fulfilled));
    let resolve = Function::new(ctx.clone(), move |ctx: Ctx<'js>, args: Rest<Value<'js>>| {
        if let Some(callback) = fulfilled.take() {
            callback(&ctx, first_or_undefined(&ctx, args));
        }
    })?;

    let rejected = Cell::new(Some(on_rejected));
    let reject = Function::new(ctx.clone(), move |ctx: Ctx<'js>, args: Rest<Value<'js>>| {
        if let Some(callback) = rejected.take() {
            callback(&ctx, first_or_undefined(&ctx, args));
        }
    })?;

    then.call::<_, Value>((This(object.clone()), resolve, reject))?;
    Ok(())
}

fn first_or_undefined<'js>(ctx: &Ctx<'js>, args: Rest<Value<'js>>) -> Value<'js> {
    args.0
        .into_iter()
        .next()
        .unwrap_or_else(|| Value::new_undefined(ctx.clone()))
}
