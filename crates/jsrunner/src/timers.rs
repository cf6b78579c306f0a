//! Timers API (setTimeout, setInterval, clearTimeout, clearInterval, queueMicrotask)

use crate::event_loop::EventLoop;
use crate::host::throw_error;
use rquickjs::convert::Coerced;
use rquickjs::function::{Opt, Rest};
use rquickjs::{Ctx, FromJs, Function, Persistent, Value};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

const QUEUE_MICROTASK: &str = r#"
globalThis.queueMicrotask = function queueMicrotask(callback) {
    if (typeof callback !== "function") {
        throw new TypeError("queueMicrotask requires a function");
    }
    Promise.resolve().then(() => callback());
};
"#;

pub(crate) fn install<'js>(ctx: &Ctx<'js>, event_loop: Rc<RefCell<EventLoop>>) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    for (name, repeating) in [("setTimeout", false), ("setInterval", true)] {
        let event_loop = event_loop.clone();
        let schedule = Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<f64> {
                let mut args = args.0.into_iter();
                let Some(function) = args.next().and_then(|f| f.into_function()) else {
                    let message = format!("{} requires a function", name);
                    return Err(throw_error(&ctx, "TypeError", &message));
                };
                let delay = delay_arg(&ctx, args.next())?;

                let function = Persistent::save(&ctx, function);
                let extra = args.map(|arg| Persistent::save(&ctx, arg)).collect();
                let id = event_loop
                    .borrow_mut()
                    .schedule_script(function, extra, delay, repeating);
                Ok(id as f64)
            },
        )?;
        globals.set(name, schedule)?;
    }

    for name in ["clearTimeout", "clearInterval"] {
        let event_loop = event_loop.clone();
        let clear = Function::new(ctx.clone(), move |ctx: Ctx<'js>, id: Opt<Value<'js>>| {
            if let Some(id) = id.0.and_then(|id| id_arg(&ctx, id)) {
                event_loop.borrow_mut().cancel(id);
            }
        })?;
        globals.set(name, clear)?;
    }

    ctx.eval::<(), _>(QUEUE_MICROTASK)
}

/// Milliseconds from the second argument; missing, negative and NaN give zero.
fn delay_arg<'js>(ctx: &Ctx<'js>, value: Option<Value<'js>>) -> rquickjs::Result<Duration> {
    let Some(value) = value.filter(|v| !v.is_undefined()) else {
        return Ok(Duration::ZERO);
    };
    let Coerced(millis) = Coerced::<f64>::from_js(ctx, value)?;
    if millis.is_nan() || millis <= 0.0 {
        return Ok(Duration::ZERO);
    }
    Ok(Duration::from_millis(millis.min(u32::MAX as f64) as u64))
}

fn id_arg<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> Option<u64> {
    if value.is_undefined() || value.is_null() {
        return None;
    }
    match Coerced::<f64>::from_js(ctx, value) {
        Ok(Coerced(id)) if id.is_finite() && id >= 1.0 => Some(id as u64),
        Ok(_) => None,
        Err(err) => {
            if err.is_exception() {
                let _ = ctx.catch();
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunnerConfig;
    use crate::engine::ScriptEngine;
    use crate::event_loop::TimerIds;
    use std::time::Instant;

    fn setup() -> (ScriptEngine, Rc<RefCell<EventLoop>>) {
        let engine = ScriptEngine::new(&RunnerConfig::default()).unwrap();
        let event_loop = Rc::new(RefCell::new(EventLoop::new(TimerIds::new())));
        engine.with_context(|ctx| install(&ctx, event_loop.clone())).unwrap();
        (engine, event_loop)
    }

    #[test]
    fn test_set_timeout_queues_script_timer() {
        let (engine, event_loop) = setup();
        let id = engine.eval("setTimeout(() => {}, 25)").unwrap().export_int();
        assert!(id >= 1);
        assert!(event_loop.borrow_mut().has_live_timers());
        assert!(!event_loop.borrow_mut().has_due_timer(Instant::now()));

        engine.eval(&format!("clearTimeout({})", id)).unwrap();
        assert!(!event_loop.borrow_mut().has_live_timers());
        event_loop.borrow_mut().clear();
    }

    #[test]
    fn test_ids_are_distinct_across_kinds() {
        let (engine, event_loop) = setup();
        let a = engine.eval("setTimeout(() => {})").unwrap().export_int();
        let b = engine.eval("setInterval(() => {}, 5)").unwrap().export_int();
        assert_ne!(a, b);
        event_loop.borrow_mut().clear();
    }

    #[test]
    fn test_set_timeout_requires_function() {
        let (engine, event_loop) = setup();
        let err = engine.eval("setTimeout('code', 1)").unwrap_err();
        assert_eq!(err.exception().map(|e| e.name.as_str()), Some("TypeError"));
        assert!(!event_loop.borrow_mut().has_live_timers());
    }

    #[test]
    fn test_clear_ignores_unknown_ids() {
        let (engine, _event_loop) = setup();
        engine.eval("clearTimeout(undefined); clearInterval(999); clearTimeout('x')").unwrap();
    }

    #[test]
    fn test_queue_microtask_runs_as_job() {
        let (engine, _event_loop) = setup();
        engine.eval("var hits = []; queueMicrotask(() => hits.push(1)); hits.push(0)").unwrap();
        engine.run_pending_jobs();
        assert_eq!(engine.eval("hits").unwrap().export(), serde_json::json!([0, 1]));
    }
}
