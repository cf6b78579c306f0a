//! jsrunner - embedded JavaScript runner built on QuickJS.
//!
//! This crate runs JavaScript from Rust in two modes:
//!
//! - [`Session`]: synchronous evaluation on the calling thread. Scripts are
//!   loaded, global functions are called, and promise jobs are drained before
//!   every call returns.
//! - [`EventLoopRunner`]: a dedicated loop thread that owns the engine and
//!   serializes every interaction with it. Host threads submit closures,
//!   schedule timers, pump a script to completion, or block on a promise.
//!
//! Both modes share a registry of host globals ([`HostValue`]) and convert
//! script results into [`JsValue`] snapshots that are safe to send between
//! threads.
//!
//! # Example
//!
//! ```no_run
//! use jsrunner::{EventLoopRunner, HostValue};
//!
//! let runner = EventLoopRunner::new().unwrap();
//! runner.set_global("double", HostValue::function(|args| {
//!     Ok((jsrunner::export_int(args.first()) * 2).into())
//! }));
//! runner.start().unwrap();
//!
//! let value = runner
//!     .await_promise("new Promise(r => setTimeout(() => r(double(21)), 10))")
//!     .unwrap();
//! assert_eq!(value.export_int(), 42);
//! runner.stop();
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                   EventLoopRunner                        │
//! │  run / run_on_loop / set_timeout / run_async / await     │
//! └──────────────────────────────────────────────────────────┘
//!                           │ Command channel
//!                           ↓
//! ┌──────────────────────────────────────────────────────────┐
//! │                 Loop worker thread                       │
//! │  - tasks, then due timers (ordered by time, sequence)    │
//! │  - promise jobs drained after every callback             │
//! │  - drain on stop, interrupt on abort                     │
//! └──────────────────────────────────────────────────────────┘
//!                           ↓
//! ┌──────────────────────────────────────────────────────────┐
//! │                   ScriptEngine                           │
//! │  QuickJS runtime + context, console, timers, fetch       │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod config;
mod console;
pub mod engine;
pub mod error;
mod event_loop;
pub mod fetch;
pub mod host;
pub mod runner;
pub mod session;
mod timers;
pub mod value;
mod worker;

pub use config::{DEFAULT_FETCH_TIMEOUT, RunnerConfig, WebAccessConfig};
pub use engine::{ScriptEngine, is_call_path};
pub use error::{InvocationFailure, RunnerError, RunnerResult, ScriptException, USAGE_ERROR_NAME};
pub use fetch::{FETCH_JSON, FETCH_TEXT};
pub use host::{HostFunction, HostValue};
pub use runner::{
    EventLoopRunner, EventLoopStats, EventLoopStatsSnapshot, LoopState, RunnerBuilder,
    TimerHandle,
};
pub use session::{Session, SessionBuilder};
pub use value::{JsType, JsValue, export, export_bool, export_float, export_int, export_string};

pub mod prelude {
    pub use crate::config::{RunnerConfig, WebAccessConfig};
    pub use crate::engine::ScriptEngine;
    pub use crate::error::{InvocationFailure, RunnerError, RunnerResult, ScriptException};
    pub use crate::host::{HostFunction, HostValue};
    pub use crate::runner::{EventLoopRunner, LoopState, RunnerBuilder, TimerHandle};
    pub use crate::session::{Session, SessionBuilder};
    pub use crate::value::{JsType, JsValue};
}
