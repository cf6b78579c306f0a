//! Synchronous session
//!
//! A [`Session`] evaluates scripts on the calling thread. It keeps a registry
//! of host globals, binds each one as soon as it is set, and drains promise
//! jobs before every operation returns.
//!
//! # Example
//!
//! ```no_run
//! use jsrunner::{HostValue, Session};
//!
//! let mut session = Session::new().unwrap();
//! session.set_global("greeting", "hello").unwrap();
//! session.load_script_str("function shout(s) { return greeting + ' ' + s.toUpperCase(); }").unwrap();
//! let value = session.call("shout", &[HostValue::from("world")]).unwrap();
//! assert_eq!(value.export_string(), "hello WORLD");
//! ```

use crate::config::{RunnerConfig, WebAccessConfig};
use crate::engine::ScriptEngine;
use crate::error::{RunnerError, RunnerResult};
use crate::host::HostValue;
use crate::value::JsValue;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Builder for a [`Session`] with custom configuration
#[derive(Debug, Default)]
pub struct SessionBuilder {
    config: RunnerConfig,
    globals: BTreeMap<String, HostValue>,
}

impl SessionBuilder {
    /// Replace the engine configuration.
    pub fn config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a global bound at construction.
    pub fn global(mut self, name: impl Into<String>, value: impl Into<HostValue>) -> Self {
        self.globals.insert(name.into(), value.into());
        self
    }

    /// Enable `fetchText`/`fetchJSON`.
    pub fn web_access(mut self, web: WebAccessConfig) -> Self {
        self.config.web_access = Some(web);
        self
    }

    pub fn build(self) -> RunnerResult<Session> {
        let engine = ScriptEngine::new(&self.config)?;
        engine.bind_globals(&self.globals)?;
        Ok(Session {
            engine,
            globals: self.globals,
        })
    }
}

/// Script session bound to the thread that created it
pub struct Session {
    engine: ScriptEngine,
    globals: BTreeMap<String, HostValue>,
}

impl Session {
    /// Create a session with default configuration.
    pub fn new() -> RunnerResult<Self> {
        Self::builder().build()
    }

    /// Create a session with `globals` bound.
    pub fn with_globals<I, K, V>(globals: I) -> RunnerResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<HostValue>,
    {
        globals
            .into_iter()
            .fold(Self::builder(), |builder, (name, value)| builder.global(name, value))
            .build()
    }

    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    /// Record `value` under `name` and bind it now. The last write wins.
    pub fn set_global(&mut self, name: impl Into<String>, value: impl Into<HostValue>) -> RunnerResult<()> {
        let name = name.into();
        let value = value.into();
        self.engine.bind_global(&name, value.clone())?;
        self.globals.insert(name, value);
        Ok(())
    }

    /// Globals recorded so far.
    pub fn globals(&self) -> &BTreeMap<String, HostValue> {
        &self.globals
    }

    /// Evaluate the file at `path`.
    pub fn load_script(&mut self, path: impl AsRef<Path>) -> RunnerResult<()> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| RunnerError::Resource {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), bytes = source.len(), "loading script");
        self.load_script_str(&source)
    }

    /// Evaluate `source` for its side effects.
    pub fn load_script_str(&mut self, source: &str) -> RunnerResult<()> {
        self.eval(source).map(drop)
    }

    /// Evaluate `source` and return its completion value.
    pub fn eval(&mut self, source: &str) -> RunnerResult<JsValue> {
        let result = self.engine.eval(source);
        self.engine.run_pending_jobs();
        result
    }

    /// Call the global function at `name` (`render`, `app.render`).
    pub fn call(&mut self, name: &str, args: &[HostValue]) -> RunnerResult<JsValue> {
        let result = self.engine.call(name, args);
        self.engine.run_pending_jobs();
        result
    }

    /// The underlying engine.
    pub fn engine(&self) -> &ScriptEngine {
        &self.engine
    }
}
