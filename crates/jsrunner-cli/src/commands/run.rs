//! Run command - execute a script file on the event loop.

use anyhow::{Context, Result};
use clap::Args;
use jsrunner::EventLoopRunner;
use jsrunner_ssr::{JsxRuntime, SourceKind, TransformOptions, transpile};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use super::{print_value, read_source};
use crate::config::Config;

const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Args)]
pub struct RunCommand {
    /// File to execute (.js, .ts, .jsx, .tsx)
    pub entry: PathBuf,

    /// Arguments exposed to the script as `ARGS`
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// Treat the script's value as a promise and print what it settles to
    #[arg(long = "await")]
    pub await_result: bool,

    /// Timeout in milliseconds (0 = no timeout)
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Enable fetchText/fetchJSON
    #[arg(long)]
    pub allow_net: bool,
}

impl RunCommand {
    pub fn run(&self, config: &Config) -> Result<()> {
        let source = read_source(&self.entry)?;
        let code = self.prepare_source(&source)?;

        let runner = EventLoopRunner::builder()
            .config(config.runner_config(self.allow_net))
            .global("ARGS", self.args.clone())
            .global("SCRIPT_PATH", self.entry.display().to_string())
            .build()?;
        runner.start()?;

        let timeout_ms = self
            .timeout_ms
            .or(config.runtime.timeout_ms)
            .unwrap_or(DEFAULT_TIMEOUT_MS);

        let result = if self.await_result {
            runner.await_promise(&code)
        } else if timeout_ms == 0 {
            runner.run_async(&code)
        } else {
            runner.run_async_with_timeout(&code, Duration::from_millis(timeout_ms))
        };
        runner.stop();

        let value = result.with_context(|| format!("failed to run {}", self.entry.display()))?;
        debug!(stats = ?runner.stats().snapshot(), "script finished");
        print_value(&value)
    }

    /// Strip types and lower JSX for non-JavaScript sources.
    fn prepare_source(&self, source: &str) -> Result<String> {
        let kind = SourceKind::from_path(&self.entry.to_string_lossy());
        if kind == SourceKind::JavaScript {
            return Ok(source.to_string());
        }

        let options = TransformOptions::default().jsx(JsxRuntime::classic()).minify(false);
        transpile(source, kind, &options).map_err(|e| anyhow::anyhow!("Transpilation error: {}", e))
    }
}
