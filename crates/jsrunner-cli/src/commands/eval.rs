//! Eval command - evaluate an expression in a session.

use anyhow::Result;
use clap::Args;
use jsrunner::Session;

use super::print_value;
use crate::config::Config;

#[derive(Args)]
pub struct EvalCommand {
    /// Source to evaluate
    pub expr: String,

    /// Enable fetchText/fetchJSON
    #[arg(long)]
    pub allow_net: bool,
}

impl EvalCommand {
    pub fn run(&self, config: &Config) -> Result<()> {
        let mut session = Session::builder()
            .config(config.runner_config(self.allow_net))
            .build()?;
        let value = session.eval(&self.expr)?;
        print_value(&value)
    }
}
