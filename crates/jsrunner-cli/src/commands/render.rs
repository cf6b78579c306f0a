//! Render command - server-render a React app once.

use anyhow::{Context, Result};
use clap::Args;
use jsrunner_ssr::{SsrApp, SsrAppOptions};
use std::path::PathBuf;

use super::{base_url, read_source, resolver};
use crate::config::Config;

#[derive(Args)]
pub struct RenderCommand {
    /// Server entry (TSX) that assigns globalThis.renderApp
    #[arg(long)]
    pub ssr: PathBuf,

    /// Client entry (TSX) that hydrates the markup
    #[arg(long)]
    pub client: PathBuf,

    /// Props passed to renderApp, as JSON
    #[arg(long, default_value = "{}")]
    pub props: String,

    /// Script evaluated before the server bundle (repeatable)
    #[arg(long = "polyfill", value_name = "FILE")]
    pub polyfills: Vec<PathBuf>,

    /// React release fetched from esm.sh
    #[arg(long)]
    pub react_version: Option<String>,

    /// Enable fetchText/fetchJSON while rendering
    #[arg(long)]
    pub allow_net: bool,
}

impl RenderCommand {
    pub fn run(&self, config: &Config) -> Result<()> {
        let props: serde_json::Value =
            serde_json::from_str(&self.props).context("--props must be valid JSON")?;
        let polyfills = self
            .polyfills
            .iter()
            .map(|path| read_source(path))
            .collect::<Result<Vec<_>>>()?;

        let mut app = SsrApp::new(SsrAppOptions {
            runner_config: config.runner_config(self.allow_net),
            polyfills,
            ssr_entry: read_source(&self.ssr)?,
            client_entry: read_source(&self.client)?,
            resolver: Some(resolver(config, self.react_version.as_deref())?),
            base_url: Some(base_url(&self.ssr)?),
            ..Default::default()
        })?;

        println!("{}", app.render(props)?);
        Ok(())
    }
}
