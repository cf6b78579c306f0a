//! Bundle command - build the server and client bundles to disk.

use anyhow::{Context, Result};
use clap::Args;
use jsrunner_ssr::{BundleOptions, build_bundles};
use std::path::PathBuf;

use super::{base_url, read_source, resolver};
use crate::config::Config;

#[derive(Args)]
pub struct BundleCommand {
    /// Server entry (TSX) that assigns globalThis.renderApp
    #[arg(long)]
    pub ssr: PathBuf,

    /// Client entry (TSX) that hydrates the markup
    #[arg(long)]
    pub client: PathBuf,

    /// Directory receiving app-ssr.js and app-client.js
    #[arg(long, default_value = "dist")]
    pub out_dir: PathBuf,

    /// React release fetched from esm.sh
    #[arg(long)]
    pub react_version: Option<String>,
}

impl BundleCommand {
    pub fn run(&self, config: &Config) -> Result<()> {
        let options = BundleOptions {
            ssr_entry: read_source(&self.ssr)?,
            client_entry: read_source(&self.client)?,
            base_url: Some(base_url(&self.ssr)?),
            resolver: Some(resolver(config, self.react_version.as_deref())?),
            ..Default::default()
        };
        let bundles = build_bundles(&options)?;

        std::fs::create_dir_all(&self.out_dir)
            .with_context(|| format!("failed to create {}", self.out_dir.display()))?;
        for (name, code) in [("app-ssr.js", &bundles.ssr), ("app-client.js", &bundles.client)] {
            let path = self.out_dir.join(name);
            std::fs::write(&path, code).with_context(|| format!("failed to write {}", path.display()))?;
            println!("{} ({} bytes)", path.display(), code.len());
        }
        Ok(())
    }
}
