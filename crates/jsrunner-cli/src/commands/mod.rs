//! CLI command implementations.

pub mod bundle;
pub mod eval;
pub mod render;
pub mod run;

use crate::config::Config;
use anyhow::{Context, Result, anyhow};
use jsrunner::{JsType, JsValue};
use jsrunner_ssr::{ModuleResolver, RemoteResolver};
use std::path::Path;
use std::sync::Arc;
use url::Url;

/// Print a script result: strings raw, other values as JSON, nothing for undefined.
pub(crate) fn print_value(value: &JsValue) -> Result<()> {
    match value.kind() {
        JsType::Undefined => {}
        JsType::String => println!("{}", value.export_string()),
        _ => println!("{}", serde_json::to_string_pretty(value.as_json())?),
    }
    Ok(())
}

pub(crate) fn read_source(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

/// Directory URL that relative imports of `entry` resolve against.
pub(crate) fn base_url(entry: &Path) -> Result<Url> {
    let entry = entry
        .canonicalize()
        .with_context(|| format!("failed to resolve {}", entry.display()))?;
    let dir = entry
        .parent()
        .ok_or_else(|| anyhow!("{} has no parent directory", entry.display()))?;
    Url::from_directory_path(dir).map_err(|()| anyhow!("{} is not an absolute path", dir.display()))
}

/// Resolver for esm.sh React plus the configured aliases.
pub(crate) fn resolver(config: &Config, react_version: Option<&str>) -> Result<Arc<dyn ModuleResolver>> {
    let mut builder = RemoteResolver::builder();
    if let Some(version) = react_version.or(config.bundle.react_version.as_deref()) {
        builder = builder.react_version(version);
    }
    for (specifier, target) in config.aliases()? {
        builder = builder.alias(specifier, target);
    }
    Ok(Arc::new(builder.build()))
}
