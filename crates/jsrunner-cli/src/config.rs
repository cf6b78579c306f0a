//! Configuration file parsing for jsrunner.toml.

use anyhow::{Context, Result, anyhow};
use jsrunner::{RunnerConfig, WebAccessConfig};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_NAMES: &[&str] = &["jsrunner.toml", ".jsrunner.toml"];

/// Main configuration structure.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Engine limits and run defaults
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Network access for fetchText/fetchJSON
    #[serde(default)]
    pub net: NetConfig,

    /// Bundling settings
    #[serde(default)]
    pub bundle: BundleConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Heap limit in bytes
    pub memory_limit: Option<usize>,

    /// Stack limit in bytes
    pub max_stack_size: Option<usize>,

    /// Default `run` timeout (0 = no timeout)
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetConfig {
    /// Enable fetchText/fetchJSON
    #[serde(default)]
    pub allow: bool,

    /// Per-request timeout
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BundleConfig {
    /// React release fetched from esm.sh
    pub react_version: Option<String>,

    /// Extra bare specifier → URL aliases
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
}

impl Config {
    /// Engine configuration; `allow_net` forces network access on.
    pub fn runner_config(&self, allow_net: bool) -> RunnerConfig {
        let mut config = RunnerConfig::new();
        if let Some(bytes) = self.runtime.memory_limit {
            config = config.memory_limit(bytes);
        }
        if let Some(bytes) = self.runtime.max_stack_size {
            config = config.max_stack_size(bytes);
        }
        if allow_net || self.net.allow {
            let mut web = WebAccessConfig::new();
            if let Some(ms) = self.net.timeout_ms {
                web = web.timeout(Duration::from_millis(ms));
            }
            config = config.web_access(web);
        }
        config
    }

    /// Parsed `[bundle.aliases]`.
    pub fn aliases(&self) -> Result<Vec<(String, url::Url)>> {
        self.bundle
            .aliases
            .iter()
            .map(|(specifier, target)| {
                let url = url::Url::parse(target)
                    .with_context(|| format!("invalid alias target for {:?}: {}", specifier, target))?;
                Ok((specifier.clone(), url))
            })
            .collect()
    }
}

/// Load configuration from `path`, or from the nearest config file.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config_path = match path {
        Some(path) if !path.exists() => {
            return Err(anyhow!("config file {} does not exist", path.display()));
        }
        Some(path) => Some(path.to_path_buf()),
        None => std::env::current_dir().ok().and_then(|cwd| find_config_file(&cwd)),
    };

    match config_path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .map_err(|e| anyhow!("Failed to parse {}: {}", path.display(), e))?;
            tracing::debug!(path = %path.display(), "loaded config");
            Ok(config)
        }
        None => Ok(Config::default()),
    }
}

/// Search `start` and its ancestors for a configuration file.
fn find_config_file(start: &Path) -> Option<PathBuf> {
    start.ancestors().find_map(|dir| {
        CONFIG_NAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(!config.net.allow);
        assert!(config.bundle.aliases.is_empty());
        let runner = config.runner_config(false);
        assert!(!runner.web_access_enabled());
        assert_eq!(runner.memory_limit, None);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[runtime]
memory_limit = 33554432
max_stack_size = 1048576
timeout_ms = 2500

[net]
allow = true
timeout_ms = 3000

[bundle]
react_version = "18.2.0"

[bundle.aliases]
"lodash-es" = "https://esm.sh/lodash-es@4.17.21"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.runtime.timeout_ms, Some(2500));
        assert_eq!(config.bundle.react_version.as_deref(), Some("18.2.0"));

        let runner = config.runner_config(false);
        assert_eq!(runner.memory_limit, Some(33554432));
        assert_eq!(runner.max_stack_size, Some(1048576));
        assert!(runner.web_access_enabled());

        let aliases = config.aliases().unwrap();
        assert_eq!(aliases[0].0, "lodash-es");
        assert_eq!(aliases[0].1.as_str(), "https://esm.sh/lodash-es@4.17.21");
    }

    #[test]
    fn test_flag_enables_network() {
        assert!(Config::default().runner_config(true).web_access_enabled());
    }

    #[test]
    fn test_invalid_alias_is_reported() {
        let config: Config = toml::from_str("[bundle.aliases]\nbroken = \"not a url\"").unwrap();
        let err = config.aliases().unwrap_err();
        assert!(err.to_string().contains("broken"), "{err}");
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(toml::from_str::<Config>("[runtime]\nmemory = 1").is_err());
    }

    #[test]
    fn test_find_config_in_ancestors() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("jsrunner.toml"), "[net]\nallow = true\n").unwrap();

        let found = find_config_file(&nested).unwrap();
        assert_eq!(found, dir.path().join("jsrunner.toml"));

        let config = load_config(Some(&found)).unwrap();
        assert!(config.net.allow);
    }

    #[test]
    fn test_missing_explicit_config_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&dir.path().join("nope.toml"))).is_err());
    }
}
