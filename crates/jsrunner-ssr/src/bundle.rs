//! Bundling a TSX entry and everything it imports into one script.
//!
//! The output is a self-contained IIFE holding a small module registry. Each
//! module becomes a factory keyed by its URL; the entry factory is required
//! last, which runs the whole graph in dependency order.

use crate::error::{BundleError, BundleResult, ModuleError, Side};
use crate::resolve::{DEFAULT_REACT_VERSION, ModuleResolver, RemoteResolver};
use crate::transform::{self, SourceKind, TransformOptions, js_string};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

/// Registry helpers shared by every module factory.
const RUNTIME: &str = r#"var __modules = Object.create(null);
var __cache = Object.create(null);
function __require(id) {
  var cached = __cache[id];
  if (cached) return cached;
  var factory = __modules[id];
  if (!factory) throw new Error("module not found: " + id);
  var exports = Object.create(null);
  Object.defineProperty(exports, Symbol.toStringTag, { value: "Module" });
  __cache[id] = exports;
  factory(exports, __require);
  return exports;
}
function __export(target, getters) {
  for (var name in getters) {
    Object.defineProperty(target, name, { enumerable: true, get: getters[name] });
  }
}
function __exportStar(target, source) {
  Object.keys(source).forEach(function (name) {
    if (name === "default" || Object.prototype.hasOwnProperty.call(target, name)) return;
    Object.defineProperty(target, name, { enumerable: true, get: function () { return source[name]; } });
  });
}
function __dynamicImport(specifier) {
  return Promise.reject(new Error("dynamic import of " + String(specifier) + " is not bundled"));
}
"#;

/// Builds one bundle from an entry source
#[derive(Debug, Clone)]
pub struct Bundler {
    resolver: Arc<dyn ModuleResolver>,
    options: TransformOptions,
    base_url: Option<Url>,
}

impl Bundler {
    pub fn new(resolver: Arc<dyn ModuleResolver>) -> Self {
        Self {
            resolver,
            options: TransformOptions::default(),
            base_url: None,
        }
    }

    pub fn options(mut self, options: TransformOptions) -> Self {
        self.options = options;
        self
    }

    /// Directory URL relative imports of the entry resolve against.
    /// Default: `file:///`.
    pub fn base_url(mut self, base_url: Url) -> Self {
        self.base_url = Some(base_url);
        self
    }

    /// URL the entry module is registered under.
    pub fn entry_url(&self, side: Side) -> Result<Url, ModuleError> {
        let joined = match &self.base_url {
            Some(base) => base.join(side.entry_file()),
            None => Url::parse(&format!("file:///{}", side.entry_file())),
        };
        joined.map_err(|_| ModuleError::Unresolved {
            specifier: side.entry_file().to_string(),
            importer: self.base_url.as_ref().map(Url::to_string),
        })
    }

    /// Bundle `entry_source` (TSX) and its import graph.
    pub fn bundle(&self, entry_source: &str, side: Side) -> Result<String, ModuleError> {
        let entry = self.entry_url(side)?;
        let _span = tracing::debug_span!("bundle", %side, entry = %entry).entered();

        let mut queue = VecDeque::from([entry.clone()]);
        let mut seen = HashSet::from([entry.clone()]);
        let mut factories = Vec::new();

        while let Some(url) = queue.pop_front() {
            let (source, kind) = if url == entry {
                (Arc::<str>::from(entry_source), SourceKind::Tsx)
            } else {
                (self.resolver.load(&url)?, SourceKind::from_path(url.path()))
            };

            let parsed = transform::prepare(url.as_str(), &source, kind, &self.options)?;
            let mut resolved = HashMap::new();
            for specifier in parsed.dependencies() {
                let target = self.resolver.resolve(specifier, Some(&url))?;
                if seen.insert(target.clone()) {
                    queue.push_back(target.clone());
                }
                resolved.insert(specifier.clone(), target.to_string());
            }

            let code = transform::emit(parsed, &resolved, &self.options)?;
            debug!(module = %url, bytes = code.len(), "module compiled");
            factories.push((url.to_string(), code));
        }

        Ok(assemble(&factories, entry.as_str()))
    }
}

fn assemble(factories: &[(String, String)], entry: &str) -> String {
    let size = RUNTIME.len() + factories.iter().map(|(id, code)| id.len() + code.len() + 64).sum::<usize>();
    let mut out = String::with_capacity(size);
    out.push_str("(function () {\n");
    out.push_str(RUNTIME);
    for (id, code) in factories {
        out.push_str("__modules[");
        out.push_str(&js_string(id));
        out.push_str("] = function (__exports, __require) {\n\"use strict\";\n");
        out.push_str(code);
        out.push_str("\n};\n");
    }
    out.push_str("__require(");
    out.push_str(&js_string(entry));
    out.push_str(");\n})();\n");
    out
}

/// Inputs for [`build_bundles`]
#[derive(Debug, Clone, Default)]
pub struct BundleOptions {
    /// TSX source of the server entry.
    pub ssr_entry: String,
    /// TSX source of the client entry.
    pub client_entry: String,
    /// Default: [`DEFAULT_REACT_VERSION`]. Ignored with a custom resolver.
    pub react_version: Option<String>,
    pub transform: TransformOptions,
    pub base_url: Option<Url>,
    /// Default: a [`RemoteResolver`] for `react_version`.
    pub resolver: Option<Arc<dyn ModuleResolver>>,
}

/// Server and client bundle built from the same options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundles {
    pub ssr: String,
    pub client: String,
}

/// Build the server bundle and the client bundle.
///
/// Both share one resolver, so modules fetched for the server bundle are
/// reused by the client bundle.
pub fn build_bundles(options: &BundleOptions) -> BundleResult<Bundles> {
    if options.ssr_entry.trim().is_empty() {
        return Err(BundleError::MissingEntry(Side::Server));
    }
    if options.client_entry.trim().is_empty() {
        return Err(BundleError::MissingEntry(Side::Client));
    }

    let resolver = match &options.resolver {
        Some(resolver) => resolver.clone(),
        None => {
            let version = options.react_version.as_deref().unwrap_or(DEFAULT_REACT_VERSION);
            Arc::new(RemoteResolver::new(version)) as Arc<dyn ModuleResolver>
        }
    };

    let mut bundler = Bundler::new(resolver).options(options.transform.clone());
    if let Some(base_url) = &options.base_url {
        bundler = bundler.base_url(base_url.clone());
    }

    let build = |source: &str, side: Side| {
        bundler
            .bundle(source, side)
            .map_err(|source| BundleError::Build { side, source })
    };
    let ssr = build(&options.ssr_entry, Side::Server)?;
    let client = build(&options.client_entry, Side::Client)?;

    info!(ssr_bytes = ssr.len(), client_bytes = client.len(), "bundles built");
    Ok(Bundles { ssr, client })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::MemoryResolver;

    #[test]
    fn test_entry_url() {
        let bundler = Bundler::new(Arc::new(MemoryResolver::new()));
        assert_eq!(bundler.entry_url(Side::Server).unwrap().as_str(), "file:///app-ssr.tsx");

        let bundler = bundler.base_url(Url::parse("file:///srv/app/").unwrap());
        assert_eq!(
            bundler.entry_url(Side::Client).unwrap().as_str(),
            "file:///srv/app/app-client.tsx"
        );
    }

    #[test]
    fn test_assemble_requires_entry_last() {
        let out = assemble(
            &[
                ("file:///a.js".to_string(), "A".to_string()),
                ("file:///b.js".to_string(), "B".to_string()),
            ],
            "file:///a.js",
        );
        assert!(out.starts_with("(function () {\n"));
        assert!(out.contains("__modules[\"file:///b.js\"] = function (__exports, __require)"));
        assert!(out.ends_with("__require(\"file:///a.js\");\n})();\n"));
    }

    #[test]
    fn test_missing_entries() {
        let err = build_bundles(&BundleOptions::default()).unwrap_err();
        assert!(matches!(err, BundleError::MissingEntry(Side::Server)));

        let err = build_bundles(&BundleOptions {
            ssr_entry: "export {}".to_string(),
            client_entry: "   ".to_string(),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, BundleError::MissingEntry(Side::Client)));
    }
}
