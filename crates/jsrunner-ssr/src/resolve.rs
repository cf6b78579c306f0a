//! Module resolution and loading.
//!
//! Specifiers resolve in this order:
//!
//! 1. exact alias (`react` → `https://esm.sh/react@18.3.1?dev`)
//! 2. absolute `http(s)://` URLs, used as is
//! 3. `./`, `../` and `/` joined against the importing module's URL
//!
//! Anything else is unresolved. `file:` URLs additionally probe the usual
//! source extensions and `index` files.

use crate::error::ModuleError;
use dashmap::DashMap;
use parking_lot::Mutex;
use reqwest::blocking::Client;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// React version used when none is configured.
pub const DEFAULT_REACT_VERSION: &str = "18.3.1";

/// CDN serving npm packages as ES modules.
pub const ESM_CDN: &str = "https://esm.sh";

const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(15);

const PROBE_EXTENSIONS: &[&str] = &["tsx", "ts", "jsx", "js", "mjs"];

/// Finds and loads the modules a bundle is built from
pub trait ModuleResolver: Send + Sync + fmt::Debug {
    /// Resolve `specifier` as written in `importer` (None for the entry).
    fn resolve(&self, specifier: &str, importer: Option<&Url>) -> Result<Url, ModuleError>;

    /// Source text of a resolved module.
    fn load(&self, url: &Url) -> Result<Arc<str>, ModuleError>;
}

/// Aliases mapping React's bare specifiers to esm.sh development builds.
pub fn react_aliases(version: &str) -> BTreeMap<String, Url> {
    let targets = [
        ("react", format!("react@{}", version)),
        ("react/jsx-runtime", format!("react@{}/jsx-runtime", version)),
        ("react/jsx-dev-runtime", format!("react@{}/jsx-dev-runtime", version)),
        ("react-dom", format!("react-dom@{}", version)),
        ("react-dom/server", format!("react-dom@{}/server", version)),
        ("react-dom/client", format!("react-dom@{}/client", version)),
    ];

    let mut aliases = BTreeMap::new();
    for (specifier, path) in targets {
        let target = format!("{}/{}?dev", ESM_CDN, path);
        match Url::parse(&target) {
            Ok(url) => {
                aliases.insert(specifier.to_string(), url);
            }
            Err(e) => warn!(specifier, target = %target, error = %e, "skipping invalid alias"),
        }
    }
    aliases
}

fn unresolved(specifier: &str, importer: Option<&Url>) -> ModuleError {
    ModuleError::Unresolved {
        specifier: specifier.to_string(),
        importer: importer.map(Url::to_string),
    }
}

fn resolve_specifier(
    aliases: &BTreeMap<String, Url>,
    specifier: &str,
    importer: Option<&Url>,
) -> Result<Url, ModuleError> {
    if let Some(target) = aliases.get(specifier) {
        return Ok(target.clone());
    }
    if specifier.starts_with("http://") || specifier.starts_with("https://") {
        return Url::parse(specifier).map_err(|_| unresolved(specifier, importer));
    }

    let relative = specifier.starts_with("./") || specifier.starts_with("../") || specifier.starts_with('/');
    match importer {
        Some(base) if relative => base.join(specifier).map_err(|_| unresolved(specifier, importer)),
        _ => Err(unresolved(specifier, importer)),
    }
}

/// First of `url`, `url.<ext>` or `url/index.<ext>` that `exists`; `url` itself otherwise.
fn probe(url: Url, exists: impl Fn(&Url) -> bool) -> Url {
    if url.query().is_some() || exists(&url) {
        return url;
    }

    let path = url.path().trim_end_matches('/').to_string();
    let candidates = PROBE_EXTENSIONS
        .iter()
        .map(|ext| format!("{}.{}", path, ext))
        .chain(PROBE_EXTENSIONS.iter().map(|ext| format!("{}/index.{}", path, ext)));
    for candidate in candidates {
        let mut probed = url.clone();
        probed.set_path(&candidate);
        if exists(&probed) {
            return probed;
        }
    }
    url
}

fn file_exists(url: &Url) -> bool {
    url.to_file_path().map(|path| path.is_file()).unwrap_or(false)
}

/// Resolver for `file:` modules and remote `http(s):` modules.
///
/// Loaded sources are cached by URL; clones share the cache and HTTP client.
#[derive(Clone)]
pub struct RemoteResolver {
    aliases: Arc<BTreeMap<String, Url>>,
    cache: Arc<DashMap<Url, Arc<str>>>,
    client: Arc<Mutex<Option<Client>>>,
    timeout: Duration,
}

impl fmt::Debug for RemoteResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteResolver")
            .field("aliases", &self.aliases.keys().collect::<Vec<_>>())
            .field("cached", &self.cache.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for RemoteResolver {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RemoteResolver {
    /// Resolver with React aliases for `react_version`.
    pub fn new(react_version: &str) -> Self {
        Self::builder().react_version(react_version).build()
    }

    pub fn builder() -> RemoteResolverBuilder {
        RemoteResolverBuilder::default()
    }

    pub fn aliases(&self) -> &BTreeMap<String, Url> {
        &self.aliases
    }

    pub fn is_cached(&self, url: &Url) -> bool {
        self.cache.contains_key(url)
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    fn client(&self) -> Result<Client, ModuleError> {
        let mut slot = self.client.lock();
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(ModuleError::Client)?;
        *slot = Some(client.clone());
        Ok(client)
    }

    fn fetch(&self, url: &Url) -> Result<String, ModuleError> {
        debug!(url = %url, "fetching module");
        let fetch_error = |source| ModuleError::Fetch {
            url: url.to_string(),
            source,
        };

        let response = self.client()?.get(url.as_str()).send().map_err(fetch_error)?;
        let status = response.status().as_u16();
        if status >= 400 {
            return Err(ModuleError::Status {
                url: url.to_string(),
                status,
            });
        }
        response.text().map_err(fetch_error)
    }

    fn read(&self, url: &Url) -> Result<String, ModuleError> {
        let read_error = |source| ModuleError::Read {
            url: url.to_string(),
            source,
        };
        let path = url.to_file_path().map_err(|()| {
            read_error(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "not a local file path",
            ))
        })?;
        std::fs::read_to_string(path).map_err(read_error)
    }
}

impl ModuleResolver for RemoteResolver {
    fn resolve(&self, specifier: &str, importer: Option<&Url>) -> Result<Url, ModuleError> {
        let url = resolve_specifier(&self.aliases, specifier, importer)?;
        if url.scheme() == "file" {
            return Ok(probe(url, file_exists));
        }
        Ok(url)
    }

    fn load(&self, url: &Url) -> Result<Arc<str>, ModuleError> {
        if let Some(source) = self.cache.get(url) {
            debug!(url = %url, "module cache hit");
            return Ok(source.clone());
        }

        let source = match url.scheme() {
            "http" | "https" => self.fetch(url)?,
            "file" => self.read(url)?,
            other => return Err(ModuleError::UnsupportedScheme(format!("{}: {}", other, url))),
        };

        let source: Arc<str> = source.into();
        self.cache.insert(url.clone(), source.clone());
        Ok(source)
    }
}

/// Builder for [`RemoteResolver`]
#[derive(Debug)]
pub struct RemoteResolverBuilder {
    react_version: String,
    react_aliases: bool,
    aliases: BTreeMap<String, Url>,
    client: Option<Client>,
    timeout: Duration,
}

impl Default for RemoteResolverBuilder {
    fn default() -> Self {
        Self {
            react_version: DEFAULT_REACT_VERSION.to_string(),
            react_aliases: true,
            aliases: BTreeMap::new(),
            client: None,
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

impl RemoteResolverBuilder {
    pub fn react_version(mut self, version: impl Into<String>) -> Self {
        self.react_version = version.into();
        self
    }

    /// Leave React specifiers unaliased.
    pub fn without_react_aliases(mut self) -> Self {
        self.react_aliases = false;
        self
    }

    /// Map a bare specifier to a URL. Overrides the React aliases.
    pub fn alias(mut self, specifier: impl Into<String>, target: Url) -> Self {
        self.aliases.insert(specifier.into(), target);
        self
    }

    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Timeout for a lazily built client. Ignored with [`client`](Self::client).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> RemoteResolver {
        let mut aliases = if self.react_aliases {
            react_aliases(&self.react_version)
        } else {
            BTreeMap::new()
        };
        aliases.extend(self.aliases);

        RemoteResolver {
            aliases: Arc::new(aliases),
            cache: Arc::new(DashMap::new()),
            client: Arc::new(Mutex::new(self.client)),
            timeout: self.timeout,
        }
    }
}

/// Resolver serving modules registered in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryResolver {
    aliases: BTreeMap<String, Url>,
    modules: HashMap<Url, Arc<str>>,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty resolver with the React aliases for `version`.
    pub fn with_react_aliases(version: &str) -> Self {
        Self {
            aliases: react_aliases(version),
            modules: HashMap::new(),
        }
    }

    pub fn alias(mut self, specifier: impl Into<String>, target: Url) -> Self {
        self.aliases.insert(specifier.into(), target);
        self
    }

    pub fn module(mut self, url: Url, source: impl Into<Arc<str>>) -> Self {
        self.insert(url, source);
        self
    }

    pub fn insert(&mut self, url: Url, source: impl Into<Arc<str>>) {
        self.modules.insert(url, source.into());
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl ModuleResolver for MemoryResolver {
    fn resolve(&self, specifier: &str, importer: Option<&Url>) -> Result<Url, ModuleError> {
        let url = resolve_specifier(&self.aliases, specifier, importer)?;
        Ok(probe(url, |candidate| self.modules.contains_key(candidate)))
    }

    fn load(&self, url: &Url) -> Result<Arc<str>, ModuleError> {
        self.modules.get(url).cloned().ok_or_else(|| ModuleError::Read {
            url: url.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "module not registered"),
        })
    }
}
