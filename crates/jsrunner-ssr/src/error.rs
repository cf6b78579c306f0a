//! Error types for bundling and server-side rendering

use jsrunner::RunnerError;
use std::fmt;
use thiserror::Error;

/// Which of the two bundles an operation was building
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Bundle evaluated by the host to render markup
    Server,
    /// Bundle shipped to browsers for hydration
    Client,
}

impl Side {
    /// Virtual file name of the entry module.
    pub fn entry_file(self) -> &'static str {
        match self {
            Self::Server => "app-ssr.tsx",
            Self::Client => "app-client.tsx",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server => f.write_str("server"),
            Self::Client => f.write_str("client"),
        }
    }
}

/// Failure turning one module's source into bundle code
#[derive(Error, Debug)]
pub enum TranspileError {
    #[error("failed to parse {module}: {message}")]
    Parse { module: String, message: String },

    #[error("failed to transform {module}: {message}")]
    Transform { module: String, message: String },

    #[error("failed to emit {module}: {message}")]
    Codegen { module: String, message: String },
}

/// Failure resolving, loading or compiling a module
#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("unable to resolve {specifier:?}{}", .importer.as_deref().map(|i| format!(" from {}", i)).unwrap_or_default())]
    Unresolved {
        specifier: String,
        importer: Option<String>,
    },

    #[error("fetch {url} failed: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("fetch {url} failed with {status}")]
    Status { url: String, status: u16 },

    #[error("failed to read {url}: {source}")]
    Read {
        url: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported module URL {0}")]
    UnsupportedScheme(String),

    #[error("failed to create HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error(transparent)]
    Transpile(#[from] TranspileError),
}

/// Failure building the server/client bundle pair
#[derive(Error, Debug)]
pub enum BundleError {
    #[error("{0} entry is required")]
    MissingEntry(Side),

    #[error("bundle {side}: {source}")]
    Build {
        side: Side,
        #[source]
        source: ModuleError,
    },
}

impl BundleError {
    /// Side that failed to build.
    pub fn side(&self) -> Side {
        match self {
            Self::MissingEntry(side) | Self::Build { side, .. } => *side,
        }
    }
}

/// Failure setting up or rendering an [`SsrApp`](crate::SsrApp)
#[derive(Error, Debug)]
pub enum SsrError {
    #[error("{0} entry is required")]
    MissingEntry(Side),

    #[error("load polyfill[{index}]: {source}")]
    Polyfill {
        index: usize,
        #[source]
        source: RunnerError,
    },

    #[error(transparent)]
    Bundle(#[from] BundleError),

    #[error("load SSR bundle: {0}")]
    LoadBundle(#[source] RunnerError),

    #[error("renderApp not defined: the SSR entry must assign globalThis.renderApp")]
    MissingRenderer,

    #[error("renderApp failed: {0}")]
    Render(#[source] RunnerError),

    #[error(transparent)]
    Runner(#[from] RunnerError),
}

pub type BundleResult<T> = Result<T, BundleError>;
pub type SsrResult<T> = Result<T, SsrError>;
