//! jsrunner-ssr - server-side rendering for jsrunner.
//!
//! Bundles a React application written in TSX into two scripts: one the host
//! evaluates to render markup, one a browser loads to hydrate it. Bare React
//! imports resolve to esm.sh development builds; relative imports resolve
//! against the importing module.
//!
//! # Example
//!
//! ```no_run
//! use jsrunner_ssr::{SsrApp, SsrAppOptions};
//! use serde_json::json;
//!
//! let ssr_entry = r#"
//!     import ReactDOMServer from "react-dom/server";
//!     const App = (props: { name: string }) => <h1>Hello, {props.name}</h1>;
//!     (globalThis as any).renderApp = (props: any) => ReactDOMServer.renderToString(<App {...props} />);
//! "#;
//! let client_entry = r#"
//!     import { hydrateRoot } from "react-dom/client";
//!     const App = (props: { name: string }) => <h1>Hello, {props.name}</h1>;
//!     hydrateRoot(document.getElementById("root")!, <App name="browser" />);
//! "#;
//!
//! let mut app = SsrApp::new(SsrAppOptions {
//!     ssr_entry: ssr_entry.to_string(),
//!     client_entry: client_entry.to_string(),
//!     ..Default::default()
//! })
//! .unwrap();
//! let html = app.render(json!({ "name": "world" })).unwrap();
//! ```
//!
//! # Pipeline
//!
//! ```text
//! entry.tsx ──parse──► lower JSX ──► strip types ──► defines
//!                                                      │
//!        ┌─────────── resolve + load imports ◄─────────┘
//!        ↓
//!   rewrite ESM ──► module factory ──► IIFE bundle
//! ```

pub mod app;
pub mod bundle;
pub mod error;
mod esm;
pub mod jsx;
pub mod resolve;
pub mod transform;

pub use app::{RENDER_FUNCTION, SERVER_PROPS, SsrApp, SsrAppOptions};
pub use bundle::{BundleOptions, Bundler, Bundles, build_bundles};
pub use error::{BundleError, BundleResult, ModuleError, Side, SsrError, SsrResult, TranspileError};
pub use jsx::JsxRuntime;
pub use resolve::{
    DEFAULT_REACT_VERSION, ESM_CDN, MemoryResolver, ModuleResolver, RemoteResolver,
    RemoteResolverBuilder, react_aliases,
};
pub use transform::{SourceKind, TransformOptions, transpile};
