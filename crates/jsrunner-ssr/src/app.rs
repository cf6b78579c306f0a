//! Server-side rendering on top of a [`Session`].

use crate::bundle::{BundleOptions, build_bundles};
use crate::error::{Side, SsrError, SsrResult};
use crate::resolve::ModuleResolver;
use crate::transform::TransformOptions;
use jsrunner::{HostValue, RunnerConfig, Session};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

/// Global the server props are bound to before every render.
pub const SERVER_PROPS: &str = "SERVER_PROPS";

/// Global function the SSR entry must define.
pub const RENDER_FUNCTION: &str = "renderApp";

/// Options for [`SsrApp::new`]
#[derive(Default)]
pub struct SsrAppOptions {
    /// Existing session to render in. A new one is built from
    /// `runner_config` when absent.
    pub session: Option<Session>,
    pub runner_config: RunnerConfig,
    /// Scripts evaluated before the SSR bundle, such as `TextEncoder`
    /// shims. Blank entries are skipped.
    pub polyfills: Vec<String>,
    /// TSX source that assigns `globalThis.renderApp`.
    pub ssr_entry: String,
    /// TSX source that hydrates the markup in a browser.
    pub client_entry: String,
    pub react_version: Option<String>,
    pub resolver: Option<Arc<dyn ModuleResolver>>,
    pub transform: TransformOptions,
    pub base_url: Option<Url>,
}

/// A bundled React application that renders markup from props
pub struct SsrApp {
    session: Session,
    client_bundle: String,
}

impl SsrApp {
    /// Load polyfills, bundle both entries and install the server bundle.
    pub fn new(options: SsrAppOptions) -> SsrResult<Self> {
        let SsrAppOptions {
            session,
            runner_config,
            polyfills,
            ssr_entry,
            client_entry,
            react_version,
            resolver,
            transform,
            base_url,
        } = options;

        if ssr_entry.trim().is_empty() {
            return Err(SsrError::MissingEntry(Side::Server));
        }
        if client_entry.trim().is_empty() {
            return Err(SsrError::MissingEntry(Side::Client));
        }

        let mut session = match session {
            Some(session) => session,
            None => Session::builder().config(runner_config).build()?,
        };

        for (index, script) in polyfills.iter().enumerate() {
            if script.trim().is_empty() {
                continue;
            }
            session
                .load_script_str(script)
                .map_err(|source| SsrError::Polyfill { index, source })?;
        }

        let bundles = build_bundles(&BundleOptions {
            ssr_entry,
            client_entry,
            react_version,
            transform,
            base_url,
            resolver,
        })?;

        session
            .load_script_str(&bundles.ssr)
            .map_err(SsrError::LoadBundle)?;

        let defined = session
            .eval(&format!("typeof globalThis.{} === 'function'", RENDER_FUNCTION))
            .map_err(SsrError::LoadBundle)?;
        if !defined.export_bool() {
            return Err(SsrError::MissingRenderer);
        }

        info!(
            ssr_bytes = bundles.ssr.len(),
            client_bytes = bundles.client.len(),
            "SSR app ready"
        );
        Ok(Self {
            session,
            client_bundle: bundles.client,
        })
    }

    /// Render markup for `props`.
    pub fn render(&mut self, props: serde_json::Value) -> SsrResult<String> {
        let props = HostValue::from(props);
        self.session.set_global(SERVER_PROPS, props.clone())?;

        let markup = self
            .session
            .call(RENDER_FUNCTION, &[props])
            .map_err(SsrError::Render)?
            .export_string();
        debug!(bytes = markup.len(), "rendered");
        Ok(markup)
    }

    /// Browser bundle that hydrates the server markup.
    pub fn client_bundle(&self) -> &str {
        &self.client_bundle
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn into_session(self) -> Session {
        self.session
    }
}
