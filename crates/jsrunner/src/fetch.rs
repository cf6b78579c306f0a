//! Network helpers exposed to scripts
//!
//! `fetchText(url)` and `fetchJSON(url)` perform a blocking GET on the thread
//! that runs the script. Without a [`WebAccessConfig`] both names still exist
//! but throw a `UsageError`, which the host sees as [`RunnerError::Usage`].
//!
//! [`RunnerError::Usage`]: crate::RunnerError::Usage

use crate::config::WebAccessConfig;
use crate::error::USAGE_ERROR_NAME;
use crate::host::{HostValue, throw_error};
use crate::value::JsValue;
use anyhow::{Context as _, anyhow, bail};
use parking_lot::Mutex;
use reqwest::blocking::Client;
use rquickjs::function::Rest;
use rquickjs::{Ctx, Function, IntoJs, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const FETCH_TEXT: &str = "fetchText";
pub const FETCH_JSON: &str = "fetchJSON";

/// Install the helpers on the global object of `ctx`.
pub(crate) fn install<'js>(ctx: &Ctx<'js>, web: Option<&WebAccessConfig>) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    let Some(web) = web else {
        for name in [FETCH_TEXT, FETCH_JSON] {
            let refused = Function::new(
                ctx.clone(),
                move |ctx: Ctx<'js>, _args: Rest<Value<'js>>| -> rquickjs::Result<()> {
                    Err(throw_error(
                        &ctx,
                        USAGE_ERROR_NAME,
                        &format!("{}: network access is disabled", name),
                    ))
                },
            )?;
            globals.set(name, refused)?;
        }
        return Ok(());
    };

    let fetcher = Arc::new(Fetcher::new(web));

    let text = {
        let fetcher = fetcher.clone();
        HostValue::function(move |args| {
            let url = url_arg(FETCH_TEXT, args)?;
            fetcher.get(&url).map(HostValue::String)
        })
    };
    let json = HostValue::function(move |args| {
        let url = url_arg(FETCH_JSON, args)?;
        let body = fetcher.get(&url)?;
        let parsed: serde_json::Value =
            serde_json::from_str(&body).with_context(|| format!("invalid JSON from {}", url))?;
        Ok(HostValue::from(parsed))
    });

    globals.set(FETCH_TEXT, text.into_js(ctx)?)?;
    globals.set(FETCH_JSON, json.into_js(ctx)?)?;
    Ok(())
}

fn url_arg(function: &str, args: &[JsValue]) -> anyhow::Result<String> {
    match args.first() {
        Some(url) if !url.is_nullish() => Ok(url.export_string()),
        _ => bail!("{} requires a URL as first argument", function),
    }
}

/// Lazily built blocking client shared by both helpers.
struct Fetcher {
    client: Mutex<Option<Client>>,
    timeout: Duration,
}

impl Fetcher {
    fn new(web: &WebAccessConfig) -> Self {
        Self {
            client: Mutex::new(web.client.clone()),
            timeout: web.timeout,
        }
    }

    fn client(&self) -> anyhow::Result<Client> {
        let mut slot = self.client.lock();
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .context("failed to create HTTP client")?;
        *slot = Some(client.clone());
        Ok(client)
    }

    fn get(&self, url: &str) -> anyhow::Result<String> {
        debug!(url = %url, "fetching");
        let response = self.client()?.get(url).send()?;

        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(anyhow!("HTTP {} fetching {}", status.as_u16(), url));
        }

        Ok(response.text()?)
    }
}
