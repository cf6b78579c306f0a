//! Integration tests for SsrApp

mod common;

use common::{react_resolver, url};
use jsrunner::{RunnerError, Session};
use jsrunner_ssr::{ModuleResolver, Side, SsrApp, SsrAppOptions, SsrError};
use serde_json::json;
use std::sync::Arc;

const SSR_ENTRY: &str = r#"
import React from "react";
import ReactDOMServer from "react-dom/server";
import { Greeting } from "./components/greeting";

type AppProps = { name?: string; items?: string[]; note?: string };

const App: React.FC<AppProps> = (props) => (
  <React.Fragment>
    <Greeting name={props.name ?? "world"} />
    <ul className="items">
      {(props.items ?? []).map((item) => (
        <li key={item}>{item}</li>
      ))}
    </ul>
    {props.note && <small>Note: {props.note}</small>}
  </React.Fragment>
);

export function renderApp(props: Record<string, unknown>) {
  return ReactDOMServer.renderToString(<App {...(props as AppProps)} />);
}

if (typeof globalThis !== "undefined") {
  (globalThis as any).renderApp = renderApp;
}
"#;

const CLIENT_ENTRY: &str = r#"
import React from "react";
import { hydrateRoot } from "react-dom/client";
import { Greeting } from "./components/greeting";

(globalThis as any).hydrated = hydrateRoot({ id: "root" } as any, <Greeting name="client" />);
"#;

const GREETING: &str = r#"
export function Greeting({ name }: { name: string }) {
  return <h1 title="greeting">Hello, {name}!</h1>;
}
"#;

fn resolver() -> Arc<dyn ModuleResolver> {
    Arc::new(react_resolver().module(url("file:///components/greeting.tsx"), GREETING))
}

fn options() -> SsrAppOptions {
    SsrAppOptions {
        ssr_entry: SSR_ENTRY.to_string(),
        client_entry: CLIENT_ENTRY.to_string(),
        resolver: Some(resolver()),
        ..Default::default()
    }
}

#[test]
fn test_render_markup() {
    let mut app = SsrApp::new(options()).unwrap();
    let html = app
        .render(json!({"name": "Rust", "items": ["a", "b"]}))
        .unwrap();
    assert_eq!(
        html,
        "<h1 title=\"greeting\">Hello, Rust!</h1><ul class=\"items\"><li>a</li><li>b</li></ul>"
    );
}

#[test]
fn test_render_is_repeatable_and_binds_props() {
    let mut app = SsrApp::new(options()).unwrap();
    let first = app.render(json!({"note": "<b>"})).unwrap();
    assert!(first.contains("Hello, world!"), "{first}");
    assert!(first.contains("<small>Note: &lt;b&gt;</small>"), "{first}");

    let second = app.render(json!({"name": "again"})).unwrap();
    assert!(second.contains("Hello, again!"), "{second}");
    assert!(!second.contains("<small>"), "{second}");

    let props = app.session_mut().eval("SERVER_PROPS.name").unwrap();
    assert_eq!(props.export_string(), "again");
}

#[test]
fn test_client_bundle_hydrates() {
    let app = SsrApp::new(options()).unwrap();
    let mut browser = Session::new().unwrap();
    browser.load_script_str(app.client_bundle()).unwrap();
    let value = browser
        .eval("({ root: hydrated.container.id, name: hydrated.element.props.name })")
        .unwrap();
    assert_eq!(value.export(), json!({"root": "root", "name": "client"}));
}

#[test]
fn test_polyfills_run_first() {
    let mut opts = options();
    opts.polyfills = vec![
        "   ".to_string(),
        "globalThis.formatName = (n) => n.toUpperCase();".to_string(),
    ];
    opts.ssr_entry = SSR_ENTRY.replace(
        "props.name ?? \"world\"",
        "(globalThis as any).formatName(props.name ?? \"world\")",
    );
    let mut app = SsrApp::new(opts).unwrap();
    let html = app.render(json!({"name": "poly"})).unwrap();
    assert!(html.contains("Hello, POLY!"), "{html}");
}

#[test]
fn test_polyfill_failure_reports_index() {
    let mut opts = options();
    opts.polyfills = vec!["var ok = 1;".to_string(), "throw new Error('nope')".to_string()];
    match SsrApp::new(opts) {
        Err(SsrError::Polyfill { index, source }) => {
            assert_eq!(index, 1);
            assert!(matches!(source, RunnerError::Runtime(_)), "{source:?}");
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("polyfill failure was ignored"),
    }
}

#[test]
fn test_existing_session_is_reused() {
    let mut session = Session::new().unwrap();
    session.set_global("suffix", "!!").unwrap();

    let mut opts = options();
    opts.session = Some(session);
    opts.ssr_entry = SSR_ENTRY.replace("{props.note}", "{props.note}{(globalThis as any).suffix}");
    let mut app = SsrApp::new(opts).unwrap();
    let html = app.render(json!({"note": "hi"})).unwrap();
    assert!(html.contains("<small>Note: hi!!</small>"), "{html}");
}

#[test]
fn test_missing_entries() {
    let mut opts = options();
    opts.ssr_entry = " \n ".to_string();
    assert!(matches!(SsrApp::new(opts), Err(SsrError::MissingEntry(Side::Server))));

    let mut opts = options();
    opts.client_entry = String::new();
    assert!(matches!(SsrApp::new(opts), Err(SsrError::MissingEntry(Side::Client))));
}

#[test]
fn test_missing_renderer() {
    let mut opts = options();
    opts.ssr_entry = "import React from \"react\"; export const nothing = <div />;".to_string();
    assert!(matches!(SsrApp::new(opts), Err(SsrError::MissingRenderer)));
}

#[test]
fn test_bundle_failure_names_side() {
    let mut opts = options();
    opts.client_entry = "import \"./components/missing\";".to_string();
    match SsrApp::new(opts) {
        Err(SsrError::Bundle(err)) => assert_eq!(err.side(), Side::Client),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("missing module was ignored"),
    }
}

#[test]
fn test_render_error() {
    let mut opts = options();
    opts.ssr_entry = SSR_ENTRY.replace(
        "export function renderApp(props: Record<string, unknown>) {",
        "export function renderApp(props: Record<string, unknown>) {\n  if (props.fail) throw new TypeError('render exploded');",
    );
    let mut app = SsrApp::new(opts).unwrap();
    match app.render(json!({"fail": true})) {
        Err(SsrError::Render(err)) => {
            let exception = err.exception().expect("script exception");
            assert_eq!(exception.name, "TypeError");
            assert_eq!(exception.message, "render exploded");
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(app.render(json!({})).is_ok());
}
