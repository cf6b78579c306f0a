//! Offline stand-ins for the esm.sh React modules

#![allow(dead_code)]

use jsrunner_ssr::{DEFAULT_REACT_VERSION, MemoryResolver};
use url::Url;

pub const REACT: &str = r#"
export const Fragment = Symbol.for("react.fragment");
export function createElement(type, config, ...children) {
  const props = Object.assign({}, config);
  if (children.length === 1) props.children = children[0];
  else if (children.length > 1) props.children = children;
  return { $$typeof: "element", type, props };
}
export function useState(initial) {
  return [initial, () => {}];
}
export default { Fragment, createElement, useState };
"#;

pub const JSX_RUNTIME: &str = r#"
import { Fragment } from "/react@18.3.1?dev";
export { Fragment };
export function jsx(type, props, key) {
  return { $$typeof: "element", type, props, key };
}
export const jsxs = jsx;
"#;

pub const REACT_DOM_SERVER: &str = r#"
import { Fragment } from "/react@18.3.1?dev";

const escape = (s) =>
  String(s).replace(/&/g, "&amp;").replace(/</g, "&lt;").replace(/>/g, "&gt;").replace(/"/g, "&quot;");

function attrs(props) {
  let out = "";
  for (const name of Object.keys(props)) {
    if (name === "children" || name === "key") continue;
    const value = props[name];
    if (value == null || value === false || typeof value === "function") continue;
    out += " " + (name === "className" ? "class" : name) + '="' + escape(value) + '"';
  }
  return out;
}

export function renderToString(node) {
  if (node == null || typeof node === "boolean") return "";
  if (Array.isArray(node)) return node.map(renderToString).join("");
  if (typeof node !== "object") return escape(node);
  const { type, props } = node;
  if (type === Fragment) return renderToString(props.children);
  if (typeof type === "function") return renderToString(type(props));
  return "<" + type + attrs(props) + ">" + renderToString(props.children) + "</" + type + ">";
}

export default { renderToString };
"#;

pub const REACT_DOM_CLIENT: &str = r#"
export function hydrateRoot(container, element) {
  return { container, element };
}
"#;

pub fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

/// Resolver serving a minimal React under the default esm.sh aliases.
pub fn react_resolver() -> MemoryResolver {
    let v = DEFAULT_REACT_VERSION;
    MemoryResolver::with_react_aliases(v)
        .module(url(&format!("https://esm.sh/react@{v}?dev")), REACT)
        .module(url(&format!("https://esm.sh/react@{v}/jsx-runtime?dev")), JSX_RUNTIME)
        .module(url(&format!("https://esm.sh/react-dom@{v}/server?dev")), REACT_DOM_SERVER)
        .module(url(&format!("https://esm.sh/react-dom@{v}/client?dev")), REACT_DOM_CLIENT)
}
