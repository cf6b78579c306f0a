//! ES module syntax → bundle registry calls.
//!
//! Each module body runs inside `function (__exports, __require)`. Imports
//! become `__require` lookups, exports become getters on `__exports`:
//!
//! ```text
//! import React from "react";     __export(__exports, { "answer": () => answer });
//! export const answer = 42;  →   var __m0 = __require("https://esm.sh/react@18.3.1?dev");
//!                                const React = __m0.default;
//!                                const answer = 42;
//! ```
//!
//! The registry prologue is hoisted above the rewritten body so that imported
//! names are bound before any statement runs.

use crate::transform::{js_string, parse_expr, parse_items};
use std::collections::HashMap;
use swc_common::{DUMMY_SP, SourceMap, sync::Lrc};
use swc_ecma_ast::{
    BindingIdent, CallExpr, Callee, ClassDecl, Decl, DefaultDecl, ExportSpecifier, Expr, FnDecl, Ident,
    ImportSpecifier, Lit, Module, ModuleDecl, ModuleExportName, ModuleItem, ObjectPatProp, Pat, Stmt,
    Str, VarDecl, VarDeclKind, VarDeclarator,
};
use swc_ecma_visit::{Visit, VisitMut, VisitMutWith, VisitWith};

const DEFAULT_EXPORT: &str = "__default";

fn str_value(value: &Str) -> String {
    value.value.as_str().unwrap_or_default().to_string()
}

fn export_name(name: &ModuleExportName) -> String {
    match name {
        ModuleExportName::Ident(id) => id.sym.as_str().to_string(),
        ModuleExportName::Str(s) => str_value(s),
    }
}

/// `obj.name`, or `obj["name"]` when `name` is not an identifier.
fn member(object: &str, name: &str) -> String {
    let is_ident = name.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_' || c == '$')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
    if is_ident {
        format!("{}.{}", object, name)
    } else {
        format!("{}[{}]", object, js_string(name))
    }
}

/// Import specifiers of a module: static imports, re-exports and literal
/// dynamic imports, in source order without duplicates.
pub(crate) fn collect_dependencies(module: &Module) -> Vec<String> {
    let mut deps: Vec<String> = Vec::new();
    let mut push = |specifier: String| {
        if !deps.contains(&specifier) {
            deps.push(specifier);
        }
    };

    for item in &module.body {
        if let ModuleItem::ModuleDecl(decl) = item {
            match decl {
                ModuleDecl::Import(import) if !import.type_only => push(str_value(&import.src)),
                ModuleDecl::ExportNamed(export) if !export.type_only => {
                    if let Some(src) = &export.src {
                        push(str_value(src));
                    }
                }
                ModuleDecl::ExportAll(export) if !export.type_only => push(str_value(&export.src)),
                _ => {}
            }
        }
    }

    let mut dynamic = DynamicImports::default();
    module.visit_with(&mut dynamic);
    for specifier in dynamic.0 {
        push(specifier);
    }
    deps
}

#[derive(Default)]
struct DynamicImports(Vec<String>);

impl Visit for DynamicImports {
    fn visit_call_expr(&mut self, call: &CallExpr) {
        call.visit_children_with(self);
        if let Callee::Import(_) = call.callee {
            if let Some(arg) = call.args.first() {
                if let Expr::Lit(Lit::Str(s)) = &*arg.expr {
                    self.0.push(str_value(s));
                }
            }
        }
    }
}

/// Rewrites `import`/`export` of one module into registry calls
pub(crate) struct EsmRewriter<'a> {
    cm: &'a Lrc<SourceMap>,
    resolved: &'a HashMap<String, String>,
    /// (module id, local binding) per required module
    requires: Vec<(String, String)>,
    /// `const` bindings for imported names
    imports: Vec<(String, String)>,
    /// (exported name, local expression)
    exports: Vec<(String, String)>,
    /// Bindings whose exports are re-exported wholesale
    star_exports: Vec<String>,
    error: Option<String>,
}

impl<'a> EsmRewriter<'a> {
    pub(crate) fn new(cm: &'a Lrc<SourceMap>, resolved: &'a HashMap<String, String>) -> Self {
        Self {
            cm,
            resolved,
            requires: Vec::new(),
            imports: Vec::new(),
            exports: Vec::new(),
            star_exports: Vec::new(),
            error: None,
        }
    }

    /// Prepend the registry prologue, or report the first rewrite failure.
    pub(crate) fn finish(self, module: &mut Module) -> Result<(), String> {
        if let Some(err) = self.error {
            return Err(err);
        }

        let mut prologue = String::new();
        if !self.exports.is_empty() {
            let getters: Vec<String> = self
                .exports
                .iter()
                .map(|(name, local)| format!("{}: () => {}", js_string(name), local))
                .collect();
            prologue.push_str(&format!("__export(__exports, {{ {} }});\n", getters.join(", ")));
        }
        for (id, binding) in &self.requires {
            prologue.push_str(&format!("var {} = __require({});\n", binding, js_string(id)));
        }
        for binding in &self.star_exports {
            prologue.push_str(&format!("__exportStar(__exports, {});\n", binding));
        }
        for (local, value) in &self.imports {
            prologue.push_str(&format!("const {} = {};\n", local, value));
        }

        if !prologue.is_empty() {
            let items = parse_items(self.cm, &prologue)?;
            module.body.splice(0..0, items);
        }
        Ok(())
    }

    /// Local binding holding the exports of `specifier`'s module.
    fn require(&mut self, specifier: &str) -> Option<String> {
        let Some(id) = self.resolved.get(specifier) else {
            self.fail(format!("import {:?} was not resolved", specifier));
            return None;
        };
        if let Some((_, binding)) = self.requires.iter().find(|(existing, _)| existing == id) {
            return Some(binding.clone());
        }
        let binding = format!("__m{}", self.requires.len());
        self.requires.push((id.clone(), binding.clone()));
        Some(binding)
    }

    fn fail(&mut self, message: String) {
        if self.error.is_none() {
            self.error = Some(message);
        }
    }

    fn collect_pattern_names(pat: &Pat, exports: &mut Vec<(String, String)>) {
        match pat {
            Pat::Ident(ident) => {
                let name = ident.sym.as_str().to_string();
                exports.push((name.clone(), name));
            }
            Pat::Object(obj) => {
                for prop in &obj.props {
                    match prop {
                        ObjectPatProp::KeyValue(kv) => Self::collect_pattern_names(&kv.value, exports),
                        ObjectPatProp::Assign(assign) => {
                            let name = assign.key.sym.as_str().to_string();
                            exports.push((name.clone(), name));
                        }
                        ObjectPatProp::Rest(rest) => Self::collect_pattern_names(&rest.arg, exports),
                    }
                }
            }
            Pat::Array(arr) => {
                for elem in arr.elems.iter().flatten() {
                    Self::collect_pattern_names(elem, exports);
                }
            }
            Pat::Rest(rest) => Self::collect_pattern_names(&rest.arg, exports),
            Pat::Assign(assign) => Self::collect_pattern_names(&assign.left, exports),
            _ => {}
        }
    }

    fn rewrite_import(&mut self, import: &swc_ecma_ast::ImportDecl) {
        let Some(binding) = self.require(&str_value(&import.src)) else {
            return;
        };
        for specifier in &import.specifiers {
            match specifier {
                ImportSpecifier::Default(default) => self
                    .imports
                    .push((default.local.sym.to_string(), format!("{}.default", binding))),
                ImportSpecifier::Named(named) => {
                    let imported = named
                        .imported
                        .as_ref()
                        .map(export_name)
                        .unwrap_or_else(|| named.local.sym.to_string());
                    self.imports
                        .push((named.local.sym.to_string(), member(&binding, &imported)));
                }
                ImportSpecifier::Namespace(ns) => {
                    self.imports.push((ns.local.sym.to_string(), binding.clone()))
                }
            }
        }
    }

    fn rewrite_reexport(&mut self, export: &swc_ecma_ast::NamedExport) {
        match &export.src {
            Some(src) => {
                let Some(binding) = self.require(&str_value(src)) else {
                    return;
                };
                for specifier in &export.specifiers {
                    match specifier {
                        ExportSpecifier::Named(named) => {
                            let orig = export_name(&named.orig);
                            let exported = named.exported.as_ref().map(export_name).unwrap_or_else(|| orig.clone());
                            self.exports.push((exported, member(&binding, &orig)));
                        }
                        ExportSpecifier::Namespace(ns) => {
                            self.exports.push((export_name(&ns.name), binding.clone()));
                        }
                        ExportSpecifier::Default(default) => {
                            self.exports
                                .push((default.exported.sym.to_string(), format!("{}.default", binding)));
                        }
                    }
                }
            }
            None => {
                for specifier in &export.specifiers {
                    if let ExportSpecifier::Named(named) = specifier {
                        let orig = export_name(&named.orig);
                        let exported = named.exported.as_ref().map(export_name).unwrap_or_else(|| orig.clone());
                        self.exports.push((exported, orig));
                    }
                }
            }
        }
    }

    fn dynamic_import(&mut self, specifier: &str) -> Option<Box<Expr>> {
        let Some(id) = self.resolved.get(specifier) else {
            self.fail(format!("dynamic import {:?} was not resolved", specifier));
            return None;
        };
        let code = format!("Promise.resolve().then(() => __require({}))", js_string(id));
        match parse_expr(self.cm, &code) {
            Ok(expr) => Some(expr),
            Err(err) => {
                self.fail(err);
                None
            }
        }
    }
}

fn default_binding(ident: Option<&Ident>) -> Ident {
    ident
        .cloned()
        .unwrap_or_else(|| Ident::new(DEFAULT_EXPORT.into(), DUMMY_SP, Default::default()))
}

impl VisitMut for EsmRewriter<'_> {
    fn visit_mut_module_items(&mut self, items: &mut Vec<ModuleItem>) {
        let mut new_items = Vec::with_capacity(items.len());

        for item in items.drain(..) {
            match item {
                ModuleItem::ModuleDecl(ModuleDecl::Import(import)) => {
                    if !import.type_only {
                        self.rewrite_import(&import);
                    }
                }

                ModuleItem::ModuleDecl(ModuleDecl::ExportDecl(export)) => {
                    match &export.decl {
                        Decl::Var(var_decl) => {
                            for decl in &var_decl.decls {
                                Self::collect_pattern_names(&decl.name, &mut self.exports);
                            }
                        }
                        Decl::Fn(fn_decl) => {
                            let name = fn_decl.ident.sym.to_string();
                            self.exports.push((name.clone(), name));
                        }
                        Decl::Class(class_decl) => {
                            let name = class_decl.ident.sym.to_string();
                            self.exports.push((name.clone(), name));
                        }
                        _ => {}
                    }
                    new_items.push(ModuleItem::Stmt(Stmt::Decl(export.decl)));
                }

                ModuleItem::ModuleDecl(ModuleDecl::ExportDefaultExpr(export)) => {
                    self.exports
                        .push(("default".to_string(), DEFAULT_EXPORT.to_string()));
                    let var_decl = VarDecl {
                        span: DUMMY_SP,
                        kind: VarDeclKind::Const,
                        declare: false,
                        decls: vec![VarDeclarator {
                            span: DUMMY_SP,
                            name: Pat::Ident(BindingIdent {
                                id: Ident::new(DEFAULT_EXPORT.into(), DUMMY_SP, Default::default()),
                                type_ann: None,
                            }),
                            init: Some(export.expr),
                            definite: false,
                        }],
                        ctxt: Default::default(),
                    };
                    new_items.push(ModuleItem::Stmt(Stmt::Decl(Decl::Var(Box::new(var_decl)))));
                }

                ModuleItem::ModuleDecl(ModuleDecl::ExportDefaultDecl(export)) => match export.decl {
                    DefaultDecl::Fn(fn_expr) => {
                        let ident = default_binding(fn_expr.ident.as_ref());
                        self.exports.push(("default".to_string(), ident.sym.to_string()));
                        new_items.push(ModuleItem::Stmt(Stmt::Decl(Decl::Fn(FnDecl {
                            ident,
                            declare: false,
                            function: fn_expr.function,
                        }))));
                    }
                    DefaultDecl::Class(class_expr) => {
                        let ident = default_binding(class_expr.ident.as_ref());
                        self.exports.push(("default".to_string(), ident.sym.to_string()));
                        new_items.push(ModuleItem::Stmt(Stmt::Decl(Decl::Class(ClassDecl {
                            ident,
                            declare: false,
                            class: class_expr.class,
                        }))));
                    }
                    // Interface declarations carry no runtime value
                    _ => {}
                },

                ModuleItem::ModuleDecl(ModuleDecl::ExportNamed(export)) => {
                    if !export.type_only {
                        self.rewrite_reexport(&export);
                    }
                }

                ModuleItem::ModuleDecl(ModuleDecl::ExportAll(export)) => {
                    if !export.type_only {
                        if let Some(binding) = self.require(&str_value(&export.src)) {
                            if !self.star_exports.contains(&binding) {
                                self.star_exports.push(binding);
                            }
                        }
                    }
                }

                ModuleItem::ModuleDecl(ModuleDecl::TsNamespaceExport(_)) => {}

                ModuleItem::ModuleDecl(_) => {
                    self.fail("TypeScript `import =` and `export =` are not supported".to_string());
                }

                stmt @ ModuleItem::Stmt(_) => new_items.push(stmt),
            }
        }

        *items = new_items;

        for item in items.iter_mut() {
            item.visit_mut_children_with(self);
        }
    }

    fn visit_mut_expr(&mut self, expr: &mut Expr) {
        expr.visit_mut_children_with(self);

        let Expr::Call(call) = expr else {
            return;
        };
        if !matches!(call.callee, Callee::Import(_)) {
            return;
        }

        let literal = call.args.first().and_then(|arg| match &*arg.expr {
            Expr::Lit(Lit::Str(s)) => Some(str_value(s)),
            _ => None,
        });
        match literal {
            Some(specifier) => {
                if let Some(replacement) = self.dynamic_import(&specifier) {
                    *expr = *replacement;
                }
            }
            None => {
                call.callee = Callee::Expr(Box::new(Expr::Ident(Ident::new(
                    "__dynamicImport".into(),
                    DUMMY_SP,
                    Default::default(),
                ))));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{SourceKind, TransformOptions, emit, prepare};
    use jsrunner::Session;
    use serde_json::{Value, json};

    const HARNESS: &str = r#"
        function __require(id) {
            if (!(id in __deps)) throw new Error("module not found: " + id);
            return __deps[id];
        }
        function __export(target, getters) {
            for (const k in getters) Object.defineProperty(target, k, { enumerable: true, get: getters[k] });
        }
        function __exportStar(target, source) {
            for (const k in source) {
                if (k !== "default" && !(k in target)) {
                    Object.defineProperty(target, k, { enumerable: true, get: () => source[k] });
                }
            }
        }
        function __dynamicImport(s) { return Promise.reject(new Error("no module " + s)); }
    "#;

    fn rewrite(source: &str, resolved: &[(&str, &str)]) -> Result<String, String> {
        let options = TransformOptions::default();
        let parsed = prepare("file:///main.js", source, SourceKind::JavaScript, &options)
            .map_err(|e| e.to_string())?;
        let resolved: HashMap<String, String> = resolved
            .iter()
            .map(|(spec, id)| (spec.to_string(), id.to_string()))
            .collect();
        emit(parsed, &resolved, &options).map_err(|e| e.to_string())
    }

    /// Run the rewritten module against `deps` (id → JS expression) and
    /// evaluate `probe` with the module's exports bound to `exports`.
    fn run(source: &str, deps: &[(&str, &str, &str)], probe: &str) -> Value {
        let resolved: Vec<(&str, &str)> = deps.iter().map(|(spec, id, _)| (*spec, *id)).collect();
        let code = rewrite(source, &resolved).unwrap();
        let modules: Vec<String> = deps
            .iter()
            .map(|(_, id, value)| format!("{}: {}", js_string(id), value))
            .collect();

        let mut session = Session::new().unwrap();
        session.load_script_str(HARNESS).unwrap();
        session
            .load_script_str(&format!("var __deps = {{ {} }};", modules.join(", ")))
            .unwrap();
        session
            .load_script_str(&format!(
                "var exports = {{}}; (function (__exports, __require) {{ \"use strict\";\n{}\n}})(exports, __require);",
                code
            ))
            .unwrap();
        session.eval(probe).unwrap().export()
    }

    #[test]
    fn test_imports_bind_module_exports() {
        let out = run(
            r#"
            import React, { useState as useLocal, "odd-name" as odd } from "react";
            import * as util from "./util.js";
            export const seen = [React.name, useLocal(), odd, util.twice(2)];
            "#,
            &[
                (
                    "react",
                    "https://esm.sh/react",
                    r#"{ default: { name: "React" }, useState: () => "state", "odd-name": "odd" }"#,
                ),
                ("./util.js", "file:///util.js", "{ twice: (n) => n * 2 }"),
            ],
            "exports.seen",
        );
        assert_eq!(out, json!(["React", "state", "odd", 4]));
    }

    #[test]
    fn test_side_effect_import_is_required() {
        let out = run(
            r#"import "./polyfill.js"; export const ready = globalThis.polyfilled === true;"#,
            &[("./polyfill.js", "file:///polyfill.js", "(globalThis.polyfilled = true, {})")],
            "exports.ready",
        );
        assert_eq!(out, json!(true));
    }

    #[test]
    fn test_exports_are_getters() {
        let out = run(
            r#"
            export const { a, b: [c] } = { a: 1, b: [2] };
            export function helper() { return "helper"; }
            export class Widget {}
            export let counter = 0;
            export function increment() { counter += 1; }
            const local = 5;
            export { local as renamed };
            export default function () { return "default"; }
            "#,
            &[],
            r#"exports.increment();
               [exports.a, exports.c, exports.helper(), typeof exports.Widget,
                exports.counter, exports.renamed, exports.default()]"#,
        );
        assert_eq!(out, json!([1, 2, "helper", "function", 1, 5, "default"]));
    }

    #[test]
    fn test_reexports() {
        let out = run(
            r#"
            export * from "./a.js";
            export * as ns from "./b.js";
            export { x as y } from "./a.js";
            export const x = "own";
            "#,
            &[
                ("./a.js", "file:///a.js", r#"{ x: "a.x", z: "a.z", default: "a.default" }"#),
                ("./b.js", "file:///b.js", r#"{ w: "b.w" }"#),
            ],
            "[exports.x, exports.y, exports.z, exports.ns.w, 'default' in exports]",
        );
        assert_eq!(out, json!(["own", "a.x", "a.z", "b.w", false]));
    }

    #[test]
    fn test_dynamic_imports() {
        let code = rewrite(
            r#"
            const lazy = () => import("./lazy.js");
            const computed = (name) => import(name);
            "#,
            &[("./lazy.js", "file:///lazy.js")],
        )
        .unwrap();
        assert!(code.contains("file:///lazy.js"), "{code}");
        assert!(code.contains("__dynamicImport(name)"), "{code}");
        assert!(!code.contains("import("), "{code}");
    }

    #[test]
    fn test_unresolved_import_fails() {
        let err = rewrite("import x from \"missing\";", &[]).unwrap_err();
        assert!(err.contains("missing"), "{err}");
    }
}
