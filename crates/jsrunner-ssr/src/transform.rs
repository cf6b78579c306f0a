//! Per-module source transformation using SWC.
//!
//! A module goes through three steps before it is wrapped into a bundle:
//!
//! 1. [`prepare`] parses it, lowers JSX, strips TypeScript, substitutes
//!    defines and `import.meta`, and records its import specifiers.
//! 2. The bundler resolves those specifiers to module ids.
//! 3. [`emit`] rewrites `import`/`export` into registry calls and prints the
//!    factory body.
//!
//! [`transpile`] runs step 1 alone and prints the result, for single-file
//! scripts that need no bundling.

use crate::error::TranspileError;
use crate::esm::{EsmRewriter, collect_dependencies};
use crate::jsx::{JsxRuntime, lower_jsx};
use std::collections::{BTreeMap, HashMap};
use swc_common::{FileName, GLOBALS, Globals, Mark, SourceMap, sync::Lrc};
use swc_ecma_ast::{EsVersion, Expr, MemberProp, MetaPropKind, Module, ModuleItem, Program};
use swc_ecma_codegen::{Config as CodegenConfig, Emitter, text_writer::JsWriter};
use swc_ecma_parser::{EsSyntax, Parser, StringInput, Syntax, TsSyntax, lexer::Lexer};
use swc_ecma_transforms_base::{fixer::fixer, resolver};
use swc_ecma_transforms_typescript::strip;
use swc_ecma_visit::{VisitMut, VisitMutWith};

/// Source dialect, picked from the module's file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    JavaScript,
    Jsx,
    TypeScript,
    Tsx,
}

impl SourceKind {
    /// Dialect for a path or URL path. Unknown extensions are JavaScript.
    pub fn from_path(path: &str) -> Self {
        let file = path.rsplit('/').next().unwrap_or(path);
        match file.rsplit_once('.').map(|(_, ext)| ext) {
            Some("tsx") => Self::Tsx,
            Some("ts" | "mts" | "cts") => Self::TypeScript,
            Some("jsx") => Self::Jsx,
            _ => Self::JavaScript,
        }
    }

    pub fn is_typescript(self) -> bool {
        matches!(self, Self::TypeScript | Self::Tsx)
    }

    fn syntax(self) -> Syntax {
        match self {
            Self::JavaScript => Syntax::Es(EsSyntax::default()),
            Self::Jsx => Syntax::Es(EsSyntax {
                jsx: true,
                ..Default::default()
            }),
            Self::TypeScript | Self::Tsx => Syntax::Typescript(TsSyntax {
                tsx: self == Self::Tsx,
                decorators: true,
                ..Default::default()
            }),
        }
    }
}

/// Options shared by every module of a bundle
#[derive(Debug, Clone)]
pub struct TransformOptions {
    /// How JSX is lowered. Default: automatic runtime from `react`.
    pub jsx: JsxRuntime,
    /// Dotted expression → replacement source.
    /// Default: `process.env.NODE_ENV` → `"development"`.
    pub defines: BTreeMap<String, String>,
    /// Print without whitespace. Default: true.
    pub minify: bool,
}

impl Default for TransformOptions {
    fn default() -> Self {
        let mut defines = BTreeMap::new();
        defines.insert("process.env.NODE_ENV".to_string(), "\"development\"".to_string());
        Self {
            jsx: JsxRuntime::default(),
            defines,
            minify: true,
        }
    }
}

impl TransformOptions {
    pub fn jsx(mut self, jsx: JsxRuntime) -> Self {
        self.jsx = jsx;
        self
    }

    pub fn define(mut self, expr: impl Into<String>, replacement: impl Into<String>) -> Self {
        self.defines.insert(expr.into(), replacement.into());
        self
    }

    pub fn minify(mut self, minify: bool) -> Self {
        self.minify = minify;
        self
    }
}

/// A parsed module waiting for its dependencies to be resolved
pub struct ParsedModule {
    id: String,
    cm: Lrc<SourceMap>,
    module: Module,
    dependencies: Vec<String>,
}

impl ParsedModule {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Import specifiers in first-use order, without duplicates.
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }
}

/// Parse and lower `source`, ready for dependency resolution.
pub fn prepare(
    id: &str,
    source: &str,
    kind: SourceKind,
    options: &TransformOptions,
) -> Result<ParsedModule, TranspileError> {
    let cm: Lrc<SourceMap> = Default::default();
    let mut module = parse_module(&cm, id, source, kind)?;

    let transform_error = |message: String| TranspileError::Transform {
        module: id.to_string(),
        message,
    };

    // JSX goes first so that strip sees the runtime bindings it references.
    if matches!(kind, SourceKind::Jsx | SourceKind::Tsx) {
        lower_jsx(&mut module, &cm, &options.jsx).map_err(transform_error)?;
    }

    let mut program = Program::Module(module);
    if kind.is_typescript() {
        GLOBALS.set(&Globals::default(), || {
            let unresolved_mark = Mark::new();
            let top_level_mark = Mark::new();

            program.visit_mut_with(&mut resolver(unresolved_mark, top_level_mark, true));
            program.mutate(&mut strip(unresolved_mark, top_level_mark));
        });
    }
    let Program::Module(mut module) = program else {
        return Err(transform_error("expected module, got script".to_string()));
    };

    let mut defines = DefineReplacer::new(&cm, id, &options.defines).map_err(transform_error)?;
    module.visit_mut_with(&mut defines);

    let dependencies = collect_dependencies(&module);
    Ok(ParsedModule {
        id: id.to_string(),
        cm,
        module,
        dependencies,
    })
}

/// Rewrite a prepared module into a registry factory body.
///
/// `resolved` maps every specifier from [`ParsedModule::dependencies`] to the
/// id of the module it names.
pub fn emit(
    parsed: ParsedModule,
    resolved: &HashMap<String, String>,
    options: &TransformOptions,
) -> Result<String, TranspileError> {
    let ParsedModule {
        id, cm, mut module, ..
    } = parsed;

    let mut rewriter = EsmRewriter::new(&cm, resolved);
    module.visit_mut_with(&mut rewriter);
    rewriter.finish(&mut module).map_err(|message| TranspileError::Transform {
        module: id.clone(),
        message,
    })?;

    print_module(&cm, &id, module, options.minify)
}

/// Lower JSX, strip types and apply defines, keeping `import`/`export` as is.
pub fn transpile(
    source: &str,
    kind: SourceKind,
    options: &TransformOptions,
) -> Result<String, TranspileError> {
    let id = format!("script.{}", extension(kind));
    let ParsedModule { cm, module, .. } = prepare(&id, source, kind, options)?;
    print_module(&cm, &id, module, options.minify)
}

fn extension(kind: SourceKind) -> &'static str {
    match kind {
        SourceKind::JavaScript => "js",
        SourceKind::Jsx => "jsx",
        SourceKind::TypeScript => "ts",
        SourceKind::Tsx => "tsx",
    }
}

fn parse_module(
    cm: &Lrc<SourceMap>,
    id: &str,
    source: &str,
    kind: SourceKind,
) -> Result<Module, TranspileError> {
    let fm = cm.new_source_file(Lrc::new(FileName::Custom(id.to_string())), source.to_string());
    let lexer = Lexer::new(kind.syntax(), EsVersion::EsNext, StringInput::from(&*fm), None);
    let mut parser = Parser::new_from(lexer);

    let module = parser.parse_module().map_err(|e| TranspileError::Parse {
        module: id.to_string(),
        message: format!("{:?}", e.kind()),
    })?;

    // Recoverable errors still produce a usable tree
    for _e in parser.take_errors() {}

    Ok(module)
}

fn print_module(
    cm: &Lrc<SourceMap>,
    id: &str,
    mut module: Module,
    minify: bool,
) -> Result<String, TranspileError> {
    GLOBALS.set(&Globals::default(), || {
        module.visit_mut_with(&mut fixer(None));
    });

    let codegen_error = |message: String| TranspileError::Codegen {
        module: id.to_string(),
        message,
    };

    let mut buf = vec![];
    {
        let writer = JsWriter::new(cm.clone(), "\n", &mut buf, None);
        let mut emitter = Emitter {
            cfg: CodegenConfig::default()
                .with_target(EsVersion::Es2020)
                .with_ascii_only(false)
                .with_minify(minify)
                .with_omit_last_semi(false),
            cm: cm.clone(),
            comments: None,
            wr: writer,
        };
        emitter
            .emit_module(&module)
            .map_err(|e| codegen_error(e.to_string()))?;
    }

    String::from_utf8(buf).map_err(|e| codegen_error(format!("invalid UTF-8 output: {}", e)))
}

/// Parse one expression, registering it with `cm` so spans stay distinct.
pub(crate) fn parse_expr(cm: &Lrc<SourceMap>, code: &str) -> Result<Box<Expr>, String> {
    let fm = cm.new_source_file(Lrc::new(FileName::Anon), code.to_string());
    let lexer = Lexer::new(
        Syntax::Es(EsSyntax::default()),
        EsVersion::EsNext,
        StringInput::from(&*fm),
        None,
    );
    Parser::new_from(lexer)
        .parse_expr()
        .map_err(|e| format!("failed to parse {:?}: {:?}", code, e.kind()))
}

/// Parse generated module items.
pub(crate) fn parse_items(cm: &Lrc<SourceMap>, code: &str) -> Result<Vec<ModuleItem>, String> {
    let fm = cm.new_source_file(Lrc::new(FileName::Anon), code.to_string());
    let lexer = Lexer::new(
        Syntax::Es(EsSyntax::default()),
        EsVersion::EsNext,
        StringInput::from(&*fm),
        None,
    );
    Parser::new_from(lexer)
        .parse_module()
        .map(|module| module.body)
        .map_err(|e| format!("failed to parse generated code: {:?}", e.kind()))
}

/// JavaScript string literal for `value`.
pub(crate) fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// Replaces configured dotted expressions and `import.meta`
struct DefineReplacer {
    defines: Vec<(String, Expr)>,
    import_meta: Expr,
}

impl DefineReplacer {
    fn new(cm: &Lrc<SourceMap>, id: &str, defines: &BTreeMap<String, String>) -> Result<Self, String> {
        let defines = defines
            .iter()
            .map(|(path, replacement)| Ok((path.clone(), *parse_expr(cm, replacement)?)))
            .collect::<Result<Vec<_>, String>>()?;
        let import_meta = *parse_expr(cm, &format!("({{ url: {} }})", js_string(id)))?;
        Ok(Self {
            defines,
            import_meta,
        })
    }
}

impl VisitMut for DefineReplacer {
    fn visit_mut_expr(&mut self, expr: &mut Expr) {
        if let Expr::MetaProp(meta) = expr {
            if matches!(meta.kind, MetaPropKind::ImportMeta) {
                *expr = self.import_meta.clone();
                return;
            }
        }

        if !self.defines.is_empty() {
            if let Some(path) = dotted_path(expr) {
                if let Some((_, replacement)) = self.defines.iter().find(|(key, _)| *key == path) {
                    *expr = replacement.clone();
                    return;
                }
            }
        }

        expr.visit_mut_children_with(self);
    }
}

/// `a.b.c` for plain identifier/member chains.
fn dotted_path(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Ident(ident) => Some(ident.sym.to_string()),
        Expr::Member(member) => {
            let MemberProp::Ident(prop) = &member.prop else {
                return None;
            };
            Some(format!("{}.{}", dotted_path(&member.obj)?, prop.sym))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_kind_from_path() {
        assert_eq!(SourceKind::from_path("/src/app.tsx"), SourceKind::Tsx);
        assert_eq!(SourceKind::from_path("/src/util.ts"), SourceKind::TypeScript);
        assert_eq!(SourceKind::from_path("/src/view.jsx"), SourceKind::Jsx);
        assert_eq!(SourceKind::from_path("/react@18.3.1"), SourceKind::JavaScript);
        assert_eq!(SourceKind::from_path("/es2022/react.mjs"), SourceKind::JavaScript);
    }

    #[test]
    fn test_transpile_strips_types() {
        let source = r#"
            interface Patient { id: string }
            type Status = "active" | "inactive";
            const status: Status = "active";
            function identity<T>(value: T): T { return value; }
            const patient = identity<Patient>({ id: "1" }) as Patient;
        "#;
        let code = transpile(source, SourceKind::TypeScript, &TransformOptions::default().minify(false))
            .unwrap();
        assert!(!code.contains("interface"));
        assert!(!code.contains(": Status"));
        assert!(!code.contains("<T>"));
        assert!(code.contains("function identity"));
    }

    #[test]
    fn test_transpile_reports_parse_errors() {
        let err = transpile("const x: = 1;", SourceKind::TypeScript, &TransformOptions::default())
            .unwrap_err();
        assert!(matches!(err, TranspileError::Parse { .. }));
    }

    #[test]
    fn test_defines_and_import_meta() {
        let options = TransformOptions::default().define("__VERSION__", "\"1.2.3\"");
        let source = "const mode = process.env.NODE_ENV; const v = __VERSION__; const url = import.meta.url;";
        let code = transpile(source, SourceKind::JavaScript, &options).unwrap();
        assert!(code.contains("development"));
        assert!(code.contains("1.2.3"));
        assert!(code.contains("script.js"));
        assert!(!code.contains("process.env"));
        assert!(!code.contains("import.meta"));
    }

    #[test]
    fn test_prepare_collects_dependencies_once() {
        let source = r#"
            import React from "react";
            import { useState } from "react";
            export * from "./util.js";
            export { helper } from "./helper.js";
            const lazy = () => import("./lazy.js");
        "#;
        let parsed = prepare("file:///main.js", source, SourceKind::JavaScript, &TransformOptions::default())
            .unwrap();
        assert_eq!(
            parsed.dependencies(),
            ["react", "./util.js", "./helper.js", "./lazy.js"]
        );
    }
}
