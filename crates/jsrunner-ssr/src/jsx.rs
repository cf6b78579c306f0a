//! JSX lowering.
//!
//! Elements become calls into either a classic pragma
//! (`React.createElement(type, props, ...children)`) or the automatic
//! runtime (`jsx(type, { ...props, children }, key)` imported from
//! `<source>/jsx-runtime`).
//!
//! Names and string values are read back from the source map, so the
//! lowering only depends on spans and node shapes.

use crate::transform::{js_string, parse_expr, parse_items};
use swc_common::{DUMMY_SP, SourceMap, SourceMapper, Span, Spanned, sync::Lrc};
use swc_ecma_ast::{
    ArrayLit, Expr, ExprOrSpread, Invalid, JSXAttrOrSpread, JSXAttrValue, JSXElement, JSXElementChild,
    JSXExpr, JSXFragment, KeyValueProp, Lit, Module, ObjectLit, Prop, PropName, PropOrSpread,
};
use swc_ecma_visit::{VisitMut, VisitMutWith};

const JSX_FN: &str = "__jsx";
const JSXS_FN: &str = "__jsxs";
const FRAGMENT: &str = "__Fragment";

/// Target of JSX lowering
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsxRuntime {
    /// `pragma(type, props, ...children)`; fragments use `pragma_frag`.
    Classic { pragma: String, pragma_frag: String },
    /// `jsx`/`jsxs`/`Fragment` imported from `<import_source>/jsx-runtime`.
    Automatic { import_source: String },
}

impl JsxRuntime {
    /// `React.createElement` / `React.Fragment`
    pub fn classic() -> Self {
        Self::Classic {
            pragma: "React.createElement".to_string(),
            pragma_frag: "React.Fragment".to_string(),
        }
    }

    pub fn automatic(import_source: impl Into<String>) -> Self {
        Self::Automatic {
            import_source: import_source.into(),
        }
    }
}

impl Default for JsxRuntime {
    fn default() -> Self {
        Self::automatic("react")
    }
}

/// Lower every JSX element and fragment in `module`.
pub(crate) fn lower_jsx(module: &mut Module, cm: &Lrc<SourceMap>, runtime: &JsxRuntime) -> Result<(), String> {
    let mut lowering = JsxLowering {
        cm,
        runtime,
        uses_runtime: false,
        error: None,
    };
    module.visit_mut_with(&mut lowering);
    if let Some(err) = lowering.error {
        return Err(err);
    }

    if let (true, JsxRuntime::Automatic { import_source }) = (lowering.uses_runtime, runtime) {
        let import = format!(
            "import {{ jsx as {}, jsxs as {}, Fragment as {} }} from {};",
            JSX_FN,
            JSXS_FN,
            FRAGMENT,
            js_string(&format!("{}/jsx-runtime", import_source))
        );
        let items = parse_items(cm, &import)?;
        module.body.splice(0..0, items);
    }
    Ok(())
}

struct JsxLowering<'a> {
    cm: &'a Lrc<SourceMap>,
    runtime: &'a JsxRuntime,
    uses_runtime: bool,
    error: Option<String>,
}

impl VisitMut for JsxLowering<'_> {
    fn visit_mut_expr(&mut self, expr: &mut Expr) {
        expr.visit_mut_children_with(self);
        if self.error.is_some() {
            return;
        }

        let taken = std::mem::replace(expr, Expr::Invalid(Invalid { span: DUMMY_SP }));
        let lowered = match taken {
            Expr::JSXElement(element) => self.element(*element),
            Expr::JSXFragment(fragment) => self.fragment(fragment),
            other => {
                *expr = other;
                return;
            }
        };
        match lowered {
            Ok(lowered) => *expr = lowered,
            Err(err) => self.error = Some(err),
        }
    }
}

impl JsxLowering<'_> {
    fn element(&mut self, element: JSXElement) -> Result<Expr, String> {
        let name = self.snippet(element.opening.name.span())?;
        let tag = self.tag(&name)?;

        let mut props = Vec::new();
        let mut key = None;
        for attr in element.opening.attrs {
            match attr {
                JSXAttrOrSpread::SpreadElement(spread) => props.push(PropOrSpread::Spread(spread)),
                JSXAttrOrSpread::JSXAttr(attr) => {
                    let name = self.snippet(attr.name.span())?;
                    let value = self.attr_value(attr.value)?;
                    if name == "key" && matches!(self.runtime, JsxRuntime::Automatic { .. }) {
                        key = Some(value);
                    } else {
                        props.push(self.prop(&name, value)?);
                    }
                }
            }
        }

        let children = self.children(element.children)?;
        self.create(tag, props, key, children)
    }

    fn fragment(&mut self, fragment: JSXFragment) -> Result<Expr, String> {
        let runtime = self.runtime;
        let tag = match runtime {
            JsxRuntime::Classic { pragma_frag, .. } => *parse_expr(self.cm, pragma_frag)?,
            JsxRuntime::Automatic { .. } => *parse_expr(self.cm, FRAGMENT)?,
        };
        let children = self.children(fragment.children)?;
        self.create(tag, Vec::new(), None, children)
    }

    fn create(
        &mut self,
        tag: Expr,
        mut props: Vec<PropOrSpread>,
        key: Option<Expr>,
        mut children: Vec<ExprOrSpread>,
    ) -> Result<Expr, String> {
        let runtime = self.runtime;
        match runtime {
            JsxRuntime::Classic { pragma, .. } => {
                let props = if props.is_empty() {
                    *parse_expr(self.cm, "null")?
                } else {
                    object(props)
                };
                let mut args = vec![plain(tag), plain(props)];
                args.append(&mut children);
                self.call(pragma, args)
            }
            JsxRuntime::Automatic { .. } => {
                self.uses_runtime = true;
                let single = children.len() == 1 && children[0].spread.is_none();
                let callee = if children.is_empty() || single { JSX_FN } else { JSXS_FN };
                if single {
                    let child = children.remove(0);
                    props.push(self.prop("children", *child.expr)?);
                } else if !children.is_empty() {
                    let array = Expr::Array(ArrayLit {
                        span: DUMMY_SP,
                        elems: children.into_iter().map(Some).collect(),
                    });
                    props.push(self.prop("children", array)?);
                }

                let mut args = vec![plain(tag), plain(object(props))];
                if let Some(key) = key {
                    args.push(plain(key));
                }
                self.call(callee, args)
            }
        }
    }

    fn attr_value(&mut self, value: Option<JSXAttrValue>) -> Result<Expr, String> {
        match value {
            None => Ok(*parse_expr(self.cm, "true")?),
            Some(JSXAttrValue::JSXExprContainer(container)) => match container.expr {
                JSXExpr::Expr(expr) => Ok(*expr),
                JSXExpr::JSXEmptyExpr(_) => {
                    Err("JSX attributes must be assigned a non-empty expression".to_string())
                }
            },
            Some(JSXAttrValue::JSXElement(element)) => self.element(*element),
            Some(JSXAttrValue::JSXFragment(fragment)) => self.fragment(fragment),
            Some(other) => {
                let raw = self.snippet(other.span())?;
                let inner = raw.get(1..raw.len().saturating_sub(1)).unwrap_or(&raw);
                self.string(&decode_entities(inner))
            }
        }
    }

    fn children(&mut self, children: Vec<JSXElementChild>) -> Result<Vec<ExprOrSpread>, String> {
        let mut out = Vec::with_capacity(children.len());
        for child in children {
            match child {
                JSXElementChild::JSXText(text) => {
                    let raw = self.snippet(text.span)?;
                    if let Some(cleaned) = clean_text(&raw) {
                        out.push(plain(self.string(&decode_entities(&cleaned))?));
                    }
                }
                JSXElementChild::JSXExprContainer(container) => {
                    if let JSXExpr::Expr(expr) = container.expr {
                        out.push(ExprOrSpread { spread: None, expr });
                    }
                }
                JSXElementChild::JSXSpreadChild(spread) => out.push(ExprOrSpread {
                    spread: Some(DUMMY_SP),
                    expr: spread.expr,
                }),
                JSXElementChild::JSXElement(element) => out.push(plain(self.element(*element)?)),
                JSXElementChild::JSXFragment(fragment) => out.push(plain(self.fragment(fragment)?)),
            }
        }
        Ok(out)
    }

    /// Intrinsic tags become strings; components stay references.
    fn tag(&self, name: &str) -> Result<Expr, String> {
        let intrinsic = name.contains(':')
            || name.contains('-')
            || (!name.contains('.') && name.starts_with(|c: char| c.is_ascii_lowercase()));
        if intrinsic {
            self.string(name)
        } else {
            Ok(*parse_expr(self.cm, name)?)
        }
    }

    fn prop(&self, name: &str, value: Expr) -> Result<PropOrSpread, String> {
        let key = match *parse_expr(self.cm, &js_string(name))? {
            Expr::Lit(Lit::Str(key)) => PropName::Str(key),
            _ => return Err(format!("invalid JSX attribute name {:?}", name)),
        };
        Ok(PropOrSpread::Prop(Box::new(Prop::KeyValue(KeyValueProp {
            key,
            value: Box::new(value),
        }))))
    }

    fn string(&self, value: &str) -> Result<Expr, String> {
        Ok(*parse_expr(self.cm, &js_string(value))?)
    }

    fn call(&self, callee: &str, args: Vec<ExprOrSpread>) -> Result<Expr, String> {
        let mut call = parse_expr(self.cm, &format!("{}()", callee))?;
        match &mut *call {
            Expr::Call(call) => call.args = args,
            _ => return Err(format!("{} is not a callable expression", callee)),
        }
        Ok(*call)
    }

    fn snippet(&self, span: Span) -> Result<String, String> {
        self.cm
            .span_to_snippet(span)
            .map_err(|e| format!("unreadable JSX source: {:?}", e))
    }
}

fn plain(expr: Expr) -> ExprOrSpread {
    ExprOrSpread {
        spread: None,
        expr: Box::new(expr),
    }
}

fn object(props: Vec<PropOrSpread>) -> Expr {
    Expr::Object(ObjectLit { span: DUMMY_SP, props })
}

/// Collapse JSX text the way React toolchains do: lines are trimmed, blank
/// lines dropped and the rest joined with single spaces.
fn clean_text(raw: &str) -> Option<String> {
    let lines: Vec<&str> = raw
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .collect();
    let last_non_blank = lines
        .iter()
        .rposition(|line| line.chars().any(|c| c != ' ' && c != '\t'));

    let mut out = String::new();
    for (i, line) in lines.iter().enumerate() {
        let line = line.replace('\t', " ");
        let mut trimmed: &str = &line;
        if i != 0 {
            trimmed = trimmed.trim_start_matches(' ');
        }
        if i != lines.len() - 1 {
            trimmed = trimmed.trim_end_matches(' ');
        }
        if trimmed.is_empty() {
            continue;
        }
        out.push_str(trimmed);
        if Some(i) != last_non_blank {
            out.push(' ');
        }
    }
    (!out.is_empty()).then_some(out)
}

/// Decode the HTML entities JSX text and attribute strings may carry.
fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let decoded = tail
            .find(';')
            .filter(|&end| end <= 10)
            .and_then(|end| entity(&tail[1..end]).map(|c| (c, end)));
        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        "copy" => Some('\u{a9}'),
        _ => {
            let code = match name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => name.strip_prefix('#')?.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}
