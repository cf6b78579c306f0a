//! Script → host value conversion.
//!
//! A [`JsValue`] is taken on the engine thread and owns everything it needs
//! afterwards, so results can travel from the loop worker back to whichever
//! host thread asked for them.
//!
//! Capturing never runs script code. Properties are read through their
//! descriptors, so getters are skipped, and objects take their built-in string
//! and number forms: user `toString`, `valueOf`, `Symbol.toPrimitive` and
//! `toJSON` are not called. Dates are the exception to the last one and export
//! as ISO strings through the built-in `Date.prototype.toISOString`.

use rquickjs::convert::Coerced;
use rquickjs::function::This;
use rquickjs::{Array, Ctx, FromJs, Function, JsLifetime, Object, Symbol, Type, Value};
use serde::{Serialize, Serializer};
use serde_json::Value as Json;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Objects nested deeper than this export as `null`.
const MAX_EXPORT_DEPTH: usize = 64;

/// Export nodes kept or copied for objects reachable along more than one
/// path. Once spent, further repeats of an object export as `null`.
const MAX_SHARED_NODES: usize = 1 << 20;

/// Characters one capture may spend on array string forms.
const MAX_TEXT_LEN: usize = 1 << 20;

/// Script-level type of a captured value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JsType {
    Undefined,
    Null,
    Boolean,
    Number,
    BigInt,
    String,
    Symbol,
    Array,
    Function,
    Object,
}

impl fmt::Display for JsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Boolean => "boolean",
            Self::Number => "number",
            Self::BigInt => "bigint",
            Self::String => "string",
            Self::Symbol => "symbol",
            Self::Array => "array",
            Self::Function => "function",
            Self::Object => "object",
        };
        f.write_str(name)
    }
}

/// Owned snapshot of a script value.
#[derive(Debug, Clone, PartialEq)]
pub struct JsValue {
    kind: JsType,
    text: String,
    number: f64,
    truthy: bool,
    data: Json,
}

impl JsValue {
    /// The `undefined` value.
    pub fn undefined() -> Self {
        Self {
            kind: JsType::Undefined,
            text: "undefined".to_string(),
            number: f64::NAN,
            truthy: false,
            data: Json::Null,
        }
    }

    /// Capture `value`. Must run on the thread that owns `ctx`.
    pub fn from_js<'js>(ctx: &Ctx<'js>, value: &Value<'js>) -> Self {
        let kind = type_of(value);
        let truthy = truthiness(ctx, value);
        let Some(intrinsics) = intrinsics(ctx) else {
            return Self {
                kind,
                text: format!("[{}]", kind),
                number: f64::NAN,
                truthy,
                data: Json::Null,
            };
        };

        let mut capture = Capture::new(ctx.clone(), intrinsics);
        let text = capture.text(value, 0);
        let number = capture.number(value, &text);
        let (data, _) = capture.export(value, 0);

        Self {
            kind,
            text,
            number,
            truthy,
            data,
        }
    }

    pub fn kind(&self) -> JsType {
        self.kind
    }

    pub fn is_undefined(&self) -> bool {
        self.kind == JsType::Undefined
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self.kind, JsType::Undefined | JsType::Null)
    }

    /// `String(value)` as computed by the engine for primitives; the built-in
    /// form for objects.
    pub fn export_string(&self) -> String {
        self.text.clone()
    }

    /// `Number(value)` truncated toward zero; NaN becomes 0 and infinities saturate.
    pub fn export_int(&self) -> i64 {
        // `as` saturates and maps NaN to 0
        self.number.trunc() as i64
    }

    /// `Number(value)`; values that do not convert give 0.0.
    pub fn export_float(&self) -> f64 {
        if self.number.is_nan() { 0.0 } else { self.number }
    }

    /// ECMAScript truthiness.
    pub fn export_bool(&self) -> bool {
        self.truthy
    }

    /// Deep conversion to a generic host value.
    pub fn export(&self) -> Json {
        self.data.clone()
    }

    pub fn as_json(&self) -> &Json {
        &self.data
    }

    pub fn into_json(self) -> Json {
        self.data
    }
}

impl Default for JsValue {
    fn default() -> Self {
        Self::undefined()
    }
}

impl fmt::Display for JsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl Serialize for JsValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.data.serialize(serializer)
    }
}

/// String form of `value`, or `""` when there is no value.
pub fn export_string(value: Option<&JsValue>) -> String {
    value.map(JsValue::export_string).unwrap_or_default()
}

/// Integer form of `value`, or `0` when there is no value.
pub fn export_int(value: Option<&JsValue>) -> i64 {
    value.map(JsValue::export_int).unwrap_or(0)
}

/// Float form of `value`, or `0.0` when there is no value.
pub fn export_float(value: Option<&JsValue>) -> f64 {
    value.map(JsValue::export_float).unwrap_or(0.0)
}

/// Truthiness of `value`, or `false` when there is no value.
pub fn export_bool(value: Option<&JsValue>) -> bool {
    value.map(JsValue::export_bool).unwrap_or(false)
}

/// Generic form of `value`, or `null` when there is no value.
pub fn export(value: Option<&JsValue>) -> Json {
    value.map(JsValue::export).unwrap_or(Json::Null)
}

/// Display form of `value` without building its generic export.
pub(crate) fn display<'js>(ctx: &Ctx<'js>, value: &Value<'js>) -> String {
    match intrinsics(ctx) {
        Some(intrinsics) => Capture::new(ctx.clone(), intrinsics).text(value, 0),
        None => format!("[{}]", type_of(value)),
    }
}

/// Built-ins looked up before any script runs. Capture calls nothing else.
#[derive(Clone)]
struct Intrinsics<'js> {
    describe: Function<'js>,
    string: Function<'js>,
    function_source: Function<'js>,
    date_time: Function<'js>,
    date_iso: Function<'js>,
    date_string: Function<'js>,
    to_string_tag: Symbol<'js>,
}

// SAFETY: every field is an rquickjs handle carrying the same 'js lifetime
unsafe impl<'js> JsLifetime<'js> for Intrinsics<'js> {
    type Changed<'to> = Intrinsics<'to>;
}

impl<'js> Intrinsics<'js> {
    fn lookup(ctx: &Ctx<'js>) -> rquickjs::Result<Self> {
        let globals = ctx.globals();
        let object: Object = globals.get("Object")?;
        let function: Object = globals.get("Function")?;
        let function_proto: Object = function.get("prototype")?;
        let date: Object = globals.get("Date")?;
        let date_proto: Object = date.get("prototype")?;
        let symbol: Object = globals.get("Symbol")?;

        Ok(Self {
            describe: object.get("getOwnPropertyDescriptor")?,
            string: globals.get("String")?,
            function_source: function_proto.get("toString")?,
            date_time: date_proto.get("getTime")?,
            date_iso: date_proto.get("toISOString")?,
            date_string: date_proto.get("toString")?,
            to_string_tag: symbol.get("toStringTag")?,
        })
    }
}

/// Record the built-ins capture relies on. Must run before any script does.
pub(crate) fn install(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    let intrinsics = Intrinsics::lookup(ctx)?;
    // Fails only while the userdata is borrowed, which capture never leaves it
    let _ = ctx.store_userdata(intrinsics);
    Ok(())
}

fn intrinsics<'js>(ctx: &Ctx<'js>) -> Option<Intrinsics<'js>> {
    if let Some(stored) = ctx.userdata::<Intrinsics<'js>>() {
        return Some(stored.clone());
    }
    install(ctx).ok()?;
    ctx.userdata::<Intrinsics<'js>>().map(|stored| stored.clone())
}

fn type_of(value: &Value<'_>) -> JsType {
    match value.type_of() {
        Type::Uninitialized | Type::Undefined => JsType::Undefined,
        Type::Null => JsType::Null,
        Type::Bool => JsType::Boolean,
        Type::Int | Type::Float => JsType::Number,
        Type::String => JsType::String,
        Type::Symbol => JsType::Symbol,
        Type::BigInt => JsType::BigInt,
        Type::Array => JsType::Array,
        _ if value.is_function() => JsType::Function,
        _ => JsType::Object,
    }
}

fn truthiness<'js>(ctx: &Ctx<'js>, value: &Value<'js>) -> bool {
    if value.is_object() {
        return true;
    }
    match Coerced::<bool>::from_js(ctx, value.clone()) {
        Ok(Coerced(truthy)) => truthy,
        Err(err) => {
            if err.is_exception() {
                let _ = ctx.catch();
            }
            false
        }
    }
}

fn number_to_json(n: f64) -> Json {
    if !n.is_finite() {
        return Json::Null;
    }
    if n.fract() == 0.0 && n >= i64::MIN as f64 && n <= i64::MAX as f64 {
        return Json::from(n as i64);
    }
    serde_json::Number::from_f64(n)
        .map(Json::Number)
        .unwrap_or(Json::Null)
}

/// What an own property holds.
enum Slot<'js> {
    Missing,
    Data(Value<'js>),
    Accessor,
}

/// One capture walk over a value graph.
struct Capture<'js> {
    ctx: Ctx<'js>,
    intrinsics: Intrinsics<'js>,
    /// Objects on the current path; meeting one again is a cycle.
    path: HashSet<Value<'js>>,
    /// Objects already exported, with the result and its node count when it
    /// fit in the shared budget.
    done: HashMap<Value<'js>, Option<(Json, usize)>>,
    shared_budget: usize,
    text_budget: usize,
}

impl<'js> Capture<'js> {
    fn new(ctx: Ctx<'js>, intrinsics: Intrinsics<'js>) -> Self {
        Self {
            ctx,
            intrinsics,
            path: HashSet::new(),
            done: HashMap::new(),
            shared_budget: MAX_SHARED_NODES,
            text_budget: MAX_TEXT_LEN,
        }
    }

    /// Keep the result, clearing any exception the call left behind.
    fn settle<T>(&self, result: rquickjs::Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                if err.is_exception() {
                    let _ = self.ctx.catch();
                }
                None
            }
        }
    }

    fn key(&self, name: &str) -> Option<Value<'js>> {
        self.settle(rquickjs::String::from_str(self.ctx.clone(), name))
            .map(|s| s.into_value())
    }

    fn property(&self, object: &Object<'js>, key: Value<'js>) -> Slot<'js> {
        let described = self
            .intrinsics
            .describe
            .call::<_, Value>((object.clone(), key));
        let Some(descriptor) = self.settle(described).and_then(Value::into_object) else {
            return Slot::Missing;
        };

        // Only data descriptors have an own `value`
        for (name, value) in descriptor.props::<String, Value>().flatten() {
            if name == "value" {
                return Slot::Data(value);
            }
        }
        Slot::Accessor
    }

    /// First data property named `key` on the prototype chain. An accessor
    /// shadows anything further up.
    fn inherited(&self, object: &Object<'js>, key: Value<'js>) -> Option<Value<'js>> {
        let mut current = Some(object.clone());
        for _ in 0..=MAX_EXPORT_DEPTH {
            let object = current?;
            match self.property(&object, key.clone()) {
                Slot::Data(value) => return Some(value),
                Slot::Accessor => return None,
                Slot::Missing => current = object.get_prototype(),
            }
        }
        None
    }

    fn inherited_string(&self, object: &Object<'js>, name: &str) -> Option<String> {
        let value = self.inherited(object, self.key(name)?)?;
        value.as_string().and_then(|s| s.to_string().ok())
    }

    fn date_time(&self, object: &Object<'js>) -> Option<f64> {
        let time = self
            .intrinsics
            .date_time
            .call::<_, f64>((This(object.clone()),));
        self.settle(time)
    }

    fn text(&mut self, value: &Value<'js>, depth: usize) -> String {
        let Some(object) = value.as_object() else {
            if let Some(s) = value.as_string() {
                return s.to_string().unwrap_or_default();
            }
            let converted = self.intrinsics.string.call::<_, String>((value.clone(),));
            return self.settle(converted).unwrap_or_default();
        };

        if value.is_function() {
            let source = self
                .intrinsics
                .function_source
                .call::<_, String>((This(value.clone()),));
            return self.settle(source).unwrap_or_default();
        }
        if let Some(array) = value.as_array() {
            return self.join(array, depth);
        }
        let date = self
            .intrinsics
            .date_string
            .call::<_, String>((This(object.clone()),));
        if let Some(date) = self.settle(date) {
            return date;
        }
        if value.is_error() {
            return self.error_text(object);
        }

        let tag_key = self.intrinsics.to_string_tag.clone().into_value();
        let tag = self
            .inherited(object, tag_key)
            .and_then(|tag| tag.as_string().and_then(|s| s.to_string().ok()))
            .unwrap_or_else(|| "Object".to_string());
        format!("[object {}]", tag)
    }

    fn join(&mut self, array: &Array<'js>, depth: usize) -> String {
        let id = array.as_value().clone();
        if depth > MAX_EXPORT_DEPTH || !self.path.insert(id.clone()) {
            return String::new();
        }

        let mut out = String::new();
        for index in 0..array.len() {
            if self.text_budget == 0 {
                break;
            }
            if index > 0 {
                out.push(',');
                self.text_budget -= 1;
            }
            let key = Value::new_number(self.ctx.clone(), index as f64);
            let Slot::Data(item) = self.property(array.as_object(), key) else {
                continue;
            };
            if item.is_null() || item.is_undefined() {
                continue;
            }
            let part = self.text(&item, depth + 1);
            // nested arrays charge their own characters
            if item.as_array().is_none() {
                self.text_budget = self.text_budget.saturating_sub(part.len());
            }
            out.push_str(&part);
        }

        self.path.remove(&id);
        out
    }

    fn error_text(&self, object: &Object<'js>) -> String {
        let name = self
            .inherited_string(object, "name")
            .unwrap_or_else(|| "Error".to_string());
        let message = self.inherited_string(object, "message").unwrap_or_default();
        match (name.is_empty(), message.is_empty()) {
            (true, _) => message,
            (_, true) => name,
            _ => format!("{}: {}", name, message),
        }
    }

    /// `Number(value)`. Objects convert through their built-in string form,
    /// except dates which give their time value.
    fn number(&mut self, value: &Value<'js>, text: &str) -> f64 {
        if let Some(object) = value.as_object() {
            if let Some(time) = self.date_time(object) {
                return time;
            }
            return match self.key(text) {
                Some(string) => self.coerce_number(string),
                None => f64::NAN,
            };
        }
        if value.type_of() == Type::BigInt {
            return text.parse().unwrap_or(f64::NAN);
        }
        self.coerce_number(value.clone())
    }

    fn coerce_number(&self, value: Value<'js>) -> f64 {
        self.settle(Coerced::<f64>::from_js(&self.ctx, value))
            .map(|Coerced(n)| n)
            .unwrap_or(f64::NAN)
    }

    fn primitive(&mut self, value: &Value<'js>) -> Json {
        match type_of(value) {
            JsType::Boolean => Json::Bool(value.as_bool().unwrap_or(false)),
            JsType::Number => match value.as_int() {
                Some(i) => Json::from(i),
                None => number_to_json(value.as_float().unwrap_or(f64::NAN)),
            },
            JsType::String => value
                .as_string()
                .and_then(|s| s.to_string().ok())
                .map(Json::String)
                .unwrap_or(Json::Null),
            JsType::BigInt | JsType::Symbol => {
                let text = self.text(value, 0);
                match text.parse::<i64>() {
                    Ok(i) => Json::from(i),
                    Err(_) => Json::String(text),
                }
            }
            _ => Json::Null,
        }
    }

    /// Generic export plus the number of nodes it holds.
    fn export(&mut self, value: &Value<'js>, depth: usize) -> (Json, usize) {
        let Some(object) = value.as_object() else {
            return (self.primitive(value), 1);
        };
        if value.is_function() || depth > MAX_EXPORT_DEPTH || self.path.contains(value) {
            return (Json::Null, 1);
        }

        if let Some(previous) = self.done.get(value) {
            return match previous {
                Some((json, nodes)) if *nodes <= self.shared_budget => {
                    let (json, nodes) = (json.clone(), *nodes);
                    self.shared_budget -= nodes;
                    (json, nodes)
                }
                _ => (Json::Null, 1),
            };
        }

        self.path.insert(value.clone());
        let exported = match value.as_array() {
            Some(array) => self.export_array(array, depth),
            None => self.export_object(object, depth),
        };
        self.path.remove(value);

        if depth > 0 {
            let kept = if exported.1 <= self.shared_budget {
                self.shared_budget -= exported.1;
                Some(exported.clone())
            } else {
                None
            };
            self.done.insert(value.clone(), kept);
        }
        exported
    }

    fn export_array(&mut self, array: &Array<'js>, depth: usize) -> (Json, usize) {
        let len = array.len();
        let mut items = Vec::with_capacity(len.min(1024));
        let mut nodes = 1;

        for index in 0..len {
            let key = Value::new_number(self.ctx.clone(), index as f64);
            let (item, count) = match self.property(array.as_object(), key) {
                Slot::Data(item) => self.export(&item, depth + 1),
                Slot::Missing | Slot::Accessor => (Json::Null, 1),
            };
            nodes += count;
            items.push(item);
        }
        (Json::Array(items), nodes)
    }

    fn export_object(&mut self, object: &Object<'js>, depth: usize) -> (Json, usize) {
        if self.date_time(object).is_some() {
            let iso = self
                .intrinsics
                .date_iso
                .call::<_, String>((This(object.clone()),));
            return (self.settle(iso).map(Json::String).unwrap_or(Json::Null), 1);
        }

        let keys: Vec<String> = object.keys::<String>().filter_map(Result::ok).collect();
        let mut map = serde_json::Map::new();
        let mut nodes = 1;

        for name in keys {
            let Some(key) = self.key(&name) else {
                continue;
            };
            let Slot::Data(item) = self.property(object, key) else {
                continue;
            };
            if item.is_function() {
                continue;
            }
            let (json, count) = self.export(&item, depth + 1);
            nodes += count;
            map.insert(name, json);
        }
        (Json::Object(map), nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rquickjs::{Context, Runtime};
    use serde_json::json;

    fn capture(source: &str) -> JsValue {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        context.with(|ctx| {
            let value: Value = ctx.eval(source).unwrap();
            JsValue::from_js(&ctx, &value)
        })
    }

    /// Capture the value of `source`, then evaluate `after` in the same context.
    fn capture_then(source: &str, after: &str) -> (JsValue, JsValue) {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        context.with(|ctx| {
            install(&ctx).unwrap();
            let value: Value = ctx.eval(source).unwrap();
            let captured = JsValue::from_js(&ctx, &value);
            let later: Value = ctx.eval(after).unwrap();
            (captured, JsValue::from_js(&ctx, &later))
        })
    }

    #[test]
    fn test_missing_value_defaults() {
        assert_eq!(export_string(None), "");
        assert_eq!(export_int(None), 0);
        assert_eq!(export_float(None), 0.0);
        assert!(!export_bool(None));
        assert_eq!(export(None), Json::Null);
    }

    #[test]
    fn test_string_export_uses_engine_stringification() {
        assert_eq!(capture("42").export_string(), "42");
        assert_eq!(capture("1.5").export_string(), "1.5");
        assert_eq!(capture("true").export_string(), "true");
        assert_eq!(capture("null").export_string(), "null");
        assert_eq!(capture("undefined").export_string(), "undefined");
        assert_eq!(capture("[1, 2]").export_string(), "1,2");
        assert_eq!(capture("[1, [2, null], 'x']").export_string(), "1,2,,x");
        assert_eq!(capture("({})").export_string(), "[object Object]");
        assert_eq!(capture("Symbol('tag')").export_string(), "Symbol(tag)");
        assert_eq!(capture("123n").export_string(), "123");
    }

    #[test]
    fn test_string_export_of_builtin_objects() {
        assert_eq!(capture("new TypeError('bad')").export_string(), "TypeError: bad");
        assert_eq!(capture("new Error()").export_string(), "Error");
        assert_eq!(capture("new Map()").export_string(), "[object Map]");
        assert!(capture("(function named(a) { return a; })")
            .export_string()
            .contains("named"));
        assert!(capture("new Date(0)").export_string().contains("1970"));
    }

    #[test]
    fn test_int_export_truncates() {
        assert_eq!(capture("3.9").export_int(), 3);
        assert_eq!(capture("-3.9").export_int(), -3);
        assert_eq!(capture("'17'").export_int(), 17);
        assert_eq!(capture("'abc'").export_int(), 0);
        assert_eq!(capture("({})").export_int(), 0);
        assert_eq!(capture("[7]").export_int(), 7);
        assert_eq!(capture("new Date(1500)").export_int(), 1500);
        assert_eq!(capture("Symbol()").export_int(), 0);
        assert_eq!(capture("true").export_int(), 1);
        assert_eq!(capture("Infinity").export_int(), i64::MAX);
    }

    #[test]
    fn test_float_export() {
        assert_eq!(capture("2.5").export_float(), 2.5);
        assert_eq!(capture("'0.25'").export_float(), 0.25);
        assert_eq!(capture("'nope'").export_float(), 0.0);
        assert_eq!(capture("null").export_float(), 0.0);
    }

    #[test]
    fn test_bool_export_follows_truthiness() {
        for falsy in ["false", "0", "-0", "NaN", "''", "null", "undefined"] {
            assert!(!capture(falsy).export_bool(), "{falsy} should be falsy");
        }
        for truthy in ["true", "1", "'0'", "'false'", "[]", "({})", "(function(){})"] {
            assert!(capture(truthy).export_bool(), "{truthy} should be truthy");
        }
    }

    #[test]
    fn test_generic_export() {
        let value = capture("({ a: 1, b: 'two', c: [1.5, null, true], d: { e: undefined }, f() {} })");
        assert_eq!(value.kind(), JsType::Object);
        assert_eq!(
            value.export(),
            json!({"a": 1, "b": "two", "c": [1.5, null, true], "d": {"e": null}})
        );
    }

    #[test]
    fn test_generic_export_functions_in_arrays_become_null() {
        assert_eq!(capture("[1, () => 2]").export(), json!([1, null]));
        assert_eq!(capture("(function named() {})").kind(), JsType::Function);
        assert_eq!(capture("(function named() {})").export(), Json::Null);
    }

    #[test]
    fn test_dates_export_as_iso_strings() {
        let value = capture("new Date(Date.UTC(2020, 0, 2))");
        assert_eq!(value.export(), json!("2020-01-02T00:00:00.000Z"));
        assert_eq!(capture("new Date(NaN)").export(), Json::Null);
    }

    #[test]
    fn test_capture_runs_no_script_code() {
        let (value, hits) = capture_then(
            "var hits = 0; \
             var o = { \
                 plain: 1, \
                 get x() { hits++; return 1; }, \
                 toString() { hits++; return 's'; }, \
                 valueOf() { hits++; return 9; }, \
                 toJSON() { hits++; return 'j'; }, \
                 [Symbol.toPrimitive]() { hits++; return 'p'; } \
             }; \
             o",
            "hits",
        );
        assert_eq!(hits.export_int(), 0);
        assert_eq!(value.export(), json!({"plain": 1}));
        assert_eq!(value.export_string(), "[object Object]");
        assert_eq!(value.export_int(), 0);
        assert!(value.export_bool());
    }

    #[test]
    fn test_capture_skips_array_accessors() {
        let (value, hits) = capture_then(
            "var hits = 0; \
             var a = [1, 2]; \
             Object.defineProperty(a, 1, { get() { hits++; return 5; } }); \
             a",
            "hits",
        );
        assert_eq!(hits.export_int(), 0);
        assert_eq!(value.export(), json!([1, null]));
        assert_eq!(value.export_string(), "1,");
    }

    #[test]
    fn test_capture_ignores_replaced_globals() {
        let (value, hits) = capture_then(
            "var hits = 0; \
             Object.getOwnPropertyDescriptor = function () { hits++; return undefined; }; \
             String = function () { hits++; return 'x'; }; \
             ({ a: Symbol('s') })",
            "hits",
        );
        assert_eq!(hits.export_int(), 0);
        assert_eq!(value.export(), json!({"a": "Symbol(s)"}));
    }

    #[test]
    fn test_cycles_export_as_null() {
        let value = capture("const o = { name: 'loop' }; o.self = o; o");
        assert_eq!(value.export(), json!({"name": "loop", "self": null}));

        let value = capture("const a = [1]; a.push(a); a");
        assert_eq!(value.export(), json!([1, null]));
        assert_eq!(value.export_string(), "1,");
    }

    #[test]
    fn test_doubly_self_referencing_object() {
        let value = capture("var o = { n: 1 }; o.a = o; o.b = o; o");
        assert_eq!(value.export(), json!({"n": 1, "a": null, "b": null}));
    }

    #[test]
    fn test_shared_objects_are_copied() {
        let value = capture(
            "var shared = { id: 7, tags: ['x'] }; \
             var list = []; \
             for (var i = 0; i < 1000; i++) list.push(shared); \
             ({ first: shared, list: list })",
        );
        let exported = value.export();
        assert_eq!(exported["first"], json!({"id": 7, "tags": ["x"]}));
        let list = exported["list"].as_array().unwrap();
        assert_eq!(list.len(), 1000);
        assert!(list.iter().all(|item| item == &json!({"id": 7, "tags": ["x"]})));
    }

    #[test]
    fn test_diamond_chain_is_bounded() {
        // every level references the next one twice: 2^64 paths to the bottom
        let value = capture(
            "var node = { leaf: true }; \
             for (var i = 0; i < 64; i++) node = { a: node, b: node }; \
             node",
        );
        assert_eq!(value.kind(), JsType::Object);
        assert!(value.export()["a"].is_object());
    }

    #[test]
    fn test_integral_floats_export_as_integers() {
        assert_eq!(capture("6 * 7").export(), json!(42));
        assert_eq!(capture("2 ** 40").export(), json!(1_099_511_627_776_i64));
        assert_eq!(capture("0.1 + 0.2").export(), json!(0.1 + 0.2));
        assert_eq!(capture("NaN").export(), Json::Null);
    }

    #[test]
    fn test_snapshot_is_send() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<JsValue>();
    }
}
