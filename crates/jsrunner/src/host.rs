//! Host → script values.

use crate::value::JsValue;
use rquickjs::function::Rest;
use rquickjs::{Array, Ctx, Function, IntoJs, Object, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Host callable exposed to scripts.
///
/// Arguments arrive as owned snapshots. An `Err` is thrown into the script as
/// an `Error` carrying the error chain as its message.
pub type HostFunction = Arc<dyn Fn(&[JsValue]) -> anyhow::Result<HostValue> + Send + Sync>;

/// A value the host binds into script scope.
#[derive(Clone, Default)]
pub enum HostValue {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<HostValue>),
    Object(BTreeMap<String, HostValue>),
    Function(HostFunction),
}

impl HostValue {
    /// Wrap a closure as a callable value.
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&[JsValue]) -> anyhow::Result<HostValue> + Send + Sync + 'static,
    {
        Self::Function(Arc::new(f))
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Self::Function(_))
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("Undefined"),
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Self::Int(i) => f.debug_tuple("Int").field(i).finish(),
            Self::Float(x) => f.debug_tuple("Float").field(x).finish(),
            Self::String(s) => f.debug_tuple("String").field(s).finish(),
            Self::Array(items) => f.debug_tuple("Array").field(items).finish(),
            Self::Object(map) => f.debug_tuple("Object").field(map).finish(),
            Self::Function(_) => f.write_str("Function(..)"),
        }
    }
}

impl PartialEq for HostValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            (Self::Function(a), Self::Function(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

macro_rules! host_value_from {
    ($variant:ident: $($ty:ty),+ => $conv:expr) => {
        $(
            impl From<$ty> for HostValue {
                fn from(value: $ty) -> Self {
                    #[allow(clippy::redundant_closure_call)]
                    HostValue::$variant(($conv)(value))
                }
            }
        )+
    };
}

host_value_from!(Bool: bool => |v| v);
host_value_from!(Int: i8, i16, i32, i64, u8, u16, u32 => i64::from);
host_value_from!(Float: f32, f64 => f64::from);
host_value_from!(String: String, &str, &String => |v: _| String::from(v));

impl From<()> for HostValue {
    fn from(_: ()) -> Self {
        HostValue::Undefined
    }
}

impl<T: Into<HostValue>> From<Option<T>> for HostValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(HostValue::Null)
    }
}

impl<T: Into<HostValue>> From<Vec<T>> for HostValue {
    fn from(items: Vec<T>) -> Self {
        HostValue::Array(items.into_iter().map(Into::into).collect())
    }
}

impl<K: Into<String>, V: Into<HostValue>> FromIterator<(K, V)> for HostValue {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        HostValue::Object(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl From<serde_json::Value> for HostValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match value {
            Json::Null => HostValue::Null,
            Json::Bool(b) => HostValue::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => HostValue::Int(i),
                None => HostValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => HostValue::String(s),
            Json::Array(items) => HostValue::Array(items.into_iter().map(Into::into).collect()),
            Json::Object(map) => HostValue::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect()),
        }
    }
}

impl From<&JsValue> for HostValue {
    fn from(value: &JsValue) -> Self {
        if value.is_undefined() {
            HostValue::Undefined
        } else {
            value.export().into()
        }
    }
}

impl<'js> IntoJs<'js> for HostValue {
    fn into_js(self, ctx: &Ctx<'js>) -> rquickjs::Result<Value<'js>> {
        match self {
            HostValue::Undefined => Ok(Value::new_undefined(ctx.clone())),
            HostValue::Null => Ok(Value::new_null(ctx.clone())),
            HostValue::Bool(b) => Ok(Value::new_bool(ctx.clone(), b)),
            HostValue::Int(i) => match i32::try_from(i) {
                Ok(small) => Ok(Value::new_int(ctx.clone(), small)),
                Err(_) => Ok(Value::new_float(ctx.clone(), i as f64)),
            },
            HostValue::Float(x) => Ok(Value::new_float(ctx.clone(), x)),
            HostValue::String(s) => rquickjs::String::from_str(ctx.clone(), &s).map(|s| s.into_value()),
            HostValue::Array(items) => {
                let array = Array::new(ctx.clone())?;
                for (index, item) in items.into_iter().enumerate() {
                    array.set(index, item)?;
                }
                Ok(array.into_value())
            }
            HostValue::Object(map) => {
                let object = Object::new(ctx.clone())?;
                for (key, item) in map {
                    object.set(key, item)?;
                }
                Ok(object.into_value())
            }
            HostValue::Function(f) => host_function(ctx, f).map(|f| f.into_value()),
        }
    }
}

fn host_function<'js>(ctx: &Ctx<'js>, f: HostFunction) -> rquickjs::Result<Function<'js>> {
    Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<Value<'js>> {
            let args: Vec<JsValue> = args.0.iter().map(|arg| JsValue::from_js(&ctx, arg)).collect();
            match f(&args) {
                Ok(result) => result.into_js(&ctx),
                Err(err) => Err(throw_error(&ctx, "Error", &format!("{:#}", err))),
            }
        },
    )
}

/// Throw a fresh `Error` named `name` and return the pending-exception marker.
pub(crate) fn throw_error<'js>(ctx: &Ctx<'js>, name: &str, message: &str) -> rquickjs::Error {
    let error = ctx
        .globals()
        .get::<_, Function>("Error")
        .and_then(|ctor| ctor.call::<_, Object>((message,)));

    match error {
        Ok(error) => {
            if name != "Error" {
                let _ = error.set("name", name);
            }
            ctx.throw(error.into_value())
        }
        Err(err) => err,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_primitives() {
        assert_eq!(HostValue::from(true), HostValue::Bool(true));
        assert_eq!(HostValue::from(7_u8), HostValue::Int(7));
        assert_eq!(HostValue::from(-3_i64), HostValue::Int(-3));
        assert_eq!(HostValue::from(1.5_f32), HostValue::Float(1.5));
        assert_eq!(HostValue::from("hi"), HostValue::String("hi".into()));
        assert_eq!(HostValue::from(None::<i32>), HostValue::Null);
        assert_eq!(HostValue::from(()), HostValue::Undefined);
    }

    #[test]
    fn test_from_json() {
        let value = HostValue::from(json!({"a": [1, 2.5, "x"], "b": null}));
        let expected: HostValue = [
            (
                "a",
                HostValue::Array(vec![HostValue::Int(1), HostValue::Float(2.5), HostValue::String("x".into())]),
            ),
            ("b", HostValue::Null),
        ]
        .into_iter()
        .collect();
        assert_eq!(value, expected);
    }

    #[test]
    fn test_function_equality_is_identity() {
        let f = HostValue::function(|_| Ok(HostValue::Null));
        let g = HostValue::function(|_| Ok(HostValue::Null));
        assert_eq!(f, f.clone());
        assert_ne!(f, g);
        assert_eq!(format!("{:?}", f), "Function(..)");
    }

    #[test]
    fn test_host_value_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HostValue>();
    }
}
