use crate::Result;
use crate::error::TemplateError;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use std::collections::HashMap;
use std::fmt;

pub mod serializer;

/// Runtime value of the template language.
///
/// Caller input is converted into this type before validation. Only
/// `Str`, `Int`, `Float` and `Bool` may appear in a validated variable set;
/// `List` values are produced by the evaluator itself (tuple literals and
/// functions such as `split` or `range`).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Str(String),
    Int(i64),
    Float(f64),

    /// Ordered sequence of values (tuple literals, `split`, `range`)
    List(Vec<Value>),

    /// Key-value map; only ever seen in caller input, where it is rejected
    Map(HashMap<String, Value>),
}

impl Value {
    /// Type name used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::Int(_) | Value::Float(_) => "number",
            Value::List(_) => "tuple",
            Value::Map(_) => "object",
        }
    }

    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Value::Bool(_) | Value::Str(_) | Value::Int(_) | Value::Float(_)
        )
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(n) => Some(*n),
            _ => None,
        }
    }

    /// Canonical string form used for interpolation.
    ///
    /// Integers print without a decimal point, floats use the shortest
    /// representation that round-trips (`3.0` prints as `3`), booleans
    /// print as `true`/`false`. Anything that is not a primitive cannot be
    /// interpolated.
    pub fn to_output_string(&self) -> Result<String> {
        match self {
            Value::Str(s) => Ok(s.clone()),
            Value::Int(n) => Ok(n.to_string()),
            Value::Float(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            other => Err(TemplateError::TypeMismatch(format!(
                "cannot convert {} to string",
                other.type_name()
            ))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{}", n),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Map(_) => write!(f, "{{...}}"),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Str(s) => serializer.serialize_str(s),
            Value::Int(n) => serializer.serialize_i64(*n),
            Value::Float(n) => serializer.serialize_f64(*n),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(m) => {
                let mut map = serializer.serialize_map(Some(m.len()))?;
                for (k, v) in m {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

macro_rules! impl_from_primitive {
    ($rust_type:ty, $variant:ident, $target:ty) => {
        impl From<$rust_type> for Value {
            fn from(v: $rust_type) -> Self {
                Value::$variant(v as $target)
            }
        }
    };
}

impl_from_primitive!(i8, Int, i64);
impl_from_primitive!(i16, Int, i64);
impl_from_primitive!(i32, Int, i64);
impl_from_primitive!(i64, Int, i64);
impl_from_primitive!(u8, Int, i64);
impl_from_primitive!(u16, Int, i64);
impl_from_primitive!(u32, Int, i64);
impl_from_primitive!(f32, Float, f64);
impl_from_primitive!(f64, Float, f64);

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}
