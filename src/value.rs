//! The closed set of value kinds that cross the process boundary.
//!
//! [`Value`] is what travels on the wire; [`Kind`] is the static expectation
//! a call site holds for it. The remote graph is dynamically typed, so every
//! decoded value is checked against the caller's `Kind` before it reaches
//! typed code.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::accessor::Accessor;

/// Type tag that matches any remote object type.
pub const ANY_TYPE: &str = "*";

/// A marshallable value.
///
/// Serialized adjacently tagged: `{"kind":"int","value":3}`, `{"kind":"void"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    Void,
    Bool(bool),
    Int(i64),
    Float(#[serde(with = "float_repr")] f64),
    Str(String),
    Enum(String),
    Array(Vec<Value>),
    /// Row-major items; `items.len()` equals the product of `dims`.
    Matrix {
        dims: Vec<usize>,
        items: Vec<Value>,
    },
    /// Re-resolvable locator of a remote object. Never its fields.
    Object {
        type_tag: String,
        accessor: Accessor,
    },
    Collection {
        element_tag: String,
        accessor: Accessor,
    },
}

impl Value {
    /// Short name of the runtime kind, used in mismatch diagnostics.
    pub fn kind_name(&self) -> String {
        match self {
            Value::Void => "void".into(),
            Value::Bool(_) => "bool".into(),
            Value::Int(_) => "int".into(),
            Value::Float(_) => "float".into(),
            Value::Str(_) => "str".into(),
            Value::Enum(tag) => format!("enum({})", tag),
            Value::Array(items) => format!("array[{}]", items.len()),
            Value::Matrix { dims, .. } => format!("matrix{:?}", dims),
            Value::Object { type_tag, .. } => format!("object<{}>", type_tag),
            Value::Collection { element_tag, .. } => format!("collection<{}>", element_tag),
        }
    }
}

/// The kind a call site expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Kind {
    Void,
    Bool,
    Int,
    Float,
    Str,
    Enum(Vec<String>),
    /// `len: None` is a variable-length array.
    Array {
        element: Box<Kind>,
        len: Option<usize>,
    },
    Matrix {
        element: Box<Kind>,
        dims: Vec<usize>,
    },
    Object(String),
    Collection(String),
}

impl Kind {
    pub fn enumeration<S: AsRef<str>>(variants: &[S]) -> Self {
        Kind::Enum(variants.iter().map(|v| v.as_ref().to_string()).collect())
    }

    pub fn array(element: Kind, len: usize) -> Self {
        Kind::Array {
            element: Box::new(element),
            len: Some(len),
        }
    }

    pub fn vec(element: Kind) -> Self {
        Kind::Array {
            element: Box::new(element),
            len: None,
        }
    }

    pub fn matrix(element: Kind, dims: &[usize]) -> Self {
        Kind::Matrix {
            element: Box::new(element),
            dims: dims.to_vec(),
        }
    }

    pub fn object(type_tag: &str) -> Self {
        Kind::Object(type_tag.to_string())
    }

    pub fn collection(element_tag: &str) -> Self {
        Kind::Collection(element_tag.to_string())
    }

    /// Tag naming this kind when it is the element of a collection.
    pub fn element_tag(&self) -> String {
        match self {
            Kind::Object(tag) => tag.clone(),
            other => other.to_string(),
        }
    }

    /// Whether `value` is an inhabitant of this kind.
    ///
    /// Exact: no numeric widening, no string-to-enum coercion.
    pub fn admits(&self, value: &Value) -> bool {
        match (self, value) {
            (Kind::Void, Value::Void)
            | (Kind::Bool, Value::Bool(_))
            | (Kind::Int, Value::Int(_))
            | (Kind::Float, Value::Float(_))
            | (Kind::Str, Value::Str(_)) => true,
            (Kind::Enum(variants), Value::Enum(tag)) => variants.iter().any(|v| v == tag),
            (Kind::Array { element, len }, Value::Array(items)) => {
                len.map_or(true, |n| n == items.len()) && items.iter().all(|i| element.admits(i))
            }
            (Kind::Matrix { element, dims }, Value::Matrix { dims: got, items }) => {
                dims == got
                    && element_count(dims) == Some(items.len())
                    && items.iter().all(|i| element.admits(i))
            }
            (Kind::Object(expected), Value::Object { type_tag, .. }) => {
                expected == ANY_TYPE || expected == type_tag
            }
            (Kind::Collection(expected), Value::Collection { element_tag, .. }) => {
                expected == ANY_TYPE || expected == element_tag
            }
            _ => false,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Void => f.write_str("void"),
            Kind::Bool => f.write_str("bool"),
            Kind::Int => f.write_str("int"),
            Kind::Float => f.write_str("float"),
            Kind::Str => f.write_str("str"),
            Kind::Enum(variants) => write!(f, "enum{{{}}}", variants.join("|")),
            Kind::Array { element, len: Some(n) } => write!(f, "array<{}; {}>", element, n),
            Kind::Array { element, len: None } => write!(f, "array<{}>", element),
            Kind::Matrix { element, dims } => write!(f, "matrix<{}; {:?}>", element, dims),
            Kind::Object(tag) => write!(f, "object<{}>", tag),
            Kind::Collection(tag) => write!(f, "collection<{}>", tag),
        }
    }
}

/// Number of elements a matrix of `dims` holds, or `None` on overflow.
pub fn element_count(dims: &[usize]) -> Option<usize> {
    dims.iter().try_fold(1usize, |count, &dim| count.checked_mul(dim))
}

/// A multi-dimensional array with row-major storage.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix<T> {
    dims: Vec<usize>,
    items: Vec<T>,
}

impl<T> Matrix<T> {
    /// Returns `None` if `items` does not fill `dims` exactly.
    pub fn new(dims: Vec<usize>, items: Vec<T>) -> Option<Self> {
        (element_count(&dims) == Some(items.len())).then_some(Self { dims, items })
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn into_parts(self) -> (Vec<usize>, Vec<T>) {
        (self.dims, self.items)
    }

    /// Element at a multi-dimensional index.
    pub fn get(&self, index: &[usize]) -> Option<&T> {
        if index.len() != self.dims.len() {
            return None;
        }
        let mut flat = 0;
        for (i, (&at, &dim)) in index.iter().zip(&self.dims).enumerate() {
            if at >= dim {
                return None;
            }
            flat = if i == 0 { at } else { flat * dim + at };
        }
        self.items.get(flat)
    }
}

/// JSON has no NaN or infinities; those travel as tagged strings.
mod float_repr {
    use std::fmt;

    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_nan() {
            serializer.serialize_str("NaN")
        } else if value.is_infinite() {
            serializer.serialize_str(if *value > 0.0 { "inf" } else { "-inf" })
        } else {
            serializer.serialize_f64(*value)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        deserializer.deserialize_any(FloatVisitor)
    }

    struct FloatVisitor;

    impl Visitor<'_> for FloatVisitor {
        type Value = f64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a number or one of \"NaN\", \"inf\", \"-inf\"")
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<f64, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<f64, E> {
            match v {
                "NaN" => Ok(f64::NAN),
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                other => Err(E::invalid_value(de::Unexpected::Str(other), &self)),
            }
        }
    }
}
