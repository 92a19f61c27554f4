//! Mapping between Rust types and bridge values.
//!
//! A [`Marshal`] type names the [`Kind`] it occupies on the wire and converts
//! to and from [`Value`]. The facade checks every reply against
//! [`Marshal::kind`] before calling [`Marshal::from_value`], so conversions
//! only see well-formed input; they still fail with `TypeMismatch` rather
//! than panic when handed something else.

use crate::channel::Channel;
use crate::error::{BridgeError, Result};
use crate::value::{Kind, Value};

pub trait Marshal: Sized {
    /// Kind this type occupies on the wire.
    fn kind() -> Kind;

    fn into_value(self) -> Value;

    /// `channel` is what returned object references get bound to.
    fn from_value(value: Value, channel: &Channel) -> Result<Self>;
}

fn mismatch<T: Marshal>(value: &Value) -> BridgeError {
    BridgeError::type_mismatch(T::kind(), value.kind_name())
}

impl Marshal for () {
    fn kind() -> Kind {
        Kind::Void
    }

    fn into_value(self) -> Value {
        Value::Void
    }

    fn from_value(value: Value, _: &Channel) -> Result<Self> {
        match value {
            Value::Void => Ok(()),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl Marshal for bool {
    fn kind() -> Kind {
        Kind::Bool
    }

    fn into_value(self) -> Value {
        Value::Bool(self)
    }

    fn from_value(value: Value, _: &Channel) -> Result<Self> {
        match value {
            Value::Bool(v) => Ok(v),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl Marshal for i64 {
    fn kind() -> Kind {
        Kind::Int
    }

    fn into_value(self) -> Value {
        Value::Int(self)
    }

    fn from_value(value: Value, _: &Channel) -> Result<Self> {
        match value {
            Value::Int(v) => Ok(v),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

/// Narrow integers travel as `Int`; out-of-range replies are mismatches.
impl Marshal for i32 {
    fn kind() -> Kind {
        Kind::Int
    }

    fn into_value(self) -> Value {
        Value::Int(i64::from(self))
    }

    fn from_value(value: Value, _: &Channel) -> Result<Self> {
        match value {
            Value::Int(v) => i32::try_from(v)
                .map_err(|_| BridgeError::type_mismatch("int within i32 range", v)),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl Marshal for f64 {
    fn kind() -> Kind {
        Kind::Float
    }

    fn into_value(self) -> Value {
        Value::Float(self)
    }

    fn from_value(value: Value, _: &Channel) -> Result<Self> {
        match value {
            Value::Float(v) => Ok(v),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl Marshal for String {
    fn kind() -> Kind {
        Kind::Str
    }

    fn into_value(self) -> Value {
        Value::Str(self)
    }

    fn from_value(value: Value, _: &Channel) -> Result<Self> {
        match value {
            Value::Str(v) => Ok(v),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

/// Variable-length arrays.
impl<T: Marshal> Marshal for Vec<T> {
    fn kind() -> Kind {
        Kind::vec(T::kind())
    }

    fn into_value(self) -> Value {
        Value::Array(self.into_iter().map(Marshal::into_value).collect())
    }

    fn from_value(value: Value, channel: &Channel) -> Result<Self> {
        match value {
            Value::Array(items) => items
                .into_iter()
                .map(|item| T::from_value(item, channel))
                .collect(),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

/// Fixed-length arrays; nest them for multi-dimensional fixed arrays.
impl<T: Marshal, const N: usize> Marshal for [T; N] {
    fn kind() -> Kind {
        Kind::array(T::kind(), N)
    }

    fn into_value(self) -> Value {
        Value::Array(self.into_iter().map(Marshal::into_value).collect())
    }

    fn from_value(value: Value, channel: &Channel) -> Result<Self> {
        let items: Vec<T> = match value {
            Value::Array(items) if items.len() == N => items
                .into_iter()
                .map(|item| T::from_value(item, channel))
                .collect::<Result<_>>()?,
            other => return Err(mismatch::<Self>(&other)),
        };
        items.try_into().map_err(|items: Vec<T>| {
            BridgeError::type_mismatch(Self::kind(), format!("array[{}]", items.len()))
        })
    }
}

/// Declare a Rust enum mirroring a remote enum's string tags.
///
/// ```ignore
/// remote_enum! {
///     pub enum BlendMode {
///         Normal => "NORMAL",
///         Multiply => "MULTIPLY",
///     }
/// }
/// ```
#[macro_export]
macro_rules! remote_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($variant:ident => $tag:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($variant),+
        }

        impl $name {
            /// Remote tags, in declaration order.
            pub const VARIANTS: &'static [&'static str] = &[$($tag),+];

            pub fn tag(self) -> &'static str {
                match self {
                    $(Self::$variant => $tag),+
                }
            }

            pub fn from_tag(tag: &str) -> ::std::option::Option<Self> {
                match tag {
                    $($tag => ::std::option::Option::Some(Self::$variant),)+
                    _ => ::std::option::Option::None,
                }
            }
        }

        impl $crate::marshal::Marshal for $name {
            fn kind() -> $crate::value::Kind {
                $crate::value::Kind::enumeration(Self::VARIANTS)
            }

            fn into_value(self) -> $crate::value::Value {
                $crate::value::Value::Enum(self.tag().to_string())
            }

            fn from_value(
                value: $crate::value::Value,
                _: &$crate::channel::Channel,
            ) -> $crate::error::Result<Self> {
                let found = match &value {
                    $crate::value::Value::Enum(tag) => Self::from_tag(tag),
                    _ => ::std::option::Option::None,
                };
                found.ok_or_else(|| {
                    $crate::error::BridgeError::type_mismatch(
                        <Self as $crate::marshal::Marshal>::kind(),
                        value.kind_name(),
                    )
                })
            }
        }
    };
}
