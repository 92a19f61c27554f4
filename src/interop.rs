//! The interop facade: typed get/set/call against remote accessors.
//!
//! Every operation is the same thin adapter: build the request, send it on
//! the channel and wait, lift a remote fault into a [`BridgeError`], then
//! check the reply against the kind the call site expects. There is no
//! per-property logic here and nothing is cached.
//!
//! ```ignore
//! remote_class! {
//!     pub struct Layer => "Layer";
//! }
//!
//! impl Layer {
//!     pub fn opacity(&self) -> Result<f64> {
//!         interop::get_float(self.channel(), &self.member("opacity"))
//!     }
//! }
//! ```

use std::collections::BTreeMap;

use crate::accessor::Accessor;
use crate::channel::Channel;
use crate::codec;
use crate::collection::Collection;
use crate::error::{BridgeError, Result};
use crate::marshal::Marshal;
use crate::value::{Kind, Matrix, Value, ANY_TYPE};

/// Positional and keyword arguments of a remote call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    positional: Vec<Value>,
    named: BTreeMap<String, Value>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn arg<T: Marshal>(mut self, value: T) -> Self {
        self.positional.push(value.into_value());
        self
    }

    pub fn named<T: Marshal>(mut self, name: &str, value: T) -> Self {
        self.named.insert(name.to_string(), value.into_value());
        self
    }

    /// Keyword argument that is left unset when `None`, so the callee's
    /// own default applies.
    pub fn named_opt<T: Marshal>(self, name: &str, value: Option<T>) -> Self {
        match value {
            Some(value) => self.named(name, value),
            None => self,
        }
    }

    /// Positional argument already in wire form, e.g. an enum tag.
    pub fn value(mut self, value: Value) -> Self {
        self.positional.push(value);
        self
    }

    pub fn named_value(mut self, name: &str, value: Value) -> Self {
        self.named.insert(name.to_string(), value);
        self
    }

    pub fn into_parts(self) -> (Vec<Value>, BTreeMap<String, Value>) {
        (self.positional, self.named)
    }
}

// =============================================================================
// Untyped core
// =============================================================================

/// Read `accessor` and check the reply against `kind`.
pub fn get_value(channel: &Channel, accessor: &Accessor, kind: &Kind) -> Result<Value> {
    let value = channel.get(accessor)?.into_result(accessor)?;
    codec::expect(value, kind)
}

/// Assign `value` at `accessor`.
///
/// The value is checked against `kind` before anything is sent.
pub fn set_value(channel: &Channel, accessor: &Accessor, value: Value, kind: &Kind) -> Result<()> {
    let value = codec::expect(value, kind)?;
    let reply = channel.set(accessor, value)?.into_result(accessor)?;
    codec::expect(reply, &Kind::Void)?;
    Ok(())
}

/// Invoke the callable at `accessor` and check its result against `kind`.
pub fn call_value(channel: &Channel, accessor: &Accessor, args: Args, kind: &Kind) -> Result<Value> {
    let (positional, named) = args.into_parts();
    let value = channel.call(accessor, positional, named)?.into_result(accessor)?;
    codec::expect(value, kind)
}

// =============================================================================
// Typed core
// =============================================================================

pub fn get<T: Marshal>(channel: &Channel, accessor: &Accessor) -> Result<T> {
    T::from_value(get_value(channel, accessor, &T::kind())?, channel)
}

pub fn set<T: Marshal>(channel: &Channel, accessor: &Accessor, value: T) -> Result<()> {
    set_value(channel, accessor, value.into_value(), &T::kind())
}

pub fn call<T: Marshal>(channel: &Channel, accessor: &Accessor, args: Args) -> Result<T> {
    T::from_value(call_value(channel, accessor, args, &T::kind())?, channel)
}

// =============================================================================
// Scalar families
// =============================================================================

pub fn get_bool(channel: &Channel, accessor: &Accessor) -> Result<bool> {
    get(channel, accessor)
}

pub fn set_bool(channel: &Channel, accessor: &Accessor, value: bool) -> Result<()> {
    set(channel, accessor, value)
}

pub fn call_bool(channel: &Channel, accessor: &Accessor, args: Args) -> Result<bool> {
    call(channel, accessor, args)
}

pub fn get_int(channel: &Channel, accessor: &Accessor) -> Result<i64> {
    get(channel, accessor)
}

pub fn set_int(channel: &Channel, accessor: &Accessor, value: i64) -> Result<()> {
    set(channel, accessor, value)
}

pub fn call_int(channel: &Channel, accessor: &Accessor, args: Args) -> Result<i64> {
    call(channel, accessor, args)
}

pub fn get_float(channel: &Channel, accessor: &Accessor) -> Result<f64> {
    get(channel, accessor)
}

pub fn set_float(channel: &Channel, accessor: &Accessor, value: f64) -> Result<()> {
    set(channel, accessor, value)
}

pub fn call_float(channel: &Channel, accessor: &Accessor, args: Args) -> Result<f64> {
    call(channel, accessor, args)
}

pub fn get_str(channel: &Channel, accessor: &Accessor) -> Result<String> {
    get(channel, accessor)
}

pub fn set_str(channel: &Channel, accessor: &Accessor, value: &str) -> Result<()> {
    set(channel, accessor, value.to_string())
}

pub fn call_str(channel: &Channel, accessor: &Accessor, args: Args) -> Result<String> {
    call(channel, accessor, args)
}

/// Invoke a procedure. Whatever the callee hands back, success is `()`.
pub fn call_void(channel: &Channel, accessor: &Accessor, args: Args) -> Result<()> {
    call(channel, accessor, args)
}

// =============================================================================
// Enums as tags with a declared variant set
// =============================================================================

fn enum_tag(value: Value) -> Result<String> {
    match value {
        Value::Enum(tag) => Ok(tag),
        other => Err(BridgeError::type_mismatch("enum", other.kind_name())),
    }
}

pub fn get_enum(channel: &Channel, accessor: &Accessor, variants: &[&str]) -> Result<String> {
    enum_tag(get_value(channel, accessor, &Kind::enumeration(variants))?)
}

/// Assign an enum tag. A tag outside `variants` fails before any request.
pub fn set_enum(channel: &Channel, accessor: &Accessor, variants: &[&str], tag: &str) -> Result<()> {
    set_value(
        channel,
        accessor,
        Value::Enum(tag.to_string()),
        &Kind::enumeration(variants),
    )
}

pub fn call_enum(
    channel: &Channel,
    accessor: &Accessor,
    args: Args,
    variants: &[&str],
) -> Result<String> {
    enum_tag(call_value(channel, accessor, args, &Kind::enumeration(variants))?)
}

// =============================================================================
// Arrays and matrices
// =============================================================================

/// Fixed-length array; nest for multi-dimensional fixed arrays.
pub fn get_array<T: Marshal, const N: usize>(channel: &Channel, accessor: &Accessor) -> Result<[T; N]> {
    get(channel, accessor)
}

pub fn set_array<T: Marshal, const N: usize>(
    channel: &Channel,
    accessor: &Accessor,
    value: [T; N],
) -> Result<()> {
    set(channel, accessor, value)
}

pub fn call_array<T: Marshal, const N: usize>(
    channel: &Channel,
    accessor: &Accessor,
    args: Args,
) -> Result<[T; N]> {
    call(channel, accessor, args)
}

pub fn get_vec<T: Marshal>(channel: &Channel, accessor: &Accessor) -> Result<Vec<T>> {
    get(channel, accessor)
}

pub fn set_vec<T: Marshal>(channel: &Channel, accessor: &Accessor, value: Vec<T>) -> Result<()> {
    set(channel, accessor, value)
}

pub fn call_vec<T: Marshal>(channel: &Channel, accessor: &Accessor, args: Args) -> Result<Vec<T>> {
    call(channel, accessor, args)
}

fn matrix_from_value<T: Marshal>(value: Value, channel: &Channel) -> Result<Matrix<T>> {
    let Value::Matrix { dims, items } = value else {
        return Err(BridgeError::type_mismatch("matrix", value.kind_name()));
    };
    let items = items
        .into_iter()
        .map(|item| T::from_value(item, channel))
        .collect::<Result<Vec<T>>>()?;
    let found = format!("{} items for dims {:?}", items.len(), dims);
    Matrix::new(dims, items).ok_or_else(|| BridgeError::type_mismatch("matrix", found))
}

/// Matrix with the declared `dims`.
pub fn get_matrix<T: Marshal>(
    channel: &Channel,
    accessor: &Accessor,
    dims: &[usize],
) -> Result<Matrix<T>> {
    let value = get_value(channel, accessor, &Kind::matrix(T::kind(), dims))?;
    matrix_from_value(value, channel)
}

/// Assign a matrix. Its shape must equal the declared `dims`.
pub fn set_matrix<T: Marshal>(
    channel: &Channel,
    accessor: &Accessor,
    dims: &[usize],
    value: Matrix<T>,
) -> Result<()> {
    let (got_dims, items) = value.into_parts();
    let value = Value::Matrix {
        dims: got_dims,
        items: items.into_iter().map(Marshal::into_value).collect(),
    };
    set_value(channel, accessor, value, &Kind::matrix(T::kind(), dims))
}

pub fn call_matrix<T: Marshal>(
    channel: &Channel,
    accessor: &Accessor,
    args: Args,
    dims: &[usize],
) -> Result<Matrix<T>> {
    let value = call_value(channel, accessor, args, &Kind::matrix(T::kind(), dims))?;
    matrix_from_value(value, channel)
}

// =============================================================================
// Objects
// =============================================================================

/// Contract of a generated client class: a remote type bound to a path.
pub trait RemoteClass: Sized {
    /// Remote type tag this class stands for.
    const TYPE_TAG: &'static str;

    fn bind(channel: Channel, accessor: Accessor) -> Self;

    fn channel(&self) -> &Channel;

    fn accessor(&self) -> &Accessor;

    /// Accessor of one of this object's members.
    fn member(&self, name: &str) -> Accessor {
        self.accessor().member(name)
    }
}

/// Bind a returned object reference to a fresh class instance.
pub fn bind_class<C: RemoteClass>(value: Value, channel: &Channel) -> Result<C> {
    match value {
        Value::Object { type_tag, accessor } if type_tag == C::TYPE_TAG || C::TYPE_TAG == ANY_TYPE => {
            Ok(C::bind(channel.clone(), accessor))
        }
        other => Err(BridgeError::type_mismatch(
            Kind::object(C::TYPE_TAG),
            other.kind_name(),
        )),
    }
}

pub fn get_class<C: RemoteClass>(channel: &Channel, accessor: &Accessor) -> Result<C> {
    let value = get_value(channel, accessor, &Kind::object(C::TYPE_TAG))?;
    bind_class(value, channel)
}

pub fn call_class<C: RemoteClass>(channel: &Channel, accessor: &Accessor, args: Args) -> Result<C> {
    let value = call_value(channel, accessor, args, &Kind::object(C::TYPE_TAG))?;
    bind_class(value, channel)
}

/// A reference to a remote object of any type.
///
/// Use it where a member may hand back several types; [`ObjectRef::cast`]
/// narrows it to a class.
#[derive(Debug, Clone)]
pub struct ObjectRef {
    channel: Channel,
    type_tag: String,
    accessor: Accessor,
}

impl ObjectRef {
    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    pub fn accessor(&self) -> &Accessor {
        &self.accessor
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Rebind as class `C` when the remote type matches.
    pub fn cast<C: RemoteClass>(self) -> Result<C> {
        let value = Value::Object {
            type_tag: self.type_tag,
            accessor: self.accessor,
        };
        bind_class(value, &self.channel)
    }
}

impl Marshal for ObjectRef {
    fn kind() -> Kind {
        Kind::object(ANY_TYPE)
    }

    fn into_value(self) -> Value {
        Value::Object {
            type_tag: self.type_tag,
            accessor: self.accessor,
        }
    }

    fn from_value(value: Value, channel: &Channel) -> Result<Self> {
        match value {
            Value::Object { type_tag, accessor } => Ok(Self {
                channel: channel.clone(),
                type_tag,
                accessor,
            }),
            other => Err(BridgeError::type_mismatch(Self::kind(), other.kind_name())),
        }
    }
}

/// Declare thin client classes bound to `(channel, accessor)`.
///
/// ```ignore
/// remote_class! {
///     pub struct Document => "Document";
///     pub struct Layer => "Layer";
/// }
/// ```
#[macro_export]
macro_rules! remote_class {
    ($(
        $(#[$meta:meta])*
        $vis:vis struct $name:ident => $tag:literal;
    )+) => {$(
        $(#[$meta])*
        #[derive(Debug, Clone)]
        $vis struct $name {
            channel: $crate::channel::Channel,
            accessor: $crate::accessor::Accessor,
        }

        impl $crate::interop::RemoteClass for $name {
            const TYPE_TAG: &'static str = $tag;

            fn bind(
                channel: $crate::channel::Channel,
                accessor: $crate::accessor::Accessor,
            ) -> Self {
                Self { channel, accessor }
            }

            fn channel(&self) -> &$crate::channel::Channel {
                &self.channel
            }

            fn accessor(&self) -> &$crate::accessor::Accessor {
                &self.accessor
            }
        }

        impl $crate::marshal::Marshal for $name {
            fn kind() -> $crate::value::Kind {
                $crate::value::Kind::object($tag)
            }

            fn into_value(self) -> $crate::value::Value {
                $crate::value::Value::Object {
                    type_tag: $tag.to_string(),
                    accessor: self.accessor,
                }
            }

            fn from_value(
                value: $crate::value::Value,
                channel: &$crate::channel::Channel,
            ) -> $crate::error::Result<Self> {
                $crate::interop::bind_class(value, channel)
            }
        }
    )+};
}

// =============================================================================
// Collections
// =============================================================================

pub fn get_collection<T: Marshal>(channel: &Channel, accessor: &Accessor) -> Result<Collection<T>> {
    get(channel, accessor)
}

pub fn call_collection<T: Marshal>(
    channel: &Channel,
    accessor: &Accessor,
    args: Args,
) -> Result<Collection<T>> {
    call(channel, accessor, args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{Graph, Host, Node, RemoteObject};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    crate::remote_class! {
        struct Thing => "Thing";
    }

    fn channel() -> Channel {
        let thing = RemoteObject::new("Thing").with_value("n", Kind::Int, Value::Int(1));
        let graph = Graph::new()
            .with_root("thing", thing)
            .with_root("flag", Node::value(Kind::Bool, Value::Bool(false)));
        Channel::in_process(Host::new(graph), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_args_builder() {
        let (positional, named) = Args::new()
            .arg(1i64)
            .value(Value::Enum("A".into()))
            .named("name", "x".to_string())
            .named_opt::<bool>("hidden", None)
            .into_parts();
        assert_eq!(positional, vec![Value::Int(1), Value::Enum("A".into())]);
        assert_eq!(named.len(), 1);
        assert_eq!(named["name"], Value::Str("x".into()));
    }

    #[test]
    fn test_class_binding_checks_tag() {
        let ch = channel();
        let thing: Thing = get_class(&ch, &Accessor::root("thing")).unwrap();
        assert_eq!(thing.accessor().as_str(), "thing");
        assert_eq!(get_int(thing.channel(), &thing.member("n")).unwrap(), 1);

        let any: ObjectRef = get(&ch, &Accessor::root("thing")).unwrap();
        assert_eq!(any.type_tag(), "Thing");
        assert_eq!(any.cast::<Thing>().unwrap().accessor().as_str(), "thing");

        let wrong = Value::Object {
            type_tag: "Other".into(),
            accessor: Accessor::root("thing"),
        };
        assert!(bind_class::<Thing>(wrong, &ch).unwrap_err().is_type_mismatch());
    }

    #[test]
    fn test_set_requires_matching_kind_locally() {
        let ch = channel();
        let err = set_value(&ch, &Accessor::root("flag"), Value::Int(1), &Kind::Bool).unwrap_err();
        assert!(err.is_type_mismatch());
        set_bool(&ch, &Accessor::root("flag"), true).unwrap();
        assert!(get_bool(&ch, &Accessor::root("flag")).unwrap());
    }
}
