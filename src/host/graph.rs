//! The live, dynamically typed object graph owned by the scripting host.
//!
//! A [`Graph`] has named roots. Each node is a typed value, an object with
//! properties and methods, or an ordered collection of nodes. Requests walk
//! the graph with the segments of an accessor.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::accessor::{Accessor, Segment};
use crate::error::RemoteFault;
use crate::value::{Kind, Value};

/// Names of the structural operations a collection may support.
pub const STRUCTURAL_OPS: [&str; 4] = ["new", "remove", "clear", "move"];

/// One node of the remote graph.
#[derive(Debug, Clone)]
pub enum Node {
    Value {
        kind: Kind,
        value: Value,
        writable: bool,
    },
    Object(RemoteObject),
    Collection(RemoteCollection),
}

impl Node {
    /// A writable property of the given kind.
    pub fn value(kind: Kind, value: Value) -> Self {
        Node::Value {
            kind,
            value,
            writable: true,
        }
    }

    pub fn read_only(kind: Kind, value: Value) -> Self {
        Node::Value {
            kind,
            value,
            writable: false,
        }
    }

    /// What a `Get` at `at` returns for this node.
    pub fn to_value(&self, at: &Accessor) -> Value {
        match self {
            Node::Value { value, .. } => value.clone(),
            Node::Object(obj) => Value::Object {
                type_tag: obj.type_tag.clone(),
                accessor: at.clone(),
            },
            Node::Collection(coll) => Value::Collection {
                element_tag: coll.element_tag.clone(),
                accessor: at.clone(),
            },
        }
    }

    /// Key under which a collection finds this node: an object's `name`.
    pub fn key(&self) -> Option<&str> {
        match self {
            Node::Object(obj) => obj.name(),
            _ => None,
        }
    }

    fn describe(&self) -> String {
        match self {
            Node::Value { kind, .. } => format!("a {} value", kind),
            Node::Object(obj) => format!("an object of type {}", obj.type_tag),
            Node::Collection(coll) => format!("a collection of {}", coll.element_tag),
        }
    }
}

impl From<RemoteObject> for Node {
    fn from(obj: RemoteObject) -> Self {
        Node::Object(obj)
    }
}

impl From<RemoteCollection> for Node {
    fn from(coll: RemoteCollection) -> Self {
        Node::Collection(coll)
    }
}

/// A remote object: typed properties plus callable members.
#[derive(Debug, Clone)]
pub struct RemoteObject {
    type_tag: String,
    properties: BTreeMap<String, Node>,
    methods: BTreeMap<String, Method>,
}

impl RemoteObject {
    pub fn new(type_tag: &str) -> Self {
        Self {
            type_tag: type_tag.to_string(),
            properties: BTreeMap::new(),
            methods: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: &str, node: impl Into<Node>) -> Self {
        self.properties.insert(name.to_string(), node.into());
        self
    }

    /// Add a writable value property.
    pub fn with_value(self, name: &str, kind: Kind, value: Value) -> Self {
        self.with(name, Node::value(kind, value))
    }

    pub fn with_method(mut self, name: &str, method: Method) -> Self {
        self.methods.insert(name.to_string(), method);
        self
    }

    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    /// The `name` property, when it is a string.
    pub fn name(&self) -> Option<&str> {
        match self.properties.get("name") {
            Some(Node::Value {
                value: Value::Str(name),
                ..
            }) => Some(name),
            _ => None,
        }
    }

    pub fn property(&self, name: &str) -> Option<&Node> {
        self.properties.get(name)
    }

    pub fn property_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.properties.get_mut(name)
    }

    pub fn set_property(&mut self, name: &str, node: impl Into<Node>) {
        self.properties.insert(name.to_string(), node.into());
    }

    pub fn remove_property(&mut self, name: &str) -> Option<Node> {
        self.properties.remove(name)
    }

    /// Current value of a value property.
    pub fn value_of(&self, name: &str) -> Option<&Value> {
        match self.properties.get(name) {
            Some(Node::Value { value, .. }) => Some(value),
            _ => None,
        }
    }

    pub fn collection_mut(&mut self, name: &str) -> Option<&mut RemoteCollection> {
        match self.properties.get_mut(name) {
            Some(Node::Collection(coll)) => Some(coll),
            _ => None,
        }
    }

    pub(crate) fn method(&self, name: &str) -> Option<&Method> {
        self.methods.get(name)
    }

    fn missing_member(&self, name: &str) -> RemoteFault {
        if self.methods.contains_key(name) {
            RemoteFault::resolution(format!("`{}` is a method of {}, not a property", name, self.type_tag))
        } else {
            RemoteFault::resolution(format!("{} has no member `{}`", self.type_tag, name))
        }
    }
}

/// Signature of a remote callable's body.
///
/// `Ok(None)` is the callee's "no value" marker.
pub type MethodBody =
    dyn Fn(&mut RemoteObject, &Invocation) -> Result<Option<Value>, RemoteFault> + Send + Sync;

/// A callable member with declared parameters and return kind.
#[derive(Clone)]
pub struct Method {
    params: Vec<Param>,
    returns: Kind,
    body: Arc<MethodBody>,
}

impl Method {
    pub fn new<F>(returns: Kind, body: F) -> Self
    where
        F: Fn(&mut RemoteObject, &Invocation) -> Result<Option<Value>, RemoteFault>
            + Send
            + Sync
            + 'static,
    {
        Self {
            params: Vec::new(),
            returns,
            body: Arc::new(body),
        }
    }

    /// Declare a required parameter.
    pub fn param(mut self, name: &str, kind: Kind) -> Self {
        self.params.push(Param::required(name, kind));
        self
    }

    /// Declare an optional parameter. Unset, it is absent from [`CallArgs`].
    pub fn optional(mut self, name: &str, kind: Kind) -> Self {
        self.params.push(Param::optional(name, kind));
        self
    }

    pub fn returns(&self) -> &Kind {
        &self.returns
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Bind arguments, invoke, and check the result against the declared kind.
    pub(crate) fn invoke(
        &self,
        target: &mut RemoteObject,
        this: &Accessor,
        positional: &[Value],
        named: &BTreeMap<String, Value>,
    ) -> Result<Value, RemoteFault> {
        let args = bind_args(&self.params, positional, named)?;
        let invocation = Invocation {
            this: this.clone(),
            args,
        };
        let returned = (self.body)(target, &invocation)?;
        finish_return(&self.returns, returned)
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("params", &self.params)
            .field("returns", &self.returns)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub kind: Kind,
    pub required: bool,
}

impl Param {
    pub fn required(name: &str, kind: Kind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: true,
        }
    }

    pub fn optional(name: &str, kind: Kind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: false,
        }
    }
}

/// What a method body sees: the accessor of its receiver and the bound arguments.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub this: Accessor,
    pub args: CallArgs,
}

/// Bound arguments by parameter name. Unset optionals are absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    values: BTreeMap<String, Value>,
}

impl CallArgs {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        match self.values.get(name) {
            Some(Value::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        match self.values.get(name) {
            Some(Value::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        match self.values.get(name) {
            Some(Value::Float(v)) => Some(*v),
            _ => None,
        }
    }

    /// A `Str` argument, or the tag of an `Enum` argument.
    pub fn str(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(Value::Str(v)) | Some(Value::Enum(v)) => Some(v),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Bind positional arguments in declaration order, then keyword arguments.
pub fn bind_args(
    params: &[Param],
    positional: &[Value],
    named: &BTreeMap<String, Value>,
) -> Result<CallArgs, RemoteFault> {
    if positional.len() > params.len() {
        return Err(RemoteFault::remote(format!(
            "takes at most {} arguments, got {}",
            params.len(),
            positional.len()
        )));
    }

    let mut values = BTreeMap::new();
    for (param, value) in params.iter().zip(positional) {
        check_arg(param, value)?;
        values.insert(param.name.clone(), value.clone());
    }

    for (name, value) in named {
        let param = params
            .iter()
            .find(|p| &p.name == name)
            .ok_or_else(|| RemoteFault::remote(format!("unexpected keyword argument `{}`", name)))?;
        if values.contains_key(name) {
            return Err(RemoteFault::remote(format!("argument `{}` given twice", name)));
        }
        check_arg(param, value)?;
        values.insert(name.clone(), value.clone());
    }

    if let Some(missing) = params.iter().find(|p| p.required && !values.contains_key(&p.name)) {
        return Err(RemoteFault::remote(format!(
            "missing required argument `{}`",
            missing.name
        )));
    }

    Ok(CallArgs { values })
}

fn check_arg(param: &Param, value: &Value) -> Result<(), RemoteFault> {
    if param.kind.admits(value) {
        Ok(())
    } else {
        Err(RemoteFault::type_mismatch(
            format!("{} for argument `{}`", param.kind, param.name),
            value.kind_name(),
        ))
    }
}

/// Apply the declared return kind to what the callee handed back.
fn finish_return(returns: &Kind, returned: Option<Value>) -> Result<Value, RemoteFault> {
    match (returns, returned) {
        (Kind::Void, _) => Ok(Value::Void),
        (kind, None) => Err(RemoteFault::remote(format!(
            "callable declared to return {} returned no value",
            kind
        ))),
        (kind, Some(value)) if kind.admits(&value) => Ok(value),
        (kind, Some(value)) => Err(RemoteFault::type_mismatch(kind, value.kind_name())),
    }
}

/// Builds a new element for a structural collection's `new`.
pub type ElementFactory = dyn Fn(&CallArgs) -> Result<Node, RemoteFault> + Send + Sync;

#[derive(Clone)]
struct Structure {
    params: Vec<Param>,
    factory: Arc<ElementFactory>,
}

/// An ordered, optionally keyed collection of nodes.
#[derive(Clone)]
pub struct RemoteCollection {
    element_tag: String,
    items: Vec<Node>,
    structure: Option<Structure>,
}

impl RemoteCollection {
    /// A read-only collection: index, key, length, iteration.
    pub fn new(element_tag: &str) -> Self {
        Self {
            element_tag: element_tag.to_string(),
            items: Vec::new(),
            structure: None,
        }
    }

    /// A collection that also supports `new`, `remove`, `clear` and `move`.
    pub fn structural<F>(element_tag: &str, factory: F) -> Self
    where
        F: Fn(&CallArgs) -> Result<Node, RemoteFault> + Send + Sync + 'static,
    {
        Self {
            element_tag: element_tag.to_string(),
            items: Vec::new(),
            structure: Some(Structure {
                params: Vec::new(),
                factory: Arc::new(factory),
            }),
        }
    }

    /// Declare a parameter of `new`. No-op on read-only collections.
    pub fn constructor_param(mut self, param: Param) -> Self {
        if let Some(structure) = self.structure.as_mut() {
            structure.params.push(param);
        }
        self
    }

    pub fn with_item(mut self, node: impl Into<Node>) -> Self {
        self.items.push(node.into());
        self
    }

    pub fn push(&mut self, node: impl Into<Node>) -> usize {
        self.items.push(node.into());
        self.items.len() - 1
    }

    pub fn element_tag(&self) -> &str {
        &self.element_tag
    }

    pub fn items(&self) -> &[Node] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_structural(&self) -> bool {
        self.structure.is_some()
    }

    pub fn remove(&mut self, index: usize) -> Option<Node> {
        (index < self.items.len()).then(|| self.items.remove(index))
    }

    fn position_of_key(&self, key: &str) -> Option<usize> {
        self.items.iter().position(|n| n.key() == Some(key))
    }

    /// Run one of the structural operations against this collection.
    pub(crate) fn invoke(
        &mut self,
        op: &str,
        this: &Accessor,
        positional: &[Value],
        named: &BTreeMap<String, Value>,
    ) -> Result<Value, RemoteFault> {
        let Some(structure) = self.structure.clone() else {
            return Err(RemoteFault::resolution(format!(
                "collection of {} has no method `{}`",
                self.element_tag, op
            )));
        };

        match op {
            "new" => {
                let args = bind_args(&structure.params, positional, named)?;
                let node = (structure.factory)(&args)?;
                let index = self.push(node);
                Ok(self.items[index].to_value(&this.index(index)))
            }
            "remove" => {
                let item = single_argument(positional, named, "item")?;
                let index = self.locate(this, &item)?;
                self.items.remove(index);
                Ok(Value::Void)
            }
            "clear" => {
                bind_args(&[], positional, named)?;
                self.items.clear();
                Ok(Value::Void)
            }
            "move" => {
                let params = [
                    Param::required("from", Kind::Int),
                    Param::required("to", Kind::Int),
                ];
                let args = bind_args(&params, positional, named)?;
                let len = self.items.len();
                let from = checked_index(args.int("from").unwrap_or(-1), len)?;
                let to = checked_index(args.int("to").unwrap_or(-1), len)?;
                let item = self.items.remove(from);
                self.items.insert(to, item);
                Ok(Value::Void)
            }
            other => Err(RemoteFault::resolution(format!(
                "collection of {} has no method `{}`",
                self.element_tag, other
            ))),
        }
    }

    /// Position named by an index, a key, or an element reference.
    fn locate(&self, this: &Accessor, item: &Value) -> Result<usize, RemoteFault> {
        match item {
            Value::Int(index) => checked_index(*index, self.items.len()),
            Value::Str(key) => self
                .position_of_key(key)
                .ok_or_else(|| RemoteFault::resolution(format!("no element named {:?}", key))),
            Value::Object { accessor, .. } => {
                let split = accessor
                    .split_last()
                    .map_err(|e| RemoteFault::resolution(e.to_string()))?;
                match split {
                    Some((parent, Segment::Index(index))) if &parent == this => {
                        checked_index(index as i64, self.items.len())
                    }
                    Some((parent, Segment::Key(key))) if &parent == this => {
                        self.locate(this, &Value::Str(key))
                    }
                    _ => Err(RemoteFault::resolution(format!(
                        "`{}` is not an element of `{}`",
                        accessor, this
                    ))),
                }
            }
            other => Err(RemoteFault::type_mismatch(
                "index, key or element reference",
                other.kind_name(),
            )),
        }
    }
}

impl fmt::Debug for RemoteCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCollection")
            .field("element_tag", &self.element_tag)
            .field("items", &self.items)
            .field("structural", &self.is_structural())
            .finish()
    }
}

fn checked_index(index: i64, len: usize) -> Result<usize, RemoteFault> {
    usize::try_from(index)
        .ok()
        .filter(|i| *i < len)
        .ok_or_else(|| {
            RemoteFault::resolution(format!("index {} out of range (length {})", index, len))
        })
}

/// The one argument of a single-parameter builtin, positional or keyword.
fn single_argument(
    positional: &[Value],
    named: &BTreeMap<String, Value>,
    name: &str,
) -> Result<Value, RemoteFault> {
    match (positional, named.len()) {
        ([value], 0) => Ok(value.clone()),
        ([], 1) => named
            .get(name)
            .cloned()
            .ok_or_else(|| RemoteFault::remote(format!("expected argument `{}`", name))),
        _ => Err(RemoteFault::remote(format!(
            "takes exactly one argument `{}`",
            name
        ))),
    }
}

/// Resolved location inside the graph.
pub(crate) enum Place<'g> {
    Node(&'g mut Node),
    /// An element inside an array value.
    Element {
        kind: Kind,
        value: &'g mut Value,
        writable: bool,
    },
    /// Computed, read-only member such as a collection's `length`.
    Virtual(Value),
}

impl<'g> Place<'g> {
    fn step(self, segment: &Segment) -> Result<Place<'g>, RemoteFault> {
        match self {
            Place::Node(Node::Object(obj)) => match segment {
                Segment::Member(name) => {
                    if !obj.properties.contains_key(name) {
                        return Err(obj.missing_member(name));
                    }
                    obj.properties
                        .get_mut(name)
                        .map(Place::Node)
                        .ok_or_else(|| RemoteFault::resolution(format!("no member `{}`", name)))
                }
                other => Err(RemoteFault::resolution(format!(
                    "cannot apply `{}` to an object of type {}",
                    other, obj.type_tag
                ))),
            },
            Place::Node(Node::Collection(coll)) => match segment {
                Segment::Index(index) => {
                    let len = coll.items.len();
                    coll.items.get_mut(*index).map(Place::Node).ok_or_else(|| {
                        RemoteFault::resolution(format!(
                            "index {} out of range (length {})",
                            index, len
                        ))
                    })
                }
                Segment::Key(key) => coll
                    .items
                    .iter_mut()
                    .find(|n| n.key() == Some(key.as_str()))
                    .map(Place::Node)
                    .ok_or_else(|| RemoteFault::resolution(format!("no element named {:?}", key))),
                Segment::Member(name) if name == "length" => {
                    Ok(Place::Virtual(Value::Int(coll.items.len() as i64)))
                }
                Segment::Member(name) if coll.structure.is_some() && STRUCTURAL_OPS.contains(&name.as_str()) => {
                    Err(RemoteFault::resolution(format!(
                        "`{}` is a method of the collection, not a property",
                        name
                    )))
                }
                Segment::Member(name) => Err(RemoteFault::resolution(format!(
                    "collection of {} has no member `{}`",
                    coll.element_tag, name
                ))),
            },
            Place::Node(Node::Value {
                kind,
                value,
                writable,
            }) => step_into_value(kind.clone(), value, *writable, segment),
            Place::Element {
                kind,
                value,
                writable,
            } => step_into_value(kind, value, writable, segment),
            Place::Virtual(_) => Err(RemoteFault::resolution(format!(
                "cannot apply `{}` to a computed value",
                segment
            ))),
        }
    }
}

fn step_into_value<'g>(
    kind: Kind,
    value: &'g mut Value,
    writable: bool,
    segment: &Segment,
) -> Result<Place<'g>, RemoteFault> {
    match (kind, value, segment) {
        (Kind::Array { element, .. }, Value::Array(items), Segment::Index(index)) => {
            let len = items.len();
            items
                .get_mut(*index)
                .map(|value| Place::Element {
                    kind: *element,
                    value,
                    writable,
                })
                .ok_or_else(|| {
                    RemoteFault::resolution(format!("index {} out of range (length {})", index, len))
                })
        }
        (kind, _, segment) => Err(RemoteFault::resolution(format!(
            "cannot apply `{}` to a {} value",
            segment, kind
        ))),
    }
}

/// The scripting host's object graph.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    roots: BTreeMap<String, Node>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(mut self, name: &str, node: impl Into<Node>) -> Self {
        self.insert_root(name, node);
        self
    }

    pub fn insert_root(&mut self, name: &str, node: impl Into<Node>) {
        self.roots.insert(name.to_string(), node.into());
    }

    pub fn root(&self, name: &str) -> Option<&Node> {
        self.roots.get(name)
    }

    pub fn root_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.roots.get_mut(name)
    }

    pub fn root_names(&self) -> impl Iterator<Item = &str> {
        self.roots.keys().map(String::as_str)
    }

    /// Walk `segments` from a root.
    pub(crate) fn place(&mut self, segments: &[Segment]) -> Result<Place<'_>, RemoteFault> {
        let (first, rest) = segments
            .split_first()
            .ok_or_else(|| RemoteFault::resolution("empty accessor"))?;
        let Segment::Member(root) = first else {
            return Err(RemoteFault::resolution("accessor must start with a root name"));
        };
        let node = self
            .roots
            .get_mut(root)
            .ok_or_else(|| RemoteFault::resolution(format!("no root named `{}`", root)))?;

        let mut place = Place::Node(node);
        for segment in rest {
            place = place.step(segment)?;
        }
        Ok(place)
    }

    /// Describe the node at `accessor`, for diagnostics and tests.
    pub fn describe(&mut self, accessor: &Accessor) -> Result<String, RemoteFault> {
        let segments = accessor
            .segments()
            .map_err(|e| RemoteFault::resolution(e.to_string()))?;
        Ok(match self.place(&segments)? {
            Place::Node(node) => node.describe(),
            Place::Element { kind, .. } => format!("a {} element", kind),
            Place::Virtual(value) => format!("a computed {}", value.kind_name()),
        })
    }
}
