//! Build a [`Graph`] from a JSON document.
//!
//! This is how `hostbridged` gets something to serve without embedding a
//! scripting language. Every top-level key becomes a root.
//!
//! | JSON                                       | Node                             |
//! |--------------------------------------------|----------------------------------|
//! | `true`, `3`, `2.5`, `"s"`                  | writable bool / int / float / str|
//! | `[1, 2, 3]` (scalars of one kind)          | writable `array<int>`            |
//! | `{"$enum": "A", "$variants": ["A", "B"]}`  | writable enum                    |
//! | `{"$dims": [2, 2], "$items": [..]}`        | writable matrix                  |
//! | `{"$type": "Layer", ...}`                  | object with those properties     |
//! | `[{..}, {..}]`                             | structural collection of objects |
//! | `{"$collection": "Layer", "$items": [..]}` | typed (possibly empty) collection|
//!
//! Collections built here accept `new(name?)`, which appends an object of
//! the element type with only a `name` property.

use anyhow::{anyhow, bail, Context, Result};
use serde_json::{Map, Value as Json};

use crate::host::graph::{CallArgs, Graph, Node, Param, RemoteCollection, RemoteObject};
use crate::value::{element_count, Kind, Value};

const DEFAULT_TYPE: &str = "Object";

/// Parse a graph from JSON text.
pub fn graph_from_str(text: &str) -> Result<Graph> {
    let document: Json = serde_json::from_str(text).context("Graph document is not valid JSON")?;
    graph_from_json(&document)
}

pub fn graph_from_json(document: &Json) -> Result<Graph> {
    let roots = document
        .as_object()
        .ok_or_else(|| anyhow!("Graph document must be a JSON object of roots"))?;

    let mut graph = Graph::new();
    for (name, value) in roots {
        let node = node_from_json(value).with_context(|| format!("In root `{}`", name))?;
        graph.insert_root(name, node);
    }
    Ok(graph)
}

fn node_from_json(json: &Json) -> Result<Node> {
    match json {
        Json::Array(items) if !items.is_empty() && items.iter().all(is_object_like) => {
            let tag = items[0]
                .get("$type")
                .and_then(Json::as_str)
                .unwrap_or(DEFAULT_TYPE);
            collection_from_json(tag, items)
        }
        Json::Object(map) if map.contains_key("$collection") => {
            let tag = map
                .get("$collection")
                .and_then(Json::as_str)
                .ok_or_else(|| anyhow!("`$collection` must be a type name"))?;
            let items = match map.get("$items") {
                Some(Json::Array(items)) => items.as_slice(),
                Some(_) => bail!("`$items` must be an array"),
                None => &[],
            };
            collection_from_json(tag, items)
        }
        Json::Object(map) if !map.contains_key("$enum") && !map.contains_key("$dims") => {
            Ok(Node::Object(object_from_json(map)?))
        }
        other => {
            let (kind, value) = value_from_json(other)?;
            Ok(Node::value(kind, value))
        }
    }
}

fn is_object_like(json: &Json) -> bool {
    matches!(json, Json::Object(map) if !map.contains_key("$enum") && !map.contains_key("$dims"))
}

fn object_from_json(map: &Map<String, Json>) -> Result<RemoteObject> {
    let tag = match map.get("$type") {
        Some(Json::String(tag)) => tag.as_str(),
        Some(_) => bail!("`$type` must be a string"),
        None => DEFAULT_TYPE,
    };

    let mut object = RemoteObject::new(tag);
    for (name, value) in map.iter().filter(|(k, _)| !k.starts_with('$')) {
        let node = node_from_json(value).with_context(|| format!("In property `{}`", name))?;
        object.set_property(name, node);
    }
    Ok(object)
}

fn collection_from_json(tag: &str, items: &[Json]) -> Result<Node> {
    let element_tag = tag.to_string();
    let mut collection = RemoteCollection::structural(tag, move |args: &CallArgs| {
        let mut element = RemoteObject::new(&element_tag);
        if let Some(name) = args.str("name") {
            element.set_property("name", Node::value(Kind::Str, Value::Str(name.to_string())));
        }
        Ok(Node::Object(element))
    })
    .constructor_param(Param::optional("name", Kind::Str));

    for (index, item) in items.iter().enumerate() {
        let Json::Object(map) = item else {
            bail!("Collection element {} is not an object", index);
        };
        let element =
            object_from_json(map).with_context(|| format!("In collection element {}", index))?;
        if element.type_tag() != tag {
            bail!(
                "Collection element {} has type {}, expected {}",
                index,
                element.type_tag(),
                tag
            );
        }
        collection.push(element);
    }
    Ok(Node::Collection(collection))
}

fn value_from_json(json: &Json) -> Result<(Kind, Value)> {
    match json {
        Json::Bool(b) => Ok((Kind::Bool, Value::Bool(*b))),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok((Kind::Int, Value::Int(i)))
            } else {
                let f = n
                    .as_f64()
                    .ok_or_else(|| anyhow!("Number {} is out of range", n))?;
                Ok((Kind::Float, Value::Float(f)))
            }
        }
        Json::String(s) => Ok((Kind::Str, Value::Str(s.clone()))),
        Json::Array(items) => {
            let mut element_kind = None;
            let mut values = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                let (kind, value) =
                    value_from_json(item).with_context(|| format!("In array element {}", index))?;
                match &element_kind {
                    None => element_kind = Some(kind),
                    Some(expected) if *expected == kind => {}
                    Some(expected) => bail!(
                        "Array element {} is {}, expected {}",
                        index,
                        kind,
                        expected
                    ),
                }
                values.push(value);
            }
            let element_kind =
                element_kind.ok_or_else(|| anyhow!("Cannot infer the element kind of []"))?;
            Ok((Kind::vec(element_kind), Value::Array(values)))
        }
        Json::Object(map) if map.contains_key("$enum") => {
            let tag = map
                .get("$enum")
                .and_then(Json::as_str)
                .ok_or_else(|| anyhow!("`$enum` must be a string"))?;
            let variants: Vec<&str> = map
                .get("$variants")
                .and_then(Json::as_array)
                .ok_or_else(|| anyhow!("`$enum` needs a `$variants` array"))?
                .iter()
                .map(|v| v.as_str().ok_or_else(|| anyhow!("Enum variants must be strings")))
                .collect::<Result<_>>()?;
            if !variants.contains(&tag) {
                bail!("Enum tag `{}` is not one of {:?}", tag, variants);
            }
            Ok((Kind::enumeration(&variants), Value::Enum(tag.to_string())))
        }
        Json::Object(map) if map.contains_key("$dims") => {
            let dims: Vec<usize> = serde_json::from_value(map["$dims"].clone())
                .context("`$dims` must be an array of sizes")?;
            let (kind, items) = match map.get("$items") {
                Some(items @ Json::Array(_)) => value_from_json(items)?,
                _ => bail!("Matrix needs an `$items` array"),
            };
            let (Kind::Array { element, .. }, Value::Array(items)) = (kind, items) else {
                bail!("Matrix `$items` must be an array");
            };
            let Some(expected) = element_count(&dims) else {
                bail!("Matrix dims {:?} overflow", dims);
            };
            if items.len() != expected {
                bail!(
                    "Matrix has {} items but dims {:?} need {}",
                    items.len(),
                    dims,
                    expected
                );
            }
            Ok((Kind::matrix(*element, &dims), Value::Matrix { dims, items }))
        }
        Json::Null => bail!("null has no bridge kind"),
        Json::Object(_) => bail!("Objects are not values"),
    }
}
