//! The scripting-host side of the bridge: the remote execution loop.
//!
//! A [`Host`] owns a [`Graph`] and turns each [`Request`] into exactly one
//! [`Response`]. It runs requests strictly one at a time; callers that share
//! a host across connections wrap it in a [`SharedHost`].
//!
//! Every failure becomes a [`RemoteFault`] in the response, including panics
//! in remote callables. The loop itself never dies on a bad request.

pub mod graph;
pub mod json;
pub mod server;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use crate::accessor::{Accessor, Segment};
use crate::channel::Transport;
use crate::codec::{self, Op, Request, Response};
use crate::error::{ChannelError, RemoteFault};
use crate::value::Value;

pub use graph::{
    bind_args, CallArgs, Graph, Invocation, Method, Node, Param, RemoteCollection, RemoteObject,
};

use graph::Place;

/// A host shared between connections. The lock is the serialization point.
pub type SharedHost = Arc<Mutex<Host>>;

/// Executes bridge requests against a live object graph.
#[derive(Debug, Default)]
pub struct Host {
    graph: Graph,
    handled: u64,
}

impl Host {
    pub fn new(graph: Graph) -> Self {
        Self { graph, handled: 0 }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    /// Number of requests executed so far.
    pub fn handled(&self) -> u64 {
        self.handled
    }

    pub fn shared(self) -> SharedHost {
        Arc::new(Mutex::new(self))
    }

    /// Execute one request and produce its response.
    pub fn execute(&mut self, request: &Request) -> Response {
        self.handled += 1;
        let outcome = catch_unwind(AssertUnwindSafe(|| self.dispatch(request)));

        match outcome {
            Ok(Ok(value)) => Response::success(request.id, value),
            Ok(Err(fault)) => {
                tracing::debug!("#{} {} failed: {}", request.id, request.accessor, fault);
                Response::failure(request.id, fault)
            }
            Err(panic_info) => {
                let panic_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    (*s).to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic".to_string()
                };
                tracing::error!(
                    "Remote callable panicked on #{} {}: {}",
                    request.id,
                    request.accessor,
                    panic_msg
                );
                Response::failure(
                    request.id,
                    RemoteFault::remote(format!("remote callable panicked: {}", panic_msg)),
                )
            }
        }
    }

    /// Decode, execute and encode one wire message.
    ///
    /// A request that cannot be decoded is answered with id 0.
    pub fn handle_bytes(&mut self, bytes: &[u8]) -> Vec<u8> {
        let response = match codec::decode_request(bytes) {
            Ok(request) => self.execute(&request),
            Err(e) => {
                tracing::warn!("Rejecting malformed request: {}", e);
                Response::failure(0, RemoteFault::remote(format!("malformed request: {}", e)))
            }
        };

        match codec::encode_response(&response) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("Failed to encode response #{}: {}", response.id, e);
                let fallback =
                    Response::failure(response.id, RemoteFault::remote("unencodable response"));
                codec::encode_response(&fallback).unwrap_or_default()
            }
        }
    }

    fn dispatch(&mut self, request: &Request) -> Result<Value, RemoteFault> {
        let segments = request
            .accessor
            .segments()
            .map_err(|e| RemoteFault::resolution(e.to_string()))?;

        match request.op {
            Op::Get => self.get(&segments),
            Op::Set => match (request.args.as_slice(), request.named.is_empty()) {
                ([value], true) => self.set(&segments, value.clone()),
                _ => Err(RemoteFault::remote("set takes exactly one positional value")),
            },
            Op::Call => self.call(&segments, &request.args, &request.named),
        }
    }

    fn get(&mut self, segments: &[Segment]) -> Result<Value, RemoteFault> {
        let at = canonical(segments)?;
        Ok(match self.graph.place(segments)? {
            Place::Node(node) => node.to_value(&at),
            Place::Element { value, .. } => value.clone(),
            Place::Virtual(value) => value,
        })
    }

    fn set(&mut self, segments: &[Segment], new_value: Value) -> Result<Value, RemoteFault> {
        let at = canonical(segments)?;
        let (kind, slot, writable) = match self.graph.place(segments)? {
            Place::Node(Node::Value {
                kind,
                value,
                writable,
            }) => (kind.clone(), value, *writable),
            Place::Element {
                kind,
                value,
                writable,
            } => (kind, value, writable),
            Place::Node(_) => {
                return Err(RemoteFault::remote(format!(
                    "`{}` refers to an object and cannot be assigned",
                    at
                )))
            }
            Place::Virtual(_) => {
                return Err(RemoteFault::remote(format!("`{}` is read-only", at)))
            }
        };

        if !writable {
            return Err(RemoteFault::remote(format!("`{}` is read-only", at)));
        }
        if !kind.admits(&new_value) {
            return Err(RemoteFault::type_mismatch(kind, new_value.kind_name()));
        }
        *slot = new_value;
        Ok(Value::Void)
    }

    fn call(
        &mut self,
        segments: &[Segment],
        positional: &[Value],
        named: &std::collections::BTreeMap<String, Value>,
    ) -> Result<Value, RemoteFault> {
        let at = canonical(segments)?;
        let Some((Segment::Member(name), parent_segments)) = segments.split_last() else {
            return Err(RemoteFault::resolution(format!("`{}` is not callable", at)));
        };
        if parent_segments.is_empty() {
            return Err(RemoteFault::resolution(format!("root `{}` is not callable", at)));
        }
        let this = canonical(parent_segments)?;

        match self.graph.place(parent_segments)? {
            Place::Node(Node::Object(target)) => {
                let method = target.method(name).cloned().ok_or_else(|| {
                    if target.property(name).is_some() {
                        RemoteFault::resolution(format!("`{}` is a property, not a method", name))
                    } else {
                        RemoteFault::resolution(format!(
                            "{} has no method `{}`",
                            target.type_tag(),
                            name
                        ))
                    }
                })?;
                method.invoke(target, &this, positional, named)
            }
            Place::Node(Node::Collection(coll)) => coll.invoke(name, &this, positional, named),
            _ => Err(RemoteFault::resolution(format!("`{}` is not callable", at))),
        }
    }
}

fn canonical(segments: &[Segment]) -> Result<Accessor, RemoteFault> {
    Accessor::from_segments(segments)
        .ok_or_else(|| RemoteFault::resolution("accessor must start with a root name"))
}

/// Transport to a host living in the same process.
///
/// Requests still go through the wire codec, so in-process and socket
/// channels observe identical semantics.
pub struct LocalTransport {
    host: SharedHost,
}

impl LocalTransport {
    pub fn new(host: Host) -> Self {
        Self {
            host: host.shared(),
        }
    }

    /// Share a host with other transports or a socket server.
    pub fn shared(host: SharedHost) -> Self {
        Self { host }
    }
}

impl Transport for LocalTransport {
    fn exchange(&mut self, request: &Request) -> Result<Response, ChannelError> {
        let payload = codec::encode_request(request)?;
        let reply = self
            .host
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handle_bytes(&payload);
        codec::decode_response(&reply)
    }
}
