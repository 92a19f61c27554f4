//! hostbridge: a typed runtime bridge to a live scripting-host object graph.
//!
//! The scripting host owns a mutable, dynamically typed graph. This crate
//! lets statically typed code read, write and call into it by path:
//!
//! - `accessor` - path expressions such as `app.layers["Ink"].opacity`
//! - `value` - the closed set of kinds that cross the boundary
//! - `codec` - wire messages and per-kind checking of replies
//! - `channel` - the ordered, blocking request channel
//! - `ipc` - Content-Length framing and the Unix-socket transport
//! - `host` - the remote execution loop, graph model and socket server
//! - `interop` - the typed facade generated classes call
//! - `collection` - generic and specialized collection proxies
//!
//! # Usage
//!
//! ```ignore
//! use hostbridge::{interop, remote_class, Accessor, BridgeConfig, Channel, RemoteClass};
//!
//! remote_class! {
//!     pub struct Layer => "Layer";
//! }
//!
//! let config = BridgeConfig::from_env()?;
//! let channel = Channel::from_config(&config)?;
//! let layer: Layer = interop::get_class(&channel, &Accessor::root("doc").member("active"))?;
//! interop::set_float(&channel, &layer.member("opacity"), 0.5)?;
//! ```

pub mod accessor;
pub mod channel;
pub mod codec;
pub mod collection;
pub mod config;
pub mod error;
pub mod host;
pub mod interop;
pub mod ipc;
pub mod marshal;
pub mod value;

pub use accessor::{Accessor, Segment};
pub use channel::{Channel, Transport};
pub use collection::{create_generic, create_specialized, Collection, SpecializedCollection};
pub use config::BridgeConfig;
pub use error::{BridgeError, ChannelError, RemoteFault, Result};
pub use interop::{Args, ObjectRef, RemoteClass};
pub use marshal::Marshal;
pub use value::{Kind, Matrix, Value};
