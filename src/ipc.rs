//! Unix-socket plumbing between a bridge client and a `hostbridged` host.
//!
//! ```text
//! ┌──────────────────┐         Unix Socket          ┌──────────────────────┐
//! │ Channel worker   │  ◄──────────────────────────►│ hostbridged          │
//! │ (SocketTransport)│   JSON messages + framing    │ (host::server, Host) │
//! └──────────────────┘                              └──────────────────────┘
//! ```
//!
//! # Protocol
//!
//! Messages use HTTP-style Content-Length framing (same as LSP):
//!
//! ```text
//! Content-Length: 36\r\n
//! \r\n
//! {"id":1,"accessor":"app","op":"get"}
//! ```
//!
//! One connection carries one request at a time; the server answers each
//! frame with exactly one frame.

mod client;
pub mod framing;

pub use client::SocketTransport;
pub use framing::{read_message, write_message, MAX_MESSAGE_SIZE};
