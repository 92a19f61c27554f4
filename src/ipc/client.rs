//! Socket transport: the client end of the Unix-socket bridge.
//!
//! `SocketTransport` runs on the channel worker thread. It owns a small
//! current-thread tokio runtime and blocks on it for each exchange, so the
//! rest of the bridge stays synchronous.
//!
//! A frame cut off by the I/O timeout leaves the stream at an unknown
//! offset, so any failed exchange discards its connection. The next
//! exchange opens a fresh one.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::runtime::Runtime;
use tokio::time::timeout;

use crate::channel::Transport;
use crate::codec::{self, Request, Response};
use crate::error::ChannelError;
use crate::ipc::framing::{read_message, write_message};

/// Connection to a `hostbridged` socket, re-established after a failed
/// exchange.
pub struct SocketTransport {
    runtime: Runtime,
    socket_path: PathBuf,
    /// `None` once an exchange has failed mid-stream.
    connection: Option<Connection>,
    /// Limit on one exchange.
    io_timeout: Duration,
}

struct Connection {
    /// Buffered reader for incoming messages.
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Connection {
    async fn open(socket_path: &Path) -> Result<Self, ChannelError> {
        let stream = UnixStream::connect(socket_path)
            .await
            .map_err(ChannelError::ConnectionFailed)?;
        let (read_half, write_half) = stream.into_split();
        tracing::debug!("Connected to {}", socket_path.display());
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        })
    }
}

impl SocketTransport {
    /// Connect to the host at the given socket path.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::ConnectionFailed` if:
    /// - The socket file does not exist
    /// - Connection is refused (host not running)
    /// - Permission denied
    pub fn connect(socket_path: &Path, io_timeout: Duration) -> Result<Self, ChannelError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .enable_time()
            .build()
            .map_err(ChannelError::Io)?;

        let connection = runtime.block_on(Connection::open(socket_path))?;

        Ok(Self {
            runtime,
            socket_path: socket_path.to_path_buf(),
            connection: Some(connection),
            io_timeout,
        })
    }

    /// Connect with automatic retry and exponential backoff.
    ///
    /// Useful at startup when the host may still be initializing.
    /// Retries with delays of 100ms, 200ms, 400ms, etc. `max_attempts` of
    /// zero still makes one attempt.
    ///
    /// # Errors
    ///
    /// Returns the last connection error if all attempts fail.
    pub fn connect_with_retry(
        socket_path: &Path,
        io_timeout: Duration,
        max_attempts: u32,
    ) -> Result<Self, ChannelError> {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match Self::connect(socket_path, io_timeout) {
                Ok(transport) => return Ok(transport),
                Err(e) if attempt < max_attempts => {
                    // Exponential backoff: 100ms, 200ms, 400ms, ...
                    let delay = Duration::from_millis(100 * (1 << (attempt - 1).min(10)));
                    tracing::debug!(
                        "Connect attempt {}/{} failed ({}); retrying in {:?}",
                        attempt,
                        max_attempts,
                        e,
                        delay
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Whether a connection is currently open.
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }
}

impl Transport for SocketTransport {
    fn exchange(&mut self, request: &Request) -> Result<Response, ChannelError> {
        let payload = codec::encode_request(request)?;
        let io_timeout = self.io_timeout;

        let mut connection = match self.connection.take() {
            Some(connection) => connection,
            None => {
                tracing::info!("Reconnecting to {}", self.socket_path.display());
                self.runtime.block_on(Connection::open(&self.socket_path))?
            }
        };

        let result = self.runtime.block_on(async {
            match timeout(io_timeout, send_receive(&mut connection, &payload, request.id)).await {
                Ok(result) => result,
                Err(_) => Err(ChannelError::Timeout(io_timeout)),
            }
        });

        match result {
            Ok(response) => {
                self.connection = Some(connection);
                Ok(response)
            }
            Err(e) => {
                tracing::warn!(
                    "Dropping connection to {} after failed exchange #{}: {}",
                    self.socket_path.display(),
                    request.id,
                    e
                );
                Err(e)
            }
        }
    }
}

/// Send one frame and read frames until the matching response.
///
/// Responses with another id are skipped.
async fn send_receive(
    connection: &mut Connection,
    payload: &[u8],
    id: u64,
) -> Result<Response, ChannelError> {
    write_message(&mut connection.writer, payload)
        .await
        .map_err(|e| stream_error(e, "Failed to send request"))?;

    loop {
        let body = read_message(&mut connection.reader)
            .await
            .map_err(|e| stream_error(e, "Failed to read response"))?
            .ok_or(ChannelError::Closed)?;

        let response = codec::decode_response(&body)?;
        if response.id == id {
            return Ok(response);
        }
        tracing::warn!(
            "Discarding stale response #{} while waiting for #{}",
            response.id,
            id
        );
    }
}

/// A broken or reset stream means the host went away; anything else is a
/// framing problem.
fn stream_error(err: anyhow::Error, context: &str) -> ChannelError {
    if let Some(io) = err.root_cause().downcast_ref::<std::io::Error>() {
        if matches!(
            io.kind(),
            std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::UnexpectedEof
        ) {
            return ChannelError::Closed;
        }
    }
    ChannelError::Protocol(format!("{}: {:#}", context, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::Accessor;
    use crate::value::Value;
    use pretty_assertions::assert_eq;
    use std::io::{BufRead, BufReader as StdBufReader, Read, Write};
    use std::os::unix::net::{UnixListener, UnixStream as StdUnixStream};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn frame(body: &[u8]) -> Vec<u8> {
        let mut bytes = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
        bytes.extend_from_slice(body);
        bytes
    }

    fn read_frame(reader: &mut StdBufReader<StdUnixStream>) -> Option<Vec<u8>> {
        let mut length = 0;
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).ok()? == 0 {
                return None;
            }
            let line = line.trim();
            if line.is_empty() {
                break;
            }
            if let Some(value) = line.strip_prefix("Content-Length:") {
                length = value.trim().parse().ok()?;
            }
        }
        let mut body = vec![0; length];
        reader.read_exact(&mut body).ok()?;
        Some(body)
    }

    /// Answers every request with its own id. The first reply ever sent
    /// stalls halfway through its body for `stall`.
    fn spawn_stalling_host(path: &Path, stall: Duration) {
        let listener = UnixListener::bind(path).unwrap();
        let stalled = Arc::new(AtomicBool::new(false));
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let stalled = Arc::clone(&stalled);
                std::thread::spawn(move || {
                    let mut writer = stream.try_clone().unwrap();
                    let mut reader = StdBufReader::new(stream);
                    while let Some(body) = read_frame(&mut reader) {
                        let request = codec::decode_request(&body).unwrap();
                        let reply = codec::encode_response(&Response::success(
                            request.id,
                            Value::Int(request.id as i64),
                        ))
                        .unwrap();
                        let bytes = frame(&reply);
                        if !stalled.swap(true, Ordering::SeqCst) {
                            let cut = bytes.len() - reply.len() / 2;
                            let _ = writer.write_all(&bytes[..cut]);
                            std::thread::sleep(stall);
                            let _ = writer.write_all(&bytes[cut..]);
                        } else if writer.write_all(&bytes).is_err() {
                            break;
                        }
                    }
                });
            }
        });
    }

    #[test]
    fn test_connect_to_missing_socket_fails() {
        let path = PathBuf::from("/nonexistent/hostbridge-test.sock");
        let result = SocketTransport::connect(&path, Duration::from_secs(1));
        assert!(matches!(result, Err(ChannelError::ConnectionFailed(_))));
    }

    #[test]
    fn test_retry_gives_up_with_last_error() {
        let path = PathBuf::from("/nonexistent/hostbridge-test.sock");
        let started = std::time::Instant::now();
        let result = SocketTransport::connect_with_retry(&path, Duration::from_secs(1), 2);
        assert!(matches!(result, Err(ChannelError::ConnectionFailed(_))));
        // One backoff of 100ms between the two attempts.
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn test_stream_error_classification() {
        let reset = anyhow::Error::new(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ))
        .context("Failed to read header line");
        assert!(matches!(stream_error(reset, "read"), ChannelError::Closed));

        let garbage = anyhow::anyhow!("Missing Content-Length header");
        match stream_error(garbage, "Failed to read response") {
            ChannelError::Protocol(message) => {
                assert_eq!(message, "Failed to read response: Missing Content-Length header")
            }
            other => panic!("Expected Protocol, got {:?}", other),
        }
    }

    #[test]
    fn test_reply_split_across_timeout_does_not_poison_next_exchange() {
        let path = std::env::temp_dir().join(format!(
            "hostbridge-split-{}-{}.sock",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        spawn_stalling_host(&path, Duration::from_millis(300));

        let mut transport = SocketTransport::connect(&path, Duration::from_millis(100)).unwrap();
        let first = transport.exchange(&Request::get(1, Accessor::root("a")));
        assert!(matches!(first, Err(ChannelError::Timeout(_))), "{:?}", first);
        assert!(!transport.is_connected());

        let second = transport
            .exchange(&Request::get(2, Accessor::root("a")))
            .unwrap();
        assert_eq!(second, Response::success(2, Value::Int(2)));
        assert!(transport.is_connected());

        let third = transport
            .exchange(&Request::get(3, Accessor::root("a")))
            .unwrap();
        assert_eq!(third, Response::success(3, Value::Int(3)));

        let _ = std::fs::remove_file(&path);
    }
}
