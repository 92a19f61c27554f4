//! The transport channel: the single serialization point of the bridge.
//!
//! A [`Channel`] is a cheap, cloneable handle to a dedicated worker thread
//! that owns a [`Transport`]. Callers on any thread submit requests into one
//! FIFO queue; the worker runs exactly one exchange at a time, in submission
//! order, and hands each response back to its waiting caller.
//!
//! ```text
//! caller A ──┐                         ┌──────────────────────┐
//! caller B ──┼──► FIFO queue ─────────►│ worker: Transport    │──► scripting host
//! caller C ──┘   (mpsc, unbounded)     │ one exchange at once │
//!      ▲                               └──────────┬───────────┘
//!      └──────── per-request reply slot ◄─────────┘
//! ```
//!
//! Callers block with a timeout. A caller that gives up only stops waiting:
//! the exchange still runs to completion on the worker and its response is
//! discarded, because remote mutation cannot be aborted half-way.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use crate::accessor::Accessor;
use crate::codec::{Request, Response};
use crate::config::BridgeConfig;
use crate::error::ChannelError;
use crate::host::{Host, LocalTransport, SharedHost};
use crate::ipc::SocketTransport;
use crate::value::Value;

/// Default time a caller waits for its response.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A request/response carrier to the scripting host.
///
/// Implementations run on the channel worker thread only, one exchange at a
/// time, so they need no internal synchronization.
pub trait Transport: Send + 'static {
    /// Deliver one request and wait for its response.
    fn exchange(&mut self, request: &Request) -> Result<Response, ChannelError>;
}

/// One queued request together with the slot its caller is waiting on.
struct Exchange {
    request: Request,
    reply: SyncSender<Result<Response, ChannelError>>,
}

/// Handle to the ordered request channel.
///
/// Clones share the same worker and queue. The worker shuts down when the
/// last clone is dropped or [`Channel::close`] is called.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    request_tx: Mutex<Option<Sender<Exchange>>>,
    closed: Arc<AtomicBool>,
    next_id: AtomicU64,
    timeout: Duration,
    worker_handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Channel {
    /// Start a channel worker that owns `transport`.
    pub fn spawn<T: Transport>(transport: T, timeout: Duration) -> Result<Self, ChannelError> {
        Self::spawn_with(move || Ok(transport), timeout)
    }

    /// Start a channel whose transport is built on the worker thread itself.
    ///
    /// Construction errors (e.g. a refused connection) are returned here
    /// rather than surfacing on the first call.
    pub fn spawn_with<T, F>(factory: F, timeout: Duration) -> Result<Self, ChannelError>
    where
        T: Transport,
        F: FnOnce() -> Result<T, ChannelError> + Send + 'static,
    {
        let (request_tx, request_rx) = mpsc::channel::<Exchange>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), ChannelError>>(1);
        let closed = Arc::new(AtomicBool::new(false));
        let worker_closed = Arc::clone(&closed);

        let worker_handle = thread::Builder::new()
            .name("hostbridge-channel".into())
            .spawn(move || {
                let transport = match factory() {
                    Ok(transport) => {
                        let _ = ready_tx.send(Ok(()));
                        transport
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                channel_worker_loop(transport, request_rx, worker_closed);
            })
            .map_err(ChannelError::Io)?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = worker_handle.join();
                return Err(e);
            }
            Err(_) => {
                return Err(ChannelError::Protocol(
                    "Channel worker exited during startup".to_string(),
                ))
            }
        }

        tracing::debug!("Channel worker started (timeout {:?})", timeout);

        Ok(Self {
            inner: Arc::new(ChannelInner {
                request_tx: Mutex::new(Some(request_tx)),
                closed,
                next_id: AtomicU64::new(1),
                timeout,
                worker_handle: Mutex::new(Some(worker_handle)),
            }),
        })
    }

    /// Channel to a scripting host running in this process.
    pub fn in_process(host: Host, timeout: Duration) -> Result<Self, ChannelError> {
        Self::spawn(LocalTransport::new(host), timeout)
    }

    /// Channel to an in-process host that others (e.g. a socket server)
    /// also hold.
    pub fn in_process_shared(host: SharedHost, timeout: Duration) -> Result<Self, ChannelError> {
        Self::spawn(LocalTransport::shared(host), timeout)
    }

    /// Channel to a scripting host serving on a Unix socket.
    ///
    /// Connection attempts back off exponentially; nothing is retried once
    /// the connection is up.
    pub fn connect(socket_path: &Path, config: &BridgeConfig) -> Result<Self, ChannelError> {
        let path: PathBuf = socket_path.to_path_buf();
        let io_timeout = config.io_timeout;
        let attempts = config.connect_attempts;
        Self::spawn_with(
            move || SocketTransport::connect_with_retry(&path, io_timeout, attempts),
            config.timeout,
        )
    }

    /// Channel described entirely by configuration.
    pub fn from_config(config: &BridgeConfig) -> Result<Self, ChannelError> {
        Self::connect(&config.socket_path, config)
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Shut the channel down.
    ///
    /// The exchange in flight (if any) completes on the worker; every queued
    /// and future call fails with [`ChannelError::Closed`].
    pub fn close(&self) {
        self.inner.close();
    }

    /// Read the value at `accessor`.
    pub fn get(&self, accessor: &Accessor) -> Result<Response, ChannelError> {
        self.send(Request::get(self.next_id(), accessor.clone()))
    }

    /// Assign `value` at `accessor`.
    pub fn set(&self, accessor: &Accessor, value: Value) -> Result<Response, ChannelError> {
        self.send(Request::set(self.next_id(), accessor.clone(), value))
    }

    /// Invoke the callable at `accessor`.
    pub fn call(
        &self,
        accessor: &Accessor,
        args: Vec<Value>,
        named: BTreeMap<String, Value>,
    ) -> Result<Response, ChannelError> {
        self.send(Request::call(self.next_id(), accessor.clone(), args, named))
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Queue a request and block until its response or the timeout.
    fn send(&self, request: Request) -> Result<Response, ChannelError> {
        let sender = self
            .inner
            .request_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ChannelError::Closed)?;

        let id = request.id;
        tracing::debug!("-> #{} {:?} {}", id, request.op, request.accessor);

        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        sender
            .send(Exchange {
                request,
                reply: reply_tx,
            })
            .map_err(|_| ChannelError::Closed)?;
        drop(sender);

        match reply_rx.recv_timeout(self.inner.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    "Request #{} timed out after {:?}; the remote side may still apply it",
                    id,
                    self.inner.timeout
                );
                Err(ChannelError::Timeout(self.inner.timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(ChannelError::Closed),
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("timeout", &self.inner.timeout)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ChannelInner {
    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::info!("Closing bridge channel");
        }
        // Dropping the sender lets the worker drain the queue and exit.
        self.request_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl Drop for ChannelInner {
    fn drop(&mut self) {
        self.close();

        // Brief wait for quick shutdown, then detach if the worker is stuck in
        // a slow exchange. Drop must not block on the remote side.
        let handle = self
            .worker_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            const QUICK_CHECK_INTERVAL: Duration = Duration::from_millis(10);
            const MAX_QUICK_CHECKS: u32 = 10;

            for _ in 0..MAX_QUICK_CHECKS {
                if handle.is_finished() {
                    if let Err(e) = handle.join() {
                        tracing::warn!("Channel worker panicked during shutdown: {:?}", e);
                    } else {
                        tracing::debug!("Channel worker shut down gracefully");
                    }
                    return;
                }
                thread::sleep(QUICK_CHECK_INTERVAL);
            }

            tracing::debug!(
                "Channel worker still busy after {}ms - detaching",
                QUICK_CHECK_INTERVAL.as_millis() * MAX_QUICK_CHECKS as u128
            );
        }
    }
}

/// Worker loop: one exchange at a time, in queue order.
///
/// Transport panics are caught so one bad exchange does not kill the channel.
fn channel_worker_loop<T: Transport>(
    mut transport: T,
    request_rx: Receiver<Exchange>,
    closed: Arc<AtomicBool>,
) {
    while let Ok(Exchange { request, reply }) = request_rx.recv() {
        let id = request.id;

        if closed.load(Ordering::SeqCst) {
            let _ = reply.try_send(Err(ChannelError::Closed));
            continue;
        }

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            transport.exchange(&request)
        }));

        let result = match result {
            Ok(result) => result,
            Err(panic_info) => {
                let panic_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    (*s).to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic in transport".to_string()
                };
                tracing::error!("Channel worker caught panic on #{}: {}", id, panic_msg);
                Err(ChannelError::Protocol(format!(
                    "Transport panicked: {}",
                    panic_msg
                )))
            }
        };

        if let Ok(response) = &result {
            tracing::debug!("<- #{} ok={}", response.id, response.ok);
        }

        if reply.try_send(result).is_err() {
            tracing::warn!("Caller stopped waiting for #{}; discarding response", id);
        }
    }

    tracing::info!("Channel worker exiting");
}
