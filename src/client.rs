//! The per-device client runtime (`spec.md` §4.4): queued/priority sends,
//! send-and-await-response, and the connection status state machine.
//!
//! Grounded in `crazyflie/crazyflie.go`'s `Connect`/`communicationLoop` and
//! `crazyflie/communication.go`'s `packetCustomSendAndAwaitResponse`: a
//! transient listener is registered for the expected response, the caller
//! races it against a timeout, and a background health check demotes the
//! client to `NoResponse` after too long without a single ack.

use crate::crtp::{Decoded, Port, Request, ResponseTemplate};
use crate::dispatcher::queue::SendQueues;
use crate::dispatcher::{ClientAddress, Dispatcher};
use crate::error::{Error, Result};
use crate::link::LinkConfig;
use crate::listener::ListenerTable;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

/// `spec.md` §4.4: a client starts `Disconnected`, becomes `Connected` once
/// any frame is acked, and falls back to `NoResponse` (not `Disconnected`)
/// if acks stop arriving — it returns to `Connected` the moment one arrives
/// again, without the caller having to reconnect.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum Status {
    Disconnected = 0,
    Connected = 1,
    NoResponse = 2,
}

impl Status {
    fn from_u8(v: u8) -> Status {
        match v {
            1 => Status::Connected,
            2 => Status::NoResponse,
            _ => Status::Disconnected,
        }
    }
}

/// How long a client may go without any acked frame before it's marked
/// `NoResponse` (`spec.md` §4.4).
pub const RESPONSE_TIMEOUT: Duration = Duration::from_millis(500);

struct LastSeen {
    at: Mutex<Instant>,
}

impl LastSeen {
    fn touch(&self) {
        *self.at.lock().expect("last-seen mutex poisoned") = Instant::now();
    }

    fn elapsed(&self) -> Duration {
        self.at.lock().expect("last-seen mutex poisoned").elapsed()
    }
}

/// A handle to one connected device. Cloning shares the same underlying
/// queues, listener table, and status; all clones refer to the same client.
#[derive(Clone)]
pub struct Client {
    addr: ClientAddress,
    queues: Arc<SendQueues>,
    listeners: Arc<ListenerTable>,
    status: Arc<AtomicU8>,
    last_seen: Arc<LastSeen>,
    console: Arc<crate::console::ConsoleChannel>,
    health_task: Arc<JoinHandle<()>>,
}

impl Client {
    /// Attaches a new client to `dispatcher` at `addr`, registers a console
    /// listener (`spec.md`'s ambient console subsystem), and starts the
    /// background health-timeout task.
    pub fn attach(dispatcher: &Dispatcher, addr: ClientAddress, link_config: LinkConfig) -> Client {
        let (queues, listeners) = dispatcher.attach(addr, link_config);
        let status = Arc::new(AtomicU8::new(Status::Disconnected as u8));
        let last_seen = Arc::new(LastSeen { at: Mutex::new(Instant::now()) });
        let console = Arc::new(crate::console::ConsoleChannel::new());

        listeners.register(Box::new(crate::console::ConsoleListener::new(Arc::clone(&console))));
        listeners.register(Box::new(LivenessListener { last_seen: Arc::clone(&last_seen), status: Arc::clone(&status) }));

        let health_status = Arc::clone(&status);
        let health_last_seen = Arc::clone(&last_seen);
        let health_task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(50)).await;
                let elapsed = health_last_seen.elapsed();
                let current = Status::from_u8(health_status.load(Ordering::Relaxed));
                let next = if elapsed > RESPONSE_TIMEOUT {
                    if current == Status::Connected {
                        Status::NoResponse
                    } else {
                        current
                    }
                } else if current != Status::Disconnected {
                    Status::Connected
                } else {
                    current
                };
                if next != current {
                    debug!(?current, ?next, "client status transition");
                    health_status.store(next as u8, Ordering::Relaxed);
                }
            }
        });

        Client {
            addr,
            queues,
            listeners,
            status,
            last_seen,
            console,
            health_task: Arc::new(health_task),
        }
    }

    pub fn address(&self) -> ClientAddress {
        self.addr
    }

    pub fn status(&self) -> Status {
        Status::from_u8(self.status.load(Ordering::Relaxed))
    }

    pub fn enqueue(&self, request: &dyn Request) {
        self.queues.push_standard(request.encode());
    }

    pub fn enqueue_priority(&self, request: &dyn Request) {
        self.queues.push_priority(request.encode());
    }

    pub async fn wait_queues_drained(&self) {
        self.queues.wait_drained().await;
    }

    pub fn console_lines(&self) -> tokio::sync::mpsc::UnboundedReceiver<String> {
        self.console.subscribe()
    }

    /// Sends `request`, then waits up to `timeout` for a frame that makes
    /// `response` report `Decoded::Ok` or `Decoded::ContentError`. Any other
    /// received frame on that (port, channel) is treated as `Mismatch` and
    /// ignored, per `spec.md` §4.1/§4.4.
    pub async fn send_and_await_response<R, T>(&self, request: &R, response: T, timeout: Duration) -> Result<T>
    where
        R: Request,
        T: ResponseTemplate + 'static,
    {
        self.await_response(request, response, timeout, false).await
    }

    /// Like [`Client::send_and_await_response`], but enqueues `request` on
    /// the priority queue instead of the standard one. Used by the reboot
    /// handshake (`spec.md` §4.6) so its command packet is serviced on the
    /// same priority lane as the init packet sent ahead of it, rather than
    /// sitting behind whatever else is already queued standard traffic.
    pub async fn send_and_await_priority_response<R, T>(&self, request: &R, response: T, timeout: Duration) -> Result<T>
    where
        R: Request,
        T: ResponseTemplate + 'static,
    {
        self.await_response(request, response, timeout, true).await
    }

    async fn await_response<R, T>(&self, request: &R, response: T, timeout: Duration, priority: bool) -> Result<T>
    where
        R: Request,
        T: ResponseTemplate + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let awaiting = AwaitingTemplate { inner: Some(response), tx: Some(tx) };
        let id = self.listeners.register(Box::new(awaiting));

        if priority {
            self.queues.push_priority(request.encode());
        } else {
            self.queues.push_standard(request.encode());
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(AwaitOutcome::Ok(t))) => Ok(t),
            Ok(Ok(AwaitOutcome::ContentError(e))) => Err(e),
            Ok(Err(_)) => Err(Error::NoResponse),
            Err(_) => {
                self.listeners.deregister(id);
                Err(Error::NoResponse)
            }
        }
    }
}

enum AwaitOutcome<T> {
    Ok(T),
    ContentError(Error),
}

/// Wraps a caller's response template so its port/channel are exposed to the
/// listener table as usual, but a matching frame is reported to the waiting
/// caller over a oneshot instead of being read back out of the table.
///
/// The `Decoded` this returns only needs to distinguish "stay registered"
/// from "finished" for [`ListenerTable::dispatch`]'s bookkeeping — whether
/// the finish was a content success or a content-level error is carried
/// separately through the oneshot channel, since `Error` isn't `Clone` and
/// the table has no other use for the distinction.
struct AwaitingTemplate<T> {
    inner: Option<T>,
    tx: Option<oneshot::Sender<AwaitOutcome<T>>>,
}

impl<T: ResponseTemplate + Send> ResponseTemplate for AwaitingTemplate<T> {
    fn port(&self) -> Port {
        self.inner.as_ref().expect("template polled after it resolved").port()
    }

    fn channel(&self) -> u8 {
        self.inner.as_ref().expect("template polled after it resolved").channel()
    }

    fn load_from_bytes(&mut self, frame: &[u8]) -> Decoded {
        let verdict = self
            .inner
            .as_mut()
            .expect("template polled after it resolved")
            .load_from_bytes(frame);
        match verdict {
            Decoded::Mismatch => Decoded::Mismatch,
            Decoded::Ok => {
                if let (Some(inner), Some(tx)) = (self.inner.take(), self.tx.take()) {
                    let _ = tx.send(AwaitOutcome::Ok(inner));
                }
                Decoded::Ok
            }
            Decoded::ContentError(e) => {
                self.inner.take();
                if let Some(tx) = self.tx.take() {
                    let _ = tx.send(AwaitOutcome::ContentError(e));
                }
                Decoded::Ok
            }
        }
    }
}

/// Registered on [`Port::Any`] for every client; touches the liveness clock
/// on every frame regardless of port, mirroring `communication.go`'s
/// `responseHandler` resetting its status timeout before fanning the frame
/// out to its real listeners. Always reports `Mismatch` so it never
/// deregisters itself.
struct LivenessListener {
    last_seen: Arc<LastSeen>,
    status: Arc<AtomicU8>,
}

impl ResponseTemplate for LivenessListener {
    fn port(&self) -> Port {
        Port::Any
    }

    fn channel(&self) -> u8 {
        0
    }

    fn load_from_bytes(&mut self, _frame: &[u8]) -> Decoded {
        self.last_seen.touch();
        if Status::from_u8(self.status.load(Ordering::Relaxed)) == Status::Disconnected {
            self.status.store(Status::Connected as u8, Ordering::Relaxed);
        }
        Decoded::Mismatch
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        // Only abort the health task once the last clone goes away.
        if Arc::strong_count(&self.health_task) == 1 {
            self.health_task.abort();
        }
    }
}
