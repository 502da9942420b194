//! The transport dispatcher (`spec.md` §4.3): the coordinator/worker
//! machinery that multiplexes many per-device clients over one or more radio
//! dongles, or drives a single direct USB cable.
//!
//! The radio variant mirrors the original's `coordinatorThread`/`radioThread`
//! split (`crazyradio/crazyradio.go`): each cycle, the coordinator collects
//! the distinct channels that currently have at least one registered client,
//! hands each channel to an idle radio as one unit of work, and barriers on
//! every unit completing before starting the next cycle. A channel with no
//! registered clients at all means an idle coordinator sleeps 10ms and
//! retries, exactly as the original does.

pub mod queue;

use crate::crtp::Port;
use crate::link::radio::RadioLink;
use crate::link::usb::UsbLink;
use crate::link::{Link, LinkConfig};
use crate::listener::ListenerTable;
use queue::{QueueKind, SendQueues};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

/// Identifies one client's slot in the fleet: the radio channel it's tuned
/// to and its 5-byte device address (`spec.md` §3). Meaningless for the
/// direct USB cable, which serves exactly one client per [`Dispatcher`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ClientAddress {
    pub channel: u8,
    pub address: u64,
}

struct ClientEntry {
    link_config: Mutex<LinkConfig>,
    queues: Arc<SendQueues>,
    listeners: Arc<ListenerTable>,
}

struct Registry {
    clients: Mutex<HashMap<ClientAddress, Arc<ClientEntry>>>,
}

impl Registry {
    fn new() -> Self {
        Registry { clients: Mutex::new(HashMap::new()) }
    }

    fn channels_with_clients(&self) -> Vec<u8> {
        let clients = self.clients.lock().expect("registry mutex poisoned");
        let mut channels: Vec<u8> = clients.keys().map(|a| a.channel).collect::<HashSet<_>>().into_iter().collect();
        channels.sort_unstable();
        channels
    }

    fn addresses_on_channel(&self, channel: u8) -> Vec<ClientAddress> {
        let clients = self.clients.lock().expect("registry mutex poisoned");
        clients.keys().filter(|a| a.channel == channel).copied().collect()
    }

    fn entry(&self, addr: &ClientAddress) -> Option<Arc<ClientEntry>> {
        self.clients.lock().expect("registry mutex poisoned").get(addr).cloned()
    }
}

/// A hand-rolled async pool of idle radio dongles. Built from a mutex-guarded
/// deque plus [`Notify`] rather than an external pool crate, since the
/// acquire/release shape here is small enough to not justify the dependency.
struct RadioPool {
    idle: Mutex<VecDeque<Arc<RadioLink>>>,
    notify: Notify,
}

impl RadioPool {
    fn new(radios: Vec<RadioLink>) -> Self {
        RadioPool {
            idle: Mutex::new(radios.into_iter().map(Arc::new).collect()),
            notify: Notify::new(),
        }
    }

    async fn acquire(&self) -> Arc<RadioLink> {
        loop {
            let notified = self.notify.notified();
            if let Some(radio) = self.idle.lock().expect("radio pool mutex poisoned").pop_front() {
                return radio;
            }
            notified.await;
        }
    }

    fn release(&self, radio: Arc<RadioLink>) {
        self.idle.lock().expect("radio pool mutex poisoned").push_back(radio);
        self.notify.notify_one();
    }
}

/// Runs one dispatch cycle for a single client over `link`: tune to
/// `link_config`, send whatever's queued (or a bare keepalive if nothing
/// is), and deliver any acked, non-idle response to `listeners`.
///
/// Public so the same cycle logic backing the radio coordinator and the USB
/// cable loop can be driven directly in tests against a mock [`Link`],
/// without spinning up a whole [`Dispatcher`] (`spec.md` §8's testable
/// properties around queue draining and response delivery).
pub async fn service_cycle<L: Link>(link: &L, link_config: LinkConfig, queues: &SendQueues, listeners: &ListenerTable) {
    if let Err(e) = link.configure(link_config).await {
        warn!(error = ?e, "failed to configure link for client cycle");
        return;
    }

    let (kind, frame) = match queues.peek_next() {
        Some((kind, frame)) => (Some(kind), frame),
        None => (None, crate::crtp::KEEPALIVE_FRAME.to_vec()),
    };

    if let Err(e) = link.send(&frame).await {
        warn!(error = ?e, "failed to send frame");
        return;
    }

    let (ack_received, response) = match link.read().await {
        Ok(r) => r,
        Err(e) => {
            warn!(error = ?e, "failed to read link response");
            return;
        }
    };

    if !ack_received {
        // No ack: the frame stays at the head of its queue and is retried
        // next cycle (spec.md invariant 3).
        return;
    }

    if let Some(kind) = kind {
        queues.confirm_sent(kind);
    }

    if response.is_empty() || Port::is_idle_frame(&response) {
        trace!("idle or empty response, nothing to dispatch");
        return;
    }

    listeners.dispatch(&response);
}

async fn run_channel_cycle(registry: &Registry, radio: &Arc<RadioLink>, channel: u8) {
    for addr in registry.addresses_on_channel(channel) {
        if let Some(entry) = registry.entry(&addr) {
            let cfg = *entry.link_config.lock().expect("client link-config mutex poisoned");
            service_cycle(radio, cfg, &entry.queues, &entry.listeners).await;
        }
    }
}

async fn radio_coordinator(registry: Arc<Registry>, pool: Arc<RadioPool>) {
    loop {
        let channels = registry.channels_with_clients();
        if channels.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
            continue;
        }

        let mut handles = Vec::with_capacity(channels.len());
        for channel in channels {
            let registry = Arc::clone(&registry);
            let pool = Arc::clone(&pool);
            handles.push(tokio::spawn(async move {
                let radio = pool.acquire().await;
                run_channel_cycle(&registry, &radio, channel).await;
                pool.release(radio);
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }
}

const USB_CABLE_CHANNEL: u8 = 0;
const USB_CABLE_ADDRESS: u64 = 0;

async fn usb_loop(registry: Arc<Registry>, link: Arc<UsbLink>) {
    let addr = ClientAddress { channel: USB_CABLE_CHANNEL, address: USB_CABLE_ADDRESS };
    loop {
        let entry = match registry.entry(&addr) {
            Some(e) => e,
            None => {
                tokio::time::sleep(Duration::from_millis(10)).await;
                continue;
            }
        };
        let cfg = *entry.link_config.lock().expect("client link-config mutex poisoned");
        service_cycle(&link, cfg, &entry.queues, &entry.listeners).await;
    }
}

enum Backend {
    Radio { pool: Arc<RadioPool> },
    Usb,
}

/// Owns the worker tasks for one transport backend and the registry of
/// clients currently being serviced. Dropping a `Dispatcher` aborts its
/// background tasks.
pub struct Dispatcher {
    registry: Arc<Registry>,
    backend: Backend,
    tasks: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    /// Starts the coordinator over every dongle in `radios`.
    pub fn spawn_radio(radios: Vec<RadioLink>) -> Dispatcher {
        let registry = Arc::new(Registry::new());
        let pool = Arc::new(RadioPool::new(radios));
        let task = tokio::spawn(radio_coordinator(Arc::clone(&registry), Arc::clone(&pool)));
        Dispatcher { registry, backend: Backend::Radio { pool }, tasks: vec![task] }
    }

    /// Starts the single-device loop over a direct USB cable. Only one
    /// client may ever be attached to a cable dispatcher.
    pub fn spawn_usb(link: UsbLink) -> Dispatcher {
        let registry = Arc::new(Registry::new());
        let link = Arc::new(link);
        let task = tokio::spawn(usb_loop(Arc::clone(&registry), link));
        Dispatcher { registry, backend: Backend::Usb, tasks: vec![task] }
    }

    /// The address a USB-cable dispatcher's sole client must be attached
    /// under.
    pub fn usb_cable_address() -> ClientAddress {
        ClientAddress { channel: USB_CABLE_CHANNEL, address: USB_CABLE_ADDRESS }
    }

    pub fn attach(&self, addr: ClientAddress, link_config: LinkConfig) -> (Arc<SendQueues>, Arc<ListenerTable>) {
        let queues = Arc::new(SendQueues::new());
        let listeners = Arc::new(ListenerTable::new());
        let entry = Arc::new(ClientEntry {
            link_config: Mutex::new(link_config),
            queues: Arc::clone(&queues),
            listeners: Arc::clone(&listeners),
        });
        self.registry.clients.lock().expect("registry mutex poisoned").insert(addr, entry);
        (queues, listeners)
    }

    pub fn detach(&self, addr: &ClientAddress) {
        self.registry.clients.lock().expect("registry mutex poisoned").remove(addr);
    }

    /// Number of radio dongles backing this dispatcher, or `None` for a
    /// single USB cable.
    pub fn radio_count(&self) -> Option<usize> {
        match &self.backend {
            Backend::Radio { pool } => Some(pool.idle.lock().expect("radio pool mutex poisoned").len()),
            Backend::Usb => None,
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_and_detach_update_the_registry() {
        let registry = Registry::new();
        let addr = ClientAddress { channel: 5, address: 0xE7E7E7E7E7 };
        let entry = Arc::new(ClientEntry {
            link_config: Mutex::new(LinkConfig::default()),
            queues: Arc::new(SendQueues::new()),
            listeners: Arc::new(ListenerTable::new()),
        });
        registry.clients.lock().unwrap().insert(addr, entry);
        assert_eq!(registry.channels_with_clients(), vec![5]);
        registry.clients.lock().unwrap().remove(&addr);
        assert!(registry.channels_with_clients().is_empty());
    }

    #[test]
    fn channels_with_clients_is_sorted_and_deduplicated() {
        let registry = Registry::new();
        for (channel, address) in [(3u8, 1u64), (1, 2), (3, 3)] {
            let entry = Arc::new(ClientEntry {
                link_config: Mutex::new(LinkConfig::default()),
                queues: Arc::new(SendQueues::new()),
                listeners: Arc::new(ListenerTable::new()),
            });
            registry.clients.lock().unwrap().insert(ClientAddress { channel, address }, entry);
        }
        assert_eq!(registry.channels_with_clients(), vec![1, 3]);
    }
}
