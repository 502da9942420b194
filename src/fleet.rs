//! The fleet handle: the top-level entry point owning one transport
//! [`Dispatcher`] and the [`Client`]s currently attached to it.
//!
//! This is the ambient piece that turns the dispatcher and client runtime
//! into something a caller actually drives; grounded in `crazyserver.go`'s
//! `addCrazyflie`/`removeCrazyflie`, which is the original's equivalent
//! top-level API (there, a long-lived HTTP server's handlers; here, direct
//! method calls).

use crate::client::Client;
use crate::dispatcher::{ClientAddress, Dispatcher};
use crate::error::{Error, Result};
use crate::link::radio::RadioLink;
use crate::link::usb::UsbLink;
use crate::link::LinkConfig;
use std::collections::HashMap;
use std::sync::Mutex;

/// Owns a dispatcher and the clients currently attached to it. A fleet talks
/// to either a set of radio dongles (many devices, one dispatcher) or a
/// single direct USB cable (exactly one device).
pub struct Fleet {
    dispatcher: Dispatcher,
    clients: Mutex<HashMap<ClientAddress, Client>>,
}

impl Fleet {
    /// Opens every attached Crazyradio-class dongle and starts their shared
    /// coordinator.
    pub fn open_radios() -> Result<Fleet> {
        let radios = RadioLink::open_all()?;
        Ok(Fleet { dispatcher: Dispatcher::spawn_radio(radios), clients: Mutex::new(HashMap::new()) })
    }

    /// Opens the single attached direct-cable device.
    pub fn open_usb_cable() -> Result<Fleet> {
        let link = UsbLink::open()?;
        Ok(Fleet { dispatcher: Dispatcher::spawn_usb(link), clients: Mutex::new(HashMap::new()) })
    }

    /// Attaches a new client at `(channel, address)` with the given radio
    /// tuning (ignored by the USB-cable backend) and returns a handle to it.
    /// Returns the existing handle if one is already attached at that
    /// address, matching `addCrazyflie`'s idempotent re-add.
    pub fn connect(&self, channel: u8, address: u64, link_config: LinkConfig) -> Client {
        let addr = ClientAddress { channel, address };
        let mut clients = self.clients.lock().expect("fleet client-map mutex poisoned");
        if let Some(existing) = clients.get(&addr) {
            return existing.clone();
        }
        let client = Client::attach(&self.dispatcher, addr, link_config);
        clients.insert(addr, client.clone());
        client
    }

    /// Convenience for the USB-cable backend, which always serves exactly
    /// one client at a fixed address.
    pub fn connect_usb_cable(&self) -> Client {
        let addr = Dispatcher::usb_cable_address();
        let mut clients = self.clients.lock().expect("fleet client-map mutex poisoned");
        if let Some(existing) = clients.get(&addr) {
            return existing.clone();
        }
        let client = Client::attach(&self.dispatcher, addr, LinkConfig::default());
        clients.insert(addr, client.clone());
        client
    }

    /// Detaches the client at `(channel, address)`, if any is attached.
    pub fn disconnect(&self, channel: u8, address: u64) {
        let addr = ClientAddress { channel, address };
        self.dispatcher.detach(&addr);
        self.clients.lock().expect("fleet client-map mutex poisoned").remove(&addr);
    }

    pub fn client(&self, channel: u8, address: u64) -> Result<Client> {
        let addr = ClientAddress { channel, address };
        self.clients
            .lock()
            .expect("fleet client-map mutex poisoned")
            .get(&addr)
            .cloned()
            .ok_or(Error::DeviceNotFound)
    }

    /// Number of radio dongles backing this fleet, or `None` over a USB
    /// cable.
    pub fn radio_count(&self) -> Option<usize> {
        self.dispatcher.radio_count()
    }
}
