//! The 2.4 GHz USB dongle radio: multi-channel, multi-address, half-duplex,
//! with hardware autoack and autoretransmit (`spec.md` §4.2, §6).
//!
//! All USB traffic happens on a blocking `rusb` handle; every public method
//! hops onto a blocking-pool thread via [`tokio::task::spawn_blocking`] so
//! the dispatcher's async tasks never stall waiting on libusb.

use super::{AutoRetryDelay, BoxFuture, DataRate, Link, LinkConfig, Power};
use crate::error::{Error, Result};
use rusb::{Direction, GlobalContext, Recipient, RequestType};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Crazyradio-class dongle identity (`spec.md` §6).
pub const VENDOR_ID: u16 = 0x1915;
pub const PRODUCT_ID: u16 = 0x7777;

const ENDPOINT_OUT: u8 = 0x01;
const ENDPOINT_IN: u8 = 0x81;
const USB_TIMEOUT: Duration = Duration::from_millis(500);

mod request {
    pub const SET_CHANNEL: u8 = 0x01;
    pub const SET_ADDRESS: u8 = 0x02;
    pub const SET_DATARATE: u8 = 0x03;
    pub const SET_POWER: u8 = 0x04;
    pub const SET_ARD: u8 = 0x05;
    pub const SET_ARC: u8 = 0x06;
    pub const SET_ACK_ENABLE: u8 = 0x10;
    pub const LAUNCH_BOOTLOADER: u8 = 0xFF;
}

fn validate(cfg: &LinkConfig) -> Result<()> {
    if cfg.channel > 125 {
        return Err(Error::InvalidChannel(cfg.channel));
    }
    if cfg.auto_retry_count > 15 {
        return Err(Error::InvalidAutoRetryCount(cfg.auto_retry_count));
    }
    cfg.auto_retry_delay.wire_value()?;
    Ok(())
}

/// One physical dongle. Multiple `RadioLink`s (one per plugged-in dongle) may
/// exist at once; the dispatcher's coordinator guarantees no two are ever
/// tuned to the same channel concurrently (`spec.md` §4.3, §9).
pub struct RadioLink {
    handle: Mutex<rusb::DeviceHandle<GlobalContext>>,
    /// Last configuration fully applied to the hardware, used to skip
    /// redundant vendor control transfers when re-tuning to a
    /// previously-seen (channel, address) (`spec.md` §9).
    applied: Mutex<Option<LinkConfig>>,
}

impl RadioLink {
    /// Opens the first Crazyradio-class dongle found. Returns
    /// [`Error::DeviceNotFound`] if none is attached, or
    /// [`Error::MultipleDevicesFound`] if `index` isn't given and more than
    /// one is.
    pub fn open(index: Option<usize>) -> Result<Self> {
        let devices = rusb::devices()?;
        let mut matches = Vec::new();
        for device in devices.iter() {
            let desc = device.device_descriptor()?;
            if desc.vendor_id() == VENDOR_ID && desc.product_id() == PRODUCT_ID {
                matches.push(device);
            }
        }

        let device = match index {
            Some(i) => matches.into_iter().nth(i).ok_or(Error::DeviceNotFound)?,
            None => match matches.len() {
                0 => return Err(Error::DeviceNotFound),
                1 => matches.into_iter().next().unwrap(),
                _ => return Err(Error::MultipleDevicesFound),
            },
        };

        let mut handle = device.open()?;
        let _ = handle.set_auto_detach_kernel_driver(true);
        handle.claim_interface(0)?;

        Ok(RadioLink {
            handle: Mutex::new(handle),
            applied: Mutex::new(None),
        })
    }

    /// Opens every attached Crazyradio-class dongle; used by the dispatcher
    /// to build its worker pool.
    pub fn open_all() -> Result<Vec<RadioLink>> {
        let devices = rusb::devices()?;
        let mut radios = Vec::new();
        for device in devices.iter() {
            let desc = device.device_descriptor()?;
            if desc.vendor_id() == VENDOR_ID && desc.product_id() == PRODUCT_ID {
                let mut handle = device.open()?;
                let _ = handle.set_auto_detach_kernel_driver(true);
                handle.claim_interface(0)?;
                radios.push(RadioLink {
                    handle: Mutex::new(handle),
                    applied: Mutex::new(None),
                });
            }
        }
        if radios.is_empty() {
            return Err(Error::DeviceNotFound);
        }
        Ok(radios)
    }

    fn control_out(&self, request: u8, value: u16, index: u16, data: &[u8]) -> Result<()> {
        let handle = self.handle.lock().expect("radio handle mutex poisoned");
        let request_type = rusb::request_type(Direction::Out, RequestType::Vendor, Recipient::Device);
        handle.write_control(request_type, request, value, index, data, USB_TIMEOUT)?;
        Ok(())
    }

    fn apply_sync(&self, cfg: LinkConfig) -> Result<()> {
        validate(&cfg)?;

        let mut applied = self.applied.lock().expect("radio applied-state mutex poisoned");
        let previous = *applied;

        if previous.map(|p| p.channel) != Some(cfg.channel) {
            self.control_out(request::SET_CHANNEL, cfg.channel as u16, 0, &[])?;
        }
        if previous.map(|p| p.address) != Some(cfg.address) {
            let addr = cfg.address.to_le_bytes();
            // 5-byte address, MSB first on the wire (spec.md §4.2).
            let bytes = [addr[4], addr[3], addr[2], addr[1], addr[0]];
            self.control_out(request::SET_ADDRESS, 0, 0, &bytes)?;
        }
        if previous.map(|p| p.datarate) != Some(cfg.datarate) {
            self.control_out(request::SET_DATARATE, cfg.datarate.wire_value() as u16, 0, &[])?;
        }
        if previous.map(|p| p.power) != Some(cfg.power) {
            self.control_out(request::SET_POWER, cfg.power.wire_value() as u16, 0, &[])?;
        }
        if previous.map(|p| p.auto_retry_count) != Some(cfg.auto_retry_count) {
            self.control_out(request::SET_ARC, cfg.auto_retry_count as u16, 0, &[])?;
        }
        if previous.map(|p| p.auto_retry_delay) != Some(cfg.auto_retry_delay) {
            let ard = cfg.auto_retry_delay.wire_value()?;
            self.control_out(request::SET_ARD, ard as u16, 0, &[])?;
        }

        *applied = Some(cfg);
        Ok(())
    }

    fn send_sync(&self, frame: &[u8]) -> Result<()> {
        let handle = self.handle.lock().expect("radio handle mutex poisoned");
        handle.write_bulk(ENDPOINT_OUT, frame, USB_TIMEOUT)?;
        Ok(())
    }

    fn read_sync(&self) -> Result<(bool, Vec<u8>)> {
        let handle = self.handle.lock().expect("radio handle mutex poisoned");
        let mut buf = [0u8; 64];
        match handle.read_bulk(ENDPOINT_IN, &mut buf, USB_TIMEOUT) {
            Ok(n) if n >= 1 => {
                // spec.md §4.2: byte 0 packs {ack:1, power-detector:1, reserved:2, retry-count:4}.
                let ack_received = buf[0] & 0x01 != 0;
                trace!(ack_received, len = n, "radio ack received");
                Ok((ack_received, buf[1..n].to_vec()))
            }
            Ok(_) => Ok((false, Vec::new())),
            Err(rusb::Error::Timeout) => {
                debug!("radio read timed out, treating as no ack");
                Ok((false, Vec::new()))
            }
            Err(e) => {
                warn!(error = %e, "radio bulk read failed");
                Err(e.into())
            }
        }
    }

    /// Puts the dongle itself (not a remote device) into bootloader mode.
    pub async fn launch_bootloader(self: &Arc<Self>) -> Result<()> {
        let this = Arc::clone(self);
        tokio::task::spawn_blocking(move || this.control_out(request::LAUNCH_BOOTLOADER, 0, 0, &[]))
            .await
            .expect("blocking task panicked")
    }
}

// `Link` is implemented for `Arc<RadioLink>` rather than `RadioLink` itself:
// every method needs to move its receiver onto a `spawn_blocking` thread,
// which requires a `'static` owner. An `Arc` clone is the idiomatic way to
// get one from a `&self` trait method; the dispatcher holds and shares
// `Arc<RadioLink>` handles for exactly this reason (`dispatcher::mod`).
impl Link for Arc<RadioLink> {
    fn configure<'a>(&'a self, cfg: LinkConfig) -> BoxFuture<'a, Result<()>> {
        let this = Arc::clone(self);
        Box::pin(async move { tokio::task::spawn_blocking(move || this.apply_sync(cfg)).await.expect("blocking task panicked") })
    }

    fn send<'a>(&'a self, frame: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        let this = Arc::clone(self);
        let owned = frame.to_vec();
        Box::pin(async move { tokio::task::spawn_blocking(move || this.send_sync(&owned)).await.expect("blocking task panicked") })
    }

    fn read<'a>(&'a self) -> BoxFuture<'a, Result<(bool, Vec<u8>)>> {
        let this = Arc::clone(self);
        Box::pin(async move { tokio::task::spawn_blocking(move || this.read_sync()).await.expect("blocking task panicked") })
    }
}
