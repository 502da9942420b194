//! The direct USB cable to a single device (`spec.md` §4.2, §6). No
//! channel/address switching exists on this wire; framing mode is toggled
//! once via a vendor control transfer, and a read timeout is folded into the
//! normal frame stream as the synthetic idle frame `[0xF3]`.

use super::{BoxFuture, Link, LinkConfig};
use crate::error::{Error, Result};
use rusb::{Direction, GlobalContext, Recipient, RequestType};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Direct-cable robot identity (`spec.md` §6).
pub const VENDOR_ID: u16 = 0x0483;
pub const PRODUCT_ID: u16 = 0x5740;

const ENDPOINT_OUT: u8 = 0x01;
const ENDPOINT_IN: u8 = 0x81;
const USB_TIMEOUT: Duration = Duration::from_millis(500);

const ENABLE_FRAMING_REQUEST: u8 = 0x01;
const ENABLE_FRAMING_VALUE: u16 = 0x01;

/// A single wired device, reached over its own USB cable rather than radio.
pub struct UsbLink {
    handle: Mutex<rusb::DeviceHandle<GlobalContext>>,
    framing_enabled: Mutex<bool>,
}

impl UsbLink {
    /// Opens the first direct-cable robot found.
    pub fn open() -> Result<Self> {
        let devices = rusb::devices()?;
        let mut matches = Vec::new();
        for device in devices.iter() {
            let desc = device.device_descriptor()?;
            if desc.vendor_id() == VENDOR_ID && desc.product_id() == PRODUCT_ID {
                matches.push(device);
            }
        }
        let device = match matches.len() {
            0 => return Err(Error::DeviceNotFound),
            1 => matches.into_iter().next().unwrap(),
            _ => return Err(Error::MultipleDevicesFound),
        };

        let mut handle = device.open()?;
        let _ = handle.set_auto_detach_kernel_driver(true);
        handle.claim_interface(0)?;

        Ok(UsbLink {
            handle: Mutex::new(handle),
            framing_enabled: Mutex::new(false),
        })
    }

    fn set_framing(&self, enable: bool) -> Result<()> {
        let handle = self.handle.lock().expect("usb handle mutex poisoned");
        let request_type = rusb::request_type(Direction::Out, RequestType::Vendor, Recipient::Device);
        let index: u16 = if enable { 1 } else { 0 };
        handle.write_control(request_type, ENABLE_FRAMING_REQUEST, ENABLE_FRAMING_VALUE, index, &[], USB_TIMEOUT)?;
        Ok(())
    }

    fn configure_sync(&self, _cfg: LinkConfig) -> Result<()> {
        let mut enabled = self.framing_enabled.lock().expect("usb framing-state mutex poisoned");
        if !*enabled {
            self.set_framing(true)?;
            *enabled = true;
        }
        Ok(())
    }

    fn send_sync(&self, frame: &[u8]) -> Result<()> {
        let handle = self.handle.lock().expect("usb handle mutex poisoned");
        handle.write_bulk(ENDPOINT_OUT, frame, USB_TIMEOUT)?;
        Ok(())
    }

    fn read_sync(&self) -> Result<(bool, Vec<u8>)> {
        let handle = self.handle.lock().expect("usb handle mutex poisoned");
        let mut buf = [0u8; 64];
        match handle.read_bulk(ENDPOINT_IN, &mut buf, USB_TIMEOUT) {
            Ok(n) => Ok((true, buf[..n].to_vec())),
            Err(rusb::Error::Timeout) => {
                debug!("usb read timed out, synthesizing idle frame");
                Ok((true, vec![0xF3]))
            }
            Err(e) => {
                warn!(error = %e, "usb bulk read failed");
                Err(e.into())
            }
        }
    }

    /// Disables framing mode and releases the interface. Call before
    /// dropping if the cable might be reused by another process.
    pub async fn disable_framing(self: &Arc<Self>) -> Result<()> {
        let this = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            let mut enabled = this.framing_enabled.lock().expect("usb framing-state mutex poisoned");
            this.set_framing(false)?;
            *enabled = false;
            Ok(())
        })
        .await
        .expect("blocking task panicked")
    }
}

impl Link for Arc<UsbLink> {
    fn configure<'a>(&'a self, cfg: LinkConfig) -> BoxFuture<'a, Result<()>> {
        let this = Arc::clone(self);
        Box::pin(async move { tokio::task::spawn_blocking(move || this.configure_sync(cfg)).await.expect("blocking task panicked") })
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
