//! Reboot-to-bootloader / reboot-to-firmware handshake (`spec.md` §4.6).
//!
//! Grounded in `crazyflie/reboot.go`: both commands share one shape — an
//! init packet followed immediately by a command packet, queued back to back
//! so the device sees them without anything else interleaved — and both
//! await a reply on the wildcard port, since the device's bootloader
//! handshake doesn't yet know which "real" port to reply on. The reply's
//! bootloader address is decoded with a hardcoded high byte (`0xB1`), a
//! protocol constant rather than something read off the wire.

use crate::crtp::{header_byte, Decoded, Port, Request, ResponseTemplate};
use crate::error::Error;
use crate::error::Result;
use std::time::Duration;

/// Hardcoded high byte of the decoded bootloader address (`spec.md` §4.6).
const BOOTLOADER_ADDRESS_HIGH_BYTE: u8 = 0xB1;

const REBOOT_CHANNEL: u8 = 3;
const CMD_INIT: u8 = 0xFF;
const CMD_REBOOT: u8 = 0xF0;
const MODE_BOOTLOADER: u8 = 0x01;
const MODE_FIRMWARE: u8 = 0x00;

struct InitRequest;
impl Request for InitRequest {
    fn port(&self) -> Port {
        Port::Link
    }
    fn channel(&self) -> u8 {
        REBOOT_CHANNEL
    }
    fn body(&self) -> Vec<u8> {
        vec![CMD_INIT]
    }
}

struct RebootCommandRequest {
    mode: u8,
}
impl Request for RebootCommandRequest {
    fn port(&self) -> Port {
        Port::Link
    }
    fn channel(&self) -> u8 {
        REBOOT_CHANNEL
    }
    fn body(&self) -> Vec<u8> {
        vec![CMD_REBOOT, self.mode]
    }
}

#[derive(Default)]
struct RebootResponse {
    result: Option<u64>,
}
impl ResponseTemplate for RebootResponse {
    fn port(&self) -> Port {
        Port::Any
    }
    fn channel(&self) -> u8 {
        REBOOT_CHANNEL
    }
    fn load_from_bytes(&mut self, frame: &[u8]) -> Decoded {
        if frame.first() != Some(&0xFF) || frame.len() < 9 {
            return Decoded::Mismatch;
        }
        let address = u64::from(frame[4])
            | (u64::from(frame[5]) << 8)
            | (u64::from(frame[6]) << 16)
            | (u64::from(frame[7]) << 24)
            | (u64::from(BOOTLOADER_ADDRESS_HIGH_BYTE) << 32);
        self.result = Some(address);
        Decoded::Ok
    }
}

const REBOOT_TIMEOUT: Duration = Duration::from_secs(2);

/// Sends the init+command pair to put the device into bootloader mode and
/// returns its reported bootloader radio address. The two sends are issued
/// back to back on the priority queue so nothing else can be interleaved
/// between them.
pub async fn reboot_to_bootloader(client: &crate::client::Client) -> Result<u64> {
    client.enqueue_priority(&InitRequest);
    let resp = client
        .send_and_await_priority_response(&RebootCommandRequest { mode: MODE_BOOTLOADER }, RebootResponse::default(), REBOOT_TIMEOUT)
        .await?;
    resp.result.ok_or(Error::NoResponse)
}

/// Sends the init+command pair to return the device to normal firmware
/// operation from the bootloader.
pub async fn reboot_to_firmware(client: &crate::client::Client) -> Result<()> {
    client.enqueue_priority(&InitRequest);
    client
        .send_and_await_priority_response(&RebootCommandRequest { mode: MODE_FIRMWARE }, RebootResponse::default(), REBOOT_TIMEOUT)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_decodes_address_with_hardcoded_high_byte() {
        let mut resp = RebootResponse::default();
        let frame = [0xFFu8, 0x00, 0x00, 0x00, 0x11, 0x22, 0x33, 0x44, 0x00];
        assert!(matches!(resp.load_from_bytes(&frame), Decoded::Ok));
        let address = resp.result.unwrap();
        assert_eq!(address >> 32, BOOTLOADER_ADDRESS_HIGH_BYTE as u64);
        assert_eq!(address & 0xFFFF_FFFF, 0x4433_2211);
    }

    #[test]
    fn init_request_has_the_wake_marker_header() {
        assert_eq!(header_byte(InitRequest.port(), InitRequest.channel()), header_byte(Port::Link, REBOOT_CHANNEL));
    }
}
