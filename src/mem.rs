//! The memory subsystem (`spec.md` §4.6): typed region read/write, and the
//! 16-byte EEPROM configuration image with its modular-sum checksum.
//!
//! Grounded in `crazyflie/eeprom_functions.go` and `eeprom_packets.go`: port
//! 4 frames address one of a small set of memory targets by a leading target
//! byte; reads/writes are capped at 24 payload bytes per frame and the
//! caller is expected to chunk larger transfers itself (reflash does this
//! for flash pages; EEPROM images fit in one frame).

use crate::crtp::{Decoded, Port, Request, ResponseTemplate};
use crate::error::{Error, Result};
use std::time::Duration;

/// Memory target identifiers (`spec.md` §4.6).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MemoryTarget {
    Eeprom,
    Led,
    Cpu,
}

impl MemoryTarget {
    pub const fn wire_value(self) -> u8 {
        match self {
            MemoryTarget::Eeprom => 0x00,
            MemoryTarget::Led => 0x01,
            MemoryTarget::Cpu => 0xFE,
        }
    }
}

/// Maximum payload bytes in a single memory read or write frame.
pub const MAX_CHUNK_LEN: usize = 24;

const CHANNEL_READ: u8 = 0;
const CHANNEL_WRITE: u8 = 1;

struct ReadRequest {
    target: MemoryTarget,
    offset: u32,
    length: u8,
}
impl Request for ReadRequest {
    fn port(&self) -> Port {
        Port::Mem
    }
    fn channel(&self) -> u8 {
        CHANNEL_READ
    }
    fn body(&self) -> Vec<u8> {
        let mut body = vec![self.target.wire_value()];
        body.extend(self.offset.to_le_bytes());
        body.push(self.length);
        body
    }
}

struct ReadResponse {
    requested_offset: u32,
    result: Option<Vec<u8>>,
}
impl ResponseTemplate for ReadResponse {
    fn port(&self) -> Port {
        Port::Mem
    }
    fn channel(&self) -> u8 {
        CHANNEL_READ
    }
    fn load_from_bytes(&mut self, frame: &[u8]) -> Decoded {
        if frame.len() < 7 {
            return Decoded::Mismatch;
        }
        let offset = u32::from_le_bytes([frame[2], frame[3], frame[4], frame[5]]);
        if offset != self.requested_offset {
            return Decoded::Mismatch;
        }
        let status = frame[6];
        if status != 0 {
            return Decoded::ContentError(Error::MemoryReadFailed);
        }
        self.result = Some(frame[7..].to_vec());
        Decoded::Ok
    }
}

struct WriteRequest {
    target: MemoryTarget,
    offset: u32,
    data: Vec<u8>,
}
impl Request for WriteRequest {
    fn port(&self) -> Port {
        Port::Mem
    }
    fn channel(&self) -> u8 {
        CHANNEL_WRITE
    }
    fn body(&self) -> Vec<u8> {
        let mut body = vec![self.target.wire_value()];
        body.extend(self.offset.to_le_bytes());
        body.extend(&self.data);
        body
    }
}

struct WriteResponse {
    requested_offset: u32,
    result: Option<()>,
}
impl ResponseTemplate for WriteResponse {
    fn port(&self) -> Port {
        Port::Mem
    }
    fn channel(&self) -> u8 {
        CHANNEL_WRITE
    }
    fn load_from_bytes(&mut self, frame: &[u8]) -> Decoded {
        if frame.len() < 7 {
            return Decoded::Mismatch;
        }
        let offset = u32::from_le_bytes([frame[2], frame[3], frame[4], frame[5]]);
        if offset != self.requested_offset {
            return Decoded::Mismatch;
        }
        let status = frame[6];
        if status != 0 {
            return Decoded::ContentError(Error::MemoryWriteFailed);
        }
        self.result = Some(());
        Decoded::Ok
    }
}

const IO_TIMEOUT: Duration = Duration::from_millis(1000);

/// Reads `length` bytes (at most [`MAX_CHUNK_LEN`]) from `target` at
/// `offset` in a single frame.
pub async fn read_chunk(client: &crate::client::Client, target: MemoryTarget, offset: u32, length: u8) -> Result<Vec<u8>> {
    if length as usize > MAX_CHUNK_LEN {
        return Err(Error::MemoryLengthTooLarge);
    }
    let resp = ReadResponse { requested_offset: offset, result: None };
    let resp = client
        .send_and_await_response(&ReadRequest { target, offset, length }, resp, IO_TIMEOUT)
        .await?;
    Ok(resp.result.expect("Ok verdict guarantees result is set"))
}

/// Writes `data` (at most [`MAX_CHUNK_LEN`] bytes) to `target` at `offset`.
pub async fn write_chunk(client: &crate::client::Client, target: MemoryTarget, offset: u32, data: &[u8]) -> Result<()> {
    if data.len() > MAX_CHUNK_LEN {
        return Err(Error::MemoryLengthTooLarge);
    }
    let resp = WriteResponse { requested_offset: offset, result: None };
    client
        .send_and_await_response(&WriteRequest { target, offset, data: data.to_vec() }, resp, IO_TIMEOUT)
        .await?;
    Ok(())
}

/// The EEPROM configuration image: 16 bytes, the last of which is a
/// modular-sum checksum over the rest (`eeprom_functions.go`'s
/// `memChecksum256`). Bytes 0..13 are the device's configurable fields
/// (radio channel, address, etc.); byte 14 is a format version; byte 15 is
/// the checksum.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EepromImage(pub [u8; 16]);

/// `48 + 120 + 66 + 67` folded into a single constant, as in the original
/// (`memMagicChecksum`); the four terms were the ASCII codes of a fixed
/// tag string and are not reconstructed here since only their sum matters.
const CHECKSUM_MAGIC: u32 = 48 + 120 + 66 + 67;

impl EepromImage {
    pub fn version(&self) -> u8 {
        self.0[14]
    }

    fn compute_checksum(&self) -> u8 {
        let sum: u32 = self.0[..14].iter().map(|&b| b as u32).sum::<u32>() + CHECKSUM_MAGIC + self.0[14] as u32;
        (sum % 256) as u8
    }

    pub fn checksum(&self) -> u8 {
        self.0[15]
    }

    pub fn is_checksum_valid(&self) -> bool {
        self.compute_checksum() == self.checksum()
    }

    /// Builds a valid image from the first 15 bytes, computing and appending
    /// the checksum byte itself.
    pub fn new(mut bytes: [u8; 16]) -> EepromImage {
        let partial = EepromImage(bytes);
        bytes[15] = partial.compute_checksum();
        EepromImage(bytes)
    }
}

const EEPROM_READ_RETRIES: usize = 5;

/// Reads the EEPROM image, retrying the whole read up to
/// [`EEPROM_READ_RETRIES`] times if the checksum doesn't validate
/// (`MemReadContents`'s retry loop).
pub async fn read_eeprom(client: &crate::client::Client) -> Result<EepromImage> {
    for _ in 0..EEPROM_READ_RETRIES {
        let bytes = read_chunk(client, MemoryTarget::Eeprom, 0, 16).await?;
        if bytes.len() != 16 {
            continue;
        }
        let mut array = [0u8; 16];
        array.copy_from_slice(&bytes);
        let image = EepromImage(array);
        if image.is_checksum_valid() {
            return Ok(image);
        }
    }
    Err(Error::MemoryReadChecksum)
}

/// Writes the image, then reads it back and byte-compares
/// (`MemPushCommits`'s write-then-verify behavior).
pub async fn write_eeprom(client: &crate::client::Client, image: &EepromImage) -> Result<()> {
    write_chunk(client, MemoryTarget::Eeprom, 0, &image.0).await?;
    let readback = read_eeprom(client).await?;
    if readback != *image {
        return Err(Error::MemoryWriteFailed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_image_has_a_valid_checksum() {
        let mut bytes = [0u8; 16];
        bytes[0] = 10;
        bytes[14] = 1;
        let image = EepromImage::new(bytes);
        assert!(image.is_checksum_valid());
    }

    #[test]
    fn tampering_with_a_data_byte_invalidates_the_checksum() {
        let mut bytes = [0u8; 16];
        bytes[14] = 1;
        let mut image = EepromImage::new(bytes);
        image.0[0] ^= 0xFF;
        assert!(!image.is_checksum_valid());
    }
}
