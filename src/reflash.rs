//! The reflash pipeline (`spec.md` §4.6): stage a firmware image into the
//! device's buffer pages, commit a flash page from the buffer, poll for
//! completion, and read back to verify.
//!
//! Grounded in `crazyflie/flash_functions.go`: `flashGetInfo` reports page
//! size/count and buffer page count; `flashLoadBufferPage` splits a page
//! into [`mem::MAX_CHUNK_LEN`]-sized memory writes; `writeFlashPacket`
//! commits a buffer page to a flash page number and then polls status until
//! it's no longer "in progress", retrying the whole write if the poll stalls
//! past a deadline; `flashVerifyAddress` reads back and compares.

use crate::client::Client;
use crate::error::{Error, Result};
use crate::mem::{self, MemoryTarget};
use std::time::{Duration, Instant};

/// Geometry reported by `flashGetInfo`: how large a flash page is, how many
/// exist, and how many buffer pages the bootloader can stage at once.
#[derive(Clone, Copy, Debug)]
pub struct FlashInfo {
    pub page_size: u16,
    pub page_count: u16,
    pub buffer_pages: u16,
    pub start_page: u16,
}

const FLASH_INFO_OFFSET: u32 = 0x10;

/// Reads flash geometry for `target` (CPU or LED firmware).
pub async fn get_flash_info(client: &Client, target: MemoryTarget) -> Result<FlashInfo> {
    let bytes = mem::read_chunk(client, target, FLASH_INFO_OFFSET, 8).await?;
    if bytes.len() < 8 {
        return Err(Error::MemoryReadFailed);
    }
    Ok(FlashInfo {
        page_size: u16::from_le_bytes([bytes[0], bytes[1]]),
        buffer_pages: u16::from_le_bytes([bytes[2], bytes[3]]),
        page_count: u16::from_le_bytes([bytes[4], bytes[5]]),
        start_page: u16::from_le_bytes([bytes[6], bytes[7]]),
    })
}

/// Stages `page_data` into buffer page `buffer_page`, chunked into
/// [`mem::MAX_CHUNK_LEN`]-sized writes (`flashLoadBufferPage`).
async fn load_buffer_page(client: &Client, target: MemoryTarget, buffer_page: u16, page_data: &[u8]) -> Result<()> {
    let base = u32::from(buffer_page) * page_data.len() as u32;
    for (i, chunk) in page_data.chunks(mem::MAX_CHUNK_LEN).enumerate() {
        let offset = base + (i * mem::MAX_CHUNK_LEN) as u32;
        mem::write_chunk(client, target, offset, chunk).await?;
    }
    Ok(())
}

const FLASH_WRITE_REQUEST_LEN: usize = 6;
const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(100);
const STATUS_POLL_DEADLINE: Duration = Duration::from_secs(2);
const STATUS_IN_PROGRESS: u8 = 0xFF;

/// Commits buffer page `buffer_page` to flash page `flash_page`, polling
/// until the status byte stops reporting "in progress" or the deadline
/// elapses. A stalled completion (deadline reached) is surfaced as
/// [`Error::FlashWriteFailed`] with the flash page number, so the caller can
/// retry the whole page (`spec.md` §4.6's open question: retry-until-deadline
/// rather than a fixed retry count, since the original polls indefinitely).
async fn commit_buffer_page(client: &Client, target: MemoryTarget, buffer_page: u16, flash_page: u16) -> Result<()> {
    let bp = buffer_page.to_le_bytes();
    let fp = flash_page.to_le_bytes();
    let request = [target.wire_value(), bp[0], bp[1], fp[0], fp[1], 0x00];
    debug_assert_eq!(request.len(), FLASH_WRITE_REQUEST_LEN);

    mem::write_chunk(client, target, 0xFFFF_FFFE, &request).await.ok();

    let deadline = Instant::now() + STATUS_POLL_DEADLINE;
    loop {
        let status = mem::read_chunk(client, target, 0xFFFF_FFFF, 1).await?;
        match status.first() {
            Some(&STATUS_IN_PROGRESS) => {
                if Instant::now() >= deadline {
                    return Err(Error::FlashWriteFailed(flash_page as u8));
                }
                tokio::time::sleep(STATUS_POLL_INTERVAL).await;
            }
            Some(&0) => return Ok(()),
            Some(&_) | None => return Err(Error::FlashWriteFailed(flash_page as u8)),
        }
    }
}

/// Reads back `page_size` bytes starting at `flash_page * page_size` and
/// compares against `expected` (`flashVerifyAddress`).
async fn verify_page(client: &Client, target: MemoryTarget, flash_page: u16, page_size: u16, expected: &[u8]) -> Result<()> {
    let base = u32::from(flash_page) * u32::from(page_size);
    let mut actual = Vec::with_capacity(expected.len());
    for offset in (0..expected.len()).step_by(mem::MAX_CHUNK_LEN) {
        let len = (expected.len() - offset).min(mem::MAX_CHUNK_LEN) as u8;
        let chunk = mem::read_chunk(client, target, base + offset as u32, len).await?;
        actual.extend(chunk);
    }
    if actual != expected {
        return Err(Error::FlashVerifyMismatch(flash_page as usize));
    }
    Ok(())
}

/// Writes the full firmware image, page by page: stage into a buffer page,
/// commit it to the next flash page, verify the commit by reading it back.
/// `spec.md` §4.6: a page whose commit or verification fails is retried from
/// the staging step, not just the commit.
pub async fn write_firmware(client: &Client, target: MemoryTarget, image: &[u8]) -> Result<()> {
    let info = get_flash_info(client, target).await?;
    let page_size = info.page_size as usize;
    let max_bytes = page_size * info.page_count as usize;
    if image.len() > max_bytes {
        return Err(Error::FlashImageTooLarge);
    }

    const PAGE_RETRIES: usize = 3;

    for (page_index, page_data) in image.chunks(page_size).enumerate() {
        let flash_page = info.start_page + page_index as u16;
        let mut last_err = Error::FlashWriteFailed(flash_page as u8);
        let mut committed = false;

        for _ in 0..PAGE_RETRIES {
            let buffer_page = (page_index % info.buffer_pages as usize) as u16;
            if let Err(e) = load_buffer_page(client, target, buffer_page, page_data).await {
                last_err = e;
                continue;
            }
            if let Err(e) = commit_buffer_page(client, target, buffer_page, flash_page).await {
                last_err = e;
                continue;
            }
            if let Err(e) = verify_page(client, target, flash_page, info.page_size, page_data).await {
                last_err = e;
                continue;
            }
            committed = true;
            break;
        }

        if !committed {
            return Err(last_err);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flash_info_decodes_little_endian_fields() {
        let bytes = [0x00u8, 0x04, 0x02, 0x00, 0xF0, 0x00, 0x01, 0x00];
        let info = FlashInfo {
            page_size: u16::from_le_bytes([bytes[0], bytes[1]]),
            buffer_pages: u16::from_le_bytes([bytes[2], bytes[3]]),
            page_count: u16::from_le_bytes([bytes[4], bytes[5]]),
            start_page: u16::from_le_bytes([bytes[6], bytes[7]]),
        };
        assert_eq!(info.page_size, 1024);
        assert_eq!(info.buffer_pages, 2);
        assert_eq!(info.page_count, 240);
        assert_eq!(info.start_page, 1);
    }
}
