//! Crate-wide error type.
//!
//! Propagation policy (see `spec.md` §7): link-level I/O errors inside the
//! dispatcher are logged and cause an implicit retransmit; they never reach
//! a caller directly. Timeouts and content errors are surfaced through
//! [`Error`] from the awaiting operation that hit them.

use std::io;

/// Everything that can go wrong talking to a device over CRTP.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// No ack (or no matching response) arrived before the caller's timeout.
    #[error("no response from device before timeout")]
    NoResponse,

    /// A memory read/write request asked for more than 24 bytes in one frame.
    #[error("memory operation length too large (max 24 bytes)")]
    MemoryLengthTooLarge,

    /// A memory read completed but the device reported a non-zero status byte.
    #[error("memory read failed")]
    MemoryReadFailed,

    /// A memory write completed but the device reported a non-zero status byte.
    #[error("memory write failed")]
    MemoryWriteFailed,

    /// An EEPROM read-back's modular-sum checksum did not validate after retries.
    #[error("EEPROM checksum did not validate after retries")]
    MemoryReadChecksum,

    /// A reflash image would not fit in the region reported by the device.
    #[error("flash image is too large for the target region")]
    FlashImageTooLarge,

    /// The device reported a non-zero error code while committing a flash page.
    #[error("device reported reflash error code {0}")]
    FlashWriteFailed(u8),

    /// A verify-mode read-back did not match the source image.
    #[error("flash verification mismatch at offset {0}")]
    FlashVerifyMismatch(usize),

    /// A named parameter is not present in the parameter TOC.
    #[error("parameter {0:?} not found")]
    ParamNotFound(String),

    /// A log block references a variable name absent from the log TOC, or an
    /// operation named an unknown block id.
    #[error("log item or block not found")]
    LogItemOrBlockNotFound,

    /// No log block id in 0..=255 was free.
    #[error("no memory for a new log block")]
    LogBlockNoMemory,

    /// A log block was created with more than 30 variables.
    #[error("log block has too many variables (max 30)")]
    LogBlockTooLong,

    /// A log block's start period quantized to less than the device's 10 ms floor.
    #[error("log block period too short (minimum 10 ms)")]
    LogBlockPeriodTooShort,

    /// A log block create request returned an error code this crate does not
    /// recognize.
    #[error("device reported unknown log error code {0}")]
    LogUnknownError(u8),

    /// No device matched the requested channel/address.
    #[error("no device found")]
    DeviceNotFound,

    /// More than one USB device matched a request expecting exactly one.
    #[error("multiple devices found, address is ambiguous")]
    MultipleDevicesFound,

    /// A radio channel outside 0..=125 was requested.
    #[error("invalid radio channel {0}")]
    InvalidChannel(u8),

    /// An unrecognized datarate code was requested.
    #[error("invalid datarate")]
    InvalidDatarate,

    /// An unrecognized power level was requested.
    #[error("invalid power level")]
    InvalidPower,

    /// An auto-retry-count outside 0..=15 was requested.
    #[error("invalid auto-retry count {0}")]
    InvalidAutoRetryCount(u8),

    /// An auto-retry-delay encoding was out of range for its mode.
    #[error("invalid auto-retry delay {0}")]
    InvalidAutoRetryDelay(u8),

    /// A write was attempted with a payload too large to fit a CRTP frame.
    #[error("write payload of {0} bytes exceeds the maximum frame size")]
    WriteLengthExceeded(usize),

    /// The underlying USB stack reported an error.
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    /// An I/O error unrelated to USB (e.g. cache directory access).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
