//! The two interchangeable link-layer variants (`spec.md` §4.2): a
//! multi-channel radio dongle and a single-device USB cable. Both implement
//! [`Link`], exposing `configure`/`send`/`read` with identical signatures so
//! the dispatcher can drive either without caring which is underneath.

pub mod radio;
pub mod usb;

use crate::error::Result;
use std::future::Future;
use std::pin::Pin;

/// A boxed, `Send` future — used instead of `async-trait` so [`Link`] stays
/// object-safe without pulling in a proc-macro dependency the teacher crate
/// never needed.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Radio air data rate (`spec.md` §4.2, §6).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DataRate {
    Kbps250,
    Mbps1,
    Mbps2,
}

impl DataRate {
    pub const fn wire_value(self) -> u8 {
        match self {
            DataRate::Kbps250 => 0,
            DataRate::Mbps1 => 1,
            DataRate::Mbps2 => 2,
        }
    }
}

/// Radio transmit power level (`spec.md` §4.2).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Power {
    DbmMinus18,
    DbmMinus12,
    DbmMinus6,
    Dbm0,
}

impl Power {
    pub const fn wire_value(self) -> u8 {
        match self {
            Power::DbmMinus18 => 0,
            Power::DbmMinus12 => 1,
            Power::DbmMinus6 => 2,
            Power::Dbm0 => 3,
        }
    }
}

/// The auto-retry-delay field, which is time-based or byte-count-based
/// depending on its high bit (`spec.md` §4.2).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AutoRetryDelay {
    /// Units of 250 µs, `0..=15`.
    Time(u8),
    /// Number of payload bytes, `0..=32`.
    Bytes(u8),
}

impl AutoRetryDelay {
    pub fn wire_value(self) -> Result<u8> {
        match self {
            AutoRetryDelay::Time(t) if t <= 15 => Ok(t),
            AutoRetryDelay::Bytes(b) if b <= 32 => Ok(0x80 | b),
            AutoRetryDelay::Time(t) => Err(crate::error::Error::InvalidAutoRetryDelay(t)),
            AutoRetryDelay::Bytes(b) => Err(crate::error::Error::InvalidAutoRetryDelay(b)),
        }
    }
}

/// The full set of per-(channel, address) tuning parameters a radio must
/// apply before it can serve a given client; the USB cable link ignores the
/// radio-only fields.
#[derive(Clone, Copy, Debug)]
pub struct LinkConfig {
    pub channel: u8,
    pub address: u64,
    pub datarate: DataRate,
    pub power: Power,
    pub auto_retry_count: u8,
    pub auto_retry_delay: AutoRetryDelay,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            channel: 0,
            address: 0xE7E7E7E7E7,
            datarate: DataRate::Mbps2,
            power: Power::Dbm0,
            auto_retry_count: 3,
            auto_retry_delay: AutoRetryDelay::Time(0),
        }
    }
}

/// A half-duplex, single-frame-in-flight-at-a-time link to one or more
/// devices. Implementations must serialize their own `send`/`read` pairs;
/// the dispatcher never issues a second `send` before the prior `read`
/// returns.
pub trait Link: Send + Sync {
    /// Applies the given tuning. For the radio this retunes channel, address,
    /// datarate, power, and retry behavior (implementations should skip the
    /// underlying USB control transfers for fields that already match the
    /// last-applied configuration — see `spec.md` §9's note on reducing
    /// redundant tuning). For the USB cable this is close to a no-op: there
    /// is exactly one device and no channel/address to switch.
    fn configure<'a>(&'a self, cfg: LinkConfig) -> BoxFuture<'a, Result<()>>;

    /// Transmits one raw frame (header byte included).
    fn send<'a>(&'a self, frame: &'a [u8]) -> BoxFuture<'a, Result<()>>;

    /// Waits for the device's reply to the most recent `send`. Returns
    /// `(ack_received, payload)`; `payload` excludes any link-layer framing
    /// byte that isn't part of the CRTP header. A USB read timeout is not an
    /// error: it yields `(true, vec![0xF3])`, the synthetic idle frame.
    fn read<'a>(&'a self) -> BoxFuture<'a, Result<(bool, Vec<u8>)>>;
}
