//! A transport stack and per-device client runtime for a fleet of
//! CRTP-speaking radio devices: packet codec, link drivers for the radio
//! dongle and the direct USB cable, a dispatcher that multiplexes many
//! devices over a small pool of radios, and the parameter/telemetry/memory
//! subsystems built on top of it.

pub mod cache;
pub mod client;
pub mod console;
pub mod crtp;
pub mod dispatcher;
pub mod error;
pub mod fleet;
pub mod link;
pub mod listener;
pub mod log;
pub mod mem;
pub mod param;
pub mod reboot;
pub mod reflash;

pub use client::{Client, Status};
pub use dispatcher::{ClientAddress, Dispatcher};
pub use error::{Error, Result};
pub use fleet::Fleet;
