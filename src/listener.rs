//! The per-client listener table that fans a decoded frame out to whichever
//! response templates are waiting for it (`spec.md` §4.1, §4.3).
//!
//! Listeners are consulted in registration order (oldest first) and a
//! listener that reports [`Decoded::Mismatch`] stays registered; `Decoded::Ok`
//! or `Decoded::ContentError` both deregister it. Every dispatch is also
//! offered to any listener registered on [`Port::Any`], regardless of whether
//! a port-specific listener already claimed the frame (`spec.md` §4.1's
//! description of the wildcard port, mirroring `crazyflie/communication.go`'s
//! `responseHandler` fan-out to `PortGreedy`).

use crate::crtp::{Decoded, Port, ResponseTemplate};
use std::collections::HashMap;
use std::sync::Mutex;

/// Opaque handle returned by [`ListenerTable::register`], used to deregister
/// a listener that gave up waiting (e.g. timed out).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ListenerId(u64);

struct Entry {
    id: ListenerId,
    port: Port,
    template: Box<dyn ResponseTemplate>,
}

struct Inner {
    next_id: u64,
    by_port: HashMap<Port, Vec<Entry>>,
}

pub struct ListenerTable {
    inner: Mutex<Inner>,
}

impl ListenerTable {
    pub fn new() -> Self {
        ListenerTable {
            inner: Mutex::new(Inner {
                next_id: 0,
                by_port: HashMap::new(),
            }),
        }
    }

    /// Registers a response template against its declared port. Returns a
    /// handle the caller must pass to [`ListenerTable::deregister`] if it
    /// gives up before the template reports `Ok`/`ContentError` itself.
    pub fn register(&self, template: Box<dyn ResponseTemplate>) -> ListenerId {
        let mut inner = self.inner.lock().expect("listener table mutex poisoned");
        let id = ListenerId(inner.next_id);
        inner.next_id += 1;
        let port = template.port();
        inner.by_port.entry(port).or_insert_with(Vec::new).push(Entry { id, port, template });
        id
    }

    pub fn deregister(&self, id: ListenerId) {
        let mut inner = self.inner.lock().expect("listener table mutex poisoned");
        for entries in inner.by_port.values_mut() {
            entries.retain(|e| e.id != id);
        }
    }

    /// Offers a raw received frame to every matching listener. Idle frames
    /// (`spec.md` §4.1: wire ports `0xF3`/`0xF7`) are dropped before they ever
    /// reach this table — callers should check [`Port::is_idle_frame`] first.
    ///
    /// Returns the results (listener id, verdict) for every listener that was
    /// consulted, in the order they fired, so the dispatcher can wake any
    /// caller blocked on a matching id.
    pub fn dispatch(&self, frame: &[u8]) -> Vec<(ListenerId, Decoded)> {
        let header = match frame.first() {
            Some(b) => *b,
            None => return Vec::new(),
        };
        let port = match Port::from_header_nibble(header) {
            Some(p) => p,
            None => return Vec::new(),
        };
        let channel = header & 0x03;

        let mut inner = self.inner.lock().expect("listener table mutex poisoned");
        let mut results = Vec::new();

        for key in [port, Port::Any] {
            let entries = match inner.by_port.get_mut(&key) {
                Some(e) => e,
                None => continue,
            };
            let mut finished = Vec::new();
            for entry in entries.iter_mut() {
                if key == port && entry.template.channel() != channel {
                    continue;
                }
                match entry.template.load_from_bytes(frame) {
                    Decoded::Mismatch => {}
                    verdict @ (Decoded::Ok | Decoded::ContentError(_)) => {
                        finished.push(entry.id);
                        results.push((entry.id, verdict));
                    }
                }
            }
            entries.retain(|e| !finished.contains(&e.id));
        }

        results
    }
}

impl Default for ListenerTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    struct Fixed {
        port: Port,
        channel: u8,
        verdict_on_next: Decoded,
    }

    impl ResponseTemplate for Fixed {
        fn port(&self) -> Port {
            self.port
        }
        fn channel(&self) -> u8 {
            self.channel
        }
        fn load_from_bytes(&mut self, _frame: &[u8]) -> Decoded {
            std::mem::replace(&mut self.verdict_on_next, Decoded::Mismatch)
        }
    }

    #[test]
    fn mismatch_listeners_stay_registered() {
        let table = ListenerTable::new();
        let id = table.register(Box::new(Fixed {
            port: Port::Param,
            channel: 1,
            verdict_on_next: Decoded::Mismatch,
        }));
        let header = crate::crtp::header_byte(Port::Param, 1);
        let results = table.dispatch(&[header, 0x00]);
        assert!(results.is_empty());
        // still registered: a second dispatch still consults it.
        table.deregister(id);
    }

    #[test]
    fn ok_listener_is_removed_after_firing() {
        let table = ListenerTable::new();
        table.register(Box::new(Fixed {
            port: Port::Param,
            channel: 1,
            verdict_on_next: Decoded::Ok,
        }));
        let header = crate::crtp::header_byte(Port::Param, 1);
        let first = table.dispatch(&[header, 0x00]);
        assert_eq!(first.len(), 1);
        assert!(matches!(first[0].1, Decoded::Ok));

        let second = table.dispatch(&[header, 0x00]);
        assert!(second.is_empty());
    }

    #[test]
    fn any_listener_fires_alongside_port_specific_one() {
        let table = ListenerTable::new();
        table.register(Box::new(Fixed {
            port: Port::Param,
            channel: 1,
            verdict_on_next: Decoded::Ok,
        }));
        table.register(Box::new(Fixed {
            port: Port::Any,
            channel: 1,
            verdict_on_next: Decoded::Ok,
        }));
        let header = crate::crtp::header_byte(Port::Param, 1);
        let results = table.dispatch(&[header, 0x00]);
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn content_error_verdict_is_propagated_and_deregisters() {
        let table = ListenerTable::new();
        table.register(Box::new(Fixed {
            port: Port::Mem,
            channel: 0,
            verdict_on_next: Decoded::ContentError(Error::MemoryReadFailed),
        }));
        let header = crate::crtp::header_byte(Port::Mem, 0);
        let results = table.dispatch(&[header]);
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0].1, Decoded::ContentError(Error::MemoryReadFailed)));
    }
}
