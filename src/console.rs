//! The console subsystem: `Port::Console` frames carry raw firmware
//! `printf` output a few bytes at a time. This assembles them into lines and
//! republishes them as an ambient, always-on broadcast
//! (`spec.md`'s expanded ambient stack; grounded on `crazyflie/console.go`'s
//! `consoleCallback`, which accumulates incoming bytes into a buffer and
//! flushes a line to its subscribers on `\n`).

use crate::crtp::{Decoded, Port, ResponseTemplate};
use std::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Fan-out point for a client's decoded console lines. A client owns exactly
/// one; [`Client::console_lines`](crate::client::Client::console_lines)
/// hands out a fresh receiver per call.
pub struct ConsoleChannel {
    buffer: Mutex<String>,
    subscribers: Mutex<Vec<UnboundedSender<String>>>,
}

impl ConsoleChannel {
    pub fn new() -> Self {
        ConsoleChannel {
            buffer: Mutex::new(String::new()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().expect("console subscribers mutex poisoned").push(tx);
        rx
    }

    fn feed(&self, bytes: &[u8]) {
        let text = String::from_utf8_lossy(bytes);
        let mut buffer = self.buffer.lock().expect("console buffer mutex poisoned");
        buffer.push_str(&text);
        while let Some(pos) = buffer.find('\n') {
            let line: String = buffer.drain(..=pos).collect();
            let line = line.trim_end_matches('\n').to_string();
            let mut subs = self.subscribers.lock().expect("console subscribers mutex poisoned");
            subs.retain(|tx| tx.send(line.clone()).is_ok());
        }
    }
}

impl Default for ConsoleChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Registered on every client's listener table at `(Console, channel 0)`;
/// never resolves, so it's never removed — console frames keep arriving for
/// the lifetime of the client.
pub struct ConsoleListener {
    channel: std::sync::Arc<ConsoleChannel>,
}

impl ConsoleListener {
    pub fn new(channel: std::sync::Arc<ConsoleChannel>) -> Self {
        ConsoleListener { channel }
    }
}

impl ResponseTemplate for ConsoleListener {
    fn port(&self) -> Port {
        Port::Console
    }

    fn channel(&self) -> u8 {
        0
    }

    fn load_from_bytes(&mut self, frame: &[u8]) -> Decoded {
        if frame.len() > 1 {
            self.channel.feed(&frame[1..]);
        }
        Decoded::Mismatch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_splits_on_newlines_and_trims_them() {
        let channel = ConsoleChannel::new();
        let mut rx = channel.subscribe();
        channel.feed(b"hello ");
        channel.feed(b"world\nsecond line\nthi");
        assert_eq!(rx.try_recv().unwrap(), "hello world");
        assert_eq!(rx.try_recv().unwrap(), "second line");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropped_subscriber_is_pruned_on_next_feed() {
        let channel = ConsoleChannel::new();
        {
            let _rx = channel.subscribe();
        }
        channel.feed(b"line\n");
        assert!(channel.subscribers.lock().unwrap().is_empty());
    }
}
