//! Exercises the dispatcher's per-cycle send/ack/dispatch logic against a
//! mock link, without any real USB hardware.

use crtp_core::crtp::{header_byte, Decoded, Port, Request, ResponseTemplate};
use crtp_core::dispatcher::queue::SendQueues;
use crtp_core::dispatcher::service_cycle;
use crtp_core::link::{BoxFuture, Link, LinkConfig};
use crtp_core::listener::ListenerTable;
use std::sync::{Arc, Mutex};

/// A link that replies with a fixed, queued sequence of `(ack, response)`
/// pairs and records every frame it was asked to send.
struct MockLink {
    replies: Mutex<Vec<(bool, Vec<u8>)>>,
    sent: Mutex<Vec<Vec<u8>>>,
}

impl MockLink {
    fn new(replies: Vec<(bool, Vec<u8>)>) -> Arc<MockLink> {
        Arc::new(MockLink { replies: Mutex::new(replies), sent: Mutex::new(Vec::new()) })
    }
}

impl Link for MockLink {
    fn configure<'a>(&'a self, _cfg: LinkConfig) -> BoxFuture<'a, crtp_core::Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn send<'a>(&'a self, frame: &'a [u8]) -> BoxFuture<'a, crtp_core::Result<()>> {
        self.sent.lock().unwrap().push(frame.to_vec());
        Box::pin(async { Ok(()) })
    }

    fn read<'a>(&'a self) -> BoxFuture<'a, crtp_core::Result<(bool, Vec<u8>)>> {
        let reply = self.replies.lock().unwrap().pop().unwrap_or((true, vec![0xF3]));
        Box::pin(async move { Ok(reply) })
    }
}

struct PingRequest;
impl Request for PingRequest {
    fn port(&self) -> Port {
        Port::Param
    }
    fn channel(&self) -> u8 {
        1
    }
    fn body(&self) -> Vec<u8> {
        vec![0x00]
    }
}

struct EchoResponse {
    seen: Option<u8>,
}
impl ResponseTemplate for EchoResponse {
    fn port(&self) -> Port {
        Port::Param
    }
    fn channel(&self) -> u8 {
        1
    }
    fn load_from_bytes(&mut self, frame: &[u8]) -> Decoded {
        if frame.len() < 2 {
            return Decoded::Mismatch;
        }
        self.seen = Some(frame[1]);
        Decoded::Ok
    }
}

#[tokio::test]
async fn an_acked_frame_is_dequeued_and_its_response_reaches_the_listener() {
    let header = header_byte(Port::Param, 1);
    // Replies are popped from the back, so push in reverse call order.
    let link = MockLink::new(vec![(true, vec![header, 0x2A])]);
    let queues = SendQueues::new();
    let listeners = ListenerTable::new();

    queues.push_standard(PingRequest.encode());
    listeners.register(Box::new(EchoResponse { seen: None }));

    service_cycle(&*link, LinkConfig::default(), &queues, &listeners).await;

    assert!(queues.is_empty(), "acked frame should have been dequeued");
    assert_eq!(link.sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn an_unacked_frame_stays_queued_for_retry() {
    let link = MockLink::new(vec![(false, vec![])]);
    let queues = SendQueues::new();
    let listeners = ListenerTable::new();

    queues.push_standard(PingRequest.encode());
    service_cycle(&*link, LinkConfig::default(), &queues, &listeners).await;

    assert!(!queues.is_empty(), "unacked frame must remain at the head of the queue");
}

#[tokio::test]
async fn priority_queue_is_serviced_before_the_standard_queue() {
    let link = MockLink::new(vec![(true, vec![0xF3])]);
    let queues = SendQueues::new();
    let listeners = ListenerTable::new();

    queues.push_standard(vec![1, 2, 3]);
    queues.push_priority(vec![9, 9]);

    service_cycle(&*link, LinkConfig::default(), &queues, &listeners).await;

    let sent = link.sent.lock().unwrap();
    assert_eq!(sent[0], vec![9, 9]);
}

#[tokio::test]
async fn an_empty_queue_sends_a_bare_keepalive() {
    let link = MockLink::new(vec![(true, vec![0xF3])]);
    let queues = SendQueues::new();
    let listeners = ListenerTable::new();

    service_cycle(&*link, LinkConfig::default(), &queues, &listeners).await;

    assert_eq!(link.sent.lock().unwrap()[0], crtp_core::crtp::KEEPALIVE_FRAME.to_vec());
}
