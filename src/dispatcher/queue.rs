//! The per-client pair of FIFO send queues and the one-shot "drained" signal
//! (`spec.md` §3, §4.3).
//!
//! A frame is removed from its queue only after the link reports an ack
//! (invariant 3); until then it sits at the front and is retransmitted every
//! cycle. The priority queue is always drained ahead of the standard queue
//! when both are non-empty (invariant 2).

use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::Notify;

/// Which queue a frame was drawn from, so the dispatcher can dequeue the
/// right one once an ack confirms it was actually transmitted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum QueueKind {
    Standard,
    Priority,
}

struct Inner {
    standard: VecDeque<Vec<u8>>,
    priority: VecDeque<Vec<u8>>,
}

/// The standard/priority FIFO pair for one (channel, address) client.
pub struct SendQueues {
    inner: Mutex<Inner>,
    drained: Notify,
}

impl SendQueues {
    pub fn new() -> Self {
        SendQueues {
            inner: Mutex::new(Inner {
                standard: VecDeque::new(),
                priority: VecDeque::new(),
            }),
            drained: Notify::new(),
        }
    }

    pub fn push_standard(&self, frame: Vec<u8>) {
        self.inner.lock().expect("send-queue mutex poisoned").standard.push_back(frame);
    }

    pub fn push_priority(&self, frame: Vec<u8>) {
        self.inner.lock().expect("send-queue mutex poisoned").priority.push_back(frame);
    }

    /// Returns a clone of the frame that would be transmitted next along
    /// with which queue it came from, without removing it. Priority always
    /// wins over standard when both are non-empty (invariant 2).
    pub fn peek_next(&self) -> Option<(QueueKind, Vec<u8>)> {
        let inner = self.inner.lock().expect("send-queue mutex poisoned");
        if let Some(frame) = inner.priority.front() {
            Some((QueueKind::Priority, frame.clone()))
        } else {
            inner.standard.front().map(|frame| (QueueKind::Standard, frame.clone()))
        }
    }

    /// Removes the frame at the head of `kind`'s queue after its ack has
    /// been confirmed, and best-effort-notifies anyone waiting in
    /// [`SendQueues::wait_drained`].
    pub fn confirm_sent(&self, kind: QueueKind) {
        {
            let mut inner = self.inner.lock().expect("send-queue mutex poisoned");
            match kind {
                QueueKind::Standard => {
                    inner.standard.pop_front();
                }
                QueueKind::Priority => {
                    inner.priority.pop_front();
                }
            }
        }
        self.drained.notify_one();
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.inner.lock().expect("send-queue mutex poisoned");
        inner.standard.is_empty() && inner.priority.is_empty()
    }

    /// Blocks until both queues are empty. Never busy-waits: it parks on the
    /// drained-signal between emptiness checks.
    pub async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for SendQueues {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_precedes_standard() {
        let q = SendQueues::new();
        q.push_standard(vec![1]);
        q.push_priority(vec![2]);
        let (kind, frame) = q.peek_next().unwrap();
        assert_eq!(kind, QueueKind::Priority);
        assert_eq!(frame, vec![2]);
    }

    #[test]
    fn confirm_sent_only_removes_the_head_of_its_own_queue() {
        let q = SendQueues::new();
        q.push_standard(vec![1]);
        q.push_priority(vec![2]);
        q.confirm_sent(QueueKind::Priority);
        let (kind, frame) = q.peek_next().unwrap();
        assert_eq!(kind, QueueKind::Standard);
        assert_eq!(frame, vec![1]);
    }

    #[tokio::test]
    async fn wait_drained_returns_once_both_queues_are_empty() {
        let q = std::sync::Arc::new(SendQueues::new());
        q.push_standard(vec![1]);

        let waiter = {
            let q = q.clone();
            tokio::spawn(async move {
                q.wait_drained().await;
            })
        };

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        q.confirm_sent(QueueKind::Standard);

        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("wait_drained should return promptly after the queue empties")
            .unwrap();
    }
}
