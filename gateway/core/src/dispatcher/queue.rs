//! Priority queue of tickets
//!
//! Highest priority first; equal priorities dequeue in submission order.
//! Tickets leave the queue only by being popped.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::request::Request;

/// Queued request with its computed priority
#[derive(Debug)]
pub struct Ticket {
    pub priority: f64,
    /// Submission sequence, ties broken lowest first
    pub seq: u64,
    pub fingerprint: String,
    pub request: Request,
    pub enqueued_at: Instant,
    pub timeout: Duration,
}

impl PartialEq for Ticket {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ticket {}

impl PartialOrd for Ticket {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ticket {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Max-heap of tickets with an async pop
#[derive(Debug, Default)]
pub struct TicketQueue {
    heap: Mutex<BinaryHeap<Ticket>>,
    ready: Notify,
    next_seq: AtomicU64,
}

impl TicketQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next submission sequence number
    pub fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, AtomicOrdering::SeqCst)
    }

    pub fn push(&self, ticket: Ticket) {
        self.heap.lock().push(ticket);
        self.ready.notify_one();
    }

    pub fn try_pop(&self) -> Option<Ticket> {
        self.heap.lock().pop()
    }

    /// Wait for the highest-priority ticket
    ///
    /// Single consumer; a push between the empty check and the wait leaves a
    /// stored permit on the notifier, so no wakeup is lost.
    pub async fn pop(&self) -> Ticket {
        loop {
            if let Some(ticket) = self.try_pop() {
                return ticket;
            }
            self.ready.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ticket(queue: &TicketQueue, priority: f64, prompt: &str) -> Ticket {
        Ticket {
            priority,
            seq: queue.next_seq(),
            fingerprint: prompt.to_string(),
            request: Request::new(prompt),
            enqueued_at: Instant::now(),
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_priority_then_fifo() {
        let queue = TicketQueue::new();
        for (p, name) in [(50.0, "a"), (100.0, "b"), (50.0, "c"), (10.0, "d")] {
            let t = ticket(&queue, p, name);
            queue.push(t);
        }
        let order: Vec<String> = std::iter::from_fn(|| queue.try_pop())
            .map(|t| t.request.prompt)
            .collect();
        assert_eq!(order, vec!["b", "a", "c", "d"]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = Arc::new(TicketQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await.request.prompt })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(ticket(&queue, 1.0, "late"));
        assert_eq!(consumer.await.unwrap(), "late");
    }
}
