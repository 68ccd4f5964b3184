//! In-flight result table
//!
//! One slot per submitted request. Each slot holds a watch channel that
//! receives the terminal [`Response`] exactly once; awaiting callers subscribe
//! instead of polling.

use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;

use crate::request::{RequestId, Response};

#[derive(Debug)]
struct Slot {
    fingerprint: String,
    timeout: Duration,
    tx: watch::Sender<Option<Response>>,
    completed_at: Option<Instant>,
}

/// Request id to slot
#[derive(Debug, Default)]
pub struct ResultTable {
    slots: DashMap<RequestId, Slot>,
}

/// What an awaiting caller needs
#[derive(Debug)]
pub struct Subscription {
    pub fingerprint: String,
    /// Default wait for this request's priority
    pub timeout: Duration,
    pub rx: watch::Receiver<Option<Response>>,
}

impl ResultTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a slot; `false` if the id is already present
    pub fn register(&self, id: &str, fingerprint: &str, timeout: Duration) -> bool {
        match self.slots.entry(id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                let (tx, _) = watch::channel(None);
                slot.insert(Slot {
                    fingerprint: fingerprint.to_string(),
                    timeout,
                    tx,
                    completed_at: None,
                });
                true
            }
        }
    }

    /// Drop a slot that was never queued
    pub fn remove(&self, id: &str) {
        self.slots.remove(id);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.slots.contains_key(id)
    }

    /// Publish the terminal response; later completions are ignored
    pub fn complete(&self, response: Response) -> bool {
        let Some(mut slot) = self.slots.get_mut(&response.request_id) else {
            return false;
        };
        if slot.completed_at.is_some() {
            return false;
        }
        slot.completed_at = Some(Instant::now());
        slot.tx.send_replace(Some(response));
        true
    }

    pub fn get(&self, id: &str) -> Option<Response> {
        self.slots.get(id).and_then(|slot| slot.tx.borrow().clone())
    }

    pub fn subscribe(&self, id: &str) -> Option<Subscription> {
        self.slots.get(id).map(|slot| Subscription {
            fingerprint: slot.fingerprint.clone(),
            timeout: slot.timeout,
            rx: slot.tx.subscribe(),
        })
    }

    /// Drop completed slots older than `retention`
    pub fn prune(&self, retention: Duration, now: Instant) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, slot| {
            slot.completed_at
                .map_or(true, |at| now.saturating_duration_since(at) < retention)
        });
        before.saturating_sub(self.slots.len())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_ids_rejected() {
        let table = ResultTable::new();
        assert!(table.register("r1", "fp", Duration::from_secs(1)));
        assert!(!table.register("r1", "fp", Duration::from_secs(1)));
    }

    #[test]
    fn test_completes_once() {
        let table = ResultTable::new();
        table.register("r1", "fp", Duration::from_secs(1));

        let mut first = Response::failure("r1", "m", "boom");
        first.error = None;
        assert!(table.complete(first.clone()));
        assert!(!table.complete(Response::failure("r1", "m", "late")));
        assert_eq!(table.get("r1"), Some(first));
        assert!(!table.complete(Response::failure("unknown", "m", "x")));
    }

    #[tokio::test]
    async fn test_subscriber_sees_completion() {
        let table = ResultTable::new();
        table.register("r1", "fp", Duration::from_secs(1));
        let mut sub = table.subscribe("r1").unwrap();
        assert_eq!(sub.fingerprint, "fp");

        table.complete(Response::failure("r1", "m", "boom"));
        let response = sub.rx.wait_for(Option::is_some).await.unwrap().clone();
        assert!(response.unwrap().is_error());
    }

    #[test]
    fn test_prune_keeps_pending() {
        let table = ResultTable::new();
        table.register("pending", "a", Duration::from_secs(1));
        table.register("done", "b", Duration::from_secs(1));
        table.complete(Response::failure("done", "m", "x"));

        let later = Instant::now() + Duration::from_secs(120);
        assert_eq!(table.prune(Duration::from_secs(60), later), 1);
        assert!(table.contains("pending"));
        assert!(!table.contains("done"));
    }
}
