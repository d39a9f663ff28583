//! Per-key FIFO of outstanding lookups.
//!
//! The wire format has no request IDs, so a Get response for a key always completes
//! the oldest still-pending lookup for that same key. Keys are independent of each
//! other.

use crate::{PocaError, Result};
use std::collections::{HashMap, VecDeque};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Continuation completed with the raw response payload.
pub type Responder = oneshot::Sender<Result<String>>;

struct PendingRequest {
    responder: Responder,
    /// False while the Get is still sitting in the backlog.
    dispatched: bool,
}

/// Outstanding lookups, grouped by key.
#[derive(Default)]
pub struct PendingRequests {
    queues: HashMap<String, VecDeque<PendingRequest>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a continuation to the FIFO for `key`.
    pub fn enqueue(&mut self, key: &str, responder: Responder, dispatched: bool) {
        self.queues
            .entry(key.to_string())
            .or_default()
            .push_back(PendingRequest {
                responder,
                dispatched,
            });
    }

    /// Complete the oldest continuation for `key` with `payload`.
    ///
    /// Returns false for an unmatched response, which is logged and otherwise ignored.
    pub fn resolve(&mut self, key: &str, payload: String) -> bool {
        self.complete(key, Ok(payload))
    }

    /// Fail the oldest continuation for `key`, e.g. for a response without a payload.
    pub fn reject(&mut self, key: &str, error: PocaError) -> bool {
        self.complete(key, Err(error))
    }

    fn complete(&mut self, key: &str, outcome: Result<String>) -> bool {
        let Some(pending) = self.queues.get_mut(key).and_then(VecDeque::pop_front) else {
            warn!("Get response for {} with no pending request", key);
            return false;
        };
        if self.queues.get(key).is_some_and(VecDeque::is_empty) {
            self.queues.remove(key);
        }

        if pending.responder.send(outcome).is_err() {
            debug!("Lookup for {} was abandoned before its response arrived", key);
        }
        true
    }

    /// Flag the oldest undispatched request for `key` as sent.
    pub fn mark_dispatched(&mut self, key: &str) {
        if let Some(pending) = self
            .queues
            .get_mut(key)
            .and_then(|queue| queue.iter_mut().find(|p| !p.dispatched))
        {
            pending.dispatched = true;
        }
    }

    /// Fail every request whose Get already went out on a now-dead connection.
    ///
    /// Backlogged requests stay queued for the next connection. Returns the number of
    /// failed requests.
    pub fn fail_dispatched(&mut self) -> usize {
        let mut failed = 0;
        self.queues.retain(|key, queue| {
            while queue.front().is_some_and(|p| p.dispatched) {
                if let Some(pending) = queue.pop_front() {
                    let _ = pending.responder.send(Err(PocaError::ConnectionClosed {
                        key: key.clone(),
                    }));
                    failed += 1;
                }
            }
            !queue.is_empty()
        });
        failed
    }

    /// Number of outstanding lookups for `key`.
    pub fn len(&self, key: &str) -> usize {
        self.queues.get(key).map_or(0, VecDeque::len)
    }

    /// Total number of outstanding lookups across all keys.
    pub fn total(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(ledger: &mut PendingRequests, key: &str) -> oneshot::Receiver<Result<String>> {
        let (tx, rx) = oneshot::channel();
        ledger.enqueue(key, tx, true);
        rx
    }

    #[tokio::test]
    async fn test_responses_match_oldest_request_per_key() {
        let mut ledger = PendingRequests::new();
        let a1 = request(&mut ledger, "A");
        let b1 = request(&mut ledger, "B");
        let a2 = request(&mut ledger, "A");

        assert!(ledger.resolve("B", "b-1".into()));
        assert!(ledger.resolve("A", "a-1".into()));
        assert!(ledger.resolve("A", "a-2".into()));

        assert_eq!(b1.await.unwrap().unwrap(), "b-1");
        assert_eq!(a1.await.unwrap().unwrap(), "a-1");
        assert_eq!(a2.await.unwrap().unwrap(), "a-2");
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn test_resolving_other_key_leaves_request_pending() {
        let mut ledger = PendingRequests::new();
        let mut a1 = request(&mut ledger, "A");
        let _b1 = request(&mut ledger, "B");

        ledger.resolve("B", "b".into());

        assert!(a1.try_recv().is_err());
        assert_eq!(ledger.len("A"), 1);
        assert_eq!(ledger.len("B"), 0);
    }

    #[test]
    fn test_unmatched_response_is_rejected() {
        let mut ledger = PendingRequests::new();
        assert!(!ledger.resolve("missing", "{}".into()));

        let _rx = request(&mut ledger, "A");
        assert!(ledger.resolve("A", "{}".into()));
        assert!(!ledger.resolve("A", "{}".into()));
    }

    #[test]
    fn test_abandoned_lookup_still_consumes_response() {
        let mut ledger = PendingRequests::new();
        drop(request(&mut ledger, "A"));
        let mut second = request(&mut ledger, "A");

        assert!(ledger.resolve("A", "first".into()));
        assert!(second.try_recv().is_err());
        assert!(ledger.resolve("A", "second".into()));
        assert_eq!(second.try_recv().unwrap().unwrap(), "second");
    }

    #[tokio::test]
    async fn test_fail_dispatched_keeps_backlogged_requests() {
        let mut ledger = PendingRequests::new();
        let sent = request(&mut ledger, "A");
        let (tx, mut backlogged) = oneshot::channel();
        ledger.enqueue("A", tx, false);

        assert_eq!(ledger.fail_dispatched(), 1);

        let err = sent.await.unwrap().unwrap_err();
        assert!(matches!(err, PocaError::ConnectionClosed { ref key } if key == "A"));
        assert!(backlogged.try_recv().is_err());
        assert_eq!(ledger.len("A"), 1);

        ledger.mark_dispatched("A");
        assert_eq!(ledger.fail_dispatched(), 1);
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn test_reject_fails_oldest_request_only() {
        let mut ledger = PendingRequests::new();
        let first = request(&mut ledger, "A");
        let second = request(&mut ledger, "A");

        assert!(ledger.reject("A", PocaError::protocol("missing data")));
        assert!(ledger.resolve("A", "a-2".into()));

        assert!(matches!(
            first.await.unwrap().unwrap_err(),
            PocaError::Protocol { .. }
        ));
        assert_eq!(second.await.unwrap().unwrap(), "a-2");
    }

    #[test]
    fn test_total_counts_every_key() {
        let mut ledger = PendingRequests::new();
        let _a = request(&mut ledger, "A");
        let _b = request(&mut ledger, "B");
        let _c = request(&mut ledger, "B");
        assert_eq!(ledger.total(), 3);
    }
}
