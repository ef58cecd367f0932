//! Broadcast hub
//!
//! Pushes `POLL_UPDATE` envelopes to every open observer. Delivery is
//! best-effort: each connection gets a non-blocking enqueue, a slow observer
//! skips intermediate frames, a dead one is closed and unregistered.
//!
//! Votes are never removed, so a poll's total only grows. Tallies built on
//! concurrent tasks can reach the hub out of order; a tally whose total is
//! not above the last one published for its poll is discarded, which keeps
//! every observer's sequence for a poll monotonic.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::registry::{ConnectionId, ConnectionRegistry, DeliveryError, Frame};
use crate::metrics::Metrics;
use crate::polls::model::{PollId, PollResult};

/// Server-to-observer message
#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum Envelope<'a> {
    #[serde(rename = "POLL_UPDATE")]
    PollUpdate(&'a PollResult),
}

impl Envelope<'_> {
    pub fn to_frame(&self) -> Result<Frame, serde_json::Error> {
        serde_json::to_string(self).map(Frame::from)
    }
}

/// Fan-out of tally updates to the connection registry
#[derive(Debug)]
pub struct BroadcastHub {
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<Metrics>,
    /// Highest total published per poll
    published: Mutex<HashMap<PollId, u64>>,
}

impl BroadcastHub {
    pub fn new(registry: Arc<ConnectionRegistry>, metrics: Arc<Metrics>) -> Self {
        Self {
            registry,
            metrics,
            published: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Send the tally to every connection open at call time.
    ///
    /// Never blocks and never fails: per-connection problems are logged and
    /// counted, closed connections are removed from the registry. A tally no
    /// newer than the last one published for the poll is skipped.
    pub fn publish(&self, result: &PollResult) {
        let total = result.total_votes();
        // Held through the fan-out so publishes for one poll cannot interleave.
        let mut published = self.published.lock();
        match published.get(&result.poll_id) {
            Some(&last) if total <= last => {
                debug!(
                    poll_id = result.poll_id,
                    total, last, "Skipping stale poll update"
                );
                return;
            }
            _ => {
                published.insert(result.poll_id, total);
            }
        }

        if self.registry.is_empty() {
            return;
        }

        let frame = match Envelope::PollUpdate(result).to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!(poll_id = result.poll_id, "Failed to encode poll update: {}", e);
                return;
            }
        };

        let mut delivered = 0u64;
        let mut lagging = 0u64;
        let mut closed: Vec<ConnectionId> = Vec::new();

        self.registry.for_each(|conn| {
            if !conn.is_open() {
                closed.push(conn.id().to_string());
                return;
            }
            match conn.try_send(Arc::clone(&frame)) {
                Ok(()) => delivered += 1,
                Err(DeliveryError::Lagging) => {
                    warn!(
                        connection_id = %conn.id(),
                        poll_id = result.poll_id,
                        "Observer queue full, holding latest poll update"
                    );
                    lagging += 1;
                }
                Err(DeliveryError::Closed) => {
                    debug!(connection_id = %conn.id(), "Observer gone during broadcast");
                    conn.close();
                    closed.push(conn.id().to_string());
                }
            }
        });

        for id in &closed {
            self.registry.remove(id);
        }

        self.metrics.broadcasts_total.inc();
        self.metrics
            .broadcast_frames_total
            .inc_by("delivered", delivered);
        self.metrics.broadcast_frames_total.inc_by("lagging", lagging);
        self.metrics
            .broadcast_frames_total
            .inc_by("closed", closed.len() as u64);

        debug!(
            poll_id = result.poll_id,
            delivered,
            lagging,
            closed = closed.len(),
            "Published poll update"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polls::model::OptionTally;
    use serde_json::Value;

    fn result(a: u64, b: u64) -> PollResult {
        PollResult {
            poll_id: 1,
            question: "A or B?".to_string(),
            options: vec![
                OptionTally {
                    id: 10,
                    text: "A".to_string(),
                    votes: a,
                },
                OptionTally {
                    id: 11,
                    text: "B".to_string(),
                    votes: b,
                },
            ],
        }
    }

    fn hub(queue_size: usize) -> BroadcastHub {
        BroadcastHub::new(
            Arc::new(ConnectionRegistry::new(queue_size)),
            Arc::new(Metrics::new()),
        )
    }

    #[test]
    fn test_envelope_shape() {
        let frame = Envelope::PollUpdate(&result(1, 0)).to_frame().unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();

        assert_eq!(value["type"], "POLL_UPDATE");
        assert_eq!(value["payload"]["pollId"], 1);
        assert_eq!(value["payload"]["question"], "A or B?");
        assert_eq!(value["payload"]["options"][0]["id"], 10);
        assert_eq!(value["payload"]["options"][0]["text"], "A");
        assert_eq!(value["payload"]["options"][0]["votes"], 1);
        assert_eq!(value["payload"]["options"][1]["votes"], 0);
    }

    #[test]
    fn test_publish_without_observers_is_noop() {
        let hub = hub(4);
        hub.publish(&result(1, 0));
        assert_eq!(hub.metrics.broadcasts_total.get(), 0);
    }

    #[test]
    fn test_each_open_connection_gets_one_frame() {
        let hub = hub(4);
        let (_a, mut rx_a) = hub.registry().join();
        let (_b, mut rx_b) = hub.registry().join();

        hub.publish(&result(1, 0));

        for rx in [&mut rx_a, &mut rx_b] {
            let frame = rx.try_recv().unwrap();
            assert!(frame.contains("POLL_UPDATE"));
            assert!(rx.try_recv().is_err());
        }
        assert_eq!(hub.metrics.broadcast_frames_total.get("delivered"), 2);
    }

    #[test]
    fn test_late_joiner_gets_no_backlog() {
        let hub = hub(4);
        let (_early, mut rx_early) = hub.registry().join();
        hub.publish(&result(1, 0));

        let (_late, mut rx_late) = hub.registry().join();
        assert!(rx_early.try_recv().is_ok());
        assert!(rx_late.try_recv().is_err());
    }

    #[test]
    fn test_closed_connection_is_removed_and_others_still_delivered() {
        let hub = hub(4);
        let (_gone, rx_gone) = hub.registry().join();
        let (_live, mut rx_live) = hub.registry().join();
        drop(rx_gone);

        hub.publish(&result(0, 1));

        assert!(rx_live.try_recv().is_ok());
        assert_eq!(hub.registry().len(), 1);
        assert_eq!(hub.metrics.broadcast_frames_total.get("closed"), 1);
    }

    #[test]
    fn test_slow_observer_stays_open_and_ends_on_latest_tally() {
        let hub = hub(1);
        let (slow, mut rx_slow) = hub.registry().join();
        let (_fast, mut rx_fast) = hub.registry().join();

        hub.publish(&result(1, 0));
        let _ = rx_fast.try_recv().unwrap();
        hub.publish(&result(1, 1));
        let _ = rx_fast.try_recv().unwrap();
        hub.publish(&result(2, 1));

        assert!(slow.is_open());
        assert_eq!(hub.registry().len(), 2);
        assert_eq!(hub.metrics.broadcast_frames_total.get("lagging"), 2);

        let first = rx_slow.try_recv().unwrap();
        assert!(first.contains("\"votes\":1},{\"id\":11,\"text\":\"B\",\"votes\":0}]"));
        let last = rx_slow.try_recv().unwrap();
        assert!(last.contains("\"votes\":2},{\"id\":11,\"text\":\"B\",\"votes\":1}]"));
        assert!(rx_slow.try_recv().is_err());
        assert!(rx_fast.try_recv().unwrap().contains("\"votes\":2}"));
    }

    #[test]
    fn test_out_of_order_tally_is_not_published() {
        let hub = hub(4);
        let (_handle, mut rx) = hub.registry().join();

        hub.publish(&result(2, 1));
        hub.publish(&result(1, 1));
        hub.publish(&result(2, 1));

        let frame = rx.try_recv().unwrap();
        assert!(frame.contains("\"votes\":2}"));
        assert!(rx.try_recv().is_err());
        assert_eq!(hub.metrics.broadcasts_total.get(), 1);

        hub.publish(&result(2, 2));
        assert!(rx.try_recv().unwrap().contains("\"votes\":2}]"));
    }

    #[test]
    fn test_sequence_is_tracked_per_poll() {
        let hub = hub(4);
        let (_handle, mut rx) = hub.registry().join();

        hub.publish(&result(3, 0));
        let mut other = result(1, 0);
        other.poll_id = 2;
        hub.publish(&other);

        assert!(rx.try_recv().unwrap().contains("\"pollId\":1"));
        assert!(rx.try_recv().unwrap().contains("\"pollId\":2"));
    }
}
