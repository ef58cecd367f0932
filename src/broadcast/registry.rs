//! Connection registry
//!
//! Owns the set of live observer connections. Each connection has a bounded
//! outbound queue drained by its socket task, and moves `Open -> Closed`
//! exactly once. Joins, leaves and broadcasts may run concurrently.
//!
//! A full queue does not lose the newest frame: it is parked in a one-slot
//! overflow that later frames overwrite, and the receiver yields it once the
//! queue drains. A lagging observer therefore skips intermediate frames but
//! always ends on the latest one.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};

/// Unique identifier for an observer connection.
pub type ConnectionId = String;

/// Serialized text frame shared by every receiver of one broadcast.
pub type Frame = Arc<str>;

/// Why a frame could not be queued for a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The connection is closed or its socket task is gone
    #[error("connection closed")]
    Closed,
    /// The outbound queue is full; the frame was parked in place of any
    /// older parked frame
    #[error("outbound queue full")]
    Lagging,
}

/// One live observer
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::Sender<Frame>,
    /// Newest frame that did not fit in the queue
    overflow: Mutex<Option<Frame>>,
    open: AtomicBool,
}

impl Connection {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    /// Transition to `Closed`. Returns true only for the call that made the
    /// transition.
    pub fn close(&self) -> bool {
        self.open.swap(false, Ordering::AcqRel)
    }

    /// Queue a frame without waiting.
    ///
    /// While a frame is parked, newer frames replace it rather than entering
    /// the queue, so the parked frame is always the last one delivered.
    pub fn try_send(&self, frame: Frame) -> Result<(), DeliveryError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(DeliveryError::Closed);
        }

        let mut overflow = self.overflow.lock();
        if overflow.is_some() {
            if self.tx.is_closed() {
                return Err(DeliveryError::Closed);
            }
            *overflow = Some(frame);
            return Err(DeliveryError::Lagging);
        }
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(frame)) => {
                *overflow = Some(frame);
                Err(DeliveryError::Lagging)
            }
            Err(TrySendError::Closed(_)) => Err(DeliveryError::Closed),
        }
    }
}

/// Proof of membership returned by [`ConnectionRegistry::join`]
#[derive(Debug)]
pub struct ConnectionHandle {
    connection: Arc<Connection>,
}

impl ConnectionHandle {
    pub fn id(&self) -> &str {
        self.connection.id()
    }

    pub fn is_open(&self) -> bool {
        self.connection.is_open()
    }
}

/// Receiving end of one connection's outbound queue
#[derive(Debug)]
pub struct FrameReceiver {
    rx: mpsc::Receiver<Frame>,
    connection: Arc<Connection>,
}

impl FrameReceiver {
    /// Next frame in send order, waiting if there is none.
    pub async fn recv(&mut self) -> Option<Frame> {
        match self.try_recv() {
            Ok(frame) => Some(frame),
            Err(TryRecvError::Empty) => self.rx.recv().await,
            Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Next frame without waiting. The parked overflow frame comes out only
    /// after the queue is empty.
    pub fn try_recv(&mut self) -> Result<Frame, TryRecvError> {
        let mut overflow = self.connection.overflow.lock();
        match self.rx.try_recv() {
            Err(TryRecvError::Empty) => overflow.take().ok_or(TryRecvError::Empty),
            other => other,
        }
    }
}

/// Registry of open observer connections
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    queue_size: usize,
}

impl ConnectionRegistry {
    /// Create an empty registry whose connections buffer at most
    /// `queue_size` frames each.
    pub fn new(queue_size: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            queue_size: queue_size.max(1),
        }
    }

    /// Register a new open connection. The receiver yields every frame
    /// broadcast after this call returns.
    pub fn join(&self) -> (ConnectionHandle, FrameReceiver) {
        let (tx, rx) = mpsc::channel(self.queue_size);
        let connection = Arc::new(Connection {
            id: generate_connection_id(),
            tx,
            overflow: Mutex::new(None),
            open: AtomicBool::new(true),
        });

        self.connections
            .write()
            .insert(connection.id.clone(), Arc::clone(&connection));

        tracing::debug!(connection_id = %connection.id, "Observer joined");
        let receiver = FrameReceiver {
            rx,
            connection: Arc::clone(&connection),
        };
        (ConnectionHandle { connection }, receiver)
    }

    /// Close and unregister. Safe to call more than once.
    pub fn leave(&self, handle: &ConnectionHandle) -> bool {
        handle.connection.close();
        self.remove(handle.id())
    }

    /// Drop a connection from the set by id. Returns true if it was present.
    pub(crate) fn remove(&self, id: &str) -> bool {
        let removed = self.connections.write().remove(id).is_some();
        if removed {
            tracing::debug!(connection_id = %id, "Observer left");
        }
        removed
    }

    /// Visit every registered connection.
    ///
    /// Iterates over a snapshot, so `f` may close connections and other
    /// tasks may join or leave while it runs.
    pub fn for_each(&self, mut f: impl FnMut(&Connection)) {
        let snapshot: Vec<Arc<Connection>> = self.connections.read().values().cloned().collect();
        for connection in &snapshot {
            f(connection);
        }
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }
}

/// Helper to generate a unique connection ID
fn generate_connection_id() -> ConnectionId {
    format!("ws_{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(text: &str) -> Frame {
        Arc::from(text)
    }

    #[test]
    fn test_join_and_leave() {
        let registry = ConnectionRegistry::new(4);
        let (a, _rx_a) = registry.join();
        let (b, _rx_b) = registry.join();
        assert_eq!(registry.len(), 2);
        assert_ne!(a.id(), b.id());

        assert!(registry.leave(&a));
        assert!(!a.is_open());
        assert!(!registry.leave(&a));
        assert_eq!(registry.len(), 1);
        assert!(b.is_open());
    }

    #[test]
    fn test_try_send_reports_lagging_when_queue_full() {
        let registry = ConnectionRegistry::new(1);
        let (_handle, _rx) = registry.join();

        let mut results = Vec::new();
        registry.for_each(|conn| {
            results.push(conn.try_send(frame("one")));
            results.push(conn.try_send(frame("two")));
        });
        assert_eq!(results, vec![Ok(()), Err(DeliveryError::Lagging)]);
    }

    #[test]
    fn test_lagging_receiver_ends_on_newest_frame() {
        let registry = ConnectionRegistry::new(2);
        let (_handle, mut rx) = registry.join();

        registry.for_each(|conn| {
            for text in ["one", "two", "three", "four"] {
                let _ = conn.try_send(frame(text));
            }
        });
        assert_eq!(&*rx.try_recv().unwrap(), "one");

        // Room in the queue again, but a parked frame must not be overtaken.
        registry.for_each(|conn| {
            assert_eq!(conn.try_send(frame("five")), Err(DeliveryError::Lagging));
        });

        let received: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|f| f.to_string())
            .collect();
        assert_eq!(received, vec!["two", "five"]);

        registry.for_each(|conn| assert!(conn.try_send(frame("six")).is_ok()));
        assert_eq!(&*rx.try_recv().unwrap(), "six");
    }

    #[tokio::test]
    async fn test_recv_yields_parked_frame_after_queue() {
        let registry = ConnectionRegistry::new(1);
        let (_handle, mut rx) = registry.join();
        registry.for_each(|conn| {
            let _ = conn.try_send(frame("old"));
            let _ = conn.try_send(frame("stale"));
            let _ = conn.try_send(frame("new"));
        });

        assert_eq!(&*rx.recv().await.unwrap(), "old");
        assert_eq!(&*rx.recv().await.unwrap(), "new");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_receiver_reads_as_closed() {
        let registry = ConnectionRegistry::new(4);
        let (_handle, rx) = registry.join();
        drop(rx);

        registry.for_each(|conn| {
            assert!(!conn.is_open());
            assert_eq!(conn.try_send(frame("x")), Err(DeliveryError::Closed));
        });
    }

    #[test]
    fn test_close_is_terminal() {
        let registry = ConnectionRegistry::new(4);
        let (handle, mut rx) = registry.join();

        registry.for_each(|conn| {
            assert!(conn.close());
            assert!(!conn.close());
            assert_eq!(conn.try_send(frame("late")), Err(DeliveryError::Closed));
        });
        assert!(!handle.is_open());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_for_each_tolerates_leave_during_iteration() {
        let registry = ConnectionRegistry::new(4);
        let (a, _rx_a) = registry.join();
        let (_b, _rx_b) = registry.join();
        let (_c, _rx_c) = registry.join();

        let mut visited = 0;
        registry.for_each(|_| {
            visited += 1;
            registry.leave(&a);
        });
        assert_eq!(visited, 3);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_zero_queue_size_is_clamped() {
        let registry = ConnectionRegistry::new(0);
        let (_handle, mut rx) = registry.join();
        registry.for_each(|conn| assert!(conn.try_send(frame("ok")).is_ok()));
        assert_eq!(&*rx.try_recv().unwrap(), "ok");
    }
}
