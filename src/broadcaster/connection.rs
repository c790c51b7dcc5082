// =============================================================================
// Connection — one push-channel subscriber: bounded queue, backpressure
// policy, dedicated FIFO sender task (spec.md §4.5)
// =============================================================================

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use uuid::Uuid;

use super::{BroadcastMessage, Topic};

/// Per-connection outbound queue depth (spec.md §4.5).
pub const QUEUE_DEPTH: usize = 256;

struct Inner {
    queue: Mutex<VecDeque<BroadcastMessage>>,
    subscriptions: Mutex<HashSet<Topic>>,
    /// Set once a session-scoped topic (order_update/portfolio_update) is
    /// authorized for a particular session; `None` means unrestricted.
    owned_session: Mutex<Option<Uuid>>,
    closed: AtomicBool,
    notify: Notify,
}

/// A single subscriber's queue plus the wakeup primitive for its sender task.
///
/// Enqueue policy (spec.md §4.5): `market_data` messages coalesce — when the
/// queue is full the oldest queued market-data message is dropped to make
/// room. `order_update`/`chat` messages are never dropped; if the queue is
/// full for one of those, the connection is closed for being a slow
/// consumer. The sender task drains strictly FIFO.
#[derive(Clone)]
pub struct Connection {
    id: Uuid,
    inner: Arc<Inner>,
}

impl Connection {
    pub fn new(id: Uuid, _depth_hint: usize) -> Self {
        Self {
            id,
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::with_capacity(QUEUE_DEPTH)),
                subscriptions: Mutex::new(HashSet::new()),
                owned_session: Mutex::new(None),
                closed: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn subscribe(&self, topic: Topic) {
        self.inner.subscriptions.lock().insert(topic);
    }

    pub fn unsubscribe(&self, topic: Topic) {
        self.inner.subscriptions.lock().remove(&topic);
    }

    pub fn is_subscribed(&self, topic: Topic) -> bool {
        self.inner.subscriptions.lock().contains(&topic)
    }

    /// Restrict session-scoped topics (order_update/portfolio_update) to a
    /// specific session id. Unset (`None`) means the connection sees every
    /// session — used by admin/tester dashboards in the original product,
    /// kept here since the spec does not forbid it.
    pub fn set_owned_session(&self, session_id: Uuid) {
        *self.inner.owned_session.lock() = Some(session_id);
    }

    pub fn owns_session(&self, session_id: Uuid) -> bool {
        match *self.inner.owned_session.lock() {
            Some(owned) => owned == session_id,
            None => true,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Mark closed; further `enqueue` calls silently no-op (spec.md §4.5
    /// Cancellation: "closed-flag silently discards further producer
    /// enqueues").
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// Apply the backpressure policy and append `msg`. Returns `false` when
    /// the connection must be closed (slow-consumer on a non-coalesceable
    /// topic); the caller is responsible for calling `close()` in that case.
    pub fn enqueue(&self, msg: BroadcastMessage) -> bool {
        if self.is_closed() {
            return true;
        }
        let mut queue = self.inner.queue.lock();
        if queue.len() >= QUEUE_DEPTH {
            if msg.is_coalesceable() {
                queue.pop_front();
                queue.push_back(msg);
                drop(queue);
                self.inner.notify.notify_one();
                return true;
            }
            return false;
        }
        queue.push_back(msg);
        drop(queue);
        self.inner.notify.notify_one();
        true
    }

    /// Pop the next message in FIFO order, or `None` if empty.
    fn pop(&self) -> Option<BroadcastMessage> {
        self.inner.queue.lock().pop_front()
    }

    pub fn queued_len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Drain and discard whatever remains (spec.md §4.5 Cancellation).
    pub fn drain(&self) {
        self.inner.queue.lock().clear();
    }

    /// Run the dedicated per-connection sender loop: wait for new items,
    /// drain strictly FIFO, hand each to `send`. Exits once closed and
    /// drained. `send` returning `Err` closes the connection immediately
    /// (mirrors a broken socket).
    pub async fn run_sender<F, Fut>(&self, mut send: F)
    where
        F: FnMut(BroadcastMessage) -> Fut,
        Fut: std::future::Future<Output = Result<(), ()>>,
    {
        loop {
            while let Some(msg) = self.pop() {
                if send(msg).await.is_err() {
                    self.close();
                    self.drain();
                    return;
                }
            }
            if self.is_closed() {
                self.drain();
                return;
            }
            self.inner.notify.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market_msg(price: f64) -> BroadcastMessage {
        BroadcastMessage::MarketUpdate {
            symbol: "XYZ".into(),
            price,
            sim_date: "2024-01-01".into(),
        }
    }

    fn chat_msg() -> BroadcastMessage {
        BroadcastMessage::Chat {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            display_name: "a".into(),
            text: "hi".into(),
            sim_timestamp: "2024-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn market_data_coalesces_when_full() {
        let conn = Connection::new(Uuid::new_v4(), QUEUE_DEPTH);
        for i in 0..QUEUE_DEPTH {
            assert!(conn.enqueue(market_msg(i as f64)));
        }
        assert_eq!(conn.queued_len(), QUEUE_DEPTH);
        assert!(conn.enqueue(market_msg(999.0)));
        assert_eq!(conn.queued_len(), QUEUE_DEPTH);
    }

    #[test]
    fn chat_overflow_signals_close() {
        let conn = Connection::new(Uuid::new_v4(), QUEUE_DEPTH);
        for _ in 0..QUEUE_DEPTH {
            assert!(conn.enqueue(chat_msg()));
        }
        assert!(!conn.enqueue(chat_msg()));
    }

    #[test]
    fn closed_connection_silently_drops_enqueues() {
        let conn = Connection::new(Uuid::new_v4(), QUEUE_DEPTH);
        conn.close();
        assert!(conn.enqueue(market_msg(1.0)));
        assert_eq!(conn.queued_len(), 0);
    }

    #[tokio::test]
    async fn run_sender_drains_fifo_and_exits_on_close() {
        let conn = Connection::new(Uuid::new_v4(), QUEUE_DEPTH);
        conn.enqueue(market_msg(1.0));
        conn.enqueue(market_msg(2.0));
        conn.close();

        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();
        conn.run_sender(move |msg| {
            let received_clone = received_clone.clone();
            async move {
                if let BroadcastMessage::MarketUpdate { price, .. } = msg {
                    received_clone.lock().push(price);
                }
                Ok(())
            }
        })
        .await;

        assert_eq!(*received.lock(), vec![1.0, 2.0]);
    }
}
