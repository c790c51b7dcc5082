// =============================================================================
// Broadcaster — push channel: subscriptions, per-connection send loop,
// backpressure (C8)
// =============================================================================
//
// Topics: market_data, order_update, portfolio_update, chat (spec.md §4.5).
// Each topic gets its own bounded producer queue and its own dispatcher
// task (spec.md §5); a dispatcher drains its queue and fans out to every
// subscribed Connection's own bounded queue. Dispatchers never suspend on a
// subscriber queue — the enqueue policy below (coalesce or slow-consumer
// close) always returns immediately.
// =============================================================================

pub mod connection;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

pub use connection::Connection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    MarketData,
    OrderUpdate,
    PortfolioUpdate,
    Chat,
}

impl Topic {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "market_data" => Some(Topic::MarketData),
            "order_update" => Some(Topic::OrderUpdate),
            "portfolio_update" => Some(Topic::PortfolioUpdate),
            "chat" => Some(Topic::Chat),
            _ => None,
        }
    }

    /// `chat` requires tester/admin (spec.md §4.5 Handshake); everything
    /// else only requires a resolvable credential.
    pub fn requires_elevated_role(self) -> bool {
        matches!(self, Topic::Chat)
    }
}

/// A single fan-out event accepted by the Broadcaster's producer queue.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BroadcastMessage {
    MarketUpdate {
        symbol: String,
        price: f64,
        sim_date: String,
    },
    OrderUpdate {
        session_id: Uuid,
        trade_id: Uuid,
        symbol: String,
        kind: String,
        quantity: u64,
        execution_price: f64,
    },
    PortfolioUpdate {
        session_id: Uuid,
        cash: f64,
        total_value: f64,
    },
    Chat {
        id: Uuid,
        user_id: Uuid,
        display_name: String,
        text: String,
        sim_timestamp: String,
    },
}

impl BroadcastMessage {
    pub fn topic(&self) -> Topic {
        match self {
            BroadcastMessage::MarketUpdate { .. } => Topic::MarketData,
            BroadcastMessage::OrderUpdate { .. } => Topic::OrderUpdate,
            BroadcastMessage::PortfolioUpdate { .. } => Topic::PortfolioUpdate,
            BroadcastMessage::Chat { .. } => Topic::Chat,
        }
    }

    /// Order-update and chat frames must never be silently dropped on a
    /// live connection (spec.md §4.5); only market-data coalesces.
    pub fn is_coalesceable(&self) -> bool {
        matches!(self, BroadcastMessage::MarketUpdate { .. })
    }

    /// Only order updates are filtered by owning session (spec.md §4.5).
    pub fn owning_session(&self) -> Option<Uuid> {
        match self {
            BroadcastMessage::OrderUpdate { session_id, .. }
            | BroadcastMessage::PortfolioUpdate { session_id, .. } => Some(*session_id),
            _ => None,
        }
    }
}

/// Depth of each topic's producer queue (spec.md §5 "bounded producer
/// queue"). Distinct from the per-connection queue depth (§4.5).
const PRODUCER_QUEUE_DEPTH: usize = 1024;

const ALL_TOPICS: [Topic; 4] = [
    Topic::MarketData,
    Topic::OrderUpdate,
    Topic::PortfolioUpdate,
    Topic::Chat,
];

pub struct Broadcaster {
    connections: dashmap::DashMap<Uuid, Arc<Connection>>,
    /// One producer per topic (spec.md §5: "one dispatcher task per topic").
    producers: std::collections::HashMap<Topic, mpsc::Sender<BroadcastMessage>>,
}

impl Broadcaster {
    /// Construct a Broadcaster and spawn one dispatcher task per topic.
    pub fn new() -> Arc<Self> {
        let mut producers = std::collections::HashMap::new();
        let mut receivers = Vec::new();
        for topic in ALL_TOPICS {
            let (tx, rx) = mpsc::channel::<BroadcastMessage>(PRODUCER_QUEUE_DEPTH);
            producers.insert(topic, tx);
            receivers.push((topic, rx));
        }

        let broadcaster = Arc::new(Self {
            connections: dashmap::DashMap::new(),
            producers,
        });

        for (topic, mut rx) in receivers {
            let dispatch_target = broadcaster.clone();
            tokio::spawn(async move {
                while let Some(msg) = rx.recv().await {
                    dispatch_target.fan_out(topic, msg);
                }
            });
        }

        broadcaster
    }

    /// Register a new Connection under `id`.
    pub fn register(&self, id: Uuid, connection: Arc<Connection>) {
        self.connections.insert(id, connection);
    }

    /// Remove a Connection; draining/discarding its queue is the
    /// Connection's own responsibility on close (spec.md §4.5 Cancellation).
    pub fn unregister(&self, id: Uuid) {
        if let Some((_, conn)) = self.connections.remove(&id) {
            conn.close();
        }
    }

    /// Enqueue a message onto its topic's producer queue. Never suspends
    /// callers on a *subscriber* queue; if the producer queue itself is
    /// full, this falls back to a blocking send in the caller's async
    /// context (the bound is sized generously enough that this is the rare
    /// path).
    pub async fn publish(&self, msg: BroadcastMessage) {
        let topic = msg.topic();
        let Some(producer) = self.producers.get(&topic) else {
            warn!(?topic, "no dispatcher registered for topic — message dropped");
            return;
        };
        if producer.try_send(msg.clone()).is_err() {
            if producer.send(msg).await.is_err() {
                warn!(?topic, "broadcaster producer channel closed — message dropped");
            }
        }
    }

    fn fan_out(&self, topic: Topic, msg: BroadcastMessage) {
        let owner = msg.owning_session();
        for entry in self.connections.iter() {
            let conn = entry.value();
            if !conn.is_subscribed(topic) {
                continue;
            }
            if let Some(owner_id) = owner {
                if !conn.owns_session(owner_id) {
                    continue;
                }
            }
            if !conn.enqueue(msg.clone()) {
                debug!(connection = %entry.key(), "slow consumer — connection closed");
                conn.close();
            }
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Close every live connection with a normal-closure signal and drop
    /// them from the registry (spec.md §5 shutdown: "sends close frames to
    /// all connections with a normal-closure code").
    pub fn close_all(&self) {
        for entry in self.connections.iter() {
            entry.value().close();
        }
        self.connections.clear();
    }
}

impl Default for Arc<Broadcaster> {
    fn default() -> Self {
        Broadcaster::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_subscribed_connection() {
        let broadcaster = Broadcaster::new();
        let conn = Arc::new(Connection::new(Uuid::new_v4(), 8));
        conn.subscribe(Topic::MarketData);
        broadcaster.register(conn.id(), conn.clone());

        broadcaster
            .publish(BroadcastMessage::MarketUpdate {
                symbol: "XYZ".into(),
                price: 10.0,
                sim_date: "2024-01-01".into(),
            })
            .await;

        // Give the dispatcher task a chance to run.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(conn.queued_len(), 1);
    }

    #[tokio::test]
    async fn order_update_filters_by_owning_session() {
        let broadcaster = Broadcaster::new();
        let conn = Arc::new(Connection::new(Uuid::new_v4(), 8));
        let other_session = Uuid::new_v4();
        conn.subscribe(Topic::OrderUpdate);
        conn.set_owned_session(other_session);
        broadcaster.register(conn.id(), conn.clone());

        broadcaster
            .publish(BroadcastMessage::OrderUpdate {
                session_id: Uuid::new_v4(),
                trade_id: Uuid::new_v4(),
                symbol: "XYZ".into(),
                kind: "buy".into(),
                quantity: 1,
                execution_price: 1.0,
            })
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(conn.queued_len(), 0);
    }
}
