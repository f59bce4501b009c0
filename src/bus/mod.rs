//! Topic-routed message bus
//!
//! `Transport` opens sessions; `BrokerConnection` keeps one alive and exposes
//! it through a readiness gate; `Publisher` and `TopicRouter` sit on top.

pub mod connection;
pub mod kafka;
pub mod publisher;
pub mod router;

pub use connection::{BrokerConnection, ConnectionState};
pub use kafka::KafkaTransport;
pub use publisher::Publisher;
pub use router::{CommandHandler, CommandKind, RouteTable, TopicRouter};

use crate::error::AppResult;
use crate::topics::TopicIdentity;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A message received on a subscribed topic.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub routing_key: String,
    pub payload: Bytes,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    Closed,
    Failed(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a new session with the broker.
    async fn connect(&self) -> AppResult<Arc<dyn BusSession>>;
}

/// One live connection to the broker.
///
/// Subscriptions stop delivering once the session ends or the sink is closed.
#[async_trait]
pub trait BusSession: Send + Sync {
    /// Idempotently create the topic.
    async fn declare_topic(&self, topic: &TopicIdentity) -> AppResult<()>;

    async fn publish(&self, topic: &TopicIdentity, payload: Bytes) -> AppResult<()>;

    /// Deliver every message published to `topic` from now on into `sink`.
    async fn subscribe(&self, topic: &TopicIdentity, sink: mpsc::Sender<Delivery>) -> AppResult<()>;

    /// Resolves when the session is over. Awaited by the connection owner only.
    async fn closed(&self) -> SessionEnd;
}
