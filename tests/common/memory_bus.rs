/// In-process broker implementing the bus traits, with fault injection
use async_trait::async_trait;
use bytes::Bytes;
use e2e_key_service::bus::{BusSession, Delivery, SessionEnd, Transport};
use e2e_key_service::error::{AppError, AppResult};
use e2e_key_service::topics::TopicIdentity;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};

struct Subscriber {
    session: u64,
    routing_key: String,
    sink: mpsc::Sender<Delivery>,
}

#[derive(Default)]
struct Broker {
    next_session: u64,
    live_session: Option<u64>,
    session_ends: HashMap<u64, watch::Sender<Option<SessionEnd>>>,
    subscribers: Vec<Subscriber>,
    declared: HashSet<String>,
    published: Vec<Delivery>,
    connects: usize,
    failing_connects: usize,
    refuse: bool,
}

impl Broker {
    fn sinks_for(&self, routing_key: &str) -> Vec<mpsc::Sender<Delivery>> {
        self.subscribers
            .iter()
            .filter(|s| Some(s.session) == self.live_session && !s.sink.is_closed())
            .filter(|s| s.routing_key == routing_key)
            .map(|s| s.sink.clone())
            .collect()
    }
}

async fn deliver(sinks: Vec<mpsc::Sender<Delivery>>, delivery: Delivery) {
    for sink in sinks {
        let _ = sink.send(delivery.clone()).await;
    }
}

/// Test-side handle. Clones share the same broker.
#[derive(Clone, Default)]
pub struct MemoryBus {
    broker: Arc<Mutex<Broker>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::new(MemoryTransport {
            broker: self.broker.clone(),
        })
    }

    /// Drop the live session as a broker restart would.
    pub fn disconnect(&self) {
        let mut broker = self.broker.lock().unwrap();
        if let Some(id) = broker.live_session.take() {
            broker.subscribers.retain(|s| s.session != id);
            if let Some(end) = broker.session_ends.remove(&id) {
                end.send_replace(Some(SessionEnd::Failed("connection reset".into())));
            }
        }
    }

    pub fn fail_next_connects(&self, count: usize) {
        self.broker.lock().unwrap().failing_connects = count;
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.broker.lock().unwrap().refuse = refuse;
    }

    /// Publish as an upstream service would.
    pub async fn inject(&self, routing_key: &str, payload: impl Into<Bytes>) {
        let delivery = Delivery {
            routing_key: routing_key.to_string(),
            payload: payload.into(),
        };
        let sinks = self.broker.lock().unwrap().sinks_for(routing_key);
        deliver(sinks, delivery).await;
    }

    pub fn published(&self) -> Vec<Delivery> {
        self.broker.lock().unwrap().published.clone()
    }

    pub fn published_to(&self, routing_key: &str) -> Vec<Bytes> {
        self.published()
            .into_iter()
            .filter(|d| d.routing_key == routing_key)
            .map(|d| d.payload)
            .collect()
    }

    pub fn published_json(&self, routing_key: &str) -> Vec<serde_json::Value> {
        self.published_to(routing_key)
            .iter()
            .map(|payload| serde_json::from_slice(payload).expect("published payload is JSON"))
            .collect()
    }

    pub fn subscriber_count(&self, routing_key: &str) -> usize {
        self.broker.lock().unwrap().sinks_for(routing_key).len()
    }

    pub fn is_declared(&self, routing_key: &str) -> bool {
        self.broker.lock().unwrap().declared.contains(routing_key)
    }

    pub fn connect_count(&self) -> usize {
        self.broker.lock().unwrap().connects
    }
}

struct MemoryTransport {
    broker: Arc<Mutex<Broker>>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self) -> AppResult<Arc<dyn BusSession>> {
        let mut broker = self.broker.lock().unwrap();
        broker.connects += 1;

        if broker.refuse {
            return Err(AppError::TransportUnavailable("connection refused".into()));
        }
        if broker.failing_connects > 0 {
            broker.failing_connects -= 1;
            return Err(AppError::TransportUnavailable("connection refused".into()));
        }

        broker.next_session += 1;
        let id = broker.next_session;
        let (end_tx, end_rx) = watch::channel(None);
        broker.session_ends.insert(id, end_tx);
        broker.live_session = Some(id);

        Ok(Arc::new(MemorySession {
            id,
            broker: self.broker.clone(),
            ended: end_rx,
        }))
    }
}

struct MemorySession {
    id: u64,
    broker: Arc<Mutex<Broker>>,
    ended: watch::Receiver<Option<SessionEnd>>,
}

impl MemorySession {
    fn ensure_live(&self, broker: &Broker) -> AppResult<()> {
        if broker.live_session == Some(self.id) {
            Ok(())
        } else {
            Err(AppError::ConnectionLost(format!("session {} is closed", self.id)))
        }
    }
}

#[async_trait]
impl BusSession for MemorySession {
    async fn declare_topic(&self, topic: &TopicIdentity) -> AppResult<()> {
        let mut broker = self.broker.lock().unwrap();
        self.ensure_live(&broker)?;
        broker.declared.insert(topic.routing_key());
        Ok(())
    }

    async fn publish(&self, topic: &TopicIdentity, payload: Bytes) -> AppResult<()> {
        let delivery = Delivery {
            routing_key: topic.routing_key(),
            payload,
        };
        let sinks = {
            let mut broker = self.broker.lock().unwrap();
            self.ensure_live(&broker)?;
            broker.published.push(delivery.clone());
            broker.sinks_for(&delivery.routing_key)
        };
        deliver(sinks, delivery).await;
        Ok(())
    }

    async fn subscribe(&self, topic: &TopicIdentity, sink: mpsc::Sender<Delivery>) -> AppResult<()> {
        let mut broker = self.broker.lock().unwrap();
        self.ensure_live(&broker)?;
        broker.subscribers.push(Subscriber {
            session: self.id,
            routing_key: topic.routing_key(),
            sink,
        });
        Ok(())
    }

    async fn closed(&self) -> SessionEnd {
        let mut ended = self.ended.clone();
        loop {
            let current = ended.borrow_and_update().clone();
            if let Some(end) = current {
                return end;
            }
            if ended.changed().await.is_err() {
                return SessionEnd::Closed;
            }
        }
    }
}
