//! Inbound dispatch
//!
//! Every inbound topic maps to exactly one command kind through a route table
//! checked at startup. The router resubscribes on every new session and hands
//! decoded commands to a single handler, one at a time, in arrival order.

use super::{BrokerConnection, BusSession, ConnectionState, Delivery};
use crate::deadline::bounded;
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{Command, ConsumedKeysMessage, KeyBatch};
use crate::topics::InboundTopic;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

const DELIVERY_BUFFER: usize = 256;
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    SaveRegistrationKeys,
    DeleteConsumedKeys,
}

#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<(InboundTopic, CommandKind)>,
}

impl RouteTable {
    /// Every inbound topic must be routed exactly once.
    pub fn new(routes: &[(InboundTopic, CommandKind)]) -> AppResult<Self> {
        let mut seen = HashSet::new();
        for (topic, _) in routes {
            if !seen.insert(*topic) {
                return Err(AppError::Config(format!(
                    "inbound topic {} is routed more than once",
                    topic.identity()
                )));
            }
        }

        if let Some(missing) = InboundTopic::ALL.iter().find(|topic| !seen.contains(*topic)) {
            return Err(AppError::Config(format!(
                "no route for inbound topic {}",
                missing.identity()
            )));
        }

        Ok(Self {
            routes: routes.to_vec(),
        })
    }

    pub fn standard() -> AppResult<Self> {
        Self::new(&[
            (InboundTopic::NewUserE2EKeys, CommandKind::SaveRegistrationKeys),
            (
                InboundTopic::DeleteOneTimePublicKeysByUuidChat,
                CommandKind::DeleteConsumedKeys,
            ),
        ])
    }

    pub fn topics(&self) -> impl Iterator<Item = InboundTopic> + '_ {
        self.routes.iter().map(|(topic, _)| *topic)
    }

    pub fn resolve(&self, routing_key: &str) -> Option<CommandKind> {
        let topic = InboundTopic::from_routing_key(routing_key)?;
        self.routes
            .iter()
            .find(|(routed, _)| *routed == topic)
            .map(|(_, kind)| *kind)
    }

    /// `Ok(None)` for deliveries on topics without a route.
    pub fn decode(&self, delivery: &Delivery) -> AppResult<Option<Command>> {
        let Some(kind) = self.resolve(&delivery.routing_key) else {
            return Ok(None);
        };
        let malformed = |reason: String| AppError::malformed(delivery.routing_key.as_str(), reason);

        let command = match kind {
            CommandKind::SaveRegistrationKeys => {
                let batch: KeyBatch = serde_json::from_slice(&delivery.payload)
                    .map_err(|e| malformed(e.to_string()))?;
                batch.validate().map_err(malformed)?;
                Command::SaveRegistrationKeys {
                    batch,
                    raw: delivery.payload.clone(),
                }
            }
            CommandKind::DeleteConsumedKeys => {
                let message: ConsumedKeysMessage = serde_json::from_slice(&delivery.payload)
                    .map_err(|e| malformed(e.to_string()))?;
                Command::DeleteConsumedKeys {
                    message,
                    raw: delivery.payload.clone(),
                }
            }
        };

        Ok(Some(command))
    }
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, command: Command) -> AppResult<()>;
}

pub struct TopicRouter {
    connection: Arc<BrokerConnection>,
    routes: RouteTable,
    handler: Arc<dyn CommandHandler>,
    operation_timeout: Duration,
}

impl TopicRouter {
    pub fn new(
        connection: Arc<BrokerConnection>,
        routes: RouteTable,
        handler: Arc<dyn CommandHandler>,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            connection,
            routes,
            handler,
            operation_timeout,
        }
    }

    /// Consume until the connection owner goes away.
    pub async fn run(self) {
        let mut state = self.connection.subscribe();
        let mut subscribed_epoch = None;

        loop {
            let Some((session, epoch)) = next_session(&mut state, subscribed_epoch).await else {
                info!("Broker connection dropped, router stopping");
                return;
            };

            let (sink, mut deliveries) = mpsc::channel(DELIVERY_BUFFER);
            if let Err(e) = self.subscribe_all(&session, &sink).await {
                error!(epoch, error = %e, "Failed to subscribe inbound topics");
                drop(deliveries);
                sleep(RESUBSCRIBE_DELAY).await;
                continue;
            }
            drop(sink);
            drop(session);

            subscribed_epoch = Some(epoch);
            info!(epoch, "Inbound topics subscribed");

            self.pump(&mut deliveries, &mut state, epoch).await;
        }
    }

    async fn subscribe_all(
        &self,
        session: &Arc<dyn BusSession>,
        sink: &mpsc::Sender<Delivery>,
    ) -> AppResult<()> {
        for topic in self.routes.topics() {
            let identity = topic.identity();
            bounded("declare_topic", self.operation_timeout, session.declare_topic(&identity))
                .await?;
            bounded(
                "subscribe",
                self.operation_timeout,
                session.subscribe(&identity, sink.clone()),
            )
            .await?;
            debug!(topic = %identity, "Subscribed");
        }
        Ok(())
    }

    async fn pump(
        &self,
        deliveries: &mut mpsc::Receiver<Delivery>,
        state: &mut watch::Receiver<ConnectionState>,
        epoch: u64,
    ) {
        loop {
            tokio::select! {
                delivery = deliveries.recv() => match delivery {
                    Some(delivery) => self.dispatch(delivery).await,
                    None => {
                        warn!(epoch, "Inbound subscriptions ended");
                        return;
                    }
                },
                changed = state.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    if state.borrow_and_update().epoch() != Some(epoch) {
                        info!(epoch, "Session ended, waiting to resubscribe");
                        return;
                    }
                }
            }
        }
    }

    async fn dispatch(&self, delivery: Delivery) {
        metrics::record_consumed(&delivery.routing_key);

        match self.routes.decode(&delivery) {
            Ok(Some(command)) => {
                if let Err(e) = self.handler.handle(command).await {
                    error!(
                        routing_key = %delivery.routing_key,
                        error = %e,
                        "Failed to handle inbound message"
                    );
                }
            }
            Ok(None) => {
                debug!(routing_key = %delivery.routing_key, "No route for delivery, dropping");
                metrics::record_dropped(&delivery.routing_key, "unrouted");
            }
            Err(e) => {
                warn!(routing_key = %delivery.routing_key, error = %e, "Dropping malformed message");
                metrics::record_dropped(&delivery.routing_key, "malformed");
            }
        }
    }
}

/// Next connected session whose epoch differs from `skip`; `None` once the sender is gone.
async fn next_session(
    state: &mut watch::Receiver<ConnectionState>,
    skip: Option<u64>,
) -> Option<(Arc<dyn BusSession>, u64)> {
    loop {
        let current = match &*state.borrow_and_update() {
            ConnectionState::Connected { session, epoch } if Some(*epoch) != skip => {
                Some((session.clone(), *epoch))
            }
            _ => None,
        };
        if current.is_some() {
            return current;
        }
        state.changed().await.ok()?;
    }
}
