/// Kafka binding for the topic bus
///
/// The routing key `exchange.topic` is the Kafka topic name. Each subscription
/// gets its own consumer group starting at the latest offset with auto-commit,
/// so nothing is replayed and nothing outlives the subscription.
use super::{BusSession, Delivery, SessionEnd, Transport};
use crate::config::KafkaConfig;
use crate::error::{AppError, AppResult};
use crate::topics::TopicIdentity;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashSet;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::RDKafkaErrorCode;
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct KafkaTransport {
    config: KafkaConfig,
    operation_timeout: Duration,
}

impl KafkaTransport {
    /// `operation_timeout` bounds each publish, both in librdkafka and on the send future.
    pub fn new(config: KafkaConfig, operation_timeout: Duration) -> Self {
        Self {
            config,
            operation_timeout,
        }
    }
}

fn producer_config(config: &KafkaConfig, operation_timeout: Duration) -> ClientConfig {
    let mut client = ClientConfig::new();
    client
        .set("bootstrap.servers", &config.brokers)
        .set("client.id", &config.client_id)
        .set(
            "message.timeout.ms",
            operation_timeout.as_millis().to_string(),
        )
        .set("acks", "all");
    client
}

#[async_trait]
impl Transport for KafkaTransport {
    async fn connect(&self) -> AppResult<Arc<dyn BusSession>> {
        info!(
            "Connecting to Kafka: brokers={}, client_id={}",
            self.config.brokers, self.config.client_id
        );

        let producer: FutureProducer = producer_config(&self.config, self.operation_timeout)
            .create()
            .map_err(|e| {
                AppError::TransportUnavailable(format!("Failed to create Kafka producer: {}", e))
            })?;

        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &self.config.brokers)
            .set("client.id", &self.config.client_id)
            .create()
            .map_err(|e| {
                AppError::TransportUnavailable(format!("Failed to create Kafka admin client: {}", e))
            })?;

        probe_metadata(&producer, self.config.metadata_timeout())
            .await
            .map_err(AppError::TransportUnavailable)?;

        let (alive, _) = watch::channel(true);
        Ok(Arc::new(KafkaSession {
            producer,
            admin,
            config: self.config.clone(),
            operation_timeout: self.operation_timeout,
            declared: DashSet::new(),
            alive,
        }))
    }
}

pub struct KafkaSession {
    producer: FutureProducer,
    admin: AdminClient<DefaultClientContext>,
    config: KafkaConfig,
    operation_timeout: Duration,
    declared: DashSet<String>,
    alive: watch::Sender<bool>,
}

#[async_trait]
impl BusSession for KafkaSession {
    async fn declare_topic(&self, topic: &TopicIdentity) -> AppResult<()> {
        let name = topic.routing_key();
        if self.declared.contains(&name) {
            return Ok(());
        }

        let new_topic = NewTopic::new(
            &name,
            self.config.topic_partitions,
            TopicReplication::Fixed(self.config.topic_replication),
        );
        let options = AdminOptions::new().operation_timeout(Some(self.config.metadata_timeout()));

        let results = self
            .admin
            .create_topics(&[new_topic], &options)
            .await
            .map_err(|e| AppError::Publish(format!("Failed to create topic {}: {}", name, e)))?;

        for result in results {
            match result {
                Ok(_) | Err((_, RDKafkaErrorCode::TopicAlreadyExists)) => {}
                Err((topic, code)) => {
                    return Err(AppError::Publish(format!(
                        "Failed to create topic {}: {:?}",
                        topic, code
                    )));
                }
            }
        }

        debug!(topic = %name, "Topic declared");
        self.declared.insert(name);
        Ok(())
    }

    async fn publish(&self, topic: &TopicIdentity, payload: Bytes) -> AppResult<()> {
        let name = topic.routing_key();
        let record = FutureRecord::<(), [u8]>::to(&name).payload(&payload[..]);

        self.producer
            .send(record, self.operation_timeout)
            .await
            .map_err(|(e, _)| AppError::Publish(format!("Failed to publish to {}: {}", name, e)))?;

        debug!(topic = %name, bytes = payload.len(), "Message published");
        Ok(())
    }

    async fn subscribe(&self, topic: &TopicIdentity, sink: mpsc::Sender<Delivery>) -> AppResult<()> {
        let name = topic.routing_key();
        let group_id = format!("{}-{}", self.config.group_prefix, Uuid::new_v4());

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.config.brokers)
            .set("client.id", &self.config.client_id)
            .set("group.id", &group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "latest")
            .set("session.timeout.ms", "30000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| AppError::ConnectionLost(format!("Failed to create Kafka consumer: {}", e)))?;

        consumer
            .subscribe(&[&name])
            .map_err(|e| AppError::ConnectionLost(format!("Failed to subscribe to {}: {}", name, e)))?;

        info!(topic = %name, group_id = %group_id, "Subscribed to Kafka topic");

        tokio::spawn(consume(consumer, name, sink, self.alive.subscribe()));
        Ok(())
    }

    async fn closed(&self) -> SessionEnd {
        let mut ticker = interval(self.config.health_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let end = loop {
            ticker.tick().await;
            if let Err(reason) = probe_metadata(&self.producer, self.config.metadata_timeout()).await {
                break SessionEnd::Failed(reason);
            }
        };

        self.alive.send_replace(false);
        end
    }
}

impl Drop for KafkaSession {
    fn drop(&mut self) {
        self.alive.send_replace(false);
    }
}

async fn consume(
    consumer: StreamConsumer,
    topic: String,
    sink: mpsc::Sender<Delivery>,
    mut alive: watch::Receiver<bool>,
) {
    loop {
        let delivery = tokio::select! {
            changed = alive.changed() => {
                if changed.is_err() || !*alive.borrow() {
                    break;
                }
                continue;
            }
            _ = sink.closed() => break,
            received = consumer.recv() => match received {
                Ok(message) => Delivery {
                    routing_key: message.topic().to_string(),
                    payload: Bytes::copy_from_slice(message.payload().unwrap_or_default()),
                },
                Err(e) => {
                    warn!(topic = %topic, "Kafka recv error: {}", e);
                    continue;
                }
            },
        };

        if sink.send(delivery).await.is_err() {
            break;
        }
    }

    debug!(topic = %topic, "Kafka subscription ended");
}

/// Broker liveness check. `fetch_metadata` blocks, so it runs off the async workers.
async fn probe_metadata(producer: &FutureProducer, limit: Duration) -> Result<(), String> {
    let producer = producer.clone();
    tokio::task::spawn_blocking(move || {
        let metadata = producer
            .client()
            .fetch_metadata(None, limit)
            .map_err(|e| format!("Failed to fetch Kafka metadata: {}", e))?;

        if metadata.brokers().is_empty() {
            return Err("No Kafka brokers available".to_string());
        }
        Ok(())
    })
    .await
    .map_err(|e| format!("Failed to join metadata probe: {}", e))?
}
