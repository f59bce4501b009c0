use super::BrokerConnection;
use crate::deadline::bounded;
use crate::error::AppResult;
use crate::metrics;
use crate::services::alerts::AlertSink;
use crate::topics::TopicIdentity;
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Fire-and-forget publishing. Messages are never queued or retried.
#[derive(Clone)]
pub struct Publisher {
    connection: Arc<BrokerConnection>,
    alerts: Arc<dyn AlertSink>,
    ready_timeout: Duration,
    operation_timeout: Duration,
}

impl Publisher {
    pub fn new(
        connection: Arc<BrokerConnection>,
        alerts: Arc<dyn AlertSink>,
        ready_timeout: Duration,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            connection,
            alerts,
            ready_timeout,
            operation_timeout,
        }
    }

    pub async fn publish(&self, topic: TopicIdentity, payload: impl Into<Bytes>) -> AppResult<()> {
        let routing_key = topic.routing_key();

        let session = match self.connection.ready(self.ready_timeout).await {
            Ok(session) => session,
            Err(e) => {
                warn!(routing_key = %routing_key, "Dropping message: {}", e);
                metrics::record_publish(&routing_key, false);
                self.alerts.alert(
                    "Message bus unavailable",
                    &format!("Message for {} was dropped: {}", routing_key, e),
                );
                return Err(e);
            }
        };

        let payload = payload.into();
        let result = async {
            bounded("declare_topic", self.operation_timeout, session.declare_topic(&topic)).await?;
            bounded("publish", self.operation_timeout, session.publish(&topic, payload)).await
        }
        .await;

        metrics::record_publish(&routing_key, result.is_ok());
        match &result {
            Ok(()) => debug!(routing_key = %routing_key, "Published"),
            Err(e) => error!(routing_key = %routing_key, error = %e, "Publish failed"),
        }
        result
    }

    pub async fn publish_json<T: Serialize + ?Sized>(
        &self,
        topic: TopicIdentity,
        value: &T,
    ) -> AppResult<()> {
        let payload = serde_json::to_vec(value)?;
        self.publish(topic, payload).await
    }
}
