/// One-time pre-key lifecycle
///
/// Every operation mutates the key store first and only then fans out. Query-side
/// mirrors go to `apiE2EQ`; acknowledgements go to the service that asked.
use crate::bus::{CommandHandler, Publisher};
use crate::deadline::bounded;
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{
    Command, ConsumedKeysMessage, KeyBatch, ReregisteredKeysEnvelope, Status, StatusEnvelope,
    UploadedKeysEnvelope,
};
use crate::services::alerts::AlertSink;
use crate::store::KeyStore;
use crate::topics::OutboundTopic;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

pub struct KeyLifecycleService {
    store: Arc<dyn KeyStore>,
    publisher: Publisher,
    alerts: Arc<dyn AlertSink>,
    store_timeout: Duration,
}

impl KeyLifecycleService {
    pub fn new(
        store: Arc<dyn KeyStore>,
        publisher: Publisher,
        alerts: Arc<dyn AlertSink>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            publisher,
            alerts,
            store_timeout,
        }
    }

    /// Store a freshly generated batch and mirror it to the query side.
    pub async fn upload_public_keys(&self, batch: &KeyBatch) -> AppResult<()> {
        batch.validate().map_err(AppError::BadRequest)?;

        let inserted = match self
            .run_store("insert_batch", self.store.insert_batch(&batch.keys))
            .await
        {
            Ok(inserted) => inserted,
            Err(e) => {
                error!(keys = batch.len(), error = %e, "Failed to store uploaded pre-keys");
                self.alerts
                    .alert("uploadPublicKeys failed", &format!("{} keys not stored: {}", batch.len(), e));
                return Err(e);
            }
        };
        info!(inserted, "Stored uploaded pre-keys");

        let envelope = UploadedKeysEnvelope {
            status: Status::Ok,
            keys: serde_json::to_string(batch)?,
        };
        self.fan_out(OutboundTopic::NewUserE2EKeys, &envelope).await;
        Ok(())
    }

    /// Replace every stored key of `user_id` with `batch`.
    pub async fn upload_reregister_public_keys(&self, user_id: i64, batch: &KeyBatch) -> AppResult<()> {
        batch.validate().map_err(AppError::BadRequest)?;

        let result = self
            .run_store(
                "replace_keys_for_user",
                self.store.replace_keys_for_user(user_id, &batch.keys),
            )
            .await;

        let inserted = match result {
            Ok(inserted) => inserted,
            Err(e) => {
                error!(user_id, error = %e, "Failed to re-register pre-keys");
                self.alerts.alert(
                    "uploadReRegisterPublicKeys failed",
                    &format!("user {}: {}", user_id, e),
                );
                return Err(e);
            }
        };
        info!(user_id, inserted, "Re-registered pre-keys");

        let envelope = ReregisteredKeysEnvelope {
            status: Status::Ok,
            batch: batch.clone(),
        };
        self.fan_out(OutboundTopic::ReregisterUserE2EKeys, &envelope).await;
        Ok(())
    }

    /// Registration batch from the user service. No ack is sent when the insert fails.
    pub async fn save_registration_public_keys(&self, batch: &KeyBatch, raw: Bytes) -> AppResult<()> {
        let inserted = match self
            .run_store("insert_batch", self.store.insert_batch(&batch.keys))
            .await
        {
            Ok(inserted) => inserted,
            Err(e) => {
                error!(keys = batch.len(), error = %e, "Failed to save registration pre-keys");
                self.alerts.alert(
                    "saveRegistrationPublicKeys failed",
                    &format!("{} keys not stored: {}", batch.len(), e),
                );
                return Err(e);
            }
        };
        info!(inserted, "Saved registration pre-keys");

        self.fan_out(OutboundTopic::UserCE2EKeys, &StatusEnvelope::ok()).await;
        self.fan_out_raw(OutboundTopic::NewUserE2EKeys, raw).await;
        Ok(())
    }

    /// Consumed pair reported by the chat service. Exactly one reply goes back either way.
    pub async fn delete_one_time_public_keys_by_uuid(
        &self,
        message: &ConsumedKeysMessage,
        raw: Bytes,
    ) -> AppResult<()> {
        let result = self
            .run_store(
                "delete_keys_by_uuid_pair",
                self.store
                    .delete_keys_by_uuid_pair(&message.contact_key_uuid, &message.user_key_uuid),
            )
            .await;

        match result {
            Ok(()) => {
                info!(
                    contact_key_uuid = %message.contact_key_uuid,
                    user_key_uuid = %message.user_key_uuid,
                    "Deleted consumed pre-keys"
                );
                self.fan_out_raw(OutboundTopic::DeleteOneTimePublicKeysByUuid, raw)
                    .await;
                self.fan_out(OutboundTopic::DeleteOneTimePublicKeysByUuidC, &StatusEnvelope::ok())
                    .await;
                Ok(())
            }
            Err(e) => {
                warn!(
                    contact_key_uuid = %message.contact_key_uuid,
                    user_key_uuid = %message.user_key_uuid,
                    error = %e,
                    "Failed to delete consumed pre-keys"
                );
                self.fan_out(OutboundTopic::DeleteOneTimePublicKeysByUuidC, &StatusEnvelope::error())
                    .await;
                Err(e)
            }
        }
    }

    async fn run_store<T, F>(&self, operation: &'static str, future: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>>,
    {
        let started = Instant::now();
        let result = bounded(operation, self.store_timeout, future)
            .await
            .map_err(|e| match e {
                timeout @ AppError::Timeout { .. } => AppError::Store(timeout.to_string()),
                other => other,
            });
        metrics::observe_store_operation(operation, result.is_ok(), started.elapsed());
        result
    }

    // The mutation already happened, so publish failures are only logged here.
    async fn fan_out<T: Serialize + ?Sized>(&self, topic: OutboundTopic, value: &T) {
        if let Err(e) = self.publisher.publish_json(topic.identity(), value).await {
            warn!(topic = %topic.identity(), error = %e, "Fan-out failed after store mutation");
        }
    }

    async fn fan_out_raw(&self, topic: OutboundTopic, payload: Bytes) {
        if let Err(e) = self.publisher.publish(topic.identity(), payload).await {
            warn!(topic = %topic.identity(), error = %e, "Fan-out failed after store mutation");
        }
    }
}

#[async_trait]
impl CommandHandler for KeyLifecycleService {
    async fn handle(&self, command: Command) -> AppResult<()> {
        match command {
            Command::SaveRegistrationKeys { batch, raw } => {
                self.save_registration_public_keys(&batch, raw).await
            }
            Command::DeleteConsumedKeys { message, raw } => {
                self.delete_one_time_public_keys_by_uuid(&message, raw).await
            }
        }
    }
}
