/// Shared fixtures: in-memory key store, recording alerts, service harness
use super::memory_bus::MemoryBus;
use async_trait::async_trait;
use e2e_key_service::bus::{BrokerConnection, CommandHandler, Publisher, RouteTable, TopicRouter};
use e2e_key_service::error::{AppError, AppResult};
use e2e_key_service::models::{KeyBatch, PreKeyRecord};
use e2e_key_service::services::{AlertSink, KeyLifecycleService};
use e2e_key_service::store::KeyStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

pub const RECONNECT_DELAY: Duration = Duration::from_millis(20);
pub const READY_TIMEOUT: Duration = Duration::from_millis(200);
pub const OPERATION_TIMEOUT: Duration = Duration::from_secs(1);
pub const STORE_TIMEOUT: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    InsertBatch(Vec<String>),
    DeleteForUser(i64),
    DeleteByUuidPair(String, String),
}

/// Key store backed by a Vec, with unique-uuid enforcement and failure switches.
#[derive(Default)]
pub struct MemoryKeyStore {
    rows: Mutex<Vec<PreKeyRecord>>,
    calls: Mutex<Vec<StoreCall>>,
    fail_insert: AtomicBool,
    fail_delete: AtomicBool,
    stall: AtomicBool,
}

impl MemoryKeyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_rows(rows: Vec<PreKeyRecord>) -> Arc<Self> {
        let store = Self::default();
        *store.rows.lock().unwrap() = rows;
        Arc::new(store)
    }

    pub fn fail_inserts(&self) {
        self.fail_insert.store(true, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self) {
        self.fail_delete.store(true, Ordering::SeqCst);
    }

    /// Every call hangs past the store timeout.
    pub fn stall(&self) {
        self.stall.store(true, Ordering::SeqCst);
    }

    pub fn rows(&self) -> Vec<PreKeyRecord> {
        self.rows.lock().unwrap().clone()
    }

    pub fn uuids(&self) -> Vec<String> {
        self.rows().into_iter().map(|r| r.key_uuid).collect()
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    async fn enter(&self, call: StoreCall) {
        self.calls.lock().unwrap().push(call);
        if self.stall.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn insert_batch(&self, keys: &[PreKeyRecord]) -> AppResult<u64> {
        self.enter(StoreCall::InsertBatch(uuids_of(keys))).await;
        if self.fail_insert.load(Ordering::SeqCst) {
            return Err(AppError::Store("simulated insert failure".into()));
        }

        let mut rows = self.rows.lock().unwrap();
        check_unique(&rows, keys)?;
        rows.extend_from_slice(keys);
        Ok(keys.len() as u64)
    }

    async fn replace_keys_for_user(&self, user_id: i64, keys: &[PreKeyRecord]) -> AppResult<u64> {
        self.enter(StoreCall::DeleteForUser(user_id)).await;
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(AppError::Store("simulated delete failure".into()));
        }
        self.enter(StoreCall::InsertBatch(uuids_of(keys))).await;
        if self.fail_insert.load(Ordering::SeqCst) {
            return Err(AppError::Store("simulated insert failure".into()));
        }

        // Rows only change once the whole replacement is known to succeed
        let mut rows = self.rows.lock().unwrap();
        let mut remaining: Vec<PreKeyRecord> =
            rows.iter().filter(|r| r.user_id != user_id).cloned().collect();
        check_unique(&remaining, keys)?;
        remaining.extend_from_slice(keys);
        *rows = remaining;
        Ok(keys.len() as u64)
    }

    async fn delete_keys_by_uuid_pair(&self, contact_uuid: &str, user_uuid: &str) -> AppResult<()> {
        self.enter(StoreCall::DeleteByUuidPair(
            contact_uuid.to_string(),
            user_uuid.to_string(),
        ))
        .await;
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(AppError::Store("simulated delete failure".into()));
        }
        self.rows
            .lock()
            .unwrap()
            .retain(|r| r.key_uuid != contact_uuid && r.key_uuid != user_uuid);
        Ok(())
    }
}

fn uuids_of(keys: &[PreKeyRecord]) -> Vec<String> {
    keys.iter().map(|k| k.key_uuid.clone()).collect()
}

/// Unique-constraint check on `one_time_pre_key_pair_uuid`.
fn check_unique(rows: &[PreKeyRecord], keys: &[PreKeyRecord]) -> AppResult<()> {
    for (i, key) in keys.iter().enumerate() {
        let clash = rows.iter().any(|r| r.key_uuid == key.key_uuid)
            || keys[..i].iter().any(|k| k.key_uuid == key.key_uuid);
        if clash {
            return Err(AppError::Store(format!(
                "duplicate key value violates unique constraint: {}",
                key.key_uuid
            )));
        }
    }
    Ok(())
}

#[derive(Default)]
pub struct RecordingAlerts {
    alerts: Mutex<Vec<(String, String)>>,
}

impl RecordingAlerts {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subjects(&self) -> Vec<String> {
        self.alerts
            .lock()
            .unwrap()
            .iter()
            .map(|(subject, _)| subject.clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.alerts.lock().unwrap().len()
    }
}

impl AlertSink for RecordingAlerts {
    fn alert(&self, subject: &str, detail: &str) {
        self.alerts
            .lock()
            .unwrap()
            .push((subject.to_string(), detail.to_string()));
    }
}

/// Memory bus plus a running broker connection. Background tasks stop on drop.
pub struct Harness {
    pub bus: MemoryBus,
    pub alerts: Arc<RecordingAlerts>,
    pub connection: Arc<BrokerConnection>,
    pub publisher: Publisher,
    tasks: Vec<JoinHandle<()>>,
}

impl Harness {
    /// Harness whose broker connection is already up.
    pub async fn connected() -> Self {
        let harness = Self::start(MemoryBus::new());
        harness
            .connection
            .ready(Duration::from_secs(2))
            .await
            .expect("memory bus connects");
        harness
    }

    /// Harness whose broker refuses every connection attempt.
    pub fn unreachable() -> Self {
        let bus = MemoryBus::new();
        bus.refuse_connections(true);
        Self::start(bus)
    }

    pub fn start(bus: MemoryBus) -> Self {
        let alerts = RecordingAlerts::new();
        let connection = BrokerConnection::new(bus.transport(), RECONNECT_DELAY);
        let task = tokio::spawn(connection.clone().run());
        let publisher = Publisher::new(
            connection.clone(),
            alerts.clone(),
            READY_TIMEOUT,
            OPERATION_TIMEOUT,
        );

        Self {
            bus,
            alerts,
            connection,
            publisher,
            tasks: vec![task],
        }
    }

    pub fn service(&self, store: Arc<dyn KeyStore>) -> Arc<KeyLifecycleService> {
        Arc::new(KeyLifecycleService::new(
            store,
            self.publisher.clone(),
            self.alerts.clone(),
            STORE_TIMEOUT,
        ))
    }

    /// Start a router over the standard route table and wait for its subscriptions.
    pub async fn start_router(&mut self, handler: Arc<dyn CommandHandler>) {
        let router = TopicRouter::new(
            self.connection.clone(),
            RouteTable::standard().expect("standard route table"),
            handler,
            OPERATION_TIMEOUT,
        );
        self.tasks.push(tokio::spawn(router.run()));
        self.wait_for_subscriptions().await;
    }

    pub async fn wait_for_subscriptions(&self) {
        let bus = self.bus.clone();
        wait_until("inbound subscriptions", || {
            bus.subscriber_count("apiE2EC.newUserE2EKeys") > 0
                && bus.subscriber_count("apiE2EC.deleteOneTimePublicKeysByUUIDChat") > 0
        })
        .await;
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn batch(user_id: i64, uuids: &[&str]) -> KeyBatch {
    KeyBatch::new(
        uuids
            .iter()
            .map(|uuid| PreKeyRecord::new(user_id, format!("pbk-{uuid}"), *uuid))
            .collect(),
    )
}

pub fn batch_json(batch: &KeyBatch) -> String {
    serde_json::to_string(batch).expect("batch serializes")
}
