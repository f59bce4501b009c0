use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One-time pre-key public half as it travels between services.
///
/// The key material is carried as a string and persisted as its UTF-8 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreKeyRecord {
    pub user_id: i64,
    #[serde(rename = "one_time_pre_key_pair_pbk")]
    pub public_key: String,
    #[serde(rename = "one_time_pre_key_pair_uuid")]
    pub key_uuid: String,
}

impl PreKeyRecord {
    pub fn new(user_id: i64, public_key: impl Into<String>, key_uuid: impl Into<String>) -> Self {
        Self {
            user_id,
            public_key: public_key.into(),
            key_uuid: key_uuid.into(),
        }
    }
}

/// Ordered batch of pre-keys, wire shape `{"oneTimePreKeyPairPbks": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyBatch {
    #[serde(rename = "oneTimePreKeyPairPbks")]
    pub keys: Vec<PreKeyRecord>,
}

impl KeyBatch {
    pub fn new(keys: Vec<PreKeyRecord>) -> Self {
        Self { keys }
    }

    /// Decode the JSON text carried in the `oneTimePreKeyPairPbks` query parameter.
    pub fn parse(raw: &str) -> AppResult<Self> {
        serde_json::from_str(raw)
            .map_err(|e| AppError::BadRequest(format!("invalid key batch: {e}")))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Key UUIDs must be non-empty and unique within the batch.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = HashSet::with_capacity(self.keys.len());
        for key in &self.keys {
            if key.key_uuid.is_empty() {
                return Err(format!("empty key uuid for user {}", key.user_id));
            }
            if !seen.insert(key.key_uuid.as_str()) {
                return Err(format!("duplicate key uuid {}", key.key_uuid));
            }
        }
        Ok(())
    }
}
