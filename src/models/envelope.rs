//! Bus message envelopes and the decoded inbound commands.

use super::pre_key::KeyBatch;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

/// `{"status": "ok" | "error"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEnvelope {
    pub status: Status,
}

impl StatusEnvelope {
    pub fn ok() -> Self {
        Self { status: Status::Ok }
    }

    pub fn error() -> Self {
        Self {
            status: Status::Error,
        }
    }
}

/// Fan-out for a fresh upload. `keys` holds the batch as JSON text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedKeysEnvelope {
    pub status: Status,
    pub keys: String,
}

/// Fan-out for a re-registration: the batch object with `status` added.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReregisteredKeysEnvelope {
    pub status: Status,
    #[serde(flatten)]
    pub batch: KeyBatch,
}

/// Consumed key pair reported by the chat service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumedKeysMessage {
    #[serde(rename = "contactPublicKeyUUID", alias = "contactKeyUUID")]
    pub contact_key_uuid: String,
    #[serde(rename = "userPublicKeyUUID", alias = "userKeyUUID")]
    pub user_key_uuid: String,
}

/// A decoded inbound message. `raw` keeps the delivered bytes for verbatim republishing.
#[derive(Debug, Clone)]
pub enum Command {
    SaveRegistrationKeys { batch: KeyBatch, raw: Bytes },
    DeleteConsumedKeys { message: ConsumedKeysMessage, raw: Bytes },
}
