pub mod envelope;
pub mod pre_key;

pub use envelope::{
    Command, ConsumedKeysMessage, ReregisteredKeysEnvelope, Status, StatusEnvelope,
    UploadedKeysEnvelope,
};
pub use pre_key::{KeyBatch, PreKeyRecord};
