pub mod postgres;

pub use postgres::PgKeyStore;

use crate::error::AppResult;
use crate::models::PreKeyRecord;
use async_trait::async_trait;

/// Persistent store of one-time pre-key records.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Insert every record or none of them. Returns the number of rows written.
    async fn insert_batch(&self, keys: &[PreKeyRecord]) -> AppResult<u64>;

    /// Drop every key of `user_id` and insert `keys` in one transaction.
    /// On failure the user's previous keys are left in place.
    async fn replace_keys_for_user(&self, user_id: i64, keys: &[PreKeyRecord]) -> AppResult<u64>;

    /// Remove the contact's and the user's consumed keys.
    async fn delete_keys_by_uuid_pair(&self, contact_uuid: &str, user_uuid: &str) -> AppResult<()>;
}
