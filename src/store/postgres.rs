use super::KeyStore;
use crate::error::AppResult;
use crate::models::PreKeyRecord;
use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use tracing::debug;

/// Rows per INSERT statement; keeps bind parameters well under the Postgres limit.
const INSERT_CHUNK_SIZE: usize = 1000;

#[derive(Clone)]
pub struct PgKeyStore {
    pool: PgPool,
}

impl PgKeyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Multi-row INSERTs on an open connection, one statement per chunk.
async fn insert_chunks(conn: &mut PgConnection, keys: &[PreKeyRecord]) -> Result<u64, sqlx::Error> {
    let mut inserted = 0;

    for chunk in keys.chunks(INSERT_CHUNK_SIZE) {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO user_one_time_pre_key_pair \
             (user_id, one_time_pre_key_pair_pbk, one_time_pre_key_pair_uuid) ",
        );
        builder.push_values(chunk, |mut row, key| {
            row.push_bind(key.user_id)
                .push_bind(key.public_key.as_bytes().to_vec())
                .push_bind(key.key_uuid.clone());
        });

        inserted += builder.build().execute(&mut *conn).await?.rows_affected();
    }

    Ok(inserted)
}

#[async_trait]
impl KeyStore for PgKeyStore {
    async fn insert_batch(&self, keys: &[PreKeyRecord]) -> AppResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let inserted = insert_chunks(&mut tx, keys).await?;
        tx.commit().await?;

        debug!(rows = inserted, "Inserted one-time pre-keys");
        Ok(inserted)
    }

    async fn replace_keys_for_user(&self, user_id: i64, keys: &[PreKeyRecord]) -> AppResult<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("CALL delete_old_one_time_public_keys_by_user_id($1)")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        let inserted = insert_chunks(&mut tx, keys).await?;

        // Dropping an uncommitted transaction rolls the delete back
        tx.commit().await?;

        debug!(user_id, rows = inserted, "Replaced one-time pre-keys");
        Ok(inserted)
    }

    async fn delete_keys_by_uuid_pair(&self, contact_uuid: &str, user_uuid: &str) -> AppResult<()> {
        sqlx::query("CALL delete_one_time_public_keys_by_uuid($1, $2)")
            .bind(contact_uuid)
            .bind(user_uuid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
