//! Pre-key upload endpoints
//!
//! The gateway forwards client uploads as query parameters. The batch arrives as
//! JSON text in `oneTimePreKeyPairPbks`; the reply is the JSON string `"success"`
//! or `"error"`.

use crate::error::AppError;
use crate::models::KeyBatch;
use crate::state::AppState;
use actix_web::{post, web, HttpResponse};
use serde::Deserialize;
use tracing::instrument;

#[derive(Debug, Deserialize)]
pub struct UploadKeysQuery {
    #[serde(rename = "oneTimePreKeyPairPbks")]
    pub one_time_pre_key_pair_pbks: String,
}

#[derive(Debug, Deserialize)]
pub struct ReRegisterKeysQuery {
    #[serde(rename = "userId")]
    pub user_id: i64,
    #[serde(rename = "oneTimePreKeyPairPbks")]
    pub one_time_pre_key_pair_pbks: String,
}

/// POST /uploadPublicKeys
#[post("/uploadPublicKeys")]
#[instrument(skip_all)]
pub async fn upload_public_keys(
    state: web::Data<AppState>,
    query: web::Query<UploadKeysQuery>,
) -> Result<HttpResponse, AppError> {
    let batch = KeyBatch::parse(&query.one_time_pre_key_pair_pbks)?;
    state.keys.upload_public_keys(&batch).await?;
    Ok(HttpResponse::Ok().json("success"))
}

/// POST /uploadReRegisterPublicKeys
#[post("/uploadReRegisterPublicKeys")]
#[instrument(skip_all, fields(user_id = query.user_id))]
pub async fn upload_reregister_public_keys(
    state: web::Data<AppState>,
    query: web::Query<ReRegisterKeysQuery>,
) -> Result<HttpResponse, AppError> {
    let batch = KeyBatch::parse(&query.one_time_pre_key_pair_pbks)?;
    state
        .keys
        .upload_reregister_public_keys(query.user_id, &batch)
        .await?;
    Ok(HttpResponse::Ok().json("success"))
}
