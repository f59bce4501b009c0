//! HTTP surface: key uploads plus health, readiness and metrics

pub mod keys;

use crate::metrics;
use crate::state::AppState;
use actix_web::{error::InternalError, get, web, HttpResponse};
use tracing::debug;

#[get("/health")]
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().body("OK")
}

/// 200 only while a broker session is up.
#[get("/ready")]
pub async fn ready(state: web::Data<AppState>) -> HttpResponse {
    if state.connection.is_connected() {
        HttpResponse::Ok().body("READY")
    } else {
        HttpResponse::ServiceUnavailable().body("NOT READY")
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    // Missing or unparsable query parameters answer like every other failure
    let query_config = web::QueryConfig::default().error_handler(|err, _req| {
        debug!(error = %err, "Rejected query parameters");
        InternalError::from_response(err, HttpResponse::BadRequest().json("error")).into()
    });

    cfg.app_data(query_config)
        .service(health)
        .service(ready)
        .route("/metrics", web::get().to(metrics::serve_metrics))
        .service(keys::upload_public_keys)
        .service(keys::upload_reregister_public_keys);
}
