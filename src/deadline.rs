/// Bounded execution for store and bus calls
use crate::error::{AppError, AppResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

/// Execute a fallible future, failing with `AppError::Timeout` once `limit` elapses.
pub async fn bounded<F, T>(operation: &'static str, limit: Duration, future: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    match timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Timeout {
            operation,
            elapsed: limit,
        }),
    }
}
