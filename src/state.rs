use crate::{bus::BrokerConnection, services::KeyLifecycleService};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub keys: Arc<KeyLifecycleService>,
    /// Readiness probe source
    pub connection: Arc<BrokerConnection>,
}
