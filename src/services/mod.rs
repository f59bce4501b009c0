pub mod alerts;
pub mod key_lifecycle;

pub use alerts::{AlertSink, EmailAlerts, LogAlerts};
pub use key_lifecycle::KeyLifecycleService;
