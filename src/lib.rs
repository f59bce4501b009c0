pub mod bus;
pub mod config;
pub mod db;
pub mod deadline;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;
pub mod state;
pub mod store;
pub mod topics;

pub use error::{AppError, AppResult};
