use crate::db::DbConfig;
use crate::error::AppError;
use dotenvy::dotenv;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    pub client_id: String,
    /// Prefix for the per-subscription consumer groups
    pub group_prefix: String,
    pub topic_partitions: i32,
    pub topic_replication: i32,
    pub health_interval_ms: u64,
    pub metadata_timeout_ms: u64,
}

impl KafkaConfig {
    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.metadata_timeout_ms)
    }
}

#[derive(Debug, Clone)]
pub struct BusConfig {
    pub reconnect_delay_ms: u64,
    pub ready_timeout_ms: u64,
    pub operation_timeout_ms: u64,
}

impl BusConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 1000,
            ready_timeout_ms: 2000,
            operation_timeout_ms: 5000,
        }
    }
}

/// SMTP settings for operational alerts. No host means alerts go to the log only.
#[derive(Clone)]
pub struct AlertConfig {
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_starttls: bool,
    pub from: String,
    pub to: Vec<String>,
}

impl fmt::Debug for AlertConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertConfig")
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("smtp_username", &self.smtp_username)
            .field("smtp_password", &self.smtp_password.as_ref().map(|_| "[REDACTED]"))
            .field("smtp_starttls", &self.smtp_starttls)
            .field("from", &self.from)
            .field("to", &self.to)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database: DbConfig,
    pub kafka: KafkaConfig,
    pub bus: BusConfig,
    pub alerts: AlertConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenv();

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| AppError::Config("DATABASE_URL environment variable not set".into()))?;

        Ok(Self {
            port: parse_env("PORT", 3000)?,
            database: DbConfig {
                database_url,
                max_connections: parse_env("DB_MAX_CONNECTIONS", 10)?,
                min_connections: parse_env("DB_MIN_CONNECTIONS", 1)?,
                connect_timeout_secs: parse_env("DB_CONNECT_TIMEOUT_SECS", 5)?,
                acquire_timeout_secs: parse_env("DB_ACQUIRE_TIMEOUT_SECS", 10)?,
                statement_timeout_ms: parse_env("DB_STATEMENT_TIMEOUT_MS", 5000)?,
            },
            kafka: KafkaConfig {
                brokers: env::var("KAFKA_BROKERS").unwrap_or_else(|_| "localhost:9092".into()),
                client_id: env::var("KAFKA_CLIENT_ID")
                    .unwrap_or_else(|_| "e2e-key-service".into()),
                group_prefix: env::var("KAFKA_GROUP_PREFIX").unwrap_or_else(|_| "api-e2e-c".into()),
                topic_partitions: parse_env("KAFKA_TOPIC_PARTITIONS", 1)?,
                topic_replication: parse_env("KAFKA_TOPIC_REPLICATION", 1)?,
                health_interval_ms: parse_env("KAFKA_HEALTH_INTERVAL_MS", 5000)?,
                metadata_timeout_ms: parse_env("KAFKA_METADATA_TIMEOUT_MS", 3000)?,
            },
            bus: BusConfig {
                reconnect_delay_ms: parse_env("BUS_RECONNECT_DELAY_MS", 1000)?,
                ready_timeout_ms: parse_env("BUS_READY_TIMEOUT_MS", 2000)?,
                operation_timeout_ms: parse_env("BUS_OPERATION_TIMEOUT_MS", 5000)?,
            },
            alerts: AlertConfig {
                smtp_host: non_empty_env("SMTP_HOST"),
                smtp_port: parse_env("SMTP_PORT", 587)?,
                smtp_username: non_empty_env("SMTP_USERNAME"),
                smtp_password: non_empty_env("SMTP_PASSWORD"),
                smtp_starttls: parse_env("SMTP_STARTTLS", true)?,
                from: env::var("ALERT_FROM")
                    .unwrap_or_else(|_| "e2e-key-service@localhost".into()),
                to: env::var("ALERT_TO")
                    .map(|raw| {
                        raw.split(',')
                            .map(str::trim)
                            .filter(|s| !s.is_empty())
                            .map(String::from)
                            .collect()
                    })
                    .unwrap_or_default(),
            },
        })
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("invalid {key}={raw:?}: {e}"))),
        Err(_) => Ok(default),
    }
}
