/// Operational alert side-channel (email or log-only)
use crate::config::AlertConfig;
use crate::error::{AppError, AppResult};
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Fire-and-forget alerts. Implementations never block the caller.
pub trait AlertSink: Send + Sync {
    fn alert(&self, subject: &str, detail: &str);

    fn service_started(&self) {
        self.alert(
            "e2e-key-service is up",
            &format!("Service started at {}", chrono::Utc::now().to_rfc3339()),
        );
    }
}

/// Alerts recorded through tracing only.
#[derive(Debug, Default, Clone)]
pub struct LogAlerts;

impl AlertSink for LogAlerts {
    fn alert(&self, subject: &str, detail: &str) {
        warn!(subject, detail, "Operational alert");
    }
}

#[derive(Debug, Clone)]
pub struct EmailAlerts {
    transport: Arc<AsyncSmtpTransport<Tokio1Executor>>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl EmailAlerts {
    pub fn new(config: &AlertConfig, host: &str) -> AppResult<Self> {
        let from = config
            .from
            .parse::<Mailbox>()
            .map_err(|e| AppError::Config(format!("Invalid ALERT_FROM address: {}", e)))?;

        let to = config
            .to
            .iter()
            .map(|addr| {
                addr.parse::<Mailbox>()
                    .map_err(|e| AppError::Config(format!("Invalid ALERT_TO address {}: {}", addr, e)))
            })
            .collect::<AppResult<Vec<_>>>()?;

        if to.is_empty() {
            return Err(AppError::Config(
                "ALERT_TO must name at least one recipient when SMTP_HOST is set".into(),
            ));
        }

        let builder = if config.smtp_starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
        }
        .map_err(|e| AppError::Config(format!("Failed to configure SMTP transport: {}", e)))?
        .port(config.smtp_port);

        let builder = if let (Some(username), Some(password)) =
            (&config.smtp_username, &config.smtp_password)
        {
            builder.credentials(Credentials::new(username.to_string(), password.to_string()))
        } else {
            builder
        };

        Ok(Self {
            transport: Arc::new(builder.build()),
            from,
            to,
        })
    }

    async fn send(self, subject: String, body: String) {
        let mut message = Message::builder().from(self.from.clone());
        for recipient in &self.to {
            message = message.to(recipient.clone());
        }

        let email = match message
            .subject(subject.as_str())
            .header(header::ContentType::TEXT_PLAIN)
            .body(body)
        {
            Ok(email) => email,
            Err(e) => {
                error!(subject = %subject, "Failed to build alert email: {}", e);
                return;
            }
        };

        match self.transport.send(email).await {
            Ok(_) => info!(subject = %subject, "Alert email sent"),
            Err(e) => error!(subject = %subject, "Failed to send alert email: {}", e),
        }
    }
}

impl AlertSink for EmailAlerts {
    fn alert(&self, subject: &str, detail: &str) {
        warn!(subject, detail, "Operational alert");

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(self.clone().send(subject.to_string(), detail.to_string()));
            }
            Err(_) => warn!(subject, "No async runtime, alert email skipped"),
        }
    }
}

/// Email alerts when an SMTP host is configured, log-only otherwise.
pub fn from_config(config: &AlertConfig) -> AppResult<Arc<dyn AlertSink>> {
    match config.smtp_host.as_deref() {
        Some(host) => {
            info!(host, recipients = config.to.len(), "Alert emails enabled");
            Ok(Arc::new(EmailAlerts::new(config, host)?))
        }
        None => {
            warn!("SMTP host not configured; alerts will be logged only");
            Ok(Arc::new(LogAlerts))
        }
    }
}
