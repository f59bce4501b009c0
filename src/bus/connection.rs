use super::{BusSession, SessionEnd, Transport};
use crate::error::{AppError, AppResult};
use crate::metrics;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

#[derive(Clone)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// `epoch` increases with every successful connect.
    Connected {
        session: Arc<dyn BusSession>,
        epoch: u64,
    },
}

impl ConnectionState {
    pub fn epoch(&self) -> Option<u64> {
        match self {
            ConnectionState::Connected { epoch, .. } => Some(*epoch),
            _ => None,
        }
    }
}

impl fmt::Debug for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("Disconnected"),
            ConnectionState::Connecting => f.write_str("Connecting"),
            ConnectionState::Connected { epoch, .. } => {
                f.debug_struct("Connected").field("epoch", epoch).finish()
            }
        }
    }
}

/// Owns the broker session and reconnects with a fixed delay whenever it ends.
pub struct BrokerConnection {
    transport: Arc<dyn Transport>,
    state: watch::Sender<ConnectionState>,
    reconnect_delay: Duration,
}

impl BrokerConnection {
    pub fn new(transport: Arc<dyn Transport>, reconnect_delay: Duration) -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Arc::new(Self {
            transport,
            state,
            reconnect_delay,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        matches!(*self.state.borrow(), ConnectionState::Connected { .. })
    }

    /// Readiness gate: the current session, or `TransportUnavailable` once `limit` passes.
    pub async fn ready(&self, limit: Duration) -> AppResult<Arc<dyn BusSession>> {
        let mut state = self.state.subscribe();
        let wait = async {
            loop {
                let current = match &*state.borrow_and_update() {
                    ConnectionState::Connected { session, .. } => Some(session.clone()),
                    _ => None,
                };
                if current.is_some() {
                    return current;
                }
                if state.changed().await.is_err() {
                    return None;
                }
            }
        };

        match timeout(limit, wait).await {
            Ok(Some(session)) => Ok(session),
            _ => Err(AppError::TransportUnavailable(format!(
                "no broker session within {:?}",
                limit
            ))),
        }
    }

    /// Connection loop. Never returns; spawn it once at startup.
    pub async fn run(self: Arc<Self>) {
        let mut epoch = 0u64;

        loop {
            self.state.send_replace(ConnectionState::Connecting);
            metrics::record_connect_attempt();

            match self.transport.connect().await {
                Ok(session) => {
                    epoch += 1;
                    info!(epoch, "Message bus connected");
                    self.state.send_replace(ConnectionState::Connected {
                        session: session.clone(),
                        epoch,
                    });
                    metrics::set_bus_connected(true);

                    match session.closed().await {
                        SessionEnd::Closed => warn!(epoch, "Message bus connection closed"),
                        SessionEnd::Failed(reason) => {
                            error!(epoch, reason = %reason, "Message bus connection lost")
                        }
                    }

                    self.state.send_replace(ConnectionState::Disconnected);
                    metrics::set_bus_connected(false);
                }
                Err(e) => {
                    error!(error = %e, "Message bus connect failed");
                    self.state.send_replace(ConnectionState::Disconnected);
                }
            }

            sleep(self.reconnect_delay).await;
        }
    }
}
