//! Connection Lifecycle
//!
//! Reacts to sessions becoming active, inactive or failing. Losing the
//! primary connection to the manager reloads the connection settings and
//! restarts the reconnect loop; every other session is the remote peer's
//! business.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use super::{Connection, ConnectionState, PrimaryConnection};
use crate::config::{ConfigLoader, ConnectionConfig};
use crate::error::Error;

/// Receives lifecycle events from the transport
pub trait ConnectionHandler: Send + Sync {
    /// Session established
    fn on_connection_active(&self, connection: &Connection);

    /// Session closed (normally, or after a failure)
    fn on_connection_inactive(&self, connection: &Connection);

    /// Session hit an error; `on_connection_inactive` follows
    fn on_failure(&self, connection: &Connection, error: &Error);
}

/// Re-establishes the primary connection
pub trait Reconnector: Send + Sync {
    /// Tear down residual client state and start reconnecting with `config`
    fn reset_and_start_reconnect_loop(&self, config: ConnectionConfig);
}

/// Default [`ConnectionHandler`] for wrapper and manager nodes
pub struct ConnectionLifecycleMonitor {
    /// Which session is the primary one
    primary: Arc<PrimaryConnection>,
    /// Fresh settings for each reconnect
    config_loader: Arc<dyn ConfigLoader>,
    /// Reconnect loop owner
    reconnector: Arc<dyn Reconnector>,
    /// Last settings loaded successfully
    last_config: Mutex<Option<ConnectionConfig>>,
    /// State of the primary connection
    state_tx: watch::Sender<ConnectionState>,
}

impl ConnectionLifecycleMonitor {
    pub fn new(
        primary: Arc<PrimaryConnection>,
        config_loader: Arc<dyn ConfigLoader>,
        reconnector: Arc<dyn Reconnector>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Inactive);
        Self {
            primary,
            config_loader,
            reconnector,
            last_config: Mutex::new(None),
            state_tx,
        }
    }

    /// Settings to fall back to if a reload fails
    pub fn with_initial_config(self, config: ConnectionConfig) -> Self {
        *self.last_config.lock().unwrap_or_else(|e| e.into_inner()) = Some(config);
        self
    }

    /// Watch the state of the primary connection
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Current state of the primary connection
    pub fn primary_state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn reload_config(&self) -> Option<ConnectionConfig> {
        let loaded = self.config_loader.load_connection_config();
        let mut last = self.last_config.lock().unwrap_or_else(|e| e.into_inner());
        match loaded {
            Ok(config) => {
                *last = Some(config.clone());
                Some(config)
            }
            Err(e) => {
                tracing::error!("Failed to reload connection configuration: {}", e);
                if last.is_some() {
                    tracing::warn!("Reconnecting with the previous connection configuration");
                }
                last.clone()
            }
        }
    }
}

impl ConnectionHandler for ConnectionLifecycleMonitor {
    fn on_connection_active(&self, connection: &Connection) {
        if self.primary.is_primary(connection.id()) {
            tracing::info!("Connected to the manager at {}", connection.peer_address());
            self.state_tx.send_replace(ConnectionState::Active);
        } else {
            tracing::info!("Session {} from {} established", connection.id(), connection.peer_address());
        }
    }

    fn on_connection_inactive(&self, connection: &Connection) {
        if !self.primary.release(connection.id()) {
            tracing::debug!("Session {} with {} closed", connection.id(), connection.peer_address());
            return;
        }

        tracing::warn!("Lost connection to the manager at {}", connection.peer_address());
        self.state_tx.send_replace(ConnectionState::Inactive);

        match self.reload_config() {
            Some(config) => {
                tracing::info!("Reconnecting to the manager at {}", config.manager_address);
                self.reconnector.reset_and_start_reconnect_loop(config);
            }
            None => tracing::error!("No usable connection configuration, not reconnecting"),
        }
    }

    fn on_failure(&self, connection: &Connection, error: &Error) {
        if self.primary.is_primary(connection.id()) {
            self.state_tx.send_replace(ConnectionState::Failed);
        }
        tracing::error!(
            "Connection {} with {} failed: {}",
            connection.id(),
            connection.peer_address(),
            error
        );
    }
}
