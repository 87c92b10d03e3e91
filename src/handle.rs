// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Handle
//!
//! Owns the single physical connection to the broker. The connected flag and the
//! stored connection are only touched under one `RwLock`: reads take the shared path,
//! writes the exclusive one, and no network call is ever made while it is held.
//! Dials are serialized by a separate gate and run outside the lock, so
//! `is_connected` and the channel operations answer immediately while a reconnect is
//! in flight.
//!
//! Closing the handle fires its shutdown signal, a `CancellationToken` every
//! background task (reconnect supervisor, consumers) selects on. The signal is per
//! session: `close` installs a fresh token, so an explicit `connect` afterwards starts
//! a new session while every task of the old one stays stopped.

use crate::{
    broker::{AmqpConnection, AmqpDialer},
    configs::RabbitMQConfigs,
    errors::AmqpError,
};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Externally visible connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

struct HandleState {
    status: ConnectionState,
    connection: Option<Arc<dyn AmqpConnection>>,
}

impl HandleState {
    fn live_connection(&self) -> Option<&Arc<dyn AmqpConnection>> {
        match (&self.status, &self.connection) {
            (ConnectionState::Connected, Some(conn)) if conn.is_open() => Some(conn),
            _ => None,
        }
    }
}

/// Thread-safe owner of the broker connection.
pub struct BrokerHandle {
    configs: RabbitMQConfigs,
    dialer: Arc<dyn AmqpDialer>,
    state: RwLock<HandleState>,
    dial_gate: tokio::sync::Mutex<()>,
    shutdown: Mutex<CancellationToken>,
}

impl BrokerHandle {
    /// Creates a disconnected handle. Nothing is dialed until `connect`.
    pub fn new(configs: RabbitMQConfigs, dialer: Arc<dyn AmqpDialer>) -> Arc<BrokerHandle> {
        Arc::new(BrokerHandle {
            configs,
            dialer,
            state: RwLock::new(HandleState {
                status: ConnectionState::Disconnected,
                connection: None,
            }),
            dial_gate: tokio::sync::Mutex::new(()),
            shutdown: Mutex::new(CancellationToken::new()),
        })
    }

    /// The settings every dial uses.
    pub fn configs(&self) -> &RabbitMQConfigs {
        &self.configs
    }

    /// Connects to the broker.
    ///
    /// A no-op when a live connection is already held. A stored connection that is no
    /// longer live is discarded before a fresh one is dialed.
    ///
    /// # Returns
    /// * `Ok(())` once a live connection is held
    /// * `AmqpError::ConnectionError` when the dial fails; the handle stays disconnected
    pub async fn connect(&self) -> Result<(), AmqpError> {
        self.dial(None).await.map(|_| ())
    }

    /// Connects on behalf of a background task of the session `session`; fails with
    /// `AmqpError::ShutDown` once that session was closed.
    pub(crate) async fn reconnect(
        &self,
        session: &CancellationToken,
    ) -> Result<Arc<dyn AmqpConnection>, AmqpError> {
        self.dial(Some(session)).await
    }

    async fn dial(
        &self,
        session: Option<&CancellationToken>,
    ) -> Result<Arc<dyn AmqpConnection>, AmqpError> {
        let _gate = self.dial_gate.lock().await;

        let stale = {
            let mut state = self.state.write().await;

            if session.is_some_and(|token| token.is_cancelled()) {
                return Err(AmqpError::ShutDown);
            }

            if let Some(conn) = state.live_connection() {
                return Ok(conn.clone());
            }

            state.status = ConnectionState::Disconnected;
            state.connection.take()
        };

        if let Some(stale) = stale.filter(|conn| conn.is_open()) {
            debug!("closing stale amqp connection");
            discard(stale);
        }

        // dialed outside the state lock so readers never wait on the network
        let conn = match self.dialer.dial(&self.configs).await {
            Ok(conn) => Ok(conn),
            Err(err) => {
                error!(error = err.to_string(), "failure to connect");
                Err(AmqpError::ConnectionError(err.to_string()))
            }
        }?;

        let mut state = self.state.write().await;

        // a close that ran during the dial wins over a background reconnect
        if session.is_some_and(|token| token.is_cancelled()) {
            drop(state);
            debug!("handle closed while dialing, discarding connection");
            discard(conn);
            return Err(AmqpError::ShutDown);
        }

        if let Some(live) = state.live_connection() {
            let live = live.clone();
            drop(state);
            discard(conn);
            return Ok(live);
        }

        state.connection = Some(conn.clone());
        state.status = ConnectionState::Connected;
        info!(host = %self.configs.host, "amqp connection established");

        Ok(conn)
    }

    /// Whether a live connection is held. Never true while the stored connection is
    /// absent or closed.
    pub async fn is_connected(&self) -> bool {
        self.state.read().await.live_connection().is_some()
    }

    pub async fn state(&self) -> ConnectionState {
        if self.is_connected().await {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    /// The connection currently held. It may close the instant after this returns;
    /// callers see that as an error from the operation they run on it.
    pub async fn connection(&self) -> Option<Arc<dyn AmqpConnection>> {
        self.state.read().await.connection.clone()
    }

    /// The shutdown signal of the current session.
    ///
    /// A session ends with `close`; the returned token is cancelled then and a later
    /// `connect` starts a session with a fresh token.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Fires the shutdown signal, then closes the connection if connected.
    ///
    /// Concurrent calls close the connection once; the shutdown signal fires even
    /// when the handle is already disconnected so a retrying supervisor stops.
    ///
    /// # Returns
    /// * `Ok(())` once the handle is disconnected, including when it already was
    /// * `AmqpError::ConnectionError` when the broker rejects the close; the handle
    ///   is disconnected regardless
    pub async fn close(&self) -> Result<(), AmqpError> {
        {
            let mut token = self.shutdown.lock().unwrap_or_else(PoisonError::into_inner);
            token.cancel();
            *token = CancellationToken::new();
        }

        let conn = {
            let mut state = self.state.write().await;
            if state.status == ConnectionState::Disconnected {
                debug!("amqp handle already disconnected");
                return Ok(());
            }

            state.status = ConnectionState::Disconnected;
            state.connection.take()
        };

        info!("closing amqp connection");
        match conn {
            Some(conn) => conn.close().await.map_err(|err| {
                error!(error = err.to_string(), "failure to close the connection");
                AmqpError::ConnectionError(err.to_string())
            }),
            None => Ok(()),
        }
    }

    /// Flips to disconnected if `conn` is still the stored connection.
    pub(crate) async fn mark_disconnected(&self, conn: &Arc<dyn AmqpConnection>) {
        let mut state = self.state.write().await;

        let current = state
            .connection
            .as_ref()
            .is_some_and(|held| std::ptr::addr_eq(Arc::as_ptr(held), Arc::as_ptr(conn)));

        if current {
            state.status = ConnectionState::Disconnected;
        }
    }
}

/// Closes a connection the handle no longer holds, off the caller's path.
fn discard(conn: Arc<dyn AmqpConnection>) {
    tokio::spawn(async move {
        if let Err(err) = conn.close().await {
            warn!(error = err.to_string(), "failure to close discarded connection");
        }
    });
}
