// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Reconnect Supervisor
//!
//! A background task attached to a [`BrokerHandle`] that watches the connection's
//! closure notification and restores connectivity after an abnormal closure.
//!
//! ```text
//!            abnormal closure              attempt succeeded
//!   Idle ──────────────────────▶ Retrying ──────────────────▶ Idle
//!    │                              │
//!    │ graceful closure             │ budget exhausted
//!    ▼                              ▼
//!  ShutDown ◀── shutdown signal   GivenUp
//! ```
//!
//! Each closure episode gets a fresh budget: up to `max_attempts` dials, each preceded
//! by a wait that starts at `initial_delay` and doubles after every failure. The
//! handle's shutdown signal is raced against every wait, so a `close` stops the task
//! within one wait interval. Giving up is only logged; nothing waits on the supervisor.

use crate::{
    broker::{AmqpConnection, CloseNotification},
    configs::DEFAULT_RECONNECT_ATTEMPTS,
    errors::AmqpError,
    handle::BrokerHandle,
};
use std::{
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Lifecycle of the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Watching a live connection
    Idle,
    /// Attempting to reconnect
    Retrying,
    /// Retry budget exhausted; terminal
    GivenUp,
    /// Shutdown requested or connection closed gracefully; terminal
    ShutDown,
}

impl SupervisorState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SupervisorState::GivenUp | SupervisorState::ShutDown)
    }
}

/// Retry budget and backoff of one closure episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(initial_delay: Duration) -> Self {
        ReconnectPolicy {
            initial_delay,
            max_attempts: DEFAULT_RECONNECT_ATTEMPTS,
        }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// The wait before each attempt: `d, 2d, 4d, ...`.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_attempts).map(move |attempt| {
            self.initial_delay
                .saturating_mul(2u32.saturating_pow(attempt))
        })
    }
}

enum RetryOutcome {
    Reconnected(Arc<dyn AmqpConnection>, CloseNotification),
    Exhausted,
    Cancelled,
}

/// Handle to a running supervisor task.
pub struct ReconnectSupervisor {
    state: watch::Receiver<SupervisorState>,
    task: JoinHandle<()>,
}

impl ReconnectSupervisor {
    /// Subscribes to the closure of the handle's current connection and starts
    /// supervising it. Fails with `AmqpError::NotConnected` when there is none.
    pub async fn attach(
        handle: &Arc<BrokerHandle>,
        policy: ReconnectPolicy,
    ) -> Result<ReconnectSupervisor, AmqpError> {
        let shutdown = handle.shutdown_token();
        let conn = match handle.connection().await {
            Some(conn) if handle.is_connected().await => conn,
            _ => return Err(AmqpError::NotConnected),
        };
        let closed = conn.notify_close();

        let (tx, rx) = watch::channel(SupervisorState::Idle);
        let task = tokio::spawn(supervise(
            Arc::downgrade(handle),
            conn,
            closed,
            policy,
            shutdown,
            tx,
        ));

        info!(
            initial_delay_ms = policy.initial_delay.as_millis() as u64,
            max_attempts = policy.max_attempts,
            "AMQP reconnect supervisor started"
        );

        Ok(ReconnectSupervisor { state: rx, task })
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    /// A receiver observing every state transition.
    pub fn watch(&self) -> watch::Receiver<SupervisorState> {
        self.state.clone()
    }

    /// Waits until the state satisfies `f` and returns it.
    pub async fn wait_for<F>(&self, f: F) -> SupervisorState
    where
        F: Fn(SupervisorState) -> bool,
    {
        let mut rx = self.state.clone();
        let result = rx.wait_for(|state| f(*state)).await.map(|state| *state);

        match result {
            Ok(state) => state,
            Err(_) => *rx.borrow(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the task to end.
    pub async fn join(self) {
        if let Err(err) = self.task.await {
            error!(error = err.to_string(), "AMQP reconnect supervisor panicked");
        }
    }
}

async fn supervise(
    handle: Weak<BrokerHandle>,
    mut conn: Arc<dyn AmqpConnection>,
    mut closed: CloseNotification,
    policy: ReconnectPolicy,
    shutdown: CancellationToken,
    state: watch::Sender<SupervisorState>,
) {
    loop {
        let cause = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("AMQP reconnect supervisor shutting down");
                break;
            }
            cause = &mut closed => cause,
        };

        let err = match cause {
            Ok(Some(err)) => err,
            _ => {
                info!("AMQP connection closed normally");
                break;
            }
        };
        info!(error = err.to_string(), "AMQP connection closed, reconnecting...");

        match handle.upgrade() {
            Some(handle) => handle.mark_disconnected(&conn).await,
            None => break,
        }
        state.send_replace(SupervisorState::Retrying);

        match retry(&handle, &policy, &shutdown).await {
            RetryOutcome::Reconnected(new_conn, new_closed) => {
                conn = new_conn;
                closed = new_closed;
                state.send_replace(SupervisorState::Idle);
                info!("AMQP reconnected successfully");
            }
            RetryOutcome::Exhausted => {
                error!(
                    attempts = policy.max_attempts,
                    "Failed to reconnect to AMQP after maximum retries"
                );
                state.send_replace(SupervisorState::GivenUp);
                return;
            }
            RetryOutcome::Cancelled => {
                info!("AMQP reconnect cancelled");
                break;
            }
        }
    }

    state.send_replace(SupervisorState::ShutDown);
}

async fn retry(
    handle: &Weak<BrokerHandle>,
    policy: &ReconnectPolicy,
    shutdown: &CancellationToken,
) -> RetryOutcome {
    for (attempt, delay) in (1..).zip(policy.delays()) {
        tokio::select! {
            _ = shutdown.cancelled() => return RetryOutcome::Cancelled,
            _ = tokio::time::sleep(delay) => {}
        }

        let Some(handle) = handle.upgrade() else {
            return RetryOutcome::Cancelled;
        };

        let result = tokio::select! {
            _ = shutdown.cancelled() => return RetryOutcome::Cancelled,
            result = handle.reconnect(shutdown) => result,
        };

        match result {
            Ok(conn) => {
                // subscribe before reporting success so no closure goes unobserved
                let closed = conn.notify_close();
                return RetryOutcome::Reconnected(conn, closed);
            }
            Err(AmqpError::ShutDown) => return RetryOutcome::Cancelled,
            Err(err) => {
                warn!(
                    error = err.to_string(),
                    attempt = attempt,
                    "Failed to reconnect to AMQP"
                );
            }
        }
    }

    RetryOutcome::Exhausted
}
