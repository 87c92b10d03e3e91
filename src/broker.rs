// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Client Capability
//!
//! The traits in this module are the only surface the connection handle, the channel
//! operations and the topology applier need from a broker protocol implementation:
//! dialing, opening channels, closure notifications, declarations, publish and consume.
//! [`crate::amqp`] implements them on top of `lapin`.

use crate::{
    configs::RabbitMQConfigs,
    errors::BrokerError,
    exchange::ExchangeDefinition,
    message::{ConsumedMessage, PublishMessage},
    queue::{QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;

/// Stream of deliveries of one consumer. It ends when the channel closes.
pub type DeliveryStream = BoxStream<'static, Result<ConsumedMessage, BrokerError>>;

/// One-shot closure event: `Some(cause)` for an abnormal closure, `None` for a graceful one.
pub type CloseNotification = oneshot::Receiver<Option<BrokerError>>;

/// Broker's answer to a queue declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    pub name: String,
    pub message_count: u32,
    pub consumer_count: u32,
}

/// Opens physical connections to a broker endpoint.
#[async_trait]
pub trait AmqpDialer: Send + Sync {
    async fn dial(&self, configs: &RabbitMQConfigs)
        -> Result<Arc<dyn AmqpConnection>, BrokerError>;
}

/// A single physical connection.
#[async_trait]
pub trait AmqpConnection: Send + Sync {
    /// Opens a new logical channel on this connection.
    async fn channel(&self) -> Result<Arc<dyn AmqpChannel>, BrokerError>;

    /// Subscribes to this connection's closure. Subscribing after the connection
    /// already closed yields the recorded cause immediately.
    fn notify_close(&self) -> CloseNotification;

    fn is_open(&self) -> bool;

    /// Closes the connection gracefully.
    async fn close(&self) -> Result<(), BrokerError>;
}

/// A logical channel multiplexed on a connection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AmqpChannel: Send + Sync {
    async fn exchange_declare(&self, def: &ExchangeDefinition) -> Result<(), BrokerError>;

    async fn queue_declare(&self, def: &QueueDefinition) -> Result<QueueInfo, BrokerError>;

    async fn queue_bind(&self, binding: &QueueBinding) -> Result<(), BrokerError>;

    /// Puts the channel in publisher confirmation mode.
    async fn confirm_select(&self) -> Result<(), BrokerError>;

    /// Publishes a message. In confirmation mode this resolves once the broker
    /// acknowledged it and fails with `BrokerErrorKind::Nacked` on a negative confirm.
    async fn publish(&self, msg: &PublishMessage) -> Result<(), BrokerError>;

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        no_ack: bool,
    ) -> Result<DeliveryStream, BrokerError>;

    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError>;

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError>;

    async fn close(&self) -> Result<(), BrokerError>;

    fn is_open(&self) -> bool;
}

/// Latched fan-out of a connection's closure event.
///
/// The first call to `notify` records the cause and wakes every subscriber; later
/// subscribers receive the recorded cause as soon as they subscribe.
#[derive(Debug, Default)]
pub struct CloseNotifier {
    inner: Mutex<NotifierState>,
}

#[derive(Debug, Default)]
struct NotifierState {
    cause: Option<Option<BrokerError>>,
    watchers: Vec<oneshot::Sender<Option<BrokerError>>>,
}

impl CloseNotifier {
    pub fn new() -> Self {
        CloseNotifier::default()
    }

    pub fn subscribe(&self) -> CloseNotification {
        let (tx, rx) = oneshot::channel();
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        match &state.cause {
            Some(cause) => {
                let _ = tx.send(cause.clone());
            }
            None => state.watchers.push(tx),
        }

        rx
    }

    /// Records the closure. Returns `false` when the closure was already recorded.
    pub fn notify(&self, cause: Option<BrokerError>) -> bool {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        if state.cause.is_some() {
            return false;
        }

        for watcher in state.watchers.drain(..) {
            let _ = watcher.send(cause.clone());
        }
        state.cause = Some(cause);

        true
    }

    pub fn is_closed(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cause
            .is_some()
    }
}
