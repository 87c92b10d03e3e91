// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Channel Operations
//!
//! Publish and consume over logical channels opened on demand from the connection
//! currently held by a [`BrokerHandle`]. A channel opened by an operation is closed
//! when the operation ends; a channel supplied by the caller is used and left open.
//!
//! Operations never retry. A disconnected handle fails them right away with
//! [`AmqpError::NotConnected`]; restoring the connection is the reconnect
//! supervisor's job and only benefits the next call.

use crate::{
    broker::AmqpChannel,
    configs::AckPolicy,
    document::TopologyDocument,
    errors::{AmqpError, BrokerError, TopologyPhase},
    handle::BrokerHandle,
    headers::{Arguments, Headers},
    message::{ConsumedMessage, PublishMessage},
    queue::QueueDefinition,
    topology::{Topology, TopologyApplier, TopologySummary},
};
use futures_util::StreamExt;
use std::{future::Future, sync::Arc, time::Duration};
use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Deadline and cancellation of a publish call.
#[derive(Debug, Clone, Default)]
pub struct PublishContext {
    deadline: Option<Instant>,
    cancellation: CancellationToken,
}

impl PublishContext {
    /// A context without deadline.
    pub fn new() -> Self {
        PublishContext::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        PublishContext::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        PublishContext {
            deadline: Some(deadline),
            cancellation: CancellationToken::new(),
        }
    }

    /// Ties the context to an external cancellation token.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fails when the context is already cancelled or past its deadline.
    pub fn check(&self) -> Result<(), AmqpError> {
        if self.cancellation.is_cancelled() {
            return Err(AmqpError::Cancelled);
        }

        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(AmqpError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Runs `fut` until it completes, the context is cancelled or the deadline passes.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, AmqpError>
    where
        F: Future<Output = Result<T, AmqpError>>,
    {
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(AmqpError::Cancelled),
            _ = deadline => Err(AmqpError::DeadlineExceeded),
            result = fut => result,
        }
    }
}

/// Per-operation channel helpers over a broker handle.
#[derive(Clone)]
pub struct ChannelOps {
    handle: Arc<BrokerHandle>,
    ack_policy: AckPolicy,
}

impl ChannelOps {
    /// Uses the acknowledgement policy of the handle's configuration.
    pub fn new(handle: Arc<BrokerHandle>) -> ChannelOps {
        let ack_policy = handle.configs().ack_policy;
        ChannelOps { handle, ack_policy }
    }

    pub fn ack_policy(mut self, policy: AckPolicy) -> Self {
        self.ack_policy = policy;
        self
    }

    pub fn handle(&self) -> &Arc<BrokerHandle> {
        &self.handle
    }

    /// Returns `existing` when given, otherwise opens a new channel.
    pub async fn channel(
        &self,
        existing: Option<Arc<dyn AmqpChannel>>,
    ) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
        match existing {
            Some(channel) if channel.is_open() => Ok(channel),
            Some(_) => Err(AmqpError::ChannelError("channel is closed".to_owned())),
            None => self.open_channel().await,
        }
    }

    async fn open_channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
        if !self.handle.is_connected().await {
            return Err(AmqpError::NotConnected);
        }

        let Some(conn) = self.handle.connection().await else {
            return Err(AmqpError::NotConnected);
        };

        debug!("opening channel");
        conn.channel().await.map_err(|err| {
            error!(error = err.to_string(), "error to create the channel");
            AmqpError::ChannelError(err.to_string())
        })
    }

    /// Declares `queue` and feeds its deliveries to `callback` until the delivery
    /// stream ends, an error occurs or the handle is closed.
    ///
    /// # Parameters
    /// * `queue` - Queue to declare and consume from
    /// * `durable` - Durable flag used for the declaration
    /// * `arguments` - Extra declaration arguments
    /// * `callback` - Invoked once per delivery; its result drives the ack policy
    ///
    /// # Returns
    /// * `Ok(())` when the handle is closed or the broker ends the stream
    /// * `AmqpError::NotConnected` when no live connection is held
    /// * `AmqpError::TopologyConflictError` when the queue exists with other settings
    /// * `AmqpError::ConsumerError` when the delivery stream fails
    pub async fn consume<F>(
        &self,
        queue: &str,
        durable: bool,
        arguments: Arguments,
        callback: F,
    ) -> Result<(), AmqpError>
    where
        F: FnMut(&ConsumedMessage) -> Result<(), AmqpError> + Send,
    {
        let def = QueueDefinition::new(queue)
            .with_durable(durable)
            .arguments(arguments);

        self.consume_queue(&def, callback).await
    }

    /// Like [`ChannelOps::consume`] for a full queue definition.
    pub async fn consume_queue<F>(&self, def: &QueueDefinition, callback: F) -> Result<(), AmqpError>
    where
        F: FnMut(&ConsumedMessage) -> Result<(), AmqpError> + Send,
    {
        let shutdown = self.handle.shutdown_token();
        self.consume_until(def, callback, shutdown).await
    }

    /// Runs [`ChannelOps::consume_queue`] on a background task.
    pub fn spawn_consume<F>(
        &self,
        def: QueueDefinition,
        callback: F,
    ) -> JoinHandle<Result<(), AmqpError>>
    where
        F: FnMut(&ConsumedMessage) -> Result<(), AmqpError> + Send + 'static,
    {
        let ops = self.clone();
        let shutdown = self.handle.shutdown_token();

        tokio::spawn(async move { ops.consume_until(&def, callback, shutdown).await })
    }

    async fn consume_until<F>(
        &self,
        def: &QueueDefinition,
        callback: F,
        shutdown: CancellationToken,
    ) -> Result<(), AmqpError>
    where
        F: FnMut(&ConsumedMessage) -> Result<(), AmqpError> + Send,
    {
        let channel = self.open_channel().await?;
        let result = self.deliver(&channel, def, callback, &shutdown).await;

        if let Err(err) = channel.close().await {
            warn!(error = err.to_string(), "failure to close the consumer channel");
        }

        result
    }

    async fn deliver<F>(
        &self,
        channel: &Arc<dyn AmqpChannel>,
        def: &QueueDefinition,
        mut callback: F,
        shutdown: &CancellationToken,
    ) -> Result<(), AmqpError>
    where
        F: FnMut(&ConsumedMessage) -> Result<(), AmqpError> + Send,
    {
        channel
            .queue_declare(def)
            .await
            .map_err(|err| declare_error(&def.name, err))?;

        let consumer_tag = Uuid::new_v4().to_string();
        let no_ack = self.ack_policy == AckPolicy::Auto;

        let mut deliveries = channel
            .consume(&def.name, &consumer_tag, no_ack)
            .await
            .map_err(|err| {
                error!(error = err.to_string(), queue = %def.name, "failure to bind consumer");
                AmqpError::BindingConsumerError(def.name.clone())
            })?;

        info!(queue = %def.name, consumer = %consumer_tag, "consumer started");

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(queue = %def.name, "consumer stopped by shutdown");
                    return Ok(());
                }
                next = deliveries.next() => next,
            };

            match next {
                None => {
                    info!(queue = %def.name, "delivery stream ended");
                    return Ok(());
                }
                Some(Err(err)) => {
                    error!(error = err.to_string(), queue = %def.name, "consumer failure");
                    return Err(AmqpError::ConsumerError(err.to_string()));
                }
                Some(Ok(msg)) => {
                    let result = callback(&msg);
                    self.settle(channel, &msg, result).await?;
                }
            }
        }
    }

    async fn settle(
        &self,
        channel: &Arc<dyn AmqpChannel>,
        msg: &ConsumedMessage,
        result: Result<(), AmqpError>,
    ) -> Result<(), AmqpError> {
        match (self.ack_policy, result) {
            (AckPolicy::Auto, Ok(())) => {
                debug!(queue = %msg.queue, "message successfully processed");
                Ok(())
            }
            (AckPolicy::Auto, Err(err)) => {
                warn!(
                    error = err.to_string(),
                    queue = %msg.queue,
                    delivery_tag = msg.delivery_tag,
                    "callback failed on an auto-acked message, message lost"
                );
                Ok(())
            }
            (AckPolicy::AfterSuccess, Ok(())) => {
                channel.ack(msg.delivery_tag).await.map_err(|err| {
                    error!(error = err.to_string(), "error whiling ack msg");
                    AmqpError::AckMessageError
                })
            }
            (AckPolicy::AfterSuccess, Err(err)) => {
                warn!(
                    error = err.to_string(),
                    queue = %msg.queue,
                    "callback failed, rejecting message"
                );
                channel.nack(msg.delivery_tag, false).await.map_err(|err| {
                    error!(error = err.to_string(), "error whiling nack msg");
                    AmqpError::NackMessageError
                })
            }
        }
    }

    /// Publishes a persistent message to the default exchange, routed to the queue
    /// `destination`, and waits for the broker's confirmation.
    ///
    /// # Parameters
    /// * `ctx` - Deadline and cancellation bounding the whole operation
    /// * `destination` - Routing key, i.e. the target queue name
    /// * `body` - Message payload, sent as `application/json`
    /// * `headers` - Message headers
    /// * `channel` - Channel to reuse; a fresh one is opened and closed when `None`
    ///
    /// # Returns
    /// * `Ok(())` once the broker confirmed the message
    /// * `AmqpError::NotConnected` when no live connection is held
    /// * `AmqpError::DeadlineExceeded` or `AmqpError::Cancelled` when `ctx` ends first
    /// * `AmqpError::PublishingError` when the broker nacks or the publish fails
    pub async fn publish(
        &self,
        ctx: &PublishContext,
        destination: &str,
        body: &[u8],
        headers: Headers,
        channel: Option<Arc<dyn AmqpChannel>>,
    ) -> Result<(), AmqpError> {
        let msg = PublishMessage::to_queue(destination, body).headers(headers);
        self.publish_message(ctx, &msg, channel).await
    }

    /// Publishes `msg` in confirmation mode, bounded by `ctx`.
    ///
    /// # Returns
    /// The same outcomes as [`ChannelOps::publish`].
    pub async fn publish_message(
        &self,
        ctx: &PublishContext,
        msg: &PublishMessage,
        channel: Option<Arc<dyn AmqpChannel>>,
    ) -> Result<(), AmqpError> {
        ctx.check()?;

        let owned = channel.is_none();
        let channel = ctx.run(self.channel(channel)).await?;

        debug!(
            exchange = %msg.exchange,
            routing_key = %msg.routing_key,
            message_id = %msg.message_id,
            "publishing message"
        );

        let result = ctx
            .run(async {
                channel.confirm_select().await.map_err(publishing_error)?;
                channel.publish(msg).await.map_err(publishing_error)
            })
            .await;

        if owned {
            if let Err(err) = channel.close().await {
                warn!(error = err.to_string(), "failure to close the publishing channel");
            }
        }

        result
    }

    /// Applies `doc` over a dedicated channel.
    pub async fn apply_topology(
        &self,
        doc: &TopologyDocument,
    ) -> Result<TopologySummary, AmqpError> {
        let channel = self.open_channel().await?;
        let result = TopologyApplier::from_document(channel.clone(), doc)
            .install()
            .await;

        if let Err(err) = channel.close().await {
            warn!(error = err.to_string(), "failure to close the topology channel");
        }

        result
    }
}

fn declare_error(queue: &str, err: BrokerError) -> AmqpError {
    error!(error = err.to_string(), queue = queue, "failure to declare queue");

    if err.is_precondition_failed() {
        return AmqpError::TopologyConflictError(queue.to_owned());
    }

    AmqpError::TopologyError {
        phase: TopologyPhase::Queue,
        name: queue.to_owned(),
        reason: err.to_string(),
    }
}

fn publishing_error(err: BrokerError) -> AmqpError {
    error!(error = err.to_string(), "error publishing message");
    AmqpError::PublishingError(err.to_string())
}
