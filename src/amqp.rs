// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # lapin-backed Broker Capability
//!
//! Implements the [`crate::broker`] traits with `lapin`. Connection closure is
//! reported through a latched [`CloseNotifier`] fed by lapin's error callback
//! (abnormal closure) and by [`LapinConnection::close`] (graceful closure).

use crate::{
    broker::{
        AmqpChannel, AmqpConnection, AmqpDialer, CloseNotification, CloseNotifier,
        DeliveryStream, QueueInfo,
    },
    configs::RabbitMQConfigs,
    errors::{BrokerError, BrokerErrorKind},
    exchange::ExchangeDefinition,
    headers::Headers,
    message::{ConsumedMessage, PublishMessage},
    queue::{QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    message::Delivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    protocol::{AMQPErrorKind, AMQPSoftError},
    types::{FieldTable, LongString, ShortString},
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use std::sync::Arc;
use tracing::{debug, error, warn};

const REPLY_SUCCESS: u16 = 200;

impl From<lapin::Error> for BrokerError {
    fn from(err: lapin::Error) -> Self {
        let kind = match &err {
            lapin::Error::ProtocolError(amqp) => match amqp.kind() {
                AMQPErrorKind::Soft(AMQPSoftError::PRECONDITIONFAILED) => {
                    BrokerErrorKind::PreconditionFailed
                }
                AMQPErrorKind::Soft(AMQPSoftError::NOTFOUND) => BrokerErrorKind::NotFound,
                AMQPErrorKind::Hard(_) => BrokerErrorKind::ConnectionClosed,
                _ => BrokerErrorKind::Other,
            },
            lapin::Error::IOError(_) => BrokerErrorKind::Io,
            lapin::Error::InvalidChannelState(_) => BrokerErrorKind::ChannelClosed,
            lapin::Error::InvalidConnectionState(_) => BrokerErrorKind::ConnectionClosed,
            _ => BrokerErrorKind::Other,
        };

        BrokerError::new(kind, err.to_string())
    }
}

/// Dials RabbitMQ with `lapin`.
#[derive(Debug, Clone, Default)]
pub struct LapinDialer;

impl LapinDialer {
    pub fn new() -> Arc<LapinDialer> {
        Arc::new(LapinDialer)
    }
}

#[async_trait]
impl AmqpDialer for LapinDialer {
    async fn dial(
        &self,
        cfg: &RabbitMQConfigs,
    ) -> Result<Arc<dyn AmqpConnection>, BrokerError> {
        debug!(host = %cfg.host, port = cfg.port, "creating amqp connection...");

        let mut options = ConnectionProperties::default();
        if let Some(name) = &cfg.connection_name {
            options = options.with_connection_name(LongString::from(name.clone()));
        }

        let conn = match Connection::connect(&cfg.uri(), options).await {
            Ok(c) => Ok(c),
            Err(err) => {
                error!(error = err.to_string(), "failure to connect");
                Err(BrokerError::from(err))
            }
        }?;
        debug!("amqp connected");

        Ok(Arc::new(LapinConnection::new(conn)))
    }
}

/// A lapin connection with latched closure notifications.
pub struct LapinConnection {
    conn: Connection,
    notifier: Arc<CloseNotifier>,
}

impl LapinConnection {
    pub fn new(conn: Connection) -> LapinConnection {
        let notifier = Arc::new(CloseNotifier::new());

        conn.on_error({
            let notifier = notifier.clone();
            move |err| {
                warn!(error = err.to_string(), "amqp connection closed by error");
                notifier.notify(Some(BrokerError::from(err)));
            }
        });

        LapinConnection { conn, notifier }
    }
}

#[async_trait]
impl AmqpConnection for LapinConnection {
    async fn channel(&self) -> Result<Arc<dyn AmqpChannel>, BrokerError> {
        debug!("creating amqp channel...");
        match self.conn.create_channel().await {
            Ok(channel) => {
                debug!("channel created");
                Ok(Arc::new(LapinChannel::new(channel)))
            }
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(BrokerError::from(err))
            }
        }
    }

    fn notify_close(&self) -> CloseNotification {
        self.notifier.subscribe()
    }

    fn is_open(&self) -> bool {
        self.conn.status().connected() && !self.notifier.is_closed()
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.notifier.notify(None);

        if !self.conn.status().connected() {
            return Ok(());
        }

        self.conn
            .close(REPLY_SUCCESS, "OK")
            .await
            .map_err(BrokerError::from)
    }
}

/// A lapin channel.
pub struct LapinChannel {
    channel: Channel,
}

impl LapinChannel {
    pub fn new(channel: Channel) -> LapinChannel {
        LapinChannel { channel }
    }
}

#[async_trait]
impl AmqpChannel for LapinChannel {
    async fn exchange_declare(&self, def: &ExchangeDefinition) -> Result<(), BrokerError> {
        self.channel
            .exchange_declare(
                &def.name,
                lapin::ExchangeKind::from(&def.kind),
                ExchangeDeclareOptions {
                    passive: def.passive,
                    durable: def.durable,
                    auto_delete: def.delete,
                    internal: def.internal,
                    nowait: def.no_wait,
                },
                FieldTable::from(&def.arguments),
            )
            .await
            .map_err(BrokerError::from)
    }

    async fn queue_declare(&self, def: &QueueDefinition) -> Result<QueueInfo, BrokerError> {
        let queue = self
            .channel
            .queue_declare(
                &def.name,
                QueueDeclareOptions {
                    passive: def.passive,
                    durable: def.durable,
                    exclusive: def.exclusive,
                    auto_delete: def.delete,
                    nowait: def.no_wait,
                },
                FieldTable::from(&def.declare_arguments()),
            )
            .await?;

        Ok(QueueInfo {
            name: queue.name().as_str().to_owned(),
            message_count: queue.message_count(),
            consumer_count: queue.consumer_count(),
        })
    }

    async fn queue_bind(&self, binding: &QueueBinding) -> Result<(), BrokerError> {
        self.channel
            .queue_bind(
                &binding.queue_name,
                &binding.exchange_name,
                &binding.routing_key,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
            .map_err(BrokerError::from)
    }

    async fn confirm_select(&self) -> Result<(), BrokerError> {
        self.channel
            .confirm_select(ConfirmSelectOptions { nowait: false })
            .await
            .map_err(BrokerError::from)
    }

    async fn publish(&self, msg: &PublishMessage) -> Result<(), BrokerError> {
        let mut props = BasicProperties::default()
            .with_message_id(ShortString::from(msg.message_id.clone()))
            .with_delivery_mode(msg.delivery_mode())
            .with_headers(FieldTable::from(&msg.headers));

        if let Some(content_type) = &msg.content_type {
            props = props.with_content_type(ShortString::from(content_type.clone()));
        }

        if let Some(kind) = &msg.kind {
            props = props.with_type(ShortString::from(kind.clone()));
        }

        let confirm = self
            .channel
            .basic_publish(
                &msg.exchange,
                &msg.routing_key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                &msg.body,
                props,
            )
            .await?;

        let confirmation = confirm.await?;
        if confirmation.is_nack() {
            return Err(BrokerError::new(
                BrokerErrorKind::Nacked,
                format!("message `{}` was nacked by the broker", msg.message_id),
            ));
        }

        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        no_ack: bool,
    ) -> Result<DeliveryStream, BrokerError> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await?;

        let queue = queue.to_owned();
        Ok(consumer
            .map(move |result| {
                result
                    .map(|delivery| consumed_message(&queue, delivery))
                    .map_err(BrokerError::from)
            })
            .boxed())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions { multiple: false })
            .await
            .map_err(BrokerError::from)
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        self.channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue,
                },
            )
            .await
            .map_err(BrokerError::from)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if !self.channel.status().connected() {
            return Ok(());
        }

        self.channel
            .close(REPLY_SUCCESS, "OK")
            .await
            .map_err(BrokerError::from)
    }

    fn is_open(&self) -> bool {
        self.channel.status().connected()
    }
}

fn consumed_message(queue: &str, delivery: Delivery) -> ConsumedMessage {
    let props = &delivery.properties;

    ConsumedMessage {
        queue: queue.to_owned(),
        exchange: delivery.exchange.as_str().to_owned(),
        routing_key: delivery.routing_key.as_str().to_owned(),
        delivery_tag: delivery.delivery_tag,
        redelivered: delivery.redelivered,
        headers: props
            .headers()
            .as_ref()
            .map(Headers::from)
            .unwrap_or_default(),
        message_id: props.message_id().as_ref().map(|id| id.as_str().to_owned()),
        kind: props.kind().as_ref().map(|kind| kind.as_str().to_owned()),
        body: delivery.data,
    }
}
