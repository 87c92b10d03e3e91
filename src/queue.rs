// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Definitions
//!
//! Queue declarations and queue-to-exchange bindings. Besides the free-form argument
//! map a queue can carry typed conveniences (TTL, length limits, a dead letter queue)
//! which are folded into `x-*` declaration arguments.

use crate::headers::{Arguments, HeaderValue};
use serde::Deserialize;

/// Constant for the header field used to specify a dead letter exchange
pub const AMQP_HEADERS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
/// Constant for the header field used to specify a dead letter routing key
pub const AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY: &str = "x-dead-letter-routing-key";
/// Constant for the header field used to specify message TTL
pub const AMQP_HEADERS_MESSAGE_TTL: &str = "x-message-ttl";
/// Constant for the header field used to specify maximum queue length
pub const AMQP_HEADERS_MAX_LENGTH: &str = "x-max-length";
/// Constant for the header field used to specify maximum queue size in bytes
pub const AMQP_HEADERS_MAX_LENGTH_BYTES: &str = "x-max-length-bytes";

/// Definition of a RabbitMQ queue with its configuration parameters.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct QueueDefinition {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) durable: bool,
    #[serde(rename = "autoDelete", default)]
    pub(crate) delete: bool,
    #[serde(default)]
    pub(crate) exclusive: bool,
    #[serde(default)]
    pub(crate) passive: bool,
    #[serde(rename = "noWait", default)]
    pub(crate) no_wait: bool,
    #[serde(default)]
    pub(crate) arguments: Arguments,
    #[serde(skip)]
    pub(crate) ttl: Option<i32>,
    #[serde(skip)]
    pub(crate) max_length: Option<i32>,
    #[serde(skip)]
    pub(crate) max_length_bytes: Option<i32>,
    #[serde(skip)]
    pub(crate) dlq_name: Option<String>,
}

impl QueueDefinition {
    /// Creates a new queue definition with the given name.
    ///
    /// By default, the queue is created with standard settings (non-durable, non-exclusive, etc.)
    pub fn new(name: &str) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            ..QueueDefinition::default()
        }
    }

    /// The queue name as declared on the broker.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the queue survives a broker restart.
    pub fn is_durable(&self) -> bool {
        self.durable
    }

    /// Name of the dead letter queue, `<name>-dlq`, when one is configured.
    pub fn dlq_name(&self) -> Option<&str> {
        self.dlq_name.as_deref()
    }

    /// Makes the queue durable, persisting across broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Sets the durable flag explicitly.
    pub fn with_durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    /// Sets the queue to auto-delete when no longer used.
    pub fn delete(mut self) -> Self {
        self.delete = true;
        self
    }

    /// Makes the queue exclusive to the connection.
    ///
    /// Exclusive queues are deleted when the connection closes.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Only checks that the queue exists; declaring a missing one fails with 404.
    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }

    /// Declares without waiting for the broker's `declare-ok`.
    pub fn no_wait(mut self) -> Self {
        self.no_wait = true;
        self
    }

    /// Replaces the free-form declaration arguments.
    pub fn arguments(mut self, arguments: Arguments) -> Self {
        self.arguments = arguments;
        self
    }

    /// Adds a single declaration argument.
    pub fn argument(mut self, key: &str, value: impl Into<HeaderValue>) -> Self {
        self.arguments.insert(key, value);
        self
    }

    /// Sets the message Time-To-Live (TTL) for the queue, in milliseconds.
    pub fn ttl(mut self, ttl: i32) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Sets the maximum number of messages the queue can hold.
    pub fn max_length(mut self, max: i32) -> Self {
        self.max_length = Some(max);
        self
    }

    /// Sets the maximum size in bytes the queue can hold.
    pub fn max_length_bytes(mut self, max_bytes: i32) -> Self {
        self.max_length_bytes = Some(max_bytes);
        self
    }

    /// Adds a Dead Letter Queue (DLQ) to the queue.
    ///
    /// The DLQ receives messages that are rejected, expired, or overflow from the main
    /// queue. Its name is the main queue name with a "-dlq" suffix.
    pub fn with_dlq(mut self) -> Self {
        self.dlq_name = Some(format!("{}-dlq", self.name));
        self
    }

    /// Definition of the dead letter queue, sharing this queue's flags.
    pub(crate) fn dlq_definition(&self) -> Option<QueueDefinition> {
        self.dlq_name.as_ref().map(|dlq| QueueDefinition {
            name: dlq.clone(),
            durable: self.durable,
            delete: self.delete,
            exclusive: self.exclusive,
            passive: self.passive,
            no_wait: self.no_wait,
            ..QueueDefinition::default()
        })
    }

    /// The arguments sent with the declaration: the free-form map, overridden by the
    /// typed options set on this definition.
    pub fn declare_arguments(&self) -> Arguments {
        let mut args = self.arguments.clone();

        if let Some(ttl) = self.ttl {
            args.insert(AMQP_HEADERS_MESSAGE_TTL, ttl);
        }

        if let Some(max) = self.max_length {
            args.insert(AMQP_HEADERS_MAX_LENGTH, max);
        }

        if let Some(max_bytes) = self.max_length_bytes {
            args.insert(AMQP_HEADERS_MAX_LENGTH_BYTES, max_bytes);
        }

        if let Some(dlq) = &self.dlq_name {
            args.insert(AMQP_HEADERS_DEAD_LETTER_EXCHANGE, "");
            args.insert(AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY, dlq.as_str());
        }

        args
    }
}

/// Configuration for binding a queue to an exchange.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QueueBinding {
    #[serde(rename = "queue_name")]
    pub(crate) queue_name: String,
    #[serde(rename = "exchange")]
    pub(crate) exchange_name: String,
    #[serde(default)]
    pub(crate) routing_key: String,
}

impl QueueBinding {
    /// Creates a new queue binding for the given queue.
    ///
    /// The exchange name and routing key start empty and are set with `exchange`
    /// and `routing_key`.
    pub fn new(queue: &str) -> QueueBinding {
        QueueBinding {
            queue_name: queue.to_owned(),
            exchange_name: String::new(),
            routing_key: String::new(),
        }
    }

    pub fn exchange(mut self, exchange: &str) -> Self {
        self.exchange_name = exchange.to_owned();
        self
    }

    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_key = key.to_owned();
        self
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn exchange_name(&self) -> &str {
        &self.exchange_name
    }

    pub fn key(&self) -> &str {
        &self.routing_key
    }

    /// Label used in logs and errors.
    pub(crate) fn label(&self) -> String {
        format!("{} -> {}", self.exchange_name, self.queue_name)
    }
}
