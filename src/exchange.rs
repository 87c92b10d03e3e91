// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Exchange Definitions
//!
//! Exchanges are the routing mechanism in RabbitMQ that determine how messages are
//! distributed to queues. An `ExchangeDefinition` is a flat record of declaration
//! parameters; it is built either with the builder methods below or deserialized from
//! an `exchanges` entry of a topology document.

use crate::headers::{Arguments, HeaderValue};
use serde::Deserialize;
use std::fmt;

/// Constant for the header field used to specify the delayed exchange type
pub const AMQP_HEADERS_DELAYED_EXCHANGE_TYPE: &str = "x-delayed-type";

/// Exchange type of the delayed message plugin
pub const X_DELAYED_MESSAGE: &str = "x-delayed-message";

/// Represents the types of exchanges available in RabbitMQ.
///
/// Each exchange type has specific routing behavior:
/// - Direct: Routes messages to queues based on an exact match of routing keys
/// - Fanout: Broadcasts messages to all bound queues regardless of routing keys
/// - Topic: Routes messages based on wildcard pattern matching of routing keys
/// - Headers: Routes based on message header values instead of routing keys
/// - XMessageDelayed: Extension for delayed message delivery (plugin required)
/// - Custom: Any other plugin-provided type, passed to the broker verbatim
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum ExchangeKind {
    #[default]
    Direct,
    Fanout,
    Topic,
    Headers,
    XMessageDelayed,
    Custom(String),
}

impl From<String> for ExchangeKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "direct" => ExchangeKind::Direct,
            "fanout" => ExchangeKind::Fanout,
            "topic" => ExchangeKind::Topic,
            "headers" => ExchangeKind::Headers,
            X_DELAYED_MESSAGE => ExchangeKind::XMessageDelayed,
            _ => ExchangeKind::Custom(value),
        }
    }
}

impl From<&str> for ExchangeKind {
    fn from(value: &str) -> Self {
        ExchangeKind::from(value.to_owned())
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeKind::Direct => write!(f, "direct"),
            ExchangeKind::Fanout => write!(f, "fanout"),
            ExchangeKind::Topic => write!(f, "topic"),
            ExchangeKind::Headers => write!(f, "headers"),
            ExchangeKind::XMessageDelayed => write!(f, "{}", X_DELAYED_MESSAGE),
            ExchangeKind::Custom(kind) => write!(f, "{}", kind),
        }
    }
}

impl From<&ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: &ExchangeKind) -> Self {
        match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeKind::Headers => lapin::ExchangeKind::Headers,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
            ExchangeKind::XMessageDelayed => {
                lapin::ExchangeKind::Custom(X_DELAYED_MESSAGE.to_owned())
            }
            ExchangeKind::Custom(kind) => lapin::ExchangeKind::Custom(kind.clone()),
        }
    }
}

/// Definition of a RabbitMQ exchange with its configuration parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExchangeDefinition {
    pub(crate) name: String,
    #[serde(rename = "type", default)]
    pub(crate) kind: ExchangeKind,
    #[serde(rename = "autoDelete", default)]
    pub(crate) delete: bool,
    #[serde(default)]
    pub(crate) durable: bool,
    #[serde(default)]
    pub(crate) passive: bool,
    #[serde(default)]
    pub(crate) internal: bool,
    #[serde(rename = "noWait", default)]
    pub(crate) no_wait: bool,
    #[serde(default)]
    pub(crate) arguments: Arguments,
}

impl ExchangeDefinition {
    /// Creates a new, non-durable direct exchange definition.
    pub fn new(name: &str) -> ExchangeDefinition {
        ExchangeDefinition {
            name: name.to_owned(),
            kind: ExchangeKind::Direct,
            delete: false,
            durable: false,
            passive: false,
            internal: false,
            no_wait: false,
            arguments: Arguments::default(),
        }
    }

    /// The exchange name as declared on the broker.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The routing type the exchange is declared with.
    pub fn exchange_kind(&self) -> &ExchangeKind {
        &self.kind
    }

    /// Extra `x-` arguments sent with the declaration.
    pub fn arguments(&self) -> &Arguments {
        &self.arguments
    }

    /// Sets the exchange type.
    pub fn kind(mut self, kind: ExchangeKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn direct(mut self) -> Self {
        self.kind = ExchangeKind::Direct;
        self
    }

    pub fn fanout(mut self) -> Self {
        self.kind = ExchangeKind::Fanout;
        self
    }

    pub fn topic(mut self) -> Self {
        self.kind = ExchangeKind::Topic;
        self
    }

    /// Creates a delayed direct exchange.
    ///
    /// This requires the x-delayed-message plugin to be installed on the RabbitMQ server.
    pub fn direct_delayed(self) -> Self {
        self.delayed("direct")
    }

    /// Creates a delayed fanout exchange.
    ///
    /// This requires the x-delayed-message plugin to be installed on the RabbitMQ server.
    pub fn fanout_delayed(self) -> Self {
        self.delayed("fanout")
    }

    fn delayed(mut self, routing: &str) -> Self {
        self.kind = ExchangeKind::XMessageDelayed;
        self.arguments
            .insert(AMQP_HEADERS_DELAYED_EXCHANGE_TYPE, routing);
        self
    }

    /// Adds a single declaration argument.
    pub fn argument(mut self, key: &str, value: impl Into<HeaderValue>) -> Self {
        self.arguments.insert(key, value);
        self
    }

    /// Sets the exchange to auto-delete when no longer used.
    pub fn delete(mut self) -> Self {
        self.delete = true;
        self
    }

    /// Makes the exchange durable, persisting across broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Makes the exchange passive, checking for existence without creating it.
    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }

    /// Makes the exchange internal, preventing direct publishing.
    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    /// Declares without waiting for the broker's `declare-ok`.
    pub fn no_wait(mut self) -> Self {
        self.no_wait = true;
        self
    }
}
