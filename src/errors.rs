// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types
//!
//! Two layers of errors live here. `BrokerError` is what the raw broker capability
//! (see [`crate::broker`]) reports, classified by the protocol reply that caused it.
//! `AmqpError` is the crate's public taxonomy returned by the handle, the channel
//! operations and the topology applier.

use std::fmt;
use thiserror::Error;

/// The declaration phase a topology failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopologyPhase {
    Exchange,
    Queue,
    Binding,
}

impl fmt::Display for TopologyPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopologyPhase::Exchange => write!(f, "exchange"),
            TopologyPhase::Queue => write!(f, "queue"),
            TopologyPhase::Binding => write!(f, "binding"),
        }
    }
}

/// Represents errors that can occur during AMQP/RabbitMQ operations.
///
/// Only connection loss is ever retried, and only by the reconnect supervisor.
/// Every other variant is surfaced to the caller as-is.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// Internal errors that don't fit into other categories
    #[error("internal error")]
    InternalError,

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect: {0}")]
    ConnectionError(String),

    /// The handle holds no live connection
    #[error("not connected")]
    NotConnected,

    /// The handle's shutdown signal fired
    #[error("connection handle was shut down")]
    ShutDown,

    /// Error creating a channel from an established connection
    #[error("failure to create a channel: {0}")]
    ChannelError(String),

    /// A declaration or binding was rejected while applying a topology
    #[error("failure to apply {phase} `{name}`: {reason}")]
    TopologyError {
        phase: TopologyPhase,
        name: String,
        reason: String,
    },

    /// An object with the same name exists with different parameters
    #[error("`{0}` already exists with different parameters")]
    TopologyConflictError(String),

    /// Error binding a consumer to a queue
    #[error("failure to declare consumer on `{0}`")]
    BindingConsumerError(String),

    /// Error consuming a message
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error negative-acknowledging a message
    #[error("failure to nack message")]
    NackMessageError,

    /// Error publishing a message
    #[error("failure to publish: {0}")]
    PublishingError(String),

    /// The caller cancelled a publish before the broker acknowledged it
    #[error("publish cancelled")]
    Cancelled,

    /// The publish deadline passed before the broker acknowledged it
    #[error("publish deadline exceeded")]
    DeadlineExceeded,

    /// Error reading or parsing a topology document
    #[error("failure to load topology document: {0}")]
    DocumentError(String),
}

/// Classification of a failure reported by the broker capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerErrorKind {
    /// 406: redeclaration with different parameters
    PreconditionFailed,
    /// 404: the referenced exchange or queue does not exist
    NotFound,
    ConnectionClosed,
    ChannelClosed,
    /// The broker negatively confirmed a publish
    Nacked,
    Io,
    Other,
}

/// Error reported by the raw broker capability.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct BrokerError {
    pub kind: BrokerErrorKind,
    pub message: String,
}

impl BrokerError {
    pub fn new(kind: BrokerErrorKind, message: impl Into<String>) -> Self {
        BrokerError {
            kind,
            message: message.into(),
        }
    }

    pub fn is_precondition_failed(&self) -> bool {
        self.kind == BrokerErrorKind::PreconditionFailed
    }
}
