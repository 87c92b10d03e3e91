// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Messages
//!
//! Outbound and inbound message records. Bodies are opaque bytes and headers are an
//! opaque map; nothing here inspects business fields.

use crate::headers::Headers;
use uuid::Uuid;

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// A message to publish.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishMessage {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub headers: Headers,
    pub message_id: String,
    pub content_type: Option<String>,
    pub kind: Option<String>,
    /// Delivery mode 2 when set, 1 otherwise.
    pub persistent: bool,
}

impl PublishMessage {
    /// Creates a persistent message with a fresh message id.
    pub fn new(exchange: &str, routing_key: &str, body: impl Into<Vec<u8>>) -> Self {
        PublishMessage {
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            body: body.into(),
            headers: Headers::default(),
            message_id: Uuid::new_v4().to_string(),
            content_type: None,
            kind: None,
            persistent: true,
        }
    }

    /// A message for the default exchange, routed straight to the queue `queue`.
    pub fn to_queue(queue: &str, body: impl Into<Vec<u8>>) -> Self {
        PublishMessage::new("", queue, body)
    }

    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn content_type(mut self, content_type: &str) -> Self {
        self.content_type = Some(content_type.to_owned());
        self
    }

    pub fn json(self) -> Self {
        self.content_type(JSON_CONTENT_TYPE)
    }

    pub fn kind(mut self, kind: &str) -> Self {
        self.kind = Some(kind.to_owned());
        self
    }

    pub fn transient(mut self) -> Self {
        self.persistent = false;
        self
    }

    pub(crate) fn delivery_mode(&self) -> u8 {
        if self.persistent {
            2
        } else {
            1
        }
    }
}

/// A message delivered to a consumer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsumedMessage {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub body: Vec<u8>,
    pub headers: Headers,
    pub message_id: Option<String>,
    pub kind: Option<String>,
}
