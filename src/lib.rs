// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Resilient Client
//!
//! A connection handle that owns one broker connection, a reconnect supervisor that
//! restores it after abnormal closures with exponential backoff, per-operation channel
//! helpers for publish and consume, and a topology applier that declares exchanges,
//! queues and bindings in dependency order.

pub mod amqp;
pub mod broker;
pub mod channel;
pub mod client;
pub mod configs;
pub mod document;
pub mod errors;
pub mod exchange;
pub mod handle;
pub mod headers;
pub mod message;
pub mod queue;
pub mod supervisor;
pub mod topology;

#[cfg(test)]
mod testing;
