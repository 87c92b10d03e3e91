// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Topology Management
//!
//! Applies exchanges, queues and bindings to the broker in dependency order:
//! every exchange, then every queue, then every binding. Each declaration is
//! idempotent on the broker side, so applying the same topology twice leaves the
//! broker unchanged. The first rejected step aborts the run with a
//! [`AmqpError::TopologyError`] naming the phase and the object; later steps are not
//! attempted and nothing already applied is rolled back.

use crate::{
    broker::AmqpChannel,
    document::TopologyDocument,
    errors::{AmqpError, BrokerError, TopologyPhase},
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Trait defining the interface for topology management.
#[async_trait]
pub trait Topology {
    /// Adds an exchange definition to the topology.
    fn exchange(self, def: ExchangeDefinition) -> Self;

    /// Adds a queue definition to the topology.
    fn queue(self, def: QueueDefinition) -> Self;

    /// Adds a queue-to-exchange binding to the topology.
    fn queue_binding(self, binding: QueueBinding) -> Self;

    /// Installs the topology to the RabbitMQ server.
    ///
    /// Exchanges are declared first, then queues, then bindings. The first
    /// rejected declaration stops the run.
    ///
    /// # Returns
    /// * `Ok(TopologySummary)` with the count of entities applied per phase
    /// * `AmqpError::TopologyError` naming the phase and entity that was rejected
    async fn install(&self) -> Result<TopologySummary, AmqpError>;
}

/// Counts of objects applied by a successful run. Dead letter queues count as queues.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TopologySummary {
    pub exchanges: usize,
    pub queues: usize,
    pub bindings: usize,
}

/// Applies a topology over one channel.
pub struct TopologyApplier {
    channel: Arc<dyn AmqpChannel>,
    exchanges: Vec<ExchangeDefinition>,
    queues: Vec<QueueDefinition>,
    bindings: Vec<QueueBinding>,
}

impl TopologyApplier {
    pub fn new(channel: Arc<dyn AmqpChannel>) -> TopologyApplier {
        TopologyApplier {
            channel,
            exchanges: vec![],
            queues: vec![],
            bindings: vec![],
        }
    }

    /// Loads every exchange, queue and binding of `doc`, keeping the document order.
    pub fn from_document(channel: Arc<dyn AmqpChannel>, doc: &TopologyDocument) -> TopologyApplier {
        if !doc.routing_keys.is_empty() {
            debug!(
                routing_keys = doc.routing_keys.len(),
                "routing keys are informational, skipping"
            );
        }

        let applier = doc
            .exchanges
            .iter()
            .cloned()
            .fold(TopologyApplier::new(channel), |t, def| t.exchange(def));
        let applier = doc
            .queues
            .iter()
            .cloned()
            .fold(applier, |t, def| t.queue(def));

        doc.bindings
            .iter()
            .cloned()
            .fold(applier, |t, binding| t.queue_binding(binding))
    }

    async fn install_exchanges(&self) -> Result<usize, AmqpError> {
        for exch in &self.exchanges {
            debug!(name = %exch.name, kind = %exch.kind, "declaring exchange");

            self.channel
                .exchange_declare(exch)
                .await
                .map_err(|err| rejected(TopologyPhase::Exchange, &exch.name, err))?;
        }

        Ok(self.exchanges.len())
    }

    async fn install_queues(&self) -> Result<usize, AmqpError> {
        let mut declared = 0;

        for queue in &self.queues {
            // the dead letter target must exist before the queue that routes to it
            if let Some(dlq) = queue.dlq_definition() {
                debug!(name = %dlq.name, "declaring dead letter queue");
                self.declare_queue(&dlq).await?;
                declared += 1;
            }

            debug!(name = %queue.name, "declaring queue");
            self.declare_queue(queue).await?;
            declared += 1;
        }

        Ok(declared)
    }

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), AmqpError> {
        self.channel
            .queue_declare(def)
            .await
            .map(|_| ())
            .map_err(|err| rejected(TopologyPhase::Queue, &def.name, err))
    }

    async fn install_bindings(&self) -> Result<usize, AmqpError> {
        for binding in &self.bindings {
            debug!(
                exchange = %binding.exchange_name,
                queue = %binding.queue_name,
                routing_key = %binding.routing_key,
                "binding queue"
            );

            self.channel
                .queue_bind(binding)
                .await
                .map_err(|err| rejected(TopologyPhase::Binding, &binding.label(), err))?;
        }

        Ok(self.bindings.len())
    }
}

fn rejected(phase: TopologyPhase, name: &str, err: BrokerError) -> AmqpError {
    error!(
        error = err.to_string(),
        phase = %phase,
        name = name,
        "failure to apply topology"
    );

    AmqpError::TopologyError {
        phase,
        name: name.to_owned(),
        reason: err.to_string(),
    }
}

#[async_trait]
impl Topology for TopologyApplier {
    fn exchange(mut self, def: ExchangeDefinition) -> Self {
        self.exchanges.push(def);
        self
    }

    fn queue(mut self, def: QueueDefinition) -> Self {
        self.queues.push(def);
        self
    }

    fn queue_binding(mut self, binding: QueueBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    async fn install(&self) -> Result<TopologySummary, AmqpError> {
        let exchanges = self.install_exchanges().await?;
        let queues = self.install_queues().await?;
        let bindings = self.install_bindings().await?;

        let summary = TopologySummary {
            exchanges,
            queues,
            bindings,
        };
        info!(
            exchanges = summary.exchanges,
            queues = summary.queues,
            bindings = summary.bindings,
            "topology applied"
        );

        Ok(summary)
    }
}
