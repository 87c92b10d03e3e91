// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Client
//!
//! Wires a [`BrokerHandle`], its optional [`ReconnectSupervisor`] and the
//! [`ChannelOps`] built on top of it. The supervisor is attached when the
//! configuration carries a `reconnect` section.

use crate::{
    amqp::LapinDialer,
    broker::AmqpDialer,
    channel::ChannelOps,
    configs::RabbitMQConfigs,
    document::TopologyDocument,
    errors::AmqpError,
    handle::BrokerHandle,
    supervisor::{ReconnectPolicy, ReconnectSupervisor},
    topology::TopologySummary,
};
use std::sync::Arc;
use tracing::info;

pub struct AmqpClient {
    handle: Arc<BrokerHandle>,
    channels: ChannelOps,
    supervisor: Option<ReconnectSupervisor>,
}

impl AmqpClient {
    /// Connects to RabbitMQ over lapin.
    pub async fn connect(configs: RabbitMQConfigs) -> Result<AmqpClient, AmqpError> {
        AmqpClient::connect_with(configs, LapinDialer::new()).await
    }

    pub async fn connect_with(
        configs: RabbitMQConfigs,
        dialer: Arc<dyn AmqpDialer>,
    ) -> Result<AmqpClient, AmqpError> {
        let handle = BrokerHandle::new(configs, dialer);
        handle.connect().await?;

        let supervisor = match &handle.configs().reconnect {
            Some(cfg) => {
                Some(ReconnectSupervisor::attach(&handle, ReconnectPolicy::from(cfg)).await?)
            }
            None => None,
        };

        info!(
            supervised = supervisor.is_some(),
            "amqp client ready"
        );

        Ok(AmqpClient {
            channels: ChannelOps::new(handle.clone()),
            handle,
            supervisor,
        })
    }

    pub fn handle(&self) -> &Arc<BrokerHandle> {
        &self.handle
    }

    pub fn channels(&self) -> &ChannelOps {
        &self.channels
    }

    pub fn supervisor(&self) -> Option<&ReconnectSupervisor> {
        self.supervisor.as_ref()
    }

    pub async fn is_connected(&self) -> bool {
        self.handle.is_connected().await
    }

    pub async fn apply_topology(
        &self,
        doc: &TopologyDocument,
    ) -> Result<TopologySummary, AmqpError> {
        self.channels.apply_topology(doc).await
    }

    /// Closes the connection and waits for the supervisor to stop.
    pub async fn close(self) -> Result<(), AmqpError> {
        let result = self.handle.close().await;

        if let Some(supervisor) = self.supervisor {
            supervisor.join().await;
        }

        result
    }
}
