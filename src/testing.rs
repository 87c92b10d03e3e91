// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! In-memory broker used by the unit tests. Declarations follow RabbitMQ's rules:
//! redeclaring with different parameters is a 406, binding unknown endpoints is a
//! 404 and the default exchange always exists.

use crate::{
    broker::{
        AmqpChannel, AmqpConnection, AmqpDialer, CloseNotification, CloseNotifier,
        DeliveryStream, QueueInfo,
    },
    configs::RabbitMQConfigs,
    errors::{BrokerError, BrokerErrorKind},
    exchange::ExchangeDefinition,
    handle::BrokerHandle,
    headers::Headers,
    message::{ConsumedMessage, PublishMessage},
    queue::{QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::{sync::mpsc, time::Instant};

type Sender = mpsc::UnboundedSender<Result<ConsumedMessage, BrokerError>>;

#[derive(Default)]
struct BrokerState {
    exchanges: BTreeMap<String, ExchangeDefinition>,
    queues: BTreeMap<String, QueueDefinition>,
    bindings: BTreeSet<(String, String, String)>,
    published: Vec<PublishMessage>,
    consumers: BTreeMap<String, Vec<(String, bool, Sender)>>,
    acks: Vec<u64>,
    nacks: Vec<(u64, bool)>,
    next_tag: u64,
    channels_opened: usize,
    channels_closed: usize,
    confirm_delay: Option<Duration>,
    nack_publishes: bool,
}

#[derive(Default)]
pub(crate) struct FakeBroker {
    state: Mutex<BrokerState>,
}

impl FakeBroker {
    pub(crate) fn new() -> Arc<FakeBroker> {
        Arc::new(FakeBroker::default())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap()
    }

    pub(crate) fn exchange(&self, name: &str) -> Option<ExchangeDefinition> {
        self.lock().exchanges.get(name).cloned()
    }

    pub(crate) fn queue(&self, name: &str) -> Option<QueueDefinition> {
        self.lock().queues.get(name).cloned()
    }

    pub(crate) fn exchange_names(&self) -> Vec<String> {
        self.lock().exchanges.keys().cloned().collect()
    }

    pub(crate) fn queue_names(&self) -> Vec<String> {
        self.lock().queues.keys().cloned().collect()
    }

    pub(crate) fn bindings(&self) -> Vec<(String, String, String)> {
        self.lock().bindings.iter().cloned().collect()
    }

    pub(crate) fn add_exchange(&self, def: ExchangeDefinition) {
        self.lock().exchanges.insert(def.name.clone(), def);
    }

    pub(crate) fn add_queue(&self, def: QueueDefinition) {
        self.lock().queues.insert(def.name.clone(), def);
    }

    pub(crate) fn published(&self) -> Vec<PublishMessage> {
        self.lock().published.clone()
    }

    pub(crate) fn acks(&self) -> Vec<u64> {
        self.lock().acks.clone()
    }

    pub(crate) fn nacks(&self) -> Vec<(u64, bool)> {
        self.lock().nacks.clone()
    }

    pub(crate) fn channels_opened(&self) -> usize {
        self.lock().channels_opened
    }

    pub(crate) fn channels_closed(&self) -> usize {
        self.lock().channels_closed
    }

    pub(crate) fn set_confirm_delay(&self, delay: Duration) {
        self.lock().confirm_delay = Some(delay);
    }

    pub(crate) fn nack_publishes(&self) {
        self.lock().nack_publishes = true;
    }

    /// Consumers registered on `queue` as (tag, no_ack).
    pub(crate) fn consumers(&self, queue: &str) -> Vec<(String, bool)> {
        self.lock()
            .consumers
            .get(queue)
            .map(|list| {
                list.iter()
                    .map(|(tag, no_ack, _)| (tag.clone(), *no_ack))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Delivers a message to every consumer of `queue`, returning its delivery tag.
    pub(crate) fn deliver(&self, queue: &str, body: &[u8], headers: Headers) -> u64 {
        let mut state = self.lock();
        state.next_tag += 1;
        let tag = state.next_tag;

        if let Some(consumers) = state.consumers.get(queue) {
            for (_, _, sender) in consumers {
                let _ = sender.send(Ok(ConsumedMessage {
                    queue: queue.to_owned(),
                    routing_key: queue.to_owned(),
                    delivery_tag: tag,
                    body: body.to_vec(),
                    headers: headers.clone(),
                    ..ConsumedMessage::default()
                }));
            }
        }

        tag
    }

    /// Fails every consumer of `queue` with a stream error.
    pub(crate) fn fail_consumers(&self, queue: &str) {
        if let Some(consumers) = self.lock().consumers.remove(queue) {
            for (_, _, sender) in consumers {
                let _ = sender.send(Err(BrokerError::new(
                    BrokerErrorKind::ChannelClosed,
                    "channel closed",
                )));
            }
        }
    }

    /// Ends the delivery streams of every consumer of `queue`.
    pub(crate) fn cancel_consumers(&self, queue: &str) {
        self.lock().consumers.remove(queue);
    }
}

pub(crate) struct FakeDialer {
    broker: Arc<FakeBroker>,
    fail_remaining: AtomicUsize,
    sever_remaining: AtomicUsize,
    hang: AtomicBool,
    delay: Mutex<Option<Duration>>,
    attempts: Mutex<Vec<Instant>>,
    connections: Mutex<Vec<Arc<FakeConnection>>>,
}

impl FakeDialer {
    pub(crate) fn new(broker: Arc<FakeBroker>) -> Arc<FakeDialer> {
        Arc::new(FakeDialer {
            broker,
            fail_remaining: AtomicUsize::new(0),
            sever_remaining: AtomicUsize::new(0),
            hang: AtomicBool::new(false),
            delay: Mutex::new(None),
            attempts: Mutex::new(vec![]),
            connections: Mutex::new(vec![]),
        })
    }

    /// Makes the next `n` dials fail.
    pub(crate) fn fail_next(&self, n: usize) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    pub(crate) fn fail_always(&self) {
        self.fail_next(usize::MAX);
    }

    /// Makes the next `n` dials return connections that are already severed.
    pub(crate) fn sever_next(&self, n: usize) {
        self.sever_remaining.store(n, Ordering::SeqCst);
    }

    /// Makes every later dial wait forever, like an unreachable host.
    pub(crate) fn hang(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub(crate) fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }

    pub(crate) fn last_connection(&self) -> Arc<FakeConnection> {
        self.connections.lock().unwrap().last().cloned().unwrap()
    }

    pub(crate) fn connections(&self) -> Vec<Arc<FakeConnection>> {
        self.connections.lock().unwrap().clone()
    }
}

#[async_trait]
impl AmqpDialer for FakeDialer {
    async fn dial(
        &self,
        _configs: &RabbitMQConfigs,
    ) -> Result<Arc<dyn AmqpConnection>, BrokerError> {
        self.attempts.lock().unwrap().push(Instant::now());

        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            if remaining != usize::MAX {
                self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            }
            return Err(BrokerError::new(BrokerErrorKind::Io, "connection refused"));
        }

        let conn = Arc::new(FakeConnection {
            broker: self.broker.clone(),
            open: Arc::new(AtomicBool::new(true)),
            notifier: CloseNotifier::new(),
            close_calls: AtomicUsize::new(0),
        });
        self.connections.lock().unwrap().push(conn.clone());

        let sever = self.sever_remaining.load(Ordering::SeqCst);
        if sever > 0 {
            self.sever_remaining.store(sever - 1, Ordering::SeqCst);
            conn.sever("CONNECTION_FORCED");
        }

        Ok(conn)
    }
}

pub(crate) struct FakeConnection {
    broker: Arc<FakeBroker>,
    open: Arc<AtomicBool>,
    notifier: CloseNotifier,
    close_calls: AtomicUsize,
}

impl FakeConnection {
    /// Simulates the broker dropping the connection.
    pub(crate) fn sever(&self, reason: &str) {
        self.open.store(false, Ordering::SeqCst);
        self.notifier.notify(Some(BrokerError::new(
            BrokerErrorKind::ConnectionClosed,
            reason,
        )));
    }

    pub(crate) fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AmqpConnection for FakeConnection {
    async fn channel(&self) -> Result<Arc<dyn AmqpChannel>, BrokerError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(BrokerError::new(
                BrokerErrorKind::ConnectionClosed,
                "connection is closed",
            ));
        }

        self.broker.lock().channels_opened += 1;
        Ok(Arc::new(FakeChannel {
            broker: self.broker.clone(),
            connection_open: self.open.clone(),
            open: AtomicBool::new(true),
        }))
    }

    fn notify_close(&self) -> CloseNotification {
        self.notifier.subscribe()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
        self.notifier.notify(None);
        Ok(())
    }
}

pub(crate) struct FakeChannel {
    broker: Arc<FakeBroker>,
    connection_open: Arc<AtomicBool>,
    open: AtomicBool,
}

impl FakeChannel {
    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(BrokerError::new(
                BrokerErrorKind::ChannelClosed,
                "channel is closed",
            ))
        }
    }
}

fn precondition(message: String) -> BrokerError {
    BrokerError::new(BrokerErrorKind::PreconditionFailed, message)
}

fn not_found(message: String) -> BrokerError {
    BrokerError::new(BrokerErrorKind::NotFound, message)
}

#[async_trait]
impl AmqpChannel for FakeChannel {
    async fn exchange_declare(&self, def: &ExchangeDefinition) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.lock();

        match state.exchanges.get(&def.name) {
            Some(existing) => {
                if existing.kind != def.kind
                    || existing.durable != def.durable
                    || existing.delete != def.delete
                    || existing.internal != def.internal
                {
                    return Err(precondition(format!(
                        "PRECONDITION_FAILED - inequivalent arg 'type' for exchange '{}'",
                        def.name
                    )));
                }
                Ok(())
            }
            None if def.passive => Err(not_found(format!(
                "NOT_FOUND - no exchange '{}'",
                def.name
            ))),
            None => {
                state.exchanges.insert(def.name.clone(), def.clone());
                Ok(())
            }
        }
    }

    async fn queue_declare(&self, def: &QueueDefinition) -> Result<QueueInfo, BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.lock();

        match state.queues.get(&def.name) {
            Some(existing) => {
                if existing.durable != def.durable
                    || existing.delete != def.delete
                    || existing.exclusive != def.exclusive
                    || existing.declare_arguments() != def.declare_arguments()
                {
                    return Err(precondition(format!(
                        "PRECONDITION_FAILED - inequivalent arg 'durable' for queue '{}'",
                        def.name
                    )));
                }
            }
            None if def.passive => {
                return Err(not_found(format!("NOT_FOUND - no queue '{}'", def.name)))
            }
            None => {
                state.queues.insert(def.name.clone(), def.clone());
            }
        }

        let consumer_count = state
            .consumers
            .get(&def.name)
            .map(|list| list.len() as u32)
            .unwrap_or_default();

        Ok(QueueInfo {
            name: def.name.clone(),
            message_count: 0,
            consumer_count,
        })
    }

    async fn queue_bind(&self, binding: &QueueBinding) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.lock();

        if !binding.exchange_name.is_empty()
            && !state.exchanges.contains_key(&binding.exchange_name)
        {
            return Err(not_found(format!(
                "NOT_FOUND - no exchange '{}'",
                binding.exchange_name
            )));
        }
        if !state.queues.contains_key(&binding.queue_name) {
            return Err(not_found(format!(
                "NOT_FOUND - no queue '{}'",
                binding.queue_name
            )));
        }

        state.bindings.insert((
            binding.exchange_name.clone(),
            binding.routing_key.clone(),
            binding.queue_name.clone(),
        ));
        Ok(())
    }

    async fn confirm_select(&self) -> Result<(), BrokerError> {
        self.ensure_open()
    }

    async fn publish(&self, msg: &PublishMessage) -> Result<(), BrokerError> {
        self.ensure_open()?;

        let (delay, nack) = {
            let mut state = self.broker.lock();
            if !msg.exchange.is_empty() && !state.exchanges.contains_key(&msg.exchange) {
                return Err(not_found(format!(
                    "NOT_FOUND - no exchange '{}'",
                    msg.exchange
                )));
            }
            state.published.push(msg.clone());
            (state.confirm_delay, state.nack_publishes)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if nack {
            return Err(BrokerError::new(BrokerErrorKind::Nacked, "nacked"));
        }

        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        no_ack: bool,
    ) -> Result<DeliveryStream, BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.lock();

        if !state.queues.contains_key(queue) {
            return Err(not_found(format!("NOT_FOUND - no queue '{}'", queue)));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state
            .consumers
            .entry(queue.to_owned())
            .or_default()
            .push((consumer_tag.to_owned(), no_ack, tx));

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.broker.lock().acks.push(delivery_tag);
        Ok(())
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.broker.lock().nacks.push((delivery_tag, requeue));
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if self.open.swap(false, Ordering::SeqCst) {
            self.broker.lock().channels_closed += 1;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && self.connection_open.load(Ordering::SeqCst)
    }
}

pub(crate) fn test_configs() -> RabbitMQConfigs {
    RabbitMQConfigs::new("localhost", "guest", "guest")
}

/// A channel on a fresh connection to `broker`.
pub(crate) async fn open_channel(broker: &Arc<FakeBroker>) -> Arc<dyn AmqpChannel> {
    let dialer = FakeDialer::new(broker.clone());
    let conn = dialer.dial(&test_configs()).await.unwrap();
    conn.channel().await.unwrap()
}

/// A fake broker, its dialer and a handle that has not connected yet.
pub(crate) fn fake_handle() -> (Arc<FakeBroker>, Arc<FakeDialer>, Arc<BrokerHandle>) {
    let broker = FakeBroker::new();
    let dialer = FakeDialer::new(broker.clone());
    let handle = BrokerHandle::new(test_configs(), dialer.clone());
    (broker, dialer, handle)
}
