// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! In-memory broker implementing the broker seam, with direct, fanout and
//! topic routing, manual acknowledgment, requeue and dead-lettering.

#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use lapin::{
    options::{BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueDeclareOptions},
    types::{AMQPValue, FieldTable},
    BasicProperties, ExchangeKind,
};
use peril_pubsub::{
    broker::{AmqpChannel, AmqpConnection, Delivery, DeliveryAcker, DeliveryStream, QueueInfo},
    errors::AmqpError,
    queue::AMQP_HEADERS_DEAD_LETTER_EXCHANGE,
};
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicU16, Ordering},
        Arc, Mutex, MutexGuard, Weak,
    },
    time::Duration,
};
use tokio::sync::mpsc;

#[derive(Clone)]
struct Message {
    exchange: String,
    routing_key: String,
    properties: BasicProperties,
    data: Vec<u8>,
    redelivered: bool,
}

struct Consumer {
    channel: u16,
    tx: mpsc::UnboundedSender<Delivery>,
}

struct Queue {
    options: QueueDeclareOptions,
    dead_letter_exchange: Option<String>,
    ready: VecDeque<Message>,
    consumers: Vec<Consumer>,
    next_consumer: usize,
    acked: usize,
    requeued: usize,
    discarded: usize,
}

struct Unacked {
    channel: u16,
    queue: String,
    message: Message,
}

struct Binding {
    exchange: String,
    queue: String,
    key: String,
}

enum Resolution {
    Ack,
    Requeue,
    Discard,
}

#[derive(Default)]
struct State {
    me: Weak<Mutex<State>>,
    exchanges: HashMap<String, ExchangeKind>,
    queues: HashMap<String, Queue>,
    bindings: Vec<Binding>,
    unacked: HashMap<u64, Unacked>,
    next_tag: u64,
    stray_resolutions: usize,
    closed_channels: Vec<u16>,
}

#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
    next_channel: Arc<AtomicU16>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> MemoryBroker {
        MemoryBroker {
            state: Arc::new_cyclic(|me| {
                Mutex::new(State {
                    me: me.clone(),
                    ..Default::default()
                })
            }),
            next_channel: Arc::new(AtomicU16::new(1)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn queue_count(&self) -> usize {
        self.lock().queues.len()
    }

    pub fn has_queue(&self, queue: &str) -> bool {
        self.lock().queues.contains_key(queue)
    }

    pub fn binding_count(&self, queue: &str) -> usize {
        self.lock().bindings.iter().filter(|b| b.queue == queue).count()
    }

    pub fn ready(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, |q| q.ready.len())
    }

    pub fn unacked(&self, queue: &str) -> usize {
        self.lock().unacked.values().filter(|u| u.queue == queue).count()
    }

    pub fn acked(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, |q| q.acked)
    }

    pub fn requeued(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, |q| q.requeued)
    }

    pub fn discarded(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, |q| q.discarded)
    }

    pub fn consumers(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, |q| q.consumers.len())
    }

    /// Acks or nacks issued for tags that were already resolved or unknown.
    pub fn stray_resolutions(&self) -> usize {
        self.lock().stray_resolutions
    }

    pub fn closed_channels(&self) -> usize {
        self.lock().closed_channels.len()
    }

    /// Cancels every consumer of `queue` from the broker side.
    pub fn cancel_consumers(&self, queue: &str) {
        let mut state = self.lock();
        if let Some(q) = state.queues.get_mut(queue) {
            q.consumers.clear();
        }
    }
}

#[async_trait]
impl AmqpConnection for MemoryBroker {
    async fn create_channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
        Ok(Arc::new(MemoryChannel {
            id: self.next_channel.fetch_add(1, Ordering::SeqCst),
            state: self.state.clone(),
        }))
    }
}

pub struct MemoryChannel {
    id: u16,
    state: Arc<Mutex<State>>,
}

impl MemoryChannel {
    fn lock(&self) -> Result<MutexGuard<'_, State>, AmqpError> {
        let state = self.state.lock().unwrap();
        if state.closed_channels.contains(&self.id) {
            return Err(AmqpError::ChannelError(format!("channel {} is closed", self.id)));
        }
        Ok(state)
    }
}

#[async_trait]
impl AmqpChannel for MemoryChannel {
    async fn exchange_declare(
        &self,
        exchange: &str,
        kind: ExchangeKind,
        _options: ExchangeDeclareOptions,
        _arguments: FieldTable,
    ) -> Result<(), AmqpError> {
        let mut state = self.lock()?;
        match state.exchanges.get(exchange) {
            Some(existing) if *existing != kind => Err(AmqpError::DeclareExchangeError(format!(
                "PRECONDITION_FAILED - inequivalent arg 'type' for exchange '{exchange}'"
            ))),
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(exchange.to_owned(), kind);
                Ok(())
            }
        }
    }

    async fn queue_declare(
        &self,
        queue: &str,
        options: QueueDeclareOptions,
        arguments: FieldTable,
    ) -> Result<QueueInfo, AmqpError> {
        let mut state = self.lock()?;

        if let Some(existing) = state.queues.get(queue) {
            if existing.options.durable != options.durable
                || existing.options.exclusive != options.exclusive
                || existing.options.auto_delete != options.auto_delete
            {
                return Err(AmqpError::DeclareQueueError(format!(
                    "PRECONDITION_FAILED - inequivalent arg 'durable' for queue '{queue}'"
                )));
            }
        } else {
            let dead_letter_exchange = match arguments.inner().get(AMQP_HEADERS_DEAD_LETTER_EXCHANGE) {
                Some(AMQPValue::LongString(name)) => {
                    Some(String::from_utf8_lossy(name.as_bytes()).into_owned())
                }
                _ => None,
            };
            state.queues.insert(
                queue.to_owned(),
                Queue {
                    options,
                    dead_letter_exchange,
                    ready: VecDeque::new(),
                    consumers: vec![],
                    next_consumer: 0,
                    acked: 0,
                    requeued: 0,
                    discarded: 0,
                },
            );
        }

        let q = &state.queues[queue];
        Ok(QueueInfo {
            name: queue.to_owned(),
            message_count: q.ready.len() as u32,
            consumer_count: q.consumers.len() as u32,
        })
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), AmqpError> {
        let mut state = self.lock()?;

        if !state.exchanges.contains_key(exchange) {
            return Err(AmqpError::BindingError(format!(
                "NOT_FOUND - no exchange '{exchange}'"
            )));
        }
        if !state.queues.contains_key(queue) {
            return Err(AmqpError::BindingError(format!("NOT_FOUND - no queue '{queue}'")));
        }

        let exists = state
            .bindings
            .iter()
            .any(|b| b.queue == queue && b.exchange == exchange && b.key == routing_key);
        if !exists {
            state.bindings.push(Binding {
                exchange: exchange.to_owned(),
                queue: queue.to_owned(),
                key: routing_key.to_owned(),
            });
        }
        Ok(())
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        _options: BasicPublishOptions,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError> {
        let mut state = self.lock()?;

        if !state.exchanges.contains_key(exchange) {
            return Err(AmqpError::PublishingError(format!(
                "NOT_FOUND - no exchange '{exchange}'"
            )));
        }

        state.route(Message {
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            properties,
            data: payload.to_vec(),
            redelivered: false,
        });
        Ok(())
    }

    async fn basic_consume(
        &self,
        queue: &str,
        _consumer_tag: &str,
        _options: BasicConsumeOptions,
    ) -> Result<DeliveryStream, AmqpError> {
        let mut state = self.lock()?;

        let Some(q) = state.queues.get_mut(queue) else {
            return Err(AmqpError::ConsumerDeclarationError(format!(
                "NOT_FOUND - no queue '{queue}'"
            )));
        };

        let (tx, rx) = mpsc::unbounded_channel();
        q.consumers.push(Consumer { channel: self.id, tx });

        let backlog: Vec<Message> = q.ready.drain(..).collect();
        for message in backlog {
            state.enqueue(queue, message);
        }

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|delivery| (Ok(delivery), rx))
        })
        .boxed())
    }

    async fn close(&self) -> Result<(), AmqpError> {
        let mut state = self.state.lock().unwrap();
        if state.closed_channels.contains(&self.id) {
            return Ok(());
        }
        state.closed_channels.push(self.id);

        let mut emptied = vec![];
        for (name, q) in state.queues.iter_mut() {
            let before = q.consumers.len();
            q.consumers.retain(|c| c.channel != self.id);
            if before > 0 && q.consumers.is_empty() && q.options.auto_delete {
                emptied.push(name.clone());
            }
        }

        let orphaned: Vec<u64> = state
            .unacked
            .iter()
            .filter(|(_, u)| u.channel == self.id)
            .map(|(tag, _)| *tag)
            .collect();
        for tag in orphaned {
            if let Some(unacked) = state.unacked.remove(&tag) {
                let mut message = unacked.message;
                message.redelivered = true;
                state.enqueue(&unacked.queue, message);
            }
        }

        for name in emptied {
            state.queues.remove(&name);
            state.bindings.retain(|b| b.queue != name);
        }

        Ok(())
    }
}

impl State {
    fn route(&mut self, message: Message) {
        let Some(kind) = self.exchanges.get(&message.exchange).cloned() else {
            return;
        };

        let mut targets: Vec<String> = self
            .bindings
            .iter()
            .filter(|b| b.exchange == message.exchange)
            .filter(|b| match kind {
                ExchangeKind::Fanout => true,
                ExchangeKind::Topic => topic_matches(&b.key, &message.routing_key),
                ExchangeKind::Direct => b.key == message.routing_key,
                _ => false,
            })
            .map(|b| b.queue.clone())
            .collect();
        targets.dedup();

        for queue in targets {
            self.enqueue(&queue, message.clone());
        }
    }

    fn enqueue(&mut self, queue: &str, message: Message) {
        let tag = self.next_tag + 1;
        let me = self.me.clone();

        let Some(q) = self.queues.get_mut(queue) else {
            return;
        };

        while !q.consumers.is_empty() {
            let idx = q.next_consumer % q.consumers.len();
            q.next_consumer = q.next_consumer.wrapping_add(1);

            let delivery = Delivery::new(
                message.exchange.as_str(),
                message.routing_key.as_str(),
                message.redelivered,
                message.properties.clone(),
                message.data.clone(),
                Box::new(MemoryAcker {
                    state: me.clone(),
                    tag,
                }),
            );

            let channel = q.consumers[idx].channel;
            if q.consumers[idx].tx.send(delivery).is_ok() {
                self.next_tag = tag;
                self.unacked.insert(
                    tag,
                    Unacked {
                        channel,
                        queue: queue.to_owned(),
                        message,
                    },
                );
                return;
            }
            q.consumers.remove(idx);
        }

        q.ready.push_back(message);
    }

    fn resolve(&mut self, tag: u64, resolution: Resolution) -> Result<(), AmqpError> {
        let Some(unacked) = self.unacked.remove(&tag) else {
            self.stray_resolutions += 1;
            return Err(AmqpError::AckMessageError(format!(
                "PRECONDITION_FAILED - unknown delivery tag {tag}"
            )));
        };

        let Some(q) = self.queues.get_mut(&unacked.queue) else {
            return Ok(());
        };

        match resolution {
            Resolution::Ack => q.acked += 1,
            Resolution::Requeue => {
                q.requeued += 1;
                let mut message = unacked.message;
                message.redelivered = true;
                self.enqueue(&unacked.queue, message);
            }
            Resolution::Discard => {
                q.discarded += 1;
                if let Some(dlx) = q.dead_letter_exchange.clone() {
                    let mut message = unacked.message;
                    message.exchange = dlx;
                    message.redelivered = false;
                    self.route(message);
                }
            }
        }

        Ok(())
    }
}

struct MemoryAcker {
    state: Weak<Mutex<State>>,
    tag: u64,
}

impl MemoryAcker {
    fn resolve(&self, resolution: Resolution) -> Result<(), AmqpError> {
        let state = self
            .state
            .upgrade()
            .ok_or_else(|| AmqpError::AckMessageError("broker gone".to_owned()))?;
        let mut state = state.lock().unwrap();
        state.resolve(self.tag, resolution)
    }
}

#[async_trait]
impl DeliveryAcker for MemoryAcker {
    async fn ack(&self) -> Result<(), AmqpError> {
        self.resolve(Resolution::Ack)
    }

    async fn nack(&self, requeue: bool) -> Result<(), AmqpError> {
        if requeue {
            self.resolve(Resolution::Requeue)
        } else {
            self.resolve(Resolution::Discard)
        }
    }
}

/// Topic exchange matching: `*` is exactly one segment, `#` zero or more.
pub fn topic_matches(pattern: &str, key: &str) -> bool {
    fn matches(pattern: &[&str], key: &[&str]) -> bool {
        match pattern.split_first() {
            None => key.is_empty(),
            Some((&"#", rest)) => (0..=key.len()).any(|skip| matches(rest, &key[skip..])),
            Some((&"*", rest)) => !key.is_empty() && matches(rest, &key[1..]),
            Some((segment, rest)) => key.first() == Some(segment) && matches(rest, &key[1..]),
        }
    }

    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = key.split('.').collect();
    matches(&pattern, &key)
}

/// Polls `condition` until it holds, failing the test after two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Receives the next value sent by a handler, failing the test after two seconds.
pub async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for the handler")
        .expect("handler channel closed")
}
