// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Seam
//!
//! Traits describing the subset of an AMQP client this crate relies on. The
//! lapin-backed implementations live in [`crate::channel`]; anything else that
//! implements these traits (an in-memory broker in tests, for instance) can be
//! threaded through the topology, publish and subscribe calls instead.

use crate::{ack::AckType, errors::AmqpError};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use lapin::{
    options::{BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueDeclareOptions},
    types::FieldTable,
    BasicProperties,
};
use std::{fmt, sync::Arc};

/// Continuous sequence of inbound deliveries for one consumer.
///
/// The stream ends when the channel that opened it is closed.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, AmqpError>>;

/// A connection able to open channels.
///
/// Implementations are shared by every component and are never mutated after
/// the initial dial.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AmqpConnection: Send + Sync {
    async fn create_channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError>;
}

/// A single AMQP channel.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AmqpChannel: Send + Sync {
    async fn exchange_declare(
        &self,
        exchange: &str,
        kind: lapin::ExchangeKind,
        options: ExchangeDeclareOptions,
        arguments: FieldTable,
    ) -> Result<(), AmqpError>;

    async fn queue_declare(
        &self,
        queue: &str,
        options: QueueDeclareOptions,
        arguments: FieldTable,
    ) -> Result<QueueInfo, AmqpError>;

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), AmqpError>;

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        options: BasicPublishOptions,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError>;

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: BasicConsumeOptions,
    ) -> Result<DeliveryStream, AmqpError>;

    async fn close(&self) -> Result<(), AmqpError>;
}

/// Broker-assigned resolution handle of a single delivery.
#[async_trait]
pub trait DeliveryAcker: Send + Sync {
    async fn ack(&self) -> Result<(), AmqpError>;

    async fn nack(&self, requeue: bool) -> Result<(), AmqpError>;
}

/// Declare-ok reply of a queue declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueInfo {
    pub name: String,
    pub message_count: u32,
    pub consumer_count: u32,
}

/// One inbound message awaiting resolution.
///
/// [`Delivery::resolve`] takes the delivery by value, so a delivery can be
/// resolved at most once.
pub struct Delivery {
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub properties: BasicProperties,
    pub data: Vec<u8>,
    acker: Box<dyn DeliveryAcker>,
}

impl Delivery {
    pub fn new(
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        redelivered: bool,
        properties: BasicProperties,
        data: Vec<u8>,
        acker: Box<dyn DeliveryAcker>,
    ) -> Delivery {
        Delivery {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            redelivered,
            properties,
            data,
            acker,
        }
    }

    /// Content type tag set by the publisher, if any.
    pub fn content_type(&self) -> Option<&str> {
        self.properties
            .content_type()
            .as_ref()
            .map(|content_type| content_type.as_str())
    }

    /// Resolves the delivery at the broker according to `decision`.
    pub async fn resolve(self, decision: AckType) -> Result<(), AmqpError> {
        match decision {
            AckType::Ack => self.acker.ack().await,
            AckType::NackRequeue => self.acker.nack(true).await,
            AckType::NackDiscard => self.acker.nack(false).await,
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .field("redelivered", &self.redelivered)
            .field("content_type", &self.content_type())
            .field("len", &self.data.len())
            .finish()
    }
}
