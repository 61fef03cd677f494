// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Connection and Channel Management
//!
//! This module dials the RabbitMQ server and implements the broker seam
//! traits on top of lapin's connection, channel and acker types.

use crate::{
    broker::{AmqpChannel, AmqpConnection, Delivery, DeliveryAcker, DeliveryStream, QueueInfo},
    configs::RabbitMQConfigs,
    errors::AmqpError,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    acker::Acker,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::{FieldTable, LongString},
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use std::sync::Arc;
use tracing::{debug, error};

const REPLY_SUCCESS: u16 = 200;

/// Opens a connection to RabbitMQ.
///
/// The returned connection is shared by every topology, publish and subscribe
/// call; each of those opens its own channel on it.
///
/// # Parameters
/// * `cfg` - RabbitMQ connection details like host, port, credentials, etc.
///
/// # Example
/// ```ignore
/// let conn = new_amqp_connection(&RabbitMQConfigs::load()?).await?;
/// ```
pub async fn new_amqp_connection(cfg: &RabbitMQConfigs) -> Result<Arc<Connection>, AmqpError> {
    debug!("creating amqp connection...");
    let options = ConnectionProperties::default()
        .with_connection_name(LongString::from(cfg.connection_name.clone()));

    match Connection::connect_uri(cfg.uri(), options).await {
        Ok(conn) => {
            debug!("amqp connected");
            Ok(Arc::new(conn))
        }
        Err(err) => {
            error!(error = err.to_string(), "failure to connect");
            Err(AmqpError::ConnectionError(err.to_string()))
        }
    }
}

#[async_trait]
impl AmqpConnection for Connection {
    async fn create_channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
        debug!("creating amqp channel...");
        match Connection::create_channel(self).await {
            Ok(channel) => {
                debug!(id = channel.id(), "channel created");
                Ok(Arc::new(channel))
            }
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::ChannelError(err.to_string()))
            }
        }
    }
}

#[async_trait]
impl AmqpChannel for Channel {
    async fn exchange_declare(
        &self,
        exchange: &str,
        kind: lapin::ExchangeKind,
        options: ExchangeDeclareOptions,
        arguments: FieldTable,
    ) -> Result<(), AmqpError> {
        Channel::exchange_declare(self, exchange, kind, options, arguments)
            .await
            .map_err(|err| AmqpError::DeclareExchangeError(err.to_string()))
    }

    async fn queue_declare(
        &self,
        queue: &str,
        options: QueueDeclareOptions,
        arguments: FieldTable,
    ) -> Result<QueueInfo, AmqpError> {
        let declared = Channel::queue_declare(self, queue, options, arguments)
            .await
            .map_err(|err| AmqpError::DeclareQueueError(err.to_string()))?;

        Ok(QueueInfo {
            name: declared.name().to_string(),
            message_count: declared.message_count(),
            consumer_count: declared.consumer_count(),
        })
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), AmqpError> {
        Channel::queue_bind(
            self,
            queue,
            exchange,
            routing_key,
            QueueBindOptions { nowait: false },
            FieldTable::default(),
        )
        .await
        .map_err(|err| AmqpError::BindingError(err.to_string()))
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        options: BasicPublishOptions,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError> {
        // the returned confirm is dropped: no publisher-confirm wait
        Channel::basic_publish(self, exchange, routing_key, options, payload, properties)
            .await
            .map(|_| ())
            .map_err(|err| AmqpError::PublishingError(err.to_string()))
    }

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: BasicConsumeOptions,
    ) -> Result<DeliveryStream, AmqpError> {
        let consumer =
            Channel::basic_consume(self, queue, consumer_tag, options, FieldTable::default())
                .await
                .map_err(|err| AmqpError::ConsumerDeclarationError(err.to_string()))?;

        Ok(consumer
            .map(|result| {
                result
                    .map(|delivery| {
                        Delivery::new(
                            delivery.exchange.as_str(),
                            delivery.routing_key.as_str(),
                            delivery.redelivered,
                            delivery.properties,
                            delivery.data,
                            Box::new(LapinAcker(delivery.acker)),
                        )
                    })
                    .map_err(|err| AmqpError::ConsumerError(err.to_string()))
            })
            .boxed())
    }

    async fn close(&self) -> Result<(), AmqpError> {
        if !self.status().connected() {
            return Ok(());
        }

        Channel::close(self, REPLY_SUCCESS, "subscription closed")
            .await
            .map_err(|err| AmqpError::ChannelCloseError(err.to_string()))
    }
}

struct LapinAcker(Acker);

#[async_trait]
impl DeliveryAcker for LapinAcker {
    async fn ack(&self) -> Result<(), AmqpError> {
        self.0
            .ack(BasicAckOptions { multiple: false })
            .await
            .map_err(|err| AmqpError::AckMessageError(err.to_string()))
    }

    async fn nack(&self, requeue: bool) -> Result<(), AmqpError> {
        self.0
            .nack(BasicNackOptions {
                multiple: false,
                requeue,
            })
            .await
            .map_err(|err| AmqpError::NackMessageError(err.to_string()))
    }
}
