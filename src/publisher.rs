// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Publisher
//!
//! Encodes a typed value with the chosen [`Encoding`] and hands it to a
//! channel for delivery to an exchange. Publishing is fire-and-forget: the
//! messages are neither mandatory nor immediate and no publisher confirm is
//! awaited, so a successful return means the channel accepted the message.

use crate::{
    broker::AmqpChannel,
    encoding::{Binary, Encoding, Json},
    errors::PublishError,
    otel,
};
use lapin::{options::BasicPublishOptions, types::ShortString, BasicProperties};
use opentelemetry::Context;
use serde::Serialize;
use tracing::{debug, error};
use uuid::Uuid;

/// Publishes `value` encoded with `E` to `exchange` under `routing_key`.
///
/// An encoding failure returns before anything is sent to the broker.
pub async fn publish<E, T>(
    ctx: &Context,
    channel: &dyn AmqpChannel,
    exchange: &str,
    routing_key: &str,
    value: &T,
) -> Result<(), PublishError>
where
    E: Encoding,
    T: Serialize + ?Sized,
{
    let payload = E::encode(value).map_err(|err| {
        error!(error = err.to_string(), "error encoding message");
        err
    })?;

    let properties = BasicProperties::default()
        .with_content_type(ShortString::from(E::CONTENT_TYPE))
        .with_message_id(ShortString::from(Uuid::new_v4().to_string()))
        .with_headers(otel::inject_headers(ctx));

    match channel
        .basic_publish(
            exchange,
            routing_key,
            BasicPublishOptions {
                immediate: false,
                mandatory: false,
            },
            &payload,
            properties,
        )
        .await
    {
        Err(err) => {
            error!(
                error = err.to_string(),
                exchange, routing_key, "error publishing message"
            );
            Err(PublishError::Transport {
                exchange: exchange.to_owned(),
                key: routing_key.to_owned(),
                source: err,
            })
        }
        _ => {
            debug!(
                exchange,
                routing_key,
                content_type = E::CONTENT_TYPE,
                "message published"
            );
            Ok(())
        }
    }
}

/// Publishes `value` as JSON.
pub async fn publish_json<T>(
    ctx: &Context,
    channel: &dyn AmqpChannel,
    exchange: &str,
    routing_key: &str,
    value: &T,
) -> Result<(), PublishError>
where
    T: Serialize + ?Sized,
{
    publish::<Json, T>(ctx, channel, exchange, routing_key, value).await
}

/// Publishes `value` as bincode.
pub async fn publish_binary<T>(
    ctx: &Context,
    channel: &dyn AmqpChannel,
    exchange: &str,
    routing_key: &str,
    value: &T,
) -> Result<(), PublishError>
where
    T: Serialize + ?Sized,
{
    publish::<Binary, T>(ctx, channel, exchange, routing_key, value).await
}
