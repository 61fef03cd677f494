// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Topology Management
//!
//! Declares queues and exchanges and binds them together. Every operation
//! opens a fresh channel on the shared connection. When a step fails after
//! the channel was opened, the channel is closed before the error is returned
//! so the caller is never left holding a half-bound channel.

use crate::{
    broker::{AmqpChannel, AmqpConnection, QueueInfo},
    errors::TopologyError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Exchange that receives messages rejected without requeue or expired
pub const DEAD_LETTER_EXCHANGE: &str = "peril_dlx";
/// Queue collecting everything routed to [`DEAD_LETTER_EXCHANGE`]
pub const DEAD_LETTER_QUEUE: &str = "peril_dlq";

/// Declares a queue and binds it to `exchange` under `routing_key`.
///
/// The queue's durability, exclusivity and auto-delete flags all follow
/// `durable`, and the queue dead-letters to [`DEAD_LETTER_EXCHANGE`].
/// Declaring the same binding again with the same flag is a no-op at the
/// broker.
///
/// # Returns
/// The channel the queue was declared on, usable for consuming and
/// publishing, and the broker's description of the queue.
pub async fn declare_and_bind(
    conn: &dyn AmqpConnection,
    exchange: &str,
    queue_name: &str,
    routing_key: &str,
    durable: bool,
) -> Result<(Arc<dyn AmqpChannel>, QueueInfo), TopologyError> {
    ensure_named("exchange", exchange)?;
    ensure_named("queue", queue_name)?;

    let def = QueueDefinition::for_binding(queue_name, durable)
        .dead_letter_exchange(DEAD_LETTER_EXCHANGE);
    let binding = QueueBinding::new(queue_name)
        .exchange(exchange)
        .routing_key(routing_key);

    let channel = conn.create_channel().await.map_err(TopologyError::Channel)?;

    let installed = async {
        let queue = install_queue(channel.as_ref(), &def).await?;
        bind_queue(channel.as_ref(), &binding).await?;
        Ok::<_, TopologyError>(queue)
    }
    .await;

    match installed {
        Ok(queue) => Ok((channel, queue)),
        Err(err) => {
            discard(channel.as_ref()).await;
            Err(err)
        }
    }
}

/// Declares an exchange on its own channel, closing the channel afterwards.
pub async fn declare_exchange(
    conn: &dyn AmqpConnection,
    def: &ExchangeDefinition<'_>,
) -> Result<(), TopologyError> {
    ensure_named("exchange", def.name)?;

    let channel = conn.create_channel().await.map_err(TopologyError::Channel)?;
    let installed = install_exchange(channel.as_ref(), def).await;
    discard(channel.as_ref()).await;
    installed
}

/// Declares the durable fanout [`DEAD_LETTER_EXCHANGE`] and the durable
/// [`DEAD_LETTER_QUEUE`] bound to it.
pub async fn declare_dead_letter_topology(
    conn: &dyn AmqpConnection,
) -> Result<QueueInfo, TopologyError> {
    let exchange = ExchangeDefinition::new(DEAD_LETTER_EXCHANGE).fanout().durable();
    let queue = QueueDefinition::for_binding(DEAD_LETTER_QUEUE, true);
    let binding = QueueBinding::new(DEAD_LETTER_QUEUE)
        .exchange(DEAD_LETTER_EXCHANGE)
        .routing_key("");

    let channel = conn.create_channel().await.map_err(TopologyError::Channel)?;

    let installed = async {
        install_exchange(channel.as_ref(), &exchange).await?;
        let info = install_queue(channel.as_ref(), &queue).await?;
        bind_queue(channel.as_ref(), &binding).await?;
        Ok::<_, TopologyError>(info)
    }
    .await;

    discard(channel.as_ref()).await;
    installed
}

fn ensure_named(kind: &'static str, name: &str) -> Result<(), TopologyError> {
    if name.is_empty() {
        return Err(TopologyError::InvalidName { kind });
    }
    Ok(())
}

async fn install_exchange(
    channel: &dyn AmqpChannel,
    def: &ExchangeDefinition<'_>,
) -> Result<(), TopologyError> {
    debug!("creating exchange: {}", def.name);

    match channel
        .exchange_declare(def.name, def.kind.into(), def.options(), def.arguments())
        .await
    {
        Err(err) => {
            error!(
                error = err.to_string(),
                name = def.name,
                "error to declare the exchange"
            );
            Err(TopologyError::DeclareExchange {
                exchange: def.name.to_owned(),
                source: err,
            })
        }
        _ => {
            debug!("exchange: {} was created", def.name);
            Ok(())
        }
    }
}

async fn install_queue(
    channel: &dyn AmqpChannel,
    def: &QueueDefinition,
) -> Result<QueueInfo, TopologyError> {
    debug!("creating queue: {}", def.name);

    match channel
        .queue_declare(&def.name, def.options(), def.arguments())
        .await
    {
        Err(err) => {
            error!(
                error = err.to_string(),
                name = def.name.as_str(),
                "error to declare the queue"
            );
            Err(TopologyError::DeclareQueue {
                queue: def.name.clone(),
                source: err,
            })
        }
        Ok(info) => {
            debug!(
                messages = info.message_count,
                consumers = info.consumer_count,
                "queue: {} was created",
                def.name
            );
            Ok(info)
        }
    }
}

async fn bind_queue(
    channel: &dyn AmqpChannel,
    binding: &QueueBinding<'_>,
) -> Result<(), TopologyError> {
    debug!(
        "binding queue: {} to the exchange: {} with the key: {}",
        binding.queue_name, binding.exchange_name, binding.routing_key
    );

    match channel
        .queue_bind(
            binding.queue_name,
            binding.exchange_name,
            binding.routing_key,
        )
        .await
    {
        Err(err) => {
            error!(error = err.to_string(), "error to bind queue to exchange");
            Err(TopologyError::Bind {
                exchange: binding.exchange_name.to_owned(),
                queue: binding.queue_name.to_owned(),
                key: binding.routing_key.to_owned(),
                source: err,
            })
        }
        _ => Ok(()),
    }
}

async fn discard(channel: &dyn AmqpChannel) {
    if let Err(err) = channel.close().await {
        warn!(error = err.to_string(), "failure to close topology channel");
    }
}
