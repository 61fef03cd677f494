// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Subscriptions
//!
//! `subscribe` declares and binds the queue, opens a manually acknowledged
//! consumer on a channel dedicated to the subscription, and spawns a task that
//! resolves every delivery through a [`ConsumerHandler`]. The call returns as
//! soon as the consumer is open.
//!
//! The task ends when the delivery stream closes or when
//! [`Subscription::cancel`] is called, and closes its channel on the way out.
//! Dropping the [`Subscription`] leaves the task running.

use crate::{
    broker::{AmqpChannel, AmqpConnection, DeliveryStream},
    consumer::consume,
    encoding::{Binary, Encoding, Json},
    errors::SubscribeError,
    handler::ConsumerHandler,
    topology::declare_and_bind,
};
use futures_util::StreamExt;
use lapin::options::BasicConsumeOptions;
use opentelemetry::global;
use serde::de::DeserializeOwned;
use std::{fmt, sync::Arc};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, error, warn};

/// Handle of a running subscription.
pub struct Subscription {
    queue: String,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Subscription {
    /// Name of the queue being consumed.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Asks the consumer task to stop after the delivery it is processing.
    ///
    /// Calling it more than once, or after the task ended, has no effect.
    pub fn cancel(&self) {
        self.stop.send_replace(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the consumer task to end.
    pub async fn join(self) {
        if let Err(err) = self.task.await {
            error!(
                error = err.to_string(),
                queue = self.queue.as_str(),
                "consumer task failed"
            );
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("queue", &self.queue)
            .field("finished", &self.task.is_finished())
            .finish()
    }
}

/// Subscribes `handler` to messages encoded with `E`.
///
/// # Parameters
/// * `conn` - The shared broker connection
/// * `exchange` - Exchange the queue is bound to
/// * `queue_name` - Queue to declare and consume
/// * `routing_key` - Binding pattern
/// * `durable` - Durability of the queue, see [`declare_and_bind`]
/// * `handler` - Invoked once per delivery
pub async fn subscribe<E, T, H>(
    conn: &dyn AmqpConnection,
    exchange: &str,
    queue_name: &str,
    routing_key: &str,
    durable: bool,
    handler: H,
) -> Result<Subscription, SubscribeError>
where
    E: Encoding,
    T: DeserializeOwned + Default + Send + 'static,
    H: ConsumerHandler<T> + 'static,
{
    let (channel, _) = declare_and_bind(conn, exchange, queue_name, routing_key, durable).await?;

    let deliveries = match channel
        .basic_consume(
            queue_name,
            "",
            BasicConsumeOptions {
                no_local: false,
                no_ack: false,
                exclusive: false,
                nowait: false,
            },
        )
        .await
    {
        Err(err) => {
            error!(error = err.to_string(), queue = queue_name, "error to create the consumer");
            close(channel.as_ref(), queue_name).await;
            return Err(SubscribeError::Consume {
                queue: queue_name.to_owned(),
                source: err,
            });
        }
        Ok(stream) => stream,
    };

    let (stop, stopped) = watch::channel(false);
    let task = tokio::spawn(run::<E, T>(
        channel,
        queue_name.to_owned(),
        deliveries,
        Box::new(handler),
        stopped,
    ));

    debug!(queue = queue_name, exchange, routing_key, "subscribed");

    Ok(Subscription {
        queue: queue_name.to_owned(),
        stop,
        task,
    })
}

/// Subscribes `handler` to JSON messages.
pub async fn subscribe_json<T, H>(
    conn: &dyn AmqpConnection,
    exchange: &str,
    queue_name: &str,
    routing_key: &str,
    durable: bool,
    handler: H,
) -> Result<Subscription, SubscribeError>
where
    T: DeserializeOwned + Default + Send + 'static,
    H: ConsumerHandler<T> + 'static,
{
    subscribe::<Json, T, H>(conn, exchange, queue_name, routing_key, durable, handler).await
}

/// Subscribes `handler` to bincode messages.
pub async fn subscribe_binary<T, H>(
    conn: &dyn AmqpConnection,
    exchange: &str,
    queue_name: &str,
    routing_key: &str,
    durable: bool,
    handler: H,
) -> Result<Subscription, SubscribeError>
where
    T: DeserializeOwned + Default + Send + 'static,
    H: ConsumerHandler<T> + 'static,
{
    subscribe::<Binary, T, H>(conn, exchange, queue_name, routing_key, durable, handler).await
}

async fn run<E, T>(
    channel: Arc<dyn AmqpChannel>,
    queue: String,
    mut deliveries: DeliveryStream,
    handler: Box<dyn ConsumerHandler<T>>,
    mut stop: watch::Receiver<bool>,
) where
    E: Encoding,
    T: DeserializeOwned + Default + Send + 'static,
{
    let tracer = global::tracer("amqp consumer");
    // false once the Subscription handle is gone
    let mut watching = true;

    loop {
        tokio::select! {
            biased;

            // only `true` is ever sent
            changed = stop.changed(), if watching => match changed {
                Ok(()) => {
                    debug!(queue, "subscription cancelled");
                    break;
                }
                Err(_) => watching = false,
            },

            next = deliveries.next() => match next {
                Some(Ok(delivery)) => {
                    let consumed = consume::<E, T>(&tracer, &queue, delivery, handler.as_ref()).await;
                    if let Err(err) = consumed {
                        error!(error = err.to_string(), queue, "error consume msg");
                    }
                }
                Some(Err(err)) => error!(error = err.to_string(), queue, "errors consume msg"),
                None => {
                    debug!(queue, "delivery stream closed");
                    break;
                }
            },
        }
    }

    drop(deliveries);
    close(channel.as_ref(), &queue).await;
}

async fn close(channel: &dyn AmqpChannel, queue: &str) {
    if let Err(err) = channel.close().await {
        warn!(error = err.to_string(), queue, "failure to close consumer channel");
    }
}
