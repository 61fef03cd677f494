// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Delivery Processing
//!
//! Handles one delivery end to end: decode, dispatch to the handler, resolve
//! at the broker with the handler's decision.
//!
//! A payload that fails to decode is logged and the handler still receives
//! `T::default()`, so the delivery is always dispatched and resolved. A
//! handler that panics is treated as having returned
//! [`AckType::NackDiscard`].

use crate::{
    ack::AckType, broker::Delivery, encoding::Encoding, errors::AmqpError,
    handler::ConsumerHandler, otel,
};
use futures_util::FutureExt;
use opentelemetry::{
    global::BoxedTracer,
    trace::{Span, Status},
    KeyValue,
};
use serde::de::DeserializeOwned;
use std::{borrow::Cow, panic::AssertUnwindSafe};
use tracing::{debug, error, warn};

/// Decodes, dispatches and resolves a single delivery.
///
/// # Returns
/// The decision that was applied, or the broker error raised while applying it
pub(crate) async fn consume<E, T>(
    tracer: &BoxedTracer,
    queue: &str,
    delivery: Delivery,
    handler: &dyn ConsumerHandler<T>,
) -> Result<AckType, AmqpError>
where
    E: Encoding,
    T: DeserializeOwned + Default + Send + 'static,
{
    let (ctx, mut span) = otel::new_span(&delivery.properties, tracer, queue);

    debug!(
        queue,
        exchange = delivery.exchange.as_str(),
        routing_key = delivery.routing_key.as_str(),
        redelivered = delivery.redelivered,
        "received message"
    );

    if let Some(content_type) = delivery.content_type() {
        if content_type != E::CONTENT_TYPE {
            warn!(
                queue,
                expected = E::CONTENT_TYPE,
                received = content_type,
                "content type does not match the subscription encoding"
            );
        }
    }

    let msg = match E::decode::<T>(&delivery.data) {
        Ok(msg) => msg,
        Err(err) => {
            warn!(error = err.to_string(), queue, "could not decode delivery");
            span.record_error(&err);
            T::default()
        }
    };

    let decision = match AssertUnwindSafe(handler.exec(&ctx, msg))
        .catch_unwind()
        .await
    {
        Ok(decision) => decision,
        Err(_) => {
            warn!(queue, "handler panicked, discarding message");
            span.set_status(Status::Error {
                description: Cow::from("handler panicked"),
            });
            AckType::NackDiscard
        }
    };

    match decision {
        AckType::Ack => debug!(queue, "message successfully processed"),
        AckType::NackRequeue => warn!(queue, "message requeued for redelivery"),
        AckType::NackDiscard => warn!(queue, "message discarded"),
    }
    span.set_attribute(KeyValue::new("messaging.ack", decision.to_string()));

    match delivery.resolve(decision).await {
        Err(err) => {
            error!(error = err.to_string(), queue, "error whiling resolving msg");
            span.record_error(&err);
            span.set_status(Status::Error {
                description: Cow::from("error to resolve msg"),
            });
            Err(err)
        }
        _ => {
            span.set_status(Status::Ok);
            Ok(decision)
        }
    }
}
