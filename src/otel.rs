// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # OpenTelemetry Integration
//!
//! Propagates trace context through AMQP message headers: the publisher
//! injects the caller's context, the consumer extracts it and opens a consumer
//! span around each delivery.

use lapin::{
    types::{AMQPValue, FieldTable, ShortString},
    BasicProperties,
};
use opentelemetry::{
    global::{self, BoxedSpan, BoxedTracer},
    propagation::{Extractor, Injector},
    trace::{SpanKind, Tracer},
    Context,
};
use std::{borrow::Cow, collections::BTreeMap};
use tracing::warn;

/// Writes propagation fields into the header table of an outgoing message.
pub(crate) struct HeaderInjector<'a>(pub(crate) &'a mut BTreeMap<ShortString, AMQPValue>);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.0.insert(
            ShortString::from(key.to_ascii_lowercase()),
            AMQPValue::LongString(value.into()),
        );
    }
}

/// Reads propagation fields from the headers of a delivery without copying them.
///
/// Only string valued headers are visible; anything else is skipped.
pub(crate) struct HeaderExtractor<'a>(pub(crate) Option<&'a FieldTable>);

impl HeaderExtractor<'_> {
    fn text<'v>(key: &str, value: &'v AMQPValue) -> Option<&'v str> {
        match value {
            AMQPValue::ShortString(value) => Some(value.as_str()),
            AMQPValue::LongString(value) => std::str::from_utf8(value.as_bytes())
                .map_err(|err| warn!(header = key, error = %err, "non utf-8 trace header"))
                .ok(),
            _ => None,
        }
    }
}

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        let value = self.0?.inner().get(key)?;
        Self::text(key, value)
    }

    fn keys(&self) -> Vec<&str> {
        self.0
            .map(|table| {
                table
                    .inner()
                    .iter()
                    .filter(|(key, value)| Self::text(key.as_str(), value).is_some())
                    .map(|(key, _)| key.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Builds the header table of an outgoing message carrying `ctx`.
pub(crate) fn inject_headers(ctx: &Context) -> FieldTable {
    let mut headers = BTreeMap::new();
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(ctx, &mut HeaderInjector(&mut headers))
    });
    FieldTable::from(headers)
}

/// Opens a consumer span for a delivery, parented on the context its
/// publisher injected. Returns that context with the span.
pub(crate) fn new_span(
    props: &BasicProperties,
    tracer: &BoxedTracer,
    name: &str,
) -> (Context, BoxedSpan) {
    let extractor = HeaderExtractor(props.headers().as_ref());
    let ctx = global::get_text_map_propagator(|propagator| propagator.extract(&extractor));

    let span = tracer
        .span_builder(Cow::from(name.to_owned()))
        .with_kind(SpanKind::Consumer)
        .start_with_context(tracer, &ctx);

    (ctx, span)
}
