// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Consumer Handlers
//!
//! A handler receives one decoded message and answers with the [`AckType`]
//! the consumer loop must apply to its delivery. Application failures are
//! expressed through the returned decision, never by erroring out of the loop.

use crate::ack::AckType;
use async_trait::async_trait;
use opentelemetry::Context;
use std::{future::Future, marker::PhantomData};

#[async_trait]
pub trait ConsumerHandler<T>: Send + Sync
where
    T: Send + 'static,
{
    /// Processes `msg`; `ctx` carries the publisher's trace context.
    async fn exec(&self, ctx: &Context, msg: T) -> AckType;
}

/// Adapts an async closure into a [`ConsumerHandler`].
///
/// ```ignore
/// let handler = handler_fn(|state: PlayingState| async move {
///     game.handle_pause(state);
///     AckType::Ack
/// });
/// ```
pub fn handler_fn<T, F, Fut>(f: F) -> HandlerFn<T, F>
where
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = AckType> + Send + 'static,
{
    HandlerFn {
        f,
        _msg: PhantomData,
    }
}

pub struct HandlerFn<T, F> {
    f: F,
    _msg: PhantomData<fn(T)>,
}

#[async_trait]
impl<T, F, Fut> ConsumerHandler<T> for HandlerFn<T, F>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = AckType> + Send + 'static,
{
    async fn exec(&self, _ctx: &Context, msg: T) -> AckType {
        (self.f)(msg).await
    }
}
