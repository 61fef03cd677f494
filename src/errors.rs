// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Peril Pub/Sub Layer
//!
//! `AmqpError` describes failures at the broker seam (connection, channel,
//! declare, bind, publish, consume, ack). The remaining enums describe the
//! failures of each caller-facing operation and wrap the `AmqpError` that
//! caused them as their source.

use thiserror::Error;

/// Represents errors reported by the broker client.
///
/// Every variant corresponds to one broker round-trip failing. The string
/// payloads carry the broker client's own error text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect: {0}")]
    ConnectionError(String),

    /// Error creating a channel from an established connection
    #[error("failure to create a channel: {0}")]
    ChannelError(String),

    /// Error declaring an exchange
    #[error("failure to declare an exchange: {0}")]
    DeclareExchangeError(String),

    /// Error declaring a queue
    #[error("failure to declare a queue: {0}")]
    DeclareQueueError(String),

    /// Error binding a queue to an exchange
    #[error("failure to bind queue: {0}")]
    BindingError(String),

    /// Error handing a message off to the channel
    #[error("failure to publish: {0}")]
    PublishingError(String),

    /// Error acknowledging a message
    #[error("failure to ack message: {0}")]
    AckMessageError(String),

    /// Error negative-acknowledging a message
    #[error("failure to nack message: {0}")]
    NackMessageError(String),

    /// Error declaring a consumer
    #[error("consumer declaration error: {0}")]
    ConsumerDeclarationError(String),

    /// Error reading from an open consumer
    #[error("failure to consume message: {0}")]
    ConsumerError(String),

    /// Error closing a channel
    #[error("failure to close channel: {0}")]
    ChannelCloseError(String),
}

/// Failures while establishing a queue, an exchange or a binding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error("invalid {kind} name: must not be empty")]
    InvalidName { kind: &'static str },

    #[error("could not create channel")]
    Channel(#[source] AmqpError),

    #[error("could not declare exchange `{exchange}`")]
    DeclareExchange {
        exchange: String,
        #[source]
        source: AmqpError,
    },

    #[error("could not declare queue `{queue}`")]
    DeclareQueue {
        queue: String,
        #[source]
        source: AmqpError,
    },

    #[error("could not bind queue `{queue}` to exchange `{exchange}` with key `{key}`")]
    Bind {
        exchange: String,
        queue: String,
        key: String,
        #[source]
        source: AmqpError,
    },
}

/// A value could not be serialized.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("could not encode value as {content_type}: {reason}")]
pub struct EncodingError {
    pub content_type: &'static str,
    pub reason: String,
}

/// A payload could not be deserialized.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("could not decode {content_type} payload: {reason}")]
pub struct DecodingError {
    pub content_type: &'static str,
    pub reason: String,
}

/// Failures of a single publish call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error("could not publish to exchange `{exchange}` with key `{key}`")]
    Transport {
        exchange: String,
        key: String,
        #[source]
        source: AmqpError,
    },
}

/// Failures while setting up a subscription.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscribeError {
    #[error("could not declare and bind queue")]
    Topology(#[from] TopologyError),

    #[error("could not consume queue `{queue}`")]
    Consume {
        queue: String,
        #[source]
        source: AmqpError,
    },
}
