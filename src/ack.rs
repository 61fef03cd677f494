// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Acknowledgment Decision
//!
//! The outcome every handler returns for a delivery. The consumer loop is the
//! only component that reads it.

use std::fmt;

/// How a delivery must be resolved at the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckType {
    /// Processed; remove the message from the queue.
    Ack,
    /// Transient failure; redeliver immediately.
    NackRequeue,
    /// Permanent failure; drop or dead-letter.
    NackDiscard,
}

impl fmt::Display for AckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AckType::Ack => f.write_str("ack"),
            AckType::NackRequeue => f.write_str("nack-requeue"),
            AckType::NackDiscard => f.write_str("nack-discard"),
        }
    }
}
