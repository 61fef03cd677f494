// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Payload Encodings
//!
//! An [`Encoding`] turns a typed value into bytes and back. Two strategies are
//! provided:
//!
//! - [`Json`]: self-describing and tolerant of added fields, for values read
//!   by independently versioned handlers.
//! - [`Binary`]: compact bincode, requiring both ends to share the exact field
//!   set and order.
//!
//! The strategy is chosen at each publish/subscribe call site and is never
//! mixed within one queue.

use crate::errors::{DecodingError, EncodingError};
use serde::{de::DeserializeOwned, Serialize};

/// Content type tag for JSON payloads
pub const JSON_CONTENT_TYPE: &str = "application/json";
/// Content type tag for bincode payloads
pub const BINARY_CONTENT_TYPE: &str = "application/x-bincode";

/// Serialize/deserialize pair tagged with a wire content type.
pub trait Encoding: Send + Sync + 'static {
    const CONTENT_TYPE: &'static str;

    fn encode<T>(value: &T) -> Result<Vec<u8>, EncodingError>
    where
        T: Serialize + ?Sized;

    fn decode<T>(bytes: &[u8]) -> Result<T, DecodingError>
    where
        T: DeserializeOwned;
}

/// Structured-text encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct Json;

impl Encoding for Json {
    const CONTENT_TYPE: &'static str = JSON_CONTENT_TYPE;

    fn encode<T>(value: &T) -> Result<Vec<u8>, EncodingError>
    where
        T: Serialize + ?Sized,
    {
        serde_json::to_vec(value).map_err(|err| EncodingError {
            content_type: Self::CONTENT_TYPE,
            reason: err.to_string(),
        })
    }

    fn decode<T>(bytes: &[u8]) -> Result<T, DecodingError>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(bytes).map_err(|err| DecodingError {
            content_type: Self::CONTENT_TYPE,
            reason: err.to_string(),
        })
    }
}

/// Compact binary encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct Binary;

impl Encoding for Binary {
    const CONTENT_TYPE: &'static str = BINARY_CONTENT_TYPE;

    fn encode<T>(value: &T) -> Result<Vec<u8>, EncodingError>
    where
        T: Serialize + ?Sized,
    {
        bincode::serde::encode_to_vec(value, bincode::config::standard()).map_err(|err| {
            EncodingError {
                content_type: Self::CONTENT_TYPE,
                reason: err.to_string(),
            }
        })
    }

    fn decode<T>(bytes: &[u8]) -> Result<T, DecodingError>
    where
        T: DeserializeOwned,
    {
        let (value, read) =
            bincode::serde::decode_from_slice::<T, _>(bytes, bincode::config::standard())
                .map_err(|err| DecodingError {
                    content_type: Self::CONTENT_TYPE,
                    reason: err.to_string(),
                })?;

        // a shorter schema on the reading side leaves bytes behind
        if read != bytes.len() {
            return Err(DecodingError {
                content_type: Self::CONTENT_TYPE,
                reason: format!("{} trailing bytes", bytes.len() - read),
            });
        }

        Ok(value)
    }
}
