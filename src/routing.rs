// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Well-known exchanges, routing keys and the message shapes shared by the
//! game server and its clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const EXCHANGE_PERIL_DIRECT: &str = "peril_direct";
pub const EXCHANGE_PERIL_TOPIC: &str = "peril_topic";

pub const PAUSE_KEY: &str = "pause";
pub const ARMY_MOVES_PREFIX: &str = "army_moves";
pub const WAR_RECOGNITIONS_PREFIX: &str = "war";
pub const GAME_LOG_SLUG: &str = "game_logs";

/// Joins a routing key prefix and suffix with the broker's segment delimiter.
pub fn routing_key(prefix: &str, suffix: &str) -> String {
    format!("{prefix}.{suffix}")
}

/// Broadcast by the server to pause or resume every client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayingState {
    pub is_paused: bool,
}

/// A line for the server's game log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameLog {
    pub current_time: DateTime<Utc>,
    pub message: String,
    pub username: String,
}
