// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Connection Settings
//!
//! Settings are resolved from built-in defaults overridden by `RABBITMQ_*`
//! environment variables (`RABBITMQ_HOST`, `RABBITMQ_PORT`, `RABBITMQ_USER`,
//! `RABBITMQ_PASSWORD`, `RABBITMQ_VHOST`, `RABBITMQ_CONNECTION_NAME`).

use config::{Config, ConfigError, Environment};
use lapin::uri::{AMQPAuthority, AMQPUri, AMQPUserInfo};
use serde::Deserialize;

/// Connection parameters of the RabbitMQ server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RabbitMQConfigs {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub vhost: String,
    pub connection_name: String,
}

impl Default for RabbitMQConfigs {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: 5672,
            user: "guest".to_owned(),
            password: "guest".to_owned(),
            vhost: "/".to_owned(),
            connection_name: "peril".to_owned(),
        }
    }
}

impl RabbitMQConfigs {
    /// Loads the settings from the environment, falling back to the defaults.
    pub fn load() -> Result<RabbitMQConfigs, ConfigError> {
        let default = RabbitMQConfigs::default();

        Config::builder()
            .set_default("host", default.host)?
            .set_default("port", i64::from(default.port))?
            .set_default("user", default.user)?
            .set_default("password", default.password)?
            .set_default("vhost", default.vhost)?
            .set_default("connection_name", default.connection_name)?
            .add_source(Environment::with_prefix("RABBITMQ").try_parsing(true))
            .build()?
            .try_deserialize()
    }

    /// Builds the AMQP URI the connection dials.
    ///
    /// The fields are carried as-is, so credentials and vhosts containing
    /// URI delimiters never go through a string round trip.
    pub fn uri(&self) -> AMQPUri {
        AMQPUri {
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: self.user.clone(),
                    password: self.password.clone(),
                },
                host: self.host.clone(),
                port: self.port,
            },
            vhost: self.vhost.clone(),
            ..Default::default()
        }
    }
}
