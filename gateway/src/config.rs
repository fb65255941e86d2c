// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0
use serde::Deserialize;
use std::{path::PathBuf, time::Duration};
use store::ReceiptStoreKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// The gateway's JSON configuration file. Unknown fields are ignored so
/// configs written for newer builds still load.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    #[serde(default)]
    pub http: HttpConf,
    pub store: StoreConf,
    #[serde(default)]
    pub events: EventsConf,
    #[serde(default)]
    pub dispatcher: DispatcherConf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConf {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default)]
    pub port: u16,
}

impl Default for HttpConf {
    fn default() -> Self {
        HttpConf {
            address: default_address(),
            port: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConf {
    pub path: PathBuf,
    #[serde(default)]
    pub receipts: ReceiptStoreKind,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsConf {
    /// How long a websocket client may sit on an undelivered ack before
    /// its connection is closed.
    #[serde(with = "types::duration_secs", default = "default_processing_timeout")]
    pub processing_timeout: Duration,
    /// Pause before reopening a dropped ledger block subscription.
    #[serde(with = "types::duration_secs", default = "default_resubscribe_delay")]
    pub resubscribe_delay: Duration,
}

impl Default for EventsConf {
    fn default() -> Self {
        EventsConf {
            processing_timeout: default_processing_timeout(),
            resubscribe_delay: default_resubscribe_delay(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatcherConf {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    #[serde(with = "types::duration_secs", default = "default_tx_timeout")]
    pub tx_timeout: Duration,
}

impl Default for DispatcherConf {
    fn default() -> Self {
        DispatcherConf {
            workers: default_workers(),
            queue_depth: default_queue_depth(),
            tx_timeout: default_tx_timeout(),
        }
    }
}

fn default_address() -> String {
    "0.0.0.0".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_processing_timeout() -> Duration {
    ws::DEFAULT_PROCESSING_TIMEOUT
}
fn default_resubscribe_delay() -> Duration {
    Duration::from_secs(5)
}
fn default_workers() -> usize {
    10
}
fn default_queue_depth() -> usize {
    50
}
fn default_tx_timeout() -> Duration {
    Duration::from_secs(30)
}

impl GatewayConfig {
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: GatewayConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// HTTP and store configurations are mandatory.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http.port == 0 {
            return Err(ConfigError::Invalid("http.port is required".to_string()));
        }
        if self.store.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("store.path is required".to_string()));
        }
        if self.dispatcher.workers == 0 {
            return Err(ConfigError::Invalid(
                "dispatcher.workers must be at least 1".to_string(),
            ));
        }
        if self.dispatcher.queue_depth == 0 {
            return Err(ConfigError::Invalid(
                "dispatcher.queueDepth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
