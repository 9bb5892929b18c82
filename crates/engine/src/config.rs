// SPDX-License-Identifier: MIT

//! Engine configuration, loaded from a single TOML file.

use crate::dispatch::DispatcherConfig;
use crate::error::EngineError;
use quaero_core::{CoreError, ErrorKind};
use quaero_definition::parse_duration;
use quaero_storage::QueueConfig;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration:
///
/// ```toml
/// storage_path = "/var/lib/quaero"
/// definition_dir = "/etc/quaero/definitions"
/// log_level = "info"
///
/// [queue]
/// visibility_timeout = "30s"
/// max_receive = 5
///
/// [workers]
/// default_pool_size = 4
/// execute_timeout = "5m"
///
/// [workers.pool_sizes]
/// crawler_url = 8
///
/// [monitor]
/// progress_interval = "5s"
/// stale_after = "60s"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory the embedded store lives in.
    pub storage_path: PathBuf,
    pub definition_dir: Option<PathBuf>,
    pub log_level: String,
    pub queue: QueueSettings,
    pub workers: WorkerSettings,
    pub monitor: MonitorSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from("./quaero-data"),
            definition_dir: None,
            log_level: "info".to_string(),
            queue: QueueSettings::default(),
            workers: WorkerSettings::default(),
            monitor: MonitorSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub visibility_timeout: String,
    pub max_receive: u32,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self { visibility_timeout: "30s".to_string(), max_receive: 5 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub default_pool_size: usize,
    pub pool_sizes: HashMap<String, usize>,
    pub execute_timeout: String,
    pub poll_interval: String,
    pub max_poll_interval: String,
    pub batch_size: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            default_pool_size: 4,
            pool_sizes: HashMap::new(),
            execute_timeout: "5m".to_string(),
            poll_interval: "50ms".to_string(),
            max_poll_interval: "500ms".to_string(),
            batch_size: 8,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub progress_interval: String,
    /// Heartbeat age at which a parent counts as orphaned on startup.
    pub stale_after: String,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self { progress_interval: "5s".to_string(), stale_after: "60s".to_string() }
    }
}

fn duration_field(name: &str, value: &str) -> Result<Duration, EngineError> {
    parse_duration(value).map_err(|e| {
        EngineError::Core(CoreError::new(ErrorKind::InvalidConfig, format!("{name}: {e}")))
    })
}

impl EngineConfig {
    pub fn from_toml(text: &str) -> Result<Self, EngineError> {
        let config: EngineConfig = toml::from_str(text).map_err(|e| {
            EngineError::Core(CoreError::new(ErrorKind::InvalidConfig, e.to_string()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Core(CoreError::new(
                ErrorKind::Storage,
                format!("config {}: {e}", path.display()),
            ))
        })?;
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        self.queue_config()?;
        self.dispatcher_config()?;
        self.progress_interval()?;
        self.stale_after()?;
        Ok(())
    }

    pub fn queue_config(&self) -> Result<QueueConfig, EngineError> {
        Ok(QueueConfig {
            visibility_timeout: duration_field(
                "queue.visibility_timeout",
                &self.queue.visibility_timeout,
            )?,
            max_receive: self.queue.max_receive.max(1),
        })
    }

    pub fn dispatcher_config(&self) -> Result<DispatcherConfig, EngineError> {
        Ok(DispatcherConfig {
            poll_interval: duration_field("workers.poll_interval", &self.workers.poll_interval)?,
            max_poll_interval: duration_field(
                "workers.max_poll_interval",
                &self.workers.max_poll_interval,
            )?,
            batch_size: self.workers.batch_size.max(1),
            default_pool_size: self.workers.default_pool_size.max(1),
            pool_sizes: self.workers.pool_sizes.clone(),
            execute_timeout: duration_field(
                "workers.execute_timeout",
                &self.workers.execute_timeout,
            )?,
        })
    }

    pub fn progress_interval(&self) -> Result<Duration, EngineError> {
        duration_field("monitor.progress_interval", &self.monitor.progress_interval)
    }

    pub fn stale_after(&self) -> Result<Duration, EngineError> {
        duration_field("monitor.stale_after", &self.monitor.stale_after)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
