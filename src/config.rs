use std::{env, path::PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{info, warn};

use crate::logger::LogConfig;

pub const KEY_DOWNSTREAM: &str = "BROKER_DOWNSTREAM";
pub const KEY_LOG_LEVEL: &str = "BROKER_LOG_LEVEL";
pub const KEY_LOG_DIR: &str = "BROKER_LOG_DIR";
pub const KEY_OTEL_ENDPOINT: &str = "BROKER_OTEL_ENDPOINT";

#[async_trait]
pub trait ConfigManagerType: Send + Sync {
    async fn as_vec(&self) -> Vec<(String, String)> {
        let mut config = vec![];
        for key in self.keys().await {
            if let Some(value) = self.get(&key).await {
                config.push((key, value));
            }
        }
        config
    }
    async fn keys(&self) -> Vec<String>;
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: &str) -> Result<(), String>;
    fn clone_box(&self) -> Box<dyn ConfigManagerType>;
    fn debug_box(&self) -> String;
}

pub struct ConfigManager(pub Box<dyn ConfigManagerType>);

impl Clone for ConfigManager {
    fn clone(&self) -> Self {
        ConfigManager(self.0.clone_box())
    }
}

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.debug_box())
    }
}

/// Reads the process environment, optionally seeded from a `.env` file.
#[derive(Clone, Debug)]
pub struct EnvConfigManager {
    env_file: Option<PathBuf>,
}

impl EnvConfigManager {
    pub fn new(env_file: Option<PathBuf>) -> Box<Self> {
        if let Some(file) = &env_file {
            if file.exists() {
                dotenvy::from_path(file).ok();
                info!("Loaded .env from {}", file.display());
            } else {
                warn!("could not load .env from {}", file.display())
            }
        }
        Box::new(Self { env_file })
    }
}

#[async_trait]
impl ConfigManagerType for EnvConfigManager {
    async fn keys(&self) -> Vec<String> {
        env::vars().map(|(k, _)| k).collect()
    }

    async fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }

    async fn set(&self, key: &str, _value: &str) -> Result<(), String> {
        Err(format!("environment configuration is read-only, cannot set `{key}`"))
    }

    fn clone_box(&self) -> Box<dyn ConfigManagerType> {
        Box::new(self.clone())
    }

    fn debug_box(&self) -> String {
        match &self.env_file {
            Some(file) => format!("EnvConfigManager({})", file.display()),
            None => "EnvConfigManager".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MapConfigManager {
    map: DashMap<String, String>,
}

impl MapConfigManager {
    pub fn new() -> Box<Self> {
        Box::new(Self::default())
    }
}

#[async_trait]
impl ConfigManagerType for MapConfigManager {
    async fn keys(&self) -> Vec<String> {
        self.map.iter().map(|entry| entry.key().clone()).collect()
    }

    async fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).map(|v| v.clone())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), String> {
        self.map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn ConfigManagerType> {
        Box::new(self.clone())
    }

    fn debug_box(&self) -> String {
        format!("MapConfigManager({} entries)", self.map.len())
    }
}

/// Settings the broker reads at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Name of the node under the root that hosts link nodes.
    pub downstream: String,
    pub log: LogConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            downstream: "downstream".to_string(),
            log: LogConfig::default(),
        }
    }
}

impl BrokerConfig {
    pub async fn load(config: &ConfigManager) -> Self {
        let defaults = Self::default();
        let downstream = config
            .0
            .get(KEY_DOWNSTREAM)
            .await
            .map(|d| d.trim_matches('/').to_string())
            .filter(|d| !d.is_empty() && !d.contains('/'))
            .unwrap_or(defaults.downstream);
        let log_level = config
            .0
            .get(KEY_LOG_LEVEL)
            .await
            .unwrap_or(defaults.log.log_level);
        let log_dir = config.0.get(KEY_LOG_DIR).await.map(PathBuf::from);
        let otel_endpoint = config.0.get(KEY_OTEL_ENDPOINT).await;

        Self {
            downstream,
            log: LogConfig::new(log_level, log_dir, otel_endpoint),
        }
    }

    /// Command-line values win over whatever was loaded.
    pub fn with_overrides(
        mut self,
        downstream: Option<String>,
        log_level: Option<String>,
        log_dir: Option<PathBuf>,
        otel_endpoint: Option<String>,
    ) -> Self {
        if let Some(downstream) = downstream.map(|d| d.trim_matches('/').to_string()) {
            if !downstream.is_empty() && !downstream.contains('/') {
                self.downstream = downstream;
            }
        }
        if let Some(level) = log_level {
            self.log.log_level = level;
        }
        if log_dir.is_some() {
            self.log.log_dir = log_dir;
        }
        if otel_endpoint.is_some() {
            self.log.otel_endpoint = otel_endpoint;
        }
        self
    }
}
