//! 配置管理模块

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::peer::connection::DEFAULT_MAX_RESPONSE_SIZE;
use crate::peer::{LivestatusConnection, Peer, PeerRegistry};
use crate::{BrokerError, Result};

/// 代理配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// 前端监听地址
    #[serde(default = "default_listen")]
    pub listen: Vec<String>,

    /// 默认日志级别 (RUST_LOG 优先)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus 抓取地址 (HTTP `GET /metrics`)，不配置则不启动
    #[serde(default)]
    pub metrics_listen: Option<String>,

    #[serde(default)]
    pub connection: ConnectionConfig,

    /// 后端列表 (注册顺序即查询顺序)
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            log_level: default_log_level(),
            metrics_listen: None,
            connection: ConnectionConfig::default(),
            peers: Vec::new(),
        }
    }
}

/// 后端连接配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// 单次直通查询超时 (秒)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// 后端单个响应体上限 (字节)
    #[serde(default = "default_max_response_size")]
    pub max_response_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_response_size: default_max_response_size(),
        }
    }
}

impl ConnectionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// 单个后端
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub id: String,
    /// 显示名，缺省为 id
    #[serde(default)]
    pub name: Option<String>,
    /// `host:port` 或 unix socket 路径
    pub addr: String,
}

fn default_listen() -> Vec<String> {
    vec!["127.0.0.1:6557".to_string()]
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_max_response_size() -> usize {
    DEFAULT_MAX_RESPONSE_SIZE
}

impl BrokerConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| BrokerError::Config(format!("Failed to read config file: {}", e)))?;
        let config: BrokerConfig = toml::from_str(&content)
            .map_err(|e| BrokerError::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_default() -> Result<Self> {
        Self::load_from_file("config/lsbroker.toml")
    }

    /// 检查监听地址与后端配置
    pub fn validate(&self) -> Result<()> {
        if self.listen.is_empty() {
            return Err(BrokerError::Config("no listen address configured".to_string()));
        }
        if self.connection.timeout_secs == 0 {
            return Err(BrokerError::Config("connection timeout must be > 0".to_string()));
        }
        if self.connection.max_response_size == 0 {
            return Err(BrokerError::Config("max response size must be > 0".to_string()));
        }
        for peer in &self.peers {
            if peer.id.trim().is_empty() || peer.addr.trim().is_empty() {
                return Err(BrokerError::Config(format!(
                    "peer {:?} needs both id and addr",
                    peer.id
                )));
            }
        }
        Ok(())
    }

    /// 按配置构建 peer 注册表
    pub fn build_registry(&self) -> Result<PeerRegistry> {
        let mut registry = PeerRegistry::new();
        for peer in &self.peers {
            let connection = LivestatusConnection::new(peer.addr.clone(), self.connection.timeout())
                .with_max_response_size(self.connection.max_response_size);
            let name = peer.name.clone().unwrap_or_else(|| peer.id.clone());
            registry.register(Peer::new(
                peer.id.clone(),
                name,
                peer.addr.clone(),
                Arc::new(connection),
            ))?;
        }
        Ok(registry)
    }
}
