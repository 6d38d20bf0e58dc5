//! # LSBROKER-RS
//!
//! 监控后端聚合查询代理 - 面向 livestatus 行列查询协议
//!
//! ## 核心能力
//!
//! - **列解析**: 请求列 → 表结构位置，区分真实列与虚拟列 (连接元数据)
//! - **后端选择**: 按 Backends 头过滤已注册的 peer，合并唤醒 (spin-up) 信号
//! - **数据收集**: 缓存聚合模式 / 直通模式 (并发扇出到所有 peer)
//! - **后处理**: 多键排序、Offset/Limit 分页、统计归约
//! - **编码发送**: JSON / wrapped_json，fixed16 定长帧头
//!
//! ## 架构设计
//!
//! ```text
//! 客户端 (livestatus 文本协议)
//!     ↓
//! Service Layer (service/)        ← 请求解析 + 响应发送
//!     ↓
//! Query Engine (query/)           ← 解析 → 选择 → 收集 → 后处理
//!     ↓
//! Peer Registry (peer/)           ← 状态 (RwLock) + 缓存 + 直通连接
//!     ↓
//! Protocol (protocol/)            ← 定长帧 + JSON 行编码
//! ```

#![allow(dead_code)]

// ============================================================================
// 内部模块
// ============================================================================

/// 表结构与虚拟列目录
pub mod schema;

/// 后端连接 (peer) 注册表、状态与直通连接
pub mod peer;

/// 查询引擎: 列解析/后端选择/数据收集/后处理
pub mod query;

/// 线路协议: 响应编码与定长帧
pub mod protocol;

/// 对外服务层 (TCP 前端)
pub mod service;

/// 工具模块 (配置)
pub mod utils;

// 可观测性模块 (Prometheus)
pub mod observability;

// ============================================================================
// 重导出常用类型
// ============================================================================

pub use peer::{Peer, PeerConnection, PeerError, PeerRegistry, PeerState, PeerStatus};
pub use query::{QueryEngine, Request, Response, Row, Value};
pub use schema::{Catalog, Column, ColumnType, Table, UpdatePolicy};

// ============================================================================
// 全局错误类型
// ============================================================================

/// 代理错误类型
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BrokerError {
    /// 客户端请求错误，原文返回给客户端
    #[error("{0}")]
    BadRequest(String),

    /// 结果行无法序列化，整个响应放弃发送
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// 引擎遇到无法处理的列类型/统计类型，必须停止而不是返回错误数据
    #[error("Invariant violation: {0}")]
    Invariant(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl BrokerError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        BrokerError::BadRequest(format!("bad request: {}", msg.into()))
    }

    /// 是否为致命错误
    pub fn is_fatal(&self) -> bool {
        matches!(self, BrokerError::Invariant(_))
    }
}

impl From<std::io::Error> for BrokerError {
    fn from(e: std::io::Error) -> Self {
        BrokerError::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;
