//! Prometheus 指标导出模块
//!
//! @yutiansut @quantaxis
//!
//! 提供代理的监控指标：
//! - 前端发送字节数 (按监听地址)
//! - 查询次数与耗时
//! - 直通查询的后端失败次数

use lazy_static::lazy_static;
use prometheus::{Histogram, HistogramOpts, IntCounterVec, Opts, Registry};

lazy_static! {
    /// 全局 Prometheus Registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ═══════════════════════════════════════════════════════════════════
    // 前端指标
    // ═══════════════════════════════════════════════════════════════════

    /// 已发送的响应体字节数 (不含状态行)
    pub static ref FRONTEND_BYTES_SEND: IntCounterVec = IntCounterVec::new(
        Opts::new("frontend_bytes_send_total", "Total response body bytes sent to clients")
            .namespace("lsbroker"),
        &["listen"]
    ).expect("Failed to create FRONTEND_BYTES_SEND metric");

    /// 查询总数
    pub static ref FRONTEND_QUERIES: IntCounterVec = IntCounterVec::new(
        Opts::new("frontend_queries_total", "Total number of queries answered")
            .namespace("lsbroker"),
        &["table"]
    ).expect("Failed to create FRONTEND_QUERIES metric");

    /// 查询耗时 (秒)
    pub static ref QUERY_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new("query_duration_seconds", "Time spent building a response")
            .namespace("lsbroker")
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0])
    ).expect("Failed to create QUERY_DURATION metric");

    // ═══════════════════════════════════════════════════════════════════
    // 后端指标
    // ═══════════════════════════════════════════════════════════════════

    /// 直通查询失败次数
    pub static ref PEER_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("peer_failures_total", "Total number of failed passthrough queries")
            .namespace("lsbroker"),
        &["peer"]
    ).expect("Failed to create PEER_FAILURES metric");
}

/// 初始化所有指标到 Registry
pub fn init_metrics() {
    REGISTRY.register(Box::new(FRONTEND_BYTES_SEND.clone())).ok();
    REGISTRY.register(Box::new(FRONTEND_QUERIES.clone())).ok();
    REGISTRY.register(Box::new(QUERY_DURATION.clone())).ok();
    REGISTRY.register(Box::new(PEER_FAILURES.clone())).ok();

    log::info!("Prometheus metrics initialized");
}

/// 导出指标为 Prometheus 文本格式
pub fn export_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        log::error!("failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// 查询计时器，drop 前调用 `observe`
pub struct QueryTimer {
    start: std::time::Instant,
}

impl QueryTimer {
    pub fn start() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }

    /// 记录耗时并返回 (秒)
    pub fn observe(self) -> f64 {
        let elapsed = self.start.elapsed().as_secs_f64();
        QUERY_DURATION.observe(elapsed);
        elapsed
    }
}
