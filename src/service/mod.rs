//! 对外服务层
//!
//! @yutiansut @quantaxis
//!
//! livestatus 文本协议的 TCP 前端：读取请求 → 查询引擎 → 编码发送
//! 以及可选的 Prometheus 抓取端点

pub mod frontend;
pub mod metrics_http;

pub use frontend::Frontend;
pub use metrics_http::run_metrics_server;
