//! 可观测性模块
//!
//! @yutiansut @quantaxis
//!
//! 提供 Prometheus 指标导出、查询耗时统计

pub mod metrics;

pub use metrics::*;
