// 查询引擎模块
//
// 架构：
// ┌─────────────────────────────────────────────────────────────┐
// │                      Query Layer                            │
// │                                                             │
// │  Request ──► resolver ──► selector ──► collector            │
// │  (parser)    (列解析)     (后端选择)    (缓存 / 直通扇出)     │
// │                                            │                │
// │                                            ▼                │
// │                         Response ◄── postprocess            │
// │                                      (排序/分页/统计)        │
// └─────────────────────────────────────────────────────────────┘
//
// @yutiansut @quantaxis

pub mod collector;
pub mod engine;
pub mod parser;
pub mod postprocess;
pub mod resolver;
pub mod response;
pub mod selector;
pub mod types;

pub use collector::{collect_cached, collect_passthrough, Collected, PeerOutcome};
pub use engine::QueryEngine;
pub use parser::{parse_request, wants_fixed16};
pub use postprocess::{paginate, post_process, sort_rows, StatsAccumulator};
pub use resolver::{resolve, ColumnSource, OutputColumn, QueryPlan, ResolvedStat, SortKey};
pub use response::Response;
pub use selector::{select_backends, Selection};
pub use types::*;
