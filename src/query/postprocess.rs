// 响应后处理: 排序 → 总数 → Offset → Limit → 统计归约
//
// 严格按顺序、单线程执行。

use std::cmp::Ordering;

use super::resolver::{QueryPlan, SortKey};
use super::response::Response;
use super::types::{Request, Row, SortDirection, StatsKind, Value};
use crate::schema::ColumnType;
use crate::{BrokerError, Result};

// ═══════════════════════════════════════════════════════════════════════════
// 统计累加器
// ═══════════════════════════════════════════════════════════════════════════

/// 单个统计项的累加状态
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsAccumulator {
    pub kind: StatsKind,
    pub stats: f64,
    /// 样本数
    pub count: u64,
}

impl StatsAccumulator {
    pub fn new(kind: StatsKind) -> Self {
        Self {
            kind,
            stats: 0.0,
            count: 0,
        }
    }

    /// 计入一行 (Counter 时 `value` 为该行是否匹配: 1 或 0)
    pub fn add(&mut self, value: f64) {
        match self.kind {
            StatsKind::Counter | StatsKind::Sum | StatsKind::Average => self.stats += value,
            StatsKind::Min => {
                if self.count == 0 || value < self.stats {
                    self.stats = value;
                }
            }
            StatsKind::Max => {
                if self.count == 0 || value > self.stats {
                    self.stats = value;
                }
            }
        }
        self.count += 1;
    }

    /// 合并一个已归约的部分结果，`samples` 为其样本数
    pub fn merge(&mut self, value: f64, samples: u64) {
        if samples == 0 {
            return;
        }
        match self.kind {
            StatsKind::Counter | StatsKind::Sum => self.stats += value,
            StatsKind::Average => self.stats += value * samples as f64,
            StatsKind::Min => {
                if self.count == 0 || value < self.stats {
                    self.stats = value;
                }
            }
            StatsKind::Max => {
                if self.count == 0 || value > self.stats {
                    self.stats = value;
                }
            }
        }
        self.count += samples;
    }

    /// 最终输出值，样本数为 0 时固定为 0
    pub fn value(&self) -> Value {
        if self.count == 0 {
            return Value::Int(0);
        }
        match self.kind {
            StatsKind::Counter | StatsKind::Min | StatsKind::Max | StatsKind::Sum => {
                Value::number(self.stats)
            }
            StatsKind::Average => Value::number(self.stats / self.count as f64),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// 排序
// ═══════════════════════════════════════════════════════════════════════════

/// 检查排序键类型，虚拟类型必须在解析阶段被替换掉
pub fn validate_sort_keys(keys: &[SortKey]) -> Result<()> {
    for key in keys {
        match key.col_type {
            ColumnType::Int
            | ColumnType::Float
            | ColumnType::Time
            | ColumnType::String
            | ColumnType::StringList
            | ColumnType::IntList => {}
            ColumnType::Virtual => {
                return Err(BrokerError::Invariant(format!(
                    "cannot sort on unresolved virtual column at position {}",
                    key.position
                )))
            }
        }
    }
    Ok(())
}

/// 多键比较，相等时比较下一个键
fn compare_rows(a: &Row, b: &Row, keys: &[SortKey]) -> Ordering {
    for key in keys {
        let (x, y) = match (a.get(key.position), b.get(key.position)) {
            (Some(x), Some(y)) => (x, y),
            _ => return Ordering::Equal,
        };
        let ordering = match key.col_type {
            ColumnType::Int | ColumnType::Float | ColumnType::Time => {
                x.as_f64().total_cmp(&y.as_f64())
            }
            ColumnType::String => match (x.as_str(), y.as_str()) {
                (Some(x), Some(y)) => x.cmp(y),
                _ => return Ordering::Equal,
            },
            // 列表列没有定义比较，保持原有顺序
            ColumnType::StringList | ColumnType::IntList | ColumnType::Virtual => {
                return Ordering::Equal
            }
        };
        if ordering != Ordering::Equal {
            return match key.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            };
        }
    }
    Ordering::Equal
}

/// 稳定排序，没有排序键时不改变顺序
pub fn sort_rows(rows: &mut [Row], keys: &[SortKey]) -> Result<()> {
    if keys.is_empty() {
        return Ok(());
    }
    validate_sort_keys(keys)?;
    rows.sort_by(|a, b| compare_rows(a, b, keys));
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// 分页与归约
// ═══════════════════════════════════════════════════════════════════════════

/// Offset / Limit，先 offset 后 limit
pub fn paginate(response: &mut Response, offset: usize, limit: Option<usize>) {
    let total = *response.result_total.get_or_insert(response.result.len());

    if offset > 0 {
        if offset > total {
            response.result.clear();
        } else {
            let skip = offset.min(response.result.len());
            response.result.drain(..skip);
        }
    }

    if let Some(limit) = limit.filter(|l| *l > 0) {
        if limit < total {
            response.result.truncate(limit);
        }
    }
}

/// 把结果替换为一行统计值
pub fn reduce_stats(accumulators: &[StatsAccumulator]) -> Row {
    accumulators.iter().map(StatsAccumulator::value).collect()
}

/// 完整的后处理流程
pub fn post_process(
    response: &mut Response,
    plan: &QueryPlan,
    request: &Request,
    stats: &[StatsAccumulator],
) -> Result<()> {
    if !plan.sort.is_empty() {
        let started = std::time::Instant::now();
        sort_rows(&mut response.result, &plan.sort)?;
        log::debug!("sorting result took {:?}", started.elapsed());
    }

    paginate(response, request.offset, request.effective_limit());

    if !plan.stats.is_empty() {
        response.result = vec![reduce_stats(stats)];
    }
    Ok(())
}
