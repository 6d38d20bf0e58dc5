// 列解析: 请求列名 → 表结构位置 / 虚拟列来源
//
// 纯函数，只依赖 (Request, Table)。解析结果在整个请求期间不可变。

use super::types::{Filter, Request, SortDirection, StatsKind};
use crate::schema::virtual_columns;
use crate::schema::{ColumnType, Table, VirtualKey};
use crate::{BrokerError, Result};

/// 输出列的数据来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnSource {
    /// 后端行 (缓存行) 中的列下标
    Real { index: usize },
    /// 从 peer 状态读取或按行计算
    Virtual(VirtualKey),
}

/// 已解析的输出列
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputColumn {
    pub name: String,
    pub col_type: ColumnType,
    /// 输出位置 (0..N-1 连续)
    pub position: usize,
    pub source: ColumnSource,
}

impl OutputColumn {
    pub fn is_virtual(&self) -> bool {
        matches!(self.source, ColumnSource::Virtual(_))
    }
}

/// 已解析的排序键
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub position: usize,
    pub direction: SortDirection,
    pub col_type: ColumnType,
}

/// 已解析的统计项
#[derive(Debug, Clone)]
pub struct ResolvedStat {
    pub kind: StatsKind,
    /// 聚合列来源 (Counter 为 None)
    pub source: Option<ColumnSource>,
    pub filter: Filter,
}

/// 查询计划
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub columns: Vec<OutputColumn>,
    pub sort: Vec<SortKey>,
    pub stats: Vec<ResolvedStat>,
    /// 自动展开列时强制输出列名行
    pub send_columns_header: bool,
}

impl QueryPlan {
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// 发给后端的真实列名 (按输出顺序)
    pub fn backend_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| !c.is_virtual())
            .map(|c| c.name.clone())
            .collect()
    }

    /// 需要拼接的虚拟列 (按输出位置递增)
    pub fn virtual_columns(&self) -> impl Iterator<Item = (usize, VirtualKey)> + '_ {
        self.columns.iter().filter_map(|c| match c.source {
            ColumnSource::Virtual(key) => Some((c.position, key)),
            ColumnSource::Real { .. } => None,
        })
    }

    /// 列名行: 统计查询只输出统计标签
    pub fn column_names(&self) -> Vec<String> {
        if self.stats.is_empty() {
            self.columns.iter().map(|c| c.name.clone()).collect()
        } else {
            (0..self.stats.len()).map(|i| format!("stats_{}", i + 1)).collect()
        }
    }
}

/// 解析单个列名
fn resolve_column(table: &Table, name: &str) -> Option<(ColumnType, ColumnSource)> {
    let index = table.index_of(name)?;
    let column = &table.columns[index];
    if column.col_type == ColumnType::Virtual {
        let entry = virtual_columns::lookup(&column.name)?;
        Some((entry.col_type, ColumnSource::Virtual(entry.key)))
    } else {
        Some((column.col_type, ColumnSource::Real { index }))
    }
}

/// 解析请求的输出列、排序键与统计项
pub fn resolve(request: &Request, table: &Table) -> Result<QueryPlan> {
    let mut send_columns_header = request.send_columns_header;

    let requested: Vec<String> = if request.columns.is_empty() && request.stats.is_empty() {
        send_columns_header = true;
        table
            .columns
            .iter()
            .filter(|c| c.is_default_output())
            .map(|c| c.name.to_lowercase())
            .collect()
    } else {
        request.columns.iter().map(|c| c.to_lowercase()).collect()
    };

    let mut columns = Vec::with_capacity(requested.len());
    for (position, name) in requested.into_iter().enumerate() {
        let (col_type, source) = resolve_column(table, &name).ok_or_else(|| {
            BrokerError::bad_request(format!("table {} has no column {}", table.name, name))
        })?;
        columns.push(OutputColumn {
            name,
            col_type,
            position,
            source,
        });
    }

    let mut sort = Vec::with_capacity(request.sort.len());
    for spec in &request.sort {
        let name = spec.name.to_lowercase();
        if table.index_of(&name).is_none() {
            return Err(BrokerError::bad_request(format!(
                "table {} has no column {} to sort",
                table.name, name
            )));
        }
        let column = columns.iter().find(|c| c.name == name).ok_or_else(|| {
            BrokerError::bad_request(format!("sort column {} not in result set", name))
        })?;
        sort.push(SortKey {
            position: column.position,
            direction: spec.direction,
            col_type: column.col_type,
        });
    }

    let mut stats = Vec::with_capacity(request.stats.len());
    for spec in &request.stats {
        let source = match &spec.column {
            Some(column) => {
                let name = column.to_lowercase();
                let (_, source) = resolve_column(table, &name).ok_or_else(|| {
                    BrokerError::bad_request(format!(
                        "table {} has no column {}",
                        table.name, name
                    ))
                })?;
                Some(source)
            }
            None => None,
        };
        stats.push(ResolvedStat {
            kind: spec.kind,
            source,
            filter: spec.filter.clone(),
        });
    }

    Ok(QueryPlan {
        columns,
        sort,
        stats,
        send_columns_header,
    })
}
