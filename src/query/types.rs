// 查询引擎类型定义

use serde::ser::{Error as _, SerializeSeq};
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::schema::Table;
use crate::BrokerError;

// ═══════════════════════════════════════════════════════════════════════════
// 单元格与行
// ═══════════════════════════════════════════════════════════════════════════

/// 结果单元格 (异构)
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
}

/// 一行结果
pub type Row = Vec<Value>;

impl Value {
    /// 数值化 (非数值为 0)
    pub fn as_f64(&self) -> f64 {
        match self {
            Value::Int(i) => *i as f64,
            Value::Float(f) => *f,
            Value::String(s) => s.trim().parse().unwrap_or(0.0),
            Value::Null | Value::List(_) => 0.0,
        }
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            Value::Int(i) => *i,
            other => other.as_f64() as i64,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// 整数值的浮点数输出为整数，与后端的 JSON 输出保持一致
    pub fn number(f: f64) -> Self {
        if f.is_finite() && f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 {
            Value::Int(f as i64)
        } else {
            Value::Float(f)
        }
    }

    /// 从后端返回的 JSON 转换
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Int(b as i64),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(0.0)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from_json).collect())
            }
            object @ serde_json::Value::Object(_) => Value::String(object.to_string()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) if !f.is_finite() => {
                Err(S::Error::custom(format!("unsupported float value: {}", f)))
            }
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::String(s) => serializer.serialize_str(s),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}

/// 按列名读取完整表行 (缓存行)
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    pub table: &'a Table,
    pub row: &'a [Value],
}

impl<'a> RowView<'a> {
    pub fn new(table: &'a Table, row: &'a [Value]) -> Self {
        Self { table, row }
    }

    pub fn get(&self, name: &str) -> Option<&'a Value> {
        self.table.index_of(name).and_then(|i| self.row.get(i))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// 过滤条件
// ═══════════════════════════════════════════════════════════════════════════

/// 行过滤谓词，由外部过滤表达式解析器构建
pub trait RowFilter: Send + Sync {
    fn matches(&self, row: &RowView<'_>) -> bool;
}

impl<F> RowFilter for F
where
    F: Fn(&RowView<'_>) -> bool + Send + Sync,
{
    fn matches(&self, row: &RowView<'_>) -> bool {
        self(row)
    }
}

/// 过滤条件: 原始头部行 (原样转发给后端) + 可选的已编译谓词
#[derive(Clone, Default)]
pub struct Filter {
    pub lines: Vec<String>,
    pub predicate: Option<Arc<dyn RowFilter>>,
}

impl Filter {
    pub fn with_predicate(mut self, predicate: impl RowFilter + 'static) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// 没有谓词时匹配所有行
    pub fn matches(&self, row: &RowView<'_>) -> bool {
        self.predicate.as_ref().map_or(true, |p| p.matches(row))
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty() && self.predicate.is_none()
    }

    /// 有原始过滤行但没有编译好的谓词，只能转发给后端求值
    pub fn is_unparsed(&self) -> bool {
        !self.lines.is_empty() && self.predicate.is_none()
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter")
            .field("lines", &self.lines)
            .field("compiled", &self.predicate.is_some())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// 排序与统计
// ═══════════════════════════════════════════════════════════════════════════

/// 排序方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl FromStr for SortDirection {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            other => Err(BrokerError::bad_request(format!(
                "unrecognized sort direction {}",
                other
            ))),
        }
    }
}

/// 排序请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub name: String,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn new(name: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            name: name.into(),
            direction,
        }
    }
}

/// 统计类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsKind {
    /// 计数匹配的行
    Counter,
    Min,
    Max,
    Sum,
    Average,
}

impl StatsKind {
    pub const ALL: [StatsKind; 5] = [
        StatsKind::Counter,
        StatsKind::Min,
        StatsKind::Max,
        StatsKind::Sum,
        StatsKind::Average,
    ];

    /// 聚合函数名，Counter 没有函数名
    pub fn function_name(&self) -> Option<&'static str> {
        match self {
            StatsKind::Counter => None,
            StatsKind::Min => Some("min"),
            StatsKind::Max => Some("max"),
            StatsKind::Sum => Some("sum"),
            StatsKind::Average => Some("avg"),
        }
    }
}

impl FromStr for StatsKind {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "min" => Ok(StatsKind::Min),
            "max" => Ok(StatsKind::Max),
            "sum" => Ok(StatsKind::Sum),
            "avg" => Ok(StatsKind::Average),
            other => Err(BrokerError::bad_request(format!(
                "unrecognized stats function {}",
                other
            ))),
        }
    }
}

/// 无条件计数在线路上的写法
pub const MATCH_ALL_COUNTER: &str = "Stats: state != 9999";

/// 统计请求
#[derive(Debug, Clone)]
pub struct StatSpec {
    pub kind: StatsKind,
    /// 聚合列 (Counter 为 None)
    pub column: Option<String>,
    /// Counter 的过滤条件
    pub filter: Filter,
}

impl StatSpec {
    pub fn counter(filter: Filter) -> Self {
        Self {
            kind: StatsKind::Counter,
            column: None,
            filter,
        }
    }

    pub fn aggregate(kind: StatsKind, column: impl Into<String>) -> Self {
        Self {
            kind,
            column: Some(column.into()),
            filter: Filter::default(),
        }
    }

    /// 转发给后端的头部行
    pub fn header_lines(&self) -> Vec<String> {
        match (self.kind.function_name(), &self.column) {
            (Some(func), Some(column)) => vec![format!("Stats: {} {}", func, column)],
            // 无条件计数: 匹配所有行
            _ if self.filter.lines.is_empty() => vec![MATCH_ALL_COUNTER.to_string()],
            _ => self.filter.lines.clone(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// 查询请求
// ═══════════════════════════════════════════════════════════════════════════

/// 输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    WrappedJson,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::WrappedJson => "wrapped_json",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "json" => Ok(OutputFormat::Json),
            "wrapped_json" => Ok(OutputFormat::WrappedJson),
            other => Err(BrokerError::bad_request(format!(
                "unrecognized output format {}",
                other
            ))),
        }
    }
}

/// 查询请求 (创建后不可变)
#[derive(Debug, Clone)]
pub struct Request {
    /// 请求 ID (日志关联)
    pub request_id: String,
    pub table: String,
    pub columns: Vec<String>,
    pub filter: Filter,
    pub stats: Vec<StatSpec>,
    pub sort: Vec<SortSpec>,
    /// 0 或 None 表示不限制
    pub limit: Option<usize>,
    pub offset: usize,
    /// 限定查询的后端 ID，空表示全部
    pub backends: Vec<String>,
    pub output_format: OutputFormat,
    /// 响应前加 16 字节状态行
    pub response_fixed16: bool,
    /// 响应前加列名行
    pub send_columns_header: bool,
    pub keep_alive: bool,
}

impl Request {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            table: table.into(),
            columns: Vec::new(),
            filter: Filter::default(),
            stats: Vec::new(),
            sort: Vec::new(),
            limit: None,
            offset: 0,
            backends: Vec::new(),
            output_format: OutputFormat::Json,
            response_fixed16: false,
            send_columns_header: false,
            keep_alive: false,
        }
    }

    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_stat(mut self, stat: StatSpec) -> Self {
        self.stats.push(stat);
        self
    }

    pub fn with_sort(mut self, name: impl Into<String>, direction: SortDirection) -> Self {
        self.sort.push(SortSpec::new(name, direction));
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_backends<I, S>(mut self, backends: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.backends = backends.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    pub fn with_fixed16(mut self) -> Self {
        self.response_fixed16 = true;
        self
    }

    pub fn with_columns_header(mut self) -> Self {
        self.send_columns_header = true;
        self
    }

    /// 第一条无法在本地求值的过滤行 (请求过滤或计数统计)
    pub fn unparsed_filter_line(&self) -> Option<&str> {
        std::iter::once(&self.filter)
            .chain(self.stats.iter().map(|s| &s.filter))
            .find(|f| f.is_unparsed())
            .and_then(|f| f.lines.first())
            .map(String::as_str)
    }

    /// 生效的行数限制
    pub fn effective_limit(&self) -> Option<usize> {
        self.limit.filter(|l| *l > 0)
    }

    /// 直通模式下发给单个 peer 的精简请求:
    /// 只含真实列，固定 json + fixed16，虚拟列和外层信封由上层恢复
    pub fn passthrough_child(&self, backend_columns: Vec<String>) -> Request {
        Request {
            request_id: self.request_id.clone(),
            table: self.table.clone(),
            columns: backend_columns,
            filter: self.filter.clone(),
            stats: self.stats.clone(),
            sort: Vec::new(),
            limit: self.limit,
            offset: 0,
            backends: Vec::new(),
            output_format: OutputFormat::Json,
            response_fixed16: true,
            send_columns_header: false,
            keep_alive: false,
        }
    }

    /// 渲染为 livestatus 文本请求
    pub fn to_query_text(&self) -> String {
        let mut text = format!("GET {}\n", self.table);
        if !self.columns.is_empty() {
            text.push_str(&format!("Columns: {}\n", self.columns.join(" ")));
        }
        for line in &self.filter.lines {
            text.push_str(line);
            text.push('\n');
        }
        for stat in &self.stats {
            for line in stat.header_lines() {
                text.push_str(&line);
                text.push('\n');
            }
        }
        for sort in &self.sort {
            let direction = match sort.direction {
                SortDirection::Asc => "asc",
                SortDirection::Desc => "desc",
            };
            text.push_str(&format!("Sort: {} {}\n", sort.name, direction));
        }
        if let Some(limit) = self.effective_limit() {
            text.push_str(&format!("Limit: {}\n", limit));
        }
        if self.offset > 0 {
            text.push_str(&format!("Offset: {}\n", self.offset));
        }
        if !self.backends.is_empty() {
            text.push_str(&format!("Backends: {}\n", self.backends.join(" ")));
        }
        text.push_str(&format!("OutputFormat: {}\n", self.output_format.as_str()));
        if self.response_fixed16 {
            text.push_str("ResponseHeader: fixed16\n");
        }
        if self.send_columns_header {
            text.push_str("ColumnHeaders: on\n");
        }
        if self.keep_alive {
            text.push_str("KeepAlive: on\n");
        }
        text.push('\n');
        text
    }
}
