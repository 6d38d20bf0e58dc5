//! 表结构定义
//!
//! @yutiansut @quantaxis
//!
//! 表结构是不可变的描述符：列顺序、列名索引、直通标志。
//! 虚拟列 (描述后端连接本身) 的目录见 `virtual_columns`。

pub mod catalog;
pub mod virtual_columns;

pub use catalog::{default_catalog, Catalog};
pub use virtual_columns::{VirtualColumn, VirtualKey};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ═══════════════════════════════════════════════════════════════════════════
// 列定义
// ═══════════════════════════════════════════════════════════════════════════

/// 列数据类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Int,
    Float,
    String,
    Time,
    StringList,
    IntList,
    /// 虚拟列，实际类型由虚拟列目录决定
    Virtual,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Int => "int",
            ColumnType::Float => "float",
            ColumnType::String => "string",
            ColumnType::Time => "time",
            ColumnType::StringList => "list",
            ColumnType::IntList => "list",
            ColumnType::Virtual => "virtual",
        }
    }
}

/// 列更新策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePolicy {
    /// 只在初始同步时获取
    Static,
    /// 每次刷新都会更新
    Dynamic,
    /// 由代理自身计算
    VirtualUpdate,
    /// 引用其他表的列
    Reference,
    /// 不缓存
    None,
}

/// 表结构中的列
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub col_type: ColumnType,
    pub update: UpdatePolicy,
}

impl Column {
    pub fn new(name: impl Into<String>, col_type: ColumnType, update: UpdatePolicy) -> Self {
        Self {
            name: name.into(),
            col_type,
            update,
        }
    }

    /// 虚拟列 (值来自 peer 状态或按行计算)
    pub fn virtual_column(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Virtual, UpdatePolicy::VirtualUpdate)
    }

    /// 未指定列时是否默认输出
    pub fn is_default_output(&self) -> bool {
        matches!(
            self.update,
            UpdatePolicy::Static | UpdatePolicy::Dynamic | UpdatePolicy::VirtualUpdate
        ) || self.col_type == ColumnType::Virtual
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// 表定义
// ═══════════════════════════════════════════════════════════════════════════

/// 表结构描述符
#[derive(Debug, Clone)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    /// 小写列名 → 列下标
    pub columns_index: HashMap<String, usize>,
    /// 必须原样转发给后端的表 (例如 log)
    pub passthrough_only: bool,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        let columns_index = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.to_lowercase(), i))
            .collect();

        Self {
            name: name.into(),
            columns,
            columns_index,
            passthrough_only: false,
        }
    }

    pub fn with_passthrough(mut self) -> Self {
        self.passthrough_only = true;
        self
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns_index.get(name).copied()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.index_of(name).map(|i| &self.columns[i])
    }

    /// 需要实时刷新的列数量
    pub fn dynamic_column_count(&self) -> usize {
        self.columns
            .iter()
            .filter(|c| c.update == UpdatePolicy::Dynamic)
            .count()
    }

    /// 结构元数据表，所有后端一致，只需查询第一个 peer
    pub fn is_meta(&self) -> bool {
        self.name == "tables" || self.name == "columns"
    }

    /// 只包含虚拟列的表 (每个 peer 一行)
    pub fn is_virtual_only(&self) -> bool {
        !self.columns.is_empty()
            && self
                .columns
                .iter()
                .all(|c| c.col_type == ColumnType::Virtual)
    }
}
