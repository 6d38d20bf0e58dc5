//! 表目录
//!
//! 代理对外公开的表集合。表内容由外部刷新器写入各 peer 的缓存，
//! 这里只描述结构。

use super::{Column, ColumnType, Table, UpdatePolicy};
use std::collections::HashMap;
use std::sync::Arc;

/// 表目录
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tables: HashMap<String, Arc<Table>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册表 (同名覆盖)
    pub fn register(&mut self, table: Table) {
        self.tables.insert(table.name.clone(), Arc::new(table));
    }

    /// 注册别名，指向已注册的表
    pub fn alias(&mut self, alias: &str, target: &str) {
        if let Some(table) = self.tables.get(target).cloned() {
            self.tables.insert(alias.to_string(), table);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Table>> {
        self.tables.get(name).cloned()
    }

    /// 已注册的表名 (有序)
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

fn col(name: &str, col_type: ColumnType, update: UpdatePolicy) -> Column {
    Column::new(name, col_type, update)
}

/// 内置默认目录
pub fn default_catalog() -> Catalog {
    use ColumnType::*;
    use UpdatePolicy::{Dynamic, Reference, Static};

    let mut catalog = Catalog::new();

    catalog.register(Table::new(
        "hosts",
        vec![
            col("name", String, Static),
            col("alias", String, Static),
            col("address", String, Static),
            col("state", Int, Dynamic),
            col("has_been_checked", Int, Dynamic),
            col("last_check", Time, Dynamic),
            col("last_state_change", Time, Dynamic),
            col("latency", Float, Dynamic),
            col("plugin_output", String, Dynamic),
            col("groups", StringList, Static),
            col("contacts", StringList, Static),
            col("comments", IntList, Dynamic),
            col("services", StringList, Reference),
            Column::virtual_column("peer_key"),
            Column::virtual_column("peer_name"),
            Column::virtual_column("state_order"),
            Column::virtual_column("last_state_change_order"),
        ],
    ));

    catalog.register(Table::new(
        "services",
        vec![
            col("host_name", String, Static),
            col("description", String, Static),
            col("state", Int, Dynamic),
            col("has_been_checked", Int, Dynamic),
            col("last_check", Time, Dynamic),
            col("last_state_change", Time, Dynamic),
            col("latency", Float, Dynamic),
            col("plugin_output", String, Dynamic),
            col("groups", StringList, Static),
            col("contacts", StringList, Static),
            col("comments", IntList, Dynamic),
            col("host_alias", String, Reference),
            Column::virtual_column("peer_key"),
            Column::virtual_column("peer_name"),
            Column::virtual_column("state_order"),
            Column::virtual_column("last_state_change_order"),
        ],
    ));

    catalog.register(
        Table::new(
            "log",
            vec![
                col("time", Time, Static),
                col("class", Int, Static),
                col("type", String, Static),
                col("host_name", String, Static),
                col("service_description", String, Static),
                col("state", Int, Static),
                col("message", String, Static),
                Column::virtual_column("peer_key"),
                Column::virtual_column("peer_name"),
            ],
        )
        .with_passthrough(),
    );

    catalog.register(Table::new(
        "backends",
        [
            "key",
            "name",
            "addr",
            "status",
            "bytes_send",
            "bytes_received",
            "queries",
            "last_error",
            "last_online",
            "last_update",
            "response_time",
        ]
        .into_iter()
        .map(Column::virtual_column)
        .collect(),
    ));
    catalog.alias("sites", "backends");

    catalog.register(Table::new(
        "tables",
        vec![col("name", String, Static)],
    ));

    catalog.register(Table::new(
        "columns",
        vec![
            col("name", String, Static),
            col("table", String, Static),
            col("type", String, Static),
            col("description", String, Static),
        ],
    ));

    catalog
}
