//! 后端连接 (peer)
//!
//! @yutiansut @quantaxis
//!
//! 每个 peer 是一个已注册的监控后端：
//! - 状态 (PeerStatus) 放在读写锁之后，只能通过访问器读写
//! - 表缓存由外部刷新器写入 (`update_cache`)，聚合模式直接读取
//! - 直通查询通过 `PeerConnection` 发往后端

pub mod connection;
pub mod registry;
pub mod spinup;
pub mod status;

pub use connection::{LivestatusConnection, PeerConnection, Transfer};
pub use registry::PeerRegistry;
pub use spinup::{LoggingWaker, PeerWaker};
pub use status::{PeerState, PeerStatus};

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::query::{Request, Row, Value};
use crate::schema::{Table, VirtualKey};

pub type PeerId = String;

// ═══════════════════════════════════════════════════════════════════════════
// 错误类型
// ═══════════════════════════════════════════════════════════════════════════

/// 单个 peer 的查询错误，只记录到 Failed，不会中断整体查询
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PeerError {
    #[error("{0}")]
    Down(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("timeout after {0:?}")]
    Timeout(Duration),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("backend returned {code}: {message}")]
    Backend { code: u16, message: String },

    #[error("task failed: {0}")]
    Task(String),
}

// ═══════════════════════════════════════════════════════════════════════════
// Peer
// ═══════════════════════════════════════════════════════════════════════════

/// 已注册的后端
pub struct Peer {
    pub id: PeerId,
    pub name: String,
    pub addr: String,
    status: RwLock<PeerStatus>,
    /// 表名 → 缓存行 (完整表结构宽度)
    cache: RwLock<HashMap<String, Arc<Vec<Row>>>>,
    connection: Arc<dyn PeerConnection>,
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("addr", &self.addr)
            .finish()
    }
}

impl Peer {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        addr: impl Into<String>,
        connection: Arc<dyn PeerConnection>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            addr: addr.into(),
            status: RwLock::new(PeerStatus::default()),
            cache: RwLock::new(HashMap::new()),
            connection,
        }
    }

    pub fn with_status(self, status: PeerStatus) -> Self {
        *self.status.write() = status;
        self
    }

    /// 状态快照
    pub fn status(&self) -> PeerStatus {
        self.status.read().clone()
    }

    /// 在共享读锁下读取状态
    pub fn read_status<R>(&self, f: impl FnOnce(&PeerStatus) -> R) -> R {
        f(&self.status.read())
    }

    /// 独占写入状态 (刷新器专用)
    pub fn update_status(&self, f: impl FnOnce(&mut PeerStatus)) {
        f(&mut self.status.write());
    }

    pub fn is_down(&self) -> bool {
        self.read_status(PeerStatus::is_down)
    }

    pub fn is_idling(&self) -> bool {
        self.read_status(|s| s.idling)
    }

    pub fn last_error(&self) -> String {
        self.read_status(|s| s.last_error.clone())
    }

    /// 缓存的表数据
    pub fn cached_rows(&self, table: &str) -> Option<Arc<Vec<Row>>> {
        self.cache.read().get(table).cloned()
    }

    /// 替换缓存的表数据 (刷新器专用)
    pub fn update_cache(&self, table: impl Into<String>, rows: Vec<Row>) {
        self.cache.write().insert(table.into(), Arc::new(rows));
    }

    /// 直通查询，记录查询次数、响应时间与收发字节数
    pub async fn query(&self, request: &Request) -> Result<Vec<Row>, PeerError> {
        let started = std::time::Instant::now();
        let result = self.connection.query_counted(request).await;
        self.update_status(|s| {
            s.queries += 1;
            s.response_time = started.elapsed().as_secs_f64();
            if let Ok((_, transfer)) = &result {
                s.bytes_send += transfer.sent;
                s.bytes_received += transfer.received;
            }
        });
        result.map(|(rows, _)| rows)
    }

    /// 虚拟列取值
    ///
    /// `field` 按列名读取当前行的真实列，用于按行计算的虚拟列。
    pub fn row_value(
        &self,
        key: VirtualKey,
        table: &Table,
        field: &dyn Fn(&str) -> Option<Value>,
    ) -> Value {
        match key {
            VirtualKey::PeerKey => Value::String(self.id.clone()),
            VirtualKey::PeerName => Value::String(self.name.clone()),
            VirtualKey::PeerAddr => Value::String(self.addr.clone()),
            VirtualKey::StateOrder => {
                let state = field("state").map(|v| v.as_i64()).unwrap_or(0);
                Value::Int(state_order(&table.name, state, has_been_checked(field)))
            }
            VirtualKey::LastStateChangeOrder => {
                if has_been_checked(field) {
                    Value::Int(field("last_state_change").map(|v| v.as_i64()).unwrap_or(0))
                } else {
                    Value::Int(self.read_status(|s| s.last_update))
                }
            }
            status_key => self.read_status(|s| match status_key {
                VirtualKey::Status => Value::Int(s.state.code()),
                VirtualKey::BytesSend => Value::Int(s.bytes_send as i64),
                VirtualKey::BytesReceived => Value::Int(s.bytes_received as i64),
                VirtualKey::Queries => Value::Int(s.queries as i64),
                VirtualKey::LastError => Value::String(s.last_error.clone()),
                VirtualKey::LastOnline => Value::Int(s.last_online),
                VirtualKey::LastUpdate => Value::Int(s.last_update),
                VirtualKey::ResponseTime => Value::Float(s.response_time),
                _ => Value::Null,
            }),
        }
    }
}

fn has_been_checked(field: &dyn Fn(&str) -> Option<Value>) -> bool {
    field("has_been_checked").map_or(true, |v| v.as_i64() != 0)
}

/// 按严重程度排列的状态: 正常 < 待检查 < 警告 < 未知/不可达 < 严重/宕机
fn state_order(table: &str, state: i64, checked: bool) -> i64 {
    if !checked {
        return 1;
    }
    match (table, state) {
        (_, 0) => 0,
        ("hosts", 1) => 4,
        ("hosts", 2) => 3,
        (_, 1) => 2,
        (_, 2) => 4,
        (_, 3) => 3,
        (_, other) => other,
    }
}
