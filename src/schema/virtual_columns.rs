//! 虚拟列目录
//!
//! 虚拟列不存在于后端返回的行里，按行从 peer 状态读取，
//! 或在合并时计算 (state_order / last_state_change_order)。

use super::ColumnType;

/// 虚拟列的数据来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VirtualKey {
    PeerKey,
    PeerName,
    PeerAddr,
    Status,
    BytesSend,
    BytesReceived,
    Queries,
    LastError,
    LastOnline,
    LastUpdate,
    ResponseTime,
    /// 按行计算: 按严重程度排序的状态
    StateOrder,
    /// 按行计算: 最后状态变化时间，未检查过的行排最后
    LastStateChangeOrder,
}

impl VirtualKey {
    /// 没有对应状态字段、需要按行计算的虚拟列
    pub fn is_computed(&self) -> bool {
        matches!(self, VirtualKey::StateOrder | VirtualKey::LastStateChangeOrder)
    }
}

/// 虚拟列目录条目
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualColumn {
    pub key: VirtualKey,
    pub col_type: ColumnType,
}

/// 按逻辑列名查找虚拟列
pub fn lookup(name: &str) -> Option<VirtualColumn> {
    let (key, col_type) = match name {
        "key" | "peer_key" => (VirtualKey::PeerKey, ColumnType::String),
        "name" | "peer_name" => (VirtualKey::PeerName, ColumnType::String),
        "addr" => (VirtualKey::PeerAddr, ColumnType::String),
        "status" => (VirtualKey::Status, ColumnType::Int),
        "bytes_send" => (VirtualKey::BytesSend, ColumnType::Int),
        "bytes_received" => (VirtualKey::BytesReceived, ColumnType::Int),
        "queries" => (VirtualKey::Queries, ColumnType::Int),
        "last_error" => (VirtualKey::LastError, ColumnType::String),
        "last_online" => (VirtualKey::LastOnline, ColumnType::Time),
        "last_update" => (VirtualKey::LastUpdate, ColumnType::Time),
        "response_time" => (VirtualKey::ResponseTime, ColumnType::Float),
        "state_order" => (VirtualKey::StateOrder, ColumnType::Int),
        "last_state_change_order" => (VirtualKey::LastStateChangeOrder, ColumnType::Int),
        _ => return None,
    };
    Some(VirtualColumn { key, col_type })
}
