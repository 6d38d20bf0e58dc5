//! Peer 连接状态
//!
//! 状态只由 peer 自身的刷新逻辑写入，查询引擎只读。

use serde::{Deserialize, Serialize};

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerState {
    Up,
    Warning,
    Down,
    Broken,
    Pending,
}

impl PeerState {
    /// 对外输出的状态码 (虚拟列 status)
    pub fn code(&self) -> i64 {
        match self {
            PeerState::Up => 0,
            PeerState::Warning => 1,
            PeerState::Down => 2,
            PeerState::Broken => 3,
            PeerState::Pending => 4,
        }
    }
}

/// Peer 状态快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerStatus {
    pub state: PeerState,
    /// 空闲中: 后台刷新暂停，缓存可能过期
    pub idling: bool,
    pub last_error: String,
    pub bytes_send: u64,
    pub bytes_received: u64,
    pub queries: u64,
    /// 最后一次在线时间 (unix 秒)
    pub last_online: i64,
    /// 最后一次缓存刷新时间 (unix 秒)
    pub last_update: i64,
    /// 最近一次响应时间 (秒)
    pub response_time: f64,
}

impl Default for PeerStatus {
    fn default() -> Self {
        Self {
            state: PeerState::Pending,
            idling: false,
            last_error: String::new(),
            bytes_send: 0,
            bytes_received: 0,
            queries: 0,
            last_online: 0,
            last_update: 0,
            response_time: 0.0,
        }
    }
}

impl PeerStatus {
    pub fn up() -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            state: PeerState::Up,
            last_online: now,
            last_update: now,
            ..Default::default()
        }
    }

    pub fn down(last_error: impl Into<String>) -> Self {
        Self {
            state: PeerState::Down,
            last_error: last_error.into(),
            ..Default::default()
        }
    }

    pub fn is_down(&self) -> bool {
        self.state == PeerState::Down
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_codes() {
        let codes: Vec<i64> = [
            PeerState::Up,
            PeerState::Warning,
            PeerState::Down,
            PeerState::Broken,
            PeerState::Pending,
        ]
        .iter()
        .map(PeerState::code)
        .collect();
        assert_eq!(codes, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_status_constructors() {
        let up = PeerStatus::up();
        assert!(!up.is_down());
        assert!(up.last_online > 0);

        let down = PeerStatus::down("connection refused");
        assert!(down.is_down());
        assert_eq!(down.last_error, "connection refused");
        assert_eq!(PeerStatus::default().state, PeerState::Pending);
    }
}
