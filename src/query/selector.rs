// 后端选择: 把注册表收窄为请求涉及的 peer

use std::sync::Arc;

use super::types::Request;
use crate::peer::{Peer, PeerId, PeerRegistry};
use crate::schema::Table;
use crate::{BrokerError, Result};

/// 选择结果
#[derive(Debug, Default)]
pub struct Selection {
    /// 按注册顺序排列的待查询 peer
    pub peers: Vec<Arc<Peer>>,
    /// 需要唤醒的空闲 peer (一个请求只唤醒一次)
    pub spin_up: Vec<PeerId>,
}

/// 按 Backends 头选择 peer
pub fn select_backends(registry: &PeerRegistry, request: &Request, table: &Table) -> Result<Selection> {
    for backend in &request.backends {
        if !registry.contains(backend) {
            return Err(BrokerError::bad_request(format!(
                "backend {} does not exist",
                backend
            )));
        }
    }

    let needs_fresh_cache = !table.passthrough_only && table.dynamic_column_count() > 0;

    let mut selection = Selection::default();
    for peer in registry.iter() {
        if !request.backends.is_empty() && !request.backends.contains(&peer.id) {
            continue;
        }
        if needs_fresh_cache && peer.is_idling() {
            selection.spin_up.push(peer.id.clone());
        }
        selection.peers.push(Arc::clone(peer));
    }

    // 结构元数据与 peer 无关，只问第一个
    if table.is_meta() {
        selection.peers = registry.first().cloned().into_iter().collect();
    }

    Ok(selection)
}
