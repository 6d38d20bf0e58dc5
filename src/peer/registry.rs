//! Peer 注册表
//!
//! 启动时创建、进程退出时销毁；查询引擎构造时显式持有。
//! 注册顺序即查询顺序。

use std::collections::HashMap;
use std::sync::Arc;

use super::{Peer, PeerId};
use crate::{BrokerError, Result};

/// 有序 peer 注册表
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: Vec<Arc<Peer>>,
    index: HashMap<PeerId, usize>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册 peer，ID 重复时报错
    pub fn register(&mut self, peer: Peer) -> Result<Arc<Peer>> {
        if self.index.contains_key(&peer.id) {
            return Err(BrokerError::Config(format!(
                "duplicate peer id {}",
                peer.id
            )));
        }
        let peer = Arc::new(peer);
        self.index.insert(peer.id.clone(), self.peers.len());
        self.peers.push(Arc::clone(&peer));
        log::info!("[{}] registered peer {} ({})", peer.name, peer.id, peer.addr);
        Ok(peer)
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Peer>> {
        self.index.get(id).map(|&i| &self.peers[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn first(&self) -> Option<&Arc<Peer>> {
        self.peers.first()
    }

    /// 按注册顺序遍历
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Peer>> {
        self.peers.iter()
    }

    pub fn ids(&self) -> Vec<PeerId> {
        self.peers.iter().map(|p| p.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
