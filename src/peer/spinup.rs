//! 唤醒空闲 peer
//!
//! 空闲 peer 的后台刷新暂停，缓存可能过期。查询动态列之前
//! 需要先唤醒刷新器；每个请求只发出一次合并后的唤醒信号。

use async_trait::async_trait;

use super::PeerId;

/// 唤醒接口，由缓存刷新器实现
#[async_trait]
pub trait PeerWaker: Send + Sync {
    /// 唤醒并等待刷新完成
    async fn wake_peers(&self, peers: &[PeerId]);
}

/// 只记录日志的默认实现
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingWaker;

#[async_trait]
impl PeerWaker for LoggingWaker {
    async fn wake_peers(&self, peers: &[PeerId]) {
        log::info!("spin up requested for idling peers: {}", peers.join(", "));
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// 记录每次唤醒调用
    #[derive(Default)]
    pub struct RecordingWaker {
        pub calls: Mutex<Vec<Vec<PeerId>>>,
    }

    #[async_trait]
    impl PeerWaker for RecordingWaker {
        async fn wake_peers(&self, peers: &[PeerId]) {
            self.calls.lock().push(peers.to_vec());
        }
    }

    #[tokio::test]
    async fn test_recording_waker() {
        let waker = RecordingWaker::default();
        waker.wake_peers(&["a".to_string(), "b".to_string()]).await;
        LoggingWaker.wake_peers(&["a".to_string()]).await;
        assert_eq!(*waker.calls.lock(), vec![vec!["a".to_string(), "b".to_string()]]);
    }
}
