//! SSE 事件广播
//!
//! 维护事件总线并向所有订阅的 SSE 客户端扇出任务生命周期
//! 事件。广播通道容量有限，跟不上的客户端丢弃旧事件，
//! 不会反压任务回调链。

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

/// 广播通道容量
const CHANNEL_CAPACITY: usize = 256;

/// 一条 SSE 事件
#[derive(Debug, Clone, Serialize)]
pub struct SseEvent {
    /// 事件名（download-start 等）
    pub name: String,
    /// 事件负载
    pub data: serde_json::Value,
}

/// 事件总线
#[derive(Debug)]
pub struct EventHub {
    tx: broadcast::Sender<SseEvent>,
}

impl EventHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// 注册新的订阅者
    pub fn subscribe(&self) -> broadcast::Receiver<SseEvent> {
        self.tx.subscribe()
    }

    /// 向所有订阅者广播事件，无订阅者时静默丢弃
    pub fn broadcast(&self, name: &str, data: serde_json::Value) {
        let event = SseEvent {
            name: name.to_string(),
            data,
        };
        if self.tx.send(event).is_err() {
            debug!("无 SSE 订阅者，事件被丢弃: {}", name);
        }
    }

    /// 当前订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}
