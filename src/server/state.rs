// 应用状态

use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::queue::{QueueObserver, TaskQueue};
use crate::server::events::EventHub;
use crate::tasklog::TaskLogManager;

/// 应用全局状态
#[derive(Clone)]
pub struct AppState {
    /// 任务队列
    pub queue: TaskQueue,
    /// SSE 事件总线
    pub hub: Arc<EventHub>,
    /// 任务日志管理器
    pub logs: Arc<TaskLogManager>,
}

impl AppState {
    /// 组装状态并把队列事件接到 SSE 总线与任务日志上
    pub fn new(queue: TaskQueue, hub: Arc<EventHub>, logs: Arc<TaskLogManager>) -> Self {
        let state = Self { queue, hub, logs };
        state.queue.register_observer(Arc::new(ServerObserver {
            hub: state.hub.clone(),
            logs: state.logs.clone(),
        }));
        state
    }
}

/// 队列事件到传输层的桥接
///
/// 生命周期事件广播到 SSE，控制台输出写入任务日志。
/// progress 事件不经 SSE 推送，客户端通过任务接口轮询进度
struct ServerObserver {
    hub: Arc<EventHub>,
    logs: Arc<TaskLogManager>,
}

impl ServerObserver {
    fn append_log(&self, id: &str, line: &str) {
        if let Err(e) = self.logs.append(id, line) {
            warn!("写入任务日志失败: id={}, error={}", id, e);
        }
    }
}

impl QueueObserver for ServerObserver {
    fn on_start(&self, id: &str) {
        if let Err(e) = self.logs.reset(id) {
            warn!("重置任务日志失败: id={}, error={}", id, e);
        }
        self.append_log(id, "Task started");
        self.hub.broadcast("download-start", json!({ "id": id }));
    }

    fn on_success(&self, id: &str) {
        self.append_log(id, "Task completed successfully");
        self.hub.broadcast("download-success", json!({ "id": id }));
    }

    fn on_failed(&self, id: &str, error: &str) {
        self.append_log(id, &format!("Task failed: {}", error));
        self.hub
            .broadcast("download-failed", json!({ "id": id, "error": error }));
    }

    fn on_stopped(&self, id: &str) {
        self.append_log(id, "Task stopped");
        self.hub.broadcast("download-stop", json!({ "id": id }));
    }

    fn on_message(&self, event: &crate::downloader::MessageEvent) {
        info!("[task {}] {}", event.id, event.message);
        self.append_log(&event.id, &event.message);
    }
}
