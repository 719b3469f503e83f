//! 任务队列
//!
//! 负责并发控制、任务调度与生命周期事件分发。待执行任务按
//! FIFO 排队，活跃任务数不超过 max_runner；停止通过取消令牌
//! 协作完成。内部锁只保护 O(1) 的表操作，绝不在持锁期间调用
//! 外部观察者。

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::downloader::{
    DownloadCallbacks, DownloadOptions, DownloadParams, Downloader, MessageEvent, ProgressEvent,
    TaskInfo, TaskStatus,
};

/// 队列运行配置，可在运行期修改
#[derive(Debug, Clone, Serialize)]
pub struct QueueConfig {
    /// 最大并发任务数
    #[serde(rename = "maxRunner")]
    pub max_runner: usize,
    /// 保存根目录
    #[serde(rename = "localDir")]
    pub local_dir: PathBuf,
    /// 下载完成后是否删除分段文件
    #[serde(rename = "deleteSegments")]
    pub delete_segments: bool,
    /// 全局代理，空表示禁用
    pub proxy: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_runner: 2,
            local_dir: PathBuf::from("./downloads"),
            delete_segments: false,
            proxy: String::new(),
        }
    }
}

/// 队列操作错误
#[derive(Debug, PartialEq, Eq)]
pub enum QueueError {
    /// 任务不存在或已结束
    TaskNotFound(String),
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::TaskNotFound(id) => write!(f, "任务不存在: {}", id),
        }
    }
}

impl std::error::Error for QueueError {}

/// 生命周期观察者
///
/// 六个回调都有空默认实现，实现方按需覆盖。回调可能从任意
/// 驱动任务并发触发，必须快速返回，阻塞会卡住底层读取线程
pub trait QueueObserver: Send + Sync {
    fn on_start(&self, _id: &str) {}
    fn on_success(&self, _id: &str) {}
    fn on_failed(&self, _id: &str, _error: &str) {}
    fn on_stopped(&self, _id: &str) {}
    fn on_progress(&self, _event: &ProgressEvent) {}
    fn on_message(&self, _event: &MessageEvent) {}
}

/// 受锁保护的队列内部状态
struct QueueState {
    /// 待执行任务队列（FIFO）
    pending: VecDeque<DownloadParams>,
    /// 活跃任务（任务ID -> 取消令牌）
    active: HashMap<String, CancellationToken>,
    /// 任务信息表，从入队保留到进程结束
    tasks: HashMap<String, TaskInfo>,
    /// 运行配置
    config: QueueConfig,
}

/// 任务队列
///
/// 字段均为 Arc 包装，Clone 后指向同一实例
#[derive(Clone)]
pub struct TaskQueue {
    downloader: Arc<dyn Downloader>,
    state: Arc<Mutex<QueueState>>,
    observers: Arc<RwLock<Vec<Arc<dyn QueueObserver>>>>,
}

impl TaskQueue {
    pub fn new(downloader: Arc<dyn Downloader>, config: QueueConfig) -> Self {
        info!(
            "任务队列初始化: maxRunner={}, localDir={:?}, deleteSegments={}, proxy={}",
            config.max_runner, config.local_dir, config.delete_segments, config.proxy
        );
        Self {
            downloader,
            state: Arc::new(Mutex::new(QueueState {
                pending: VecDeque::new(),
                active: HashMap::new(),
                tasks: HashMap::new(),
                config,
            })),
            observers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// 注册生命周期观察者
    pub fn register_observer(&self, observer: Arc<dyn QueueObserver>) {
        self.observers.write().unwrap().push(observer);
    }

    fn notify<F: Fn(&dyn QueueObserver)>(&self, f: F) {
        // 先复制观察者列表再调用，不持有任何内部锁
        let observers = self.observers.read().unwrap().clone();
        for observer in &observers {
            f(observer.as_ref());
        }
    }

    /// 提交任务
    ///
    /// 有空闲槽位时立即转为 downloading 并启动驱动任务，
    /// 否则追加到待执行队列尾部。返回值是提交时刻的裁决
    pub fn enqueue(&self, params: DownloadParams) -> TaskStatus {
        let mut st = self.state.lock().unwrap();

        // 同一 ID 仍在排队或执行时重复提交不生效
        if let Some(existing) = st.tasks.get(&params.id) {
            if matches!(
                existing.status,
                TaskStatus::Pending | TaskStatus::Downloading
            ) {
                warn!("任务重复提交: id={}, status={}", params.id, existing.status);
                return existing.status;
            }
        }

        let mut info = TaskInfo::new(&params);
        let admitted = st.active.len() < st.config.max_runner;

        if admitted {
            info.status = TaskStatus::Downloading;
            let token = CancellationToken::new();
            st.active.insert(params.id.clone(), token.clone());
            st.tasks.insert(params.id.clone(), info);
            let queue_len = st.pending.len();
            drop(st);

            info!("任务直接进入执行: id={}, queueLength={}", params.id, queue_len);
            self.spawn_driver(params, token);
            TaskStatus::Downloading
        } else {
            let id = params.id.clone();
            st.tasks.insert(id.clone(), info);
            st.pending.push_back(params);
            let queue_len = st.pending.len();
            drop(st);

            info!("任务进入等待队列: id={}, queueLength={}", id, queue_len);
            TaskStatus::Pending
        }
    }

    /// 停止指定任务
    ///
    /// 只触发取消令牌，状态转移由驱动任务观察取消后完成
    pub fn stop(&self, id: &str) -> Result<(), QueueError> {
        let token = {
            let st = self.state.lock().unwrap();
            st.active.get(id).cloned()
        };

        match token {
            Some(token) => {
                info!("停止任务: id={}", id);
                token.cancel();
                Ok(())
            }
            None => {
                warn!("尝试停止不存在的任务: id={}", id);
                Err(QueueError::TaskNotFound(id.to_string()))
            }
        }
    }

    /// 尝试从等待队列补位，直到达到并发上限
    ///
    /// 每次持锁只弹出一个任务，驱动任务在锁外启动
    fn try_run(&self) {
        loop {
            let (params, token) = {
                let mut st = self.state.lock().unwrap();
                if st.active.len() >= st.config.max_runner {
                    return;
                }
                let Some(params) = st.pending.pop_front() else {
                    return;
                };
                let token = CancellationToken::new();
                if let Some(task) = st.tasks.get_mut(&params.id) {
                    task.status = TaskStatus::Downloading;
                }
                st.active.insert(params.id.clone(), token.clone());
                (params, token)
            };

            debug!("等待任务补位执行: id={}", params.id);
            self.spawn_driver(params, token);
        }
    }

    fn spawn_driver(&self, params: DownloadParams, token: CancellationToken) {
        let queue = self.clone();
        tokio::spawn(async move {
            queue.run_task(params, token).await;
        });
    }

    /// 在锁内复制一份参数构建配置
    fn snapshot_options(&self) -> DownloadOptions {
        let st = self.state.lock().unwrap();
        DownloadOptions {
            local_dir: st.config.local_dir.clone(),
            delete_segments: st.config.delete_segments,
            proxy: st.config.proxy.clone(),
        }
    }

    /// 驱动单个下载任务并翻译结果
    async fn run_task(self, params: DownloadParams, token: CancellationToken) {
        let id = params.id.clone();
        info!("执行任务: id={}, type={}", id, params.download_type);

        self.notify(|o| o.on_start(&id));

        let options = self.snapshot_options();

        let progress_queue = self.clone();
        let progress_id = id.clone();
        let message_queue = self.clone();
        let callbacks = DownloadCallbacks {
            on_progress: Some(Arc::new(move |event: ProgressEvent| {
                {
                    let mut st = progress_queue.state.lock().unwrap();
                    if let Some(task) = st.tasks.get_mut(&progress_id) {
                        task.percent = event.percent;
                        task.speed = event.speed.clone();
                        task.is_live = event.is_live;
                    }
                }
                progress_queue.notify(|o| o.on_progress(&event));
            })),
            on_message: Some(Arc::new(move |event: MessageEvent| {
                message_queue.notify(|o| o.on_message(&event));
            })),
        };

        let result = self
            .downloader
            .download(token, params, options, callbacks)
            .await;

        let active_count = {
            let mut st = self.state.lock().unwrap();
            st.active.remove(&id);
            st.active.len()
        };
        debug!("任务退出活跃集合: id={}, activeCount={}", id, active_count);

        match result {
            Ok(()) => {
                info!("任务成功完成: id={}", id);
                {
                    let mut st = self.state.lock().unwrap();
                    if let Some(task) = st.tasks.get_mut(&id) {
                        task.status = TaskStatus::Success;
                        task.percent = 100.0;
                    }
                }
                self.notify(|o| o.on_success(&id));
            }
            Err(e) if e.is_cancelled() => {
                info!("任务已停止: id={}", id);
                {
                    let mut st = self.state.lock().unwrap();
                    if let Some(task) = st.tasks.get_mut(&id) {
                        task.status = TaskStatus::Stopped;
                    }
                }
                self.notify(|o| o.on_stopped(&id));
            }
            Err(e) => {
                let message = e.to_string();
                error!("任务失败: id={}, error={}", id, message);
                {
                    let mut st = self.state.lock().unwrap();
                    if let Some(task) = st.tasks.get_mut(&id) {
                        task.status = TaskStatus::Failed;
                        task.error = Some(message.clone());
                    }
                }
                self.notify(|o| o.on_failed(&id, &message));
            }
        }

        self.try_run();
    }

    /// 设置最大并发数
    ///
    /// 调低不会抢占已在执行的任务，只收紧后续准入；
    /// 调高后立即尝试补位
    pub fn set_max_runner(&self, n: usize) {
        {
            let mut st = self.state.lock().unwrap();
            st.config.max_runner = n.max(1);
        }
        self.try_run();
    }

    /// 设置全局代理
    pub fn set_proxy(&self, proxy: String) {
        let mut st = self.state.lock().unwrap();
        st.config.proxy = proxy;
    }

    /// 设置保存根目录
    pub fn set_local_dir(&self, dir: PathBuf) {
        let mut st = self.state.lock().unwrap();
        st.config.local_dir = dir;
    }

    /// 设置是否删除分段文件
    pub fn set_delete_segments(&self, value: bool) {
        let mut st = self.state.lock().unwrap();
        st.config.delete_segments = value;
    }

    /// 当前配置快照
    pub fn config(&self) -> QueueConfig {
        self.state.lock().unwrap().config.clone()
    }

    /// 获取指定任务的信息快照
    pub fn get_task(&self, id: &str) -> Option<TaskInfo> {
        let st = self.state.lock().unwrap();
        st.tasks.get(id).cloned()
    }

    /// 获取所有任务的信息快照，按创建时间排序
    pub fn get_all_tasks(&self) -> Vec<TaskInfo> {
        let st = self.state.lock().unwrap();
        let mut tasks: Vec<TaskInfo> = st.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        tasks
    }

    /// 当前活跃任务数
    pub fn active_count(&self) -> usize {
        self.state.lock().unwrap().active.len()
    }
}
