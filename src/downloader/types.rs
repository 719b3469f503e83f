use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::runner::RunError;

/// 下载类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadType {
    /// HLS 播放列表（m3u8）
    M3u8,
    /// Bilibili 视频
    Bilibili,
    /// 普通直链文件
    Direct,
}

impl fmt::Display for DownloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadType::M3u8 => write!(f, "m3u8"),
            DownloadType::Bilibili => write!(f, "bilibili"),
            DownloadType::Direct => write!(f, "direct"),
        }
    }
}

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// 等待中
    Pending,
    /// 下载中
    Downloading,
    /// 成功完成
    Success,
    /// 失败
    Failed,
    /// 已停止
    Stopped,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Downloading => write!(f, "downloading"),
            TaskStatus::Success => write!(f, "success"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// 下载任务参数（入队后不可变）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadParams {
    /// 任务ID
    pub id: String,
    /// 下载类型
    #[serde(rename = "type")]
    pub download_type: DownloadType,
    /// 下载URL
    pub url: String,
    /// 文件名（不含扩展名时由 schema 决定后缀）
    pub name: String,
    /// 保存目录下的子文件夹，空表示直接保存在根目录
    #[serde(default)]
    pub folder: String,
    /// 自定义HTTP头，原样传递给下载器
    #[serde(default)]
    pub headers: Vec<String>,
}

/// 任务信息（由任务队列持有，对外只返回快照副本）
#[derive(Debug, Clone, Serialize)]
pub struct TaskInfo {
    /// 任务ID
    pub id: String,
    /// 下载类型
    #[serde(rename = "type")]
    pub download_type: DownloadType,
    /// 下载URL
    pub url: String,
    /// 文件名
    pub name: String,
    /// 任务状态
    pub status: TaskStatus,
    /// 完成百分比（0-100）
    pub percent: f64,
    /// 下载速度（人类可读字符串）
    pub speed: String,
    /// 是否为直播流
    #[serde(rename = "isLive")]
    pub is_live: bool,
    /// 错误信息（仅失败时存在）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 创建时间 (Unix timestamp)
    #[serde(rename = "createdAt")]
    pub created_at: i64,
}

impl TaskInfo {
    pub fn new(params: &DownloadParams) -> Self {
        Self {
            id: params.id.clone(),
            download_type: params.download_type,
            url: params.url.clone(),
            name: params.name.clone(),
            status: TaskStatus::Pending,
            percent: 0.0,
            speed: String::new(),
            is_live: false,
            error: None,
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// 进度事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressKind {
    /// 初始横幅结束，后续输出应按进度解释
    Ready,
    /// 进度更新
    Progress,
}

/// 进度事件
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    /// 任务ID
    pub id: String,
    /// 事件类型: ready | progress
    #[serde(rename = "type")]
    pub kind: ProgressKind,
    /// 完成百分比
    pub percent: f64,
    /// 下载速度
    pub speed: String,
    /// 是否为直播流
    #[serde(rename = "isLive")]
    pub is_live: bool,
}

/// 消息事件（下载器控制台输出的一行）
#[derive(Debug, Clone, Serialize)]
pub struct MessageEvent {
    /// 任务ID
    pub id: String,
    /// 消息内容（已解码、已去除首尾空白）
    pub message: String,
}

/// 进度回调函数
pub type ProgressFn = Arc<dyn Fn(ProgressEvent) + Send + Sync>;
/// 消息回调函数
pub type MessageFn = Arc<dyn Fn(MessageEvent) + Send + Sync>;

/// 下载回调集合，均可为空
#[derive(Clone, Default)]
pub struct DownloadCallbacks {
    pub on_progress: Option<ProgressFn>,
    pub on_message: Option<MessageFn>,
}

/// 构建命令行参数时使用的配置快照
///
/// 由任务队列在锁内复制，传值进入每次下载调用，
/// 运行期间的配置修改只影响之后启动的任务
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// 保存根目录
    pub local_dir: PathBuf,
    /// 下载完成后是否删除分段文件
    pub delete_segments: bool,
    /// 代理地址，空表示不使用
    pub proxy: String,
}

/// 下载错误类型
#[derive(Debug)]
pub enum DownloadError {
    /// Schema 中不存在该下载类型
    UnsupportedType(DownloadType),
    /// 未配置该类型对应的下载器二进制
    BinaryNotFound(DownloadType),
    /// 子进程非零退出，附带最后一条匹配到错误正则的输出行
    ChildExit { code: i32, last_error: Option<String> },
    /// 底层执行器错误（启动失败、IO 错误、取消）
    Runner(RunError),
}

impl DownloadError {
    /// 是否因任务取消而终止
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DownloadError::Runner(RunError::Cancelled))
    }
}

impl fmt::Display for DownloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadError::UnsupportedType(t) => write!(f, "不支持的下载类型: {}", t),
            DownloadError::BinaryNotFound(t) => write!(f, "未找到下载类型 {} 对应的二进制", t),
            DownloadError::ChildExit { code, last_error } => match last_error {
                Some(msg) => write!(f, "下载器进程退出，状态码 {}: {}", code, msg),
                None => write!(f, "下载器进程退出，状态码 {}", code),
            },
            DownloadError::Runner(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for DownloadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DownloadError::Runner(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RunError> for DownloadError {
    fn from(e: RunError) -> Self {
        DownloadError::Runner(e)
    }
}

/// 下载器接口
///
/// 任务队列通过该接口驱动一次完整的下载，实现方负责
/// 参数构建、子进程生命周期与进度事件翻译
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn download(
        &self,
        token: CancellationToken,
        params: DownloadParams,
        options: DownloadOptions,
        callbacks: DownloadCallbacks,
    ) -> Result<(), DownloadError>;
}
