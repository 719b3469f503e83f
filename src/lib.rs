// Media Downloader Rust Service
// 多任务媒体下载调度服务核心库

// 配置管理模块
pub mod config;

// 下载调度模块
pub mod downloader;

// 日志系统模块
pub mod logging;

// 控制台输出解析模块
pub mod parser;

// 任务队列模块
pub mod queue;

// 命令执行器模块
pub mod runner;

// Schema 注册表模块
pub mod schema;

// Web服务器模块
pub mod server;

// 任务日志模块
pub mod tasklog;

// 导出常用类型
pub use config::AppConfig;
pub use downloader::{
    DownloadDispatcher, DownloadError, DownloadParams, DownloadType, Downloader, MessageEvent,
    ProgressEvent, TaskInfo, TaskStatus,
};
pub use queue::{QueueConfig, QueueError, QueueObserver, TaskQueue};
pub use runner::{PipeRunner, PtyRunner, RunError, Runner};
pub use schema::SchemaRepository;
pub use server::AppState;
