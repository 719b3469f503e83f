use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use media_downloader_rust::config::{AppConfig, DEFAULT_CONFIG_PATH};
use media_downloader_rust::downloader::DownloadDispatcher;
use media_downloader_rust::logging;
use media_downloader_rust::queue::TaskQueue;
use media_downloader_rust::runner::PtyRunner;
use media_downloader_rust::schema::SchemaRepository;
use media_downloader_rust::server::{self, events::EventHub, AppState};
use media_downloader_rust::tasklog::TaskLogManager;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load(Path::new(DEFAULT_CONFIG_PATH)).context("加载应用配置失败")?;
    let _log_guard = logging::init_logging(&config.log);

    info!("🚀 媒体下载调度服务启动中...");

    let schemas = Arc::new(
        SchemaRepository::load_from_json(&config.schema_path).context("加载下载 schema 失败")?,
    );
    info!("已加载 {} 个下载 schema", schemas.len());

    let binaries = config.binaries.to_map();
    for (download_type, path) in &binaries {
        info!("{} 下载器: {:?}", download_type, path);
    }

    let runner = Arc::new(PtyRunner::new());
    let dispatcher = Arc::new(DownloadDispatcher::new(binaries, runner, schemas));
    let queue = TaskQueue::new(dispatcher, config.queue.to_queue_config());

    let hub = Arc::new(EventHub::new());
    let logs = Arc::new(TaskLogManager::new(config.log.task_log_dir.clone()));
    let state = AppState::new(queue, hub, logs);

    let addr = config.server.listen_addr();
    info!("API 接口:");
    info!("  GET  /healthy            - 健康检查");
    info!("  POST /api/tasks          - 创建下载任务");
    info!("  GET  /api/tasks          - 查询全部任务");
    info!("  GET  /api/tasks/:id      - 查询任务状态");
    info!("  POST /api/tasks/:id/stop - 停止任务");
    info!("  GET  /api/tasks/:id/log  - 查询任务日志");
    info!("  POST /api/config         - 更新配置");
    info!("  GET  /api/events         - SSE 事件流（仅状态变化）");

    server::run(&addr, state).await
}
