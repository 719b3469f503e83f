// 任务管理接口

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::downloader::{DownloadParams, DownloadType, TaskInfo, TaskStatus};
use crate::server::AppState;

use super::{error, ok};

/// 创建任务请求
#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    /// 任务ID（可选，不提供时自动生成）
    #[serde(default)]
    pub id: String,
    /// 下载类型：m3u8/bilibili/direct
    #[serde(rename = "type")]
    pub download_type: DownloadType,
    /// 下载URL
    pub url: String,
    /// 文件名
    pub name: String,
    /// 子文件夹
    #[serde(default)]
    pub folder: String,
    /// 自定义HTTP头
    #[serde(default)]
    pub headers: Vec<String>,
}

/// 创建任务响应
#[derive(Debug, Serialize)]
pub struct CreateTaskResponse {
    pub id: String,
    pub message: String,
    pub status: TaskStatus,
}

/// 任务列表响应
#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub tasks: Vec<TaskInfo>,
    pub total: usize,
}

/// POST /api/tasks
pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateTaskRequest>,
) -> Response {
    if req.url.trim().is_empty() {
        warn!("任务创建请求缺少 url");
        return error(StatusCode::BAD_REQUEST, "url is required").into_response();
    }
    if req.name.trim().is_empty() {
        warn!("任务创建请求缺少 name");
        return error(StatusCode::BAD_REQUEST, "name is required").into_response();
    }

    let id = if req.id.trim().is_empty() {
        Uuid::new_v4().to_string()
    } else {
        req.id.trim().to_string()
    };

    info!(
        "收到任务创建请求: id={}, type={}, url={}",
        id, req.download_type, req.url
    );

    let params = DownloadParams {
        id: id.clone(),
        download_type: req.download_type,
        url: req.url,
        name: req.name,
        folder: req.folder,
        headers: req.headers,
    };
    let status = state.queue.enqueue(params);

    ok(
        "Task created successfully",
        CreateTaskResponse {
            id,
            message: "Task enqueued successfully".to_string(),
            status,
        },
    )
    .into_response()
}

/// GET /api/tasks
pub async fn list(State(state): State<AppState>) -> Response {
    let tasks = state.queue.get_all_tasks();
    debug!("查询全部任务: count={}", tasks.len());
    let total = tasks.len();
    ok("OK", TaskListResponse { tasks, total }).into_response()
}

/// GET /api/tasks/:id
pub async fn get(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.queue.get_task(&id) {
        Some(task) => ok("OK", task).into_response(),
        None => {
            warn!("查询的任务不存在: id={}", id);
            error(StatusCode::NOT_FOUND, "task not found").into_response()
        }
    }
}

/// POST /api/tasks/:id/stop
pub async fn stop(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    info!("收到停止任务请求: id={}", id);
    match state.queue.stop(&id) {
        Ok(()) => ok("Task stopped", json!({ "message": "Task stopped" })).into_response(),
        Err(e) => {
            warn!("停止任务失败: id={}, error={}", id, e);
            error(StatusCode::NOT_FOUND, e.to_string()).into_response()
        }
    }
}

/// GET /api/tasks/:id/log
pub async fn log(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.logs.read(&id) {
        Ok(content) => ok("OK", json!({ "id": id, "log": content })).into_response(),
        Err(_) => error(StatusCode::NOT_FOUND, "task log not found").into_response(),
    }
}
