// 配置管理接口

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

use crate::server::AppState;

use super::ok;

/// 配置更新请求，字段均可选，只更新出现的字段
#[derive(Debug, Deserialize)]
pub struct UpdateConfigRequest {
    /// 最大并发任务数
    #[serde(rename = "maxRunner")]
    pub max_runner: Option<usize>,
    /// 保存根目录
    #[serde(rename = "localDir")]
    pub local_dir: Option<PathBuf>,
    /// 是否删除分段文件
    #[serde(rename = "deleteSegments")]
    pub delete_segments: Option<bool>,
    /// 全局代理，空串表示禁用
    pub proxy: Option<String>,
}

/// POST /api/config
pub async fn update(
    State(state): State<AppState>,
    Json(req): Json<UpdateConfigRequest>,
) -> Response {
    if let Some(n) = req.max_runner {
        if n > 0 {
            state.queue.set_max_runner(n);
            info!("最大并发数已更新: maxRunner={}", n);
        }
    }
    if let Some(dir) = req.local_dir {
        info!("保存目录已更新: localDir={:?}", dir);
        state.queue.set_local_dir(dir);
    }
    if let Some(value) = req.delete_segments {
        info!("删除分段开关已更新: deleteSegments={}", value);
        state.queue.set_delete_segments(value);
    }
    if let Some(proxy) = req.proxy {
        info!("代理已更新: proxy={}", proxy);
        state.queue.set_proxy(proxy);
    }

    ok("Config updated", json!({ "message": "Config updated" })).into_response()
}

/// GET /api/config
pub async fn get(State(state): State<AppState>) -> Response {
    ok("OK", state.queue.config()).into_response()
}
