// 健康检查接口

use axum::Json;
use serde_json::{json, Value};

use super::{ok, ApiResponse};

/// GET /healthy
pub async fn healthy() -> Json<ApiResponse<Value>> {
    ok("OK", json!({ "status": "healthy" }))
}
