// API处理器模块

pub mod config;
pub mod event;
pub mod health;
pub mod task;

use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

/// 统一响应包装
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

/// 200 成功响应
pub fn ok<T: Serialize>(message: &str, data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        code: StatusCode::OK.as_u16(),
        message: message.to_string(),
        data: Some(data),
    })
}

/// 错误响应
pub fn error(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<ApiResponse<()>>) {
    (
        status,
        Json(ApiResponse {
            success: false,
            code: status.as_u16(),
            message: message.into(),
            data: None,
        }),
    )
}
