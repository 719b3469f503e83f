// SSE 事件流接口

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::server::AppState;

/// GET /api/events
///
/// 把事件总线桥接为 SSE 流。落后于广播通道容量的客户端
/// 丢弃旧事件继续接收，通道关闭时结束流
pub async fn stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.hub.subscribe();
    info!("SSE 客户端接入: subscribers={}", state.hub.subscriber_count());

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => match Event::default().event(event.name.clone()).json_data(&event.data) {
                    Ok(sse_event) => return Some((Ok::<_, Infallible>(sse_event), rx)),
                    Err(e) => {
                        debug!("SSE 事件序列化失败: {}", e);
                        continue;
                    }
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("SSE 客户端滞后，丢弃 {} 条事件", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
