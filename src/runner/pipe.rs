//! 管道执行器
//!
//! 伪终端不可用时的降级方案，同时也是 PTY 执行器的回退路径。
//! stdout 与 stderr 并发读取并按到达顺序逐行回调，两条流
//! 之间不保证严格顺序。

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{LineFramer, OnLine, RunError, Runner};

/// 取消后等待子进程退出的宽限时间
const KILL_GRACE: Duration = Duration::from_secs(3);

/// 基于 stdout/stderr 管道的命令执行器
#[derive(Debug, Default)]
pub struct PipeRunner;

impl PipeRunner {
    pub fn new() -> Self {
        Self
    }
}

/// 持续读取单条流并逐行回调，EOF 或读错误时结束
async fn read_stream<R: AsyncRead + Unpin>(mut stream: R, on_line: OnLine) {
    let mut framer = LineFramer::new();
    let mut buf = [0u8; 4096];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                for line in framer.feed(&buf[..n]) {
                    if !line.is_empty() {
                        on_line(&line);
                    }
                }
            }
            Err(e) => {
                debug!("读取子进程输出结束: {}", e);
                break;
            }
        }
    }
    if let Some(last) = framer.finish() {
        if !last.is_empty() {
            on_line(&last);
        }
    }
}

#[async_trait]
impl Runner for PipeRunner {
    async fn run(
        &self,
        token: CancellationToken,
        bin_path: &str,
        args: &[String],
        on_line: OnLine,
    ) -> Result<(), RunError> {
        let mut child = Command::new(bin_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(RunError::Spawn)?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let mut readers = Vec::new();
        if let Some(out) = stdout {
            readers.push(tokio::spawn(read_stream(out, on_line.clone())));
        }
        if let Some(err) = stderr {
            readers.push(tokio::spawn(read_stream(err, on_line.clone())));
        }

        tokio::select! {
            _ = token.cancelled() => {
                debug!("收到取消信号，终止子进程");
                if let Err(e) = child.start_kill() {
                    warn!("终止子进程失败: {}", e);
                }
                if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_err() {
                    warn!("子进程在宽限期内未退出");
                }
                for r in readers {
                    let _ = r.await;
                }
                Err(RunError::Cancelled)
            }
            status = child.wait() => {
                // 子进程已退出，读协程在 EOF 后自行结束
                for r in readers {
                    let _ = r.await;
                }
                let status = status.map_err(RunError::Io)?;
                if status.success() {
                    Ok(())
                } else {
                    Err(RunError::Exit { code: status.code().unwrap_or(-1) })
                }
            }
        }
    }
}
