//! 伪终端执行器
//!
//! 子进程挂在 80x24 的伪终端下运行，使进度条类输出
//! （`\r` 原地刷新、`\b` 退格）得以保留。POSIX 走 pty 对，
//! Windows 走 ConPTY；伪终端分配失败时降级为管道执行器。

use async_trait::async_trait;
use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use std::io::Read;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{LineFramer, OnLine, PipeRunner, RunError, Runner};

const PTY_ROWS: u16 = 24;
const PTY_COLS: u16 = 80;

/// 挂断后等待子进程退出的宽限时间，超时强杀
const KILL_GRACE: Duration = Duration::from_secs(3);

/// 基于伪终端的命令执行器
#[derive(Debug, Default)]
pub struct PtyRunner {
    fallback: PipeRunner,
}

impl PtyRunner {
    pub fn new() -> Self {
        Self {
            fallback: PipeRunner::new(),
        }
    }
}

/// 阻塞读取伪终端输出并逐行回调
///
/// 子进程退出后 master 端读取会返回错误（Linux 为 EIO），
/// 属于正常结束路径
fn read_pty_output(mut reader: Box<dyn Read + Send>, on_line: OnLine) {
    let mut framer = LineFramer::new();
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                for line in framer.feed(&buf[..n]) {
                    if !line.is_empty() {
                        on_line(&line);
                    }
                }
            }
            Err(e) => {
                debug!("伪终端读取结束: {}", e);
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
impl Runner for PtyRunner {
    async fn run(
        &self,
        token: CancellationToken,
        bin_path: &str,
        args: &[String],
        on_line: OnLine,
    ) -> Result<(), RunError> {
        let pty_system = native_pty_system();
        let pair = match pty_system.openpty(PtySize {
            rows: PTY_ROWS,
            cols: PTY_COLS,
            pixel_width: 0,
            pixel_height: 0,
        }) {
            Ok(pair) => pair,
            Err(e) => {
                // 伪终端不可用（权限、系统版本等），降级为管道
                warn!("伪终端分配失败，降级为管道执行: {}", e);
                return self.fallback.run(token, bin_path, args, on_line).await;
            }
        };

        let mut cmd = CommandBuilder::new(bin_path);
        cmd.args(args);

        let mut child = pair.slave.spawn_command(cmd).map_err(|e| {
            RunError::Spawn(std::io::Error::new(
                std::io::ErrorKind::Other,
                e.to_string(),
            ))
        })?;
        // 子进程已持有 slave 端，父进程侧立即关闭
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| RunError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        let master = pair.master;

        let mut killer = child.clone_killer();

        let reader_line = on_line.clone();
        let reader_task = tokio::task::spawn_blocking(move || read_pty_output(reader, reader_line));
        let mut wait_task = tokio::task::spawn_blocking(move || child.wait());

        tokio::select! {
            _ = token.cancelled() => {
                debug!("收到取消信号，关闭伪终端");
                // 关闭 master 端向子进程发送挂断，宽限期内未退出则强杀
                drop(master);
                if tokio::time::timeout(KILL_GRACE, &mut wait_task).await.is_err() {
                    warn!("子进程忽略挂断信号，强制终止");
                    if let Err(e) = killer.kill() {
                        warn!("强制终止子进程失败: {}", e);
                    }
                    let _ = wait_task.await;
                }
                let _ = reader_task.await;
                Err(RunError::Cancelled)
            }
            status = &mut wait_task => {
                drop(master);
                let _ = reader_task.await;
                let status = status
                    .map_err(|e| RunError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?
                    .map_err(RunError::Io)?;
                if status.success() {
                    Ok(())
                } else {
                    Err(RunError::Exit { code: status.exit_code() as i32 })
                }
            }
        }
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn collector() -> (OnLine, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        let on_line: OnLine = Arc::new(move |line: &str| {
            sink.lock().unwrap().push(line.to_string());
        });
        (on_line, lines)
    }

    #[tokio::test]
    async fn test_pty_runner_captures_output() {
        let (on_line, lines) = collector();
        let runner = PtyRunner::new();
        let args = vec!["-c".to_string(), "echo pty-check".to_string()];
        runner
            .run(CancellationToken::new(), "/bin/sh", &args, on_line)
            .await
            .unwrap();
        let got = lines.lock().unwrap();
        assert!(got.iter().any(|l| l.contains("pty-check")));
    }

    #[tokio::test]
    async fn test_pty_runner_nonzero_exit() {
        let (on_line, _lines) = collector();
        let runner = PtyRunner::new();
        let args = vec!["-c".to_string(), "exit 7".to_string()];
        let err = runner
            .run(CancellationToken::new(), "/bin/sh", &args, on_line)
            .await
            .unwrap_err();
        match err {
            RunError::Exit { code } => assert_eq!(code, 7),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_pty_runner_cancellation_bounded() {
        let (on_line, _lines) = collector();
        let runner = PtyRunner::new();
        let token = CancellationToken::new();
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });
        let args = vec!["-c".to_string(), "sleep 30".to_string()];
        let started = std::time::Instant::now();
        let err = runner
            .run(token, "/bin/sh", &args, on_line)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
