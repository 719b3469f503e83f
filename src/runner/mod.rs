//! 命令执行器
//!
//! 负责拉起下载器子进程并把控制台输出逐行回调给上层。
//! 首选伪终端方式运行（进度条类输出依赖终端环境），
//! 伪终端不可用时降级为普通管道。

pub mod frame;
pub mod pipe;
pub mod pty;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub use frame::{decode_console_bytes, LineFramer};
pub use pipe::PipeRunner;
pub use pty::PtyRunner;

/// 逐行回调函数
///
/// 从执行器的读取线程同步调用，实现方不得阻塞
pub type OnLine = Arc<dyn Fn(&str) + Send + Sync>;

/// 执行器错误类型
#[derive(Debug)]
pub enum RunError {
    /// 子进程启动失败（二进制缺失、权限不足等）
    Spawn(std::io::Error),
    /// 读取子进程输出或等待退出时发生 IO 错误
    Io(std::io::Error),
    /// 子进程以非零状态码退出
    Exit { code: i32 },
    /// 任务被取消
    Cancelled,
}

impl RunError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunError::Cancelled)
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::Spawn(e) => write!(f, "子进程启动失败: {}", e),
            RunError::Io(e) => write!(f, "子进程 IO 错误: {}", e),
            RunError::Exit { code } => write!(f, "子进程退出，状态码 {}", code),
            RunError::Cancelled => write!(f, "任务已取消"),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunError::Spawn(e) | RunError::Io(e) => Some(e),
            _ => None,
        }
    }
}

/// 命令执行器接口
///
/// `run` 在子进程退出（或被取消）后返回；取消时必须先完成
/// 子进程清理再返回 `RunError::Cancelled`
#[async_trait]
pub trait Runner: Send + Sync {
    async fn run(
        &self,
        token: CancellationToken,
        bin_path: &str,
        args: &[String],
        on_line: OnLine,
    ) -> Result<(), RunError>;
}
