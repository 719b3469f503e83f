//! 任务日志持久化
//!
//! 每个任务一个日志文件，记录下载器的控制台输出与生命周期
//! 标记，供接口查询。写入由观察者在回调中同步触发，
//! 单行追加，量级很小。

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Mutex;

/// 任务日志管理器
#[derive(Debug)]
pub struct TaskLogManager {
    base_dir: PathBuf,
    lock: Mutex<()>,
}

/// 任务 ID 可能来自外部提交，落盘前替换路径分隔等危险字符
fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl TaskLogManager {
    pub fn new(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            lock: Mutex::new(()),
        }
    }

    fn log_path(&self, task_id: &str) -> PathBuf {
        self.base_dir.join(format!("{}.log", sanitize_id(task_id)))
    }

    fn ensure_dir(&self) -> io::Result<()> {
        fs::create_dir_all(&self.base_dir)
    }

    /// 为指定任务追加一行日志
    pub fn append(&self, task_id: &str, line: &str) -> io::Result<()> {
        let _guard = self.lock.lock().unwrap();
        self.ensure_dir()?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(task_id))?;
        writeln!(file, "{}", line)
    }

    /// 清除指定任务的历史日志（任务重新开始时调用）
    pub fn reset(&self, task_id: &str) -> io::Result<()> {
        let _guard = self.lock.lock().unwrap();
        self.ensure_dir()?;

        match fs::remove_file(self.log_path(task_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// 读取指定任务的完整日志
    pub fn read(&self, task_id: &str) -> io::Result<String> {
        let _guard = self.lock.lock().unwrap();
        fs::read_to_string(self.log_path(task_id))
    }
}
