// 配置管理模块

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::downloader::DownloadType;
use crate::queue::QueueConfig;

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config/app.toml";

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 服务器配置
    pub server: ServerConfig,
    /// 日志配置
    pub log: LogConfig,
    /// 队列配置
    pub queue: QueueSettings,
    /// 下载器二进制路径
    pub binaries: BinariesConfig,
    /// 下载 schema 文件路径
    pub schema_path: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            log: LogConfig::default(),
            queue: QueueSettings::default(),
            binaries: BinariesConfig::default(),
            schema_path: PathBuf::from("configs/download_schemas.json"),
        }
    }
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 监听地址
    pub host: String,
    /// 监听端口
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    /// 组合监听地址，HOST/PORT 环境变量优先
    pub fn listen_addr(&self) -> String {
        let host = env_or("HOST", &self.host);
        let port = env_or("PORT", &self.port.to_string());
        format!("{}:{}", host, port)
    }
}

fn env_or(key: &str, fallback: &str) -> String {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => fallback.to_string(),
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// 是否写入文件
    pub enabled: bool,
    /// 日志级别
    pub level: String,
    /// 日志目录
    pub log_dir: PathBuf,
    /// 任务日志目录
    pub task_log_dir: PathBuf,
    /// 保留天数
    pub retention_days: u32,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            log_dir: PathBuf::from("logs"),
            task_log_dir: PathBuf::from("logs/tasks"),
            retention_days: 7,
        }
    }
}

/// 队列配置输入
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// 最大并发任务数
    pub max_runner: usize,
    /// 保存根目录
    pub local_dir: PathBuf,
    /// 下载完成后是否删除分段文件
    pub delete_segments: bool,
    /// 全局代理
    pub proxy: String,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_runner: 2,
            local_dir: PathBuf::from("./downloads"),
            delete_segments: false,
            proxy: String::new(),
        }
    }
}

impl QueueSettings {
    pub fn to_queue_config(&self) -> QueueConfig {
        QueueConfig {
            max_runner: self.max_runner.max(1),
            local_dir: self.local_dir.clone(),
            delete_segments: self.delete_segments,
            proxy: self.proxy.clone(),
        }
    }
}

/// 下载器二进制路径配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BinariesConfig {
    pub m3u8: PathBuf,
    pub bilibili: PathBuf,
    pub direct: PathBuf,
}

impl Default for BinariesConfig {
    fn default() -> Self {
        Self {
            m3u8: PathBuf::from("/usr/local/bin/N_m3u8DL-RE"),
            bilibili: PathBuf::from("/usr/local/bin/BBDown"),
            direct: PathBuf::from("/usr/local/bin/aria2c"),
        }
    }
}

impl BinariesConfig {
    pub fn to_map(&self) -> HashMap<DownloadType, PathBuf> {
        let mut map = HashMap::new();
        map.insert(DownloadType::M3u8, self.m3u8.clone());
        map.insert(DownloadType::Bilibili, self.bilibili.clone());
        map.insert(DownloadType::Direct, self.direct.clone());
        map
    }
}

impl AppConfig {
    /// 从 TOML 文件加载配置，文件不存在时使用默认值
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("配置文件不存在，使用默认配置: {:?}", path);
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败: {:?}", path))?;
        let config: AppConfig =
            toml::from_str(&raw).with_context(|| format!("解析配置文件失败: {:?}", path))?;
        info!("配置加载完成: {:?}", path);
        Ok(config)
    }
}
