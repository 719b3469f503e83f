//! 下载 Schema 注册表
//!
//! 把每种下载类型绑定到命令行参数模板与控制台解析正则。
//! 启动时从 JSON 一次性加载，所有正则急切编译，任何一条
//! 非法即整体加载失败；加载完成后只读，并发读取无需同步。

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use crate::downloader::DownloadType;

/// name 参数的后缀占位符，表示按 URL 自动推断扩展名
pub const AUTO_POSTFIX: &str = "@@AUTO@@";

/// 单个逻辑参数的规格
#[derive(Debug, Clone, Deserialize)]
pub struct ArgSpec {
    /// 命令行参数名列表，按声明顺序展开
    #[serde(rename = "argsName", default)]
    pub args_name: Vec<String>,
    /// 文件名后缀（@@AUTO@@ 表示自动推断扩展名）
    #[serde(default)]
    pub postfix: String,
}

/// 控制台解析正则（原始字符串形式）
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConsoleRules {
    /// 进度百分比，捕获组 1 为数值
    #[serde(default)]
    pub percent: String,
    /// 下载速度，捕获组 1 为速度串
    #[serde(default)]
    pub speed: String,
    /// 错误标识
    #[serde(default)]
    pub error: String,
    /// 开始下载标识
    #[serde(default)]
    pub start: String,
    /// 直播流标识
    #[serde(rename = "isLive", default)]
    pub is_live: String,
}

/// 编译完成的控制台解析正则
///
/// 字段相互独立可选，缺失表示对应信号永不提取
#[derive(Debug, Clone, Default)]
pub struct ConsoleRegexes {
    pub percent: Option<Regex>,
    pub speed: Option<Regex>,
    pub error: Option<Regex>,
    pub start: Option<Regex>,
    pub is_live: Option<Regex>,
}

impl ConsoleRules {
    /// 急切编译所有非空字段，任一失败即返回错误
    pub fn compile(&self) -> Result<ConsoleRegexes> {
        fn compile_one(pattern: &str, field: &str) -> Result<Option<Regex>> {
            if pattern.is_empty() {
                return Ok(None);
            }
            let re = Regex::new(pattern)
                .with_context(|| format!("编译 {} 正则失败: {}", field, pattern))?;
            Ok(Some(re))
        }

        Ok(ConsoleRegexes {
            percent: compile_one(&self.percent, "percent")?,
            speed: compile_one(&self.speed, "speed")?,
            error: compile_one(&self.error, "error")?,
            start: compile_one(&self.start, "start")?,
            is_live: compile_one(&self.is_live, "isLive")?,
        })
    }
}

/// 单个下载类型的 Schema
#[derive(Debug, Clone)]
pub struct Schema {
    /// 下载类型
    pub download_type: DownloadType,
    /// 逻辑参数名到参数规格的映射，键的迭代顺序不保证
    pub args: HashMap<String, ArgSpec>,
    /// 编译完成的控制台解析正则
    pub console: ConsoleRegexes,
}

#[derive(Debug, Deserialize)]
struct SchemaSpec {
    #[serde(rename = "type")]
    download_type: DownloadType,
    #[serde(default)]
    args: HashMap<String, ArgSpec>,
    #[serde(rename = "consoleReg", default)]
    console_reg: ConsoleRules,
}

#[derive(Debug, Deserialize)]
struct SchemaFile {
    schemas: Vec<SchemaSpec>,
}

/// Schema 注册表，加载后只读
#[derive(Debug, Default)]
pub struct SchemaRepository {
    schemas: HashMap<DownloadType, Schema>,
}

impl SchemaRepository {
    /// 从 JSON 文件加载全部 Schema
    ///
    /// 全有或全无：任何一条正则编译失败都会使整体加载失败，
    /// 不会暴露部分加载的注册表
    pub fn load_from_json(path: &Path) -> Result<Self> {
        debug!("从文件加载 schema: {:?}", path);

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("读取 schema 文件失败: {:?}", path))?;
        let file: SchemaFile =
            serde_json::from_str(&raw).with_context(|| format!("解析 schema JSON 失败: {:?}", path))?;

        let repo = Self::from_specs(file.schemas)?;
        info!("schema 加载完成: path={:?}, count={}", path, repo.len());
        Ok(repo)
    }

    /// 由已编译的 Schema 直接构建注册表（嵌入方使用）
    pub fn from_schemas(schemas: Vec<Schema>) -> Self {
        Self {
            schemas: schemas
                .into_iter()
                .map(|s| (s.download_type, s))
                .collect(),
        }
    }

    fn from_specs(specs: Vec<SchemaSpec>) -> Result<Self> {
        let mut schemas = HashMap::new();
        for spec in specs {
            let console = spec
                .console_reg
                .compile()
                .with_context(|| format!("下载类型 {} 的控制台正则非法", spec.download_type))?;
            schemas.insert(
                spec.download_type,
                Schema {
                    download_type: spec.download_type,
                    args: spec.args,
                    console,
                },
            );
        }
        Ok(Self { schemas })
    }

    /// 按下载类型查找 Schema
    pub fn get_by_type(&self, download_type: DownloadType) -> Option<&Schema> {
        self.schemas.get(&download_type)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "schemas": [
            {
                "type": "m3u8",
                "args": {
                    "url": { "argsName": ["-u"] },
                    "name": { "argsName": ["-n"], "postfix": "@@AUTO@@" },
                    "__common__": { "argsName": ["--quiet"] }
                },
                "consoleReg": {
                    "percent": "([\\d.]+)%",
                    "speed": "([\\d.]+MBps)"
                }
            },
            {
                "type": "direct",
                "args": {
                    "url": { "argsName": [] }
                },
                "consoleReg": {}
            }
        ]
    }"#;

    fn write_temp(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_load_and_lookup() {
        let f = write_temp(SAMPLE);
        let repo = SchemaRepository::load_from_json(f.path()).unwrap();
        assert_eq!(repo.len(), 2);

        let schema = repo.get_by_type(DownloadType::M3u8).unwrap();
        assert_eq!(schema.args["url"].args_name, vec!["-u"]);
        assert_eq!(schema.args["name"].postfix, AUTO_POSTFIX);
        assert!(schema.console.percent.is_some());
        assert!(schema.console.error.is_none());

        assert!(repo.get_by_type(DownloadType::Bilibili).is_none());
    }

    #[test]
    fn test_absent_regex_fields_stay_none() {
        let f = write_temp(SAMPLE);
        let repo = SchemaRepository::load_from_json(f.path()).unwrap();
        let schema = repo.get_by_type(DownloadType::Direct).unwrap();
        assert!(schema.console.percent.is_none());
        assert!(schema.console.speed.is_none());
        assert!(schema.console.start.is_none());
    }

    #[test]
    fn test_bad_regex_fails_whole_load() {
        let bad = r#"{
            "schemas": [
                { "type": "m3u8", "args": {}, "consoleReg": { "percent": "([\\d.]+)%" } },
                { "type": "direct", "args": {}, "consoleReg": { "percent": "([unclosed" } }
            ]
        }"#;
        let f = write_temp(bad);
        // 单条正则非法导致整体失败，不暴露部分结果
        assert!(SchemaRepository::load_from_json(f.path()).is_err());
    }

    #[test]
    fn test_missing_file_fails() {
        assert!(SchemaRepository::load_from_json(Path::new("/nonexistent/schemas.json")).is_err());
    }

    #[test]
    fn test_invalid_json_fails() {
        let f = write_temp("not json at all");
        assert!(SchemaRepository::load_from_json(f.path()).is_err());
    }
}
