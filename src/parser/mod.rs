//! 控制台输出解析
//!
//! 用 schema 中配置的正则逐行提取进度、速度、错误与直播标识。
//! 解析器本身无状态，跨行状态由调用方持有的 [`ParseState`] 承载。

pub mod tracker;

pub use tracker::ProgressTracker;

use crate::schema::ConsoleRegexes;

/// 单任务解析状态，随一次下载运行存活
#[derive(Debug, Default)]
pub struct ParseState {
    /// 初始横幅是否已结束
    pub ready: bool,
    /// 当前进度百分比
    pub percent: f64,
    /// 当前下载速度
    pub speed: String,
    /// 是否为直播流（一旦置位不再清除）
    pub is_live: bool,
}

/// 单行解析结果
#[derive(Debug, PartialEq, Eq)]
pub enum LineOutcome {
    /// 行匹配了错误正则，内容即错误描述，解析状态未改动
    Error(String),
    /// 首次出现开始标识或进度信号，调用方应将状态置为 ready
    Ready,
    /// 无事件（percent/speed 可能已在状态中更新）
    None,
}

/// 处理行内退格符，还原终端上实际显示的字符串
///
/// 每个 `\b` 删除前一个可见字符
pub fn resolve_backspaces(line: &str) -> String {
    let mut result: Vec<char> = Vec::with_capacity(line.len());
    for ch in line.chars() {
        if ch == '\u{8}' {
            result.pop();
        } else {
            result.push(ch);
        }
    }
    result.into_iter().collect()
}

/// 控制台行解析器
///
/// 持有编译完成的正则集合，可在读取线程上同步调用
#[derive(Debug, Clone)]
pub struct LineParser {
    regs: ConsoleRegexes,
}

impl LineParser {
    pub fn new(regs: ConsoleRegexes) -> Self {
        Self { regs }
    }

    /// 解析一行控制台输出
    ///
    /// 约定：percent 正则的捕获组 1 是数值，speed 正则的
    /// 捕获组 1 是速度串；没有捕获组 1 的匹配不产生更新
    pub fn parse(&self, line: &str, state: &mut ParseState) -> LineOutcome {
        // 错误行优先，整行即错误描述
        if let Some(re) = &self.regs.error {
            if re.is_match(line) {
                return LineOutcome::Error(line.to_string());
            }
        }

        if let Some(re) = &self.regs.is_live {
            if re.is_match(line) {
                state.is_live = true;
            }
        }

        // 开始标识只在未 ready 时检测
        if !state.ready {
            if let Some(re) = &self.regs.start {
                if re.is_match(line) {
                    return LineOutcome::Ready;
                }
            }
        }

        // 正则匹配前先还原退格，让其看到终端上真实呈现的内容
        let rendered = resolve_backspaces(line);

        let mut matched_percent = false;
        if let Some(re) = &self.regs.percent {
            if let Some(caps) = re.captures(&rendered) {
                if let Some(m) = caps.get(1) {
                    if let Ok(value) = m.as_str().parse::<f64>() {
                        state.percent = value;
                        matched_percent = true;
                    }
                }
            }
        }

        let mut matched_speed = false;
        if let Some(re) = &self.regs.speed {
            if let Some(caps) = re.captures(&rendered) {
                if let Some(m) = caps.get(1) {
                    state.speed = m.as_str().trim().to_string();
                    matched_speed = true;
                }
            }
        }

        // 配置了 start 但从未命中时，首个进度信号隐式进入 ready
        if !state.ready && (matched_percent || matched_speed) {
            return LineOutcome::Ready;
        }

        LineOutcome::None
    }
}
