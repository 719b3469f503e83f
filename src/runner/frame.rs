//! 行分帧与编码处理
//!
//! 子进程用 `\r` 原地刷新进度条，每次刷新视为独立的一行；
//! `\n`、`\r\n`、单独 `\r` 均作为行终止符。

use encoding_rs::{GB18030, GBK};

/// 增量行分帧器
///
/// 跨 read 调用维护未完结的行缓冲，`\r\n` 组合可能被拆到
/// 两次 read 中，用 `pending_cr` 标记吞掉后到的 `\n`
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: Vec<u8>,
    pending_cr: bool,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 喂入一段原始字节，返回其中完结的行（已解码）
    pub fn feed(&mut self, data: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in data {
            if self.pending_cr {
                self.pending_cr = false;
                if b == b'\n' {
                    continue;
                }
            }
            match b {
                b'\n' => {
                    lines.push(decode_console_bytes(&self.buf));
                    self.buf.clear();
                }
                b'\r' => {
                    lines.push(decode_console_bytes(&self.buf));
                    self.buf.clear();
                    self.pending_cr = true;
                }
                _ => self.buf.push(b),
            }
        }
        lines
    }

    /// 输出缓冲中残余的最后一行（EOF 时调用）
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let line = decode_console_bytes(&self.buf);
        self.buf.clear();
        Some(line)
    }
}

/// 把一行控制台字节解码为字符串
///
/// 优先按 UTF-8 处理；失败时依次尝试 GB18030、GBK
/// （Windows 下的下载器常输出本地代码页）；全部失败则
/// 按有损 UTF-8 兜底，不剥离 BOM
pub fn decode_console_bytes(bytes: &[u8]) -> String {
    if let Ok(s) = std::str::from_utf8(bytes) {
        return s.to_string();
    }
    let (decoded, _, had_errors) = GB18030.decode(bytes);
    if !had_errors {
        return decoded.into_owned();
    }
    let (decoded, _, had_errors) = GBK.decode(bytes);
    if !had_errors {
        return decoded.into_owned();
    }
    String::from_utf8_lossy(bytes).into_owned()
}
