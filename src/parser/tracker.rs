//! 进度上报节流
//!
//! 按任务维度限制 progress 事件的上报频率，避免高频刷新的
//! 进度条把回调链打满。ready、错误与原始消息事件不做节流。

use dashmap::DashMap;
use std::time::{Duration, Instant};

/// 节流窗口
const THROTTLE_WINDOW: Duration = Duration::from_millis(200);
/// 触发立即上报的进度变化阈值（百分点）
const PERCENT_DELTA: f64 = 0.5;

/// 单任务的上次上报记录
#[derive(Debug)]
struct ProgressRecord {
    last_percent: f64,
    last_speed: String,
    last_update: Instant,
}

/// 进度节流器
///
/// 抑制条件：距上次上报不足 200ms，且进度变化不足 0.5 个
/// 百分点，且速度串未变。任一条件不满足即放行；
/// 任务的首次上报总是放行
#[derive(Debug, Default)]
pub struct ProgressTracker {
    records: DashMap<String, ProgressRecord>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 判断是否应当上报本次进度
    pub fn should_update(&self, id: &str, percent: f64, speed: &str) -> bool {
        match self.records.get(id) {
            None => true,
            Some(rec) => {
                rec.last_update.elapsed() >= THROTTLE_WINDOW
                    || (percent - rec.last_percent).abs() >= PERCENT_DELTA
                    || speed != rec.last_speed
            }
        }
    }

    /// 记录一次已上报的进度
    pub fn update(&self, id: &str, percent: f64, speed: &str) {
        self.records.insert(
            id.to_string(),
            ProgressRecord {
                last_percent: percent,
                last_speed: speed.to_string(),
                last_update: Instant::now(),
            },
        );
    }

    /// 任务结束时移除其记录
    pub fn remove(&self, id: &str) {
        self.records.remove(id);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_first_report_always_passes() {
        let tracker = ProgressTracker::new();
        assert!(tracker.should_update("a", 0.1, ""));
    }

    #[test]
    fn test_small_delta_suppressed_in_window() {
        let tracker = ProgressTracker::new();
        tracker.update("a", 1.0, "1MB/s");
        assert!(!tracker.should_update("a", 1.1, "1MB/s"));
        assert!(!tracker.should_update("a", 1.4, "1MB/s"));
    }

    #[test]
    fn test_half_percent_delta_overrides_window() {
        let tracker = ProgressTracker::new();
        tracker.update("a", 1.0, "1MB/s");
        // 窗口内但进度跨过 0.5 个百分点
        assert!(tracker.should_update("a", 2.0, "1MB/s"));
        assert!(tracker.should_update("a", 1.5, "1MB/s"));
        assert!(tracker.should_update("a", 0.5, "1MB/s"));
    }

    #[test]
    fn test_speed_change_overrides_window() {
        let tracker = ProgressTracker::new();
        tracker.update("a", 1.0, "1MB/s");
        assert!(tracker.should_update("a", 1.0, "2MB/s"));
    }

    #[test]
    fn test_elapsed_window_admits() {
        let tracker = ProgressTracker::new();
        tracker.update("a", 1.0, "1MB/s");
        thread::sleep(Duration::from_millis(210));
        assert!(tracker.should_update("a", 1.0, "1MB/s"));
    }

    #[test]
    fn test_burst_sequence_admits_exactly_twice() {
        // 50ms 内进度 [1.0, 1.1, 1.2, 1.3, 1.4, 2.0]，速度不变：
        // 放行首次与跨过 0.5 阈值的那次
        let tracker = ProgressTracker::new();
        let mut admitted = 0;
        for percent in [1.0, 1.1, 1.2, 1.3, 1.4, 2.0] {
            if tracker.should_update("a", percent, "1MB/s") {
                admitted += 1;
                tracker.update("a", percent, "1MB/s");
            }
        }
        assert_eq!(admitted, 2);
    }

    #[test]
    fn test_tasks_throttled_independently() {
        let tracker = ProgressTracker::new();
        tracker.update("a", 1.0, "1MB/s");
        assert!(tracker.should_update("b", 1.1, "1MB/s"));
    }

    #[test]
    fn test_remove_evicts_record() {
        let tracker = ProgressTracker::new();
        tracker.update("a", 50.0, "1MB/s");
        tracker.remove("a");
        assert_eq!(tracker.len(), 0);
        // 移除后视为首次上报
        assert!(tracker.should_update("a", 50.0, "1MB/s"));
    }
}
