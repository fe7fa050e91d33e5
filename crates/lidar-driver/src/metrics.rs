//! 性能计数器模块
//!
//! 独立于状态寄存器的一把锁，记录长期累计值：各错误标志的触发次数、
//! 队列最高水位、恢复动作次数、帧率与自适应超时。

use lidar_protocol::ErrorFlag;
use parking_lot::Mutex;

/// 性能计数器快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PerfSnapshot {
    /// 队列历史最高占用
    pub max_buffer_utilization: usize,
    /// 各错误标志 0→1 次数，按位序索引
    pub flag_raise_counts: [u32; 8],
    /// 执行过的恢复动作次数
    pub recovery_actions: u32,
    /// 最近一个统计窗口的帧率
    pub frames_per_second: u32,
    /// 当前帧超时（微秒）
    pub adaptive_timeout_us: u64,
    pub checksum_failures: u64,
    pub range_failures: u64,
    pub frame_timeouts: u64,
    pub sync_failures: u64,
    pub health_probes: u64,
}

impl PerfSnapshot {
    pub fn flag_count(&self, flag: ErrorFlag) -> u32 {
        self.flag_raise_counts[flag.bit()]
    }
}

/// 锁保护的性能计数器
#[derive(Debug, Default)]
pub struct PerfCounters {
    inner: Mutex<PerfSnapshot>,
}

impl PerfCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> PerfSnapshot {
        *self.inner.lock()
    }

    /// 重置所有计数器
    pub fn reset(&self) {
        *self.inner.lock() = PerfSnapshot::default();
    }

    pub fn record_flag_raised(&self, flag: ErrorFlag) {
        let mut m = self.inner.lock();
        m.flag_raise_counts[flag.bit()] = m.flag_raise_counts[flag.bit()].wrapping_add(1);
    }

    pub fn record_buffer_level(&self, len: usize) {
        let mut m = self.inner.lock();
        if len > m.max_buffer_utilization {
            m.max_buffer_utilization = len;
        }
    }

    pub fn record_recovery_action(&self) {
        self.inner.lock().recovery_actions += 1;
    }

    pub fn record_rate(&self, frames_per_second: u32, adaptive_timeout_us: u64) {
        let mut m = self.inner.lock();
        m.frames_per_second = frames_per_second;
        m.adaptive_timeout_us = adaptive_timeout_us;
    }

    pub fn record_checksum_failure(&self) {
        self.inner.lock().checksum_failures += 1;
    }

    pub fn record_range_failure(&self) {
        self.inner.lock().range_failures += 1;
    }

    pub fn record_frame_timeout(&self) {
        self.inner.lock().frame_timeouts += 1;
    }

    pub fn record_sync_failures(&self, count: u64) {
        self.inner.lock().sync_failures += count;
    }

    pub fn record_health_probe(&self) {
        self.inner.lock().health_probes += 1;
    }
}
