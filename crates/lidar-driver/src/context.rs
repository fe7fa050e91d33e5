//! 共享上下文
//!
//! 生产者与消费者共享的全部资源：帧队列、状态寄存器、性能计数器、
//! 配置快照、系统模式与触发钩子。
//!
//! 每个资源各自加锁，任何方法都不会同时持有两把锁：
//! 先完成一个资源的修改并释放，再去更新下一个。

use crate::frame::LidarFrame;
use crate::hooks::{HookManager, TriggerEvent};
use crate::metrics::PerfCounters;
use crate::mode::{AtomicSystemMode, SystemMode};
use crate::queue::{PushOutcome, SharedFrameQueue, Watermark};
use crate::status::SharedStatusRegister;
use arc_swap::ArcSwap;
use lidar_protocol::ErrorFlag;
use lidar_tools::{DeviceConfig, RuntimeSettings, SampleRateMode};
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::Ordering;

/// 两个循环共享的上下文
#[derive(Debug)]
pub struct LidarContext {
    pub status: SharedStatusRegister,
    pub metrics: PerfCounters,
    pub queue: SharedFrameQueue,
    /// 当前生效的配置（无锁读取）
    config: ArcSwap<DeviceConfig>,
    mode: AtomicSystemMode,
    pub hooks: RwLock<HookManager>,
}

impl LidarContext {
    /// 队列容量由配置中的采样率模式决定，之后不再改变
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            status: SharedStatusRegister::new(),
            metrics: PerfCounters::new(),
            queue: SharedFrameQueue::for_mode(config.sample_rate),
            config: ArcSwap::from_pointee(config),
            mode: AtomicSystemMode::new(SystemMode::Init),
            hooks: RwLock::new(HookManager::new()),
        }
    }

    /// 设置或清除错误标志；0→1 时累计该标志的触发次数
    pub fn set_flag(&self, flag: ErrorFlag, active: bool) {
        if self.status.set_flag(flag, active) {
            self.metrics.record_flag_raised(flag);
        }
    }

    /// 帧入队
    ///
    /// 成功时更新接收计数、最近帧时间和水位标志；
    /// 失败时累计丢帧并置位 buffer-overflow。
    pub fn enqueue_frame(&self, frame: LidarFrame) -> PushOutcome {
        let outcome = self.queue.push(frame);
        match outcome {
            PushOutcome::Accepted { len } => {
                self.status.update(|s| {
                    s.frames_received = s.frames_received.wrapping_add(1);
                    s.last_frame_ms = frame.timestamp_us / 1_000;
                });
                self.metrics.record_buffer_level(len);
                self.apply_push_watermark(len);
            },
            PushOutcome::Full => {
                self.status
                    .update(|s| s.frames_dropped = s.frames_dropped.wrapping_add(1));
                self.set_flag(ErrorFlag::BufferOverflow, true);
            },
        }
        outcome
    }

    /// 入队后的水位标志
    ///
    /// 标志在队列锁释放后才更新，其间消费者可能已经取走帧并清除了标志。
    /// 只有生产者入队，长度在此期间只会减少，因此按当前长度与入队时长度
    /// 的较小值判定，避免在水位以下重新置位。
    pub(crate) fn apply_push_watermark(&self, len_at_push: usize) {
        let len = len_at_push.min(self.queue.len());
        match self.queue.watermark(len) {
            Watermark::Critical => {
                self.set_flag(ErrorFlag::BufferWarning, true);
                self.set_flag(ErrorFlag::BufferCritical, true);
            },
            Watermark::Warning => self.set_flag(ErrorFlag::BufferWarning, true),
            Watermark::Normal => self.clear_watermark_flags(),
        }
    }

    /// 取出最早的帧
    pub fn dequeue_frame(&self) -> Option<LidarFrame> {
        let (frame, remaining) = self.queue.pop()?;
        self.status
            .update(|s| s.frames_processed = s.frames_processed.wrapping_add(1));
        if self.queue.watermark(remaining) == Watermark::Normal {
            self.clear_watermark_flags();
        }
        Some(frame)
    }

    /// 清空队列（恢复动作），同时清除队列相关的全部标志
    pub fn flush_queue(&self) -> usize {
        let dropped = self.queue.clear();
        self.set_flag(ErrorFlag::BufferOverflow, false);
        self.clear_watermark_flags();
        dropped
    }

    fn clear_watermark_flags(&self) {
        self.set_flag(ErrorFlag::BufferWarning, false);
        self.set_flag(ErrorFlag::BufferCritical, false);
    }

    /// 当前配置快照
    pub fn config(&self) -> Arc<DeviceConfig> {
        self.config.load_full()
    }

    pub fn settings(&self) -> RuntimeSettings {
        self.config.load().settings
    }

    pub fn sample_rate(&self) -> SampleRateMode {
        self.config.load().sample_rate
    }

    /// 发布新配置，两个循环下一次读取时生效
    pub fn publish_config(&self, config: DeviceConfig) {
        self.config.store(Arc::new(config));
    }

    pub fn system_mode(&self) -> SystemMode {
        self.mode.get(Ordering::Acquire)
    }

    pub fn set_system_mode(&self, mode: SystemMode) {
        self.mode.set(mode, Ordering::Release);
    }

    /// 通知所有触发钩子
    pub fn fire_trigger_hooks(&self, event: &TriggerEvent) {
        self.hooks.read().trigger_all(event);
    }
}

impl Default for LidarContext {
    fn default() -> Self {
        Self::new(DeviceConfig::default())
    }
}
