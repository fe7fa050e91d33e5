//! 通信健康监测与分级恢复
//!
//! 只有"传感器长时间无有效帧"会触发主动恢复。恢复按尝试次数逐级升级：
//!
//! | 尝试次数 | 动作 |
//! |---------|------|
//! | 0 | 清空帧队列与串口输入 |
//! | 1 | 关闭并重新打开串口 |
//! | ≥2 | 重新执行传感器初始化 |
//!
//! 每一级有独立的冷却时间。重新初始化之前若尝试次数已超过上限，
//! 计数归零、置位 init-failed，本次不执行（系统带标志继续运行）。
//! 连续 5 帧入队成功后计数由采集引擎归零。

use crate::acquisition::probe_sensor;
use crate::context::LidarContext;
use lidar_hal::SerialPort;
use lidar_protocol::{ErrorFlag, SENSOR_STREAM_BAUD};
use tracing::{error, info, warn};

/// 两次健康检查之间的最小间隔（严格大于）
pub const HEALTH_CHECK_INTERVAL_MS: u64 = 5_000;

/// 超过该时长无有效帧视为通信中断
pub const STALE_THRESHOLD_MS: u64 = 2_000;

/// 恢复级别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryLevel {
    BufferFlush = 0,
    SoftReset = 1,
    FullReinit = 2,
}

impl RecoveryLevel {
    /// 根据当前尝试次数选择级别
    pub fn for_attempts(attempts: u32) -> Self {
        match attempts {
            0 => RecoveryLevel::BufferFlush,
            1 => RecoveryLevel::SoftReset,
            _ => RecoveryLevel::FullReinit,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// 一次监测的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// 未到检查时间
    Idle,
    /// 已检查，通信正常
    Healthy,
    /// 需要恢复，但该级别仍在冷却
    CoolingDown(RecoveryLevel),
    /// 已清空缓冲
    BufferFlushed { frames: usize, bytes: usize },
    /// 已重开串口
    SoftReset { reopened: bool },
    /// 调用方应从第一个状态重新初始化传感器
    RestartBringUp,
    /// 恢复预算耗尽，未执行
    Exhausted,
}

/// 恢复监督器
#[derive(Debug, Clone, Default)]
pub struct RecoverySupervisor {
    last_check_ms: u64,
    last_fired_ms: [Option<u64>; 3],
    fully_ready: bool,
}

impl RecoverySupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 系统是否已进入完全就绪（宽限期已重置）
    pub fn is_fully_ready(&self) -> bool {
        self.fully_ready
    }

    /// 重新初始化后调用，下次就绪时重新给出宽限期
    pub fn rearm(&mut self) {
        self.fully_ready = false;
    }

    /// 执行一次监测
    ///
    /// 只应在传感器初始化完成、消费者就绪且不在配置模式时调用。
    pub fn supervise<S: SerialPort + ?Sized>(
        &mut self,
        port: &mut S,
        ctx: &LidarContext,
        now_ms: u64,
    ) -> RecoveryOutcome {
        if !self.fully_ready {
            self.fully_ready = true;
            self.last_check_ms = now_ms;
            ctx.status.update(|s| s.last_frame_ms = now_ms);
            info!("System fully operational, starting communication health monitor");
        }

        if now_ms.saturating_sub(self.last_check_ms) <= HEALTH_CHECK_INTERVAL_MS {
            return RecoveryOutcome::Idle;
        }
        self.last_check_ms = now_ms;

        let snap = ctx.status.snapshot();
        let stale_ms = now_ms.saturating_sub(snap.last_frame_ms);
        if stale_ms <= STALE_THRESHOLD_MS {
            return RecoveryOutcome::Healthy;
        }

        ctx.set_flag(ErrorFlag::CommTimeout, true);
        let level = RecoveryLevel::for_attempts(snap.recovery_attempts);
        warn!(stale_ms, ?level, attempts = snap.recovery_attempts, "Sensor communication timeout");
        self.fire(level, port, ctx, now_ms)
    }

    fn fire<S: SerialPort + ?Sized>(
        &mut self,
        level: RecoveryLevel,
        port: &mut S,
        ctx: &LidarContext,
        now_ms: u64,
    ) -> RecoveryOutcome {
        let cooldown_ms = ctx.settings().recovery_attempt_delay_ms as u64;
        if let Some(last) = self.last_fired_ms[level.index()]
            && now_ms.saturating_sub(last) < cooldown_ms
        {
            return RecoveryOutcome::CoolingDown(level);
        }
        self.last_fired_ms[level.index()] = Some(now_ms);

        let attempts = ctx.status.update(|s| {
            s.recovery_attempts = s.recovery_attempts.saturating_add(1);
            s.recovery_attempts
        });

        match level {
            RecoveryLevel::BufferFlush => {
                let frames = ctx.flush_queue();
                let bytes = port.discard_input();
                if !probe_sensor(port, ctx) {
                    warn!("Sensor not responding after buffer flush");
                }
                ctx.metrics.record_recovery_action();
                info!(attempts, frames, bytes, "Recovery: buffer flush completed");
                RecoveryOutcome::BufferFlushed { frames, bytes }
            },
            RecoveryLevel::SoftReset => {
                port.end();
                let reopened = match port.begin(SENSOR_STREAM_BAUD) {
                    Ok(()) => true,
                    Err(e) => {
                        error!("Recovery: failed to reopen sensor port: {}", e);
                        false
                    },
                };
                if reopened && !probe_sensor(port, ctx) {
                    warn!("Sensor still not responding after soft reset");
                }
                ctx.metrics.record_recovery_action();
                info!(attempts, reopened, "Recovery: soft reset completed");
                RecoveryOutcome::SoftReset { reopened }
            },
            RecoveryLevel::FullReinit => {
                let max = ctx.settings().max_recovery_attempts;
                if attempts > max {
                    ctx.status.update(|s| s.recovery_attempts = 0);
                    ctx.set_flag(ErrorFlag::InitFailed, true);
                    error!(attempts, max, "Too many recovery attempts, continuing degraded");
                    return RecoveryOutcome::Exhausted;
                }
                ctx.metrics.record_recovery_action();
                warn!(attempts, "Recovery: full reinitialization");
                RecoveryOutcome::RestartBringUp
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lidar_hal::mock::MockSerial;
    use lidar_tools::DeviceConfig;

    fn setup() -> (RecoverySupervisor, MockSerial, LidarContext) {
        (
            RecoverySupervisor::new(),
            MockSerial::opened(SENSOR_STREAM_BAUD),
            LidarContext::new(DeviceConfig::default()),
        )
    }

    #[test]
    fn test_level_selection() {
        assert_eq!(RecoveryLevel::for_attempts(0), RecoveryLevel::BufferFlush);
        assert_eq!(RecoveryLevel::for_attempts(1), RecoveryLevel::SoftReset);
        assert_eq!(RecoveryLevel::for_attempts(2), RecoveryLevel::FullReinit);
        assert_eq!(RecoveryLevel::for_attempts(9), RecoveryLevel::FullReinit);
    }

    #[test]
    fn test_grace_period_on_first_ready() {
        let (mut sup, mut port, ctx) = setup();
        // last_frame_ms 为 0，但第一次就绪时被重置为当前时间
        assert_eq!(sup.supervise(&mut port, &ctx, 100_000), RecoveryOutcome::Idle);
        assert_eq!(ctx.status.snapshot().last_frame_ms, 100_000);
        assert!(sup.is_fully_ready());

        ctx.status.update(|s| s.last_frame_ms = 104_000);
        assert_eq!(sup.supervise(&mut port, &ctx, 105_000), RecoveryOutcome::Idle);
        assert_eq!(sup.supervise(&mut port, &ctx, 105_001), RecoveryOutcome::Healthy);
        assert!(!ctx.status.flag(ErrorFlag::CommTimeout));

        sup.rearm();
        sup.supervise(&mut port, &ctx, 200_000);
        assert_eq!(ctx.status.snapshot().last_frame_ms, 200_000);
    }

    #[test]
    fn test_check_interval_is_strict() {
        let (mut sup, mut port, ctx) = setup();
        sup.supervise(&mut port, &ctx, 10_000);
        sup.supervise(&mut port, &ctx, 16_000); // 第一次检查
        assert_eq!(sup.supervise(&mut port, &ctx, 21_000), RecoveryOutcome::Idle);
        assert_ne!(sup.supervise(&mut port, &ctx, 21_001), RecoveryOutcome::Idle);
    }

    #[test]
    fn test_escalation_ladder_and_exhaustion() {
        let (mut sup, mut port, ctx) = setup();
        sup.supervise(&mut port, &ctx, 0);

        let outcome = sup.supervise(&mut port, &ctx, 6_000);
        assert_eq!(outcome, RecoveryOutcome::BufferFlushed { frames: 0, bytes: 0 });
        assert!(ctx.status.flag(ErrorFlag::CommTimeout));
        assert_eq!(ctx.status.snapshot().recovery_attempts, 1);

        let outcome = sup.supervise(&mut port, &ctx, 12_000);
        assert_eq!(outcome, RecoveryOutcome::SoftReset { reopened: true });
        assert_eq!(port.end_count(), 1);

        assert_eq!(sup.supervise(&mut port, &ctx, 18_000), RecoveryOutcome::RestartBringUp);
        assert_eq!(ctx.status.snapshot().recovery_attempts, 3);
        assert!(!ctx.status.flag(ErrorFlag::InitFailed));

        // 下一次重新初始化请求：计数先加一为 4 > 3，放弃并归零
        let outcome = sup.supervise(&mut port, &ctx, 23_001);
        assert_eq!(outcome, RecoveryOutcome::Exhausted);
        let snap = ctx.status.snapshot();
        assert_eq!(snap.recovery_attempts, 0);
        assert!(snap.has_flag(ErrorFlag::InitFailed));
        assert_eq!(ctx.metrics.snapshot().recovery_actions, 3);

        // 归零后重新从第 0 级开始；第 0 级上次在 6000ms，冷却早已结束
        assert_eq!(
            sup.supervise(&mut port, &ctx, 28_002),
            RecoveryOutcome::BufferFlushed { frames: 0, bytes: 0 }
        );
        assert_eq!(ctx.status.snapshot().recovery_attempts, 1);
        assert_eq!(ctx.metrics.snapshot().recovery_actions, 4);
    }

    #[test]
    fn test_per_level_cooldown() {
        let (mut sup, mut port, ctx) = setup();
        let mut config = DeviceConfig::default();
        config.settings.recovery_attempt_delay_ms = 30_000;
        ctx.publish_config(config);

        sup.supervise(&mut port, &ctx, 0);
        assert!(matches!(
            sup.supervise(&mut port, &ctx, 6_000),
            RecoveryOutcome::BufferFlushed { .. }
        ));
        // 有效帧把计数清零后，下一次超时又回到第 0 级，但仍在冷却
        ctx.status.update(|s| s.recovery_attempts = 0);
        assert_eq!(
            sup.supervise(&mut port, &ctx, 12_000),
            RecoveryOutcome::CoolingDown(RecoveryLevel::BufferFlush)
        );
        assert_eq!(ctx.status.snapshot().recovery_attempts, 0);
    }

    #[test]
    fn test_buffer_flush_clears_queue_and_input() {
        let (mut sup, mut port, ctx) = setup();
        sup.supervise(&mut port, &ctx, 0);
        ctx.enqueue_frame(crate::frame::LidarFrame::default());
        ctx.enqueue_frame(crate::frame::LidarFrame::default());
        // 入队会刷新 last_frame_ms（时间戳为 0），保持过期
        port.feed(&[1, 2, 3]);
        let outcome = sup.supervise(&mut port, &ctx, 6_000);
        assert_eq!(outcome, RecoveryOutcome::BufferFlushed { frames: 2, bytes: 3 });
        assert!(ctx.queue.is_empty());
        assert_eq!(ctx.metrics.snapshot().health_probes, 1);
    }
}
