//! 帧采集引擎
//!
//! 每次生产者循环调用一次 [`FrameAcquisitionEngine::poll`]，只消费当前已到达的字节，
//! 且单次最多处理 [`MAX_BYTES_PER_POLL`] 个字节，不会阻塞。
//!
//! 解析分两个阶段：
//! - `SeekSync`：寻找 `0x59 0x59` 帧头（读一个字节，再 peek 下一个）
//! - `Accumulate`：收集剩余 7 个字节
//!
//! 完整帧依次经过校验和与量程检查，通过后打上时间戳入队。

use crate::clock::Throttle;
use crate::context::LidarContext;
use crate::frame::LidarFrame;
use crate::queue::PushOutcome;
use lidar_hal::SerialPort;
use lidar_protocol::{ErrorFlag, FRAME_LEN, FRAME_SYNC_BYTE, RawFrame};
use tracing::{debug, info, trace, warn};

/// 单次 poll 最多读取的字节数（10 帧）
pub const MAX_BYTES_PER_POLL: usize = FRAME_LEN * 10;

/// 连续多少次入队成功后重置恢复计数
pub const GOOD_FRAMES_TO_RESET_RECOVERY: u32 = 5;

/// 连续帧头失配超过该值时执行健康探测
pub const SYNC_FAILURE_PROBE_THRESHOLD: u32 = 1_000;

/// 帧率统计窗口
const RATE_WINDOW_MS: u64 = 1_000;

/// 无帧探测窗口
const IDLE_PROBE_WINDOW_MS: u64 = 10_000;

/// 自适应超时上下限（微秒）
const MIN_FRAME_TIMEOUT_US: u64 = 1_000;
const MAX_FRAME_TIMEOUT_US: u64 = 10_000;

/// 根据观测帧率计算帧超时
///
/// `3_000_000 / fps`，限制在 `[1000, 10000]` µs；没有观测值时使用默认值。
pub fn adaptive_timeout_us(frames_per_second: u32, default_timeout_us: u64) -> u64 {
    if frames_per_second == 0 {
        return default_timeout_us;
    }
    (3_000_000 / frames_per_second as u64).clamp(MIN_FRAME_TIMEOUT_US, MAX_FRAME_TIMEOUT_US)
}

/// 被动健康探测：只检查串口是否有待读字节，不发送任何指令
pub fn probe_sensor<S: SerialPort + ?Sized>(port: &mut S, ctx: &LidarContext) -> bool {
    ctx.metrics.record_health_probe();
    let pending = port.available();
    let streaming = pending > 0;
    info!(pending, streaming, "Sensor health probe");
    streaming
}

/// 解析阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsePhase {
    SeekSync,
    /// 已找到帧头，记录找到时刻（微秒）
    Accumulate { started_us: u64 },
}

/// 单次 poll 的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub bytes_read: usize,
    pub frames_enqueued: usize,
    pub frames_rejected: usize,
    pub frames_dropped: usize,
}

/// 帧采集引擎
#[derive(Debug)]
pub struct FrameAcquisitionEngine {
    phase: ParsePhase,
    buffer: [u8; FRAME_LEN],
    index: usize,
    default_timeout_us: u64,
    adaptive_timeout_us: u64,
    // 1s 帧率窗口
    window_valid: u32,
    window_invalid: u32,
    window_start_ms: Option<u64>,
    // 10s 无帧探测窗口
    idle_window_frames: u32,
    idle_window_start_ms: Option<u64>,
    consecutive_sync_failures: u32,
    consecutive_good_frames: u32,
    overflow_log: Throttle,
    timeout_log: Throttle,
}

impl FrameAcquisitionEngine {
    /// # 参数
    ///
    /// - `default_timeout_us`: 采样率模式对应的默认帧超时
    /// - `report_interval_ms`: 重复告警日志的最小间隔
    pub fn new(default_timeout_us: u64, report_interval_ms: u64) -> Self {
        Self {
            phase: ParsePhase::SeekSync,
            buffer: [0; FRAME_LEN],
            index: 0,
            default_timeout_us,
            adaptive_timeout_us: default_timeout_us,
            window_valid: 0,
            window_invalid: 0,
            window_start_ms: None,
            idle_window_frames: 0,
            idle_window_start_ms: None,
            consecutive_sync_failures: 0,
            consecutive_good_frames: 0,
            overflow_log: Throttle::new(report_interval_ms),
            timeout_log: Throttle::new(report_interval_ms.max(5_000)),
        }
    }

    pub fn phase(&self) -> ParsePhase {
        self.phase
    }

    pub fn adaptive_timeout(&self) -> u64 {
        self.adaptive_timeout_us
    }

    pub fn consecutive_good_frames(&self) -> u32 {
        self.consecutive_good_frames
    }

    pub fn set_report_interval(&mut self, interval_ms: u64) {
        self.overflow_log.set_interval(interval_ms);
    }

    /// 放弃半帧并回到寻找帧头（重新初始化时使用）
    pub fn reset_parser(&mut self) {
        self.phase = ParsePhase::SeekSync;
        self.index = 0;
        self.consecutive_sync_failures = 0;
    }

    /// 处理当前已到达的字节
    pub fn poll<S: SerialPort + ?Sized>(
        &mut self,
        port: &mut S,
        ctx: &LidarContext,
        now_us: u64,
    ) -> PollSummary {
        let now_ms = now_us / 1_000;
        let mut summary = PollSummary::default();
        let min_strength = u16::try_from(ctx.settings().min_strength_threshold).unwrap_or(u16::MAX);
        let mut sync_misses = 0u64;

        self.check_frame_timeout(ctx, now_us, now_ms);

        while summary.bytes_read < MAX_BYTES_PER_POLL {
            match self.phase {
                ParsePhase::SeekSync => {
                    if port.available() < 2 {
                        break;
                    }
                    let Some(first) = port.read_byte() else {
                        break;
                    };
                    summary.bytes_read += 1;
                    if first == FRAME_SYNC_BYTE && port.peek_byte() == Some(FRAME_SYNC_BYTE) {
                        let _ = port.read_byte();
                        summary.bytes_read += 1;
                        self.buffer[0] = FRAME_SYNC_BYTE;
                        self.buffer[1] = FRAME_SYNC_BYTE;
                        self.index = 2;
                        self.phase = ParsePhase::Accumulate { started_us: now_us };
                        self.consecutive_sync_failures = 0;
                    } else {
                        sync_misses += 1;
                        self.on_sync_failure(first, port, ctx);
                    }
                },
                ParsePhase::Accumulate { .. } => {
                    let Some(byte) = port.read_byte() else {
                        break;
                    };
                    summary.bytes_read += 1;
                    self.buffer[self.index] = byte;
                    self.index += 1;
                    if self.index >= FRAME_LEN {
                        self.phase = ParsePhase::SeekSync;
                        self.index = 0;
                        self.complete_frame(ctx, now_us, now_ms, min_strength, &mut summary);
                    }
                },
            }
        }

        if sync_misses > 0 {
            ctx.metrics.record_sync_failures(sync_misses);
        }
        self.check_frame_timeout(ctx, now_us, now_ms);
        self.update_windows(port, ctx, now_ms);
        summary
    }

    fn on_sync_failure<S: SerialPort + ?Sized>(
        &mut self,
        byte: u8,
        port: &mut S,
        ctx: &LidarContext,
    ) {
        self.consecutive_sync_failures += 1;
        if self.consecutive_sync_failures % 100 == 0 {
            debug!(
                failures = self.consecutive_sync_failures,
                got = %format!("0x{:02X}", byte),
                "Frame sync failure"
            );
        }
        if self.consecutive_sync_failures > SYNC_FAILURE_PROBE_THRESHOLD {
            warn!("Too many sync failures, probing sensor");
            probe_sensor(port, ctx);
            self.consecutive_sync_failures = 0;
        }
    }

    fn complete_frame(
        &mut self,
        ctx: &LidarContext,
        now_us: u64,
        now_ms: u64,
        min_strength: u16,
        summary: &mut PollSummary,
    ) {
        let raw = RawFrame::from_bytes(self.buffer);
        self.idle_window_frames = self.idle_window_frames.saturating_add(1);

        if let Err(e) = raw.verify() {
            self.reject_frame(ctx, summary);
            ctx.metrics.record_checksum_failure();
            debug!(frame = %hex::encode(raw.as_bytes()), "{}", e);
            return;
        }

        let fields = raw.fields();
        if !fields.in_range(min_strength) {
            self.reject_frame(ctx, summary);
            ctx.metrics.record_range_failure();
            trace!(
                distance = fields.distance,
                strength = fields.strength,
                min_strength,
                "Frame out of range"
            );
            return;
        }

        ctx.set_flag(ErrorFlag::FrameCorruption, false);
        self.window_valid = self.window_valid.saturating_add(1);

        match ctx.enqueue_frame(LidarFrame::new(fields, now_us)) {
            PushOutcome::Accepted { .. } => {
                summary.frames_enqueued += 1;
                ctx.set_flag(ErrorFlag::CommTimeout, false);
                self.consecutive_good_frames += 1;
                if self.consecutive_good_frames >= GOOD_FRAMES_TO_RESET_RECOVERY {
                    self.consecutive_good_frames = 0;
                    ctx.status.update(|s| s.recovery_attempts = 0);
                    ctx.set_flag(ErrorFlag::InitFailed, false);
                }
            },
            PushOutcome::Full => {
                summary.frames_dropped += 1;
                self.consecutive_good_frames = 0;
                if !ctx.status.is_config_mode() && self.overflow_log.ready(now_ms) {
                    warn!(
                        len = ctx.queue.len(),
                        capacity = ctx.queue.capacity(),
                        "Frame queue overflow, dropping frames"
                    );
                }
            },
        }
    }

    fn reject_frame(&mut self, ctx: &LidarContext, summary: &mut PollSummary) {
        summary.frames_rejected += 1;
        self.window_invalid = self.window_invalid.saturating_add(1);
        self.consecutive_good_frames = 0;
        ctx.set_flag(ErrorFlag::FrameCorruption, true);
    }

    fn check_frame_timeout(&mut self, ctx: &LidarContext, now_us: u64, now_ms: u64) {
        if let ParsePhase::Accumulate { started_us } = self.phase
            && now_us.saturating_sub(started_us) > self.adaptive_timeout_us
        {
            ctx.metrics.record_frame_timeout();
            if self.timeout_log.ready(now_ms) {
                debug!(
                    timeout_us = self.adaptive_timeout_us,
                    index = self.index,
                    "Partial frame timed out"
                );
            }
            self.phase = ParsePhase::SeekSync;
            self.index = 0;
        }
    }

    fn update_windows<S: SerialPort + ?Sized>(
        &mut self,
        port: &mut S,
        ctx: &LidarContext,
        now_ms: u64,
    ) {
        let window_start = *self.window_start_ms.get_or_insert(now_ms);
        if now_ms.saturating_sub(window_start) >= RATE_WINDOW_MS {
            let fps = self.window_valid.saturating_add(self.window_invalid);
            self.adaptive_timeout_us = adaptive_timeout_us(fps, self.default_timeout_us);
            ctx.metrics.record_rate(fps, self.adaptive_timeout_us);
            if fps == 0 {
                trace!("No frames in the last second");
            }
            self.window_valid = 0;
            self.window_invalid = 0;
            self.window_start_ms = Some(now_ms);
        }

        let idle_start = *self.idle_window_start_ms.get_or_insert(now_ms);
        if now_ms.saturating_sub(idle_start) >= IDLE_PROBE_WINDOW_MS {
            if self.idle_window_frames == 0 {
                debug!("No frames for 10s, probing sensor");
                probe_sensor(port, ctx);
            }
            self.idle_window_frames = 0;
            self.idle_window_start_ms = Some(now_ms);
        }
    }
}
