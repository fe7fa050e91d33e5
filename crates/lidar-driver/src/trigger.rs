//! 触发判定流水线
//!
//! raw（阈值判定）→ debounced（去抖）→ latched（保持）→ 物理输出。
//!
//! 时间参数：
//! - 去抖：接通延时 30 ms，断开延时 50 ms，最短有效时间 20 ms
//! - 保持：3000 ms，期间忽略输入
//!
//! 所有计时使用毫秒，差值以饱和减法计算。

use lidar_tools::SelectorRow;

/// 接通延时
pub const DEBOUNCE_ON_MS: u64 = 30;
/// 断开延时
pub const DEBOUNCE_OFF_MS: u64 = 50;
/// 最短有效时间
pub const MIN_ACTIVE_MS: u64 = 20;
/// 保持时间
pub const LATCH_DURATION_MS: u64 = 3_000;

/// 阈值判定
///
/// 距离不超过阈值，且（未启用速度门限或速度落在窗口内）。
pub fn evaluate_raw(
    row: &SelectorRow,
    use_velocity_trigger: bool,
    distance_cm: u16,
    velocity_cm_s: f32,
) -> bool {
    distance_cm <= row.distance_threshold_cm
        && (!use_velocity_trigger || row.velocity_in_window(velocity_cm_s))
}

/// 去抖器
#[derive(Debug, Clone)]
pub struct Debouncer {
    on_delay_ms: u64,
    off_delay_ms: u64,
    min_active_ms: u64,
    last_raw: bool,
    last_change_ms: u64,
    state: bool,
    state_since_ms: u64,
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEBOUNCE_ON_MS, DEBOUNCE_OFF_MS, MIN_ACTIVE_MS)
    }
}

impl Debouncer {
    pub fn new(on_delay_ms: u64, off_delay_ms: u64, min_active_ms: u64) -> Self {
        Self {
            on_delay_ms,
            off_delay_ms,
            min_active_ms,
            last_raw: false,
            last_change_ms: 0,
            state: false,
            state_since_ms: 0,
        }
    }

    /// 输入一次原始判定，返回去抖后的状态
    pub fn update(&mut self, raw: bool, now_ms: u64) -> bool {
        if raw != self.last_raw {
            self.last_change_ms = now_ms;
            self.last_raw = raw;
        }
        let since_change = now_ms.saturating_sub(self.last_change_ms);

        if raw && !self.state && since_change >= self.on_delay_ms {
            self.state = true;
            self.state_since_ms = now_ms;
        } else if !raw
            && self.state
            && since_change >= self.off_delay_ms
            && now_ms.saturating_sub(self.state_since_ms) >= self.min_active_ms
        {
            self.state = false;
            self.state_since_ms = now_ms;
        }
        self.state
    }

    pub fn state(&self) -> bool {
        self.state
    }
}

/// 保持状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LatchState {
    #[default]
    Idle,
    Latched { since_ms: u64 },
}

/// 输出保持器
///
/// 空闲时收到有效输入立即进入保持；保持满时长后回到空闲，与输入无关。
#[derive(Debug, Clone)]
pub struct Latch {
    duration_ms: u64,
    state: LatchState,
}

impl Default for Latch {
    fn default() -> Self {
        Self::new(LATCH_DURATION_MS)
    }
}

impl Latch {
    pub fn new(duration_ms: u64) -> Self {
        Self {
            duration_ms,
            state: LatchState::Idle,
        }
    }

    pub fn update(&mut self, input: bool, now_ms: u64) -> bool {
        match self.state {
            LatchState::Idle => {
                if input {
                    self.state = LatchState::Latched { since_ms: now_ms };
                }
            },
            LatchState::Latched { since_ms } => {
                if now_ms.saturating_sub(since_ms) >= self.duration_ms {
                    self.state = LatchState::Idle;
                }
            },
        }
        self.is_latched()
    }

    /// 只检查保持是否到期，不接受新的输入
    pub fn expire(&mut self, now_ms: u64) -> bool {
        if let LatchState::Latched { since_ms } = self.state
            && now_ms.saturating_sub(since_ms) >= self.duration_ms
        {
            self.state = LatchState::Idle;
        }
        self.is_latched()
    }

    pub fn state(&self) -> LatchState {
        self.state
    }

    pub fn is_latched(&self) -> bool {
        matches!(self.state, LatchState::Latched { .. })
    }
}

/// 一次判定的各级结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TriggerDecision {
    pub raw: bool,
    pub debounced: bool,
    /// 最终输出（= 保持状态）
    pub output: bool,
    /// 输出从无效变为有效
    pub rising_edge: bool,
}

/// 完整流水线
#[derive(Debug, Clone, Default)]
pub struct TriggerPipeline {
    debouncer: Debouncer,
    latch: Latch,
    output: bool,
}

impl TriggerPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, raw: bool, now_ms: u64) -> TriggerDecision {
        let debounced = self.debouncer.update(raw, now_ms);
        let output = self.latch.update(debounced, now_ms);
        let rising_edge = output && !self.output;
        self.output = output;
        TriggerDecision {
            raw,
            debounced,
            output,
            rising_edge,
        }
    }

    /// 没有新帧时推进保持计时
    ///
    /// 返回输出是否在这一次从有效变为无效。
    pub fn tick(&mut self, now_ms: u64) -> bool {
        let output = self.latch.expire(now_ms);
        let falling_edge = self.output && !output;
        self.output = output;
        falling_edge
    }

    pub fn output(&self) -> bool {
        self.output
    }

    /// 回到初始状态（输出无效）
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(distance: u16, vmin: i16, vmax: i16) -> SelectorRow {
        SelectorRow {
            distance_threshold_cm: distance,
            velocity_min_cm_s: vmin,
            velocity_max_cm_s: vmax,
            trigger_rule: [0; 4],
        }
    }

    #[test]
    fn test_raw_evaluation() {
        let r = row(100, 250, 2200);
        assert!(evaluate_raw(&r, false, 100, 0.0));
        assert!(!evaluate_raw(&r, false, 101, 0.0));
        assert!(!evaluate_raw(&r, true, 50, 0.0));
        assert!(evaluate_raw(&r, true, 50, 250.0));
        assert!(evaluate_raw(&r, true, 50, 2200.0));
        assert!(!evaluate_raw(&r, true, 50, 2200.5));
    }

    #[test]
    fn test_debounce_on_delay() {
        let mut d = Debouncer::default();
        assert!(!d.update(true, 1_000));
        assert!(!d.update(true, 1_029));
        assert!(d.update(true, 1_030));
    }

    #[test]
    fn test_debounce_rejects_short_pulse() {
        let mut d = Debouncer::default();
        for t in 1_000..1_020 {
            assert!(!d.update(true, t));
        }
        for t in 1_020..1_200 {
            assert!(!d.update(false, t));
        }
    }

    #[test]
    fn test_debounce_off_delay_and_min_active() {
        let mut d = Debouncer::default();
        d.update(true, 0);
        assert!(d.update(true, 30));
        // 5ms 后断开：需要 50ms 断开延时
        assert!(d.update(false, 35));
        assert!(d.update(false, 84));
        assert!(!d.update(false, 85));

        // 抖动重新计时
        d.update(true, 200);
        assert!(d.update(true, 230));
        d.update(false, 240);
        d.update(true, 260);
        assert!(d.update(false, 270));
        assert!(d.update(false, 319));
        assert!(!d.update(false, 320));
    }

    #[test]
    fn test_latch_holds_for_duration() {
        let mut latch = Latch::default();
        assert!(latch.update(true, 100));
        assert!(latch.update(false, 1_000));
        assert!(latch.update(true, 3_099));
        // 恰好 3000ms 时释放，即使输入仍有效
        assert!(!latch.update(true, 3_100));
        assert_eq!(latch.state(), LatchState::Idle);
        // 下一次调用重新进入保持
        assert!(latch.update(true, 3_101));
    }

    #[test]
    fn test_latch_expires_without_input() {
        let mut latch = Latch::default();
        assert!(!latch.expire(50));
        assert!(latch.update(true, 100));
        assert!(latch.expire(3_099));
        assert!(!latch.expire(3_100));
        // 到期检查不会重新进入保持
        assert!(!latch.expire(3_101));
    }

    #[test]
    fn test_pipeline_tick_releases_output_once() {
        let mut p = TriggerPipeline::new();
        let mut on_at = None;
        for t in 0..100u64 {
            if p.update(true, t).rising_edge {
                on_at = Some(t);
            }
        }
        let on_at = on_at.unwrap();
        // 此后不再有帧
        for t in 100..on_at + 3_000 {
            assert!(!p.tick(t));
            assert!(p.output());
        }
        assert!(p.tick(on_at + 3_000));
        assert!(!p.output());
        assert!(!p.tick(on_at + 3_001));
    }

    #[test]
    fn test_pipeline_rising_edge_once_per_latch() {
        let mut p = TriggerPipeline::new();
        let mut edges = 0;
        let mut first_on = None;
        for t in 0..8_000u64 {
            let decision = p.update(true, t);
            if decision.rising_edge {
                edges += 1;
                first_on.get_or_insert(t);
            }
        }
        assert_eq!(first_on, Some(30));
        // 30 → 3030 释放，3031 再次保持，6031 释放，6032 再次保持
        assert_eq!(edges, 3);
    }

    #[test]
    fn test_pipeline_output_never_shorter_than_latch() {
        let mut p = TriggerPipeline::new();
        let mut on_since = None;
        for t in 0..5_000u64 {
            let raw = (40..80).contains(&t);
            let d = p.update(raw, t);
            if d.rising_edge {
                on_since = Some(t);
            }
            if let Some(since) = on_since
                && !d.output
            {
                assert!(t - since >= LATCH_DURATION_MS);
                on_since = None;
            }
        }
        assert!(!p.output());
    }
}
