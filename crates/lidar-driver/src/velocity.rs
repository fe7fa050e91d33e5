//! 速度估计
//!
//! 由消费者独占。对最近的帧历史做稀疏配对（最新帧与第 2、4、6、8、10 个旧帧），
//! 取中位数并应用死区，得到抗噪的径向速度。正值表示目标接近。

use crate::frame::LidarFrame;
use lidar_tools::median_in_place;
use smallvec::SmallVec;

/// 历史容量
pub const HISTORY_CAPACITY: usize = 15;

/// 计算速度所需的最少历史帧数
pub const MIN_HISTORY_FOR_VELOCITY: usize = 5;

/// 最多使用的配对数
const MAX_PAIRS: usize = 5;

/// 配对间隔（不含端点）的有效范围（微秒）
const MIN_PAIR_ELAPSED_US: u64 = 1_000;
const MAX_PAIR_ELAPSED_US: u64 = 50_000;

/// 连续失败超过该次数时置位 velocity-calc-error
const CALC_ERROR_THRESHOLD: u32 = 10;

/// 帧历史环形缓冲
///
/// 新帧覆盖最旧的帧。`get(0)` 与 `iter()` 的第一项都是最新帧。
#[derive(Debug, Clone)]
pub struct FrameHistory {
    slots: [LidarFrame; HISTORY_CAPACITY],
    /// 下一个写入位置
    next: usize,
    len: usize,
}

impl Default for FrameHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameHistory {
    pub fn new() -> Self {
        Self {
            slots: [LidarFrame::default(); HISTORY_CAPACITY],
            next: 0,
            len: 0,
        }
    }

    /// 放入最新帧，满时淘汰最旧的一帧
    pub fn push(&mut self, frame: LidarFrame) {
        self.slots[self.next] = frame;
        self.next = (self.next + 1) % HISTORY_CAPACITY;
        if self.len < HISTORY_CAPACITY {
            self.len += 1;
        }
    }

    /// 按新旧顺序取帧，`0` 为最新
    pub fn get(&self, age: usize) -> Option<&LidarFrame> {
        if age >= self.len {
            return None;
        }
        let index = (self.next + HISTORY_CAPACITY - 1 - age) % HISTORY_CAPACITY;
        Some(&self.slots[index])
    }

    /// 从新到旧遍历
    pub fn iter(&self) -> impl Iterator<Item = &LidarFrame> + '_ {
        (0..self.len).filter_map(move |age| self.get(age))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.next = 0;
        self.len = 0;
    }
}

/// 死区参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Deadbands {
    /// 距离变化不超过该值视为"小幅移动"（cm）
    pub distance_cm: u32,
    /// 中位速度绝对值不超过该值时输出 0（cm/s）
    pub velocity_cm_s: f32,
}

impl Default for Deadbands {
    fn default() -> Self {
        Self {
            distance_cm: 1,
            velocity_cm_s: 1.0,
        }
    }
}

/// 一次速度计算的结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VelocityReading {
    /// 速度（cm/s）
    pub velocity: f32,
    /// velocity-calc-error 标志应设为的值；`None` 表示不改变
    pub calc_error: Option<bool>,
}

/// 速度估计器
#[derive(Debug, Clone, Default)]
pub struct VelocityEstimator {
    history: FrameHistory,
    last_velocity: f32,
    consecutive_failures: u32,
    last_movement_us: u64,
}

impl VelocityEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_frame(&mut self, frame: LidarFrame) {
        self.history.push(frame);
    }

    pub fn history(&self) -> &FrameHistory {
        &self.history
    }

    pub fn last_velocity(&self) -> f32 {
        self.last_velocity
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// 最近一次成功计算的时刻（微秒）
    pub fn last_movement_us(&self) -> u64 {
        self.last_movement_us
    }

    /// 丢弃全部历史与状态
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// 根据当前历史计算速度
    ///
    /// # 参数
    ///
    /// - `now_us`: 当前时刻，成功计算时记为最近一次运动时刻
    /// - `deadbands`: 距离与速度死区
    pub fn calculate_velocity(&mut self, now_us: u64, deadbands: Deadbands) -> VelocityReading {
        if self.history.len() < MIN_HISTORY_FOR_VELOCITY {
            return VelocityReading {
                velocity: 0.0,
                calc_error: None,
            };
        }

        let Some(newest) = self.history.get(0).copied() else {
            return VelocityReading {
                velocity: 0.0,
                calc_error: None,
            };
        };

        let mut samples: SmallVec<[f32; MAX_PAIRS]> = SmallVec::new();
        let mut small_movements = 0usize;
        for older in self.history.iter().skip(2).step_by(2).take(MAX_PAIRS) {
            let elapsed_us = newest.timestamp_us.saturating_sub(older.timestamp_us);
            if elapsed_us <= MIN_PAIR_ELAPSED_US || elapsed_us >= MAX_PAIR_ELAPSED_US {
                continue;
            }
            let delta = older.distance as i32 - newest.distance as i32;
            if delta.unsigned_abs() <= deadbands.distance_cm {
                small_movements += 1;
            }
            samples.push(delta as f32 * 1_000_000.0 / elapsed_us as f32);
        }

        if samples.is_empty() {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            return VelocityReading {
                velocity: self.last_velocity,
                calc_error: Some(self.consecutive_failures > CALC_ERROR_THRESHOLD),
            };
        }

        let velocity = if small_movements > samples.len() / 2 {
            0.0
        } else {
            let median = median_in_place(&mut samples).unwrap_or(0.0);
            if median.abs() <= deadbands.velocity_cm_s {
                0.0
            } else {
                median
            }
        };

        self.last_velocity = velocity;
        self.last_movement_us = now_us;
        self.consecutive_failures = 0;
        VelocityReading {
            velocity,
            calc_error: Some(false),
        }
    }
}
