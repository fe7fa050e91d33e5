//! 有界帧队列
//!
//! 生产者与消费者之间的固定容量环形缓冲。锁只保护下标与计数的修改，
//! 水位标志由调用方在锁外更新。
//!
//! 队列满时新帧被丢弃（保留已排队的旧帧），严格 FIFO。

use crate::frame::LidarFrame;
use lidar_tools::SampleRateMode;
use parking_lot::Mutex;

/// 入队结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// 成功，附带入队后的长度
    Accepted { len: usize },
    /// 队列已满，帧被丢弃
    Full,
}

/// 队列占用水位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Watermark {
    Normal,
    Warning,
    Critical,
}

/// 固定容量环形缓冲
#[derive(Debug)]
struct FrameRing {
    slots: Box<[LidarFrame]>,
    head: usize,
    tail: usize,
    count: usize,
}

impl FrameRing {
    fn new(capacity: usize) -> Self {
        Self {
            slots: vec![LidarFrame::default(); capacity].into_boxed_slice(),
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    fn push(&mut self, frame: LidarFrame) -> Option<usize> {
        if self.count >= self.slots.len() {
            return None;
        }
        self.slots[self.head] = frame;
        self.head = (self.head + 1) % self.slots.len();
        self.count += 1;
        Some(self.count)
    }

    fn pop(&mut self) -> Option<(LidarFrame, usize)> {
        if self.count == 0 {
            return None;
        }
        let frame = self.slots[self.tail];
        self.tail = (self.tail + 1) % self.slots.len();
        self.count -= 1;
        Some((frame, self.count))
    }

    fn clear(&mut self) -> usize {
        let dropped = self.count;
        self.head = 0;
        self.tail = 0;
        self.count = 0;
        dropped
    }
}

/// 锁保护的帧队列
#[derive(Debug)]
pub struct SharedFrameQueue {
    ring: Mutex<FrameRing>,
    capacity: usize,
    warning_level: usize,
    critical_level: usize,
}

impl SharedFrameQueue {
    /// 指定容量与水位
    ///
    /// 水位需满足 `warning <= critical <= capacity`，容量至少为 1。
    pub fn new(capacity: usize, warning_level: usize, critical_level: usize) -> Self {
        let capacity = capacity.max(1);
        let critical_level = critical_level.min(capacity);
        let warning_level = warning_level.min(critical_level);
        Self {
            ring: Mutex::new(FrameRing::new(capacity)),
            capacity,
            warning_level,
            critical_level,
        }
    }

    /// 按采样率模式构造
    pub fn for_mode(mode: SampleRateMode) -> Self {
        Self::new(
            mode.queue_capacity(),
            mode.warning_level(),
            mode.critical_level(),
        )
    }

    pub fn push(&self, frame: LidarFrame) -> PushOutcome {
        match self.ring.lock().push(frame) {
            Some(len) => PushOutcome::Accepted { len },
            None => PushOutcome::Full,
        }
    }

    /// 取出最早的帧，附带取出后的剩余长度
    pub fn pop(&self) -> Option<(LidarFrame, usize)> {
        self.ring.lock().pop()
    }

    /// 清空队列，返回被丢弃的帧数
    pub fn clear(&self) -> usize {
        self.ring.lock().clear()
    }

    pub fn len(&self) -> usize {
        self.ring.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn warning_level(&self) -> usize {
        self.warning_level
    }

    pub fn critical_level(&self) -> usize {
        self.critical_level
    }

    /// 给定长度对应的水位
    pub fn watermark(&self, len: usize) -> Watermark {
        if len >= self.critical_level {
            Watermark::Critical
        } else if len >= self.warning_level {
            Watermark::Warning
        } else {
            Watermark::Normal
        }
    }
}
