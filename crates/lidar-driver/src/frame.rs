//! 已校验的测距帧

use lidar_protocol::FrameFields;

/// 一次有效测量
///
/// 只由采集引擎在校验和与量程检查都通过后构造，经队列移交给消费者后只被消费一次。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LidarFrame {
    /// 距离（cm）
    pub distance: u16,
    /// 信号强度
    pub strength: u16,
    /// 温度原始值
    pub temperature: u16,
    /// 入队时刻（单调时钟，微秒）
    pub timestamp_us: u64,
    pub valid: bool,
}

impl LidarFrame {
    pub fn new(fields: FrameFields, timestamp_us: u64) -> Self {
        Self {
            distance: fields.distance,
            strength: fields.strength,
            temperature: fields.temperature,
            timestamp_us,
            valid: true,
        }
    }
}
