//! 数字 IO 抽象

/// 触发输出引脚
///
/// 物理线路为低电平有效，实现方负责电平翻转：`set_active(true)` 拉低线路。
pub trait OutputPin {
    fn set_active(&mut self, active: bool);
}

/// 选择开关输入（3 位）
pub trait SelectorInput {
    /// 读取开关组合对应的行号（0..8）
    fn read_code(&mut self) -> u8;
}

/// 将三个开关电平组合为行号
///
/// `bit0` 为最低位。
///
/// # 示例
///
/// ```
/// use lidar_hal::selector_code;
///
/// assert_eq!(selector_code(true, false, true), 0b101);
/// ```
pub fn selector_code(bit0: bool, bit1: bool, bit2: bool) -> u8 {
    (bit0 as u8) | ((bit1 as u8) << 1) | ((bit2 as u8) << 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_code_range() {
        assert_eq!(selector_code(false, false, false), 0);
        assert_eq!(selector_code(true, true, true), 7);
        assert_eq!(selector_code(false, true, false), 2);
    }
}
