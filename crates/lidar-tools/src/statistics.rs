//! # 统计工具

/// 原地排序后取中间元素（`sorted[n / 2]`）
///
/// 偶数个样本时取上中位数，不做平均。空切片返回 `None`。
///
/// # 示例
///
/// ```
/// use lidar_tools::median_in_place;
///
/// let mut samples = [3.0, -1.0, 8.0, 2.0];
/// assert_eq!(median_in_place(&mut samples), Some(3.0));
/// ```
pub fn median_in_place(samples: &mut [f32]) -> Option<f32> {
    if samples.is_empty() {
        return None;
    }
    samples.sort_by(|a, b| a.total_cmp(b));
    Some(samples[samples.len() / 2])
}

/// 帧速率（帧/秒）
pub fn calculate_fps(frame_count: u64, duration_us: u64) -> f64 {
    if duration_us == 0 {
        return 0.0;
    }
    frame_count as f64 * 1_000_000.0 / duration_us as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_odd_and_even() {
        assert_eq!(median_in_place(&mut []), None);
        assert_eq!(median_in_place(&mut [5.0]), Some(5.0));
        assert_eq!(median_in_place(&mut [9.0, 1.0, 5.0]), Some(5.0));
        // 偶数个样本取上中位数
        assert_eq!(median_in_place(&mut [4.0, 1.0, 3.0, 2.0]), Some(3.0));
    }

    #[test]
    fn test_median_is_robust_to_outlier() {
        let mut samples = [100.0, 101.0, 99.0, 5000.0, 100.5];
        assert_eq!(median_in_place(&mut samples), Some(100.5));
    }

    #[test]
    fn test_calculate_fps() {
        assert_eq!(calculate_fps(1000, 1_000_000), 1000.0);
        assert_eq!(calculate_fps(10, 0), 0.0);
    }
}
