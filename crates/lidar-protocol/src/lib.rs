//! # LiDAR Protocol
//!
//! 激光测距触发器的线路格式定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `frame`: 传感器 9 字节数据帧解析
//! - `command`: 传感器初始化指令构建
//! - `host`: 上位机配置协议（分包、ACK/NAK、解析状态机）
//! - `flags`: 错误标志位定义
//!
//! ## 字节序
//!
//! 传感器帧与上位机协议的多字节字段均为小端字节序（LSB 在前）。

pub mod command;
pub mod flags;
pub mod frame;
pub mod host;

pub use command::*;
pub use flags::*;
pub use frame::*;
pub use host::*;

use thiserror::Error;

/// 协议解析错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Invalid sync header: {0:02X} {1:02X}")]
    InvalidSync(u8, u8),

    #[error("Checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    #[error("Payload too long: {len} bytes (max {max})")]
    PayloadTooLong { len: usize, max: usize },

    #[error("Invalid value for field {field}: {value}")]
    InvalidValue { field: String, value: u32 },
}

/// 累加和校验（按字节求和，取低 8 位）
///
/// 传感器帧、传感器指令和上位机协议共用同一种校验方式。
///
/// # 示例
///
/// ```
/// use lidar_protocol::additive_checksum;
///
/// assert_eq!(additive_checksum(&[0x5A, 0x04, 0x11]), 0x6F);
/// ```
pub fn additive_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// 小端字节序转 u16
pub fn bytes_to_u16_le(bytes: [u8; 2]) -> u16 {
    u16::from_le_bytes(bytes)
}

/// 小端字节序转 i16
pub fn bytes_to_i16_le(bytes: [u8; 2]) -> i16 {
    i16::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_additive_checksum_wraps() {
        assert_eq!(additive_checksum(&[]), 0);
        assert_eq!(additive_checksum(&[0xFF, 0x02]), 0x01);
        assert_eq!(additive_checksum(&[0x59, 0x59, 0x64, 0x00]), 0x16);
    }

    #[test]
    fn test_little_endian_helpers() {
        assert_eq!(bytes_to_u16_le([0xB0, 0x04]), 1200);
        assert_eq!(bytes_to_i16_le([0x06, 0xFF]), -250);
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::ChecksumMismatch {
            expected: 0x10,
            actual: 0x20,
        };
        assert_eq!(
            err.to_string(),
            "Checksum mismatch: expected 0x10, got 0x20"
        );

        let err = ProtocolError::InvalidLength {
            expected: 9,
            actual: 4,
        };
        assert!(err.to_string().contains("Invalid frame length"));
    }
}
