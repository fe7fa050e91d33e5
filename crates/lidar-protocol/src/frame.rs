//! 传感器数据帧
//!
//! 传感器以固定 9 字节帧持续输出测量结果：
//!
//! ```text
//! | 0x59 | 0x59 | Dist_L | Dist_H | Str_L | Str_H | Temp_L | Temp_H | Checksum |
//! ```
//!
//! 校验和为前 8 字节累加和的低 8 位。

use crate::{ProtocolError, additive_checksum, bytes_to_u16_le};

/// 帧头同步字节
pub const FRAME_SYNC_BYTE: u8 = 0x59;

/// 完整帧长度（字节）
pub const FRAME_LEN: usize = 9;

/// 有效测距下限（cm）
pub const MIN_DISTANCE_CM: u16 = 7;

/// 有效测距上限（cm）
pub const MAX_DISTANCE_CM: u16 = 1200;

/// 默认信号强度阈值
pub const DEFAULT_MIN_STRENGTH: u16 = 200;

/// 原始 9 字节帧
///
/// 只负责字节层面的校验与字段提取，不做量程检查。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawFrame {
    bytes: [u8; FRAME_LEN],
}

/// 解码后的帧字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FrameFields {
    /// 距离（cm）
    pub distance: u16,
    /// 信号强度
    pub strength: u16,
    /// 芯片温度（原始值）
    pub temperature: u16,
}

impl RawFrame {
    /// 从 9 字节缓冲构造（不校验）
    pub fn from_bytes(bytes: [u8; FRAME_LEN]) -> Self {
        Self { bytes }
    }

    /// 从任意切片构造，长度或帧头不对时返回错误
    pub fn try_from_slice(data: &[u8]) -> Result<Self, ProtocolError> {
        let bytes: [u8; FRAME_LEN] =
            data.try_into().map_err(|_| ProtocolError::InvalidLength {
                expected: FRAME_LEN,
                actual: data.len(),
            })?;
        if bytes[0] != FRAME_SYNC_BYTE || bytes[1] != FRAME_SYNC_BYTE {
            return Err(ProtocolError::InvalidSync(bytes[0], bytes[1]));
        }
        Ok(Self { bytes })
    }

    /// 根据字段编码完整帧（含帧头与校验和）
    pub fn encode(fields: FrameFields) -> Self {
        let mut bytes = [0u8; FRAME_LEN];
        bytes[0] = FRAME_SYNC_BYTE;
        bytes[1] = FRAME_SYNC_BYTE;
        bytes[2..4].copy_from_slice(&fields.distance.to_le_bytes());
        bytes[4..6].copy_from_slice(&fields.strength.to_le_bytes());
        bytes[6..8].copy_from_slice(&fields.temperature.to_le_bytes());
        bytes[8] = additive_checksum(&bytes[..8]);
        Self { bytes }
    }

    /// 原始字节
    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.bytes
    }

    /// 按前 8 字节计算出的校验和
    pub fn computed_checksum(&self) -> u8 {
        additive_checksum(&self.bytes[..8])
    }

    /// 帧中携带的校验和
    pub fn stored_checksum(&self) -> u8 {
        self.bytes[8]
    }

    /// 校验帧
    pub fn verify(&self) -> Result<(), ProtocolError> {
        let expected = self.computed_checksum();
        let actual = self.stored_checksum();
        if expected == actual {
            Ok(())
        } else {
            Err(ProtocolError::ChecksumMismatch { expected, actual })
        }
    }

    /// 提取字段（不校验）
    pub fn fields(&self) -> FrameFields {
        FrameFields {
            distance: bytes_to_u16_le([self.bytes[2], self.bytes[3]]),
            strength: bytes_to_u16_le([self.bytes[4], self.bytes[5]]),
            temperature: bytes_to_u16_le([self.bytes[6], self.bytes[7]]),
        }
    }

    /// 校验后提取字段
    pub fn decode(&self) -> Result<FrameFields, ProtocolError> {
        self.verify()?;
        Ok(self.fields())
    }
}

impl FrameFields {
    /// 距离和信号强度是否落在可用范围内
    ///
    /// 距离闭区间 `[MIN_DISTANCE_CM, MAX_DISTANCE_CM]`，强度不低于 `min_strength`。
    pub fn in_range(&self, min_strength: u16) -> bool {
        (MIN_DISTANCE_CM..=MAX_DISTANCE_CM).contains(&self.distance)
            && self.strength >= min_strength
    }
}
