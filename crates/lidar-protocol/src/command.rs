//! 传感器初始化指令
//!
//! 指令格式：`0x5A | 总长度 | 指令 ID | 数据 ... | 校验和`，
//! 校验和为之前所有字节累加和的低 8 位。

use crate::additive_checksum;
use smallvec::SmallVec;

/// 指令帧头
pub const COMMAND_HEADER: u8 = 0x5A;

/// 出厂波特率（初始化时先以此速率连接）
pub const SENSOR_FACTORY_BAUD: u32 = 115_200;

/// 工作波特率
pub const SENSOR_STREAM_BAUD: u32 = 460_800;

const ID_SAMPLE_RATE: u8 = 0x03;
const ID_BAUD_RATE: u8 = 0x06;
const ID_OUTPUT_ENABLE: u8 = 0x07;
const ID_SAVE_SETTINGS: u8 = 0x11;

/// 传感器指令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorCommand {
    /// 修改串口波特率
    SetBaudRate(u32),
    /// 保存当前设置到传感器
    SaveSettings,
    /// 停止数据输出
    Stop,
    /// 开启数据输出
    Start,
    /// 设置输出频率（Hz）
    SetSampleRate(u16),
}

impl SensorCommand {
    /// 编码为线路字节（含长度与校验和）
    ///
    /// # 示例
    ///
    /// ```
    /// use lidar_protocol::SensorCommand;
    ///
    /// assert_eq!(SensorCommand::Stop.encode().as_slice(), &[0x5A, 0x05, 0x07, 0x00, 0x66]);
    /// ```
    pub fn encode(&self) -> SmallVec<[u8; 8]> {
        let mut out: SmallVec<[u8; 8]> = SmallVec::new();
        out.push(COMMAND_HEADER);
        out.push(0); // 长度占位
        match *self {
            SensorCommand::SetBaudRate(baud) => {
                out.push(ID_BAUD_RATE);
                out.extend_from_slice(&baud.to_le_bytes());
            },
            SensorCommand::SaveSettings => out.push(ID_SAVE_SETTINGS),
            SensorCommand::Stop => {
                out.push(ID_OUTPUT_ENABLE);
                out.push(0x00);
            },
            SensorCommand::Start => {
                out.push(ID_OUTPUT_ENABLE);
                out.push(0x01);
            },
            SensorCommand::SetSampleRate(hz) => {
                out.push(ID_SAMPLE_RATE);
                out.extend_from_slice(&hz.to_le_bytes());
            },
        }
        out[1] = (out.len() + 1) as u8;
        let chk = additive_checksum(&out);
        out.push(chk);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_command_bytes() {
        assert_eq!(
            SensorCommand::SetBaudRate(SENSOR_STREAM_BAUD)
                .encode()
                .as_slice(),
            &[0x5A, 0x08, 0x06, 0x00, 0x08, 0x07, 0x00, 0x77]
        );
        assert_eq!(
            SensorCommand::SaveSettings.encode().as_slice(),
            &[0x5A, 0x04, 0x11, 0x6F]
        );
        assert_eq!(
            SensorCommand::Stop.encode().as_slice(),
            &[0x5A, 0x05, 0x07, 0x00, 0x66]
        );
        assert_eq!(
            SensorCommand::Start.encode().as_slice(),
            &[0x5A, 0x05, 0x07, 0x01, 0x67]
        );
        assert_eq!(
            SensorCommand::SetSampleRate(1000).encode().as_slice(),
            &[0x5A, 0x06, 0x03, 0xE8, 0x03, 0x4E]
        );
        assert_eq!(
            SensorCommand::SetSampleRate(800).encode().as_slice(),
            &[0x5A, 0x06, 0x03, 0x20, 0x03, 0x86]
        );
    }

    #[test]
    fn test_length_field_matches_encoded_size() {
        for cmd in [
            SensorCommand::SetBaudRate(115_200),
            SensorCommand::SaveSettings,
            SensorCommand::Start,
        ] {
            let bytes = cmd.encode();
            assert_eq!(bytes[1] as usize, bytes.len());
        }
    }
}
