//! frame 命令
//!
//! 传感器 9 字节帧的编码与解码，用于排查抓包数据。

use anyhow::{Context, Result};
use clap::Subcommand;
use lidar_protocol::{DEFAULT_MIN_STRENGTH, FrameFields, RawFrame};

/// 帧命令
#[derive(Subcommand, Debug)]
pub enum FrameCommand {
    /// 根据字段编码一帧，输出十六进制
    Encode {
        /// 距离（cm）
        distance: u16,
        /// 信号强度
        strength: u16,
        /// 温度原始值
        #[arg(default_value_t = 0)]
        temperature: u16,
    },

    /// 解码并校验一帧（十六进制，可含空格）
    Decode {
        hex: String,

        /// 以 JSON 输出
        #[arg(long)]
        json: bool,
    },
}

/// 解析十六进制文本（忽略空白）
pub fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(&compact).context("无效的十六进制数据")
}

impl FrameCommand {
    pub fn execute(self) -> Result<()> {
        match self {
            FrameCommand::Encode {
                distance,
                strength,
                temperature,
            } => {
                let frame = RawFrame::encode(FrameFields {
                    distance,
                    strength,
                    temperature,
                });
                println!("{}", hex::encode_upper(frame.as_bytes()));
                Ok(())
            },
            FrameCommand::Decode { hex, json } => Self::decode_(&hex, json),
        }
    }

    fn decode_(text: &str, json: bool) -> Result<()> {
        let bytes = parse_hex(text)?;
        let frame = RawFrame::try_from_slice(&bytes).context("❌ 不是有效的传感器帧")?;
        let fields = frame.fields();
        let checksum_ok = frame.verify().is_ok();
        let in_range = fields.in_range(DEFAULT_MIN_STRENGTH);

        if json {
            let value = serde_json::json!({
                "fields": fields,
                "checksum_ok": checksum_ok,
                "in_range": in_range,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        } else {
            println!("距离: {} cm", fields.distance);
            println!("强度: {}", fields.strength);
            println!("温度: {}", fields.temperature);
            if checksum_ok {
                println!("校验和: ✅ 0x{:02X}", frame.stored_checksum());
            } else {
                println!(
                    "校验和: ❌ 期望 0x{:02X}，实际 0x{:02X}",
                    frame.computed_checksum(),
                    frame.stored_checksum()
                );
            }
            println!("量程: {}", if in_range { "✅ 可用" } else { "⚠️ 超出量程或强度不足" });
        }

        if !checksum_ok {
            anyhow::bail!("checksum mismatch");
        }
        Ok(())
    }
}
