//! 上位机配置协议
//!
//! 包格式：
//!
//! ```text
//! | 0x7E | cmd | len (<= 64) | payload ... | checksum |
//! ```
//!
//! 校验和为 `cmd`、`len` 与负载累加和的低 8 位。回复使用相同格式：
//! ACK 的命令字为 `0x06`，负载为被确认的命令字；NAK 的命令字为 `0x15`，
//! 负载为一个错误码。

use crate::{ProtocolError, additive_checksum};
use smallvec::SmallVec;

/// 包起始字节
pub const HOST_START_BYTE: u8 = 0x7E;

/// 最大负载长度
pub const HOST_MAX_PAYLOAD: usize = 64;

/// 最长的一包（起始字节、指令、长度、负载、校验和）
pub const HOST_MAX_PACKET: usize = HOST_MAX_PAYLOAD + 4;

/// 编码缓冲的内联容量（smallvec 支持的数组长度）
const ENCODE_INLINE: usize = 96;
const _: () = assert!(ENCODE_INLINE >= HOST_MAX_PACKET);

/// 不完整包的超时时间（毫秒）
pub const HOST_PACKET_TIMEOUT_MS: u64 = 100;

/// ACK 命令字
pub const RSP_ACK: u8 = 0x06;

/// NAK 命令字
pub const RSP_NAK: u8 = 0x15;

/// NAK 错误码
#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::TryFromPrimitive, num_enum::IntoPrimitive)]
#[repr(u8)]
pub enum NakCode {
    BadChecksum = 0x01,
    UnknownCommand = 0x02,
    InvalidPayload = 0x03,
    ExecutionFailed = 0x04,
    Timeout = 0x05,
}

/// 上位机数据包
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPacket {
    pub cmd: u8,
    pub payload: SmallVec<[u8; HOST_MAX_PAYLOAD]>,
}

impl HostPacket {
    /// 构造数据包，负载超长时返回错误
    pub fn new(cmd: u8, payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() > HOST_MAX_PAYLOAD {
            return Err(ProtocolError::PayloadTooLong {
                len: payload.len(),
                max: HOST_MAX_PAYLOAD,
            });
        }
        Ok(Self {
            cmd,
            payload: SmallVec::from_slice(payload),
        })
    }

    /// ACK 回复
    pub fn ack(original_cmd: u8) -> Self {
        Self {
            cmd: RSP_ACK,
            payload: SmallVec::from_slice(&[original_cmd]),
        }
    }

    /// NAK 回复
    pub fn nak(code: NakCode) -> Self {
        Self {
            cmd: RSP_NAK,
            payload: SmallVec::from_slice(&[code.into()]),
        }
    }

    /// 包校验和
    pub fn checksum(&self) -> u8 {
        additive_checksum(&[self.cmd, self.payload.len() as u8])
            .wrapping_add(additive_checksum(&self.payload))
    }

    /// 编码为线路字节
    pub fn encode(&self) -> SmallVec<[u8; ENCODE_INLINE]> {
        let mut out = SmallVec::new();
        out.push(HOST_START_BYTE);
        out.push(self.cmd);
        out.push(self.payload.len() as u8);
        out.extend_from_slice(&self.payload);
        out.push(self.checksum());
        out
    }

    pub fn is_ack(&self) -> bool {
        self.cmd == RSP_ACK
    }

    pub fn is_nak(&self) -> bool {
        self.cmd == RSP_NAK
    }
}

/// 解析器事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// 完整且校验通过的数据包
    Packet(HostPacket),
    /// 被拒绝的数据包，调用方应回复对应 NAK
    Rejected(NakCode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParsePhase {
    WaitForStart,
    ReadCmd,
    ReadLen,
    ReadPayload,
    ReadChecksum,
}

/// 上位机协议解析状态机
///
/// 逐字节推进；起始字节之后超过 [`HOST_PACKET_TIMEOUT_MS`] 仍未收完整包时，
/// [`HostPacketParser::check_timeout`] 返回 `Rejected(Timeout)` 并回到等待状态。
#[derive(Debug)]
pub struct HostPacketParser {
    phase: ParsePhase,
    cmd: u8,
    expected_len: usize,
    payload: SmallVec<[u8; HOST_MAX_PAYLOAD]>,
    started_ms: u64,
}

impl Default for HostPacketParser {
    fn default() -> Self {
        Self::new()
    }
}

impl HostPacketParser {
    pub fn new() -> Self {
        Self {
            phase: ParsePhase::WaitForStart,
            cmd: 0,
            expected_len: 0,
            payload: SmallVec::new(),
            started_ms: 0,
        }
    }

    /// 是否处于包中间
    pub fn in_packet(&self) -> bool {
        self.phase != ParsePhase::WaitForStart
    }

    /// 检查不完整包是否超时
    pub fn check_timeout(&mut self, now_ms: u64) -> Option<HostEvent> {
        if self.in_packet() && now_ms.saturating_sub(self.started_ms) > HOST_PACKET_TIMEOUT_MS {
            self.reset();
            return Some(HostEvent::Rejected(NakCode::Timeout));
        }
        None
    }

    /// 输入一个字节
    pub fn push(&mut self, byte: u8, now_ms: u64) -> Option<HostEvent> {
        match self.phase {
            ParsePhase::WaitForStart => {
                if byte == HOST_START_BYTE {
                    self.phase = ParsePhase::ReadCmd;
                    self.started_ms = now_ms;
                }
                None
            },
            ParsePhase::ReadCmd => {
                self.cmd = byte;
                self.phase = ParsePhase::ReadLen;
                None
            },
            ParsePhase::ReadLen => {
                let len = byte as usize;
                if len > HOST_MAX_PAYLOAD {
                    self.reset();
                    return Some(HostEvent::Rejected(NakCode::InvalidPayload));
                }
                self.expected_len = len;
                self.payload.clear();
                self.phase = if len == 0 {
                    ParsePhase::ReadChecksum
                } else {
                    ParsePhase::ReadPayload
                };
                None
            },
            ParsePhase::ReadPayload => {
                self.payload.push(byte);
                if self.payload.len() >= self.expected_len {
                    self.phase = ParsePhase::ReadChecksum;
                }
                None
            },
            ParsePhase::ReadChecksum => {
                let packet = HostPacket {
                    cmd: self.cmd,
                    payload: std::mem::take(&mut self.payload),
                };
                self.reset();
                if packet.checksum() == byte {
                    Some(HostEvent::Packet(packet))
                } else {
                    Some(HostEvent::Rejected(NakCode::BadChecksum))
                }
            },
        }
    }

    pub fn reset(&mut self) {
        self.phase = ParsePhase::WaitForStart;
        self.expected_len = 0;
        self.payload.clear();
    }
}
