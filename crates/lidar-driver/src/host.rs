//! 上位机配置指令
//!
//! 只在配置模式下由消费者循环调用。每条指令修改一份当前配置的副本，
//! 成功后整体发布到 [`LidarContext`]，两个循环下一次读取时生效。
//! 修改只在内存中生效，`W` 指令才写入存储。
//!
//! | 指令 | 负载 | 回复 |
//! |------|------|------|
//! | `S` | - | 选择行 u8、接收帧数 u32、错误标志 u32 |
//! | `D` / `d` | - / 行号、u16 | 8 × u16 距离阈值 / ACK |
//! | `V` / `v` | - | 8 × i16 速度下限 / 上限 |
//! | `w` | `'m'`\|`'x'`、行号、i16 | ACK |
//! | `T` / `t` | - / 行号、4 字节 | 8 × 4 规则字节 / ACK |
//! | `M` / `m` | - / 1\|2 | 1 仅距离，2 距离 + 速度 |
//! | `G` / `g` | - / 0\|1 | 调试开关 |
//! | `L` / `l` | - / 56 字节 | 运行参数 |
//! | `W` | - | 校验并保存 |
//! | `R` | - | ACK，然后重新初始化 |
//! | `F` | - | 清除存储并恢复默认，然后重新初始化 |

use crate::context::LidarContext;
use lidar_hal::SerialPort;
use lidar_protocol::{
    ErrorFlag, HostEvent, HostPacket, HostPacketParser, MAX_DISTANCE_CM, MIN_DISTANCE_CM, NakCode,
};
use lidar_tools::{ConfigStore, DeviceConfig, RuntimeSettings, SELECTOR_ROWS};
use tracing::{debug, info, warn};

/// 指令执行后消费者需要采取的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostAction {
    #[default]
    Continue,
    /// 重新执行消费者初始化（`R`、`F`）
    Restart,
}

/// 一条指令的执行结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostReply {
    pub packet: HostPacket,
    pub action: HostAction,
}

impl HostReply {
    fn send(packet: HostPacket) -> Self {
        Self {
            packet,
            action: HostAction::Continue,
        }
    }

    fn nak(code: NakCode) -> Self {
        Self::send(HostPacket::nak(code))
    }

    fn restart(cmd: u8) -> Self {
        Self {
            packet: HostPacket::ack(cmd),
            action: HostAction::Restart,
        }
    }
}

/// 构造数据回复；负载不会超过协议上限，超出时按执行失败处理
fn data_reply(cmd: u8, payload: &[u8]) -> HostReply {
    match HostPacket::new(cmd, payload) {
        Ok(packet) => HostReply::send(packet),
        Err(e) => {
            warn!("Reply for 0x{:02X} not encodable: {}", cmd, e);
            HostReply::nak(NakCode::ExecutionFailed)
        },
    }
}

/// 上位机指令处理器
///
/// 持有协议解析器与配置存储。
pub struct HostCommandHandler {
    parser: HostPacketParser,
    store: Box<dyn ConfigStore>,
}

impl std::fmt::Debug for HostCommandHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostCommandHandler")
            .field("parser", &self.parser)
            .finish_non_exhaustive()
    }
}

impl HostCommandHandler {
    pub fn new(store: Box<dyn ConfigStore>) -> Self {
        Self {
            parser: HostPacketParser::new(),
            store,
        }
    }

    /// 丢弃未完成的数据包
    pub fn reset_parser(&mut self) {
        self.parser.reset();
    }

    /// 从存储加载配置并发布
    ///
    /// 存储为空时保留当前配置；读取失败或内容非法时置位 config-error
    /// 并回退到默认值。采样率在运行期间不可更改，始终沿用当前值。
    /// 返回是否加载到了有效的已保存配置。
    pub fn load_config(&mut self, ctx: &LidarContext) -> bool {
        let sample_rate = ctx.sample_rate();
        let loaded = match self.store.load() {
            Ok(Some(stored)) => match stored.validate() {
                Ok(()) => {
                    if stored.sample_rate != sample_rate {
                        warn!(
                            stored = ?stored.sample_rate,
                            active = ?sample_rate,
                            "Stored sample rate ignored until next start"
                        );
                    }
                    ctx.set_flag(ErrorFlag::ConfigError, false);
                    Some(stored)
                },
                Err(e) => {
                    warn!("Stored configuration invalid, using defaults: {}", e);
                    ctx.set_flag(ErrorFlag::ConfigError, true);
                    None
                },
            },
            Ok(None) => {
                debug!("No stored configuration, keeping current");
                ctx.set_flag(ErrorFlag::ConfigError, false);
                let current = ctx.config();
                ctx.status
                    .update(|s| s.debug_enabled = current.table.enable_debug);
                return false;
            },
            Err(e) => {
                warn!("Failed to load configuration, using defaults: {}", e);
                ctx.set_flag(ErrorFlag::ConfigError, true);
                None
            },
        };

        let found = loaded.is_some();
        let config = DeviceConfig {
            sample_rate,
            ..loaded.unwrap_or_default()
        };
        info!(
            use_velocity = config.table.use_velocity_trigger,
            debug = config.table.enable_debug,
            "Configuration loaded"
        );
        ctx.status
            .update(|s| s.debug_enabled = config.table.enable_debug);
        ctx.publish_config(config);
        found
    }

    /// 读取并处理上位机串口上的全部字节，回复写回同一串口
    pub fn service<S: SerialPort + ?Sized>(
        &mut self,
        port: &mut S,
        ctx: &LidarContext,
        now_ms: u64,
    ) -> HostAction {
        let mut action = HostAction::Continue;

        if let Some(event) = self.parser.check_timeout(now_ms) {
            warn!("Host packet timeout");
            action = self.respond(port, event, ctx);
        }

        while port.available() > 0 {
            let Some(byte) = port.read_byte() else {
                break;
            };
            if let Some(event) = self.parser.push(byte, now_ms)
                && self.respond(port, event, ctx) == HostAction::Restart
            {
                action = HostAction::Restart;
            }
        }
        action
    }

    fn respond<S: SerialPort + ?Sized>(
        &mut self,
        port: &mut S,
        event: HostEvent,
        ctx: &LidarContext,
    ) -> HostAction {
        let reply = match event {
            HostEvent::Packet(packet) => self.execute(&packet, ctx),
            HostEvent::Rejected(code) => {
                debug!(?code, "Host packet rejected");
                HostReply::nak(code)
            },
        };
        if let Err(e) = port.write_all(&reply.packet.encode()) {
            warn!("Failed to send host reply: {}", e);
        }
        reply.action
    }

    /// 执行一条已校验的指令
    pub fn execute(&mut self, packet: &HostPacket, ctx: &LidarContext) -> HostReply {
        debug!("Executing host command 0x{:02X}", packet.cmd);
        let payload = packet.payload.as_slice();
        let current = ctx.config();

        match packet.cmd {
            b'S' => {
                let snap = ctx.status.snapshot();
                let mut out = [0u8; 9];
                out[0] = snap.selector;
                out[1..5].copy_from_slice(&snap.frames_received.to_le_bytes());
                out[5..9].copy_from_slice(&(snap.error_flags.bits() as u32).to_le_bytes());
                data_reply(b'S', &out)
            },
            b'D' => {
                let out: Vec<u8> = current
                    .table
                    .rows
                    .iter()
                    .flat_map(|r| r.distance_threshold_cm.to_le_bytes())
                    .collect();
                data_reply(b'D', &out)
            },
            b'd' => {
                let [pos, lo, hi] = payload else {
                    return HostReply::nak(NakCode::InvalidPayload);
                };
                let value = u16::from_le_bytes([*lo, *hi]);
                if (*pos as usize) >= SELECTOR_ROWS
                    || !(MIN_DISTANCE_CM..=MAX_DISTANCE_CM).contains(&value)
                {
                    return HostReply::nak(NakCode::InvalidPayload);
                }
                self.edit(ctx, b'd', |config| {
                    config.table.rows[*pos as usize].distance_threshold_cm = value;
                })
            },
            b'V' => {
                let out: Vec<u8> = current
                    .table
                    .rows
                    .iter()
                    .flat_map(|r| r.velocity_min_cm_s.to_le_bytes())
                    .collect();
                data_reply(b'V', &out)
            },
            b'v' => {
                let out: Vec<u8> = current
                    .table
                    .rows
                    .iter()
                    .flat_map(|r| r.velocity_max_cm_s.to_le_bytes())
                    .collect();
                data_reply(b'v', &out)
            },
            b'w' => {
                let [kind, pos, lo, hi] = payload else {
                    return HostReply::nak(NakCode::InvalidPayload);
                };
                let value = i16::from_le_bytes([*lo, *hi]);
                let row = *pos as usize;
                if row >= SELECTOR_ROWS || !matches!(kind, b'm' | b'x') {
                    return HostReply::nak(NakCode::InvalidPayload);
                }
                let is_min = *kind == b'm';
                self.edit(ctx, b'w', |config| {
                    let r = &mut config.table.rows[row];
                    if is_min {
                        r.velocity_min_cm_s = value;
                    } else {
                        r.velocity_max_cm_s = value;
                    }
                })
            },
            b'T' => {
                let out: Vec<u8> = current
                    .table
                    .rows
                    .iter()
                    .flat_map(|r| r.trigger_rule)
                    .collect();
                data_reply(b'T', &out)
            },
            b't' => {
                let [pos, rule @ ..] = payload else {
                    return HostReply::nak(NakCode::InvalidPayload);
                };
                let row = *pos as usize;
                let Ok(rule) = <[u8; 4]>::try_from(rule) else {
                    return HostReply::nak(NakCode::InvalidPayload);
                };
                if row >= SELECTOR_ROWS {
                    return HostReply::nak(NakCode::InvalidPayload);
                }
                self.edit(ctx, b't', |config| config.table.rows[row].trigger_rule = rule)
            },
            b'M' => {
                let mode = if current.table.use_velocity_trigger { 2 } else { 1 };
                data_reply(b'M', &[mode])
            },
            b'm' => match payload {
                [mode @ (1 | 2)] => {
                    let use_velocity = *mode == 2;
                    self.edit(ctx, b'm', |config| {
                        config.table.use_velocity_trigger = use_velocity
                    })
                },
                _ => HostReply::nak(NakCode::InvalidPayload),
            },
            b'G' => data_reply(b'G', &[current.table.enable_debug as u8]),
            b'g' => match payload {
                [flag @ (0 | 1)] => {
                    let enabled = *flag == 1;
                    let reply = self.edit(ctx, b'g', |config| config.table.enable_debug = enabled);
                    ctx.status.update(|s| s.debug_enabled = enabled);
                    reply
                },
                _ => HostReply::nak(NakCode::InvalidPayload),
            },
            b'L' => data_reply(b'L', &current.settings.to_wire_bytes()),
            b'l' => {
                let Some(settings) = RuntimeSettings::from_wire_bytes(payload) else {
                    return HostReply::nak(NakCode::InvalidPayload);
                };
                if let Err(e) = settings.validate() {
                    warn!("Rejected runtime settings: {}", e);
                    return HostReply::nak(NakCode::InvalidPayload);
                }
                info!("Runtime settings updated");
                self.edit(ctx, b'l', |config| config.settings = settings)
            },
            b'W' => self.save(ctx),
            b'R' => {
                info!("Restart requested by host");
                HostReply::restart(b'R')
            },
            b'F' => {
                info!("Factory reset requested by host");
                if let Err(e) = self.store.reset() {
                    warn!("Failed to clear stored configuration: {}", e);
                }
                ctx.publish_config(DeviceConfig {
                    sample_rate: ctx.sample_rate(),
                    ..Default::default()
                });
                ctx.set_flag(ErrorFlag::ConfigError, false);
                HostReply::restart(b'F')
            },
            other => {
                warn!("Unknown host command 0x{:02X}", other);
                HostReply::nak(NakCode::UnknownCommand)
            },
        }
    }

    /// 修改当前配置的副本并发布
    fn edit(
        &mut self,
        ctx: &LidarContext,
        cmd: u8,
        f: impl FnOnce(&mut DeviceConfig),
    ) -> HostReply {
        let mut config = DeviceConfig::clone(&ctx.config());
        f(&mut config);
        ctx.publish_config(config);
        HostReply::send(HostPacket::ack(cmd))
    }

    fn save(&mut self, ctx: &LidarContext) -> HostReply {
        let config = ctx.config();
        if let Err(e) = config.validate() {
            warn!("Cannot save invalid configuration: {}", e);
            ctx.set_flag(ErrorFlag::ConfigError, true);
            return HostReply::nak(NakCode::ExecutionFailed);
        }
        ctx.set_flag(ErrorFlag::ConfigError, false);
        match self.store.save(&config) {
            Ok(()) => {
                info!("Configuration saved");
                HostReply::send(HostPacket::ack(b'W'))
            },
            Err(e) => {
                warn!("Failed to save configuration: {}", e);
                HostReply::nak(NakCode::ExecutionFailed)
            },
        }
    }
}
