//! 传感器初始化状态机
//!
//! 在出厂波特率下把传感器切到高速流模式，然后以高速波特率重新打开串口，
//! 依次发送停止、设置采样率、启动指令。每个状态只做一件事并立即返回，
//! 延时通过比较时间戳实现，不阻塞生产者循环。
//!
//! 任何串口错误都会置位 init-failed 并从 `Startup` 重新开始。

use crate::context::LidarContext;
use lidar_hal::{HalError, SerialPort};
use lidar_protocol::{ErrorFlag, SENSOR_FACTORY_BAUD, SENSOR_STREAM_BAUD, SensorCommand};
use lidar_tools::SampleRateMode;
use tracing::{debug, error, info, warn};

/// 发送波特率指令后等待多久再发送保存指令
const SAVE_SETTINGS_DELAY_MS: u64 = 100;

/// 保存指令后等待传感器切换波特率的时间
const BAUD_SWITCH_WAIT_MS: u64 = 1_000;

/// 初始化状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BringUpState {
    #[default]
    Startup,
    SerialInitLow,
    SetBaudRate,
    SaveSettings,
    BaudRateWait,
    SerialInitHigh,
    LidarStop,
    LidarRate,
    LidarEnable,
    LidarCleanup,
    /// 终态：传感器正在输出数据
    Ready,
}

impl BringUpState {
    pub fn name(self) -> &'static str {
        match self {
            BringUpState::Startup => "startup",
            BringUpState::SerialInitLow => "serial_init_low",
            BringUpState::SetBaudRate => "set_baud_rate",
            BringUpState::SaveSettings => "save_settings",
            BringUpState::BaudRateWait => "baud_rate_wait",
            BringUpState::SerialInitHigh => "serial_init_high",
            BringUpState::LidarStop => "lidar_stop",
            BringUpState::LidarRate => "lidar_rate",
            BringUpState::LidarEnable => "lidar_enable",
            BringUpState::LidarCleanup => "lidar_cleanup",
            BringUpState::Ready => "ready",
        }
    }
}

/// 传感器初始化状态机
#[derive(Debug, Clone)]
pub struct SensorBringUp {
    state: BringUpState,
    state_since_ms: u64,
    /// 高速串口打开的时刻，用于统计初始化耗时
    stream_open_ms: u64,
    sample_rate: SampleRateMode,
}

impl SensorBringUp {
    pub fn new(sample_rate: SampleRateMode, now_ms: u64) -> Self {
        Self {
            state: BringUpState::Startup,
            state_since_ms: now_ms,
            stream_open_ms: now_ms,
            sample_rate,
        }
    }

    pub fn state(&self) -> BringUpState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == BringUpState::Ready
    }

    /// 从第一个状态重新开始
    pub fn restart(&mut self, ctx: &LidarContext, now_ms: u64) {
        info!("Restarting sensor bring-up");
        ctx.status.update(|s| s.sensor_initialized = false);
        self.transition(BringUpState::Startup, now_ms);
    }

    fn transition(&mut self, next: BringUpState, now_ms: u64) {
        debug!(from = self.state.name(), to = next.name(), "Bring-up transition");
        self.state = next;
        self.state_since_ms = now_ms;
    }

    fn elapsed(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.state_since_ms)
    }

    fn send<S: SerialPort + ?Sized>(port: &mut S, cmd: SensorCommand) -> Result<(), HalError> {
        let bytes = cmd.encode();
        debug!(?cmd, bytes = %hex::encode(&bytes), "Sending sensor command");
        port.write_all(&bytes)
    }

    /// 推进一步，返回是否已就绪
    pub fn step<S: SerialPort + ?Sized>(
        &mut self,
        port: &mut S,
        ctx: &LidarContext,
        now_ms: u64,
    ) -> bool {
        if self.state == BringUpState::Ready {
            return true;
        }
        if let Err(e) = self.advance(port, ctx, now_ms) {
            if e.is_fatal() {
                error!(
                    state = self.state.name(),
                    "Sensor bring-up failed, retrying will not help: {}", e
                );
            } else {
                warn!(
                    state = self.state.name(),
                    "Sensor bring-up failed, restarting: {}", e
                );
            }
            ctx.set_flag(ErrorFlag::InitFailed, true);
            self.restart(ctx, now_ms);
        }
        self.is_ready()
    }

    fn advance<S: SerialPort + ?Sized>(
        &mut self,
        port: &mut S,
        ctx: &LidarContext,
        now_ms: u64,
    ) -> Result<(), HalError> {
        let settings = ctx.settings();
        match self.state {
            BringUpState::Startup => {
                if self.elapsed(now_ms) >= settings.startup_delay_ms as u64 {
                    self.transition(BringUpState::SerialInitLow, now_ms);
                }
            },
            BringUpState::SerialInitLow => {
                port.begin(SENSOR_FACTORY_BAUD)?;
                debug!(baud = SENSOR_FACTORY_BAUD, "Sensor port opened");
                self.transition(BringUpState::SetBaudRate, now_ms);
            },
            BringUpState::SetBaudRate => {
                Self::send(port, SensorCommand::SetBaudRate(SENSOR_STREAM_BAUD))?;
                self.transition(BringUpState::SaveSettings, now_ms);
            },
            BringUpState::SaveSettings => {
                if self.elapsed(now_ms) >= SAVE_SETTINGS_DELAY_MS {
                    Self::send(port, SensorCommand::SaveSettings)?;
                    self.transition(BringUpState::BaudRateWait, now_ms);
                }
            },
            BringUpState::BaudRateWait => {
                if self.elapsed(now_ms) >= BAUD_SWITCH_WAIT_MS {
                    self.transition(BringUpState::SerialInitHigh, now_ms);
                }
            },
            BringUpState::SerialInitHigh => {
                port.begin(SENSOR_STREAM_BAUD)?;
                self.stream_open_ms = now_ms;
                debug!(baud = SENSOR_STREAM_BAUD, "Sensor port reopened");
                Self::send(port, SensorCommand::Stop)?;
                self.transition(BringUpState::LidarStop, now_ms);
            },
            BringUpState::LidarStop => {
                if self.elapsed(now_ms) >= settings.lidar_init_step_delay_ms as u64 {
                    let hz = self.sample_rate.rate_hz();
                    debug!(hz, "Setting sample rate");
                    Self::send(port, SensorCommand::SetSampleRate(hz))?;
                    self.transition(BringUpState::LidarRate, now_ms);
                }
            },
            BringUpState::LidarRate => {
                if self.elapsed(now_ms) >= settings.lidar_init_step_delay_ms as u64 {
                    Self::send(port, SensorCommand::Start)?;
                    self.transition(BringUpState::LidarEnable, now_ms);
                }
            },
            BringUpState::LidarEnable => {
                if self.elapsed(now_ms) >= settings.lidar_final_delay_ms as u64 {
                    let discarded = port.discard_input();
                    debug!(discarded, "Cleared sensor input");
                    self.transition(BringUpState::LidarCleanup, now_ms);
                }
            },
            BringUpState::LidarCleanup => {
                ctx.status.update(|s| {
                    s.sensor_initialized = true;
                    s.last_frame_ms = now_ms;
                });
                info!(
                    elapsed_ms = now_ms.saturating_sub(self.stream_open_ms),
                    "Sensor initialized"
                );
                self.transition(BringUpState::Ready, now_ms);
            },
            BringUpState::Ready => {},
        }
        Ok(())
    }
}
