//! 消费者循环
//!
//! 负责：
//! - 自身的初始化状态机（启动延时 → 引脚 → 加载配置 → 判断是否进入配置模式 → 就绪）
//! - 配置模式：处理上位机指令，队列中的帧直接丢弃
//! - 运行模式：读取选择开关，每轮最多处理 5 帧（速度估计 → 触发判定 → 输出引脚）
//! - 状态灯、调试输出与周期统计

use crate::clock::{Clock, Throttle};
use crate::context::LidarContext;
use crate::hooks::TriggerEvent;
use crate::host::{HostAction, HostCommandHandler};
use crate::mode::SystemMode;
use crate::status::StatusIndicator;
use crate::trigger::{TriggerPipeline, evaluate_raw};
use crate::velocity::{Deadbands, VelocityEstimator};
use lidar_hal::{OutputPin, SelectorInput, SerialPort};
use lidar_protocol::ErrorFlag;
use lidar_tools::ConfigStore;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, trace};

/// 每轮最多处理的帧数
pub const MAX_FRAMES_PER_ITERATION: usize = 5;

/// 选择开关读取间隔
pub const SELECTOR_READ_INTERVAL_MS: u64 = 10;

/// 上电后等待多久再初始化引脚
const STARTUP_DELAY_MS: u64 = 500;

/// 两次循环之间的让出时间
const LOOP_YIELD_US: u64 = 50;

/// 消费者初始化状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsumerStage {
    #[default]
    Startup,
    PinsInit,
    ConfigLoad,
    ConfigModeCheck,
    /// 终态：已通知生产者
    Ready,
}

/// 消费者使用的外设
pub struct ConsumerDevices {
    /// 上位机串口（配置协议）
    pub host: Box<dyn SerialPort + Send>,
    /// 触发输出（低电平有效）
    pub trigger: Box<dyn OutputPin + Send>,
    pub selector: Box<dyn SelectorInput + Send>,
    /// 状态灯（可选）
    pub status_led: Option<Box<dyn OutputPin + Send>>,
    pub store: Box<dyn ConfigStore>,
}

/// 消费者循环状态
pub struct ConsumerLoop {
    host: Box<dyn SerialPort + Send>,
    trigger: Box<dyn OutputPin + Send>,
    selector: Box<dyn SelectorInput + Send>,
    status_led: Option<Box<dyn OutputPin + Send>>,
    handler: HostCommandHandler,

    stage: ConsumerStage,
    stage_since_ms: u64,

    estimator: VelocityEstimator,
    pipeline: TriggerPipeline,
    current_selector: u8,
    last_selector_read_ms: Option<u64>,

    indicator: StatusIndicator,
    debug_output: Throttle,
    perf_report: Throttle,
    status_report: Throttle,
    frames_since_report: u32,
}

impl std::fmt::Debug for ConsumerLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerLoop")
            .field("stage", &self.stage)
            .field("current_selector", &self.current_selector)
            .field("frames_since_report", &self.frames_since_report)
            .finish_non_exhaustive()
    }
}

impl ConsumerLoop {
    pub fn new(devices: ConsumerDevices, ctx: &LidarContext, now_ms: u64) -> Self {
        let settings = ctx.settings();
        Self {
            host: devices.host,
            trigger: devices.trigger,
            selector: devices.selector,
            status_led: devices.status_led,
            handler: HostCommandHandler::new(devices.store),
            stage: ConsumerStage::Startup,
            stage_since_ms: now_ms,
            estimator: VelocityEstimator::new(),
            pipeline: TriggerPipeline::new(),
            current_selector: 0,
            last_selector_read_ms: None,
            indicator: StatusIndicator::new(),
            debug_output: Throttle::new(settings.debug_output_interval_ms as u64),
            perf_report: Throttle::new(settings.performance_report_interval_ms as u64),
            status_report: Throttle::new(settings.status_check_interval_ms as u64),
            frames_since_report: 0,
        }
    }

    pub fn stage(&self) -> ConsumerStage {
        self.stage
    }

    pub fn is_ready(&self) -> bool {
        self.stage == ConsumerStage::Ready
    }

    /// 执行一轮
    pub fn step(&mut self, ctx: &LidarContext, now_us: u64) {
        let now_ms = now_us / 1_000;
        if self.stage != ConsumerStage::Ready {
            self.advance(ctx, now_ms);
        }
        self.update_indicator(ctx, now_ms);

        if self.stage == ConsumerStage::Ready {
            match ctx.system_mode() {
                SystemMode::Config => self.service_config(ctx, now_ms),
                SystemMode::Running => self.run(ctx, now_us),
                SystemMode::Init => {},
            }
        }

        self.report(ctx, now_ms);
    }

    /// 从第一个状态重新初始化（上位机 `R` / `F`）
    pub fn restart(&mut self, ctx: &LidarContext, now_ms: u64) {
        info!("Restarting consumer");
        self.trigger.set_active(false);
        self.pipeline.reset();
        self.estimator.reset();
        self.handler.reset_parser();
        ctx.set_system_mode(SystemMode::Init);
        ctx.status.update(|s| {
            s.consumer_ready = false;
            s.config_mode_active = false;
            s.trigger_active = false;
        });
        self.transition(ConsumerStage::Startup, now_ms);
    }

    /// 退出前调用：输出回到无效
    pub fn shutdown(&mut self, ctx: &LidarContext) {
        self.trigger.set_active(false);
        if let Some(led) = self.status_led.as_mut() {
            led.set_active(false);
        }
        ctx.status.update(|s| s.trigger_active = false);
    }

    fn transition(&mut self, next: ConsumerStage, now_ms: u64) {
        debug!(from = ?self.stage, to = ?next, "Consumer transition");
        self.stage = next;
        self.stage_since_ms = now_ms;
    }

    fn advance(&mut self, ctx: &LidarContext, now_ms: u64) {
        let elapsed = now_ms.saturating_sub(self.stage_since_ms);
        match self.stage {
            ConsumerStage::Startup => {
                if elapsed >= STARTUP_DELAY_MS {
                    self.transition(ConsumerStage::PinsInit, now_ms);
                }
            },
            ConsumerStage::PinsInit => {
                self.trigger.set_active(false);
                if let Some(led) = self.status_led.as_mut() {
                    led.set_active(false);
                }
                self.transition(ConsumerStage::ConfigLoad, now_ms);
            },
            ConsumerStage::ConfigLoad => {
                self.handler.load_config(ctx);
                self.transition(ConsumerStage::ConfigModeCheck, now_ms);
            },
            ConsumerStage::ConfigModeCheck => {
                if self.host.available() > 0 {
                    info!("Host input detected, entering configuration mode (restart to exit)");
                    self.enter_ready(ctx, SystemMode::Config, now_ms);
                } else if elapsed >= ctx.settings().config_mode_timeout_ms as u64 {
                    info!("No host input, entering normal operation");
                    self.enter_ready(ctx, SystemMode::Running, now_ms);
                }
            },
            ConsumerStage::Ready => {},
        }
    }

    fn enter_ready(&mut self, ctx: &LidarContext, mode: SystemMode, now_ms: u64) {
        let config_mode = mode == SystemMode::Config;
        ctx.status.update(|s| {
            s.config_mode_active = config_mode;
            s.consumer_ready = true;
        });
        ctx.set_system_mode(mode);
        self.transition(ConsumerStage::Ready, now_ms);
        info!(?mode, "Consumer ready");
    }

    fn service_config(&mut self, ctx: &LidarContext, now_ms: u64) {
        let action = self.handler.service(&mut self.host, ctx, now_ms);

        let mut discarded = 0usize;
        while ctx.dequeue_frame().is_some() {
            discarded += 1;
        }
        if discarded > 0 {
            trace!(discarded, "Discarded frames in configuration mode");
        }

        if action == HostAction::Restart {
            self.restart(ctx, now_ms);
        }
    }

    fn run(&mut self, ctx: &LidarContext, now_us: u64) {
        let now_ms = now_us / 1_000;

        let read_due = self
            .last_selector_read_ms
            .is_none_or(|last| now_ms.saturating_sub(last) >= SELECTOR_READ_INTERVAL_MS);
        if read_due {
            let code = self.selector.read_code() & 0x07;
            if code != self.current_selector {
                debug!(from = self.current_selector, to = code, "Selector changed");
            }
            self.current_selector = code;
            self.last_selector_read_ms = Some(now_ms);
            ctx.status.update(|s| s.selector = code);
        }

        let config = ctx.config();
        let deadbands = Deadbands {
            distance_cm: config.settings.distance_deadband_threshold_cm,
            velocity_cm_s: config.settings.velocity_deadband_threshold_cm_s,
        };
        let row = config.table.row(self.current_selector);

        for _ in 0..MAX_FRAMES_PER_ITERATION {
            let Some(frame) = ctx.dequeue_frame() else {
                break;
            };
            self.frames_since_report = self.frames_since_report.wrapping_add(1);

            self.estimator.add_frame(frame);
            let reading = self.estimator.calculate_velocity(now_us, deadbands);
            if let Some(calc_error) = reading.calc_error {
                ctx.set_flag(ErrorFlag::VelocityCalcError, calc_error);
            }

            let raw = evaluate_raw(
                row,
                config.table.use_velocity_trigger,
                frame.distance,
                reading.velocity,
            );
            let decision = self.pipeline.update(raw, now_ms);
            self.trigger.set_active(decision.output);

            if decision.rising_edge {
                info!(
                    distance = frame.distance,
                    velocity = reading.velocity,
                    selector = self.current_selector,
                    "TRIGGER"
                );
                ctx.fire_trigger_hooks(&TriggerEvent {
                    timestamp_us: frame.timestamp_us,
                    distance: frame.distance,
                    strength: frame.strength,
                    velocity: reading.velocity,
                    selector: self.current_selector,
                });
            }

            ctx.status.update(|s| {
                s.trigger_active = decision.output;
                s.latest_velocity = reading.velocity;
                s.latest_distance = frame.distance;
                s.latest_strength = frame.strength;
            });
        }

        // 没有新帧时保持同样按时释放
        if self.pipeline.tick(now_ms) {
            debug!("Trigger latch expired without new frames");
            self.trigger.set_active(false);
            ctx.status.update(|s| s.trigger_active = false);
        }
    }

    fn update_indicator(&mut self, ctx: &LidarContext, now_ms: u64) {
        let Some(led) = self.status_led.as_mut() else {
            return;
        };
        if let Some(lit) = self.indicator.update(&ctx.status.snapshot(), now_ms) {
            led.set_active(lit);
        }
    }

    fn report(&mut self, ctx: &LidarContext, now_ms: u64) {
        let settings = ctx.settings();
        let snap = ctx.status.snapshot();
        let running = self.is_ready() && ctx.system_mode() == SystemMode::Running;

        self.debug_output
            .set_interval(settings.debug_output_interval_ms as u64);
        if running && snap.debug_enabled && self.debug_output.ready(now_ms) {
            info!(
                "Velocity={:6.1}cm/s Strength={:5} Dist={:4}cm Errors=0x{:02x} Trigger={}",
                snap.latest_velocity,
                snap.latest_strength,
                snap.latest_distance,
                snap.error_flags.bits(),
                if snap.trigger_active { "ACTIVE" } else { "INACTIVE" }
            );
        }

        let interval = settings.performance_report_interval_ms as u64;
        self.perf_report.set_interval(interval);
        if self.perf_report.ready(now_ms) {
            if snap.debug_enabled && self.frames_since_report > 0 {
                info!(
                    "Processed {} frames in last {} ms",
                    self.frames_since_report, interval
                );
            }
            self.frames_since_report = 0;
        }

        self.status_report
            .set_interval(settings.status_check_interval_ms as u64);
        if self.status_report.ready(now_ms) {
            debug!(
                stage = ?self.stage,
                mode = ?ctx.system_mode(),
                selector = snap.selector,
                processed = snap.frames_processed,
                trigger = snap.trigger_active,
                "Consumer status"
            );
        }
    }
}

/// 消费者线程主函数
///
/// 每轮执行一次 [`ConsumerLoop::step`]，之间短暂让出 CPU；
/// `is_running` 变为 false 后把输出置为无效并退出。
pub fn consumer_loop(
    mut consumer: ConsumerLoop,
    ctx: Arc<LidarContext>,
    clock: Arc<dyn Clock>,
    is_running: Arc<AtomicBool>,
) {
    #[cfg(feature = "realtime")]
    {
        use thread_priority::*;
        use tracing::warn;

        match set_current_thread_priority(ThreadPriority::Max) {
            Ok(_) => {
                info!("Consumer thread priority set to MAX (realtime)");
            },
            Err(e) => {
                warn!(
                    "Failed to set consumer thread priority: {}. \
                    On Linux, you may need to run with CAP_SYS_NICE or use rtkit.",
                    e
                );
            },
        }
    }

    loop {
        // Acquire: If we see false, we must see all cleanup writes from other threads
        if !is_running.load(Ordering::Acquire) {
            trace!("Consumer thread: is_running flag is false, exiting");
            break;
        }
        consumer.step(&ctx, clock.now_us());
        spin_sleep::sleep(Duration::from_micros(LOOP_YIELD_US));
    }

    consumer.shutdown(&ctx);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::LidarFrame;
    use crate::hooks::{TriggerCallback, TriggerEventHook};
    use lidar_hal::mock::{FixedSelector, MockPin, MockSerial};
    use lidar_protocol::HostPacket;
    use lidar_tools::{DeviceConfig, MemoryConfigStore};

    struct Rig {
        consumer: ConsumerLoop,
        ctx: LidarContext,
        host: MockSerial,
        trigger: MockPin,
        led: MockPin,
        selector: FixedSelector,
        store: MemoryConfigStore,
    }

    fn rig_with(config: DeviceConfig) -> Rig {
        let ctx = LidarContext::new(config);
        let host = MockSerial::opened(115_200);
        let trigger = MockPin::new();
        let led = MockPin::new();
        let selector = FixedSelector::new(0);
        let store = MemoryConfigStore::new();
        let devices = ConsumerDevices {
            host: Box::new(host.clone()),
            trigger: Box::new(trigger.clone()),
            selector: Box::new(selector.clone()),
            status_led: Some(Box::new(led.clone())),
            store: Box::new(store.clone()),
        };
        let consumer = ConsumerLoop::new(devices, &ctx, 0);
        Rig {
            consumer,
            ctx,
            host,
            trigger,
            led,
            selector,
            store,
        }
    }

    fn rig() -> Rig {
        let mut config = DeviceConfig::default();
        config.settings.config_mode_timeout_ms = 1_000;
        rig_with(config)
    }

    /// 以 1ms 步长推进到 `until_ms`
    fn run_until(rig: &mut Rig, from_ms: u64, until_ms: u64) {
        for t in from_ms..=until_ms {
            rig.consumer.step(&rig.ctx, t * 1_000);
        }
    }

    fn frame(distance: u16, ts_us: u64) -> LidarFrame {
        LidarFrame {
            distance,
            strength: 800,
            temperature: 0,
            timestamp_us: ts_us,
            valid: true,
        }
    }

    #[test]
    fn test_bringup_enters_running_after_timeout() {
        let mut rig = rig();
        run_until(&mut rig, 0, 499);
        assert_eq!(rig.consumer.stage(), ConsumerStage::Startup);
        run_until(&mut rig, 500, 502);
        assert_eq!(rig.consumer.stage(), ConsumerStage::ConfigModeCheck);
        assert!(!rig.ctx.status.snapshot().consumer_ready);

        run_until(&mut rig, 503, 1_502);
        assert!(rig.consumer.is_ready());
        assert_eq!(rig.ctx.system_mode(), SystemMode::Running);
        let snap = rig.ctx.status.snapshot();
        assert!(snap.consumer_ready);
        assert!(!snap.config_mode_active);
        assert!(rig.trigger.line_level_high());
    }

    #[test]
    fn test_host_byte_enters_config_mode_and_drains_queue() {
        let mut rig = rig();
        run_until(&mut rig, 0, 600);
        rig.host.feed(&HostPacket::new(b'M', &[]).unwrap().encode());
        rig.consumer.step(&rig.ctx, 601_000);
        assert_eq!(rig.ctx.system_mode(), SystemMode::Config);
        assert!(rig.ctx.status.is_config_mode());

        rig.ctx.enqueue_frame(frame(50, 601_500));
        rig.ctx.enqueue_frame(frame(50, 601_600));
        rig.consumer.step(&rig.ctx, 602_000);
        assert!(rig.ctx.queue.is_empty());
        assert!(!rig.trigger.is_active());

        let written = rig.host.take_written();
        assert_eq!(written, HostPacket::new(b'M', &[2]).unwrap().encode().to_vec());
    }

    #[test]
    fn test_host_restart_reruns_bringup() {
        let mut rig = rig();
        run_until(&mut rig, 0, 600);
        rig.host.feed(&[0x7E]);
        rig.consumer.step(&rig.ctx, 601_000);
        assert_eq!(rig.ctx.system_mode(), SystemMode::Config);

        rig.host.feed(&[b'R', 0x00, b'R']);
        rig.consumer.step(&rig.ctx, 602_000);
        assert_eq!(rig.consumer.stage(), ConsumerStage::Startup);
        assert_eq!(rig.ctx.system_mode(), SystemMode::Init);
        assert!(!rig.ctx.status.snapshot().consumer_ready);
        assert_eq!(rig.host.take_written(), HostPacket::ack(b'R').encode().to_vec());

        run_until(&mut rig, 603, 2_200);
        assert_eq!(rig.ctx.system_mode(), SystemMode::Running);
    }

    #[test]
    fn test_loads_stored_config() {
        let mut rig = rig();
        let mut stored = DeviceConfig::default();
        stored.table.use_velocity_trigger = false;
        stored.table.rows[0].distance_threshold_cm = 150;
        rig.store = MemoryConfigStore::with_config(stored);
        let devices = ConsumerDevices {
            host: Box::new(rig.host.clone()),
            trigger: Box::new(rig.trigger.clone()),
            selector: Box::new(rig.selector.clone()),
            status_led: None,
            store: Box::new(rig.store.clone()),
        };
        rig.consumer = ConsumerLoop::new(devices, &rig.ctx, 0);
        run_until(&mut rig, 0, 510);
        assert_eq!(rig.ctx.config().table.rows[0].distance_threshold_cm, 150);
        assert!(!rig.ctx.config().table.use_velocity_trigger);
    }

    #[test]
    fn test_latch_releases_when_frames_stop() {
        let mut config = DeviceConfig::default();
        config.settings.config_mode_timeout_ms = 1_000;
        config.table.use_velocity_trigger = false;
        let mut rig = rig_with(config);
        rig.selector.set(2); // 200 cm
        run_until(&mut rig, 0, 1_600);

        let mut latched_at = None;
        for t in 1_601..1_700u64 {
            rig.ctx.enqueue_frame(frame(150, t * 1_000));
            rig.consumer.step(&rig.ctx, t * 1_000);
            if latched_at.is_none() && rig.trigger.is_active() {
                latched_at = Some(t);
            }
        }
        let latched_at = latched_at.unwrap();

        // 传感器沉默：保持满 3000ms 后释放，之后不再有效
        run_until(&mut rig, 1_700, latched_at + 2_999);
        assert!(rig.trigger.is_active());
        assert!(rig.ctx.status.snapshot().trigger_active);
        run_until(&mut rig, latched_at + 3_000, 10_000);
        assert!(!rig.trigger.is_active());
        assert!(!rig.ctx.status.snapshot().trigger_active);
        assert_eq!(rig.trigger.transitions(), vec![true, false]);
    }

    #[test]
    fn test_distance_only_trigger_latches() {
        let mut config = DeviceConfig::default();
        config.settings.config_mode_timeout_ms = 1_000;
        config.table.use_velocity_trigger = false;
        let mut rig = rig_with(config);
        rig.selector.set(2); // 200 cm
        run_until(&mut rig, 0, 1_600);
        assert_eq!(rig.ctx.system_mode(), SystemMode::Running);

        let (hook, rx) = TriggerEventHook::new();
        rig.ctx
            .hooks
            .write()
            .add_callback(Arc::new(hook) as Arc<dyn TriggerCallback>);

        // 150 cm，每毫秒一帧
        let mut first_active = None;
        for t in 1_601..1_700u64 {
            rig.ctx.enqueue_frame(frame(150, t * 1_000));
            rig.consumer.step(&rig.ctx, t * 1_000);
            if first_active.is_none() && rig.trigger.is_active() {
                first_active = Some(t);
            }
        }
        assert_eq!(first_active, Some(1_631));
        assert_eq!(rig.ctx.status.snapshot().selector, 2);

        // 目标离开后仍保持 3000ms
        for t in 1_700..4_630u64 {
            rig.ctx.enqueue_frame(frame(900, t * 1_000));
            rig.consumer.step(&rig.ctx, t * 1_000);
            assert!(rig.trigger.is_active(), "released early at {}", t);
        }
        for t in 4_630..4_700u64 {
            rig.ctx.enqueue_frame(frame(900, t * 1_000));
            rig.consumer.step(&rig.ctx, t * 1_000);
        }
        assert!(!rig.trigger.is_active());
        assert_eq!(rig.trigger.transitions(), vec![true, false]);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.distance, 150);
        assert_eq!(event.selector, 2);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_at_most_five_frames_per_iteration() {
        let mut rig = rig();
        run_until(&mut rig, 0, 1_600);
        for i in 0..12 {
            rig.ctx.enqueue_frame(frame(900, 1_600_000 + i));
        }
        rig.consumer.step(&rig.ctx, 1_601_000);
        assert_eq!(rig.ctx.queue.len(), 7);
        rig.consumer.step(&rig.ctx, 1_602_000);
        assert_eq!(rig.ctx.queue.len(), 2);
        let snap = rig.ctx.status.snapshot();
        assert_eq!(snap.frames_processed, 10);
        assert_eq!(snap.latest_distance, 900);
    }

    #[test]
    fn test_status_led_blinks_fast_in_config_mode() {
        let mut rig = rig();
        run_until(&mut rig, 0, 600);
        rig.host.feed(&[0x7E]);
        run_until(&mut rig, 601, 1_200);
        // 1000ms 间隔下最多翻转一次；配置模式下每 101ms 翻转一次
        assert!(rig.led.transitions().len() >= 5);
    }

    #[test]
    fn test_shutdown_releases_output() {
        let mut rig = rig();
        rig.trigger.clone().set_active(true);
        rig.consumer.shutdown(&rig.ctx);
        assert!(rig.trigger.line_level_high());
    }
}
