//! 生产者循环
//!
//! 每轮依次：
//! 1. 推进传感器初始化状态机
//! 2. 传感器与消费者都就绪后，执行健康监测（配置模式下暂停）
//! 3. 读取串口字节并入队
//! 4. 周期性状态日志

use crate::acquisition::{FrameAcquisitionEngine, PollSummary};
use crate::bringup::SensorBringUp;
use crate::clock::{Clock, Throttle};
use crate::context::LidarContext;
use crate::recovery::{RecoveryOutcome, RecoverySupervisor};
use lidar_hal::SerialPort;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, trace};

/// 两次循环之间的让出时间
const LOOP_YIELD_US: u64 = 50;

/// 配置模式下"监测已暂停"提示的间隔
const CONFIG_MODE_NOTICE_INTERVAL_MS: u64 = 10_000;

/// 生产者循环状态
pub struct ProducerLoop {
    sensor: Box<dyn SerialPort + Send>,
    bringup: SensorBringUp,
    engine: FrameAcquisitionEngine,
    supervisor: RecoverySupervisor,
    config_notice: Throttle,
    status_report: Throttle,
}

impl std::fmt::Debug for ProducerLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerLoop")
            .field("bringup", &self.bringup)
            .field("engine", &self.engine)
            .field("supervisor", &self.supervisor)
            .finish_non_exhaustive()
    }
}

impl ProducerLoop {
    pub fn new(sensor: Box<dyn SerialPort + Send>, ctx: &LidarContext, now_ms: u64) -> Self {
        let sample_rate = ctx.sample_rate();
        let settings = ctx.settings();
        Self {
            sensor,
            bringup: SensorBringUp::new(sample_rate, now_ms),
            engine: FrameAcquisitionEngine::new(
                sample_rate.default_frame_timeout_us(),
                settings.critical_error_report_interval_ms as u64,
            ),
            supervisor: RecoverySupervisor::new(),
            config_notice: Throttle::new(CONFIG_MODE_NOTICE_INTERVAL_MS),
            status_report: Throttle::new(settings.status_check_interval_ms as u64),
        }
    }

    pub fn bringup(&self) -> &SensorBringUp {
        &self.bringup
    }

    pub fn engine(&self) -> &FrameAcquisitionEngine {
        &self.engine
    }

    pub fn supervisor(&self) -> &RecoverySupervisor {
        &self.supervisor
    }

    /// 执行一轮，采集数据时返回本轮统计
    pub fn step(&mut self, ctx: &LidarContext, now_us: u64) -> Option<PollSummary> {
        let now_ms = now_us / 1_000;
        let sensor_ready = self.bringup.step(&mut self.sensor, ctx, now_ms);
        let snap = ctx.status.snapshot();

        let mut summary = None;
        if sensor_ready && snap.consumer_ready {
            if snap.config_mode_active {
                if self.config_notice.ready(now_ms) {
                    info!("Configuration mode active, health monitoring suspended");
                }
            } else if self.supervise(ctx, now_ms) == RecoveryOutcome::RestartBringUp {
                self.report(ctx, now_ms);
                return None;
            }

            let settings = ctx.settings();
            self.engine
                .set_report_interval(settings.critical_error_report_interval_ms as u64);
            summary = Some(self.engine.poll(&mut self.sensor, ctx, now_us));
        }

        self.report(ctx, now_ms);
        summary
    }

    fn supervise(&mut self, ctx: &LidarContext, now_ms: u64) -> RecoveryOutcome {
        let outcome = self.supervisor.supervise(&mut self.sensor, ctx, now_ms);
        match outcome {
            RecoveryOutcome::RestartBringUp => {
                self.bringup.restart(ctx, now_ms);
                self.engine.reset_parser();
                self.supervisor.rearm();
            },
            RecoveryOutcome::Idle | RecoveryOutcome::Healthy => {},
            other => debug!(?other, "Recovery outcome"),
        }
        outcome
    }

    fn report(&mut self, ctx: &LidarContext, now_ms: u64) {
        self.status_report
            .set_interval(ctx.settings().status_check_interval_ms as u64);
        if !self.status_report.ready(now_ms) {
            return;
        }
        let snap = ctx.status.snapshot();
        let perf = ctx.metrics.snapshot();
        debug!(
            bringup = self.bringup.state().name(),
            fps = perf.frames_per_second,
            received = snap.frames_received,
            dropped = snap.frames_dropped,
            queued = ctx.queue.len(),
            flags = %format!("0x{:02X}", snap.error_flags.bits()),
            recovery_attempts = snap.recovery_attempts,
            "Producer status"
        );
    }
}

/// 生产者线程主函数
pub fn producer_loop(
    mut producer: ProducerLoop,
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
                info!("Producer thread priority set to MAX (realtime)");
            },
            Err(e) => {
                warn!(
                    "Failed to set producer thread priority: {}. \
                    On Linux, you may need to run with CAP_SYS_NICE or use rtkit.",
                    e
                );
            },
        }
    }

    loop {
        // Acquire: If we see false, we must see all cleanup writes from other threads
        if !is_running.load(Ordering::Acquire) {
            trace!("Producer thread: is_running flag is false, exiting");
            break;
        }
        producer.step(&ctx, clock.now_us());
        spin_sleep::sleep(Duration::from_micros(LOOP_YIELD_US));
    }

    producer.sensor.end();
}
