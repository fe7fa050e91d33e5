//! replay 命令
//!
//! 把抓包得到的传感器字节按采样率送入模拟串口，在模拟时间下交替运行
//! 生产者与消费者循环，输出触发事件与统计。不需要硬件。

use anyhow::{Context, Result};
use clap::Args;
use lidar_protocol::FRAME_LEN;
use lidar_sdk::driver::{
    Clock, ConsumerDevices, ConsumerLoop, LidarContext, MockClock, ProducerLoop, SystemMode,
    TriggerCallback, TriggerEvent, TriggerEventHook,
};
use lidar_sdk::hal::mock::{FixedSelector, MockPin, MockSerial};
use lidar_sdk::tools::{DeviceConfig, MemoryConfigStore};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

use super::config::load_config;
use super::frame::parse_hex;

/// 等待系统进入运行模式的最长模拟时间
const WARMUP_LIMIT_MS: u64 = 120_000;

/// 数据送完后继续运行的时间（清空队列、走完锁存）
const DRAIN_MS: u64 = 100;

/// 回放命令参数
#[derive(Args, Debug)]
pub struct ReplayCommand {
    /// 抓包文件（原始字节；扩展名为 .hex 时按十六进制文本读取）
    #[arg(short, long)]
    pub input: PathBuf,

    /// 配置文件（默认使用出厂配置）
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 选择开关位置（0-7）
    #[arg(short, long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..8))]
    pub selector: u8,

    /// 以 JSON 输出结果
    #[arg(long)]
    pub json: bool,
}

/// 一次触发
#[derive(Debug, Clone, Serialize)]
pub struct TriggerRecord {
    /// 相对回放开始的时间（ms）
    pub time_ms: u64,
    pub distance: u16,
    pub strength: u16,
    pub velocity: f32,
    pub selector: u8,
}

/// 回放结果
#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub bytes: usize,
    pub duration_ms: u64,
    pub completed: bool,
    pub frames_received: u32,
    pub frames_dropped: u32,
    pub checksum_failures: u64,
    pub range_failures: u64,
    pub sync_failures: u64,
    pub error_flags: u8,
    pub triggers: Vec<TriggerRecord>,
}

impl ReplayCommand {
    pub fn execute(&self) -> Result<()> {
        let bytes = self.read_capture()?;
        let config = match &self.config {
            Some(path) => load_config(path)?,
            None => DeviceConfig::default(),
        };
        config.validate().context("❌ 配置无效")?;

        let running = Arc::new(AtomicBool::new(true));
        let running_clone = running.clone();
        ctrlc::set_handler(move || {
            running_clone.store(false, Ordering::SeqCst);
        })
        .context("注册 Ctrl-C 处理器失败")?;

        let report = replay_capture(&bytes, config, self.selector, &running)?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_report(&report);
        }
        Ok(())
    }

    fn read_capture(&self) -> Result<Vec<u8>> {
        if !self.input.exists() {
            anyhow::bail!("❌ 抓包文件不存在: {}", self.input.display());
        }
        if self.input.extension().is_some_and(|ext| ext == "hex") {
            let text = std::fs::read_to_string(&self.input).context("读取抓包文件失败")?;
            parse_hex(&text)
        } else {
            std::fs::read(&self.input).context("读取抓包文件失败")
        }
    }
}

/// 在模拟时间下回放字节流
///
/// 先运行到传感器初始化完成且进入运行模式，再按采样率每毫秒送入相应字节数。
pub fn replay_capture(
    bytes: &[u8],
    config: DeviceConfig,
    selector: u8,
    running: &AtomicBool,
) -> Result<ReplayReport> {
    let rate_hz = config.sample_rate.rate_hz() as usize;
    let ctx = LidarContext::new(config.clone());
    let clock = MockClock::new(0);

    let sensor = MockSerial::new();
    let host = MockSerial::opened(115_200);
    let mut producer = ProducerLoop::new(Box::new(sensor.clone()), &ctx, 0);
    let mut consumer = ConsumerLoop::new(
        ConsumerDevices {
            host: Box::new(host),
            trigger: Box::new(MockPin::new()),
            selector: Box::new(FixedSelector::new(selector)),
            status_led: None,
            store: Box::new(MemoryConfigStore::with_config(config)),
        },
        &ctx,
        0,
    );

    let (hook, rx) = TriggerEventHook::new();
    ctx.hooks
        .write()
        .add_callback(Arc::new(hook) as Arc<dyn TriggerCallback>);

    let mut tick = || {
        let now_us = clock.now_us();
        producer.step(&ctx, now_us);
        consumer.step(&ctx, now_us);
        clock.advance_ms(1);
        producer.bringup().is_ready() && ctx.system_mode() == SystemMode::Running
    };

    // tick 返回系统是否已进入运行模式
    loop {
        if !running.load(Ordering::SeqCst) {
            anyhow::bail!("replay cancelled");
        }
        if tick() {
            break;
        }
        if clock.now_us() / 1_000 > WARMUP_LIMIT_MS {
            anyhow::bail!("系统未能在模拟时间 {} ms 内就绪", WARMUP_LIMIT_MS);
        }
    }

    let start_us = clock.now_us();
    info!(
        bytes = bytes.len(),
        warmup_ms = start_us / 1_000,
        "Replaying capture"
    );

    // 每毫秒送入 rate_hz * FRAME_LEN / 1000 字节，余数累积
    let mut offset = 0;
    let mut budget = 0usize;
    let mut completed = true;
    while offset < bytes.len() {
        if !running.load(Ordering::SeqCst) {
            completed = false;
            break;
        }
        budget += rate_hz * FRAME_LEN;
        let n = (budget / 1_000).min(bytes.len() - offset);
        budget %= 1_000;
        sensor.feed(&bytes[offset..offset + n]);
        offset += n;
        tick();
    }
    for _ in 0..DRAIN_MS {
        tick();
    }

    let to_record = |event: TriggerEvent| TriggerRecord {
        time_ms: event.timestamp_us.saturating_sub(start_us) / 1_000,
        distance: event.distance,
        strength: event.strength,
        velocity: event.velocity,
        selector: event.selector,
    };

    let snap = ctx.status.snapshot();
    let perf = ctx.metrics.snapshot();
    Ok(ReplayReport {
        bytes: offset,
        duration_ms: (clock.now_us() - start_us) / 1_000,
        completed,
        frames_received: snap.frames_received,
        frames_dropped: snap.frames_dropped,
        checksum_failures: perf.checksum_failures,
        range_failures: perf.range_failures,
        sync_failures: perf.sync_failures,
        error_flags: snap.error_flags.bits(),
        triggers: rx.try_iter().map(to_record).collect(),
    })
}

fn print_report(report: &ReplayReport) {
    println!("════════════════════════════════════════");
    println!("           回放结果");
    println!("════════════════════════════════════════");
    println!();
    println!("📁 字节数: {}", report.bytes);
    println!("⏱  模拟时长: {} ms", report.duration_ms);
    if !report.completed {
        println!("⚠️ 回放被用户中断");
    }
    println!(
        "📊 有效帧: {}  丢弃: {}  校验失败: {}  量程外: {}  同步失败: {}",
        report.frames_received,
        report.frames_dropped,
        report.checksum_failures,
        report.range_failures,
        report.sync_failures
    );
    println!("🚩 错误标志: 0x{:02X}", report.error_flags);
    println!();

    if report.triggers.is_empty() {
        println!("（无触发）");
        return;
    }
    println!("触发 {} 次:", report.triggers.len());
    for t in &report.triggers {
        println!(
            "  +{:6} ms  距离 {:4} cm  速度 {:7.1} cm/s  强度 {:5}  选择 {}",
            t.time_ms, t.distance, t.velocity, t.strength, t.selector
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lidar_protocol::{FrameFields, RawFrame};
    use lidar_sdk::tools::SampleRateMode;

    fn capture(distances: impl Iterator<Item = u16>) -> Vec<u8> {
        distances
            .flat_map(|distance| {
                RawFrame::encode(FrameFields {
                    distance,
                    strength: 700,
                    temperature: 0,
                })
                .as_bytes()
                .to_vec()
            })
            .collect()
    }

    fn quick_config() -> DeviceConfig {
        let mut config = DeviceConfig::default();
        config.settings.config_mode_timeout_ms = 1_000;
        config
    }

    #[test]
    fn test_approach_produces_one_trigger() {
        let bytes = capture((150..=700u16).rev());
        let running = AtomicBool::new(true);
        let report = replay_capture(&bytes, quick_config(), 2, &running).unwrap();

        assert!(report.completed);
        assert_eq!(report.bytes, bytes.len());
        assert_eq!(report.frames_received, 551);
        assert_eq!(report.triggers.len(), 1);
        let t = &report.triggers[0];
        assert!(t.distance <= 200);
        assert!((900.0..=1100.0).contains(&t.velocity));
        assert_eq!(t.selector, 2);
    }

    #[test]
    fn test_800hz_feeds_fractional_bytes() {
        let bytes = capture(std::iter::repeat_n(900u16, 400));
        let mut config = quick_config();
        config.sample_rate = SampleRateMode::Hz800;
        let running = AtomicBool::new(true);
        let report = replay_capture(&bytes, config, 0, &running).unwrap();

        // 400 帧按 800Hz 约需 500ms
        assert!((495..=505 + DRAIN_MS).contains(&report.duration_ms));
        assert_eq!(report.frames_received, 400);
        assert!(report.triggers.is_empty());
    }

    #[test]
    fn test_cancelled_before_ready() {
        let running = AtomicBool::new(false);
        assert!(replay_capture(&[], quick_config(), 0, &running).is_err());
    }
}
