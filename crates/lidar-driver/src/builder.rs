//! Builder 模式实现
//!
//! 提供链式构造 [`LidarTrigger`] 实例的便捷方式。

use crate::clock::{Clock, MonotonicClock};
use crate::consumer::{ConsumerDevices, ConsumerLoop};
use crate::context::LidarContext;
use crate::error::DriverError;
use crate::hooks::TriggerCallback;
use crate::producer::ProducerLoop;
use crate::runtime::LidarTrigger;
use lidar_hal::{OutputPin, SelectorInput, SerialPort};
use lidar_tools::{ConfigStore, DeviceConfig, MemoryConfigStore, SampleRateMode};
use std::sync::Arc;
use tracing::info;

/// LidarTrigger Builder（链式构造）
///
/// 传感器串口、上位机串口、触发输出和选择开关是必需的；
/// 其余均有默认值。
///
/// # Example
///
/// ```no_run
/// use lidar_driver::LidarTriggerBuilder;
/// use lidar_hal::mock::{FixedSelector, MockPin, MockSerial};
/// use lidar_tools::SampleRateMode;
///
/// let trigger = LidarTriggerBuilder::new()
///     .sample_rate(SampleRateMode::Hz800)
///     .sensor_port(Box::new(MockSerial::new()))
///     .host_port(Box::new(MockSerial::opened(115_200)))
///     .trigger_pin(Box::new(MockPin::new()))
///     .selector(Box::new(FixedSelector::new(0)))
///     .build()
///     .unwrap();
/// ```
pub struct LidarTriggerBuilder {
    /// 初始配置（存储中有有效配置时会被覆盖，采样率除外）
    config: Option<DeviceConfig>,
    /// 采样率模式（决定队列容量与初始化指令）
    sample_rate: Option<SampleRateMode>,
    clock: Option<Arc<dyn Clock>>,
    sensor: Option<Box<dyn SerialPort + Send>>,
    host: Option<Box<dyn SerialPort + Send>>,
    trigger: Option<Box<dyn OutputPin + Send>>,
    selector: Option<Box<dyn SelectorInput + Send>>,
    status_led: Option<Box<dyn OutputPin + Send>>,
    store: Option<Box<dyn ConfigStore>>,
    callbacks: Vec<Arc<dyn TriggerCallback>>,
}

impl LidarTriggerBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            sample_rate: None,
            clock: None,
            sensor: None,
            host: None,
            trigger: None,
            selector: None,
            status_led: None,
            store: None,
            callbacks: Vec::new(),
        }
    }

    /// 设置初始配置（可选，默认出厂配置）
    pub fn config(mut self, config: DeviceConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// 设置采样率模式（可选，优先于 `config` 中的值）
    pub fn sample_rate(mut self, mode: SampleRateMode) -> Self {
        self.sample_rate = Some(mode);
        self
    }

    /// 设置时钟（可选，默认单调时钟）
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// 设置传感器串口（必需，由初始化流程负责打开）
    pub fn sensor_port(mut self, port: Box<dyn SerialPort + Send>) -> Self {
        self.sensor = Some(port);
        self
    }

    /// 设置上位机串口（必需，调用方需事先打开）
    pub fn host_port(mut self, port: Box<dyn SerialPort + Send>) -> Self {
        self.host = Some(port);
        self
    }

    /// 设置触发输出引脚（必需）
    pub fn trigger_pin(mut self, pin: Box<dyn OutputPin + Send>) -> Self {
        self.trigger = Some(pin);
        self
    }

    /// 设置选择开关（必需）
    pub fn selector(mut self, selector: Box<dyn SelectorInput + Send>) -> Self {
        self.selector = Some(selector);
        self
    }

    pub fn status_led(mut self, pin: Box<dyn OutputPin + Send>) -> Self {
        self.status_led = Some(pin);
        self
    }

    /// 设置配置存储（可选，默认内存存储）
    pub fn store(mut self, store: Box<dyn ConfigStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// 注册触发回调（可多次调用）
    pub fn trigger_callback(mut self, callback: Arc<dyn TriggerCallback>) -> Self {
        self.callbacks.push(callback);
        self
    }

    /// 构建并启动两个循环线程
    pub fn build(self) -> Result<LidarTrigger, DriverError> {
        let missing = |what: &str| DriverError::InvalidInput(format!("{} not set", what));
        let sensor = self.sensor.ok_or_else(|| missing("sensor port"))?;
        let host = self.host.ok_or_else(|| missing("host port"))?;
        let trigger = self.trigger.ok_or_else(|| missing("trigger pin"))?;
        let selector = self.selector.ok_or_else(|| missing("selector input"))?;

        let mut config = self.config.unwrap_or_default();
        if let Some(mode) = self.sample_rate {
            config.sample_rate = mode;
        }
        config.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(MonotonicClock));
        let store = self
            .store
            .unwrap_or_else(|| Box::new(MemoryConfigStore::new()));

        info!(
            sample_rate = config.sample_rate.rate_hz(),
            queue_capacity = config.sample_rate.queue_capacity(),
            "Building LiDAR trigger"
        );

        let ctx = Arc::new(LidarContext::new(config));
        {
            let mut hooks = ctx.hooks.write();
            for callback in self.callbacks {
                hooks.add_callback(callback);
            }
        }

        let now_ms = clock.now_us() / 1_000;
        let producer = ProducerLoop::new(sensor, &ctx, now_ms);
        let consumer = ConsumerLoop::new(
            ConsumerDevices {
                host,
                trigger,
                selector,
                status_led: self.status_led,
                store,
            },
            &ctx,
            now_ms,
        );

        LidarTrigger::spawn(ctx, clock, producer, consumer)
    }
}

impl Default for LidarTriggerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::TriggerEvent;
    use crate::mode::SystemMode;
    use lidar_hal::mock::{FixedSelector, MockPin, MockSerial};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    fn complete() -> LidarTriggerBuilder {
        LidarTriggerBuilder::new()
            .sensor_port(Box::new(MockSerial::new()))
            .host_port(Box::new(MockSerial::opened(115_200)))
            .trigger_pin(Box::new(MockPin::new()))
            .selector(Box::new(FixedSelector::new(0)))
    }

    #[test]
    fn test_missing_devices_rejected() {
        let err = LidarTriggerBuilder::new().build().err().unwrap();
        assert!(matches!(err, DriverError::InvalidInput(ref m) if m.contains("sensor")));

        let err = LidarTriggerBuilder::new()
            .sensor_port(Box::new(MockSerial::new()))
            .host_port(Box::new(MockSerial::new()))
            .selector(Box::new(FixedSelector::new(0)))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, DriverError::InvalidInput(ref m) if m.contains("trigger")));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = DeviceConfig::default();
        config.table.row_mut(0).unwrap().distance_threshold_cm = 5;
        let err = complete().config(config).build().err().unwrap();
        assert!(matches!(err, DriverError::Config(_)));
    }

    #[test]
    fn test_sample_rate_overrides_config() {
        let trigger = complete().sample_rate(SampleRateMode::Hz800).build().unwrap();
        assert_eq!(trigger.config().sample_rate, SampleRateMode::Hz800);
        assert_eq!(trigger.context().queue.capacity(), 24);
    }

    struct CountingCallback(AtomicUsize);

    impl TriggerCallback for CountingCallback {
        fn on_trigger(&self, _event: &TriggerEvent) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_callbacks_and_subscribers_receive_events() {
        let counter = Arc::new(CountingCallback(AtomicUsize::new(0)));
        let trigger = complete()
            .trigger_callback(counter.clone())
            .build()
            .unwrap();
        let rx = trigger.subscribe();
        assert_eq!(trigger.context().hooks.read().len(), 2);

        let event = TriggerEvent {
            timestamp_us: 5_000,
            distance: 180,
            strength: 900,
            velocity: 640.0,
            selector: 2,
        };
        trigger.context().fire_trigger_hooks(&event);

        assert_eq!(counter.0.load(Ordering::Relaxed), 1);
        assert_eq!(rx.try_recv().unwrap(), event);
        trigger.shutdown();
    }

    #[test]
    fn test_threads_start_and_stop() {
        let mut config = DeviceConfig::default();
        config.settings.config_mode_timeout_ms = 1_000;
        let trigger = complete().config(config).build().unwrap();
        assert!(trigger.is_running());
        assert_eq!(trigger.check_health(), (true, true));

        // 没有上位机输入，1.5 秒内消费者完成初始化并进入运行模式
        let deadline = Instant::now() + Duration::from_secs(5);
        while trigger.system_mode() != SystemMode::Running {
            assert!(Instant::now() < deadline, "consumer never became ready");
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(trigger.status().consumer_ready);
        trigger.shutdown();
    }
}
