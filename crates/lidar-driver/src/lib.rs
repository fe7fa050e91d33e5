//! 驱动层模块
//!
//! 本模块把激光测距传感器变成一个去抖的触发输出，包括：
//! - 生产者循环：传感器初始化、帧采集入队、通信健康监测与分级恢复
//! - 消费者循环：速度估计、触发判定（去抖 + 锁存）、上位机配置协议
//! - 共享上下文：有界帧队列、状态寄存器、性能计数器（各自加锁）
//! - 钩子系统：触发事件回调
//!
//! # 使用场景
//!
//! 通过 [`LidarTriggerBuilder`] 注入串口与 GPIO 实现后启动两个线程；
//! 测试中也可以直接驱动 [`ProducerLoop`] / [`ConsumerLoop`] 的 `step`。

pub mod acquisition;
pub mod bringup;
mod builder;
pub mod clock;
pub mod consumer;
pub mod context;
mod error;
pub mod frame;
pub mod hooks;
pub mod host;
pub mod metrics;
pub mod mode;
pub mod producer;
pub mod queue;
pub mod recovery;
mod runtime;
pub mod status;
pub mod trigger;
pub mod velocity;

pub use acquisition::{FrameAcquisitionEngine, PollSummary, adaptive_timeout_us};
pub use bringup::{BringUpState, SensorBringUp};
pub use builder::LidarTriggerBuilder;
pub use clock::{Clock, MockClock, MonotonicClock, Throttle};
pub use consumer::{ConsumerDevices, ConsumerLoop, ConsumerStage, consumer_loop};
pub use context::LidarContext;
pub use error::DriverError;
pub use frame::LidarFrame;
pub use hooks::{HookManager, TriggerCallback, TriggerEvent, TriggerEventHook};
pub use host::{HostAction, HostCommandHandler, HostReply};
pub use metrics::{PerfCounters, PerfSnapshot};
pub use mode::{AtomicSystemMode, SystemMode};
pub use producer::{ProducerLoop, producer_loop};
pub use queue::{PushOutcome, SharedFrameQueue, Watermark};
pub use recovery::{RecoveryLevel, RecoveryOutcome, RecoverySupervisor};
pub use runtime::LidarTrigger;
pub use status::{SharedStatusRegister, StatusIndicator, StatusSnapshot, blink_interval_ms};
pub use trigger::{Debouncer, Latch, LatchState, TriggerDecision, TriggerPipeline, evaluate_raw};
pub use velocity::{Deadbands, FrameHistory, VelocityEstimator, VelocityReading};
