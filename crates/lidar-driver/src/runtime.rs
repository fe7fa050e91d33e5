//! 线程运行时
//!
//! [`LidarTrigger`] 把生产者与消费者各放到一个线程上运行，共享同一个
//! [`LidarContext`]。Drop 时先清除运行标志，再带超时地等待两个线程退出。

use crate::clock::Clock;
use crate::consumer::{ConsumerLoop, consumer_loop};
use crate::context::LidarContext;
use crate::error::DriverError;
use crate::hooks::{TriggerCallback, TriggerEvent, TriggerEventHook};
use crate::metrics::PerfSnapshot;
use crate::mode::SystemMode;
use crate::producer::{ProducerLoop, producer_loop};
use crate::status::StatusSnapshot;
use crossbeam_channel::Receiver;
use lidar_tools::DeviceConfig;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{Builder, JoinHandle, spawn};
use std::time::Duration;
use tracing::{error, info};

/// 等待线程退出的最长时间
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// 线程未能正常退出的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinFailure {
    TimedOut,
    Panicked,
}

/// 带超时的 join
trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> Result<(), JoinFailure>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> Result<(), JoinFailure> {
        let (tx, rx) = mpsc::channel();

        // 由看门狗线程执行 join，调用方只等待到期限为止
        spawn(move || {
            let _ = tx.send(self.join().is_ok());
        });

        match rx.recv_timeout(timeout) {
            Ok(true) => Ok(()),
            Ok(false) | Err(RecvTimeoutError::Disconnected) => Err(JoinFailure::Panicked),
            Err(RecvTimeoutError::Timeout) => Err(JoinFailure::TimedOut),
        }
    }
}

/// 运行中的触发器
///
/// 通过 [`crate::LidarTriggerBuilder`] 构造。
pub struct LidarTrigger {
    ctx: Arc<LidarContext>,
    clock: Arc<dyn Clock>,
    is_running: Arc<AtomicBool>,
    producer_thread: Option<JoinHandle<()>>,
    consumer_thread: Option<JoinHandle<()>>,
}

impl LidarTrigger {
    /// 启动两个循环线程
    pub(crate) fn spawn(
        ctx: Arc<LidarContext>,
        clock: Arc<dyn Clock>,
        producer: ProducerLoop,
        consumer: ConsumerLoop,
    ) -> Result<Self, DriverError> {
        let is_running = Arc::new(AtomicBool::new(true));

        let ctx_producer = ctx.clone();
        let clock_producer = clock.clone();
        let running_producer = is_running.clone();
        let producer_thread = Builder::new()
            .name("lidar-producer".into())
            .spawn(move || producer_loop(producer, ctx_producer, clock_producer, running_producer))
            .map_err(|e| DriverError::IoThread(format!("producer: {}", e)))?;

        let ctx_consumer = ctx.clone();
        let clock_consumer = clock.clone();
        let running_consumer = is_running.clone();
        let consumer_thread = match Builder::new()
            .name("lidar-consumer".into())
            .spawn(move || consumer_loop(consumer, ctx_consumer, clock_consumer, running_consumer))
        {
            Ok(handle) => handle,
            Err(e) => {
                is_running.store(false, Ordering::Release);
                let _ = producer_thread.join_timeout(JOIN_TIMEOUT);
                return Err(DriverError::IoThread(format!("consumer: {}", e)));
            },
        };

        info!("LiDAR trigger runtime started");
        Ok(Self {
            ctx,
            clock,
            is_running,
            producer_thread: Some(producer_thread),
            consumer_thread: Some(consumer_thread),
        })
    }

    /// 共享上下文
    pub fn context(&self) -> &Arc<LidarContext> {
        &self.ctx
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// 状态寄存器快照
    pub fn status(&self) -> StatusSnapshot {
        self.ctx.status.snapshot()
    }

    /// 性能计数器快照
    pub fn metrics(&self) -> PerfSnapshot {
        self.ctx.metrics.snapshot()
    }

    /// 当前生效的配置
    pub fn config(&self) -> Arc<DeviceConfig> {
        self.ctx.config()
    }

    pub fn system_mode(&self) -> SystemMode {
        self.ctx.system_mode()
    }

    /// 注册触发回调（在消费者线程中执行，必须很快返回）
    pub fn add_trigger_callback(&self, callback: Arc<dyn TriggerCallback>) {
        self.ctx.hooks.write().add_callback(callback);
    }

    /// 订阅触发事件
    pub fn subscribe(&self) -> Receiver<TriggerEvent> {
        let (hook, rx) = TriggerEventHook::new();
        self.add_trigger_callback(Arc::new(hook));
        rx
    }

    /// 线程存活状态 `(producer_alive, consumer_alive)`
    pub fn check_health(&self) -> (bool, bool) {
        let alive = |h: &Option<JoinHandle<()>>| h.as_ref().is_some_and(|h| !h.is_finished());
        (alive(&self.producer_thread), alive(&self.consumer_thread))
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// 停止两个线程（等价于 drop）
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for LidarTrigger {
    fn drop(&mut self) {
        // Release: 线程看到 false 时，之前的写入都已可见
        self.is_running.store(false, Ordering::Release);

        let threads = [
            ("producer", self.producer_thread.take()),
            ("consumer", self.consumer_thread.take()),
        ];
        for (name, handle) in threads {
            if let Some(handle) = handle
                && let Err(failure) = handle.join_timeout(JOIN_TIMEOUT)
            {
                error!(
                    thread = name,
                    ?failure,
                    timeout = ?JOIN_TIMEOUT,
                    "Thread did not shut down cleanly"
                );
            }
        }
        info!("LiDAR trigger runtime stopped");
    }
}
