//! 触发事件钩子（Hook System）
//!
//! 触发输出出现上升沿时，消费者循环调用所有已注册的回调。
//!
//! - **非阻塞**: 回调在消费者循环内执行，必须立即返回
//! - **Channel 模式**: 需要耗时处理的场景使用 [`TriggerEventHook`]，
//!   由后台线程从 Channel 读取事件
//!
//! # 使用示例
//!
//! ```rust
//! use lidar_driver::hooks::{HookManager, TriggerCallback, TriggerEvent, TriggerEventHook};
//! use std::sync::Arc;
//!
//! let mut hooks = HookManager::new();
//! let (hook, rx) = TriggerEventHook::new();
//! hooks.add_callback(Arc::new(hook) as Arc<dyn TriggerCallback>);
//!
//! let event = TriggerEvent {
//!     timestamp_us: 1_000,
//!     distance: 42,
//!     strength: 800,
//!     velocity: 350.0,
//!     selector: 3,
//! };
//! hooks.trigger_all(&event);
//! assert_eq!(rx.try_recv().unwrap().distance, 42);
//! ```

use crossbeam_channel::{Receiver, Sender, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// 触发事件
///
/// 记录上升沿发生时的测量值。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerEvent {
    /// 上升沿时刻（单调时钟，微秒）
    pub timestamp_us: u64,
    /// 距离（cm）
    pub distance: u16,
    pub strength: u16,
    /// 速度（cm/s，正值表示接近）
    pub velocity: f32,
    /// 当时的选择行
    pub selector: u8,
}

/// 触发回调 Trait
///
/// 实现必须立即返回：禁止阻塞 I/O，推荐使用 `try_send`。
pub trait TriggerCallback: Send + Sync {
    /// 触发输出上升沿时调用
    fn on_trigger(&self, event: &TriggerEvent);
}

/// 钩子管理器
///
/// 回调列表本身不是线程安全的，由 `LidarContext` 通过 `RwLock` 保护。
#[derive(Default)]
pub struct HookManager {
    callbacks: Vec<Arc<dyn TriggerCallback>>,
}

impl HookManager {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            callbacks: Vec::new(),
        }
    }

    pub fn add_callback(&mut self, callback: Arc<dyn TriggerCallback>) {
        self.callbacks.push(callback);
    }

    /// 移除所有回调
    pub fn clear(&mut self) {
        self.callbacks.clear();
    }

    /// 按注册顺序调用所有回调
    pub fn trigger_all(&self, event: &TriggerEvent) {
        for callback in self.callbacks.iter() {
            callback.on_trigger(event);
        }
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

impl std::fmt::Debug for HookManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookManager")
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

/// Channel 事件钩子
///
/// 使用有界通道，队列满时丢弃事件并计数，而不是阻塞消费者循环。
pub struct TriggerEventHook {
    tx: Sender<TriggerEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl TriggerEventHook {
    /// 默认容量
    pub const DEFAULT_CAPACITY: usize = 1024;

    /// 创建钩子，返回 (钩子, 接收端)
    #[must_use]
    pub fn new() -> (Self, Receiver<TriggerEvent>) {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> (Self, Receiver<TriggerEvent>) {
        let (tx, rx) = bounded(capacity.max(1));
        (
            Self {
                tx,
                dropped_events: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// 丢弃事件计数器
    pub fn dropped_events(&self) -> &Arc<AtomicU64> {
        &self.dropped_events
    }
}

impl TriggerCallback for TriggerEventHook {
    fn on_trigger(&self, event: &TriggerEvent) {
        if self.tx.try_send(*event).is_err() {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }
}
