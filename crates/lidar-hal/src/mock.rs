//! 内存模拟设备
//!
//! 所有模拟设备都是可克隆的句柄：一份交给被测循环，另一份留在测试中注入数据、
//! 检查输出。

use crate::{HalError, OutputPin, SelectorInput, SerialPort};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

#[derive(Debug, Default)]
struct SerialInner {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    open: bool,
    baud_rate: Option<u32>,
    begin_count: usize,
    end_count: usize,
    fail_begin: bool,
    /// 关闭状态下注入的数据是否保留
    buffer_while_closed: bool,
}

/// 模拟串口
#[derive(Debug, Clone, Default)]
pub struct MockSerial {
    inner: Arc<Mutex<SerialInner>>,
}

impl MockSerial {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已打开的模拟串口（用于上位机链路）
    pub fn opened(baud_rate: u32) -> Self {
        let port = Self::new();
        {
            let mut inner = port.inner.lock();
            inner.open = true;
            inner.baud_rate = Some(baud_rate);
        }
        port
    }

    /// 注入待读取的字节
    ///
    /// 端口关闭时数据被丢弃，除非启用了 [`MockSerial::buffer_while_closed`]。
    pub fn feed(&self, bytes: &[u8]) {
        let mut inner = self.inner.lock();
        if inner.open || inner.buffer_while_closed {
            inner.rx.extend(bytes.iter().copied());
        }
    }

    /// 关闭状态下也保留注入的数据
    pub fn buffer_while_closed(&self, enabled: bool) {
        self.inner.lock().buffer_while_closed = enabled;
    }

    /// 取出并清空已写出的字节
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.inner.lock().tx)
    }

    /// 待读取的字节数
    pub fn pending(&self) -> usize {
        self.inner.lock().rx.len()
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().open
    }

    pub fn baud_rate(&self) -> Option<u32> {
        self.inner.lock().baud_rate
    }

    /// `begin()` 调用次数
    pub fn begin_count(&self) -> usize {
        self.inner.lock().begin_count
    }

    /// `end()` 调用次数
    pub fn end_count(&self) -> usize {
        self.inner.lock().end_count
    }

    /// 让后续 `begin()` 失败
    pub fn set_fail_begin(&self, fail: bool) {
        self.inner.lock().fail_begin = fail;
    }
}

impl SerialPort for MockSerial {
    fn begin(&mut self, baud_rate: u32) -> Result<(), HalError> {
        let mut inner = self.inner.lock();
        inner.begin_count += 1;
        if inner.fail_begin {
            inner.open = false;
            return Err(HalError::Device(format!(
                "mock port refused baud {}",
                baud_rate
            )));
        }
        inner.open = true;
        inner.baud_rate = Some(baud_rate);
        Ok(())
    }

    fn end(&mut self) {
        let mut inner = self.inner.lock();
        inner.end_count += 1;
        inner.open = false;
    }

    fn available(&mut self) -> usize {
        let inner = self.inner.lock();
        if inner.open { inner.rx.len() } else { 0 }
    }

    fn read_byte(&mut self) -> Option<u8> {
        let mut inner = self.inner.lock();
        if inner.open { inner.rx.pop_front() } else { None }
    }

    fn peek_byte(&mut self) -> Option<u8> {
        let inner = self.inner.lock();
        if inner.open {
            inner.rx.front().copied()
        } else {
            None
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), HalError> {
        let mut inner = self.inner.lock();
        if !inner.open {
            return Err(HalError::NotOpen);
        }
        inner.tx.extend_from_slice(data);
        Ok(())
    }
}

/// 模拟输出引脚
///
/// 记录当前逻辑电平与每次电平变化。
#[derive(Debug, Clone, Default)]
pub struct MockPin {
    active: Arc<AtomicBool>,
    transitions: Arc<Mutex<Vec<bool>>>,
}

impl MockPin {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前是否有效（线路为低电平）
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// 物理线路电平（低电平有效）
    pub fn line_level_high(&self) -> bool {
        !self.is_active()
    }

    /// 电平变化记录
    pub fn transitions(&self) -> Vec<bool> {
        self.transitions.lock().clone()
    }
}

impl OutputPin for MockPin {
    fn set_active(&mut self, active: bool) {
        let previous = self.active.swap(active, Ordering::AcqRel);
        if previous != active {
            self.transitions.lock().push(active);
        }
    }
}

/// 可从外部修改的选择开关
#[derive(Debug, Clone, Default)]
pub struct FixedSelector {
    code: Arc<AtomicU8>,
}

impl FixedSelector {
    pub fn new(code: u8) -> Self {
        Self {
            code: Arc::new(AtomicU8::new(code & 0x07)),
        }
    }

    pub fn set(&self, code: u8) {
        self.code.store(code & 0x07, Ordering::Release);
    }
}

impl SelectorInput for FixedSelector {
    fn read_code(&mut self) -> u8 {
        self.code.load(Ordering::Acquire)
    }
}
