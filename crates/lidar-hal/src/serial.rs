//! 串口字节流抽象

use crate::HalError;

/// 非阻塞串口
///
/// 所有读取操作只消费当前已到达的字节，没有数据时立即返回。
/// 端口关闭时 `available()` 为 0，读取返回 `None`。
pub trait SerialPort {
    /// 以指定波特率打开端口（已打开时重新配置）
    fn begin(&mut self, baud_rate: u32) -> Result<(), HalError>;

    /// 关闭端口
    fn end(&mut self);

    /// 当前可读字节数
    fn available(&mut self) -> usize;

    /// 读取一个字节
    fn read_byte(&mut self) -> Option<u8>;

    /// 查看下一个字节但不消费
    fn peek_byte(&mut self) -> Option<u8>;

    /// 写出全部字节
    fn write_all(&mut self, data: &[u8]) -> Result<(), HalError>;

    /// 丢弃所有已到达的字节，返回丢弃数量
    fn discard_input(&mut self) -> usize {
        let mut discarded = 0;
        while self.read_byte().is_some() {
            discarded += 1;
        }
        discarded
    }
}

impl<T: SerialPort + ?Sized> SerialPort for Box<T> {
    fn begin(&mut self, baud_rate: u32) -> Result<(), HalError> {
        (**self).begin(baud_rate)
    }

    fn end(&mut self) {
        (**self).end()
    }

    fn available(&mut self) -> usize {
        (**self).available()
    }

    fn read_byte(&mut self) -> Option<u8> {
        (**self).read_byte()
    }

    fn peek_byte(&mut self) -> Option<u8> {
        (**self).peek_byte()
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), HalError> {
        (**self).write_all(data)
    }

    fn discard_input(&mut self) -> usize {
        (**self).discard_input()
    }
}
