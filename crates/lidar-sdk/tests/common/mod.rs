//! 集成测试共享装置
//!
//! 用模拟外设在同一线程里交替驱动生产者与消费者，时间以 1ms 步长前进。

#![allow(dead_code)]

use lidar_sdk::driver::{ConsumerDevices, ConsumerLoop, LidarContext, ProducerLoop};
use lidar_sdk::hal::mock::{FixedSelector, MockPin, MockSerial};
use lidar_sdk::protocol::{FrameFields, HostEvent, HostPacket, HostPacketParser, RawFrame};
use lidar_sdk::tools::{ConfigStore, DeviceConfig, MemoryConfigStore};

pub struct Rig {
    pub producer: ProducerLoop,
    pub consumer: ConsumerLoop,
    pub ctx: LidarContext,
    pub sensor: MockSerial,
    pub host: MockSerial,
    pub trigger: MockPin,
    pub led: MockPin,
    pub selector: FixedSelector,
    pub now_ms: u64,
}

impl Rig {
    pub fn new(config: DeviceConfig) -> Self {
        Self::with_store(config, MemoryConfigStore::new())
    }

    pub fn with_store(config: DeviceConfig, store: impl ConfigStore + 'static) -> Self {
        let ctx = LidarContext::new(config);
        let sensor = MockSerial::new();
        let host = MockSerial::opened(115_200);
        let trigger = MockPin::new();
        let led = MockPin::new();
        let selector = FixedSelector::new(0);

        let producer = ProducerLoop::new(Box::new(sensor.clone()), &ctx, 0);
        let consumer = ConsumerLoop::new(
            ConsumerDevices {
                host: Box::new(host.clone()),
                trigger: Box::new(trigger.clone()),
                selector: Box::new(selector.clone()),
                status_led: Some(Box::new(led.clone())),
                store: Box::new(store),
            },
            &ctx,
            0,
        );

        Self {
            producer,
            consumer,
            ctx,
            sensor,
            host,
            trigger,
            led,
            selector,
            now_ms: 0,
        }
    }

    /// 缩短配置模式等待时间的默认配置
    pub fn quick_config() -> DeviceConfig {
        let mut config = DeviceConfig::default();
        config.settings.config_mode_timeout_ms = 1_000;
        config
    }

    /// 两个循环各执行一轮，然后时间前进 1ms
    pub fn tick(&mut self) {
        let now_us = self.now_ms * 1_000;
        self.producer.step(&self.ctx, now_us);
        self.consumer.step(&self.ctx, now_us);
        self.now_ms += 1;
    }

    pub fn run_for(&mut self, ms: u64) {
        for _ in 0..ms {
            self.tick();
        }
    }

    /// 推进到传感器初始化完成且消费者就绪
    pub fn run_until_operational(&mut self) {
        let deadline = self.now_ms + 60_000;
        while !(self.producer.bringup().is_ready() && self.consumer.is_ready()) {
            self.tick();
            assert!(self.now_ms < deadline, "system never became operational");
        }
    }

    /// 串口收到一帧测量数据
    pub fn feed_frame(&self, distance: u16, strength: u16) {
        self.sensor.feed(&encode_frame(distance, strength));
    }

    /// 发送一包上位机指令并推进，直到收到应答
    pub fn host_request(&mut self, cmd: u8, payload: &[u8]) -> HostPacket {
        self.host.take_written();
        let packet = match HostPacket::new(cmd, payload) {
            Ok(packet) => packet,
            Err(e) => panic!("invalid test packet: {}", e),
        };
        self.host.feed(&packet.encode());
        for _ in 0..20 {
            self.tick();
            let written = self.host.take_written();
            if !written.is_empty() {
                return decode_reply(&written);
            }
        }
        panic!("no reply to host command 0x{:02X}", cmd);
    }
}

pub fn encode_frame(distance: u16, strength: u16) -> Vec<u8> {
    RawFrame::encode(FrameFields {
        distance,
        strength,
        temperature: 0,
    })
    .as_bytes()
    .to_vec()
}

/// 解析设备写回的一包应答
pub fn decode_reply(bytes: &[u8]) -> HostPacket {
    let mut parser = HostPacketParser::new();
    for &b in bytes {
        if let Some(HostEvent::Packet(packet)) = parser.push(b, 0) {
            return packet;
        }
    }
    panic!("no complete reply packet in {:02X?}", bytes);
}
