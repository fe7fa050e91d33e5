//! 配置模式与上位机协议集成测试

mod common;

use common::{Rig, decode_reply};
use lidar_sdk::ErrorFlag;
use lidar_sdk::driver::{ConsumerStage, SystemMode};
use lidar_sdk::protocol::{NakCode, RSP_NAK};
use lidar_sdk::tools::{DeviceConfig, FileConfigStore, MemoryConfigStore};

/// 推进到消费者等待上位机输入的窗口内，发送第一条指令进入配置模式
fn enter_config_mode(rig: &mut Rig) {
    while rig.consumer.stage() != ConsumerStage::ConfigModeCheck {
        rig.tick();
    }
    let reply = rig.host_request(b'M', &[]);
    assert_eq!(reply.cmd, b'M');
    assert_eq!(rig.ctx.system_mode(), SystemMode::Config);
    assert!(rig.ctx.status.is_config_mode());
}

#[test]
fn status_query_reports_selector_and_flags() {
    let mut rig = Rig::new(Rig::quick_config());
    rig.selector.set(5);
    enter_config_mode(&mut rig);

    // 选择开关只在运行模式下读取
    let reply = rig.host_request(b'S', &[]);
    assert_eq!(reply.cmd, b'S');
    assert_eq!(reply.payload.len(), 9);
    let flags = u32::from_le_bytes([
        reply.payload[5],
        reply.payload[6],
        reply.payload[7],
        reply.payload[8],
    ]);
    assert_eq!(flags as u8, rig.ctx.status.error_flags().bits());
}

#[test]
fn config_mode_discards_frames_and_holds_output() {
    let mut config = Rig::quick_config();
    config.table.use_velocity_trigger = false;
    let mut rig = Rig::new(config);
    rig.selector.set(7);
    enter_config_mode(&mut rig);
    rig.run_until_operational();

    for _ in 0..500 {
        rig.feed_frame(50, 700);
        rig.tick();
    }
    assert!(rig.ctx.status.snapshot().frames_received >= 500);
    assert!(rig.ctx.queue.is_empty());
    assert!(!rig.trigger.is_active());
    assert!(!rig.ctx.status.flag(ErrorFlag::CommTimeout));
}

#[test]
fn edits_persist_across_restart() {
    let store = MemoryConfigStore::new();
    let mut rig = Rig::with_store(Rig::quick_config(), store.clone());
    enter_config_mode(&mut rig);

    let reply = rig.host_request(b'd', &[2, 150, 0]);
    assert!(reply.is_ack());
    assert_eq!(reply.payload.as_slice(), &[b'd']);
    assert_eq!(rig.ctx.config().table.rows[2].distance_threshold_cm, 150);
    assert!(store.stored().is_none());

    let reply = rig.host_request(b'm', &[1]);
    assert!(reply.is_ack());

    let reply = rig.host_request(b'W', &[]);
    assert!(reply.is_ack());
    let saved = store.stored().unwrap();
    assert_eq!(saved.table.rows[2].distance_threshold_cm, 150);
    assert!(!saved.table.use_velocity_trigger);

    let reply = rig.host_request(b'R', &[]);
    assert!(reply.is_ack());
    assert_eq!(rig.ctx.system_mode(), SystemMode::Init);

    // 重启后没有上位机输入，进入运行模式并使用保存的配置
    rig.run_until_operational();
    assert_eq!(rig.ctx.system_mode(), SystemMode::Running);
    assert!(!rig.ctx.status.is_config_mode());
    assert_eq!(rig.ctx.config().table.rows[2].distance_threshold_cm, 150);

    rig.selector.set(2);
    for _ in 0..100 {
        rig.feed_frame(120, 700);
        rig.tick();
    }
    assert!(rig.trigger.is_active());
}

#[test]
fn saved_record_file_survives_power_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trigger.bin");

    let mut rig = Rig::with_store(Rig::quick_config(), FileConfigStore::new(&path));
    enter_config_mode(&mut rig);
    // 第 4 行距离阈值 300cm（小端 0x012C）
    assert!(rig.host_request(b'd', &[4, 0x2C, 0x01]).is_ack());
    assert!(rig.host_request(b'W', &[]).is_ack());
    drop(rig);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 84);

    // 新装置从同一文件加载，其余设置回到默认值
    let mut rig = Rig::with_store(Rig::quick_config(), FileConfigStore::new(&path));
    rig.run_until_operational();
    let config = rig.ctx.config();
    assert_eq!(config.table.rows[4].distance_threshold_cm, 300);
    assert_eq!(
        config.settings.config_mode_timeout_ms,
        DeviceConfig::default().settings.config_mode_timeout_ms
    );
}

#[test]
fn factory_reset_restores_defaults() {
    let mut stored = Rig::quick_config();
    stored.table.rows[0].distance_threshold_cm = 999;
    let store = MemoryConfigStore::with_config(stored);
    let mut rig = Rig::with_store(Rig::quick_config(), store.clone());
    enter_config_mode(&mut rig);
    assert_eq!(rig.ctx.config().table.rows[0].distance_threshold_cm, 999);

    let reply = rig.host_request(b'F', &[]);
    assert!(reply.is_ack());
    assert!(store.stored().is_none());
    assert_eq!(
        rig.ctx.config().table,
        DeviceConfig::default().table,
        "defaults published immediately"
    );
    assert_eq!(rig.consumer.stage(), ConsumerStage::Startup);
}

#[test]
fn malformed_packets_are_rejected() {
    let mut rig = Rig::new(Rig::quick_config());
    enter_config_mode(&mut rig);

    // 校验和错误
    rig.host.take_written();
    rig.host.feed(&[0x7E, b'S', 0x00, 0x00]);
    rig.tick();
    let reply = decode_reply(&rig.host.take_written());
    assert_eq!(reply.cmd, RSP_NAK);
    assert_eq!(reply.payload.as_slice(), &[u8::from(NakCode::BadChecksum)]);

    // 未知指令
    let reply = rig.host_request(b'Z', &[]);
    assert!(reply.is_nak());
    assert_eq!(reply.payload.as_slice(), &[u8::from(NakCode::UnknownCommand)]);

    // 越界的距离阈值
    let reply = rig.host_request(b'd', &[0, 0xFF, 0xFF]);
    assert_eq!(reply.payload.as_slice(), &[u8::from(NakCode::InvalidPayload)]);

    // 不完整的包超时后回复 NAK
    rig.host.feed(&[0x7E, b'S']);
    rig.run_for(150);
    let reply = decode_reply(&rig.host.take_written());
    assert_eq!(reply.payload.as_slice(), &[u8::from(NakCode::Timeout)]);
    assert_eq!(rig.ctx.system_mode(), SystemMode::Config);
}

#[test]
fn failed_save_reports_execution_failure() {
    let store = MemoryConfigStore::new();
    store.set_fail_save(true);
    let mut rig = Rig::with_store(Rig::quick_config(), store.clone());
    enter_config_mode(&mut rig);

    let reply = rig.host_request(b'W', &[]);
    assert_eq!(reply.payload.as_slice(), &[u8::from(NakCode::ExecutionFailed)]);
    assert!(store.stored().is_none());
}
