use domain::{Device, DeviceStatus, LoggingMode, Point, ProtocolKind};
use ems_protocol::{
    ModbusAdapter, ModbusRegisterType, ModbusTcpTransport, ModbusTransport, QueueConfig,
    RequestQueue,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// 读取该地址时额外延迟，用于制造超时
const SLOW_ADDRESS: u16 = 99;

/// 最小 Modbus TCP 从站：每个保持寄存器的值等于其地址，每次应答前等待 `latency`。
async fn spawn_server(latency: Duration) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(serve_connection(socket, latency));
        }
    });
    addr
}

async fn serve_connection(mut socket: TcpStream, latency: Duration) {
    let mut header = [0u8; 7];
    loop {
        if socket.read_exact(&mut header).await.is_err() {
            return;
        }
        let len = u16::from_be_bytes([header[4], header[5]]) as usize;
        let mut pdu = vec![0u8; len.saturating_sub(1)];
        if socket.read_exact(&mut pdu).await.is_err() {
            return;
        }
        let function = pdu[0];
        let address = u16::from_be_bytes([pdu[1], pdu[2]]);
        let count = u16::from_be_bytes([pdu[3], pdu[4]]);
        let delay = if address == SLOW_ADDRESS {
            latency + Duration::from_millis(500)
        } else {
            latency
        };
        tokio::time::sleep(delay).await;

        let mut body = vec![function, (count * 2) as u8];
        for offset in 0..count {
            body.extend_from_slice(&(address + offset).to_be_bytes());
        }
        let mut frame = Vec::with_capacity(7 + body.len());
        frame.extend_from_slice(&header[..4]);
        frame.extend_from_slice(&((body.len() + 1) as u16).to_be_bytes());
        frame.push(header[6]);
        frame.extend_from_slice(&body);
        if socket.write_all(&frame).await.is_err() {
            return;
        }
    }
}

fn device(device_id: i64, addr: SocketAddr) -> Device {
    Device {
        device_id,
        name: format!("meter-{}", device_id),
        protocol: ProtocolKind::Modbus,
        polling_interval_ms: None,
        logging_mode: LoggingMode::Cov,
        status: DeviceStatus::Online,
        config: json!({ "host": addr.ip().to_string(), "port": addr.port(), "unit_id": 1 }),
    }
}

fn point(device_id: i64, address: u16) -> Point {
    Point {
        point_id: device_id * 100 + address as i64,
        device_id,
        name: format!("HR-{}", address),
        object_type: None,
        object_instance: None,
        register_type: Some("holding_register".to_string()),
        register_address: Some(address),
        config: json!({ "data_type": "uint16" }),
        is_monitor: true,
        is_history_enabled: true,
        table_name: None,
    }
}

fn queue(max_in_flight: usize, op_timeout: Duration) -> Arc<RequestQueue> {
    Arc::new(RequestQueue::new(
        "modbus_tcp",
        QueueConfig {
            max_in_flight,
            rate_limit: 100,
            rate_window: Duration::ZERO,
            op_timeout,
        },
    ))
}

#[tokio::test]
async fn endpoint_wait_does_not_count_against_timeout() {
    let addr = spawn_server(Duration::from_millis(50)).await;
    let adapter = ModbusAdapter::new(
        queue(20, Duration::from_millis(300)),
        Arc::new(ModbusTcpTransport::new(Duration::from_secs(1))),
    );
    let points: Vec<Point> = (0..12).map(|address| point(1, address)).collect();

    let result = adapter.read_points(&device(1, addr), &points).await;

    assert!(result.success);
    assert_eq!(result.readings.len(), 12);
    for reading in &result.readings {
        assert!(reading.is_ok(), "point {} failed: {:?}", reading.point_id, reading.error);
        assert_eq!(reading.value, Some((reading.point_id - 100) as f64));
    }
}

#[tokio::test]
async fn busy_device_does_not_starve_other_endpoints() {
    let busy = spawn_server(Duration::from_millis(40)).await;
    let quiet = spawn_server(Duration::from_millis(5)).await;
    let adapter = ModbusAdapter::new(
        queue(2, Duration::from_millis(300)),
        Arc::new(ModbusTcpTransport::new(Duration::from_secs(1))),
    );
    let busy_points: Vec<Point> = (0..12).map(|address| point(1, address)).collect();
    let quiet_points = vec![point(2, 7)];
    let busy_device = device(1, busy);
    let quiet_device = device(2, quiet);

    let started = Instant::now();
    let (busy_result, quiet_elapsed) = tokio::join!(
        adapter.read_points(&busy_device, &busy_points),
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let result = adapter.read_points(&quiet_device, &quiet_points).await;
            assert!(result.success);
            assert!(result.readings[0].is_ok());
            started.elapsed()
        }
    );

    assert!(busy_result.readings.iter().all(|reading| reading.is_ok()));
    assert!(
        quiet_elapsed < Duration::from_millis(200),
        "quiet device waited {:?}",
        quiet_elapsed
    );
}

#[tokio::test]
async fn cancelled_transaction_drops_connection() {
    let addr = spawn_server(Duration::from_millis(5)).await;
    let transport = ModbusTcpTransport::new(Duration::from_secs(1));

    let cancelled = tokio::time::timeout(
        Duration::from_millis(100),
        transport.read_registers(addr, 1, ModbusRegisterType::HoldingRegister, SLOW_ADDRESS, 1),
    )
    .await;
    assert!(cancelled.is_err());

    // 新请求不能收到上一个事务残留的应答
    let values = transport
        .read_registers(addr, 1, ModbusRegisterType::HoldingRegister, 5, 2)
        .await
        .unwrap();
    assert_eq!(values, vec![5, 6]);
}

#[tokio::test]
async fn connection_is_reused_between_reads() {
    let addr = spawn_server(Duration::ZERO).await;
    let transport = ModbusTcpTransport::new(Duration::from_secs(1));

    for address in [1u16, 2, 3] {
        let values = transport
            .read_registers(addr, 1, ModbusRegisterType::HoldingRegister, address, 1)
            .await
            .unwrap();
        assert_eq!(values, vec![address]);
    }
}
