use async_trait::async_trait;
use domain::{Device, DeviceStatus, LoggingMode, Point, ProtocolKind};
use ems_protocol::{
    BacnetAdapter, BacnetTransport, BacnetValue, DevicePointReader, ModbusAdapter,
    ModbusRegisterType, ModbusTransport, ObjectId, PointReader, ProtocolAdapter, ProtocolError,
    QueueConfig, RequestQueue,
};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn queue() -> Arc<RequestQueue> {
    Arc::new(RequestQueue::new(
        "test",
        QueueConfig {
            max_in_flight: 4,
            rate_limit: 100,
            rate_window: Duration::from_millis(10),
            op_timeout: Duration::from_millis(100),
        },
    ))
}

fn device(protocol: ProtocolKind, config: serde_json::Value) -> Device {
    Device {
        device_id: 1,
        name: "AHU-1".to_string(),
        protocol,
        polling_interval_ms: None,
        logging_mode: LoggingMode::Cov,
        status: DeviceStatus::Online,
        config,
    }
}

fn bacnet_point(point_id: i64, instance: u32) -> Point {
    Point {
        point_id,
        device_id: 1,
        name: format!("AI-{}", instance),
        object_type: Some("analog-input".to_string()),
        object_instance: Some(instance),
        register_type: None,
        register_address: None,
        config: json!({}),
        is_monitor: true,
        is_history_enabled: true,
        table_name: None,
    }
}

fn modbus_point(point_id: i64, address: u16, config: serde_json::Value) -> Point {
    Point {
        point_id,
        device_id: 1,
        name: format!("HR-{}", address),
        object_type: None,
        object_instance: None,
        register_type: Some("holding_register".to_string()),
        register_address: Some(address),
        config,
        is_monitor: true,
        is_history_enabled: true,
        table_name: None,
    }
}

/// 按实例号返回预设结果的 BACnet 传输
struct FakeBacnet {
    values: HashMap<u32, Result<BacnetValue, &'static str>>,
    calls: Mutex<Vec<(SocketAddr, ObjectId, u32)>>,
}

#[async_trait]
impl BacnetTransport for FakeBacnet {
    async fn read_property(
        &self,
        target: SocketAddr,
        object: ObjectId,
        property: u32,
    ) -> Result<BacnetValue, ProtocolError> {
        self.calls.lock().unwrap().push((target, object, property));
        match self.values.get(&object.instance) {
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err("timeout")) => {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(BacnetValue::Null)
            }
            Some(Err(message)) => Err(ProtocolError::Bacnet(message.to_string())),
            None => Err(ProtocolError::Bacnet("unknown-object".to_string())),
        }
    }
}

struct FakeModbus {
    registers: HashMap<u16, Vec<u16>>,
}

#[async_trait]
impl ModbusTransport for FakeModbus {
    async fn read_registers(
        &self,
        _endpoint: SocketAddr,
        _unit_id: u8,
        register_type: ModbusRegisterType,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ProtocolError> {
        assert_eq!(register_type, ModbusRegisterType::HoldingRegister);
        match self.registers.get(&address) {
            Some(words) => Ok(words.iter().copied().take(count as usize).collect()),
            None => Err(ProtocolError::Modbus("exception: IllegalDataAddress".to_string())),
        }
    }
}

fn bacnet_reader(values: HashMap<u32, Result<BacnetValue, &'static str>>) -> (DevicePointReader, Arc<FakeBacnet>) {
    let transport = Arc::new(FakeBacnet {
        values,
        calls: Mutex::new(Vec::new()),
    });
    let reader = DevicePointReader::new().with_adapter(ProtocolAdapter::Bacnet(BacnetAdapter::new(
        queue(),
        transport.clone(),
    )));
    (reader, transport)
}

#[tokio::test]
async fn test_bacnet_per_point_isolation() {
    let mut values = HashMap::new();
    values.insert(1, Ok(BacnetValue::Real(21.5)));
    values.insert(2, Err("unknown-property"));
    values.insert(3, Ok(BacnetValue::Enumerated(1)));
    let (reader, transport) = bacnet_reader(values);

    let device = device(ProtocolKind::Bacnet, json!({"address": "127.0.0.1:47808"}));
    let points = vec![bacnet_point(10, 1), bacnet_point(20, 2), bacnet_point(30, 3)];
    let result = reader.read_points(&device, &points).await;

    assert!(result.success);
    assert_eq!(result.readings.len(), 3);
    let by_id: HashMap<i64, _> = result.readings.iter().map(|r| (r.point_id, r)).collect();
    assert_eq!(by_id[&10].value, Some(21.5));
    assert!(!by_id[&20].is_ok());
    assert!(by_id[&20].error.as_deref().unwrap().contains("unknown-property"));
    assert_eq!(by_id[&30].value, Some(1.0));

    let calls = transport.calls.lock().unwrap();
    assert_eq!(calls.len(), 3);
    assert!(calls.iter().all(|(_, _, property)| *property == 85));
}

#[tokio::test]
async fn test_bacnet_all_timeouts_mean_unreachable() {
    let mut values = HashMap::new();
    values.insert(1, Err("timeout"));
    values.insert(2, Err("timeout"));
    let (reader, _) = bacnet_reader(values);

    let device = device(ProtocolKind::Bacnet, json!({"host": "127.0.0.1"}));
    let result = reader
        .read_points(&device, &[bacnet_point(10, 1), bacnet_point(20, 2)])
        .await;

    assert!(!result.success);
    assert!(result.readings.is_empty());
}

#[tokio::test]
async fn test_non_numeric_value_is_point_error() {
    let mut values = HashMap::new();
    values.insert(1, Ok(BacnetValue::Null));
    values.insert(2, Ok(BacnetValue::Unsigned(7)));
    let (reader, _) = bacnet_reader(values);

    let device = device(ProtocolKind::Bacnet, json!({"address": "127.0.0.1"}));
    let result = reader
        .read_points(&device, &[bacnet_point(10, 1), bacnet_point(20, 2)])
        .await;

    assert!(result.success);
    assert!(!result.readings[0].is_ok());
    assert_eq!(result.readings[1].value, Some(7.0));
}

#[tokio::test]
async fn test_non_monitor_points_are_skipped() {
    let mut values = HashMap::new();
    values.insert(1, Ok(BacnetValue::Real(1.0)));
    let (reader, transport) = bacnet_reader(values);

    let mut hidden = bacnet_point(20, 2);
    hidden.is_monitor = false;
    let device = device(ProtocolKind::Bacnet, json!({"address": "127.0.0.1"}));
    let result = reader
        .read_points(&device, &[bacnet_point(10, 1), hidden])
        .await;

    assert_eq!(result.readings.len(), 1);
    assert_eq!(transport.calls.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_bad_device_config_is_unreachable() {
    let (reader, transport) = bacnet_reader(HashMap::new());
    let device = device(ProtocolKind::Bacnet, json!({"device_instance": 5}));
    let result = reader.read_points(&device, &[bacnet_point(10, 1)]).await;

    assert!(!result.success);
    assert!(transport.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_adapter_is_unreachable() {
    let (reader, _) = bacnet_reader(HashMap::new());
    let device = device(ProtocolKind::Modbus, json!({"host": "127.0.0.1"}));
    let result = reader
        .read_points(&device, &[modbus_point(10, 100, json!({}))])
        .await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("modbus"));
}

#[tokio::test]
async fn test_modbus_decoding_and_scaling() {
    let mut registers = HashMap::new();
    registers.insert(100, vec![0x41AC, 0x0000]);
    registers.insert(200, vec![250]);
    let reader = DevicePointReader::new().with_adapter(ProtocolAdapter::Modbus(ModbusAdapter::new(
        queue(),
        Arc::new(FakeModbus { registers }),
    )));

    let device = device(ProtocolKind::Modbus, json!({"host": "127.0.0.1", "unit_id": 3}));
    let points = vec![
        modbus_point(10, 100, json!({"data_type": "float32"})),
        modbus_point(20, 200, json!({"data_type": "uint16", "scale": 0.5, "offset": 1.0})),
        modbus_point(30, 300, json!({})),
    ];
    let result = reader.read_points(&device, &points).await;

    assert!(result.success);
    assert_eq!(result.readings[0].value, Some(21.5));
    assert_eq!(result.readings[1].value, Some(126.0));
    assert!(!result.readings[2].is_ok());
}
