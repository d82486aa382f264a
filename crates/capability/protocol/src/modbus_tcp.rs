//! Modbus TCP 适配器
//!
//! 每个端点（`host:port`）复用一条懒连接；读取出现传输错误或被取消后丢弃连接，
//! 下一次读取时重连。所有读取都经过 Modbus 接口的 [`RequestQueue`]。

use crate::error::ProtocolError;
use crate::queue::RequestQueue;
use crate::reader::{PointOutcome, collect_readings};
use crate::types::{
    ModbusDataType, ModbusDeviceConfig, ModbusPointAddress, ModbusRegisterType, WordOrder,
};
use async_trait::async_trait;
use domain::{Device, DeviceReadResult, Point, QUALITY_GOOD, now_epoch_ms};
use futures::future::join_all;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_modbus::prelude::*;
use tracing::{debug, info, warn};

/// Modbus 传输层（单次寄存器读取）
///
/// 线圈与离散输入按位返回，每个位占一个 `u16`（0/1）。
#[async_trait]
pub trait ModbusTransport: Send + Sync {
    async fn read_registers(
        &self,
        endpoint: SocketAddr,
        unit_id: u8,
        register_type: ModbusRegisterType,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ProtocolError>;
}

type ConnectionSlot = Arc<Mutex<Option<tokio_modbus::client::Context>>>;

/// 基于 tokio-modbus 的 TCP 传输
pub struct ModbusTcpTransport {
    connect_timeout: Duration,
    connections: std::sync::Mutex<HashMap<SocketAddr, ConnectionSlot>>,
}

impl ModbusTcpTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            connections: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, endpoint: SocketAddr) -> Result<ConnectionSlot, ProtocolError> {
        let mut connections = self
            .connections
            .lock()
            .map_err(|_| ProtocolError::Connection("connection map poisoned".to_string()))?;
        Ok(connections.entry(endpoint).or_default().clone())
    }
}

#[async_trait]
impl ModbusTransport for ModbusTcpTransport {
    async fn read_registers(
        &self,
        endpoint: SocketAddr,
        unit_id: u8,
        register_type: ModbusRegisterType,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ProtocolError> {
        let slot = self.slot(endpoint)?;
        let mut guard = slot.lock().await;

        // 交互期间连接从槽位中取出：请求被取消（超时）时连接随 future 一起丢弃，
        // 避免残留的应答错配到下一次请求。
        let mut ctx = match guard.take() {
            Some(ctx) => ctx,
            None => {
                let ctx = tokio::time::timeout(self.connect_timeout, tcp::connect(endpoint))
                    .await
                    .map_err(|_| {
                        ProtocolError::Timeout(format!("connect to {} timed out", endpoint))
                    })?
                    .map_err(|e| ProtocolError::Connection(e.to_string()))?;
                info!(target: "ems.protocol", endpoint = %endpoint, "modbus_connected");
                ctx
            }
        };

        ctx.set_slave(Slave(unit_id));
        let response = match register_type {
            ModbusRegisterType::Coil => ctx
                .read_coils(address, count)
                .await
                .map(|r| r.map(bits_to_words)),
            ModbusRegisterType::DiscreteInput => ctx
                .read_discrete_inputs(address, count)
                .await
                .map(|r| r.map(bits_to_words)),
            ModbusRegisterType::HoldingRegister => {
                ctx.read_holding_registers(address, count).await
            }
            ModbusRegisterType::InputRegister => ctx.read_input_registers(address, count).await,
        };

        match response {
            Ok(Ok(values)) => {
                *guard = Some(ctx);
                debug!(
                    target: "ems.protocol",
                    endpoint = %endpoint,
                    unit_id,
                    function_code = register_type.function_code(),
                    address,
                    values = ?values,
                    "read modbus registers"
                );
                Ok(values)
            }
            Ok(Err(exception)) => {
                *guard = Some(ctx);
                Err(ProtocolError::Modbus(format!("exception: {:?}", exception)))
            }
            Err(e) => {
                // 传输层错误后连接状态不可信，不放回槽位，下次重连
                warn!(target: "ems.protocol", endpoint = %endpoint, error = %e, "modbus_connection_dropped");
                Err(ProtocolError::Connection(e.to_string()))
            }
        }
    }
}

fn bits_to_words(bits: Vec<bool>) -> Vec<u16> {
    bits.into_iter().map(u16::from).collect()
}

type EndpointGate = Arc<Mutex<()>>;

/// Modbus 适配器
///
/// 同一端点一次只有一个事务在线上。端点排队发生在进入读请求队列之前，
/// 因此等待端点不占用队列许可，也不计入单次操作超时。
pub struct ModbusAdapter {
    queue: Arc<RequestQueue>,
    transport: Arc<dyn ModbusTransport>,
    gates: std::sync::Mutex<HashMap<SocketAddr, EndpointGate>>,
}

impl ModbusAdapter {
    pub fn new(queue: Arc<RequestQueue>, transport: Arc<dyn ModbusTransport>) -> Self {
        Self {
            queue,
            transport,
            gates: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn gate(&self, endpoint: SocketAddr) -> EndpointGate {
        let mut gates = self
            .gates
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        gates.entry(endpoint).or_default().clone()
    }

    pub fn queue(&self) -> &Arc<RequestQueue> {
        &self.queue
    }

    pub async fn read_points(&self, device: &Device, points: &[Point]) -> DeviceReadResult {
        let config = match ModbusDeviceConfig::from_device(device) {
            Ok(config) => config,
            Err(e) => return config_failure(device, e),
        };
        let endpoint = match config.endpoint() {
            Ok(endpoint) => endpoint,
            Err(e) => return config_failure(device, e),
        };
        let unit_id = config.unit_id;
        let gate = self.gate(endpoint);

        let reads = points.iter().map(|point| {
            let gate = gate.clone();
            async move {
                let _turn = gate.lock().await;
                let ts_ms = now_epoch_ms();
                PointOutcome {
                    point_id: point.point_id,
                    ts_ms,
                    result: self.read_value(endpoint, unit_id, point).await,
                }
            }
        });
        let outcomes = join_all(reads).await;
        collect_readings(device.device_id, outcomes)
    }

    async fn read_value(
        &self,
        endpoint: SocketAddr,
        unit_id: u8,
        point: &Point,
    ) -> Result<(f64, String), ProtocolError> {
        let address = ModbusPointAddress::from_point(point)?;
        let registers = self
            .queue
            .submit(self.transport.read_registers(
                endpoint,
                unit_id,
                address.register_type,
                address.address,
                address.count,
            ))
            .await?;
        let raw = if address.register_type.is_bit() {
            registers
                .first()
                .copied()
                .map(f64::from)
                .ok_or_else(|| ProtocolError::DataParse("empty response".to_string()))?
        } else {
            parse_registers(&registers, address.data_type, address.word_order)?
        };
        Ok((address.apply_scaling(raw), QUALITY_GOOD.to_string()))
    }
}

fn config_failure(device: &Device, error: ProtocolError) -> DeviceReadResult {
    warn!(
        target: "ems.protocol",
        device_id = device.device_id,
        error = %error,
        "modbus_device_config_invalid"
    );
    DeviceReadResult::unreachable(device.device_id, error.to_string())
}

/// 解析寄存器数据为浮点值
pub fn parse_registers(
    registers: &[u16],
    data_type: ModbusDataType,
    word_order: WordOrder,
) -> Result<f64, ProtocolError> {
    let needed = data_type.register_count() as usize;
    if registers.len() < needed {
        return Err(ProtocolError::DataParse(format!(
            "need {} registers for {:?}, got {}",
            needed,
            data_type,
            registers.len()
        )));
    }

    let mut words = registers[..needed].to_vec();
    if word_order == WordOrder::LittleEndian {
        words.reverse();
    }
    let bits = words.iter().fold(0u64, |acc, w| (acc << 16) | *w as u64);

    let value = match data_type {
        ModbusDataType::Int16 => bits as u16 as i16 as f64,
        ModbusDataType::Uint16 => bits as u16 as f64,
        ModbusDataType::Int32 => bits as u32 as i32 as f64,
        ModbusDataType::Uint32 => bits as u32 as f64,
        ModbusDataType::Float32 => f32::from_bits(bits as u32) as f64,
        ModbusDataType::Float64 => f64::from_bits(bits),
    };

    Ok(value)
}
