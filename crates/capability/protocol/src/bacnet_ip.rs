//! BACnet/IP UDP 客户端
//!
//! 单个 UDP socket 承载所有设备的请求；后台接收任务按 `(peer, invoke_id)`
//! 把应答分发给等待中的请求。请求超时由外层 [`RequestQueue`](crate::RequestQueue) 控制，
//! 超时取消时等待项会被自动移除。

use crate::bacnet::BacnetTransport;
use crate::bacnet_codec::{Apdu, BacnetValue, decode_frame, encode_read_property};
use crate::error::ProtocolError;
use crate::types::ObjectId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// BACnet/IP 单帧最大长度
const MAX_FRAME_LEN: usize = 1497;

type PendingMap = Arc<Mutex<HashMap<(SocketAddr, u8), oneshot::Sender<Apdu>>>>;

/// BACnet/IP 客户端
pub struct BacnetIpClient {
    socket: Arc<UdpSocket>,
    pending: PendingMap,
    next_invoke_id: AtomicU8,
    receiver: JoinHandle<()>,
}

impl BacnetIpClient {
    /// 绑定本地 UDP 地址并启动接收任务
    pub async fn bind(addr: &str) -> Result<Self, ProtocolError> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let receiver = tokio::spawn(receive_loop(socket.clone(), pending.clone()));
        info!(
            target: "ems.protocol",
            local = ?socket.local_addr().ok(),
            "bacnet_client_bound"
        );
        Ok(Self {
            socket,
            pending,
            next_invoke_id: AtomicU8::new(0),
            receiver,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ProtocolError> {
        Ok(self.socket.local_addr()?)
    }

    /// 等待应答的请求数
    pub fn pending_count(&self) -> usize {
        self.pending.lock().map(|map| map.len()).unwrap_or(0)
    }

    fn reserve_invoke_id(
        &self,
        target: SocketAddr,
        sender: oneshot::Sender<Apdu>,
    ) -> Result<u8, ProtocolError> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| ProtocolError::Bacnet("pending map poisoned".to_string()))?;
        for _ in 0..=u8::MAX as usize {
            let invoke_id = self.next_invoke_id.fetch_add(1, Ordering::Relaxed);
            if let std::collections::hash_map::Entry::Vacant(entry) =
                pending.entry((target, invoke_id))
            {
                entry.insert(sender);
                return Ok(invoke_id);
            }
        }
        Err(ProtocolError::Bacnet(format!(
            "no free invoke id for {}",
            target
        )))
    }
}

impl Drop for BacnetIpClient {
    fn drop(&mut self) {
        self.receiver.abort();
    }
}

/// 请求结束（含取消）时移除等待项
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    key: (SocketAddr, u8),
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&self.key);
        }
    }
}

#[async_trait]
impl BacnetTransport for BacnetIpClient {
    async fn read_property(
        &self,
        target: SocketAddr,
        object: ObjectId,
        property: u32,
    ) -> Result<BacnetValue, ProtocolError> {
        let (sender, receiver) = oneshot::channel();
        let invoke_id = self.reserve_invoke_id(target, sender)?;
        let _guard = PendingGuard {
            pending: &self.pending,
            key: (target, invoke_id),
        };

        let frame = encode_read_property(invoke_id, object, property);
        self.socket.send_to(&frame, target).await?;

        match receiver.await.map_err(|_| ProtocolError::ChannelClosed)? {
            Apdu::ComplexAck { value, .. } => Ok(value),
            Apdu::Error { class, code, .. } => Err(ProtocolError::Bacnet(format!(
                "error class={} code={}",
                class, code
            ))),
            Apdu::Reject { reason, .. } => {
                Err(ProtocolError::Bacnet(format!("reject reason={}", reason)))
            }
            Apdu::Abort { reason, .. } => {
                Err(ProtocolError::Bacnet(format!("abort reason={}", reason)))
            }
            other => Err(ProtocolError::Bacnet(format!(
                "unexpected response {:?}",
                other
            ))),
        }
    }
}

async fn receive_loop(socket: Arc<UdpSocket>, pending: PendingMap) {
    let mut buf = vec![0u8; MAX_FRAME_LEN];
    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                warn!(target: "ems.protocol", error = %e, "bacnet_recv_failed");
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }
        };
        let apdu = match decode_frame(&buf[..len]) {
            Ok(apdu) => apdu,
            Err(e) => {
                debug!(target: "ems.protocol", peer = %peer, error = %e, "bacnet_frame_dropped");
                continue;
            }
        };
        let Some(invoke_id) = apdu.invoke_id() else {
            continue;
        };
        let sender = pending
            .lock()
            .ok()
            .and_then(|mut map| map.remove(&(peer, invoke_id)));
        match sender {
            Some(sender) => {
                let _ = sender.send(apdu);
            }
            None => debug!(
                target: "ems.protocol",
                peer = %peer,
                invoke_id,
                "bacnet_unmatched_response"
            ),
        }
    }
}
