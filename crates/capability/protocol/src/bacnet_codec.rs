//! BACnet/IP 报文编解码
//!
//! 只覆盖采集需要的子集：
//!
//! ```text
//! BVLC (0x81, 0x0A/0x0B/0x04, len) │ NPDU (0x01, control, [DNET/SNET]) │ APDU
//! ```
//!
//! - 编码：Confirmed-Request ReadProperty（服务号 12）
//! - 解码：Complex-ACK / Simple-ACK / Error / Reject / Abort

use crate::error::ProtocolError;
use crate::types::ObjectId;

const BVLC_TYPE: u8 = 0x81;
const BVLC_FORWARDED_NPDU: u8 = 0x04;
const BVLC_ORIGINAL_UNICAST: u8 = 0x0A;
const BVLC_ORIGINAL_BROADCAST: u8 = 0x0B;
const NPDU_VERSION: u8 = 0x01;
/// 期望应答（data expecting reply）
const NPDU_EXPECTING_REPLY: u8 = 0x04;
pub const SERVICE_READ_PROPERTY: u8 = 12;
/// 最大 APDU 1476 字节，不接受分段应答
const MAX_APDU_1476: u8 = 0x05;

/// BACnet 应用层数据值
#[derive(Debug, Clone, PartialEq)]
pub enum BacnetValue {
    Null,
    Boolean(bool),
    Unsigned(u64),
    Signed(i64),
    Real(f32),
    Double(f64),
    Enumerated(u64),
    /// 未解码的应用标签（字符串、位串、日期等）
    Unsupported(u8),
}

impl BacnetValue {
    /// 转换为数值；`Null` 与非数值类型返回 `None`。
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Boolean(v) => Some(if *v { 1.0 } else { 0.0 }),
            Self::Unsigned(v) | Self::Enumerated(v) => Some(*v as f64),
            Self::Signed(v) => Some(*v as f64),
            Self::Real(v) => Some(*v as f64),
            Self::Double(v) => Some(*v),
            Self::Null | Self::Unsupported(_) => None,
        }
    }
}

/// 解码后的 APDU
#[derive(Debug, Clone, PartialEq)]
pub enum Apdu {
    ComplexAck {
        invoke_id: u8,
        service: u8,
        value: BacnetValue,
    },
    SimpleAck {
        invoke_id: u8,
        service: u8,
    },
    Error {
        invoke_id: u8,
        class: u32,
        code: u32,
    },
    Reject {
        invoke_id: u8,
        reason: u8,
    },
    Abort {
        invoke_id: u8,
        reason: u8,
    },
    /// 与请求无关的报文（I-Am、网络层消息等）
    Other,
}

impl Apdu {
    pub fn invoke_id(&self) -> Option<u8> {
        match self {
            Self::ComplexAck { invoke_id, .. }
            | Self::SimpleAck { invoke_id, .. }
            | Self::Error { invoke_id, .. }
            | Self::Reject { invoke_id, .. }
            | Self::Abort { invoke_id, .. } => Some(*invoke_id),
            Self::Other => None,
        }
    }
}

/// 编码 ReadProperty 请求帧
pub fn encode_read_property(invoke_id: u8, object: ObjectId, property: u32) -> Vec<u8> {
    let mut apdu = vec![0x00, MAX_APDU_1476, invoke_id, SERVICE_READ_PROPERTY];
    apdu.push(0x0C);
    apdu.extend_from_slice(&object.encode().to_be_bytes());
    encode_context_unsigned(&mut apdu, 1, property);

    let length = 4 + 2 + apdu.len();
    let mut frame = Vec::with_capacity(length);
    frame.push(BVLC_TYPE);
    frame.push(BVLC_ORIGINAL_UNICAST);
    frame.extend_from_slice(&(length as u16).to_be_bytes());
    frame.push(NPDU_VERSION);
    frame.push(NPDU_EXPECTING_REPLY);
    frame.extend_from_slice(&apdu);
    frame
}

fn encode_context_unsigned(buf: &mut Vec<u8>, tag: u8, value: u32) {
    let bytes = value.to_be_bytes();
    let len = match value {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        0x1_0000..=0xFF_FFFF => 3,
        _ => 4,
    };
    buf.push((tag << 4) | 0x08 | len as u8);
    buf.extend_from_slice(&bytes[4 - len..]);
}

/// 解码一帧 BACnet/IP 报文
pub fn decode_frame(frame: &[u8]) -> Result<Apdu, ProtocolError> {
    let mut cur = Cursor::new(frame);
    if cur.u8()? != BVLC_TYPE {
        return Err(ProtocolError::DataParse("not a bacnet/ip frame".to_string()));
    }
    let function = cur.u8()?;
    let length = u16::from_be_bytes([cur.u8()?, cur.u8()?]) as usize;
    if length < 4 || length > frame.len() {
        return Err(ProtocolError::DataParse(format!(
            "bvlc length {} does not match frame of {} bytes",
            length,
            frame.len()
        )));
    }
    let mut cur = Cursor {
        buf: &frame[..length],
        pos: 4,
    };
    match function {
        BVLC_ORIGINAL_UNICAST | BVLC_ORIGINAL_BROADCAST => {}
        BVLC_FORWARDED_NPDU => {
            // 原始发送方 B/IP 地址（4 字节 IP + 2 字节端口）
            cur.skip(6)?;
        }
        _ => return Ok(Apdu::Other),
    }

    let version = cur.u8()?;
    if version != NPDU_VERSION {
        return Err(ProtocolError::DataParse(format!(
            "unsupported npdu version {}",
            version
        )));
    }
    let control = cur.u8()?;
    if control & 0x80 != 0 {
        return Ok(Apdu::Other);
    }
    if control & 0x20 != 0 {
        cur.skip(2)?;
        let len = cur.u8()? as usize;
        cur.skip(len)?;
    }
    if control & 0x08 != 0 {
        cur.skip(2)?;
        let len = cur.u8()? as usize;
        cur.skip(len)?;
    }
    if control & 0x20 != 0 {
        // hop count
        cur.skip(1)?;
    }

    decode_apdu(&mut cur)
}

fn decode_apdu(cur: &mut Cursor<'_>) -> Result<Apdu, ProtocolError> {
    let header = cur.u8()?;
    match header >> 4 {
        2 => Ok(Apdu::SimpleAck {
            invoke_id: cur.u8()?,
            service: cur.u8()?,
        }),
        3 => {
            if header & 0x08 != 0 {
                return Err(ProtocolError::Unsupported(
                    "segmented complex-ack".to_string(),
                ));
            }
            let invoke_id = cur.u8()?;
            let service = cur.u8()?;
            if service != SERVICE_READ_PROPERTY {
                return Ok(Apdu::ComplexAck {
                    invoke_id,
                    service,
                    value: BacnetValue::Unsupported(0),
                });
            }
            let value = decode_read_property_ack(cur)?;
            Ok(Apdu::ComplexAck {
                invoke_id,
                service,
                value,
            })
        }
        5 => {
            let invoke_id = cur.u8()?;
            let _service = cur.u8()?;
            let class = expect_enumerated(cur)?;
            let code = expect_enumerated(cur)?;
            Ok(Apdu::Error {
                invoke_id,
                class,
                code,
            })
        }
        6 => Ok(Apdu::Reject {
            invoke_id: cur.u8()?,
            reason: cur.u8()?,
        }),
        7 => Ok(Apdu::Abort {
            invoke_id: cur.u8()?,
            reason: cur.u8()?,
        }),
        _ => Ok(Apdu::Other),
    }
}

fn decode_read_property_ack(cur: &mut Cursor<'_>) -> Result<BacnetValue, ProtocolError> {
    // [0] 对象标识
    let tag = read_tag(cur)?;
    if !matches!(tag.class, TagClass::Context(0)) {
        return Err(ProtocolError::DataParse("expected object identifier".to_string()));
    }
    cur.skip(tag.len)?;

    // [1] 属性标识
    let tag = read_tag(cur)?;
    if !matches!(tag.class, TagClass::Context(1)) {
        return Err(ProtocolError::DataParse("expected property identifier".to_string()));
    }
    cur.skip(tag.len)?;

    // [2] 数组下标（可选），随后是 [3] 开标签
    let mut tag = read_tag(cur)?;
    if matches!(tag.class, TagClass::Context(2)) {
        cur.skip(tag.len)?;
        tag = read_tag(cur)?;
    }
    if !matches!(tag.class, TagClass::Opening(3)) {
        return Err(ProtocolError::DataParse("expected property value".to_string()));
    }
    decode_application_value(cur)
}

fn decode_application_value(cur: &mut Cursor<'_>) -> Result<BacnetValue, ProtocolError> {
    let tag = read_tag(cur)?;
    let TagClass::Application(number) = tag.class else {
        return Err(ProtocolError::DataParse("expected application tag".to_string()));
    };
    let value = match number {
        0 => BacnetValue::Null,
        // 布尔值直接编码在长度位中
        1 => BacnetValue::Boolean(tag.len != 0),
        2 => BacnetValue::Unsigned(read_unsigned(cur, tag.len)?),
        3 => BacnetValue::Signed(read_signed(cur, tag.len)?),
        4 => {
            let bytes = cur.take(tag.len)?;
            let bytes: [u8; 4] = bytes
                .try_into()
                .map_err(|_| ProtocolError::DataParse("real must be 4 bytes".to_string()))?;
            BacnetValue::Real(f32::from_be_bytes(bytes))
        }
        5 => {
            let bytes = cur.take(tag.len)?;
            let bytes: [u8; 8] = bytes
                .try_into()
                .map_err(|_| ProtocolError::DataParse("double must be 8 bytes".to_string()))?;
            BacnetValue::Double(f64::from_be_bytes(bytes))
        }
        9 => BacnetValue::Enumerated(read_unsigned(cur, tag.len)?),
        other => {
            cur.skip(tag.len)?;
            BacnetValue::Unsupported(other)
        }
    };
    Ok(value)
}

fn expect_enumerated(cur: &mut Cursor<'_>) -> Result<u32, ProtocolError> {
    let tag = read_tag(cur)?;
    if !matches!(tag.class, TagClass::Application(9)) {
        return Err(ProtocolError::DataParse("expected enumerated".to_string()));
    }
    let value = read_unsigned(cur, tag.len)?;
    u32::try_from(value).map_err(|_| ProtocolError::DataParse("enumerated out of range".to_string()))
}

#[derive(Debug, Clone, Copy)]
enum TagClass {
    Application(u8),
    Context(u8),
    Opening(u8),
    Closing,
}

#[derive(Debug, Clone, Copy)]
struct Tag {
    class: TagClass,
    len: usize,
}

fn read_tag(cur: &mut Cursor<'_>) -> Result<Tag, ProtocolError> {
    let first = cur.u8()?;
    let mut number = first >> 4;
    if number == 0x0F {
        number = cur.u8()?;
    }
    let context = first & 0x08 != 0;
    let lvt = first & 0x07;
    if context && lvt == 6 {
        return Ok(Tag {
            class: TagClass::Opening(number),
            len: 0,
        });
    }
    if context && lvt == 7 {
        return Ok(Tag {
            class: TagClass::Closing,
            len: 0,
        });
    }
    let len = if lvt == 5 {
        match cur.u8()? {
            254 => u16::from_be_bytes([cur.u8()?, cur.u8()?]) as usize,
            255 => u32::from_be_bytes([cur.u8()?, cur.u8()?, cur.u8()?, cur.u8()?]) as usize,
            n => n as usize,
        }
    } else {
        lvt as usize
    };
    let class = if context {
        TagClass::Context(number)
    } else {
        TagClass::Application(number)
    };
    Ok(Tag { class, len })
}

fn read_unsigned(cur: &mut Cursor<'_>, len: usize) -> Result<u64, ProtocolError> {
    if len == 0 || len > 8 {
        return Err(ProtocolError::DataParse(format!("invalid unsigned length {}", len)));
    }
    Ok(cur
        .take(len)?
        .iter()
        .fold(0u64, |acc, b| (acc << 8) | *b as u64))
}

fn read_signed(cur: &mut Cursor<'_>, len: usize) -> Result<i64, ProtocolError> {
    let raw = read_unsigned(cur, len)?;
    let shift = 64 - 8 * len as u32;
    Ok(((raw << shift) as i64) >> shift)
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn u8(&mut self) -> Result<u8, ProtocolError> {
        let byte = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| ProtocolError::DataParse("truncated frame".to_string()))?;
        self.pos += 1;
        Ok(byte)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| ProtocolError::DataParse("truncated frame".to_string()))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn skip(&mut self, len: usize) -> Result<(), ProtocolError> {
        self.take(len).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 组装 BVLC 原始单播帧
    fn frame(npdu_apdu: &[u8]) -> Vec<u8> {
        let length = (4 + npdu_apdu.len()) as u16;
        let mut frame = vec![0x81, 0x0A];
        frame.extend_from_slice(&length.to_be_bytes());
        frame.extend_from_slice(npdu_apdu);
        frame
    }

    fn read_property_ack(invoke_id: u8, value: &[u8]) -> Vec<u8> {
        let mut body = vec![0x01, 0x00, 0x30, invoke_id, 0x0C, 0x0C];
        body.extend_from_slice(&[0x00, 0x00, 0x00, 0x01, 0x19, 0x55, 0x3E]);
        body.extend_from_slice(value);
        body.push(0x3F);
        frame(&body)
    }

    #[test]
    fn test_encode_read_property() {
        let object = ObjectId::new(0, 1).unwrap();
        let bytes = encode_read_property(7, object, 85);
        assert_eq!(
            bytes,
            vec![
                0x81, 0x0A, 0x00, 0x11, 0x01, 0x04, 0x00, 0x05, 0x07, 0x0C, 0x0C, 0x00, 0x00,
                0x00, 0x01, 0x19, 0x55
            ]
        );
    }

    #[test]
    fn test_encode_wide_property() {
        let object = ObjectId::new(2, 5).unwrap();
        let bytes = encode_read_property(1, object, 300);
        assert_eq!(&bytes[10..15], &[0x0C, 0x00, 0x80, 0x00, 0x05]);
        assert_eq!(&bytes[15..], &[0x1A, 0x01, 0x2C]);
        assert_eq!(bytes[3] as usize, bytes.len());
    }

    #[test]
    fn test_decode_real_ack() {
        let apdu = decode_frame(&read_property_ack(7, &[0x44, 0x41, 0xAC, 0x00, 0x00])).unwrap();
        assert_eq!(
            apdu,
            Apdu::ComplexAck {
                invoke_id: 7,
                service: SERVICE_READ_PROPERTY,
                value: BacnetValue::Real(21.5),
            }
        );
        assert_eq!(apdu.invoke_id(), Some(7));
    }

    #[test]
    fn test_decode_numeric_values() {
        let enumerated = decode_frame(&read_property_ack(1, &[0x91, 0x01])).unwrap();
        let Apdu::ComplexAck { value, .. } = enumerated else {
            panic!("expected complex ack");
        };
        assert_eq!(value.as_f64(), Some(1.0));

        let signed = decode_frame(&read_property_ack(1, &[0x31, 0xFE])).unwrap();
        let Apdu::ComplexAck { value, .. } = signed else {
            panic!("expected complex ack");
        };
        assert_eq!(value, BacnetValue::Signed(-2));

        let unsigned = decode_frame(&read_property_ack(1, &[0x22, 0x01, 0x00])).unwrap();
        let Apdu::ComplexAck { value, .. } = unsigned else {
            panic!("expected complex ack");
        };
        assert_eq!(value.as_f64(), Some(256.0));

        let boolean = decode_frame(&read_property_ack(1, &[0x11])).unwrap();
        let Apdu::ComplexAck { value, .. } = boolean else {
            panic!("expected complex ack");
        };
        assert_eq!(value, BacnetValue::Boolean(true));
    }

    #[test]
    fn test_decode_null_is_not_numeric() {
        let apdu = decode_frame(&read_property_ack(3, &[0x00])).unwrap();
        let Apdu::ComplexAck { value, .. } = apdu else {
            panic!("expected complex ack");
        };
        assert_eq!(value, BacnetValue::Null);
        assert_eq!(value.as_f64(), None);
    }

    #[test]
    fn test_decode_error_pdu() {
        let apdu = decode_frame(&frame(&[0x01, 0x00, 0x50, 0x07, 0x0C, 0x91, 0x02, 0x91, 0x20])).unwrap();
        assert_eq!(
            apdu,
            Apdu::Error {
                invoke_id: 7,
                class: 2,
                code: 32,
            }
        );
    }

    #[test]
    fn test_decode_reject_and_abort() {
        let reject = decode_frame(&frame(&[0x01, 0x00, 0x60, 0x04, 0x09])).unwrap();
        assert_eq!(
            reject,
            Apdu::Reject {
                invoke_id: 4,
                reason: 9
            }
        );
        let abort = decode_frame(&frame(&[0x01, 0x00, 0x71, 0x05, 0x04])).unwrap();
        assert_eq!(
            abort,
            Apdu::Abort {
                invoke_id: 5,
                reason: 4
            }
        );
    }

    #[test]
    fn test_decode_routed_and_forwarded() {
        // NPDU 携带 SNET/SADR（来自路由器后的 MS/TP 设备）
        let mut body = vec![0x01, 0x08, 0x00, 0x05, 0x01, 0x11, 0x30, 0x02, 0x0C, 0x0C];
        body.extend_from_slice(&[0x00, 0x00, 0x00, 0x01, 0x19, 0x55, 0x3E, 0x21, 0x2A, 0x3F]);
        let apdu = decode_frame(&frame(&body)).unwrap();
        assert_eq!(apdu.invoke_id(), Some(2));

        let mut forwarded = vec![0x81, 0x04, 0x00, 0x00, 10, 0, 0, 5, 0xBA, 0xC0];
        forwarded.extend_from_slice(&[0x01, 0x00, 0x20, 0x09, 0x0C]);
        let len = forwarded.len() as u16;
        forwarded[2..4].copy_from_slice(&len.to_be_bytes());
        assert_eq!(
            decode_frame(&forwarded).unwrap(),
            Apdu::SimpleAck {
                invoke_id: 9,
                service: 12
            }
        );
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(decode_frame(&[0x82, 0x0A, 0x00, 0x04]).is_err());
        assert!(decode_frame(&[0x81, 0x0A, 0x00, 0x20, 0x01]).is_err());
        // 截断的 complex-ack
        assert!(decode_frame(&frame(&[0x01, 0x00, 0x30, 0x01, 0x0C, 0x0C, 0x00])).is_err());
        // 分段应答不支持
        assert!(matches!(
            decode_frame(&frame(&[0x01, 0x00, 0x38, 0x01, 0x00, 0x01, 0x0C])),
            Err(ProtocolError::Unsupported(_))
        ));
    }
}
