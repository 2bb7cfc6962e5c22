//! 定宽小端编解码
//!
//! 纯函数、无状态：给定相同输入，结果恒定。
//!
//! - `encode(tag, value)`：值无法无损表达为目标宽度时返回 `TypeMismatch`
//! - `decode(tag, bytes)`：字节数少于定宽时返回 `ShortBuffer`，多余字节忽略

use std::fmt;

use crate::ProtocolError;
use crate::ids::FRAME_CAPACITY;
use crate::value::{TypeTag, Value};

/// 帧载荷（最多 8 字节，栈上存储）
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Payload {
    bytes: [u8; FRAME_CAPACITY],
    len: u8,
}

impl Payload {
    pub const EMPTY: Payload = Payload {
        bytes: [0; FRAME_CAPACITY],
        len: 0,
    };

    /// 从切片构建，超过 8 字节返回 `PayloadTooLarge`（不截断）
    pub fn from_slice(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() > FRAME_CAPACITY {
            return Err(ProtocolError::PayloadTooLarge {
                size: data.len(),
                capacity: FRAME_CAPACITY,
            });
        }
        let mut bytes = [0u8; FRAME_CAPACITY];
        bytes[..data.len()].copy_from_slice(data);
        Ok(Self {
            bytes,
            len: data.len() as u8,
        })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 前 4 字节按 u32 小端解读（不足 4 字节返回 `None`）
    pub fn le_u32_at(&self, offset: usize) -> Option<u32> {
        let slice = self.as_slice().get(offset..offset + 4)?;
        Some(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payload[")?;
        for (i, b) in self.as_slice().iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:02X}", b)?;
        }
        write!(f, "]")
    }
}

impl AsRef<[u8]> for Payload {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

fn mismatch(tag: TypeTag, value: &Value) -> ProtocolError {
    ProtocolError::TypeMismatch {
        tag,
        value: format!("{:?}", value),
    }
}

/// 取整数表示；带小数、非有限值、布尔、空值均失败
fn integer_of(tag: TypeTag, value: &Value) -> Result<i128, ProtocolError> {
    match *value {
        Value::Float32(f) if f.is_finite() && f.fract() == 0.0 => Ok(f as i128),
        Value::Float32(_) | Value::Bool(_) | Value::Empty => Err(mismatch(tag, value)),
        _ => value.as_i128().ok_or_else(|| mismatch(tag, value)),
    }
}

/// 取 f32 表示；整数必须能被 f32 精确表达
fn float_of(tag: TypeTag, value: &Value) -> Result<f32, ProtocolError> {
    match *value {
        Value::Float32(f) => Ok(f),
        Value::Bool(_) | Value::Empty => Err(mismatch(tag, value)),
        _ => {
            let i = value.as_i128().ok_or_else(|| mismatch(tag, value))?;
            let f = i as f32;
            if f as i128 == i {
                Ok(f)
            } else {
                Err(mismatch(tag, value))
            }
        },
    }
}

macro_rules! narrow {
    ($ty:ty, $tag:expr, $value:expr) => {{
        let wide = integer_of($tag, $value)?;
        let v = <$ty>::try_from(wide).map_err(|_| mismatch($tag, $value))?;
        Payload::from_slice(&v.to_le_bytes())
    }};
}

/// 按类型标签编码值
///
/// # 示例
///
/// ```rust
/// use drivelink_protocol::{encode, TypeTag, Value};
///
/// let payload = encode(TypeTag::Float32, &Value::Float32(4.5)).unwrap();
/// assert_eq!(payload.as_slice(), &4.5f32.to_le_bytes());
///
/// // 带小数的值不能写入整数端点
/// assert!(encode(TypeTag::Uint32, &Value::Float32(1.5)).is_err());
/// ```
pub fn encode(tag: TypeTag, value: &Value) -> Result<Payload, ProtocolError> {
    match tag {
        TypeTag::Function => match value {
            Value::Empty => Ok(Payload::EMPTY),
            _ => Err(mismatch(tag, value)),
        },
        TypeTag::Bool => match value {
            Value::Bool(b) => Payload::from_slice(&[*b as u8]),
            _ => Err(mismatch(tag, value)),
        },
        TypeTag::Float32 => Payload::from_slice(&float_of(tag, value)?.to_le_bytes()),
        TypeTag::Uint8 => narrow!(u8, tag, value),
        TypeTag::Uint32 => narrow!(u32, tag, value),
        TypeTag::Int32 => narrow!(i32, tag, value),
        TypeTag::Uint64 => narrow!(u64, tag, value),
        TypeTag::Int64 => narrow!(i64, tag, value),
    }
}

/// 按类型标签解码字节
pub fn decode(tag: TypeTag, bytes: &[u8]) -> Result<Value, ProtocolError> {
    let width = tag.width();
    if bytes.len() < width {
        return Err(ProtocolError::ShortBuffer {
            tag,
            expected: width,
            actual: bytes.len(),
        });
    }

    let mut buf = [0u8; 8];
    buf[..width].copy_from_slice(&bytes[..width]);

    let value = match tag {
        TypeTag::Function => Value::Empty,
        TypeTag::Bool => Value::Bool(buf[0] != 0),
        TypeTag::Uint8 => Value::Uint8(buf[0]),
        TypeTag::Uint32 => Value::Uint32(u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])),
        TypeTag::Int32 => Value::Int32(i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])),
        TypeTag::Float32 => Value::Float32(f32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])),
        TypeTag::Uint64 => Value::Uint64(u64::from_le_bytes(buf)),
        TypeTag::Int64 => Value::Int64(i64::from_le_bytes(buf)),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_float_scenario() {
        let payload = encode(TypeTag::Float32, &Value::Float32(4.5)).unwrap();
        assert_eq!(payload.as_slice(), &[0x00, 0x00, 0x90, 0x40]);
    }

    #[test]
    fn test_encode_little_endian() {
        let payload = encode(TypeTag::Uint32, &Value::Uint32(0x1234_5678)).unwrap();
        assert_eq!(payload.as_slice(), &[0x78, 0x56, 0x34, 0x12]);

        let payload = encode(TypeTag::Int32, &Value::Int32(-1)).unwrap();
        assert_eq!(payload.as_slice(), &[0xFF; 4]);
    }

    #[test]
    fn test_encode_lossless_cross_width() {
        // 配置文件里的整数写入浮点端点
        let payload = encode(TypeTag::Float32, &Value::Int64(20)).unwrap();
        assert_eq!(payload.as_slice(), &20.0f32.to_le_bytes());

        // 整数值的浮点写入整数端点
        let payload = encode(TypeTag::Uint8, &Value::Float32(2.0)).unwrap();
        assert_eq!(payload.as_slice(), &[2]);

        let payload = encode(TypeTag::Int64, &Value::Int32(-7)).unwrap();
        assert_eq!(payload.as_slice(), &(-7i64).to_le_bytes());
    }

    #[test]
    fn test_encode_type_mismatch() {
        let cases = [
            (TypeTag::Uint32, Value::Float32(1.5)),
            (TypeTag::Uint8, Value::Uint32(256)),
            (TypeTag::Uint32, Value::Int32(-1)),
            (TypeTag::Int32, Value::Uint64(u64::MAX)),
            (TypeTag::Uint8, Value::Float32(f32::NAN)),
            (TypeTag::Bool, Value::Uint8(1)),
            (TypeTag::Uint8, Value::Bool(true)),
            (TypeTag::Float32, Value::Int64((1 << 24) + 1)),
            (TypeTag::Function, Value::Uint8(0)),
            (TypeTag::Uint32, Value::Empty),
        ];
        for (tag, value) in cases {
            let result = encode(tag, &value);
            assert!(
                matches!(result, Err(ProtocolError::TypeMismatch { .. })),
                "{tag} <- {value:?} should mismatch, got {result:?}"
            );
        }
    }

    #[test]
    fn test_function_payload_is_empty() {
        let payload = encode(TypeTag::Function, &Value::Empty).unwrap();
        assert!(payload.is_empty());
        assert_eq!(decode(TypeTag::Function, &[]).unwrap(), Value::Empty);
    }

    #[test]
    fn test_decode_short_buffer() {
        let err = decode(TypeTag::Float32, &[0x00, 0x00]).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::ShortBuffer {
                tag: TypeTag::Float32,
                expected: 4,
                actual: 2
            }
        );
        assert!(decode(TypeTag::Int64, &[0; 7]).is_err());
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let value = decode(TypeTag::Uint8, &[0x2A, 0xFF, 0xFF]).unwrap();
        assert_eq!(value, Value::Uint8(42));
    }

    #[test]
    fn test_payload_from_slice_rejects_overflow() {
        let err = Payload::from_slice(&[0; 9]).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::PayloadTooLarge {
                size: 9,
                capacity: 8
            }
        );
    }

    #[test]
    fn test_payload_debug_is_hex() {
        let payload = Payload::from_slice(&[0x0A, 0xFF]).unwrap();
        assert_eq!(format!("{:?}", payload), "Payload[0A FF]");
    }

    proptest! {
        #[test]
        fn prop_roundtrip_u8(v in any::<u8>()) {
            let bytes = encode(TypeTag::Uint8, &Value::Uint8(v)).unwrap();
            prop_assert_eq!(decode(TypeTag::Uint8, bytes.as_slice()).unwrap(), Value::Uint8(v));
        }

        #[test]
        fn prop_roundtrip_u32(v in any::<u32>()) {
            let bytes = encode(TypeTag::Uint32, &Value::Uint32(v)).unwrap();
            prop_assert_eq!(decode(TypeTag::Uint32, bytes.as_slice()).unwrap(), Value::Uint32(v));
        }

        #[test]
        fn prop_roundtrip_i32(v in any::<i32>()) {
            let bytes = encode(TypeTag::Int32, &Value::Int32(v)).unwrap();
            prop_assert_eq!(decode(TypeTag::Int32, bytes.as_slice()).unwrap(), Value::Int32(v));
        }

        #[test]
        fn prop_roundtrip_u64(v in any::<u64>()) {
            let bytes = encode(TypeTag::Uint64, &Value::Uint64(v)).unwrap();
            prop_assert_eq!(decode(TypeTag::Uint64, bytes.as_slice()).unwrap(), Value::Uint64(v));
        }

        #[test]
        fn prop_roundtrip_i64(v in any::<i64>()) {
            let bytes = encode(TypeTag::Int64, &Value::Int64(v)).unwrap();
            prop_assert_eq!(decode(TypeTag::Int64, bytes.as_slice()).unwrap(), Value::Int64(v));
        }

        #[test]
        fn prop_roundtrip_f32(v in any::<f32>().prop_filter("NaN never equals itself", |f| !f.is_nan())) {
            let bytes = encode(TypeTag::Float32, &Value::Float32(v)).unwrap();
            prop_assert_eq!(decode(TypeTag::Float32, bytes.as_slice()).unwrap(), Value::Float32(v));
        }

        #[test]
        fn prop_roundtrip_bool(v in any::<bool>()) {
            let bytes = encode(TypeTag::Bool, &Value::Bool(v)).unwrap();
            prop_assert_eq!(decode(TypeTag::Bool, bytes.as_slice()).unwrap(), Value::Bool(v));
        }
    }
}
