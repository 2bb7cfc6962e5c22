//! 类型标签与运行时值
//!
//! `TypeTag` 是封闭的原语类型集合；`Value` 是调用者传入/取回的运行时表示。
//! 两者之间的转换由 [`codec`](crate::codec) 负责，不做静默强转。

use std::fmt;
use std::str::FromStr;

use crate::ProtocolError;

/// 端点原语类型标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Bool,
    Uint8,
    Uint32,
    Int32,
    Uint64,
    Int64,
    Float32,
    /// 函数端点：调用是一次带副作用的触发，无值语义
    Function,
}

impl TypeTag {
    /// 定宽编码后的字节数
    pub const fn width(self) -> usize {
        match self {
            TypeTag::Bool | TypeTag::Uint8 => 1,
            TypeTag::Uint32 | TypeTag::Int32 | TypeTag::Float32 => 4,
            TypeTag::Uint64 | TypeTag::Int64 => 8,
            TypeTag::Function => 0,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            TypeTag::Bool => "bool",
            TypeTag::Uint8 => "uint8",
            TypeTag::Uint32 => "uint32",
            TypeTag::Int32 => "int32",
            TypeTag::Uint64 => "uint64",
            TypeTag::Int64 => "int64",
            TypeTag::Float32 => "float32",
            TypeTag::Function => "function",
        }
    }

    pub const fn is_function(self) -> bool {
        matches!(self, TypeTag::Function)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TypeTag {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bool" => Ok(TypeTag::Bool),
            "uint8" => Ok(TypeTag::Uint8),
            "uint32" => Ok(TypeTag::Uint32),
            "int32" => Ok(TypeTag::Int32),
            "uint64" => Ok(TypeTag::Uint64),
            "int64" => Ok(TypeTag::Int64),
            "float" | "float32" => Ok(TypeTag::Float32),
            "function" | "endpoint_ref" => Ok(TypeTag::Function),
            other => Err(ProtocolError::InvalidSchema(format!(
                "unknown type tag '{}'",
                other
            ))),
        }
    }
}

/// 端点值
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Bool(bool),
    Uint8(u8),
    Uint32(u32),
    Int32(i32),
    Uint64(u64),
    Int64(i64),
    Float32(f32),
    /// 函数调用的"空值"
    Empty,
}

impl Value {
    /// 该值天然对应的类型标签
    pub const fn natural_tag(&self) -> TypeTag {
        match self {
            Value::Bool(_) => TypeTag::Bool,
            Value::Uint8(_) => TypeTag::Uint8,
            Value::Uint32(_) => TypeTag::Uint32,
            Value::Int32(_) => TypeTag::Int32,
            Value::Uint64(_) => TypeTag::Uint64,
            Value::Int64(_) => TypeTag::Int64,
            Value::Float32(_) => TypeTag::Float32,
            Value::Empty => TypeTag::Function,
        }
    }

    /// 整数值（浮点/布尔/空返回 `None`）
    pub fn as_i128(&self) -> Option<i128> {
        match *self {
            Value::Uint8(v) => Some(v as i128),
            Value::Uint32(v) => Some(v as i128),
            Value::Int32(v) => Some(v as i128),
            Value::Uint64(v) => Some(v as i128),
            Value::Int64(v) => Some(v as i128),
            _ => None,
        }
    }

    /// 数值的 f64 近似（用于容差比较）
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Float32(v) => Some(v as f64),
            Value::Bool(_) | Value::Empty => None,
            _ => self.as_i128().map(|v| v as f64),
        }
    }

    /// 按容差比较两个值
    ///
    /// 任一侧为浮点时使用绝对容差，其余情况要求精确相等（整数跨宽度比较）。
    pub fn approx_eq(&self, other: &Value, tolerance: f64) -> bool {
        match (self, other) {
            (Value::Float32(_), _) | (_, Value::Float32(_)) => {
                match (self.as_f64(), other.as_f64()) {
                    (Some(a), Some(b)) => (a - b).abs() <= tolerance,
                    _ => false,
                }
            },
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Empty, Value::Empty) => true,
            _ => match (self.as_i128(), other.as_i128()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{}", v),
            Value::Uint8(v) => write!(f, "{}", v),
            Value::Uint32(v) => write!(f, "{}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::Uint64(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Float32(v) => write!(f, "{}", v),
            Value::Empty => f.write_str("()"),
        }
    }
}

macro_rules! impl_from_primitive {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_from_primitive! {
    bool => Bool,
    u8 => Uint8,
    u32 => Uint32,
    i32 => Int32,
    u64 => Uint64,
    i64 => Int64,
    f32 => Float32,
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Empty
    }
}
