//! Typed message body model.
//!
//! The bus transports structured values rather than a serialized wire image
//! (the D-Bus marshalling format itself is outside this crate). Conversions
//! between domain types and [`Value`]s go through [`DBusEncode`] /
//! [`DBusDecode`], and whole message bodies through [`EncodeArgs`] /
//! [`DecodeArgs`].

use crate::error::{Error, ErrorKind, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Byte(u8),
    Bool(bool),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    Str(String),
    ObjectPath(String),
    Array(Vec<Value>),
    Struct(Vec<Value>),
    Variant(Box<Value>),
    Dict(Vec<(Value, Value)>),
}

impl Value {
    pub fn bytes(data: &[u8]) -> Value {
        Value::Array(data.iter().map(|&b| Value::Byte(b)).collect())
    }

    pub fn as_bytes(&self) -> Result<Vec<u8>> {
        match self {
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::Byte(b) => Ok(*b),
                    _ => Err(type_error("byte array")),
                })
                .collect(),
            _ => Err(type_error("byte array")),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            Value::Str(s) | Value::ObjectPath(s) => Ok(s),
            _ => Err(type_error("string")),
        }
    }

    /// Unwraps nested variants.
    pub fn unwrap_variant(&self) -> &Value {
        match self {
            Value::Variant(inner) => inner.unwrap_variant(),
            other => other,
        }
    }
}

fn type_error(expected: &str) -> Error {
    Error::new(ErrorKind::Parse, format!("Expected {expected} in message body"))
}

pub trait DBusEncode {
    fn encode(&self) -> Value;
}

pub trait DBusDecode: Sized {
    fn decode(value: &Value) -> Result<Self>;
}

macro_rules! impl_basic_codec {
    ($ty:ty, $variant:ident, $expected:expr) => {
        impl DBusEncode for $ty {
            fn encode(&self) -> Value {
                Value::$variant(*self)
            }
        }

        impl DBusDecode for $ty {
            fn decode(value: &Value) -> Result<Self> {
                match value.unwrap_variant() {
                    Value::$variant(v) => Ok(*v),
                    _ => Err(type_error($expected)),
                }
            }
        }
    };
}

impl_basic_codec!(u8, Byte, "byte");
impl_basic_codec!(bool, Bool, "boolean");
impl_basic_codec!(i16, I16, "int16");
impl_basic_codec!(u16, U16, "uint16");
impl_basic_codec!(i32, I32, "int32");
impl_basic_codec!(u32, U32, "uint32");
impl_basic_codec!(i64, I64, "int64");
impl_basic_codec!(u64, U64, "uint64");

impl DBusEncode for String {
    fn encode(&self) -> Value {
        Value::Str(self.clone())
    }
}

impl DBusDecode for String {
    fn decode(value: &Value) -> Result<Self> {
        value.unwrap_variant().as_str().map(str::to_owned)
    }
}

impl DBusEncode for &str {
    fn encode(&self) -> Value {
        Value::Str((*self).to_owned())
    }
}

impl<T: DBusEncode> DBusEncode for Vec<T> {
    fn encode(&self) -> Value {
        Value::Array(self.iter().map(DBusEncode::encode).collect())
    }
}

impl<T: DBusDecode> DBusDecode for Vec<T> {
    fn decode(value: &Value) -> Result<Self> {
        match value.unwrap_variant() {
            Value::Array(items) => items.iter().map(T::decode).collect(),
            _ => Err(type_error("array")),
        }
    }
}

impl DBusEncode for Value {
    fn encode(&self) -> Value {
        self.clone()
    }
}

impl DBusDecode for Value {
    fn decode(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

/// Encodes a handler's reply tuple into a message body.
pub trait EncodeArgs {
    fn encode_args(self) -> Vec<Value>;
}

/// Decodes a message body into a typed tuple.
pub trait DecodeArgs: Sized {
    fn decode_args(values: &[Value]) -> Result<Self>;
}

impl EncodeArgs for () {
    fn encode_args(self) -> Vec<Value> {
        Vec::new()
    }
}

impl DecodeArgs for () {
    fn decode_args(values: &[Value]) -> Result<Self> {
        if values.is_empty() {
            Ok(())
        } else {
            Err(type_error("empty body"))
        }
    }
}

macro_rules! impl_args {
    ($count:expr, $($name:ident : $index:tt),+) => {
        impl<$($name: DBusEncode),+> EncodeArgs for ($($name,)+) {
            fn encode_args(self) -> Vec<Value> {
                vec![$(self.$index.encode()),+]
            }
        }

        impl<$($name: DBusDecode),+> DecodeArgs for ($($name,)+) {
            fn decode_args(values: &[Value]) -> Result<Self> {
                if values.len() != $count {
                    return Err(type_error("message body of matching arity"));
                }
                Ok(($($name::decode(&values[$index])?,)+))
            }
        }
    };
}

impl_args!(1, A: 0);
impl_args!(2, A: 0, B: 1);
impl_args!(3, A: 0, B: 1, C: 2);
impl_args!(4, A: 0, B: 1, C: 2, D: 3);
impl_args!(5, A: 0, B: 1, C: 2, D: 3, E: 4);
impl_args!(6, A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);

/// Reads one struct field, failing with `Parse` when the shape mismatches.
pub fn struct_field<'a>(fields: &'a [Value], index: usize) -> Result<&'a Value> {
    fields
        .get(index)
        .ok_or_else(|| type_error("struct with enough fields"))
}

/// Unpacks a struct value into its field list.
pub fn as_struct(value: &Value) -> Result<&[Value]> {
    match value.unwrap_variant() {
        Value::Struct(fields) => Ok(fields),
        _ => Err(type_error("struct")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tuple_round_trip() {
        let body = (42u32, "wpan0".to_owned(), vec![1u8, 2, 3]).encode_args();
        let decoded: (u32, String, Vec<u8>) = DecodeArgs::decode_args(&body).unwrap();
        assert_eq!(decoded, (42, "wpan0".to_owned(), vec![1, 2, 3]));
    }

    #[test]
    fn test_arity_mismatch_is_parse_error() {
        let body = (1u8,).encode_args();
        let err = <(u8, u8)>::decode_args(&body).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn test_variant_unwrapping() {
        let value = Value::Variant(Box::new(Value::U16(7)));
        assert_eq!(u16::decode(&value).unwrap(), 7);
    }

    #[test]
    fn test_byte_array_helpers() {
        let value = Value::bytes(&[0xde, 0xad]);
        assert_eq!(value.as_bytes().unwrap(), vec![0xde, 0xad]);
    }
}
