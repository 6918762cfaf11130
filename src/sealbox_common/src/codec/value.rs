use alloc::string::{String, ToString};
use alloc::vec::Vec;

use anyhow::{anyhow, bail, Error, Result};
#[cfg(feature = "tracing")]
use tracing::{instrument, Span};

use super::verifier::{verify, ValueTag, SIZE_PREFIX_LEN};

/// A marshal-able call or return payload. A `Value` only ever comes out of
/// [`TryFrom<&[u8]>`], which runs the structural verifier first; it is never
/// mutated and is discarded after the call returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// i32
    Int(i32),
    /// i64
    Long(i64),
    /// UTF-8 string
    String(String),
    /// bool
    Bool(bool),
    /// Vec<u8>
    VecBytes(Vec<u8>),
    /// A raw buffer carrying its own declared size alongside the payload.
    SizePrefixedBuffer(Vec<u8>),
    /// ()
    Void,
}

impl Value {
    pub fn tag(&self) -> ValueTag {
        match self {
            Value::Int(_) => ValueTag::Int,
            Value::Long(_) => ValueTag::Long,
            Value::String(_) => ValueTag::String,
            Value::Bool(_) => ValueTag::Bool,
            Value::VecBytes(_) => ValueTag::VecBytes,
            Value::SizePrefixedBuffer(_) => ValueTag::SizePrefixedBuffer,
            Value::Void => ValueTag::Void,
        }
    }
}

impl TryFrom<&[u8]> for Value {
    type Error = Error;

    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level= "Trace"))]
    fn try_from(buf: &[u8]) -> Result<Self> {
        let verified = verify(buf).map_err(|e| anyhow!("{e}"))?;
        let value = match verified.tag() {
            Some(ValueTag::Int) => Value::Int(verified.read_i32()),
            Some(ValueTag::Long) => Value::Long(verified.read_i64()),
            Some(ValueTag::Bool) => Value::Bool(verified.read_bool()),
            Some(ValueTag::String) => {
                let s = core::str::from_utf8(verified.read_bytes())
                    .map_err(|_| anyhow!("string payload is not valid UTF-8"))?;
                Value::String(s.to_string())
            }
            Some(ValueTag::VecBytes) => Value::VecBytes(verified.read_bytes().to_vec()),
            Some(ValueTag::SizePrefixedBuffer) => {
                let (declared, bytes) = verified.read_size_prefixed();
                if declared as usize != bytes.len() {
                    bail!(
                        "size-prefixed buffer declares {} bytes but carries {}",
                        declared,
                        bytes.len()
                    );
                }
                Value::SizePrefixedBuffer(bytes.to_vec())
            }
            // Absent values decode as void; the tag range is open-ended by
            // policy so an unknown revision degrades instead of erroring.
            Some(ValueTag::Void) | None => Value::Void,
        };
        Ok(value)
    }
}

impl TryFrom<&Value> for Vec<u8> {
    type Error = Error;

    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level= "Trace"))]
    fn try_from(value: &Value) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(32);
        // Size prefix is patched once the payload length is known.
        buf.extend_from_slice(&[0u8; SIZE_PREFIX_LEN]);
        let root = (SIZE_PREFIX_LEN + 4) as u32;
        buf.extend_from_slice(&root.to_le_bytes());
        buf.push(value.tag() as u8);

        match value {
            Value::Int(i) => buf.extend_from_slice(&i.to_le_bytes()),
            Value::Long(l) => buf.extend_from_slice(&l.to_le_bytes()),
            Value::Bool(b) => buf.push(*b as u8),
            Value::String(s) => {
                let len = u32::try_from(s.len()).map_err(|_| anyhow!("string too long"))?;
                buf.extend_from_slice(&len.to_le_bytes());
                buf.extend_from_slice(s.as_bytes());
            }
            Value::VecBytes(v) => {
                let len = u32::try_from(v.len()).map_err(|_| anyhow!("vector too long"))?;
                buf.extend_from_slice(&len.to_le_bytes());
                buf.extend_from_slice(v);
            }
            Value::SizePrefixedBuffer(v) => {
                let len = u32::try_from(v.len()).map_err(|_| anyhow!("buffer too long"))?;
                buf.extend_from_slice(&len.to_le_bytes());
                buf.extend_from_slice(&len.to_le_bytes());
                buf.extend_from_slice(v);
            }
            Value::Void => {}
        }

        let declared = (buf.len() - SIZE_PREFIX_LEN) as u32;
        buf[..SIZE_PREFIX_LEN].copy_from_slice(&declared.to_le_bytes());
        Ok(buf)
    }
}

impl TryFrom<Value> for i32 {
    type Error = Error;
    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level= "Trace"))]
    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Int(v) => Ok(v),
            _ => {
                bail!("Unexpected value kind: {:?}", value)
            }
        }
    }
}

impl TryFrom<Value> for i64 {
    type Error = Error;
    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level= "Trace"))]
    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Long(v) => Ok(v),
            _ => {
                bail!("Unexpected value kind: {:?}", value)
            }
        }
    }
}

impl TryFrom<Value> for String {
    type Error = Error;
    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level= "Trace"))]
    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::String(v) => Ok(v),
            _ => {
                bail!("Unexpected value kind: {:?}", value)
            }
        }
    }
}

impl TryFrom<Value> for bool {
    type Error = Error;
    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level= "Trace"))]
    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Bool(v) => Ok(v),
            _ => {
                bail!("Unexpected value kind: {:?}", value)
            }
        }
    }
}

impl TryFrom<Value> for Vec<u8> {
    type Error = Error;
    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level= "Trace"))]
    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::VecBytes(v) => Ok(v),
            Value::SizePrefixedBuffer(v) => Ok(v),
            _ => {
                bail!("Unexpected value kind: {:?}", value)
            }
        }
    }
}

impl TryFrom<Value> for () {
    type Error = Error;
    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level= "Trace"))]
    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Void => Ok(()),
            _ => {
                bail!("Unexpected value kind: {:?}", value)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use alloc::vec;

    use super::*;

    fn round_trip(value: Value) {
        let buf: Vec<u8> = (&value).try_into().unwrap();
        let decoded = Value::try_from(buf.as_slice()).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn round_trips_every_kind() {
        round_trip(Value::Int(0));
        round_trip(Value::Int(-123456));
        round_trip(Value::Long(i64::MIN));
        round_trip(Value::String(String::new()));
        round_trip(Value::String("Hello, World!!".to_string()));
        round_trip(Value::Bool(true));
        round_trip(Value::Bool(false));
        round_trip(Value::VecBytes(vec![]));
        round_trip(Value::VecBytes(vec![0xDE, 0xAD, 0xBE, 0xEF]));
        round_trip(Value::SizePrefixedBuffer(vec![1; 300]));
        round_trip(Value::Void);
    }

    #[test]
    fn unknown_tag_decodes_as_void() {
        let mut buf: Vec<u8> = (&Value::Void).try_into().unwrap();
        buf[8] = 0x7F;
        assert_eq!(Value::try_from(buf.as_slice()).unwrap(), Value::Void);
    }

    #[test]
    fn invalid_utf8_fails_at_decode() {
        let mut buf: Vec<u8> = (&Value::String("ab".to_string())).try_into().unwrap();
        let n = buf.len();
        buf[n - 2] = 0xFF;
        buf[n - 1] = 0xFE;
        assert!(Value::try_from(buf.as_slice()).is_err());
    }

    #[test]
    fn inconsistent_declared_size_fails_at_decode() {
        let mut buf: Vec<u8> = (&Value::SizePrefixedBuffer(vec![1, 2, 3])).try_into().unwrap();
        // Declared-size field sits right after the tag byte.
        buf[9..13].copy_from_slice(&7u32.to_le_bytes());
        assert!(Value::try_from(buf.as_slice()).is_err());
    }

    #[test]
    fn typed_accessors_enforce_kind() {
        assert_eq!(i32::try_from(Value::Int(5)).unwrap(), 5);
        assert!(i32::try_from(Value::Long(5)).is_err());
        assert_eq!(String::try_from(Value::String("x".into())).unwrap(), "x");
        assert!(bool::try_from(Value::Void).is_err());
        assert!(<()>::try_from(Value::Void).is_ok());
        assert_eq!(
            Vec::<u8>::try_from(Value::VecBytes(vec![9])).unwrap(),
            vec![9]
        );
    }
}
