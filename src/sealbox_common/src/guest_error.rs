use alloc::string::{String, ToString};
use alloc::vec::Vec;

use anyhow::{anyhow, Error, Result};
use strum::FromRepr;

/// The numeric failure vocabulary the host can read back after a call. The
/// discriminants are a wire contract; they never change meaning or get
/// reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u32)]
pub enum ErrorCode {
    /// The call succeeded.
    NoError = 0,
    /// The expected executable header was not found in the guest binary.
    CodeHeaderNotSet = 1,
    /// A parameter's kind is not supported (or its buffer failed
    /// verification).
    UnsupportedParameterType = 2,
    /// The host did not provide a function name.
    GuestFunctionNameNotProvided = 3,
    /// The named function does not exist in the guest.
    GuestFunctionNotFound = 4,
    /// Wrong number of parameters for the guest function.
    GuestFunctionIncorrectNoOfParameters = 5,
    /// The dispatch entry point was never published.
    DispatchFunctionPointerNotSet = 6,
    /// The signal primitive itself failed.
    OutbError = 7,
    /// The failure kind could not be determined.
    UnknownError = 8,
    /// Guest stack allocation overflowed the stack.
    StackOverflow = 9,
    /// A low-level environment integrity check failed.
    SecurityCheckFailed = 10,
    /// The guest allocator could not satisfy an allocation.
    MallocFailed = 13,
    /// A handler reported its own failure.
    GuestError = 15,
}

impl From<u64> for ErrorCode {
    fn from(value: u64) -> Self {
        u32::try_from(value)
            .ok()
            .and_then(ErrorCode::from_repr)
            .unwrap_or(ErrorCode::UnknownError)
    }
}

/// An error record the guest leaves for the host: the numeric code plus an
/// optional human-readable message. The message channel is best-effort; the
/// code is the only part the protocol guarantees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestError {
    pub code: ErrorCode,
    pub message: String,
}

impl GuestError {
    pub fn new(code: ErrorCode, message: String) -> Self {
        Self { code, message }
    }
}

impl Default for GuestError {
    fn default() -> Self {
        Self {
            code: ErrorCode::NoError,
            message: String::new(),
        }
    }
}

impl TryFrom<&[u8]> for GuestError {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self> {
        let code_bytes: [u8; 4] = value
            .get(0..4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| anyhow!("guest error record too short"))?;
        let len_bytes: [u8; 4] = value
            .get(4..8)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| anyhow!("guest error record too short"))?;
        let len = u32::from_le_bytes(len_bytes) as usize;
        let message_bytes = value
            .get(8..8 + len)
            .ok_or_else(|| anyhow!("guest error message exceeds record"))?;
        let message = core::str::from_utf8(message_bytes)
            .map_err(|_| anyhow!("guest error message is not valid UTF-8"))?;
        Ok(Self {
            code: ErrorCode::from(u32::from_le_bytes(code_bytes) as u64),
            message: message.to_string(),
        })
    }
}

impl TryFrom<&GuestError> for Vec<u8> {
    type Error = Error;

    fn try_from(value: &GuestError) -> Result<Vec<u8>> {
        let len = u32::try_from(value.message.len())
            .map_err(|_| anyhow!("guest error message too long"))?;
        let mut buf = Vec::with_capacity(8 + value.message.len());
        buf.extend_from_slice(&(value.code as u32).to_le_bytes());
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(value.message.as_bytes());
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;

    #[test]
    fn record_round_trips() {
        let error = GuestError::new(
            ErrorCode::GuestFunctionNotFound,
            "Function Nope not found".to_string(),
        );
        let buf: Vec<u8> = (&error).try_into().unwrap();
        assert_eq!(GuestError::try_from(buf.as_slice()).unwrap(), error);
    }

    #[test]
    fn unknown_code_maps_to_unknown_error() {
        assert_eq!(ErrorCode::from(11u64), ErrorCode::UnknownError);
        assert_eq!(ErrorCode::from(u64::MAX), ErrorCode::UnknownError);
        assert_eq!(ErrorCode::from(15u64), ErrorCode::GuestError);
    }

    #[test]
    fn truncated_record_is_rejected() {
        let error = GuestError::new(ErrorCode::GuestError, "boom".to_string());
        let buf: Vec<u8> = (&error).try_into().unwrap();
        assert!(GuestError::try_from(&buf[..7]).is_err());
        assert!(GuestError::try_from(&buf[..buf.len() - 1]).is_err());
    }
}
