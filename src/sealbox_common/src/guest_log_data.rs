use alloc::string::{String, ToString};
use alloc::vec::Vec;

use anyhow::{anyhow, Error, Result};
use strum::FromRepr;

/// Severity of a guest log record, decoupled from the `log` crate's levels so
/// the on-wire numbering stays fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Information = 2,
    Warning = 3,
    Error = 4,
}

impl From<log::Level> for LogLevel {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Trace => LogLevel::Trace,
            log::Level::Debug => LogLevel::Debug,
            log::Level::Info => LogLevel::Information,
            log::Level::Warn => LogLevel::Warning,
            log::Level::Error => LogLevel::Error,
        }
    }
}

/// One log record marshalled out of the guest through the output region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestLogData {
    pub message: String,
    pub source: String,
    pub level: LogLevel,
    pub line: u32,
}

impl GuestLogData {
    pub fn new(message: String, source: String, level: LogLevel, line: u32) -> Self {
        Self {
            message,
            source,
            level,
            line,
        }
    }
}

fn put_str(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    let len = u32::try_from(s.len()).map_err(|_| anyhow!("log field too long"))?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

fn take_str<'a>(buf: &'a [u8], offset: &mut usize) -> Result<&'a str> {
    let len_bytes: [u8; 4] = buf
        .get(*offset..*offset + 4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| anyhow!("log record too short"))?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    let start = *offset + 4;
    let bytes = buf
        .get(start..start + len)
        .ok_or_else(|| anyhow!("log field exceeds record"))?;
    *offset = start + len;
    core::str::from_utf8(bytes).map_err(|_| anyhow!("log field is not valid UTF-8"))
}

impl TryFrom<&GuestLogData> for Vec<u8> {
    type Error = Error;

    fn try_from(value: &GuestLogData) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(16 + value.message.len() + value.source.len());
        buf.push(value.level as u8);
        buf.extend_from_slice(&value.line.to_le_bytes());
        put_str(&mut buf, &value.message)?;
        put_str(&mut buf, &value.source)?;
        Ok(buf)
    }
}

impl TryFrom<&[u8]> for GuestLogData {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self> {
        let level = value
            .first()
            .copied()
            .and_then(LogLevel::from_repr)
            .ok_or_else(|| anyhow!("bad log level"))?;
        let line_bytes: [u8; 4] = value
            .get(1..5)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| anyhow!("log record too short"))?;
        let mut offset = 5;
        let message = take_str(value, &mut offset)?.to_string();
        let source = take_str(value, &mut offset)?.to_string();
        Ok(Self {
            message,
            source,
            level,
            line: u32::from_le_bytes(line_bytes),
        })
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;

    #[test]
    fn record_round_trips() {
        let record = GuestLogData::new(
            "heap initialized".to_string(),
            "sealbox_guest::entrypoint".to_string(),
            LogLevel::Information,
            88,
        );
        let buf: Vec<u8> = (&record).try_into().unwrap();
        assert_eq!(GuestLogData::try_from(buf.as_slice()).unwrap(), record);
    }

    #[test]
    fn log_crate_levels_map_over() {
        assert_eq!(LogLevel::from(log::Level::Warn), LogLevel::Warning);
        assert_eq!(LogLevel::from(log::Level::Info), LogLevel::Information);
    }
}
