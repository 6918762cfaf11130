use alloc::format;
use alloc::string::String;

use sealbox_common::guest_error::{ErrorCode, GuestError};

pub type Result<T> = core::result::Result<T, SealboxGuestError>;

#[derive(Debug)]
pub struct SealboxGuestError {
    pub kind: ErrorCode,
    pub message: String,
}

impl SealboxGuestError {
    pub fn new(kind: ErrorCode, message: String) -> Self {
        Self { kind, message }
    }
}

impl From<&SealboxGuestError> for GuestError {
    fn from(error: &SealboxGuestError) -> Self {
        GuestError::new(error.kind, error.message.clone())
    }
}

// Conversion failures bubbling up from the shared records land here with the
// generic code; paths that know a more specific code map it themselves.
impl From<anyhow::Error> for SealboxGuestError {
    fn from(error: anyhow::Error) -> Self {
        Self::new(ErrorCode::GuestError, format!("{error:#}"))
    }
}
