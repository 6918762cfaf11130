use alloc::string::ToString;

use sealbox_common::guest_error::ErrorCode;

use crate::error::{Result, SealboxGuestError};
use crate::execution_context::OutBAction;
use crate::with_handle;

/// Write `message` into the output region and raise the print signal, so the
/// host can surface it. Returns the number of bytes written.
///
/// Output longer than the region is truncated; the host always sees a
/// NUL-terminated string.
pub fn print_output(message: &str) -> Result<i32> {
    with_handle(|handle| {
        let written = handle.mailbox().write_output(message.as_bytes());
        handle.context().raise(OutBAction::Print);
        written
    })
    .ok_or_else(|| {
        SealboxGuestError::new(
            ErrorCode::GuestError,
            "print_output called before the runtime was wired up".to_string(),
        )
    })
}
