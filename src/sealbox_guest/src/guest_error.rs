use alloc::string::ToString;

use sealbox_common::guest_error::{ErrorCode, GuestError};

use crate::error::SealboxGuestError;
use crate::mailbox::Mailbox;

/// Record a failure in the shared error record for the host to read back.
pub fn set_error(mailbox: &Mailbox, code: ErrorCode, message: &str) {
    mailbox.write_guest_error(&GuestError::new(code, message.to_string()));
}

pub fn set_error_from(mailbox: &Mailbox, error: &SealboxGuestError) {
    mailbox.write_guest_error(&error.into());
}

/// Clear the record ahead of a call so a stale failure can never be mistaken
/// for this call's outcome.
pub fn reset_error(mailbox: &Mailbox) {
    mailbox.reset_guest_error();
}

#[cfg(test)]
mod tests {
    extern crate std;

    use sealbox_testing::SandboxRegion;

    use super::*;

    #[test]
    fn set_then_reset() {
        let mut region = SandboxRegion::new();
        let mailbox =
            unsafe { Mailbox::new(region.base(), region.guest_base(), region.len()) };

        set_error(&mailbox, ErrorCode::GuestFunctionNotFound, "no such function");
        let recorded = mailbox.read_guest_error().unwrap();
        assert_eq!(recorded.code, ErrorCode::GuestFunctionNotFound);
        assert_eq!(recorded.message, "no such function");

        reset_error(&mailbox);
        assert_eq!(mailbox.read_guest_error(), None);
    }
}
