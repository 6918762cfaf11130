use alloc::string::ToString;
use alloc::vec::Vec;

use sealbox_common::codec::Value;
use sealbox_common::guest_error::ErrorCode;
use sealbox_common::mem::OUTPUT_SIZE;

use crate::error::{Result, SealboxGuestError};
use crate::execution_context::OutBAction;
use crate::with_handle;

/// Marshal a call to a host-provided function through the output region and
/// raise the call signal. Control returns here after the host has serviced
/// the call; fetch its result with [`host_call_result`].
///
/// Record layout in the output region: `u32` name length, name bytes, `u8`
/// argument flag, then the encoded value when the flag is set.
pub fn call_host_function(name: &str, arg: Option<&Value>) -> Result<()> {
    let runtime_missing = || {
        SealboxGuestError::new(
            ErrorCode::GuestError,
            "host call attempted before the runtime was wired up".to_string(),
        )
    };

    let mut record = Vec::with_capacity(8 + name.len());
    let name_len = u32::try_from(name.len()).map_err(|_| {
        SealboxGuestError::new(
            ErrorCode::UnsupportedParameterType,
            "host function name too long".to_string(),
        )
    })?;
    record.extend_from_slice(&name_len.to_le_bytes());
    record.extend_from_slice(name.as_bytes());
    match arg {
        Some(value) => {
            record.push(1);
            let encoded: Vec<u8> = value.try_into().map_err(|_| {
                SealboxGuestError::new(
                    ErrorCode::UnsupportedParameterType,
                    "host call argument could not be encoded".to_string(),
                )
            })?;
            record.extend_from_slice(&encoded);
        }
        None => record.push(0),
    }

    // A record the output region cannot hold whole would reach the host with
    // mismatched length prefixes; refuse it before anything is written.
    if record.len() > OUTPUT_SIZE - 1 {
        return Err(SealboxGuestError::new(
            ErrorCode::UnsupportedParameterType,
            "host call record exceeds the output region".to_string(),
        ));
    }

    with_handle(|handle| {
        handle.mailbox().write_output(&record);
        handle.context().raise(OutBAction::CallFunction);
    })
    .ok_or_else(runtime_missing)
}

/// The i32 the host left in the host-result slot after the last call.
pub fn host_call_result() -> Result<i32> {
    with_handle(|handle| handle.mailbox().host_result()).ok_or_else(|| {
        SealboxGuestError::new(
            ErrorCode::GuestError,
            "host call attempted before the runtime was wired up".to_string(),
        )
    })
}

#[cfg(test)]
mod tests {
    extern crate std;

    use sealbox_testing::SandboxRegion;

    use super::*;
    use crate::execution_context::{ExecutionContext, ExecutionMode};
    use crate::function_table::FunctionTable;
    use crate::mailbox::Mailbox;
    use crate::test_support::HANDLE_LOCK;
    use crate::{install_handle, GuestHandle};

    static TABLE: FunctionTable = FunctionTable::new(&[]);

    fn install_over(region: &mut SandboxRegion) {
        let mailbox =
            unsafe { Mailbox::new(region.base(), region.guest_base(), region.len()) };
        install_handle(GuestHandle::new(
            mailbox,
            ExecutionContext::with_mode(ExecutionMode::StandaloneProcess),
            &TABLE,
        ));
    }

    #[test]
    fn marshals_call_and_reads_back_host_result() {
        let _guard = HANDLE_LOCK.lock().unwrap();
        let mut region = SandboxRegion::new();
        region.set_host_result(17);
        install_over(&mut region);

        call_host_function("HostMethod", Some(&Value::String("Hello".into()))).unwrap();

        let (name, arg) = region.read_host_call_record();
        assert_eq!(name, "HostMethod");
        assert_eq!(arg, Some(Value::String("Hello".into())));
        assert_eq!(host_call_result().unwrap(), 17);
    }

    #[test]
    fn call_without_argument_marshals_the_bare_name() {
        let _guard = HANDLE_LOCK.lock().unwrap();
        let mut region = SandboxRegion::new();
        install_over(&mut region);

        call_host_function("HostMethod1", None).unwrap();

        let (name, arg) = region.read_host_call_record();
        assert_eq!(name, "HostMethod1");
        assert_eq!(arg, None);
    }

    #[test]
    fn record_larger_than_output_region_is_rejected_unwritten() {
        let _guard = HANDLE_LOCK.lock().unwrap();
        let mut region = SandboxRegion::new();
        install_over(&mut region);

        let huge = "a".repeat(OUTPUT_SIZE * 2);
        let err = call_host_function("HostMethod", Some(&Value::String(huge))).unwrap_err();
        assert_eq!(err.kind, ErrorCode::UnsupportedParameterType);
        assert_eq!(region.read_output_str(), "");
    }
}
