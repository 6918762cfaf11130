//! One host call, serviced end to end.
//!
//! The contract with the host: per activation the result slot is written
//! exactly once, either with the handler's return value or with the failure
//! sentinel, and on failure the error record additionally carries the numeric
//! code plus a message. Completion is signalled on every path.

use alloc::format;
use alloc::string::{String, ToString};

use sealbox_common::codec::Value;
use sealbox_common::guest_error::ErrorCode;
use sealbox_common::mem::{ArgCell, CALL_FAILED_SENTINEL};

use crate::error::{Result, SealboxGuestError};
use crate::execution_context::ExecutionContext;
use crate::function_table::FunctionTable;
use crate::guest_error;
use crate::mailbox::Mailbox;

/// Service the call currently in the call slot.
pub fn dispatch_guest_call(mailbox: &Mailbox, context: &ExecutionContext, table: &FunctionTable) {
    guest_error::reset_error(mailbox);
    match run_call(mailbox, table) {
        Ok(result) => mailbox.write_result(result),
        Err(error) => {
            guest_error::set_error_from(mailbox, &error);
            mailbox.write_result(CALL_FAILED_SENTINEL);
        }
    }
    context.complete();
}

fn run_call(mailbox: &Mailbox, table: &FunctionTable) -> Result<i32> {
    let call = mailbox.read_call()?;
    if call.name.is_empty() {
        return Err(SealboxGuestError::new(
            ErrorCode::GuestFunctionNameNotProvided,
            "No function name provided in the call slot".to_string(),
        ));
    }
    let entry = table.find(&call.name).ok_or_else(|| {
        SealboxGuestError::new(
            ErrorCode::GuestFunctionNotFound,
            format!("Function {} not found", call.name),
        )
    })?;
    // Handlers take exactly one argument; further cells are ignored rather
    // than rejected, matching the host's fill-then-call convention.
    let first = call.args.first().ok_or_else(|| {
        SealboxGuestError::new(
            ErrorCode::GuestFunctionIncorrectNoOfParameters,
            format!("Function {} called with no parameters", call.name),
        )
    })?;
    let argument = decode_first_argument(mailbox, first)?;
    Ok((entry.handler)(&argument))
}

/// Narrow the first cell to the string the handler ABI takes: inline
/// integers carry a 32-bit payload rendered as decimal text, out-of-line
/// cells must verify and decode to a string value.
fn decode_first_argument(mailbox: &Mailbox, cell: &ArgCell) -> Result<String> {
    let unsupported = |reason: &str| {
        SealboxGuestError::new(ErrorCode::UnsupportedParameterType, reason.to_string())
    };

    match *cell {
        // The upper half of an inline cell is ignored; the payload is the
        // low 32 bits, signed.
        ArgCell::Inline(n) => Ok((n as i32).to_string()),
        ArgCell::OutOfLine(addr) => {
            let buf = mailbox.value_buffer(addr)?;
            let value = Value::try_from(buf)
                .map_err(|_| unsupported("argument buffer failed verification"))?;
            match value {
                Value::String(s) => Ok(s),
                other => Err(unsupported(&format!(
                    "argument of kind {other:?} is not supported here"
                ))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::sync::atomic::{AtomicU32, Ordering};
    use std::vec::Vec;

    use sealbox_common::mem::GUEST_REGION_SIZE;
    use sealbox_testing::{HostArg, SandboxRegion};

    use super::*;
    use crate::execution_context::ExecutionMode;
    use crate::function_table::FunctionTableEntry;
    use crate::print::print_output;
    use crate::test_support::HANDLE_LOCK;
    use crate::{install_handle, GuestHandle};

    static CALLS: AtomicU32 = AtomicU32::new(0);

    fn greet(arg: &str) -> i32 {
        CALLS.fetch_add(1, Ordering::SeqCst);
        print_output(&format!("Hello from GuestFunction, {arg}!!.\n")).unwrap_or(-1)
    }

    static TABLE: FunctionTable = FunctionTable::new(&[FunctionTableEntry {
        name: "GuestMethod",
        handler: greet,
    }]);

    fn standalone() -> ExecutionContext {
        ExecutionContext::with_mode(ExecutionMode::StandaloneProcess)
    }

    fn mailbox_over(region: &mut SandboxRegion) -> Mailbox {
        unsafe { Mailbox::new(region.base(), region.guest_base(), region.len()) }
    }

    fn dispatch(region: &mut SandboxRegion) {
        let mailbox = mailbox_over(region);
        dispatch_guest_call(&mailbox, &standalone(), &TABLE);
    }

    #[test]
    fn string_argument_end_to_end() {
        let _guard = HANDLE_LOCK.lock().unwrap();
        let mut region = SandboxRegion::new();
        region.write_call("GuestMethod", &[HostArg::Str("World")]);
        let mailbox = mailbox_over(&mut region);
        install_handle(GuestHandle::new(mailbox, standalone(), &TABLE));

        dispatch_guest_call(&mailbox, &standalone(), &TABLE);

        assert_eq!(region.read_output_str(), "Hello from GuestFunction, World!!.\n");
        assert_eq!(region.read_result(), 35);
        assert_eq!(mailbox.read_guest_error(), None);
    }

    #[test]
    fn inline_integer_renders_as_decimal_text() {
        let _guard = HANDLE_LOCK.lock().unwrap();
        let mut region = SandboxRegion::new();
        region.write_call("GuestMethod", &[HostArg::Inline(42)]);
        let mailbox = mailbox_over(&mut region);
        install_handle(GuestHandle::new(mailbox, standalone(), &TABLE));

        dispatch_guest_call(&mailbox, &standalone(), &TABLE);

        assert_eq!(region.read_output_str(), "Hello from GuestFunction, 42!!.\n");
        assert_eq!(region.read_result(), 32);
    }

    #[test]
    fn inline_integer_payload_is_the_low_32_bits() {
        let _guard = HANDLE_LOCK.lock().unwrap();
        let mut region = SandboxRegion::new();
        region.write_call("GuestMethod", &[HostArg::Inline(0x1_0000_002A)]);
        let mailbox = mailbox_over(&mut region);
        install_handle(GuestHandle::new(mailbox, standalone(), &TABLE));

        dispatch_guest_call(&mailbox, &standalone(), &TABLE);

        assert_eq!(region.read_output_str(), "Hello from GuestFunction, 42!!.\n");
    }

    #[test]
    fn missing_name_writes_sentinel_and_code() {
        let mut region = SandboxRegion::new();
        let before = CALLS.load(Ordering::SeqCst);
        dispatch(&mut region);
        assert_eq!(region.read_result(), CALL_FAILED_SENTINEL);
        assert_eq!(
            region.read_guest_error().unwrap().code,
            ErrorCode::GuestFunctionNameNotProvided
        );
        assert_eq!(CALLS.load(Ordering::SeqCst), before);
    }

    #[test]
    fn unknown_function_writes_sentinel_and_code() {
        let mut region = SandboxRegion::new();
        region.write_call("Nope", &[HostArg::Inline(1)]);
        dispatch(&mut region);
        assert_eq!(region.read_result(), CALL_FAILED_SENTINEL);
        assert_eq!(
            region.read_guest_error().unwrap().code,
            ErrorCode::GuestFunctionNotFound
        );
    }

    #[test]
    fn zero_arguments_writes_sentinel_and_code() {
        let mut region = SandboxRegion::new();
        region.write_call("GuestMethod", &[]);
        let before = CALLS.load(Ordering::SeqCst);
        dispatch(&mut region);
        assert_eq!(region.read_result(), CALL_FAILED_SENTINEL);
        assert_eq!(
            region.read_guest_error().unwrap().code,
            ErrorCode::GuestFunctionIncorrectNoOfParameters
        );
        assert_eq!(CALLS.load(Ordering::SeqCst), before);
    }

    #[test]
    fn non_string_out_of_line_argument_is_unsupported() {
        let mut region = SandboxRegion::new();
        let encoded: Vec<u8> = (&Value::Bool(true)).try_into().unwrap();
        region.write_call("GuestMethod", &[HostArg::Raw(encoded)]);
        let before = CALLS.load(Ordering::SeqCst);
        dispatch(&mut region);
        assert_eq!(region.read_result(), CALL_FAILED_SENTINEL);
        assert_eq!(
            region.read_guest_error().unwrap().code,
            ErrorCode::UnsupportedParameterType
        );
        assert_eq!(CALLS.load(Ordering::SeqCst), before);
    }

    #[test]
    fn out_of_line_cell_escaping_the_region_is_unsupported() {
        let mut region = SandboxRegion::new();
        region.write_call("GuestMethod", &[HostArg::Str("x")]);
        region.corrupt_first_cell_addr(region.guest_base() + GUEST_REGION_SIZE as u64);
        dispatch(&mut region);
        assert_eq!(region.read_result(), CALL_FAILED_SENTINEL);
        assert_eq!(
            region.read_guest_error().unwrap().code,
            ErrorCode::UnsupportedParameterType
        );
    }

    #[test]
    fn error_record_is_reset_between_calls() {
        let _guard = HANDLE_LOCK.lock().unwrap();
        let mut region = SandboxRegion::new();
        region.write_call("Nope", &[HostArg::Inline(1)]);
        dispatch(&mut region);
        assert!(region.read_guest_error().is_some());

        region.write_call("GuestMethod", &[HostArg::Inline(7)]);
        let mailbox = mailbox_over(&mut region);
        install_handle(GuestHandle::new(mailbox, standalone(), &TABLE));
        dispatch_guest_call(&mailbox, &standalone(), &TABLE);
        assert_eq!(region.read_guest_error(), None);
        assert_eq!(region.read_output_str(), "Hello from GuestFunction, 7!!.\n");
    }
}
