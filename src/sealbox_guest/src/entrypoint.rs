//! Process entry and the host handshake.
//!
//! The host transfers control here exactly once; afterwards it drives the
//! guest only through the published dispatch pointer. Heap, logger, mode
//! detection and the function table are all wired before guest code runs.

use sealbox_common::guest_error::ErrorCode;

use crate::execution_context::{ExecutionContext, OutBAction};
use crate::function_table::FunctionTable;
use crate::mailbox::Mailbox;
use crate::{install_handle, GuestHandle};

/// Wire the runtime for a detected mode: install the process-wide handle and
/// publish the dispatch entry point in the PEB.
pub fn initialize(
    mailbox: Mailbox,
    context: ExecutionContext,
    table: &'static FunctionTable,
    dispatch_entry: u64,
) {
    install_handle(GuestHandle::new(mailbox, context, table));
    mailbox.install_dispatch_ptr(dispatch_entry);
}

/// The standalone path: no host, no mailbox and no dispatch wiring; the
/// program entry runs directly and its result is the process result.
pub fn run_standalone(guest_main: impl FnOnce() -> i32) -> i32 {
    guest_main()
}

/// Raise the abort signal with a failure code and never return. For
/// unrecoverable conditions (heap exhaustion, integrity failures) where the
/// error record cannot be trusted to reach the host.
pub fn abort_with_code(context: &ExecutionContext, code: ErrorCode) -> ! {
    context.outb(OutBAction::Abort as u16, code as u32 as u8);
    context.complete();
    loop {
        core::hint::spin_loop();
    }
}

// The host-facing ABI surface. Gated out of unit-test builds, which have no
// guest binary to link the guest_main symbols from.
#[cfg(not(test))]
mod wiring {
    use alloc::format;

    use sealbox_common::guest_error::{ErrorCode, GuestError};

    use super::{abort_with_code, initialize};
    use crate::dispatch::dispatch_guest_call;
    use crate::execution_context::{ExecutionContext, OutBAction};
    use crate::function_table::FunctionTable;
    use crate::logging::init_logging;
    use crate::mailbox::Mailbox;
    use crate::{with_handle, HEAP_ALLOCATOR};

    // Supplied by the guest binary.
    #[allow(improper_ctypes)]
    extern "C" {
        fn sealbox_guest_main() -> i32;
        fn sealbox_guest_functions() -> &'static FunctionTable;
    }

    /// The function the host invokes through the published dispatch pointer.
    #[no_mangle]
    pub extern "C" fn guest_dispatch_entry() {
        with_handle(|handle| {
            dispatch_guest_call(handle.mailbox(), handle.context(), handle.table());
        });
    }

    /// First transfer of control from the host (or the OS loader, when run as
    /// an ordinary executable).
    #[no_mangle]
    pub extern "C" fn entrypoint(log_level_filter: i32) -> i32 {
        let mailbox = unsafe { Mailbox::at_fixed_region() };
        let context = ExecutionContext::detect(&mailbox);

        // As an ordinary executable there is no host, no heap descriptor and
        // no writable shared region; run the conventional program entry path.
        if context.is_standalone() {
            return super::run_standalone(|| unsafe { sealbox_guest_main() });
        }

        let (heap_base, heap_size) = mailbox.heap_descriptor();
        if heap_base == 0 || heap_size == 0 {
            abort_with_code(&context, ErrorCode::MallocFailed);
        }
        unsafe {
            HEAP_ALLOCATOR
                .lock()
                .init(heap_base as usize, heap_size as usize);
        }

        init_logging(log_level_filter);

        let table = unsafe { sealbox_guest_functions() };
        initialize(mailbox, context, table, guest_dispatch_entry as usize as u64);

        let result = unsafe { sealbox_guest_main() };
        mailbox.write_result(result);
        context.complete();
        result
    }

    #[panic_handler]
    fn panic(info: &core::panic::PanicInfo) -> ! {
        with_handle(|handle| {
            handle.mailbox().write_guest_error(&GuestError::new(
                ErrorCode::GuestError,
                format!("{info}"),
            ));
            handle
                .context()
                .outb(OutBAction::Abort as u16, ErrorCode::GuestError as u32 as u8);
            handle.context().complete();
        });
        loop {
            core::hint::spin_loop();
        }
    }
}

#[cfg(not(test))]
pub use wiring::{entrypoint, guest_dispatch_entry};

#[cfg(test)]
mod tests {
    extern crate std;

    use sealbox_testing::SandboxRegion;

    use super::*;
    use crate::execution_context::ExecutionMode;
    use crate::function_table::FunctionTableEntry;
    use crate::test_support::HANDLE_LOCK;
    use crate::with_handle;

    fn noop(_: &str) -> i32 {
        0
    }

    static TABLE: FunctionTable = FunctionTable::new(&[FunctionTableEntry {
        name: "Noop",
        handler: noop,
    }]);

    #[test]
    fn standalone_runs_guest_main_and_returns_its_result() {
        assert_eq!(run_standalone(|| 7), 7);
        assert_eq!(run_standalone(|| -3), -3);
    }

    #[test]
    fn initialize_publishes_dispatch_ptr_and_handle() {
        let _guard = HANDLE_LOCK.lock().unwrap();
        let mut region = SandboxRegion::new();
        let mailbox =
            unsafe { Mailbox::new(region.base(), region.guest_base(), region.len()) };
        let context = ExecutionContext::with_mode(ExecutionMode::StandaloneProcess);

        initialize(mailbox, context, &TABLE, 0x1234);

        assert_eq!(region.dispatch_ptr(), 0x1234);
        let table_len = with_handle(|handle| handle.table().len()).unwrap();
        assert_eq!(table_len, 1);
    }
}
