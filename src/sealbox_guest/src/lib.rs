#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod dispatch;
pub mod entrypoint;
pub mod error;
pub mod execution_context;
pub mod function_table;
pub mod guest_error;
pub mod host_call;
pub mod logging;
pub mod mailbox;
pub mod print;

use buddy_system_allocator::LockedHeap;
use spin::RwLock;

use crate::execution_context::ExecutionContext;
use crate::function_table::FunctionTable;
use crate::mailbox::Mailbox;

/// The guest heap. Backed by the heap descriptor the host places in the PEB;
/// initialized once at entry. Unit tests run against the test harness's own
/// allocator instead.
#[cfg_attr(not(test), global_allocator)]
pub static HEAP_ALLOCATOR: LockedHeap<32> = LockedHeap::<32>::empty();

/// Everything the host-facing entry points need once the runtime is wired up.
///
/// The execution context and mailbox are computed once at entry and threaded
/// explicitly through the dispatch engine; this handle exists only because
/// the host invokes the published dispatch pointer as a bare `extern "C"`
/// function, which cannot carry arguments of our choosing.
pub struct GuestHandle {
    mailbox: Mailbox,
    context: ExecutionContext,
    table: &'static FunctionTable,
}

impl GuestHandle {
    pub fn new(mailbox: Mailbox, context: ExecutionContext, table: &'static FunctionTable) -> Self {
        Self {
            mailbox,
            context,
            table,
        }
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn table(&self) -> &'static FunctionTable {
        self.table
    }
}

// The guest is strictly single threaded; the lock below is a hand-off
// formality, never contended.
static GUEST_HANDLE: RwLock<Option<GuestHandle>> = RwLock::new(None);

/// Install the process-wide guest handle. Called once at entry; later calls
/// replace the handle, which only tests do.
pub fn install_handle(handle: GuestHandle) {
    *GUEST_HANDLE.write() = Some(handle);
}

/// Run `f` against the installed handle, or return `None` before the runtime
/// is wired up (standalone mode never wires it).
pub fn with_handle<R>(f: impl FnOnce(&GuestHandle) -> R) -> Option<R> {
    GUEST_HANDLE.read().as_ref().map(f)
}

#[cfg(test)]
pub(crate) mod test_support {
    // Tests that install the process-wide handle serialize on this.
    pub static HANDLE_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
}
