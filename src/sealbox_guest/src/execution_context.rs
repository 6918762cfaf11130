//! Execution-mode detection and the signal primitive.
//!
//! The same binary runs in three environments: as a bare hypervisor guest, as
//! a blob a host process loaded into its own address space, and as an
//! ordinary executable during development. Which one is active is decided
//! exactly once, at entry, and the chosen context is threaded to everything
//! that signals; nothing re-probes later.

use crate::mailbox::Mailbox;

/// Callback the host installs when the guest runs loaded in-process. It may
/// follow a foreign calling convention, see [`ExecutionContext::outb`].
pub type HostCallback = unsafe extern "C" fn(u16, u8);

/// Signal ports understood by the host. The value byte is unused payload;
/// the act of trapping plus the mailbox contents carry the information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum OutBAction {
    Log = 99,
    Print = 100,
    CallFunction = 101,
    Abort = 102,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Bare guest under hardware virtualization; signals trap to the host
    /// via the `out` instruction, completion halts the vCPU.
    HypervisorGuest,
    /// Loaded into a host process; signals call back into the host and
    /// completion is an ordinary return.
    LoadedInProcess(HostCallback),
    /// Ordinary executable; no mailbox, no signals.
    StandaloneProcess,
}

/// The execution mode, resolved once at entry and immutable for the process
/// lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionContext {
    mode: ExecutionMode,
}

impl ExecutionContext {
    /// Probe the region, in fixed order: executable-header magic first, then
    /// the callback slot, defaulting to the bare hypervisor guest.
    pub fn detect(mailbox: &Mailbox) -> Self {
        let mode = if mailbox.exe_magic_present() {
            ExecutionMode::StandaloneProcess
        } else {
            match mailbox.callback_ptr() {
                0 => ExecutionMode::HypervisorGuest,
                ptr => {
                    // The slot holds a host-process code address; only the
                    // host could have put it there.
                    let callback: HostCallback =
                        unsafe { core::mem::transmute(ptr as usize) };
                    ExecutionMode::LoadedInProcess(callback)
                }
            }
        };
        Self { mode }
    }

    pub const fn with_mode(mode: ExecutionMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn is_standalone(&self) -> bool {
        matches!(self.mode, ExecutionMode::StandaloneProcess)
    }

    /// Raise a signal toward the host.
    pub fn raise(&self, action: OutBAction) {
        self.outb(action as u16, 0);
    }

    /// The raw signal primitive: a 1-byte port and 1-byte value.
    pub fn outb(&self, port: u16, value: u8) {
        match self.mode {
            ExecutionMode::HypervisorGuest => trap_outb(port, value),
            ExecutionMode::LoadedInProcess(callback) => {
                callback_outb(callback, port, value);
            }
            ExecutionMode::StandaloneProcess => {}
        }
    }

    /// Signal completion of the current activation: halt the vCPU under the
    /// hypervisor, otherwise just return to the caller.
    pub fn complete(&self) {
        if let ExecutionMode::HypervisorGuest = self.mode {
            trap_halt();
        }
    }
}

// The trap instructions are kept as data and invoked through a pointer cast
// so the toolchain cannot rewrite or elide them.
//
// mov eax, edx; mov edx, ecx; out dx, al; ret  (win64: port in cx, value in dl)
#[cfg(target_arch = "x86_64")]
static OUTB_THUNK: [u8; 6] = [0x89, 0xd0, 0x89, 0xca, 0xee, 0xc3];
// hlt; ret
#[cfg(target_arch = "x86_64")]
static HLT_THUNK: [u8; 2] = [0xF4, 0xC3];

#[cfg(target_arch = "x86_64")]
fn trap_outb(port: u16, value: u8) {
    let thunk: extern "win64" fn(u16, u8) =
        unsafe { core::mem::transmute(OUTB_THUNK.as_ptr()) };
    thunk(port, value);
}

#[cfg(target_arch = "x86_64")]
fn trap_halt() {
    let thunk: extern "win64" fn() = unsafe { core::mem::transmute(HLT_THUNK.as_ptr()) };
    thunk();
}

#[cfg(not(target_arch = "x86_64"))]
fn trap_outb(_port: u16, _value: u8) {
    unimplemented!("hypervisor trap is only wired up for x86_64 guests")
}

#[cfg(not(target_arch = "x86_64"))]
fn trap_halt() {
    unimplemented!("hypervisor halt is only wired up for x86_64 guests")
}

/// Cross into the host callback with rsi/rdi pinned.
///
/// The callback may run under a calling convention that treats rsi/rdi as
/// scratch, while our compiled code expects them preserved across the call.
/// This is the one call site that crosses that convention boundary.
#[cfg(target_arch = "x86_64")]
fn callback_outb(callback: HostCallback, port: u16, value: u8) {
    let rsi: u64;
    let rdi: u64;
    unsafe {
        core::arch::asm!(
            "mov {rsi_out}, rsi",
            "mov {rdi_out}, rdi",
            rsi_out = out(reg) rsi,
            rdi_out = out(reg) rdi,
            options(nomem, nostack, preserves_flags)
        );
    }
    unsafe { callback(port, value) };
    unsafe {
        core::arch::asm!(
            "",
            in("rsi") rsi,
            in("rdi") rdi,
            options(nomem, nostack, preserves_flags)
        );
    }
}

#[cfg(not(target_arch = "x86_64"))]
fn callback_outb(callback: HostCallback, port: u16, value: u8) {
    unsafe { callback(port, value) };
}
