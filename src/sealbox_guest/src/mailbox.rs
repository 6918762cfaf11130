use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::mem::offset_of;
use core::ptr::copy_nonoverlapping;

use sealbox_common::guest_error::{ErrorCode, GuestError};
use sealbox_common::mem::{
    ArgCell, SandboxPeb, CALLBACK_PTR_OFFSET, CALL_ARG_CELLS_OFFSET, CALL_ARG_COUNT_OFFSET,
    CALL_NAME_PTR_OFFSET, CALL_SLOT_OFFSET, EXE_MAGIC, EXE_MAGIC_OFFSET, GUEST_ERROR_MESSAGE_SIZE,
    GUEST_REGION_BASE, GUEST_REGION_SIZE, HOST_RESULT_OFFSET, MAX_CALL_ARGS, MAX_FUNCTION_NAME_LEN,
    OUTPUT_OFFSET, OUTPUT_SIZE, RESULT_OFFSET,
};

use crate::error::{Result, SealboxGuestError};

/// A call read out of the call slot: the function name and the raw tagged
/// argument cells, split but not otherwise interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub name: String,
    pub args: Vec<ArgCell>,
}

/// Typed accessors over the shared region.
///
/// All address-layout assumptions live here and nowhere else. The region is
/// caller-supplied, so the same accessors run against the fixed in-VM mapping
/// and against a synthetic buffer in tests. Guest addresses arriving through
/// the call slot are untrusted and resolved fallibly; the fixed protocol
/// offsets are internal invariants and violating them is fatal.
#[derive(Debug, Clone, Copy)]
pub struct Mailbox {
    base: *mut u8,
    guest_base: u64,
    len: usize,
}

// The guest is single threaded and the host never races the guest on the
// region (control alternates at the signal boundary).
unsafe impl Send for Mailbox {}
unsafe impl Sync for Mailbox {}

impl Mailbox {
    /// # Safety
    /// `base..base + len` must be a live mapping of the shared region, and
    /// `guest_base` must be the guest address the host uses for `base`.
    pub unsafe fn new(base: *mut u8, guest_base: u64, len: usize) -> Self {
        Self {
            base,
            guest_base,
            len,
        }
    }

    /// The fixed in-VM mapping.
    ///
    /// # Safety
    /// Only meaningful when the region really is mapped at
    /// [`GUEST_REGION_BASE`], i.e. under the hypervisor or loaded in-process.
    pub unsafe fn at_fixed_region() -> Self {
        unsafe { Self::new(GUEST_REGION_BASE as *mut u8, GUEST_REGION_BASE, GUEST_REGION_SIZE) }
    }

    fn check(&self, offset: usize, len: usize) {
        assert!(
            offset
                .checked_add(len)
                .is_some_and(|end| end <= self.len),
            "mailbox access outside the shared region"
        );
    }

    fn bytes(&self, offset: usize, len: usize) -> &[u8] {
        self.check(offset, len);
        unsafe { core::slice::from_raw_parts(self.base.add(offset), len) }
    }

    fn write_bytes(&self, offset: usize, bytes: &[u8]) {
        self.check(offset, bytes.len());
        unsafe {
            copy_nonoverlapping(bytes.as_ptr(), self.base.add(offset), bytes.len());
        }
    }

    fn read_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes(self.bytes(offset, 4).try_into().unwrap_or([0; 4]))
    }

    fn read_u64(&self, offset: usize) -> u64 {
        u64::from_le_bytes(self.bytes(offset, 8).try_into().unwrap_or([0; 8]))
    }

    /// Resolve an untrusted guest address to a region offset, or `None` when
    /// any part of `addr..addr + len` falls outside the region.
    fn resolve(&self, addr: u64, len: usize) -> Option<usize> {
        let offset = usize::try_from(addr.checked_sub(self.guest_base)?).ok()?;
        let end = offset.checked_add(len)?;
        (end <= self.len).then_some(offset)
    }

    /// Read the call slot: the function name and the tagged argument cells,
    /// with no interpretation beyond splitting the tag bit.
    ///
    /// An absent name pointer reads as an empty name; a name pointer that
    /// cannot be resolved inside the region, or a cell count exceeding the
    /// slot, is an error here because the slot itself is malformed.
    pub fn read_call(&self) -> Result<CallRequest> {
        let name_ptr = self.read_u64(CALL_SLOT_OFFSET + CALL_NAME_PTR_OFFSET);
        let name = if name_ptr == 0 {
            String::new()
        } else {
            self.read_function_name(name_ptr)?
        };

        let count = self.read_u32(CALL_SLOT_OFFSET + CALL_ARG_COUNT_OFFSET) as usize;
        if count > MAX_CALL_ARGS {
            return Err(SealboxGuestError::new(
                ErrorCode::GuestFunctionIncorrectNoOfParameters,
                format!("Call slot holds {MAX_CALL_ARGS} cells but {count} were declared"),
            ));
        }

        let mut args = Vec::with_capacity(count);
        for i in 0..count {
            let raw = self.read_u64(CALL_SLOT_OFFSET + CALL_ARG_CELLS_OFFSET + i * 8);
            args.push(ArgCell::from_raw(raw));
        }

        Ok(CallRequest { name, args })
    }

    fn read_function_name(&self, name_ptr: u64) -> Result<String> {
        let bad_name = |reason: &str| {
            SealboxGuestError::new(
                ErrorCode::GuestFunctionNameNotProvided,
                format!("Unusable function name in call slot: {reason}"),
            )
        };

        let offset = self
            .resolve(name_ptr, 1)
            .ok_or_else(|| bad_name("name pointer outside the shared region"))?;
        let window = MAX_FUNCTION_NAME_LEN.min(self.len - offset);
        let bytes = self.bytes(offset, window);
        let nul = bytes
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| bad_name("name is unterminated"))?;
        let name = core::str::from_utf8(&bytes[..nul])
            .map_err(|_| bad_name("name is not valid UTF-8"))?;
        Ok(name.to_string())
    }

    /// Bounds-checked view of a size-prefixed encoded value at an untrusted
    /// guest address. The returned slice covers the prefix and the declared
    /// payload; structural validation is the codec's job.
    pub fn value_buffer(&self, addr: u64) -> Result<&[u8]> {
        let too_far = || {
            SealboxGuestError::new(
                ErrorCode::UnsupportedParameterType,
                "Argument buffer escapes the shared region".to_string(),
            )
        };

        let offset = self.resolve(addr, 4).ok_or_else(too_far)?;
        let declared = self.read_u32(offset) as usize;
        let total = declared.checked_add(4).ok_or_else(too_far)?;
        self.resolve(addr, total).ok_or_else(too_far)?;
        Ok(self.bytes(offset, total))
    }

    /// Overwrite the result slot. The destination is fixed and pre-validated;
    /// this always succeeds.
    pub fn write_result(&self, code: i32) {
        self.write_bytes(RESULT_OFFSET, &code.to_le_bytes());
    }

    pub fn read_result(&self) -> i32 {
        i32::from_le_bytes(self.bytes(RESULT_OFFSET, 4).try_into().unwrap_or([0; 4]))
    }

    /// Copy text or a marshalled record into the output region, bounded and
    /// NUL-terminated so the host never reads trailing garbage. Returns the
    /// number of bytes written.
    pub fn write_output(&self, bytes: &[u8]) -> i32 {
        let copied = bytes.len().min(OUTPUT_SIZE - 1);
        self.write_bytes(OUTPUT_OFFSET, &bytes[..copied]);
        self.write_bytes(OUTPUT_OFFSET + copied, &[0]);
        copied as i32
    }

    /// The i32 the host leaves after servicing a guest-to-host call.
    pub fn host_result(&self) -> i32 {
        i32::from_le_bytes(
            self.bytes(HOST_RESULT_OFFSET, 4)
                .try_into()
                .unwrap_or([0; 4]),
        )
    }

    /// Publish the dispatch entry point for the host to invoke.
    pub fn install_dispatch_ptr(&self, ptr: u64) {
        self.write_bytes(
            Self::peb_field(offset_of!(SandboxPeb, dispatch_function_ptr)),
            &ptr.to_le_bytes(),
        );
    }

    pub fn dispatch_ptr(&self) -> u64 {
        self.read_u64(Self::peb_field(offset_of!(SandboxPeb, dispatch_function_ptr)))
    }

    /// The heap descriptor the host fills in before first entry.
    pub fn heap_descriptor(&self) -> (u64, u64) {
        let heap = Self::peb_field(offset_of!(SandboxPeb, heap));
        (self.read_u64(heap), self.read_u64(heap + 8))
    }

    /// Non-null here means the host loaded the binary in-process and expects
    /// signals through this callback.
    pub fn callback_ptr(&self) -> u64 {
        self.read_u64(CALLBACK_PTR_OFFSET)
    }

    /// True when the executable-header magic sits at the probe offset, i.e.
    /// the binary was run as an ordinary executable.
    pub fn exe_magic_present(&self) -> bool {
        self.bytes(EXE_MAGIC_OFFSET, 1)[0] == EXE_MAGIC
    }

    /// Record a failure for the host: the numeric code plus a bounded,
    /// best-effort message.
    pub fn write_guest_error(&self, error: &GuestError) {
        let mut bounded = error.clone();
        if bounded.message.len() > GUEST_ERROR_MESSAGE_SIZE {
            let mut cut = GUEST_ERROR_MESSAGE_SIZE;
            while !bounded.message.is_char_boundary(cut) {
                cut -= 1;
            }
            bounded.message.truncate(cut);
        }
        // The record layout matches GuestErrorData: code, length, bytes.
        let bytes: Vec<u8> = (&bounded)
            .try_into()
            .unwrap_or_else(|_| Vec::from(&(ErrorCode::UnknownError as u32).to_le_bytes()[..]));
        self.write_bytes(Self::peb_field(offset_of!(SandboxPeb, error)), &bytes);
    }

    pub fn reset_guest_error(&self) {
        self.write_bytes(
            Self::peb_field(offset_of!(SandboxPeb, error)),
            &[0u8; 8 + GUEST_ERROR_MESSAGE_SIZE],
        );
    }

    /// The currently recorded failure, or `None` after a reset.
    pub fn read_guest_error(&self) -> Option<GuestError> {
        let record = self.bytes(
            Self::peb_field(offset_of!(SandboxPeb, error)),
            8 + GUEST_ERROR_MESSAGE_SIZE,
        );
        let error = GuestError::try_from(record).ok()?;
        (error.code != ErrorCode::NoError).then_some(error)
    }

    fn peb_field(field: usize) -> usize {
        sealbox_common::mem::PEB_OFFSET + field
    }
}
