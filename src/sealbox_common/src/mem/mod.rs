//! The shared-region memory map.
//!
//! Every constant in this module is a contract with the host: the host writes
//! the call slot and probe bytes at these offsets and reads the result slot,
//! output region and error record back from them. A mismatch on either side
//! is undefined behavior, not a reportable error, so the layout lives in one
//! place and nowhere else.

pub const PAGE_SHIFT: u64 = 12;
pub const PAGE_SIZE: u64 = 1 << 12;
pub const PAGE_SIZE_USIZE: usize = 1 << 12;

/// Guest address the shared region is mapped at when running under the
/// hypervisor or loaded in-process. Standalone executables are linked at the
/// same preferred base.
pub const GUEST_REGION_BASE: u64 = 0x0020_0000;
/// Size of the shared region.
pub const GUEST_REGION_SIZE: usize = 0x3_1000;

/// Offset of the [`SandboxPeb`] handshake block.
pub const PEB_OFFSET: usize = 0x4000;
/// Offset of the host-callback pointer slot, 16 bytes below the host-result
/// block. Non-null here means the binary was loaded in-process.
pub const CALLBACK_PTR_OFFSET: usize = 0xFFF0;
/// Offset of the i32 result slot for guest-to-host calls.
pub const HOST_RESULT_OFFSET: usize = 0x1_0000;
/// Offset of the call slot: function name pointer, argument count and the
/// tagged argument cells.
pub const CALL_SLOT_OFFSET: usize = 0x2_0000;
/// Offset of the i32 result slot the guest writes after each call. It aliases
/// the call-name slot: control alternates strictly between host and guest, so
/// the call slot has always been consumed by the time the result lands.
pub const RESULT_OFFSET: usize = CALL_SLOT_OFFSET;
/// Offset and size of the output text region (print and log payloads).
pub const OUTPUT_OFFSET: usize = 0x2_1000;
pub const OUTPUT_SIZE: usize = 0x1000;
/// Offset of the executable-header probe byte.
pub const EXE_MAGIC_OFFSET: usize = 0x3_0000;
/// First byte of a PE image ("MZ"). Present at the probe offset only when the
/// binary was run as an ordinary executable.
pub const EXE_MAGIC: u8 = b'M';

/// Call slot internals, relative to [`CALL_SLOT_OFFSET`].
pub const CALL_NAME_PTR_OFFSET: usize = 0x0;
pub const CALL_ARG_COUNT_OFFSET: usize = 0x8;
pub const CALL_ARG_CELLS_OFFSET: usize = 0x10;

/// Maximum number of tagged argument cells in the call slot.
pub const MAX_CALL_ARGS: usize = 4;
/// Bound on the function-name string, including its NUL terminator.
pub const MAX_FUNCTION_NAME_LEN: usize = 256;

/// The one value the host is guaranteed to observe in the result slot when a
/// call fails. The specific failure kind is in the PEB error record.
pub const CALL_FAILED_SENTINEL: i32 = -1;

const OUT_OF_LINE_BIT: u64 = 1 << 63;

/// A tagged 64-bit argument cell from the call slot.
///
/// The high bit of the raw cell distinguishes an out-of-line encoded value
/// (the low 63 bits are its guest address) from an inline integer. The split
/// happens exactly once, here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgCell {
    /// Guest address of a size-prefixed encoded value.
    OutOfLine(u64),
    /// An inline integer payload.
    Inline(i64),
}

impl ArgCell {
    pub fn from_raw(raw: u64) -> Self {
        if raw & OUT_OF_LINE_BIT != 0 {
            ArgCell::OutOfLine(raw & !OUT_OF_LINE_BIT)
        } else {
            ArgCell::Inline(raw as i64)
        }
    }

    pub fn to_raw(self) -> u64 {
        match self {
            ArgCell::OutOfLine(addr) => addr | OUT_OF_LINE_BIT,
            ArgCell::Inline(v) => (v as u64) & !OUT_OF_LINE_BIT,
        }
    }
}

/// Size of the bounded message buffer in the PEB error record.
pub const GUEST_ERROR_MESSAGE_SIZE: usize = 512;

#[repr(C)]
pub struct GuestErrorData {
    pub code: u32,
    pub message_len: u32,
    pub message: [u8; GUEST_ERROR_MESSAGE_SIZE],
}

#[repr(C)]
pub struct GuestHeapData {
    pub heap_buffer: u64,
    pub heap_size: u64,
}

#[repr(C)]
pub struct GuestStackData {
    pub min_stack_address: u64,
}

/// The handshake block the host reads once at setup. The guest publishes its
/// dispatch entry point here; the host fills in the heap and stack
/// descriptors before first entry.
#[repr(C)]
pub struct SandboxPeb {
    pub dispatch_function_ptr: u64,
    pub heap: GuestHeapData,
    pub stack: GuestStackData,
    pub error: GuestErrorData,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arg_cell_round_trips_through_raw() {
        let cells = [
            ArgCell::Inline(0),
            ArgCell::Inline(42),
            ArgCell::Inline(i64::MAX >> 1),
            ArgCell::OutOfLine(0x0022_0100),
            ArgCell::OutOfLine(0),
        ];
        for cell in cells {
            assert_eq!(ArgCell::from_raw(cell.to_raw()), cell);
        }
    }

    #[test]
    fn high_bit_selects_out_of_line() {
        assert_eq!(
            ArgCell::from_raw(OUT_OF_LINE_BIT | 0x1234),
            ArgCell::OutOfLine(0x1234)
        );
        assert_eq!(ArgCell::from_raw(0x1234), ArgCell::Inline(0x1234));
    }

    #[test]
    fn layout_blocks_do_not_overlap() {
        assert!(PEB_OFFSET + core::mem::size_of::<SandboxPeb>() <= CALLBACK_PTR_OFFSET);
        assert!(CALLBACK_PTR_OFFSET + 8 <= HOST_RESULT_OFFSET);
        assert!(HOST_RESULT_OFFSET + 4 <= CALL_SLOT_OFFSET);
        assert!(CALL_SLOT_OFFSET + CALL_ARG_CELLS_OFFSET + MAX_CALL_ARGS * 8 <= OUTPUT_OFFSET);
        assert!(OUTPUT_OFFSET + OUTPUT_SIZE <= EXE_MAGIC_OFFSET);
        assert!(EXE_MAGIC_OFFSET < GUEST_REGION_SIZE);
    }
}
