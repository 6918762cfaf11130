//! Host-side test utilities: a synthetic shared region plus helpers that
//! play the host's role against it (writing calls, reading back results,
//! output and error records).

use core::mem::offset_of;

use sealbox_common::codec::Value;
use sealbox_common::guest_error::{ErrorCode, GuestError};
use sealbox_common::mem::{
    ArgCell, SandboxPeb, CALLBACK_PTR_OFFSET, CALL_ARG_CELLS_OFFSET, CALL_ARG_COUNT_OFFSET,
    CALL_NAME_PTR_OFFSET, CALL_SLOT_OFFSET, EXE_MAGIC, EXE_MAGIC_OFFSET,
    GUEST_ERROR_MESSAGE_SIZE, GUEST_REGION_SIZE, OUTPUT_OFFSET, OUTPUT_SIZE, PEB_OFFSET,
    RESULT_OFFSET,
};

// Scratch space inside the call slot page: the host-side marshaller parks
// the NUL-terminated name and out-of-line value buffers here, past the
// name-ptr/count/cells header.
const NAME_SCRATCH_OFFSET: usize = CALL_SLOT_OFFSET + 0x100;
const VALUE_SCRATCH_OFFSET: usize = CALL_SLOT_OFFSET + 0x200;

/// An argument as the host would supply it: an inline integer cell, a string
/// marshalled out of line, or a raw pre-encoded buffer for malformed-input
/// tests.
pub enum HostArg<'a> {
    Inline(i64),
    Str(&'a str),
    Raw(Vec<u8>),
}

/// A synthetic shared region with an identity guest-address mapping, sized
/// and laid out like the real one.
pub struct SandboxRegion {
    buf: Vec<u8>,
}

impl Default for SandboxRegion {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxRegion {
    pub fn new() -> Self {
        Self {
            buf: vec![0u8; GUEST_REGION_SIZE],
        }
    }

    pub fn base(&mut self) -> *mut u8 {
        self.buf.as_mut_ptr()
    }

    /// Identity mapping: the guest address of a byte is its host address.
    pub fn guest_base(&self) -> u64 {
        self.buf.as_ptr() as u64
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Fill the call slot the way the host does: name NUL-terminated in
    /// scratch space and pointed to, arguments marshalled into tagged cells
    /// with string/raw payloads placed out of line.
    pub fn write_call(&mut self, name: &str, args: &[HostArg]) {
        assert!(name.len() < 0x100 - 1, "test name exceeds scratch space");
        assert!(args.len() <= 4, "test call exceeds the cell count");

        self.buf[NAME_SCRATCH_OFFSET..NAME_SCRATCH_OFFSET + name.len()]
            .copy_from_slice(name.as_bytes());
        self.buf[NAME_SCRATCH_OFFSET + name.len()] = 0;
        let name_addr = self.guest_base() + NAME_SCRATCH_OFFSET as u64;
        self.write_u64(CALL_SLOT_OFFSET + CALL_NAME_PTR_OFFSET, name_addr);

        self.write_u32(CALL_SLOT_OFFSET + CALL_ARG_COUNT_OFFSET, args.len() as u32);

        let mut cursor = VALUE_SCRATCH_OFFSET;
        for (i, arg) in args.iter().enumerate() {
            let cell = match arg {
                HostArg::Inline(n) => ArgCell::Inline(*n),
                HostArg::Str(s) => {
                    let encoded: Vec<u8> = (&Value::String((*s).to_string()))
                        .try_into()
                        .expect("test string encodes");
                    ArgCell::OutOfLine(self.park(&mut cursor, &encoded))
                }
                HostArg::Raw(bytes) => ArgCell::OutOfLine(self.park(&mut cursor, bytes)),
            };
            self.write_u64(
                CALL_SLOT_OFFSET + CALL_ARG_CELLS_OFFSET + i * 8,
                cell.to_raw(),
            );
        }
    }

    fn park(&mut self, cursor: &mut usize, bytes: &[u8]) -> u64 {
        let addr = self.guest_base() + *cursor as u64;
        self.buf[*cursor..*cursor + bytes.len()].copy_from_slice(bytes);
        *cursor += bytes.len() + 8;
        addr
    }

    /// Point the name pointer somewhere else, e.g. outside the region.
    pub fn corrupt_name_ptr(&mut self, addr: u64) {
        self.write_u64(CALL_SLOT_OFFSET + CALL_NAME_PTR_OFFSET, addr);
    }

    /// Overwrite the declared cell count.
    pub fn corrupt_arg_count(&mut self, count: u32) {
        self.write_u32(CALL_SLOT_OFFSET + CALL_ARG_COUNT_OFFSET, count);
    }

    /// Re-point the first cell at an arbitrary out-of-line address.
    pub fn corrupt_first_cell_addr(&mut self, addr: u64) {
        self.write_u64(
            CALL_SLOT_OFFSET + CALL_ARG_CELLS_OFFSET,
            ArgCell::OutOfLine(addr).to_raw(),
        );
    }

    pub fn read_result(&self) -> i32 {
        i32::from_le_bytes(self.buf[RESULT_OFFSET..RESULT_OFFSET + 4].try_into().unwrap())
    }

    /// The output region up to its NUL terminator, as text.
    pub fn read_output_str(&self) -> String {
        let window = &self.buf[OUTPUT_OFFSET..OUTPUT_OFFSET + OUTPUT_SIZE];
        let nul = window.iter().position(|&b| b == 0).unwrap_or(window.len());
        String::from_utf8_lossy(&window[..nul]).into_owned()
    }

    /// The recorded guest error, or `None` when the record is clear.
    pub fn read_guest_error(&self) -> Option<GuestError> {
        let offset = PEB_OFFSET + offset_of!(SandboxPeb, error);
        let record = &self.buf[offset..offset + 8 + GUEST_ERROR_MESSAGE_SIZE];
        let error = GuestError::try_from(record).ok()?;
        (error.code != ErrorCode::NoError).then_some(error)
    }

    pub fn set_exe_magic(&mut self) {
        self.buf[EXE_MAGIC_OFFSET] = EXE_MAGIC;
    }

    pub fn set_callback(&mut self, addr: u64) {
        self.write_u64(CALLBACK_PTR_OFFSET, addr);
    }

    pub fn set_heap_descriptor(&mut self, base: u64, size: u64) {
        let offset = PEB_OFFSET + offset_of!(SandboxPeb, heap);
        self.write_u64(offset, base);
        self.write_u64(offset + 8, size);
    }

    pub fn set_host_result(&mut self, value: i32) {
        let offset = sealbox_common::mem::HOST_RESULT_OFFSET;
        self.buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Parse the guest-to-host call record marshalled into the output region:
    /// the function name plus the optional encoded argument.
    pub fn read_host_call_record(&self) -> (String, Option<Value>) {
        let out = &self.buf[OUTPUT_OFFSET..OUTPUT_OFFSET + OUTPUT_SIZE];
        let name_len = u32::from_le_bytes(out[..4].try_into().unwrap()) as usize;
        let name =
            String::from_utf8(out[4..4 + name_len].to_vec()).expect("record name is UTF-8");
        let flag_offset = 4 + name_len;
        let arg = (out[flag_offset] == 1).then(|| {
            Value::try_from(&out[flag_offset + 1..]).expect("record argument decodes")
        });
        (name, arg)
    }

    pub fn dispatch_ptr(&self) -> u64 {
        let offset = PEB_OFFSET + offset_of!(SandboxPeb, dispatch_function_ptr);
        u64::from_le_bytes(self.buf[offset..offset + 8].try_into().unwrap())
    }

    fn write_u32(&mut self, offset: usize, value: u32) {
        self.buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn write_u64(&mut self, offset: usize, value: u64) {
        self.buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }
}
