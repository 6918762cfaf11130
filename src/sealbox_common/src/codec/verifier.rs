//! Structural verification of encoded value buffers.
//!
//! Everything that arrives through the call slot is untrusted. The verifier
//! walks a buffer's declared structure field by field and bounds-checks each
//! claim before anything reads through it; only a [`VerifiedValue`] returned
//! from [`verify`] can hand out field contents.
//!
//! Wire form (version 1, little-endian), matching the encoder in
//! `codec::value`:
//!
//! ```text
//! [0..4)    u32 payload length (bytes following the prefix)
//! [4..8)    u32 root offset from buffer start to the tag byte
//! [root]    u8  union tag
//! [root+1..] payload:
//!     1 Int                 i32
//!     2 Long                i64
//!     3 String              u32 len + len bytes
//!     4 Bool                u8
//!     5 VecBytes            u32 len + len bytes
//!     6 SizePrefixedBuffer  u32 declared size + u32 len + len bytes
//!     7 Void                (empty)
//! ```
//!
//! A tag outside the known range verifies as *absent* rather than failing, so
//! a host speaking a newer revision of the format degrades to void instead of
//! wedging the call.

use core::fmt;

/// The single failure the verifier reports. Verification never partially
/// trusts a buffer: the first check that fails aborts the walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MalformedBuffer;

impl fmt::Display for MalformedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("malformed value buffer")
    }
}

pub type VerifyResult<T> = core::result::Result<T, MalformedBuffer>;

pub(crate) const SIZE_PREFIX_LEN: usize = 4;
pub(crate) const ROOT_FIELD_LEN: usize = 4;

/// Union tags of the marshal-able value kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ValueTag {
    Int = 1,
    Long = 2,
    String = 3,
    Bool = 4,
    VecBytes = 5,
    SizePrefixedBuffer = 6,
    Void = 7,
}

impl ValueTag {
    fn from_byte(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(ValueTag::Int),
            2 => Some(ValueTag::Long),
            3 => Some(ValueTag::String),
            4 => Some(ValueTag::Bool),
            5 => Some(ValueTag::VecBytes),
            6 => Some(ValueTag::SizePrefixedBuffer),
            7 => Some(ValueTag::Void),
            _ => None,
        }
    }
}

/// A buffer whose structure has been fully validated. Field reads are only
/// reachable through this type.
#[derive(Debug)]
pub struct VerifiedValue<'a> {
    buf: &'a [u8],
    payload: usize,
    /// `None` means the union tag was outside the known range and the value
    /// is treated as absent.
    tag: Option<ValueTag>,
}

/// Validate the structure of an encoded value buffer.
///
/// On success the returned [`VerifiedValue`] exposes the (already
/// bounds-checked) fields; on any structural failure the single
/// [`MalformedBuffer`] error is returned and no field has been read.
pub fn verify(buf: &[u8]) -> VerifyResult<VerifiedValue<'_>> {
    // The prefix and root offset themselves need to fit before being read.
    let declared = read_u32(buf, 0)? as usize;
    let extent = declared
        .checked_add(SIZE_PREFIX_LEN)
        .ok_or(MalformedBuffer)?;
    if extent > buf.len() {
        return Err(MalformedBuffer);
    }
    let buf = &buf[..extent];

    let root = read_u32(buf, SIZE_PREFIX_LEN)? as usize;
    if root < SIZE_PREFIX_LEN + ROOT_FIELD_LEN || root >= buf.len() {
        return Err(MalformedBuffer);
    }

    let tag = ValueTag::from_byte(buf[root]);
    let payload = root + 1;

    match tag {
        Some(ValueTag::Int) => check_scalar(buf, payload, 4)?,
        Some(ValueTag::Long) => check_scalar(buf, payload, 8)?,
        Some(ValueTag::Bool) => check_scalar(buf, payload, 1)?,
        Some(ValueTag::String) | Some(ValueTag::VecBytes) => {
            check_vector(buf, payload, 1)?;
        }
        Some(ValueTag::SizePrefixedBuffer) => {
            // Declared-size field, then the vector it describes.
            check_scalar(buf, payload, 4)?;
            check_vector(buf, payload + 4, 1)?;
        }
        // Void carries no payload; an unknown tag is absent, not an error.
        Some(ValueTag::Void) | None => {}
    }

    Ok(VerifiedValue { buf, payload, tag })
}

fn read_u32(buf: &[u8], offset: usize) -> VerifyResult<u32> {
    let end = offset.checked_add(4).ok_or(MalformedBuffer)?;
    let bytes = buf.get(offset..end).ok_or(MalformedBuffer)?;
    Ok(u32::from_le_bytes(bytes.try_into().unwrap_or([0; 4])))
}

/// A scalar of width `width` must occupy exactly that many bytes inside the
/// buffer at the claimed offset.
fn check_scalar(buf: &[u8], offset: usize, width: usize) -> VerifyResult<()> {
    let end = offset.checked_add(width).ok_or(MalformedBuffer)?;
    if end > buf.len() {
        return Err(MalformedBuffer);
    }
    Ok(())
}

/// The length prefix is validated before the payload it describes;
/// `len * element_size` must neither overflow nor escape the buffer.
fn check_vector(buf: &[u8], offset: usize, element_size: usize) -> VerifyResult<()> {
    let len = read_u32(buf, offset)? as usize;
    let byte_len = len.checked_mul(element_size).ok_or(MalformedBuffer)?;
    let end = offset
        .checked_add(4)
        .and_then(|start| start.checked_add(byte_len))
        .ok_or(MalformedBuffer)?;
    if end > buf.len() {
        return Err(MalformedBuffer);
    }
    Ok(())
}

impl<'a> VerifiedValue<'a> {
    /// The validated union tag, or `None` when the value is absent.
    pub fn tag(&self) -> Option<ValueTag> {
        self.tag
    }

    pub(crate) fn read_i32(&self) -> i32 {
        let bytes = &self.buf[self.payload..self.payload + 4];
        i32::from_le_bytes(bytes.try_into().unwrap_or([0; 4]))
    }

    pub(crate) fn read_i64(&self) -> i64 {
        let bytes = &self.buf[self.payload..self.payload + 8];
        i64::from_le_bytes(bytes.try_into().unwrap_or([0; 8]))
    }

    pub(crate) fn read_bool(&self) -> bool {
        self.buf[self.payload] != 0
    }

    pub(crate) fn read_bytes(&self) -> &'a [u8] {
        let len = u32::from_le_bytes(
            self.buf[self.payload..self.payload + 4]
                .try_into()
                .unwrap_or([0; 4]),
        ) as usize;
        &self.buf[self.payload + 4..self.payload + 4 + len]
    }

    pub(crate) fn read_size_prefixed(&self) -> (u32, &'a [u8]) {
        let declared = u32::from_le_bytes(
            self.buf[self.payload..self.payload + 4]
                .try_into()
                .unwrap_or([0; 4]),
        );
        let len = u32::from_le_bytes(
            self.buf[self.payload + 4..self.payload + 8]
                .try_into()
                .unwrap_or([0; 4]),
        ) as usize;
        (declared, &self.buf[self.payload + 8..self.payload + 8 + len])
    }
}
