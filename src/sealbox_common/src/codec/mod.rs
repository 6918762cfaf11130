//! The verified value codec: the tagged set of marshal-able value kinds and
//! the structural verifier that every inbound buffer passes through before a
//! single field is read.

mod value;
mod verifier;

pub use value::Value;
pub use verifier::{verify, MalformedBuffer, ValueTag, VerifiedValue, VerifyResult};
