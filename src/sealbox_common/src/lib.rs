#![no_std]

extern crate alloc;

pub mod codec;
pub mod guest_error;
pub mod guest_log_data;
pub mod mem;
