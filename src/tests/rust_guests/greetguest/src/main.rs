#![no_std]
#![no_main]

extern crate alloc;
extern crate sealbox_guest;

use alloc::format;

use sealbox_guest::function_table::{FunctionTable, FunctionTableEntry};
use sealbox_guest::print::print_output;

fn guest_method(message: &str) -> i32 {
    match print_output(&format!("Hello from GuestFunction, {message}!!.\n")) {
        Ok(written) => written,
        Err(_) => -1,
    }
}

static FUNCTIONS: FunctionTable = FunctionTable::new(&[FunctionTableEntry {
    name: "GuestMethod",
    handler: guest_method,
}]);

#[no_mangle]
pub extern "C" fn sealbox_guest_main() -> i32 {
    0
}

#[no_mangle]
pub extern "C" fn sealbox_guest_functions() -> &'static FunctionTable {
    &FUNCTIONS
}
