/// Handler signature for functions the guest exposes to the host: one
/// decoded string argument in, an i32 that doubles as result and error code
/// out.
pub type GuestFunction = fn(&str) -> i32;

/// One exposed function.
#[derive(Debug, Clone, Copy)]
pub struct FunctionTableEntry {
    pub name: &'static str,
    pub handler: GuestFunction,
}

/// The static table of functions a guest exposes. Built in const context,
/// never mutated, resolved by linear scan with the first exact match winning
/// (duplicate names are a configuration bug, not a runtime condition).
#[derive(Debug, Clone, Copy)]
pub struct FunctionTable {
    entries: &'static [FunctionTableEntry],
}

impl FunctionTable {
    pub const fn new(entries: &'static [FunctionTableEntry]) -> Self {
        Self { entries }
    }

    pub fn find(&self, name: &str) -> Option<&FunctionTableEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
