use alloc::format;
use alloc::string::ToString;
use alloc::vec::Vec;

use log::{LevelFilter, Log, Metadata, Record};
use sealbox_common::guest_log_data::GuestLogData;

use crate::execution_context::OutBAction;
use crate::with_handle;

/// `log` facade backend: marshals each record through the output region and
/// raises the log signal so the host can pick it up.
pub struct GuestLogger;

pub static LOGGER: GuestLogger = GuestLogger;

impl Log for GuestLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let data = GuestLogData::new(
            format!("{}", record.args()),
            record
                .module_path()
                .unwrap_or(record.target())
                .to_string(),
            record.level().into(),
            record.line().unwrap_or(0),
        );
        // A record that cannot be marshalled is dropped; logging must never
        // take the guest down.
        let Ok(bytes) = Vec::try_from(&data) else {
            return;
        };
        with_handle(|handle| {
            handle.mailbox().write_output(&bytes);
            handle.context().raise(OutBAction::Log);
        });
    }

    fn flush(&self) {}
}

/// Install the logger at the filter level the host passed in. Levels outside
/// the known range clamp to the nearest end.
pub fn init_logging(level_filter: i32) {
    let filter = match level_filter {
        i32::MIN..=0 => LevelFilter::Off,
        1 => LevelFilter::Error,
        2 => LevelFilter::Warn,
        3 => LevelFilter::Info,
        4 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    // set_logger fails only when a logger is already installed, which is fine
    // on re-entry.
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(filter);
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;

    #[test]
    fn filter_levels_clamp() {
        init_logging(-3);
        assert_eq!(log::max_level(), LevelFilter::Off);
        init_logging(99);
        assert_eq!(log::max_level(), LevelFilter::Trace);
        init_logging(3);
        assert_eq!(log::max_level(), LevelFilter::Info);
    }
}
