//! # Console Logger (`console_log_module.rs`)
//!
//! Minimal `log::Log` backend. Every record becomes one line on standard
//! output in the form `[LEVEL] <module> => message`, so anomaly and lint
//! reports interleave in order with scenario headers.

use std::io::{self, Write};

use log::{LevelFilter, Log, Metadata, Record};

/// Stdout logger; the level filter lives in `log::max_level()`.
pub struct ConsoleLogger;

static CONSOLE_LOGGER: ConsoleLogger = ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_record(
            record.level().as_str(),
            record.module_path().unwrap_or("?"),
            record.args(),
        );
        let mut stdout = io::stdout().lock();
        // A closed stdout must not take the run down with it.
        let _ = stdout.write_all(line.as_bytes());
    }

    fn flush(&self) {
        let _ = io::stdout().flush();
    }
}

/// Render one log line.
fn format_record(level: &str, module: &str, args: &std::fmt::Arguments<'_>) -> String {
    let short_module = module.rsplit("::").next().unwrap_or(module);
    format!("[{}] <{}> => {}\n", level, short_module, args)
}

/// Map the repeatable `-v` count to a level filter.
///
/// - 0: `Info` (scenario headers, anomalies, lint failures)
/// - 1: `Debug`
/// - 2+: `Trace`
pub fn level_for_verbosity(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Install the console logger as the global `log` backend.
///
/// Calling it twice is harmless; the second `set_logger` fails and only
/// the level is updated.
pub fn init(verbosity: u8) {
    let _ = log::set_logger(&CONSOLE_LOGGER);
    log::set_max_level(level_for_verbosity(verbosity));
}
