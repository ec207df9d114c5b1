//! Console output and the `log` backend.
//!
//! Output goes to a pluggable sink: a UART putc loop on bare metal, stdout
//! on a host build. Until a sink is installed everything is dropped.

use core::fmt;

use log::{LevelFilter, Log, Metadata, Record};

use crate::error::{Result, SmdError};
use crate::sync::SpinLock;

/// Receives formatted console text.
pub type Sink = fn(&str);

fn discard(_: &str) {}

static SINK: SpinLock<Sink> = SpinLock::new(discard);

/// Route console output to `sink`.
pub fn set_sink(sink: Sink) {
    *SINK.lock() = sink;
}

/// Write a string to the current sink.
pub fn puts(s: &str) {
    let sink = *SINK.lock();
    sink(s);
}

/// Sink that writes to the process's stdout.
#[cfg(feature = "std")]
pub fn stdout_sink(s: &str) {
    use std::io::Write;
    let _ = std::io::stdout().lock().write_all(s.as_bytes());
}

/// Get a writer for the console
pub fn writer() -> ConsoleWriter {
    ConsoleWriter
}

pub struct ConsoleWriter;

impl fmt::Write for ConsoleWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        puts(s);
        Ok(())
    }
}

/// Print macro (without newline)
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {{
        use core::fmt::Write;
        let _ = write!($crate::console::writer(), $($arg)*);
    }};
}

/// Println macro (with newline)
#[macro_export]
macro_rules! println {
    () => {
        $crate::print!("\n")
    };
    ($($arg:tt)*) => {{
        use core::fmt::Write;
        let _ = writeln!($crate::console::writer(), $($arg)*);
    }};
}

/// `log` backend writing `[LEVEL] target: message` lines to the console.
pub struct ConsoleLogger;

static LOGGER: ConsoleLogger = ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        use fmt::Write;
        let _ = writeln!(
            writer(),
            "[{:<5}] {}: {}",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}

/// Install the console logger. Fails if another logger is already set.
pub fn init(level: LevelFilter) -> Result<()> {
    log::set_logger(&LOGGER).map_err(|_| SmdError::InvalidArgument("logger already installed"))?;
    log::set_max_level(level);
    Ok(())
}
