//! A logging implementation

use core::fmt;

use util::cell::OnceLock;

static LOGGER: Logger = Logger;

/// Where finished log lines go.
static CONSOLE: OnceLock<fn(fmt::Arguments<'_>)> = OnceLock::new();

/// Initialize the logger.
///
/// Every record is formatted into one line and handed to `console`, which is expected to write it
/// out immediately (the SBI console on hardware, standard error in host tests).
///
/// This function should only be called once.
pub fn init_logger(level: log::LevelFilter, console: fn(fmt::Arguments<'_>)) {
    if CONSOLE.set(console).is_err() {
        log::error!("Logger initialized twice");
        return;
    }
    match log::set_logger(&LOGGER) {
        Ok(()) => (),
        Err(e) => {
            // Someone else installed a logger, so this goes to theirs.
            log::error!("Error initializing logger: {e}");
            return;
        }
    }
    log::set_max_level(level);
}

/// The logger to use.
struct Logger;

impl log::Log for Logger {
    fn log(&self, record: &log::Record) {
        let Some(console) = CONSOLE.get() else {
            return;
        };
        console(format_args!(
            "{level:>8 } - {source} - {args}\n",
            level = record.level(),
            source = SourceLogWriter {
                file: record.file(),
                line: record.line()
            },
            args = record.args(),
        ));
    }

    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn flush(&self) {
        // We write everything out immediately.
    }
}

struct SourceLogWriter<'a> {
    file: Option<&'a str>,
    line: Option<u32>,
}
impl fmt::Display for SourceLogWriter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self {
                file,
                line: Some(line),
            } => write!(f, "{}:{line}", file.unwrap_or("<unknown>")),
            Self {
                file: Some(file),
                line: None,
            } => f.write_str(file),
            Self {
                file: None,
                line: None,
            } => f.write_str("<unknown loc>"),
        }
    }
}
