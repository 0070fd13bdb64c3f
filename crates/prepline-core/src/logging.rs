//! Logging setup: env_logger filtering, routed through indicatif on a TTY

use indicatif::MultiProgress;

/// Verbosity chosen on the command line; `RUST_LOG` still overrides it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Debug,
}

impl Verbosity {
    pub fn from_flags(quiet: bool, debug: bool) -> Self {
        match (quiet, debug) {
            (_, true) => Self::Debug,
            (true, false) => Self::Quiet,
            (false, false) => Self::Normal,
        }
    }

    fn default_filter(self) -> &'static str {
        match self {
            Self::Quiet => "warn",
            Self::Normal => "info",
            // Keep HTTP internals out of debug output
            Self::Debug => "debug,hyper_util=info,reqwest=info",
        }
    }
}

/// Padded label for a log level, wrapped in ANSI color when `color` is set
fn level_tag(level: log::Level, color: bool) -> String {
    let label = match level {
        log::Level::Error => "ERROR",
        log::Level::Warn => "WARN ",
        log::Level::Info => "INFO ",
        log::Level::Debug => "DEBUG",
        log::Level::Trace => "TRACE",
    };
    if !color {
        return label.to_string();
    }
    let ansi = match level {
        log::Level::Error => "31",
        log::Level::Warn => "33",
        log::Level::Info => "32",
        log::Level::Debug => "36",
        log::Level::Trace => "35",
    };
    format!("\x1b[{ansi}m{label}\x1b[0m")
}

/// Logger that prints above live progress bars instead of tearing them
pub struct IndicatifLogger {
    inner: env_logger::Logger,
    multi: MultiProgress,
}

impl IndicatifLogger {
    pub fn new(inner: env_logger::Logger, multi: MultiProgress) -> Self {
        Self { inner, multi }
    }
}

impl log::Log for IndicatifLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        if !self.inner.matches(record) {
            return;
        }
        let line = format!("[{}] {}", level_tag(record.level(), true), record.args());
        self.multi.suspend(|| eprintln!("{line}"));
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

fn builder(verbosity: Verbosity) -> env_logger::Builder {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(verbosity.default_filter()),
    )
}

/// Install the global logger.
///
/// With `multi` (interactive terminal) records go through [`IndicatifLogger`];
/// otherwise plain uncolored lines with a timestamp are written to stderr.
pub fn init_logging(
    verbosity: Verbosity,
    multi: Option<&MultiProgress>,
) -> Result<(), log::SetLoggerError> {
    use std::io::Write;

    match multi {
        Some(multi) => {
            let logger = builder(verbosity).build();
            let max_level = logger.filter();
            log::set_boxed_logger(Box::new(IndicatifLogger::new(logger, multi.clone())))?;
            log::set_max_level(max_level);
        }
        None => {
            builder(verbosity)
                .format(|buf, record| {
                    writeln!(
                        buf,
                        "{} [{}] {}",
                        buf.timestamp_seconds(),
                        level_tag(record.level(), false),
                        record.args()
                    )
                })
                .try_init()?;
        }
    }
    Ok(())
}
