//! Diagnostic logging.
//!
//! Diagnostics are a side channel, every failure is still returned as an
//! error. The verbosity is chosen by whoever builds the [`Powercap`], not by
//! a global setting.
//!
//! [`Powercap`]: super::Powercap
use std::{fmt, sync::Arc};

use log::{Level, LevelFilter, Log, Record};

/// Target used for every record.
const TARGET: &str = "powercap";

/// Explicit handle to a [`log::Log`] sink, with its own verbosity.
///
/// Without a sink, records go to whatever logger is installed in the [`log`]
/// facade.
#[derive(Clone)]
pub struct Logger {
    level: LevelFilter,
    sink: Option<Arc<dyn Log>>,
}

impl Logger {
    /// Log at `level` and above to the [`log`] facade.
    pub fn new(level: LevelFilter) -> Self {
        Self { level, sink: None }
    }

    /// Log at `level` and above to `sink`.
    pub fn with_sink(level: LevelFilter, sink: Arc<dyn Log>) -> Self {
        Self {
            level,
            sink: Some(sink),
        }
    }

    /// Log nothing.
    pub fn off() -> Self {
        Self::new(LevelFilter::Off)
    }

    /// Current verbosity.
    pub fn level(&self) -> LevelFilter {
        self.level
    }

    pub(crate) fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        if level > self.level {
            return;
        }
        let record = Record::builder()
            .level(level)
            .target(TARGET)
            .args(args)
            .build();
        match &self.sink {
            Some(sink) => sink.log(&record),
            None => log::logger().log(&record),
        }
    }

    pub(crate) fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Debug, args)
    }

    pub(crate) fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Warn, args)
    }

    pub(crate) fn error(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Error, args)
    }
}

/// Warnings and errors, to the [`log`] facade.
impl Default for Logger {
    fn default() -> Self {
        Self::new(LevelFilter::Warn)
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("level", &self.level)
            .field("sink", &self.sink.as_ref().map(|_| "dyn Log"))
            .finish()
    }
}
