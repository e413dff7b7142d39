//! Logger interface used by the server and its interceptors.
//!
//! The default implementation forwards to `tracing`; [`MemoryLogger`] keeps
//! entries in memory so callers can inspect exactly what was logged.

use std::fmt;

use parking_lot::Mutex;
use tracing::Level;

use crate::context::CallContext;

/// Context-aware logger.
pub trait Logger: Send + Sync {
    /// Emits one entry at `level`, tagged with the call when one is given.
    fn log(&self, level: Level, ctx: Option<&CallContext>, args: fmt::Arguments<'_>);

    fn debug(&self, ctx: &CallContext, args: fmt::Arguments<'_>) {
        self.log(Level::DEBUG, Some(ctx), args);
    }

    fn info(&self, args: fmt::Arguments<'_>) {
        self.log(Level::INFO, None, args);
    }

    fn warn(&self, ctx: &CallContext, args: fmt::Arguments<'_>) {
        self.log(Level::WARN, Some(ctx), args);
    }

    fn error(&self, ctx: &CallContext, args: fmt::Arguments<'_>) {
        self.log(Level::ERROR, Some(ctx), args);
    }

    /// Logs at error severity, then aborts the process.
    fn fatal(&self, args: fmt::Arguments<'_>) -> ! {
        self.log(Level::ERROR, None, args);
        std::process::abort()
    }
}

/// Forwards entries to the `tracing` dispatcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

macro_rules! emit {
    ($level:expr, $ctx:expr, $args:expr) => {
        match $ctx {
            Some(ctx) => tracing::event!(
                $level,
                call_id = ctx.call_id,
                method = %ctx.method,
                "{}",
                $args
            ),
            None => tracing::event!($level, "{}", $args),
        }
    };
}

impl Logger for TracingLogger {
    fn log(&self, level: Level, ctx: Option<&CallContext>, args: fmt::Arguments<'_>) {
        if level == Level::ERROR {
            emit!(Level::ERROR, ctx, args);
        } else if level == Level::WARN {
            emit!(Level::WARN, ctx, args);
        } else if level == Level::INFO {
            emit!(Level::INFO, ctx, args);
        } else if level == Level::DEBUG {
            emit!(Level::DEBUG, ctx, args);
        } else {
            emit!(Level::TRACE, ctx, args);
        }
    }
}

/// One entry captured by [`MemoryLogger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub level: Level,
    pub call_id: Option<u64>,
    pub method: Option<String>,
    pub message: String,
}

/// Logger that records every entry in memory.
///
/// `fatal` panics with the message instead of aborting.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryLogger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all entries recorded so far.
    #[must_use]
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }

    /// Entries recorded at exactly `level`.
    #[must_use]
    pub fn at_level(&self, level: Level) -> Vec<LogEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.level == level)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Logger for MemoryLogger {
    fn log(&self, level: Level, ctx: Option<&CallContext>, args: fmt::Arguments<'_>) {
        self.entries.lock().push(LogEntry {
            level,
            call_id: ctx.map(|c| c.call_id),
            method: ctx.map(|c| c.method.full().to_string()),
            message: args.to_string(),
        });
    }

    fn fatal(&self, args: fmt::Arguments<'_>) -> ! {
        let message = args.to_string();
        self.log(Level::ERROR, None, format_args!("{message}"));
        panic!("fatal: {message}");
    }
}
