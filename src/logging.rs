//! logging — slog logger construction.
//!
//! The engine logs through a caller-supplied [`slog::Logger`]. By default a
//! [`Discard`] root is used so library callers pay nothing; with the
//! `obs_slog` feature, [`terminal_logger`] builds an asynchronous terminal
//! drain for interactive runs.
use slog::{Discard, Logger, o};

/// Root logger that drops every record.
pub fn discard_logger() -> Logger {
    Logger::root(Discard, o!())
}

/// Non-blocking terminal logger (`slog-term` + `slog-async`).
#[cfg(feature = "obs_slog")]
pub fn terminal_logger() -> Logger {
    use slog::Drain;

    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, o!("crate" => "geo_imputation"))
}
