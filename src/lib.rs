//! Railcut Core Library
//!
//! Editing core for a browser-based non-linear video editor.
//! Maintains a multi-track timeline of media segments, reconciles edits into
//! an undo/redo history, and drives the per-frame effect pipeline (filters,
//! cross-fade transitions, mute/volume, property animation) applied before
//! each frame reaches the renderer.
//!
//! The rendering/compositing engine and the key-value project store are
//! external collaborators expressed as traits in [`core::render`] and
//! [`core::history`]; in-memory implementations back headless use and tests.

pub mod core;

use std::path::Path;
use std::sync::OnceLock;

static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// Initializes the global tracing subscriber.
///
/// Logs to stdout and, when `log_dir` is given, to a daily rolling file.
/// Safe to call more than once; later calls are ignored.
pub fn init_logging(log_dir: Option<&Path>) {
    use tracing_subscriber::prelude::*;

    let env_filter =
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(cfg!(debug_assertions));

    let file_layer = log_dir.map(|dir| {
        let _ = std::fs::create_dir_all(dir);
        let file_appender = tracing_appender::rolling::daily(dir, "railcut.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let _ = LOG_GUARD.set(guard);
        tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
    });

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer);

    // Avoid panics if already initialized (tests, embedders with their own setup).
    let _ = tracing::subscriber::set_global_default(subscriber);
}
