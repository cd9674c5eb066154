//! Log output for the server process.
//!
//! The subscriber is installed before the config file is read, so it starts
//! at a bootstrap level and is retuned by [`apply_logging_level`] once
//! `logging.level` is known. An explicit `RUST_LOG` always wins.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

type FilterHandle = reload::Handle<EnvFilter, Registry>;

static FILTER: OnceLock<FilterHandle> = OnceLock::new();

fn rust_log_is_set() -> bool {
    std::env::var_os("RUST_LOG").is_some()
}

pub fn init_tracing() {
    init_tracing_with_level("info");
}

/// Installs the global subscriber. Later calls leave the first one in place.
pub fn init_tracing_with_level(level: &str) {
    let filter = if rust_log_is_set() {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    } else {
        EnvFilter::new(level)
    };

    let (filter, handle) = reload::Layer::new(filter);
    if FILTER.set(handle).is_err() {
        return;
    }

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}

/// Switches the live filter to `level`; a no-op under `RUST_LOG` or before
/// [`init_tracing_with_level`] ran.
pub fn apply_logging_level(level: &str) {
    if rust_log_is_set() {
        return;
    }
    let Some(handle) = FILTER.get() else {
        return;
    };
    if let Err(e) = handle.modify(|f| *f = EnvFilter::new(level)) {
        tracing::warn!(error = %e, level, "could not change log level");
    }
}
