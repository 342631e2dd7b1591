//! Error-handling utilities.
//!
//! The gateway uses `anyhow` everywhere for propagation and context. The
//! only things we add here are a helper for printing a chained cause list
//! plus backtrace when a top-level operation fails, and a helper for
//! logging (rather than propagating) a per-cycle failure.

use anyhow::Error;
use tracing::error;

/// Display an error, plus all the underlying "causes" (ie, wrapped errors), plus a
/// backtrace. Used when a configuration error aborts the process.
pub fn display_causes_and_backtrace(err: &Error) {
    eprintln!("Error: {}", err);
    for cause in err.chain().skip(1) {
        eprintln!("  caused by: {}", cause);
    }
    eprintln!("{}", err.backtrace());
}

/// Log a per-cycle failure without propagating it. Every source fetch and
/// sink emission in the supervisor loop goes through this so that one
/// misbehaving source or sink never aborts the others (a misbehaving sink
/// must not prevent others from firing).
pub fn log_cycle_error(component: &str, name: &str, err: &Error) {
    error!(component, name, error = %err, "cycle step failed, continuing");
    for cause in err.chain().skip(1) {
        error!(component, name, cause = %cause, "caused by");
    }
}
