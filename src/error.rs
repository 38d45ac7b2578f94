//! Error taxonomy and the process-global failure policy.
//!
//! Every fallible engine operation returns [`MriError`] through an ordinary
//! `Result`. Independently of that, a process-global policy decides what
//! happens at the moment a failure is recorded: `Abort` terminates with a
//! diagnostic, `Report` prints to stderr and lets the `Err` propagate,
//! `Ignore` only stores the message. The most recent failure message is
//! always retrievable with [`last_error`], and warnings print regardless of
//! the policy.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};
use std::sync::Mutex;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Failure raised by a dataset operation.
#[derive(Debug)]
pub enum MriError {
    /// Malformed value, out-of-bounds access, or violated format limit.
    Validation(String),
    /// Operation not permitted in the dataset's open mode, or write to an
    /// external chunk.
    State(String),
    /// Underlying filesystem failure.
    Io { context: String, source: io::Error },
    /// Malformed header text.
    Parse(String),
    /// The allocator could not place a chunk.
    Allocation(String),
    /// Broken internal invariant; indicates a library bug.
    Internal(String),
}

impl fmt::Display for MriError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MriError::Validation(msg) => write!(f, "{}", msg),
            MriError::State(msg) => write!(f, "{}", msg),
            MriError::Io { context, source } => write!(f, "{}: {}", context, source),
            MriError::Parse(msg) => write!(f, "{}", msg),
            MriError::Allocation(msg) => write!(f, "{}", msg),
            MriError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for MriError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MriError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl MriError {
    /// Wraps an I/O error with the path or operation it concerns.
    pub fn io(context: impl Into<String>, source: io::Error) -> MriError {
        MriError::Io { context: context.into(), source }
    }
}

pub type Result<T> = std::result::Result<T, MriError>;

// ---------------------------------------------------------------------------
// Failure policy
// ---------------------------------------------------------------------------

/// What the library does at the moment a failure is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorMode {
    /// Print a diagnostic and abort the process.
    Abort,
    /// Print to stderr; the operation returns the error.
    Report,
    /// Record the message only; the operation returns the error silently.
    Ignore,
}

static ERROR_MODE: AtomicU8 = AtomicU8::new(1); // Report

static LAST_ERROR: Mutex<Option<String>> = Mutex::new(None);

/// Selects the process-wide failure policy.
pub fn set_error_handling(mode: ErrorMode) {
    let v = match mode {
        ErrorMode::Abort => 0,
        ErrorMode::Report => 1,
        ErrorMode::Ignore => 2,
    };
    ERROR_MODE.store(v, Ordering::Relaxed);
}

/// Returns the current failure policy.
pub fn error_handling() -> ErrorMode {
    match ERROR_MODE.load(Ordering::Relaxed) {
        0 => ErrorMode::Abort,
        2 => ErrorMode::Ignore,
        _ => ErrorMode::Report,
    }
}

/// Returns the message of the most recently recorded failure or warning.
pub fn last_error() -> Option<String> {
    LAST_ERROR.lock().ok().and_then(|g| g.clone())
}

/// Records a failure and applies the process policy, then hands the error
/// back for propagation.
pub(crate) fn report(err: MriError) -> MriError {
    let msg = err.to_string();
    if let Ok(mut guard) = LAST_ERROR.lock() {
        *guard = Some(msg.clone());
    }
    match error_handling() {
        ErrorMode::Ignore => {}
        ErrorMode::Report => eprintln!("pghmri: {}", msg),
        ErrorMode::Abort => {
            eprintln!("pghmri: fatal: {}", msg);
            eprintln!("Aborting...");
            std::process::abort();
        }
    }
    err
}

/// Shorthand for `Err(report(err))`.
pub(crate) fn fail<T>(err: MriError) -> Result<T> {
    Err(report(err))
}

/// Records and prints a warning. Warnings are not affected by the policy
/// and never fail the operation.
pub(crate) fn warn(msg: impl AsRef<str>) {
    let msg = msg.as_ref();
    if let Ok(mut guard) = LAST_ERROR.lock() {
        *guard = Some(msg.to_string());
    }
    eprintln!("pghmri: warning: {}", msg);
}

// ---------------------------------------------------------------------------
// Notification level
// ---------------------------------------------------------------------------

/// Global notification level. 0 = silent, 1 = errors only, 2 = results +
/// warnings, 3 = progress, 4+ = verbose.
pub static NOTIFY_LEVEL: AtomicI32 = AtomicI32::new(0);

/// Sets the global notification level for diagnostic output.
pub fn set_notification_level(level: i32) {
    NOTIFY_LEVEL.store(level, Ordering::Relaxed);
}

/// Writes `msg` to stderr if the current notification level is at least
/// `level`.
pub(crate) fn notify(level: i32, msg: impl AsRef<str>) {
    if NOTIFY_LEVEL.load(Ordering::Relaxed) >= level {
        eprintln!("{}", msg.as_ref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_error_records_most_recent_failure() {
        set_error_handling(ErrorMode::Ignore);
        let _ = report(MriError::Validation("first".into()));
        let _ = report(MriError::State("second".into()));
        assert_eq!(last_error().as_deref(), Some("second"));
    }

    #[test]
    fn io_errors_carry_context() {
        let e = MriError::io(
            "data.mri",
            io::Error::new(io::ErrorKind::NotFound, "no such file"),
        );
        let text = e.to_string();
        assert!(text.starts_with("data.mri: "));
        assert!(std::error::Error::source(&e).is_some());
    }
}
