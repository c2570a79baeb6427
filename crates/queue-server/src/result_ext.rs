//! Logging helpers for `Result` and `Option`.
//!
//! Both traits pass the value through untouched and only emit a tracing
//! event, tagged with the caller's file and line, when something is off.

use std::fmt::Display;
use std::panic::Location;

fn caller(location: &Location<'_>) -> String {
    format!("{}:{}", location.file(), location.line())
}

/// Log an `Err` without consuming it.
pub trait ResultExt<T, E> {
    /// Log at error level.
    ///
    /// ```ignore
    /// use shotdiff_queue::result_ext::ResultExt;
    ///
    /// let leased = store.lease(&queue, &owner, 5, 60.0, now).await.log("lease batch")?;
    /// ```
    fn log<S: ToString>(self, context: S) -> Result<T, E>;

    /// Log at warn level, for failures the caller recovers from.
    fn log_warn<S: ToString>(self, context: S) -> Result<T, E>;
}

impl<T, E: Display> ResultExt<T, E> for Result<T, E> {
    #[track_caller]
    fn log<S: ToString>(self, context: S) -> Result<T, E> {
        if let Err(ref e) = self {
            tracing::error!(
                target: "shotdiff_queue",
                error = %e,
                file = %caller(Location::caller()),
                context = %context.to_string(),
                "Operation failed"
            );
        }
        self
    }

    #[track_caller]
    fn log_warn<S: ToString>(self, context: S) -> Result<T, E> {
        if let Err(ref e) = self {
            tracing::warn!(
                target: "shotdiff_queue",
                error = %e,
                file = %caller(Location::caller()),
                context = %context.to_string(),
                "Operation failed, continuing"
            );
        }
        self
    }
}

/// Log a `None` without consuming it.
pub trait OptionResultExt<T> {
    fn log_none<S: ToString>(self, context: S) -> Option<T>;
}

impl<T> OptionResultExt<T> for Option<T> {
    #[track_caller]
    fn log_none<S: ToString>(self, context: S) -> Option<T> {
        if self.is_none() {
            tracing::warn!(
                target: "shotdiff_queue",
                file = %caller(Location::caller()),
                context = %context.to_string(),
                "Expected value was None"
            );
        }
        self
    }
}
