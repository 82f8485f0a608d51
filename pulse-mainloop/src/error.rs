use thiserror::Error;

/// Errors surfaced while driving the loop
///
/// A requested quit is deliberately *not* represented here — stopping the
/// loop is a normal control path and is reported through
/// [`IterateResult::Quit`](crate::IterateResult::Quit) instead.
#[derive(Debug, Error)]
pub enum MainloopError {
    /// The underlying multiplex call (or the wakeup pipe) failed
    #[error("poll failed: {0}")]
    Io(#[from] std::io::Error),

    /// `prepare`/`poll`/`dispatch` were called out of sequence
    #[error("mainloop step out of order: {0}")]
    OutOfOrder(&'static str),
}

/// Type alias for results that can return a MainloopError
pub type Result<T> = std::result::Result<T, MainloopError>;
