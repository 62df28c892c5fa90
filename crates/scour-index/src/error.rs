//! Error types for the ordered index.

/// Errors returned by [`OrderedIndex`](crate::OrderedIndex) and
/// [`Cursor`](crate::Cursor) operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum IndexError {
    /// The requested key is not present.
    #[error("key not found")]
    NotFound,

    /// The cursor has no current position; probe before reading or stepping.
    #[error("cursor is not positioned")]
    CursorUnset,
}
