use thiserror::Error;

/// Crate-wide error type.
///
/// Variants are grouped to match the five error kinds the content engine
/// distinguishes: programmer-assertion failures, invalid caller input,
/// missing rows, transient storage failures, and integrity violations that
/// indicate the store itself is in a state the engine did not expect.
#[derive(Debug, Error)]
pub enum ContentError {
    /// An internal invariant was violated. These are bugs, not user errors,
    /// and callers should not attempt to recover from them.
    #[error("assertion failed: {0}")]
    Assert(String),

    /// The caller supplied something the engine will not act on (bad path,
    /// bad branch/revision number, malformed key, disallowed transition).
    #[error("invalid input: {0}")]
    Invalid(String),

    /// A row the caller asked for does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The storage layer failed in a way that may succeed on retry.
    #[error("storage error: {0}")]
    Storage(String),

    /// The store returned data that conflicts with the engine's model of it
    /// (e.g. a branch row referencing a revision that was never written).
    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
}

impl ContentError {
    #[must_use]
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    #[must_use]
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    #[must_use]
    pub fn assert(msg: impl Into<String>) -> Self {
        Self::Assert(msg.into())
    }

    #[must_use]
    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ContentError>;
