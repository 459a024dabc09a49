//! Error taxonomy for encoding, decoding and rendering object graphs.
//!
//! Every failure aborts the current `encode`/`decode` call; nothing is retried
//! and no partial graph is handed back.

use thiserror::Error;

/// Boxed error raised by a [`FallbackCodec`](crate::opaque::FallbackCodec).
pub type FallbackError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// a structured object names a type that was never registered
    #[error("unknown type `{0}`")]
    UnknownType(String),

    /// a back-reference points at an ordinal nothing was bound to
    #[error("unresolved reference to ordinal {0}")]
    UnresolvedReference(usize),

    /// a tree node matches none of the known shapes; `path` is a JSON path
    /// such as `items[1].fields.next`
    #[error("unrecognized node at {path}: {found}")]
    UnrecognizedNode { path: String, found: String },

    /// raised unchanged by the opaque fallback codec
    #[error(transparent)]
    Fallback(FallbackError),

    /// the same type name was registered twice
    #[error("type `{0}` is already registered")]
    DuplicateType(String),

    /// a node lists a registered base that its type does not declare
    #[error("type `{ty}` does not declare base `{base}`")]
    BaseMismatch { ty: String, base: String },

    /// the node's payload disagrees with the registered type kind
    #[error("type `{ty}` is {expected}, node carries {found}")]
    ShapeMismatch {
        ty: String,
        expected: &'static str,
        found: &'static str,
    },

    /// a stream cursor lies past the content or inside a UTF-8 sequence
    #[error("cursor {cursor} is invalid for stream of length {len}")]
    InvalidCursor { cursor: usize, len: usize },

    /// the graph nests deeper than `Config::max_depth`
    #[error("graph nesting exceeds the maximum depth of {0}")]
    DepthExceeded(usize),

    /// JSON numbers cannot carry NaN or infinities
    #[error("float {0} has no JSON rendering")]
    NonFiniteFloat(f64),

    /// a discriminated node with a malformed payload
    #[error("invalid node at {path}: {reason}")]
    InvalidNode { path: String, reason: String },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
