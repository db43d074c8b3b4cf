use thiserror::Error;

/// Structural failures raised while decoding a wire payload.
///
/// Any of these aborts the whole parse: no partial `RenderRequest` is ever
/// returned, and the error propagates to the caller that produced the
/// payload.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("truncated payload: `{kind}` entry needs {needed} more word(s) at word offset {offset}")]
    Truncated {
        kind: &'static str,
        needed: usize,
        offset: usize,
    },
    #[error("unknown entry tag {tag} at word offset {offset}")]
    UnknownTag { tag: u8, offset: usize },
    #[error("string cache miss for index {index}")]
    StringCacheMiss { index: u32 },
    #[error("style table miss for index {index}")]
    StyleTableMiss { index: u32 },
    #[error("attached value index {index} out of range (table holds {len})")]
    AttachedIndexOutOfRange { index: u32, len: usize },
    #[error("unknown animation curve value {value}")]
    UnknownAnimationCurve { value: u32 },
    #[error("attached value {index} is not callable")]
    NotCallable { index: u32 },
}

pub type DecodeResult<T> = Result<T, DecodeError>;
