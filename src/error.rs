use thiserror::Error;

/// Errors from the fallible boundaries of the core.
///
/// Expected numerical degeneracies (rounding at canvas edges, zero-length
/// curve segments) are clamped or ignored at the point of use and never
/// surface here.
#[derive(Debug, Error)]
pub enum Error {
    /// Serialized tile data was produced with a different tile size.
    #[error("tile size incompatible: expected {expected}, found {found}")]
    TileSizeIncompatible { expected: u32, found: u32 },

    /// A tile pixel buffer has the wrong number of samples.
    #[error("tile data has {found} samples, expected {expected}")]
    TileDataSize { expected: usize, found: usize },

    /// A flat texture allocation would exceed the canvas size limit.
    #[error("texture {width}x{height} exceeds the size limit")]
    TextureTooLarge { width: u32, height: u32 },
}
