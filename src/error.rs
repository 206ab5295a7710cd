//! Error types for BGZF stream operations.

use std::io;

use thiserror::Error;

/// Result type alias for BGZF stream operations.
pub type Result<T> = std::result::Result<T, BgzfError>;

/// Error type for BGZF stream operations.
///
/// Variants fall into two groups: data errors raised while decoding
/// untrusted input (framing, checksum, and codec failures, truncation),
/// and usage errors raised when a caller violates the stream contract
/// (wrong mode, closed stream, out-of-range seek target).
#[derive(Error, Debug)]
pub enum BgzfError {
    /// An error from the underlying byte stream, propagated unchanged.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    // Usage errors
    /// Unrecognized mode string passed to `open`.
    #[error("invalid open mode {0:?} (expected \"r\", \"w\", or \"a\")")]
    InvalidMode(String),

    /// The stream has already been closed.
    #[error("stream is closed")]
    StreamClosed,

    /// The stream hit an unrecoverable data error earlier; all further
    /// operations fail.
    #[error("stream disabled by a previous unrecoverable error")]
    StreamFailed,

    /// Read requested on a write-mode stream.
    #[error("stream is not open for reading")]
    NotReadable,

    /// Write requested on a read-mode stream.
    #[error("stream is not open for writing")]
    NotWritable,

    /// Seek requested on a write-mode stream.
    #[error("seeking is only supported in read mode")]
    NotSeekable,

    /// Seek target points past the end of its block's decompressed data.
    #[error("invalid in-block offset {offset}: block has {size} bytes")]
    InvalidInBlockOffset {
        /// The within-block offset of the seek target.
        offset: u16,
        /// The decompressed size of the block at the target file offset.
        size: usize,
    },

    // Framing errors
    /// The gzip magic bytes did not match.
    #[error("invalid gzip magic: expected 0x1f 0x8b, got 0x{0:02x} 0x{1:02x}")]
    InvalidMagic(u8, u8),

    /// The gzip compression method was not DEFLATE.
    #[error("unsupported compression method: 0x{0:02x} (only DEFLATE/0x08)")]
    InvalidMethod(u8),

    /// The gzip FLG byte is missing the FEXTRA bit required by BGZF.
    #[error("missing FEXTRA flag: FLG=0x{0:02x}")]
    MissingExtraFlag(u8),

    /// The BGZF marker subfield carried the wrong payload length.
    #[error("invalid BGZF subfield length: expected 2, got {0}")]
    BadSubfieldLength(usize),

    /// No BGZF marker subfield was present in the gzip extra field.
    #[error("gzip extra field is missing the BGZF BSIZE subfield")]
    MissingBsize,

    /// BSIZE names a block too small to hold its own header and footer.
    #[error("BGZF block too small: {0} bytes")]
    BlockTooSmall(usize),

    /// ISIZE claims more decompressed data than a BGZF block may hold.
    #[error("invalid ISIZE {0}: BGZF blocks decompress to fewer than 65536 bytes")]
    InvalidIsize(u32),

    // Data errors
    /// The input ended without the canonical 28-byte EOF marker block.
    #[error("truncated BGZF stream: missing EOF marker block")]
    TruncatedFile,

    /// The input ended before the requested number of bytes was read.
    #[error("unexpected end of file")]
    UnexpectedEof,

    /// The DEFLATE stream inside a block failed to decompress.
    #[error("block decompression failed: {0:?}")]
    Inflate(libdeflater::DecompressionError),

    /// The decompressed payload did not match its recorded CRC32.
    #[error("CRC32 mismatch: expected 0x{expected:08x}, got 0x{found:08x}")]
    Crc32Mismatch {
        /// CRC32 recorded in the block footer.
        expected: u32,
        /// CRC32 computed over the decompressed payload.
        found: u32,
    },

    /// The decompressed payload did not match the recorded ISIZE.
    #[error("decompressed size mismatch: expected {expected} bytes, got {found}")]
    SizeMismatch {
        /// ISIZE recorded in the block footer.
        expected: usize,
        /// Number of bytes actually produced by inflate.
        found: usize,
    },

    /// Deflate output would not fit in a single 64 KiB BGZF block.
    #[error("deflate output exceeds the maximum BGZF block size")]
    BlockTooLarge,
}

impl From<BgzfError> for io::Error {
    fn from(e: BgzfError) -> Self {
        match e {
            BgzfError::Io(inner) => inner,
            BgzfError::UnexpectedEof => io::Error::new(io::ErrorKind::UnexpectedEof, e),
            BgzfError::InvalidMode(_)
            | BgzfError::StreamClosed
            | BgzfError::StreamFailed
            | BgzfError::NotReadable
            | BgzfError::NotWritable
            | BgzfError::NotSeekable
            | BgzfError::InvalidInBlockOffset { .. } => {
                io::Error::new(io::ErrorKind::InvalidInput, e)
            }
            _ => io::Error::new(io::ErrorKind::InvalidData, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framing_error_messages() {
        let msg = format!("{}", BgzfError::InvalidMagic(0x00, 0x8b));
        assert!(msg.contains("0x00 0x8b"));

        let msg = format!("{}", BgzfError::MissingExtraFlag(0x00));
        assert!(msg.contains("FLG=0x00"));

        let msg = format!("{}", BgzfError::Crc32Mismatch { expected: 0xdead_beef, found: 1 });
        assert!(msg.contains("0xdeadbeef"));
    }

    #[test]
    fn test_io_error_kinds() {
        let e: io::Error = BgzfError::UnexpectedEof.into();
        assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof);

        let e: io::Error = BgzfError::NotWritable.into();
        assert_eq!(e.kind(), io::ErrorKind::InvalidInput);

        let e: io::Error = BgzfError::TruncatedFile.into();
        assert_eq!(e.kind(), io::ErrorKind::InvalidData);

        let inner = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        let e: io::Error = BgzfError::Io(inner).into();
        assert_eq!(e.kind(), io::ErrorKind::PermissionDenied);
    }
}
