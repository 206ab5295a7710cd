#![deny(unsafe_code)]

//! Streaming codec for BGZF (Blocked GZip Format), the block-compressed
//! container behind BAM, BCF, and tabix-indexed files.
//!
//! BGZF concatenates independent gzip members of at most 64 KiB
//! decompressed, each carrying its own on-disk size in a `BC` extra
//! subfield. That framing is what makes random access possible: a
//! [`VirtualOffset`] packs the file offset of a block with a byte index
//! into its decompressed payload, and [`Stream::seek`] jumps straight to
//! it without touching the bytes in between.
//!
//! - [`stream`] - Byte-oriented [`Stream`] facade, open modes, [`Builder`]
//! - [`virtual_offset`] - The 64-bit [`VirtualOffset`] locator
//! - [`error`] - [`BgzfError`] and the crate [`Result`] alias
//!
//! Read mode inflates batches of blocks in parallel across a pool of
//! worker threads (defaulting to the available parallelism) while
//! consumption stays strictly in file order. Write mode stages payload
//! into bounded blocks, deflates with `libdeflater`, and terminates the
//! file with the canonical 28-byte EOF marker block that readers use to
//! distinguish intentional end-of-file from truncation.
//!
//! # Example
//!
//! ```
//! use std::io::Cursor;
//!
//! use bgzf_stream::Stream;
//!
//! # fn main() -> bgzf_stream::Result<()> {
//! let mut writer = Stream::open_write(Cursor::new(Vec::new()));
//! writer.write_all(b"hello, blocked gzip")?;
//! let compressed = writer.close()?.into_inner();
//!
//! let mut reader = Stream::open_read(Cursor::new(compressed));
//! let mut text = vec![0; 19];
//! reader.read_exact(&mut text)?;
//! assert_eq!(&text, b"hello, blocked gzip");
//! assert!(reader.eof()?);
//! # Ok(())
//! # }
//! ```

mod block;
mod decoder;
mod encoder;
mod frame;

pub mod error;
pub mod stream;
pub mod virtual_offset;

pub use error::{BgzfError, Result};
pub use frame::{BGZF_EOF, BGZF_MAX_BLOCK_SIZE, BGZF_SAFE_BLOCK_SIZE};
pub use stream::{Builder, Stream};
pub use virtual_offset::VirtualOffset;

// Re-exported so callers can configure `Builder::set_compression_level`
// without depending on libdeflater directly.
pub use libdeflater::CompressionLvl;
