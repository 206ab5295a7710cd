//! A single BGZF block: one compressed/decompressed buffer pair.

use libdeflater::Decompressor;

use crate::error::{BgzfError, Result};
use crate::frame::{BGZF_FOOTER_SIZE, BGZF_MAX_BLOCK_SIZE};
use crate::virtual_offset::VirtualOffset;

/// One unit of work for the read and write pipelines.
///
/// A block owns the raw on-disk member bytes (`cdata`), the decompressed
/// payload buffer (`udata`), and its position state: `voffset` packs the
/// member's file offset with the cursor of the next byte to read or
/// write, and `size` is the length of valid data in `udata` (read mode)
/// or the staging capacity (write mode).
///
/// Blocks are allocated once per stream and reused; [`Default`] produces
/// the allocation-free placeholder left behind while a block is on loan
/// to an inflate worker.
#[derive(Debug, Default)]
pub(crate) struct Block {
    /// Raw member bytes: header + deflate stream + footer.
    pub cdata: Vec<u8>,
    /// Decompressed payload buffer, always `BGZF_MAX_BLOCK_SIZE` long.
    pub udata: Vec<u8>,
    /// Bytes of header preceding the deflate stream in `cdata`.
    pub header_len: usize,
    /// File offset of the member's first byte + consumption cursor.
    pub voffset: VirtualOffset,
    /// Valid decompressed bytes (read) or staging capacity (write).
    pub size: usize,
}

impl Block {
    /// Allocates both buffers at full block capacity.
    pub fn new() -> Self {
        Self {
            cdata: Vec::with_capacity(BGZF_MAX_BLOCK_SIZE),
            udata: vec![0; BGZF_MAX_BLOCK_SIZE],
            header_len: 0,
            voffset: VirtualOffset::default(),
            size: 0,
        }
    }

    /// Rebinds the block to a freshly framed member at `file_offset`.
    pub fn prepare(&mut self, file_offset: u64, header_len: usize) {
        self.header_len = header_len;
        self.voffset = VirtualOffset::new(file_offset, 0);
        self.size = 0;
    }

    /// The consumption cursor within the decompressed payload.
    pub fn offset(&self) -> usize {
        usize::from(self.voffset.block_offset())
    }

    /// Unread (or unstaged) bytes left in this block.
    pub fn remaining(&self) -> usize {
        self.size - self.offset()
    }

    /// Advances the cursor by `n` bytes, staying within this block.
    pub fn advance(&mut self, n: usize) {
        debug_assert!(self.offset() + n <= BGZF_MAX_BLOCK_SIZE);
        self.voffset = self.voffset + n as u16;
    }

    /// Inflates `cdata` into `udata`, verifying ISIZE and CRC32.
    ///
    /// Runs on an inflate worker with that worker's reusable codec
    /// context. On success `size` holds the decompressed length, which is
    /// strictly less than [`BGZF_MAX_BLOCK_SIZE`].
    pub fn inflate(&mut self, decompressor: &mut Decompressor) -> Result<()> {
        let len = self.cdata.len();
        let isize = u32::from_le_bytes([
            self.cdata[len - 4],
            self.cdata[len - 3],
            self.cdata[len - 2],
            self.cdata[len - 1],
        ]);
        let crc = u32::from_le_bytes([
            self.cdata[len - 8],
            self.cdata[len - 7],
            self.cdata[len - 6],
            self.cdata[len - 5],
        ]);
        if isize as usize >= BGZF_MAX_BLOCK_SIZE {
            return Err(BgzfError::InvalidIsize(isize));
        }

        let compressed = &self.cdata[self.header_len..len - BGZF_FOOTER_SIZE];
        let expected = isize as usize;
        let found = decompressor
            .deflate_decompress(compressed, &mut self.udata[..expected])
            .map_err(BgzfError::Inflate)?;
        if found != expected {
            return Err(BgzfError::SizeMismatch { expected, found });
        }

        let computed = crc32fast::hash(&self.udata[..found]);
        if computed != crc {
            return Err(BgzfError::Crc32Mismatch { expected: crc, found: computed });
        }

        self.size = found;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{put_header, BGZF_EOF, BGZF_HEADER_SIZE};
    use libdeflater::{CompressionLvl, Compressor};

    /// Builds a complete BGZF member around `payload`.
    fn make_block(payload: &[u8]) -> Vec<u8> {
        let mut compressor = Compressor::new(CompressionLvl::default());
        let mut deflate = vec![0; BGZF_MAX_BLOCK_SIZE];
        let n = compressor.deflate_compress(payload, &mut deflate).unwrap();
        deflate.truncate(n);

        let block_size = BGZF_HEADER_SIZE + n + BGZF_FOOTER_SIZE;
        let mut raw = vec![0; BGZF_HEADER_SIZE];
        put_header(&mut raw, block_size);
        raw.extend_from_slice(&deflate);
        raw.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
        raw.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        raw
    }

    fn framed(raw: Vec<u8>) -> Block {
        let mut block = Block::new();
        block.prepare(0, BGZF_HEADER_SIZE);
        block.cdata = raw;
        block
    }

    #[test]
    fn test_inflate_round_trip() {
        let payload = b"The quick brown fox jumps over the lazy dog";
        let mut block = framed(make_block(payload));
        block.inflate(&mut Decompressor::new()).unwrap();
        assert_eq!(block.size, payload.len());
        assert_eq!(&block.udata[..block.size], payload);
        assert_eq!(block.remaining(), payload.len());
    }

    #[test]
    fn test_inflate_empty_member() {
        let mut block = framed(BGZF_EOF.to_vec());
        block.inflate(&mut Decompressor::new()).unwrap();
        assert_eq!(block.size, 0);
        assert_eq!(block.remaining(), 0);
    }

    #[test]
    fn test_inflate_detects_crc_mismatch() {
        let mut raw = make_block(b"checksummed payload");
        let len = raw.len();
        raw[len - 8] ^= 0xff; // corrupt the recorded CRC32
        let err = framed(raw).inflate(&mut Decompressor::new()).unwrap_err();
        assert!(matches!(err, BgzfError::Crc32Mismatch { .. }));
    }

    #[test]
    fn test_inflate_detects_isize_mismatch() {
        let mut raw = make_block(b"sized payload");
        let len = raw.len();
        raw[len - 4] += 1; // claim one more byte than the stream holds
        let err = framed(raw).inflate(&mut Decompressor::new()).unwrap_err();
        assert!(matches!(
            err,
            BgzfError::SizeMismatch { .. } | BgzfError::Inflate(_)
        ));
    }

    #[test]
    fn test_inflate_rejects_oversized_isize() {
        let mut raw = make_block(b"payload");
        let len = raw.len();
        raw[len - 4..].copy_from_slice(&65536u32.to_le_bytes());
        let err = framed(raw).inflate(&mut Decompressor::new()).unwrap_err();
        assert!(matches!(err, BgzfError::InvalidIsize(65536)));
    }

    #[test]
    fn test_cursor_advances_within_block() {
        let mut block = framed(make_block(b"abcdef"));
        block.inflate(&mut Decompressor::new()).unwrap();
        block.advance(4);
        assert_eq!(block.offset(), 4);
        assert_eq!(block.remaining(), 2);
        assert_eq!(block.voffset.file_offset(), 0);
    }
}
