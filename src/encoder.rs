//! The write pipeline: staged block deflate with a reserved header
//! prologue and the EOF sentinel block on close.

use std::io::Write;

use libdeflater::{CompressionLvl, Compressor};

use crate::block::Block;
use crate::error::{BgzfError, Result};
use crate::frame::{
    self, BGZF_EOF, BGZF_FOOTER_SIZE, BGZF_HEADER_SIZE, BGZF_MAX_BLOCK_SIZE, BGZF_SAFE_BLOCK_SIZE,
};
use crate::virtual_offset::VirtualOffset;

/// The write half of a BGZF stream.
///
/// A single active block stages up to [`BGZF_SAFE_BLOCK_SIZE`] bytes of
/// payload; when it fills, the payload is deflated into the compressed
/// buffer past a reserved 18-byte prologue, BSIZE is backpatched, and the
/// finished member is written out in one call. The underlying position is
/// tracked by counting written bytes, so the sink only needs [`Write`].
pub(crate) struct Encoder<W> {
    inner: W,
    compressor: Compressor,
    block: Block,
    /// Compressed bytes written so far (the underlying position).
    pos: u64,
}

impl<W: Write> Encoder<W> {
    pub fn new(inner: W, level: CompressionLvl) -> Self {
        Self::with_position(inner, level, 0)
    }

    /// Starts the encoder at a nonzero underlying position, as when
    /// appending to an existing file. Virtual offsets stay absolute.
    pub fn with_position(inner: W, level: CompressionLvl, pos: u64) -> Self {
        let mut block = Block::new();
        block.cdata.resize(BGZF_MAX_BLOCK_SIZE, 0);
        block.size = BGZF_SAFE_BLOCK_SIZE;
        block.voffset = VirtualOffset::new(pos, 0);
        Self { inner, compressor: Compressor::new(level), block, pos }
    }

    pub fn write_u8(&mut self, byte: u8) -> Result<()> {
        let offset = self.block.offset();
        self.block.udata[offset] = byte;
        self.block.advance(1);
        if self.block.remaining() == 0 {
            self.write_block()?;
        }
        Ok(())
    }

    pub fn write_all(&mut self, mut src: &[u8]) -> Result<()> {
        while !src.is_empty() {
            let offset = self.block.offset();
            let n = src.len().min(self.block.remaining());
            self.block.udata[offset..offset + n].copy_from_slice(&src[..n]);
            self.block.advance(n);
            src = &src[n..];
            if self.block.remaining() == 0 {
                self.write_block()?;
            }
        }
        Ok(())
    }

    /// Deflates the staged payload and writes one complete BGZF member.
    ///
    /// The compressed buffer keeps its first 18 bytes reserved so BSIZE
    /// can be backpatched without moving the deflate output. A payload
    /// within [`BGZF_SAFE_BLOCK_SIZE`] always fits; running out of output
    /// space means the caller bypassed the staging limit.
    fn write_block(&mut self) -> Result<()> {
        let len = self.block.offset();
        if len == 0 {
            return Ok(());
        }

        let (payload, out) = (&self.block.udata[..len], &mut self.block.cdata[..]);
        let deflate_cap = BGZF_MAX_BLOCK_SIZE - BGZF_HEADER_SIZE - BGZF_FOOTER_SIZE;
        let n = self
            .compressor
            .deflate_compress(payload, &mut out[BGZF_HEADER_SIZE..BGZF_HEADER_SIZE + deflate_cap])
            .map_err(|_| BgzfError::BlockTooLarge)?;

        let block_size = BGZF_HEADER_SIZE + n + BGZF_FOOTER_SIZE;
        frame::put_header(&mut out[..BGZF_HEADER_SIZE], block_size);
        let trailer_at = BGZF_HEADER_SIZE + n;
        out[trailer_at..trailer_at + 4].copy_from_slice(&crc32fast::hash(payload).to_le_bytes());
        out[trailer_at + 4..block_size].copy_from_slice(&(len as u32).to_le_bytes());

        self.inner.write_all(&self.block.cdata[..block_size])?;
        self.pos += block_size as u64;
        self.block.voffset = VirtualOffset::new(self.pos, 0);
        log::trace!("wrote block: {len} bytes in, {block_size} bytes out");
        Ok(())
    }

    /// Flushes the underlying stream only. The staged partial block stays
    /// buffered: flushing it early would emit an undersized block and
    /// change the virtual offsets of everything after it.
    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }

    /// The virtual offset of the next byte to be written.
    pub fn virtual_offset(&self) -> VirtualOffset {
        self.block.voffset
    }

    /// Flushes any staged payload, appends the EOF marker block, and
    /// returns the underlying stream.
    pub fn finish(mut self) -> Result<W> {
        self.write_block()?;
        self.inner.write_all(&BGZF_EOF)?;
        self.pos += BGZF_EOF.len() as u64;
        self.inner.flush()?;
        log::debug!("closed BGZF write stream at {} compressed bytes", self.pos);
        Ok(self.inner)
    }
}
