//! The read pipeline: batched block refill, parallel inflate, in-order
//! consumption, and virtual-offset seek/tell.
//!
//! Compressed members are read sequentially from the underlying stream
//! into a fixed pool of blocks, then inflated concurrently by a pool of
//! worker threads. The fork-join barrier in [`Decoder::read_blocks`]
//! keeps consumption strictly in file order: bytes are handed out by
//! block index, never by inflate completion order.

use std::io::{Read, Seek, SeekFrom};
use std::mem;
use std::num::NonZero;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use libdeflater::Decompressor;

use crate::block::Block;
use crate::error::{BgzfError, Result};
use crate::frame;
use crate::virtual_offset::VirtualOffset;

// ============================================================================
// Inflate worker pool
// ============================================================================

/// A fixed pool of inflate workers, one codec context per worker.
///
/// Workers live for the life of the stream so their decompressor state is
/// reused across every batch. Jobs and results carry the block index so
/// a batch can be restored into its slots regardless of completion order.
struct InflatePool {
    job_tx: Option<Sender<(usize, Block)>>,
    result_rx: Receiver<(usize, Result<Block>)>,
    handles: Vec<JoinHandle<()>>,
}

impl InflatePool {
    fn new(worker_count: NonZero<usize>) -> Self {
        let count = worker_count.get();
        let (job_tx, job_rx) = bounded::<(usize, Block)>(count);
        let (result_tx, result_rx) = bounded(count);

        let handles = (0..count)
            .map(|_| {
                let rx = job_rx.clone();
                let tx = result_tx.clone();
                thread::spawn(move || {
                    let mut decompressor = Decompressor::new();
                    while let Ok((index, mut block)) = rx.recv() {
                        let result = block.inflate(&mut decompressor).map(|()| block);
                        if tx.send((index, result)).is_err() {
                            break;
                        }
                    }
                })
            })
            .collect();

        log::debug!("spawned {count} inflate workers");
        Self { job_tx: Some(job_tx), result_rx, handles }
    }

    /// Inflates every block in the batch, blocking until all complete.
    ///
    /// On a per-block failure the remaining results are still drained so
    /// the channels stay in lock-step, then the first error is returned.
    fn inflate_batch(&self, blocks: &mut [Block]) -> Result<()> {
        let Some(job_tx) = &self.job_tx else {
            return Err(BgzfError::StreamClosed);
        };

        for (index, slot) in blocks.iter_mut().enumerate() {
            job_tx.send((index, mem::take(slot))).map_err(|_| worker_exited())?;
        }

        let mut first_err = None;
        for _ in 0..blocks.len() {
            let (index, result) = self.result_rx.recv().map_err(|_| worker_exited())?;
            match result {
                Ok(block) => blocks[index] = block,
                Err(e) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }

        match first_err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    fn shutdown(&mut self) {
        self.job_tx = None;
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for InflatePool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_exited() -> BgzfError {
    BgzfError::Io(std::io::Error::other("inflate worker exited unexpectedly"))
}

// ============================================================================
// Decoder
// ============================================================================

/// The read half of a BGZF stream.
pub(crate) struct Decoder<R> {
    inner: R,
    /// Byte position in the underlying stream (start of the next member).
    pos: u64,
    /// Fixed pool of blocks, refilled in batches of up to `blocks.len()`.
    blocks: Vec<Block>,
    /// Number of blocks holding data from the current batch.
    batch: usize,
    /// Index of the block currently being consumed.
    block_index: usize,
    /// Underlying stream exhausted.
    reached_eof: bool,
    /// The most recently framed member was the 28-byte EOF marker.
    eof_marker_seen: bool,
    /// Underlying EOF arrived without the trailing EOF marker. Raised
    /// once the buffered readahead is drained.
    truncated: bool,
    /// Latched after an unrecoverable data error.
    failed: bool,
    pool: InflatePool,
}

impl<R: Read + Seek> Decoder<R> {
    pub fn new(inner: R, worker_count: NonZero<usize>) -> Self {
        Self {
            inner,
            pos: 0,
            blocks: (0..worker_count.get()).map(|_| Block::new()).collect(),
            batch: 0,
            block_index: 0,
            reached_eof: false,
            eof_marker_seen: false,
            truncated: false,
            failed: false,
            pool: InflatePool::new(worker_count),
        }
    }

    fn guard(&self) -> Result<()> {
        if self.failed {
            Err(BgzfError::StreamFailed)
        } else {
            Ok(())
        }
    }

    /// Refills the block pool from the current underlying position and
    /// inflates the batch in parallel.
    ///
    /// EOF-marker members are recognized on their raw bytes and skipped
    /// without occupying a slot; they are legal mid-stream in
    /// concatenated files. Hitting underlying EOF when the most recent
    /// member was not the marker records a pending truncation, but the
    /// complete blocks already framed are still inflated and committed
    /// so the valid prefix stays readable.
    fn read_blocks(&mut self) -> Result<()> {
        let result = self.fill_and_inflate();
        if let Err(e) = &result {
            if !matches!(e, BgzfError::Io(_)) {
                self.failed = true;
            }
        }
        result
    }

    fn fill_and_inflate(&mut self) -> Result<()> {
        self.batch = 0;
        self.block_index = 0;

        let mut filled = 0;
        while filled < self.blocks.len() && !self.reached_eof {
            let file_offset = self.pos;
            let block = &mut self.blocks[filled];
            match frame::read_frame(&mut self.inner, &mut block.cdata)? {
                None => {
                    self.reached_eof = true;
                    if !self.eof_marker_seen {
                        self.truncated = true;
                    }
                }
                Some(info) => {
                    self.pos += info.block_size as u64;
                    if frame::is_eof_marker(&block.cdata) {
                        self.eof_marker_seen = true;
                    } else {
                        self.eof_marker_seen = false;
                        block.prepare(file_offset, info.header_len);
                        filled += 1;
                    }
                }
            }
        }

        self.batch = filled;
        if filled > 0 {
            self.pool.inflate_batch(&mut self.blocks[..filled])?;
            log::trace!("inflated batch of {filled} blocks");
        }
        Ok(())
    }

    /// Advances past consumed blocks, refilling as needed, and returns
    /// the index of a block with unread data, or `None` at clean EOF.
    ///
    /// When the input ended without the EOF marker, the error is raised
    /// here, after the readahead up through the last full block has been
    /// drained, never instead of it.
    fn ensure_buffered_data(&mut self) -> Result<Option<usize>> {
        loop {
            while self.block_index < self.batch {
                if self.blocks[self.block_index].remaining() > 0 {
                    return Ok(Some(self.block_index));
                }
                self.block_index += 1;
            }
            if self.reached_eof {
                if self.truncated {
                    return Err(BgzfError::TruncatedFile);
                }
                return Ok(None);
            }
            self.read_blocks()?;
        }
    }

    /// Refill attempt at a block boundary. A pending truncation is left
    /// for the next data request rather than failing bytes already
    /// delivered to the caller.
    fn refresh_at_boundary(&mut self) -> Result<()> {
        match self.ensure_buffered_data() {
            Ok(_) | Err(BgzfError::TruncatedFile) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.guard()?;
        let Some(index) = self.ensure_buffered_data()? else {
            return Err(BgzfError::UnexpectedEof);
        };
        let block = &mut self.blocks[index];
        let byte = block.udata[block.offset()];
        block.advance(1);
        if block.remaining() == 0 {
            // Keeps eof() and virtual_offset() correct at block boundaries.
            self.refresh_at_boundary()?;
        }
        Ok(byte)
    }

    pub fn read_exact(&mut self, dst: &mut [u8]) -> Result<()> {
        self.guard()?;
        let mut filled = 0;
        while filled < dst.len() {
            let Some(index) = self.ensure_buffered_data()? else {
                return Err(BgzfError::UnexpectedEof);
            };
            let block = &mut self.blocks[index];
            let offset = block.offset();
            let n = (dst.len() - filled).min(block.remaining());
            dst[filled..filled + n].copy_from_slice(&block.udata[offset..offset + n]);
            block.advance(n);
            filled += n;
            if block.remaining() == 0 {
                self.refresh_at_boundary()?;
            }
        }
        Ok(())
    }

    /// `io::Read`-shaped read: copies from the current block only and
    /// returns `Ok(0)` at EOF.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.guard()?;
        if buf.is_empty() {
            return Ok(0);
        }
        let Some(index) = self.ensure_buffered_data()? else {
            return Ok(0);
        };
        let block = &mut self.blocks[index];
        let offset = block.offset();
        let n = buf.len().min(block.remaining());
        buf[..n].copy_from_slice(&block.udata[offset..offset + n]);
        block.advance(n);
        if block.remaining() == 0 {
            self.refresh_at_boundary()?;
        }
        Ok(n)
    }

    pub fn eof(&mut self) -> Result<bool> {
        self.guard()?;
        Ok(self.ensure_buffered_data()?.is_none())
    }

    /// The virtual offset of the next byte to be read.
    pub fn virtual_offset(&self) -> VirtualOffset {
        if self.block_index < self.batch {
            self.blocks[self.block_index].voffset
        } else {
            VirtualOffset::new(self.pos, 0)
        }
    }

    /// Repositions the stream at a virtual offset previously returned by
    /// [`Self::virtual_offset`].
    pub fn seek(&mut self, voffset: VirtualOffset) -> Result<()> {
        self.guard()?;
        self.inner.seek(SeekFrom::Start(voffset.file_offset()))?;
        self.pos = voffset.file_offset();
        self.reached_eof = false;
        self.eof_marker_seen = false;
        self.truncated = false;
        self.read_blocks()?;

        if self.batch == 0 {
            // Seek landed on the EOF marker; only offset zero is valid there.
            if voffset.block_offset() != 0 {
                return Err(BgzfError::InvalidInBlockOffset {
                    offset: voffset.block_offset(),
                    size: 0,
                });
            }
            return Ok(());
        }

        let size = self.blocks[0].size;
        if usize::from(voffset.block_offset()) >= size {
            return Err(BgzfError::InvalidInBlockOffset { offset: voffset.block_offset(), size });
        }
        self.blocks[0].voffset = voffset;
        self.block_index = 0;
        Ok(())
    }

    /// Releases the worker pool and hands back the underlying stream.
    pub fn into_inner(self) -> R {
        self.inner
    }
}
