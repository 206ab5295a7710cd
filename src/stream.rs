//! The byte-oriented stream facade over the read and write pipelines.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::mem;
use std::num::NonZero;
use std::path::Path;
use std::thread;

use libdeflater::CompressionLvl;

use crate::decoder::Decoder;
use crate::encoder::Encoder;
use crate::error::{BgzfError, Result};
use crate::frame::BGZF_EOF;
use crate::virtual_offset::VirtualOffset;

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`Stream`] with configurable options.
///
/// Worker count applies to read mode (parallel block inflate);
/// compression level applies to write mode.
#[derive(Debug, Clone)]
pub struct Builder {
    worker_count: NonZero<usize>,
    compression_level: CompressionLvl,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            worker_count: thread::available_parallelism().unwrap_or(NonZero::<usize>::MIN),
            compression_level: CompressionLvl::default(),
        }
    }
}

impl Builder {
    /// Creates a builder with default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of inflate worker threads for read mode.
    #[must_use]
    pub fn set_worker_count(mut self, count: NonZero<usize>) -> Self {
        self.worker_count = count;
        self
    }

    /// Sets the compression level for write mode.
    #[must_use]
    pub fn set_compression_level(mut self, level: CompressionLvl) -> Self {
        self.compression_level = level;
        self
    }

    /// Opens a read-mode stream over `inner`.
    pub fn open_read<S: Read + Write + Seek>(self, inner: S) -> Stream<S> {
        Stream { state: State::Read(Decoder::new(inner, self.worker_count)) }
    }

    /// Opens a write-mode stream over `inner`.
    pub fn open_write<S: Read + Write + Seek>(self, inner: S) -> Stream<S> {
        Stream { state: State::Write(Encoder::new(inner, self.compression_level)) }
    }

    /// Opens a file-backed stream in mode `"r"`, `"w"`, or `"a"`.
    ///
    /// Append mode strips a pre-existing trailing EOF marker so the
    /// rewritten marker lands once at the new end of file. Appending to a
    /// file without the marker (for example one left behind by a crashed
    /// writer) is allowed but logged.
    pub fn open<P: AsRef<Path>>(self, path: P, mode: &str) -> Result<Stream<File>> {
        match mode {
            "r" => Ok(self.open_read(File::open(&path)?)),
            "w" => Ok(self.open_write(File::create(&path)?)),
            "a" => {
                let mut file =
                    OpenOptions::new().read(true).write(true).create(true).open(&path)?;
                let len = file.metadata()?.len();
                let start = if len >= BGZF_EOF.len() as u64 {
                    file.seek(SeekFrom::End(-(BGZF_EOF.len() as i64)))?;
                    let mut tail = [0u8; 28];
                    file.read_exact(&mut tail)?;
                    if tail == BGZF_EOF {
                        let stripped = len - BGZF_EOF.len() as u64;
                        file.set_len(stripped)?;
                        stripped
                    } else {
                        log::warn!("appending to a BGZF file without an EOF marker");
                        len
                    }
                } else {
                    if len > 0 {
                        log::warn!("appending to a BGZF file without an EOF marker");
                    }
                    len
                };
                file.seek(SeekFrom::Start(start))?;
                Ok(Stream {
                    state: State::Write(Encoder::with_position(
                        file,
                        self.compression_level,
                        start,
                    )),
                })
            }
            other => Err(BgzfError::InvalidMode(other.to_string())),
        }
    }
}

// ============================================================================
// Stream
// ============================================================================

enum State<S> {
    Read(Decoder<S>),
    Write(Encoder<S>),
    Closed,
}

/// A BGZF stream over an underlying seekable byte stream.
///
/// A stream is opened in read or write mode and stays open until the
/// single [`close`](Stream::close) call. Read mode decompresses blocks in
/// parallel and supports [`seek`](Stream::seek) to any
/// [`VirtualOffset`] previously observed via
/// [`virtual_offset`](Stream::virtual_offset); write mode stages payload
/// into 64 KiB-bounded blocks and appends the EOF marker block on close.
///
/// The stream is not thread-safe for concurrent callers; wrap it in a
/// mutex if it must be shared.
pub struct Stream<S: Read + Write + Seek> {
    state: State<S>,
}

impl<S: Read + Write + Seek> std::fmt::Debug for Stream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match self.state {
            State::Read(_) => "Read",
            State::Write(_) => "Write",
            State::Closed => "Closed",
        };
        f.debug_struct("Stream").field("state", &mode).finish()
    }
}

impl<S: Read + Write + Seek> Stream<S> {
    /// Opens a read-mode stream with default options.
    pub fn open_read(inner: S) -> Self {
        Builder::default().open_read(inner)
    }

    /// Opens a write-mode stream with default options.
    pub fn open_write(inner: S) -> Self {
        Builder::default().open_write(inner)
    }

    /// Whether the stream has not yet been closed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !matches!(self.state, State::Closed)
    }

    /// Reads one decompressed byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        match &mut self.state {
            State::Read(decoder) => decoder.read_u8(),
            State::Write(_) => Err(BgzfError::NotReadable),
            State::Closed => Err(BgzfError::StreamClosed),
        }
    }

    /// Fills `dst` with decompressed bytes, failing on early EOF.
    pub fn read_exact(&mut self, dst: &mut [u8]) -> Result<()> {
        match &mut self.state {
            State::Read(decoder) => decoder.read_exact(dst),
            State::Write(_) => Err(BgzfError::NotReadable),
            State::Closed => Err(BgzfError::StreamClosed),
        }
    }

    /// Writes one byte into the active block.
    pub fn write_u8(&mut self, byte: u8) -> Result<()> {
        match &mut self.state {
            State::Write(encoder) => encoder.write_u8(byte),
            State::Read(_) => Err(BgzfError::NotWritable),
            State::Closed => Err(BgzfError::StreamClosed),
        }
    }

    /// Writes all of `src`, flushing blocks as they fill.
    pub fn write_all(&mut self, src: &[u8]) -> Result<()> {
        match &mut self.state {
            State::Write(encoder) => encoder.write_all(src),
            State::Read(_) => Err(BgzfError::NotWritable),
            State::Closed => Err(BgzfError::StreamClosed),
        }
    }

    /// Whether a read-mode stream is exhausted. Write-mode streams are
    /// always at EOF.
    pub fn eof(&mut self) -> Result<bool> {
        match &mut self.state {
            State::Read(decoder) => decoder.eof(),
            State::Write(_) => Ok(true),
            State::Closed => Err(BgzfError::StreamClosed),
        }
    }

    /// The virtual offset of the next byte to be read or written.
    pub fn virtual_offset(&self) -> Result<VirtualOffset> {
        match &self.state {
            State::Read(decoder) => Ok(decoder.virtual_offset()),
            State::Write(encoder) => Ok(encoder.virtual_offset()),
            State::Closed => Err(BgzfError::StreamClosed),
        }
    }

    /// Repositions a read-mode stream at `voffset`.
    pub fn seek(&mut self, voffset: VirtualOffset) -> Result<()> {
        match &mut self.state {
            State::Read(decoder) => decoder.seek(voffset),
            State::Write(_) => Err(BgzfError::NotSeekable),
            State::Closed => Err(BgzfError::StreamClosed),
        }
    }

    /// Flushes the underlying stream of a write-mode stream. The staged
    /// partial block is deliberately not flushed; close the stream for a
    /// durable end-of-data point.
    pub fn flush(&mut self) -> Result<()> {
        match &mut self.state {
            State::Write(encoder) => encoder.flush(),
            State::Read(_) => Err(BgzfError::NotWritable),
            State::Closed => Err(BgzfError::StreamClosed),
        }
    }

    /// Closes the stream and returns the underlying byte stream.
    ///
    /// In write mode this flushes the staged block, appends the EOF
    /// marker, and flushes the sink. Closing twice is an error.
    pub fn close(&mut self) -> Result<S> {
        match mem::replace(&mut self.state, State::Closed) {
            State::Read(decoder) => Ok(decoder.into_inner()),
            State::Write(encoder) => encoder.finish(),
            State::Closed => Err(BgzfError::StreamClosed),
        }
    }
}

impl Stream<File> {
    /// Opens a file at `path` in mode `"r"`, `"w"`, or `"a"` with default
    /// options.
    pub fn open<P: AsRef<Path>>(path: P, mode: &str) -> Result<Self> {
        Builder::default().open(path, mode)
    }
}

impl<S: Read + Write + Seek> Read for Stream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.state {
            State::Read(decoder) => decoder.read(buf).map_err(Into::into),
            State::Write(_) => Err(BgzfError::NotReadable.into()),
            State::Closed => Err(BgzfError::StreamClosed.into()),
        }
    }
}

impl<S: Read + Write + Seek> Write for Stream<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Stream::write_all(self, buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Stream::flush(self).map_err(Into::into)
    }
}

impl<S: Read + Write + Seek> Drop for Stream<S> {
    fn drop(&mut self) {
        if matches!(self.state, State::Write(_)) {
            let _ = self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn round_trip(payload: &[u8]) -> Vec<u8> {
        let mut writer = Stream::open_write(Cursor::new(Vec::new()));
        writer.write_all(payload).unwrap();
        writer.close().unwrap().into_inner()
    }

    #[test]
    fn test_mode_errors() {
        let mut writer = Stream::open_write(Cursor::new(Vec::new()));
        assert!(matches!(writer.read_u8().unwrap_err(), BgzfError::NotReadable));
        assert!(matches!(writer.seek(VirtualOffset::new(0, 0)).unwrap_err(), BgzfError::NotSeekable));
        assert!(writer.eof().unwrap());

        let bytes = writer.close().unwrap().into_inner();
        let mut reader = Stream::open_read(Cursor::new(bytes));
        assert!(matches!(reader.write_u8(0).unwrap_err(), BgzfError::NotWritable));
        assert!(matches!(reader.write_all(b"x").unwrap_err(), BgzfError::NotWritable));
        assert!(matches!(Stream::flush(&mut reader).unwrap_err(), BgzfError::NotWritable));
    }

    #[test]
    fn test_closed_stream_errors() {
        let mut writer = Stream::open_write(Cursor::new(Vec::new()));
        assert!(writer.is_open());
        writer.close().unwrap();
        assert!(!writer.is_open());
        assert!(matches!(writer.close().unwrap_err(), BgzfError::StreamClosed));
        assert!(matches!(writer.write_u8(0).unwrap_err(), BgzfError::StreamClosed));
        assert!(matches!(writer.eof().unwrap_err(), BgzfError::StreamClosed));
        assert!(matches!(writer.virtual_offset().unwrap_err(), BgzfError::StreamClosed));
    }

    #[test]
    fn test_drop_finishes_write_stream() {
        let mut buf = Vec::new();
        {
            let mut writer = Stream::open_write(Cursor::new(&mut buf));
            writer.write_all(b"dropped").unwrap();
            // No close; Drop appends the EOF marker.
        }
        assert!(buf.len() > BGZF_EOF.len());
        assert!(buf.ends_with(&BGZF_EOF));
    }

    #[test]
    fn test_io_trait_round_trip() {
        let data = round_trip(b"io trait bytes");
        let mut reader = Stream::open_read(Cursor::new(data));
        let mut out = Vec::new();
        io::Read::read_to_end(&mut reader, &mut out).unwrap();
        assert_eq!(out, b"io trait bytes");
    }

    #[test]
    fn test_invalid_mode_string() {
        let err = Stream::open("/nonexistent/path.gz", "x").unwrap_err();
        assert!(matches!(err, BgzfError::InvalidMode(m) if m == "x"));
    }
}
