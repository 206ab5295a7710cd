//! BGZF block framing: header parsing, header emission, and the EOF marker.
//!
//! # Block layout
//!
//! A BGZF block is a gzip member with a mandatory extra subfield:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │ Header (18 bytes when emitted; parsed headers may carry more)   │
//! │  - Magic: 0x1f 0x8b (gzip)                                      │
//! │  - Method: 0x08 (deflate)                                       │
//! │  - Flags: 0x04 (FEXTRA)                                         │
//! │  - MTIME, XFL, OS: 6 bytes                                      │
//! │  - XLEN: 2 bytes                                                │
//! │  - Subfield: "BC" + len(2) + BSIZE(2)                           │
//! │    where BSIZE = total_block_size - 1                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ Compressed data (raw deflate)                                   │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ Footer (8 bytes)                                                │
//! │  - CRC32: 4 bytes                                               │
//! │  - ISIZE: 4 bytes (uncompressed size mod 2^32)                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Parsing tolerates arbitrary `XLEN` and unknown extra subfields in any
//! order, as produced by other BGZF writers. Emission always uses the
//! fixed 18-byte prologue with the `BC` subfield first and alone.

use std::io::{self, Read};

use crate::error::{BgzfError, Result};

/// Maximum size of a BGZF block on disk, and of its decompressed payload
/// plus one.
pub const BGZF_MAX_BLOCK_SIZE: usize = 65536;

/// Write-mode payload limit. The 256-byte margin guarantees that deflate
/// output plus header and footer fits in [`BGZF_MAX_BLOCK_SIZE`] even for
/// incompressible input.
pub const BGZF_SAFE_BLOCK_SIZE: usize = BGZF_MAX_BLOCK_SIZE - 256;

/// Size of the BGZF block header this crate emits.
pub(crate) const BGZF_HEADER_SIZE: usize = 18;

/// Size of the BGZF block footer (CRC32 + ISIZE).
pub(crate) const BGZF_FOOTER_SIZE: usize = 8;

/// Length of the fixed gzip prologue through XLEN.
const GZIP_FIXED_LEN: usize = 12;

/// BGZF EOF marker block (empty block signaling intentional end of file).
pub const BGZF_EOF: [u8; 28] = [
    0x1f, 0x8b, 0x08, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0x06, 0x00, 0x42, 0x43, 0x02, 0x00,
    0x1b, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Geometry of one parsed block.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameInfo {
    /// Total on-disk size of the block (BSIZE + 1).
    pub block_size: usize,
    /// Bytes of header preceding the deflate stream (12 + XLEN).
    pub header_len: usize,
}

/// Reads one complete raw BGZF block into `buf`.
///
/// On success `buf` holds the entire member (header + deflate + footer)
/// and the returned [`FrameInfo`] records its geometry. Returns
/// `Ok(None)` on clean EOF at the first header byte; EOF anywhere later
/// inside the member is reported as [`BgzfError::TruncatedFile`].
pub(crate) fn read_frame<R: Read + ?Sized>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> Result<Option<FrameInfo>> {
    let mut fixed = [0u8; GZIP_FIXED_LEN];
    match reader.read_exact(&mut fixed) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    if fixed[0] != 0x1f || fixed[1] != 0x8b {
        return Err(BgzfError::InvalidMagic(fixed[0], fixed[1]));
    }
    if fixed[2] != 0x08 {
        return Err(BgzfError::InvalidMethod(fixed[2]));
    }
    if fixed[3] & 0x04 == 0 {
        return Err(BgzfError::MissingExtraFlag(fixed[3]));
    }

    let xlen = u16::from_le_bytes([fixed[10], fixed[11]]) as usize;
    let header_len = GZIP_FIXED_LEN + xlen;

    buf.clear();
    buf.resize(header_len, 0);
    buf[..GZIP_FIXED_LEN].copy_from_slice(&fixed);
    reader.read_exact(&mut buf[GZIP_FIXED_LEN..]).map_err(map_mid_block_eof)?;

    let bsize = find_bsize(&buf[GZIP_FIXED_LEN..])?;
    let block_size = bsize as usize + 1;
    if block_size < header_len + BGZF_FOOTER_SIZE {
        return Err(BgzfError::BlockTooSmall(block_size));
    }

    buf.resize(block_size, 0);
    reader.read_exact(&mut buf[header_len..]).map_err(map_mid_block_eof)?;

    Ok(Some(FrameInfo { block_size, header_len }))
}

/// Scans the gzip extra field for the `BC` marker subfield and returns
/// its BSIZE payload. Unknown subfields are skipped.
fn find_bsize(extra: &[u8]) -> Result<u16> {
    let mut pos = 0;
    while pos + 4 <= extra.len() {
        let slen = u16::from_le_bytes([extra[pos + 2], extra[pos + 3]]) as usize;
        if extra[pos] == b'B' && extra[pos + 1] == b'C' {
            if slen != 2 || pos + 6 > extra.len() {
                return Err(BgzfError::BadSubfieldLength(slen));
            }
            return Ok(u16::from_le_bytes([extra[pos + 4], extra[pos + 5]]));
        }
        pos += 4 + slen;
    }
    Err(BgzfError::MissingBsize)
}

fn map_mid_block_eof(e: io::Error) -> BgzfError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        BgzfError::TruncatedFile
    } else {
        BgzfError::Io(e)
    }
}

/// Writes the fixed 18-byte prologue into `buf` with BSIZE backpatched
/// from the final block size.
pub(crate) fn put_header(buf: &mut [u8], block_size: usize) {
    debug_assert!(block_size <= BGZF_MAX_BLOCK_SIZE);
    buf[..16].copy_from_slice(&[
        0x1f, 0x8b, 0x08, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0x06, 0x00, 0x42, 0x43, 0x02,
        0x00,
    ]);
    buf[16..BGZF_HEADER_SIZE].copy_from_slice(&((block_size - 1) as u16).to_le_bytes());
}

/// Checks whether a raw as-read block is the EOF marker.
///
/// The comparison is over the on-disk bytes: the marker's decompressed
/// payload is empty and would match any other empty block.
pub(crate) fn is_eof_marker(raw: &[u8]) -> bool {
    raw == BGZF_EOF
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_eof_marker_block() {
        let mut reader = Cursor::new(BGZF_EOF.to_vec());
        let mut buf = Vec::new();
        let info = read_frame(&mut reader, &mut buf).unwrap().unwrap();
        assert_eq!(info.block_size, 28);
        assert_eq!(info.header_len, 18);
        assert!(is_eof_marker(&buf));
    }

    #[test]
    fn test_clean_eof_returns_none() {
        let mut reader = Cursor::new(Vec::<u8>::new());
        let mut buf = Vec::new();
        assert!(read_frame(&mut reader, &mut buf).unwrap().is_none());
    }

    #[test]
    fn test_mid_block_eof_is_truncation() {
        // Chop the EOF marker after its header.
        let mut reader = Cursor::new(BGZF_EOF[..20].to_vec());
        let mut buf = Vec::new();
        let err = read_frame(&mut reader, &mut buf).unwrap_err();
        assert!(matches!(err, BgzfError::TruncatedFile));
    }

    #[test]
    fn test_reject_bad_magic() {
        let mut data = BGZF_EOF.to_vec();
        data[0] = 0x00;
        let err = read_frame(&mut Cursor::new(data), &mut Vec::new()).unwrap_err();
        assert!(matches!(err, BgzfError::InvalidMagic(0x00, 0x8b)));

        let mut data = BGZF_EOF.to_vec();
        data[1] = 0x00;
        let err = read_frame(&mut Cursor::new(data), &mut Vec::new()).unwrap_err();
        assert!(matches!(err, BgzfError::InvalidMagic(0x1f, 0x00)));
    }

    #[test]
    fn test_reject_bad_method() {
        let mut data = BGZF_EOF.to_vec();
        data[2] = 0x09;
        let err = read_frame(&mut Cursor::new(data), &mut Vec::new()).unwrap_err();
        assert!(matches!(err, BgzfError::InvalidMethod(0x09)));
    }

    #[test]
    fn test_reject_missing_fextra() {
        let mut data = BGZF_EOF.to_vec();
        data[3] &= !0x04;
        let err = read_frame(&mut Cursor::new(data), &mut Vec::new()).unwrap_err();
        assert!(matches!(err, BgzfError::MissingExtraFlag(0x00)));
    }

    #[test]
    fn test_reject_bad_subfield_length() {
        let mut data = BGZF_EOF.to_vec();
        data[14] = 3; // SLEN of the BC subfield
        let err = read_frame(&mut Cursor::new(data), &mut Vec::new()).unwrap_err();
        assert!(matches!(err, BgzfError::BadSubfieldLength(3)));
    }

    #[test]
    fn test_reject_missing_bc_subfield() {
        let mut data = BGZF_EOF.to_vec();
        data[12] = b'X'; // SI1 of the BC subfield
        let err = read_frame(&mut Cursor::new(data), &mut Vec::new()).unwrap_err();
        assert!(matches!(err, BgzfError::MissingBsize));
    }

    #[test]
    fn test_reject_undersized_bsize() {
        let mut data = BGZF_EOF.to_vec();
        data[16] = 0;
        data[17] = 0;
        let err = read_frame(&mut Cursor::new(data), &mut Vec::new()).unwrap_err();
        assert!(matches!(err, BgzfError::BlockTooSmall(1)));
    }

    #[test]
    fn test_accepts_foreign_subfield_before_bc() {
        // Extra field: 4-byte unknown subfield "XY", then the BC subfield.
        let mut block = Vec::new();
        block.extend_from_slice(&[0x1f, 0x8b, 0x08, 0x04, 0, 0, 0, 0, 0, 0xff]);
        let xlen = 8 + 6u16; // unknown subfield (4 + 4) + BC subfield (6)
        block.extend_from_slice(&xlen.to_le_bytes());
        block.extend_from_slice(&[b'X', b'Y', 4, 0, 1, 2, 3, 4]);
        block.extend_from_slice(&[b'B', b'C', 2, 0]);
        let header_len = 12 + xlen as usize;
        let block_size = header_len + 2 + BGZF_FOOTER_SIZE; // deflate "\x03\x00" + footer
        block.extend_from_slice(&((block_size - 1) as u16).to_le_bytes());
        block.extend_from_slice(&[0x03, 0x00]); // empty deflate stream
        block.extend_from_slice(&[0; 8]); // CRC32 = 0, ISIZE = 0

        let mut buf = Vec::new();
        let info = read_frame(&mut Cursor::new(block), &mut buf).unwrap().unwrap();
        assert_eq!(info.block_size, block_size);
        assert_eq!(info.header_len, header_len);
        assert!(!is_eof_marker(&buf));
    }

    #[test]
    fn test_put_header_matches_eof_prologue() {
        let mut buf = [0u8; BGZF_HEADER_SIZE];
        put_header(&mut buf, 28);
        assert_eq!(buf, BGZF_EOF[..BGZF_HEADER_SIZE]);
    }
}
