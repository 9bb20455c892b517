use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::error::{DumpError, Result};
use crate::format::{
    combine_crc, BLOCK_CRC_SIZE, BLOCK_MARKER, DEFAULT_SCAN_CHUNK, FOOTER_MAGIC, TRAILER_SIZE,
};

/// One byte-aligned block found in a compressed stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CompressedBlock {
    /// Byte offset of the first byte of the block marker.
    pub offset: u64,
    /// CRC stored right after the marker.
    pub block_crc: u32,
    /// Stream CRC folded over this block and every block before it.
    pub cumulative_crc: u32,
}

/// Streaming scanner for byte-aligned bzip2 block markers.
///
/// # Scan sequence
/// 1. Read the stream in `chunk_size` pieces, keeping the tail of the
///    previous piece as lookback so a marker cut in two by a read is still
///    seen.
/// 2. For every marker hit, the absolute offset is the buffer's file position
///    plus the hit index; the 4 bytes after the marker are the block CRC.
/// 3. Scanning resumes right after the CRC bytes.
///
/// Blocks that do not start on a byte boundary are invisible to this scanner;
/// nothing here decompresses anything.
pub struct BlockScanner<R> {
    inner: R,
    chunk_size: usize,
    /// Lookback followed by the most recently read chunk.
    buf: Vec<u8>,
    /// File position of `buf[0]`.
    buf_start: u64,
    /// Index in `buf` where the next marker search starts.
    scan_from: usize,
    cumulative: u32,
    eof: bool,
    failed: bool,
}

impl BlockScanner<BufReader<File>> {
    /// Open `path` for scanning.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: Read + Seek> BlockScanner<R> {
    pub fn new(inner: R) -> Self {
        Self::with_chunk_size(inner, DEFAULT_SCAN_CHUNK)
    }

    /// Scanner reading `chunk_size` bytes at a time. Sizes smaller than the
    /// marker are bumped up to the marker length.
    pub fn with_chunk_size(inner: R, chunk_size: usize) -> Self {
        Self {
            inner,
            chunk_size: chunk_size.max(BLOCK_MARKER.len()),
            buf: Vec::with_capacity(chunk_size + BLOCK_MARKER.len()),
            buf_start: 0,
            scan_from: 0,
            cumulative: 0,
            eof: false,
            failed: false,
        }
    }

    /// Restart the scan from the beginning of the stream.
    pub fn rewind(&mut self) -> io::Result<()> {
        self.inner.seek(SeekFrom::Start(0))?;
        self.buf.clear();
        self.buf_start = 0;
        self.scan_from = 0;
        self.cumulative = 0;
        self.eof = false;
        self.failed = false;
        Ok(())
    }

    /// Stream CRC folded over every block returned so far.
    pub fn cumulative_crc(&self) -> u32 {
        self.cumulative
    }

    /// Read the CRC recorded in the stream trailer, if the trailer is
    /// byte aligned and intact. The scan position is left untouched.
    pub fn file_crc(&mut self) -> io::Result<Option<u32>> {
        let resume_at = self.buf_start + self.buf.len() as u64;
        let crc = read_trailer_crc(&mut self.inner);
        self.inner.seek(SeekFrom::Start(resume_at))?;
        crc
    }

    /// Append one chunk to the buffer. Returns the number of bytes added.
    fn fill(&mut self) -> io::Result<usize> {
        let old_len = self.buf.len();
        self.buf.resize(old_len + self.chunk_size, 0);
        let n = loop {
            match self.inner.read(&mut self.buf[old_len..]) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.buf.truncate(old_len);
                    return Err(e);
                }
            }
        };
        self.buf.truncate(old_len + n);
        if n == 0 {
            self.eof = true;
        }
        Ok(n)
    }

    /// Drop everything that can no longer hold the start of a marker.
    fn compact(&mut self) {
        let lookback = BLOCK_MARKER.len() - 1;
        let keep_from = self.buf.len().saturating_sub(lookback).max(self.scan_from);
        let keep_from = keep_from.min(self.buf.len());
        self.buf.drain(..keep_from);
        self.buf_start += keep_from as u64;
        self.scan_from = 0;
    }

    fn next_block(&mut self) -> io::Result<Option<CompressedBlock>> {
        loop {
            let hit = self.buf[self.scan_from.min(self.buf.len())..]
                .windows(BLOCK_MARKER.len())
                .position(|w| w == BLOCK_MARKER)
                .map(|pos| self.scan_from + pos);

            if let Some(idx) = hit {
                let crc_at = idx + BLOCK_MARKER.len();
                while self.buf.len() < crc_at + BLOCK_CRC_SIZE && !self.eof {
                    self.fill()?;
                }
                if self.buf.len() < crc_at + BLOCK_CRC_SIZE {
                    // marker at the very end with no room for a CRC
                    debug!(offset = self.buf_start + idx as u64, "truncated block header");
                    self.scan_from = self.buf.len();
                    return Ok(None);
                }
                let mut crc_bytes = [0u8; BLOCK_CRC_SIZE];
                crc_bytes.copy_from_slice(&self.buf[crc_at..crc_at + BLOCK_CRC_SIZE]);
                let block_crc = u32::from_be_bytes(crc_bytes);
                self.cumulative = combine_crc(self.cumulative, block_crc);
                self.scan_from = crc_at + BLOCK_CRC_SIZE;
                return Ok(Some(CompressedBlock {
                    offset: self.buf_start + idx as u64,
                    block_crc,
                    cumulative_crc: self.cumulative,
                }));
            }

            if self.eof {
                return Ok(None);
            }
            self.compact();
            self.fill()?;
        }
    }
}

impl<R: Read + Seek> Iterator for BlockScanner<R> {
    type Item = io::Result<CompressedBlock>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_block() {
            Ok(block) => block.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Read the combined stream CRC from the 10-byte trailer at the end of `r`.
///
/// Returns `Ok(None)` when the stream is too short or the footer magic is not
/// where a byte-aligned trailer would put it.
pub fn read_trailer_crc<R: Read + Seek>(r: &mut R) -> io::Result<Option<u32>> {
    let len = r.seek(SeekFrom::End(0))?;
    if len < TRAILER_SIZE {
        return Ok(None);
    }
    r.seek(SeekFrom::Start(len - TRAILER_SIZE))?;
    let mut trailer = [0u8; TRAILER_SIZE as usize];
    r.read_exact(&mut trailer)?;
    if &trailer[..FOOTER_MAGIC.len()] != FOOTER_MAGIC {
        return Ok(None);
    }
    let mut crc_bytes = [0u8; 4];
    crc_bytes.copy_from_slice(&trailer[FOOTER_MAGIC.len()..]);
    Ok(Some(u32::from_be_bytes(crc_bytes)))
}

/// Result of scanning a whole file.
#[derive(Debug, Clone, Serialize)]
pub struct CrcReport {
    pub blocks: Vec<CompressedBlock>,
    /// CRC folded over all blocks found.
    pub computed_crc: u32,
    /// CRC recorded in the trailer; `None` when the trailer is missing,
    /// short or not byte aligned.
    pub file_crc: Option<u32>,
}

impl CrcReport {
    /// Scan every block of `r` and read its trailer.
    pub fn from_reader<R: Read + Seek>(r: R) -> Result<Self> {
        let mut scanner = BlockScanner::new(r);
        let blocks = scanner.by_ref().collect::<io::Result<Vec<_>>>()?;
        let computed_crc = scanner.cumulative_crc();
        let file_crc = scanner.file_crc()?;
        Ok(Self {
            blocks,
            computed_crc,
            file_crc,
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    /// True when the trailer CRC is present and matches the computed one.
    pub fn is_consistent(&self) -> bool {
        self.file_crc == Some(self.computed_crc)
    }
}

/// Fold a text listing of block CRCs into cumulative values.
///
/// Each entry looks like `offset:65258451445 CRC:0x3000ea37`. Blank lines,
/// `#` comments, and lines whose fields carry other labels are skipped.
pub fn fold_crc_listing<R: BufRead>(r: R) -> Result<Vec<CompressedBlock>> {
    let mut cumulative = 0u32;
    let mut blocks = Vec::new();
    for (lineno, line) in r.lines().enumerate() {
        let line = line?;
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (Some(offset_field), Some(crc_field)) = (fields.next(), fields.next()) else {
            continue;
        };
        if !offset_field.starts_with("offset") || !crc_field.starts_with("CRC") {
            continue;
        }
        let bad_line = || {
            DumpError::Format(format!("bad CRC listing entry at line {}: {line}", lineno + 1))
        };
        let offset_text = offset_field.split_once(':').ok_or_else(bad_line)?.1;
        let crc_text = crc_field.split_once(':').ok_or_else(bad_line)?.1;
        let offset: u64 = offset_text.parse().map_err(|_| bad_line())?;
        let hex = crc_text
            .strip_prefix("0x")
            .or_else(|| crc_text.strip_prefix("0X"))
            .unwrap_or(crc_text);
        let block_crc = u32::from_str_radix(hex, 16).map_err(|_| bad_line())?;
        cumulative = combine_crc(cumulative, block_crc);
        blocks.push(CompressedBlock {
            offset,
            block_crc,
            cumulative_crc: cumulative,
        });
    }
    Ok(blocks)
}
