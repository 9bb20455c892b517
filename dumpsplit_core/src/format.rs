/// Start-of-block marker of a bzip2 stream: the 48-bit constant
/// `0x314159265359`, which happens to spell `"1AY&SY"`.
pub const BLOCK_MARKER: &[u8; 6] = b"1AY&SY";

/// End-of-stream magic `0x177245385090`.
pub const FOOTER_MAGIC: &[u8; 6] = b"\x17\x72\x45\x38\x50\x90";

/// Size of the byte-aligned end-of-stream trailer: footer magic followed by
/// the 4-byte big-endian combined stream CRC.
///   magic[6] + crc:u32 = 10
pub const TRAILER_SIZE: u64 = 10;

/// Bytes of big-endian block CRC that follow every block marker.
pub const BLOCK_CRC_SIZE: usize = 4;

/// Default read size used while hunting for block markers.
pub const DEFAULT_SCAN_CHUNK: usize = 4096;

// ── Split planning ─────────────────────────────────────────────────────────

/// The last piece of a split must be at least this large (bytes of
/// compressed input) unless the file itself is small.
pub const MIN_TAIL_MARGIN: u64 = 25_000_000;

/// Width of the zero-padded page ids in standard dump filenames.
pub const PAGE_ID_WIDTH: usize = 9;

// ── Page boundary resolution ───────────────────────────────────────────────

/// Upper bound on decompressed bytes examined when looking for the first
/// page after an offset.
pub const DEFAULT_RESOLVE_WINDOW: usize = 8 * 1024 * 1024;

/// Lines after the `<page>` line that may hold the page's `<id>`.
pub const PAGE_ID_LOOKAHEAD_LINES: usize = 5;

/// Fold one block CRC into the running stream CRC.
///
/// Rotates the running value left by one bit and xors in the block CRC,
/// which is how a bzip2 encoder derives the CRC stored in the stream trailer.
pub fn combine_crc(cumulative: u32, block_crc: u32) -> u32 {
    ((cumulative << 1) | (cumulative >> 31)) ^ block_crc
}

/// Fold an ordered sequence of block CRCs, starting from zero.
pub fn chain_crcs<I: IntoIterator<Item = u32>>(crcs: I) -> u32 {
    crcs.into_iter().fold(0, combine_crc)
}
