use std::collections::BTreeMap;
use std::io::{self, BufRead, Read};
use std::path::Path;
use std::sync::OnceLock;

use regex::bytes::Regex;
use tracing::debug;

use crate::error::Result;
use crate::format::{DEFAULT_RESOLVE_WINDOW, PAGE_ID_LOOKAHEAD_LINES};

/// Source of decompressed dump content.
///
/// Implementations start at the first compressed block found at or after
/// `offset` and yield decompressed bytes from there on. The stream may begin
/// in the middle of a line or even a multibyte character.
pub trait Decompressor {
    fn open_at(&self, file: &Path, offset: u64) -> Result<Box<dyn BufRead>>;
}

impl<D: Decompressor + ?Sized> Decompressor for &D {
    fn open_at(&self, file: &Path, offset: u64) -> Result<Box<dyn BufRead>> {
        (**self).open_at(file, offset)
    }
}

fn page_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<page>.*?<id>([0-9]+)</id>").expect("page id pattern is valid")
    })
}

/// Find the id of the first `<page>` in at most `window` bytes of `reader`.
///
/// Works on raw bytes: the `<page>` line and the few lines after it are
/// searched for `<id>N</id>`. A page whose id is not within those lines, or
/// no page inside the window, gives `None`.
pub fn first_page_id<R: BufRead + ?Sized>(
    reader: &mut R,
    window: usize,
) -> io::Result<Option<u64>> {
    let mut limited = reader.take(window as u64);
    let mut line = Vec::new();
    let mut header: Option<Vec<u8>> = None;
    let mut extra_lines = 0usize;

    loop {
        line.clear();
        if limited.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        match header.as_mut() {
            Some(h) => {
                h.extend_from_slice(&line);
                extra_lines += 1;
                if extra_lines >= PAGE_ID_LOOKAHEAD_LINES {
                    break;
                }
            }
            None if contains(&line, b"<page>") => header = Some(line.clone()),
            None => {}
        }
    }

    let Some(header) = header else {
        return Ok(None);
    };
    let id = page_id_regex()
        .captures(&header)
        .and_then(|caps| caps.get(1))
        .and_then(|m| std::str::from_utf8(m.as_bytes()).ok())
        .and_then(|s| s.parse().ok());
    Ok(id)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Maps compressed-file offsets to the first page that starts after them.
pub struct PageBoundaryResolver<D> {
    decompressor: D,
    window: usize,
}

impl<D: Decompressor> PageBoundaryResolver<D> {
    pub fn new(decompressor: D) -> Self {
        Self {
            decompressor,
            window: DEFAULT_RESOLVE_WINDOW,
        }
    }

    /// Limit the decompressed bytes examined per offset.
    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    /// First page id after `offset` in `file`, if one shows up in the window.
    pub fn resolve(&self, file: &Path, offset: u64) -> Result<Option<u64>> {
        let mut stream = self.decompressor.open_at(file, offset)?;
        let id = first_page_id(&mut *stream, self.window)?;
        debug!(file = %file.display(), offset, page_id = ?id, "resolved first page id");
        Ok(id)
    }

    /// Resolve every offset in ascending order. Offsets with no page id are
    /// left out of the map.
    pub fn resolve_all(&self, file: &Path, offsets: &[u64]) -> Result<BTreeMap<u64, u64>> {
        let mut sorted = offsets.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mut resolved = BTreeMap::new();
        for offset in sorted {
            match self.resolve(file, offset)? {
                Some(page_id) => {
                    resolved.insert(offset, page_id);
                }
                None => debug!(
                    file = %file.display(),
                    offset,
                    "no page id after offset, dropping it"
                ),
            }
        }
        Ok(resolved)
    }
}
