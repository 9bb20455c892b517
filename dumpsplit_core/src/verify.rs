//! Checks that a dump file holds the page range its name claims.
//!
//! The first page comes from the content itself. The last page is found
//! indirectly: the last revision id in the file is mapped to its page through
//! the site's metadata API, since the final pages of a file are often deleted
//! ones whose ids never show up in the content.

use std::io::{self, BufRead, Read};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::filename::{assemble_name, FilenameMetadata};
use crate::resolver::{first_page_id, Decompressor};

/// Finds the id of the last revision stored in a dump file.
pub trait LastRevisionSource {
    fn last_revision_id(&self, file: &Path) -> Result<Option<u64>>;
}

/// Maps a revision id to the id of the page it belongs to.
pub trait PageLookup {
    fn page_for_revision(&self, host: &str, revision_id: u64) -> Result<Option<u64>>;
}

/// Host name from the `<base>https://host/wiki/...</base>` line of the
/// siteinfo header.
pub fn site_host<R: BufRead + ?Sized>(reader: &mut R, window: usize) -> io::Result<Option<String>> {
    let mut limited = reader.take(window as u64);
    let mut line = Vec::new();
    loop {
        line.clear();
        if limited.read_until(b'\n', &mut line)? == 0 {
            return Ok(None);
        }
        let text = String::from_utf8_lossy(&line);
        let text = text.trim();
        if !text.contains("<base>") {
            continue;
        }
        let url = text
            .strip_prefix("<base>")
            .and_then(|t| t.strip_suffix("</base>"));
        return Ok(url.and_then(|u| u.split('/').nth(2)).map(str::to_string));
    }
}

/// What a file claims and what it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeCheck {
    pub file: PathBuf,
    pub claimed: FilenameMetadata,
    pub first_has: Option<u64>,
    pub last_has: Option<u64>,
}

impl RangeCheck {
    pub fn is_ok(&self) -> bool {
        let same =
            |claim: &str, has: Option<u64>| has.map(|h| h.to_string()).as_deref() == Some(claim);
        same(&self.claimed.first_page, self.first_has)
            && same(&self.claimed.last_page, self.last_has)
    }

    /// Path the file should have been given, when both ends are known.
    pub fn corrected_path(&self) -> Option<PathBuf> {
        let (first, last) = (self.first_has?, self.last_has?);
        let name = assemble_name(
            &self.claimed.base_name,
            &first.to_string(),
            &last.to_string(),
            &self.claimed.ext,
        );
        Some(self.file.with_file_name(name))
    }

    /// One line in the style of the report: `OK <file>` or
    /// `BAD <file> first_claimed/has: .. .. last_claimed/has: .. ..`.
    pub fn summary(&self) -> String {
        if self.is_ok() {
            return format!("OK {}", self.file.display());
        }
        let show = |v: Option<u64>| v.map_or_else(|| "None".to_string(), |v| v.to_string());
        format!(
            "BAD {} first_claimed/has: {} {} last_claimed/has: {} {}",
            self.file.display(),
            self.claimed.first_page,
            show(self.first_has),
            self.claimed.last_page,
            show(self.last_has)
        )
    }
}

/// Window used when reading the start of a file for its first page and host.
const HEADER_WINDOW: usize = 1024 * 1024;

pub struct RangeChecker<D, L, P> {
    decompressor: D,
    last_revision: L,
    lookup: P,
}

impl<D, L, P> RangeChecker<D, L, P>
where
    D: Decompressor,
    L: LastRevisionSource,
    P: PageLookup,
{
    pub fn new(decompressor: D, last_revision: L, lookup: P) -> Self {
        Self {
            decompressor,
            last_revision,
            lookup,
        }
    }

    pub fn check(&self, file: &Path) -> Result<RangeCheck> {
        let claimed = FilenameMetadata::parse(file)?;

        let first_has = {
            let mut stream = self.decompressor.open_at(file, 0)?;
            first_page_id(&mut *stream, HEADER_WINDOW)?
        };

        let last_has = match self.last_revision.last_revision_id(file)? {
            Some(rev_id) => {
                let mut stream = self.decompressor.open_at(file, 0)?;
                match site_host(&mut *stream, HEADER_WINDOW)? {
                    Some(host) => self.lookup.page_for_revision(&host, rev_id)?,
                    None => None,
                }
            }
            None => None,
        };

        Ok(RangeCheck {
            file: file.to_path_buf(),
            claimed,
            first_has,
            last_has,
        })
    }
}

/// `*.bz2` meta-history files in `dir`, sorted.
pub fn content_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.ends_with(".bz2") && name.contains("meta-history") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
