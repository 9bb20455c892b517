use std::path::{Path, PathBuf};

use crate::error::{DumpError, Result};
use crate::format::PAGE_ID_WIDTH;

/// Page range and naming fields carried by a standard dump filename such as
/// `enwiki-20170201-pages-meta-history9.xml-p001888020p001938728.bz2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenameMetadata {
    /// Everything before `.xml-p`, e.g. `enwiki-20170201-pages-meta-history9`.
    pub base_name: String,
    /// First page id, without zero padding.
    pub first_page: String,
    /// Last page id, without zero padding.
    pub last_page: String,
    /// Final extension, e.g. `bz2`.
    pub ext: String,
}

impl FilenameMetadata {
    /// Parse the file name component of `path`.
    pub fn parse(path: impl AsRef<Path>) -> Result<Self> {
        let name = file_name(path.as_ref())?;
        let bad = || {
            DumpError::planning(format!(
                "{name} does not look like base.xml-p<first>p<last>.<ext>"
            ))
        };

        let (base_name, rest) = name.rsplit_once(".xml-p").ok_or_else(bad)?;
        let (range, _) = rest.split_once('.').ok_or_else(bad)?;
        let (first, last) = range.split_once('p').ok_or_else(bad)?;
        let ext = name.rsplit('.').next().ok_or_else(bad)?;
        if !is_page_id(first) || !is_page_id(last) || base_name.is_empty() {
            return Err(bad());
        }

        Ok(Self {
            base_name: base_name.to_string(),
            first_page: strip_zeros(first),
            last_page: strip_zeros(last),
            ext: ext.to_string(),
        })
    }

    /// Rebuild the standard filename with zero-padded page ids.
    pub fn to_file_name(&self) -> String {
        assemble_name(&self.base_name, &self.first_page, &self.last_page, &self.ext)
    }
}

/// `base.xml-p<first>p<last>.<ext>` with both ids padded to nine digits.
pub fn assemble_name(base_name: &str, first_page: &str, last_page: &str, ext: &str) -> String {
    format!(
        "{base_name}.xml-p{first_page:0>width$}p{last_page:0>width$}.{ext}",
        width = PAGE_ID_WIDTH
    )
}

/// Last page id from any dot-separated field that starts with `xml-p`, so
/// names with trailing junk (`...p1p9.bz2.partial`) still work.
pub fn last_page_from_name(path: impl AsRef<Path>) -> Option<u64> {
    let name = path.as_ref().file_name()?.to_str()?;
    name.split('.')
        .filter(|field| field.starts_with("xml-p"))
        .filter_map(|field| field.rsplit('p').next())
        .filter_map(|id| id.parse().ok())
        .last()
}

fn file_name(path: &Path) -> Result<&str> {
    path.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| DumpError::planning(format!("{} has no usable file name", path.display())))
}

fn is_page_id(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn strip_zeros(s: &str) -> String {
    let trimmed = s.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

// ── Output names ───────────────────────────────────────────────────────────

/// Name pattern for the pieces of one input file: the input name with its
/// page range replaced (or added) as `xml-p<start>p<end>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTemplate {
    prefix: String,
    ext: String,
}

impl OutputTemplate {
    /// Derive the template from an input path.
    ///
    /// - `stuff.xml-p1p99.bz2` → `stuff.xml-p{start}p{end}.bz2`
    /// - `stuff.xml.bz2`       → `stuff.xml-p{start}p{end}.bz2`
    /// - `stuff.bz2`           → `stuff.xml-p{start}p{end}.bz2`
    pub fn for_input(path: impl AsRef<Path>) -> Result<Self> {
        let name = file_name(path.as_ref())?;
        if !name.ends_with("bz2") {
            return Err(DumpError::planning(format!(
                "{name} does not end in bz2, cannot name output files"
            )));
        }

        let (prefix, ext) = if name.contains(".xml-") {
            let mut parts = name.rsplitn(3, '.');
            let ext = parts.next().unwrap_or_default();
            let _range = parts.next();
            let base = parts.next().unwrap_or_default();
            (format!("{base}.xml-"), ext)
        } else if let Some(base) = name.strip_suffix(".bz2").filter(|b| b.ends_with(".xml")) {
            (format!("{base}-"), "bz2")
        } else {
            let (base, ext) = name.rsplit_once('.').unwrap_or((name, "bz2"));
            (format!("{base}.xml-"), ext)
        };

        Ok(Self {
            prefix,
            ext: ext.to_string(),
        })
    }

    pub fn render(&self, start: u64, end: u64) -> String {
        format!("{}p{start}p{end}.{}", self.prefix, self.ext)
    }
}

// ── Command-line values ────────────────────────────────────────────────────

/// An input file, optionally followed by `:<last page id>` for names that do
/// not carry a page range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSpec {
    pub path: PathBuf,
    pub last_page: Option<u64>,
}

impl FileSpec {
    pub fn parse(spec: &str) -> Result<Self> {
        match spec.split_once(':') {
            Some((path, last)) => {
                if !is_page_id(last) {
                    return Err(DumpError::planning(format!("bad files option supplied: {spec}")));
                }
                let last_page = last
                    .parse()
                    .map_err(|_| DumpError::planning(format!("page id out of range: {last}")))?;
                Ok(Self {
                    path: PathBuf::from(path),
                    last_page: Some(last_page),
                })
            }
            None => Ok(Self {
                path: PathBuf::from(spec),
                last_page: None,
            }),
        }
    }

    /// Parse a comma-separated list of specs.
    pub fn parse_list(list: &str) -> Result<Vec<Self>> {
        list.split(',')
            .filter(|s| !s.is_empty())
            .map(Self::parse)
            .collect()
    }

    /// The explicit last page, else the one in the filename.
    pub fn resolve_last_page(&self) -> Result<u64> {
        self.last_page
            .or_else(|| last_page_from_name(&self.path))
            .ok_or_else(|| {
                DumpError::planning(format!(
                    "failed to get last page from filename {}; is it a valid name?",
                    self.path.display()
                ))
            })
    }
}

/// Parse a byte count with an optional decimal `K`, `M` or `G` suffix.
pub fn parse_size(text: &str) -> Result<u64> {
    let bad = || {
        DumpError::planning(format!(
            "size must be a number or a number followed by K, M, G: {text}"
        ))
    };
    let (digits, multiplier) = match text.as_bytes().last() {
        Some(b'K') => (&text[..text.len() - 1], 1_000),
        Some(b'M') => (&text[..text.len() - 1], 1_000_000),
        Some(b'G') => (&text[..text.len() - 1], 1_000_000_000),
        _ => (text, 1),
    };
    if !is_page_id(digits) {
        return Err(bad());
    }
    let n: u64 = digits.parse().map_err(|_| bad())?;
    n.checked_mul(multiplier).ok_or_else(bad)
}
