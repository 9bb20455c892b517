mod api;
mod last_id;
mod process;

pub use api::{page_id_from_response, ApiPageLookup};
pub use last_id::{parse_last_id_output, LastIdTool};
pub use process::{ChildReader, ProcessDecompressor};

use std::path::PathBuf;

/// Default location of the last-id helper.
pub const DEFAULT_LAST_ID_TOOL: &str = "/usr/local/bin/getlastidinbz2xml";

/// Build the page-range checker wired to the real helpers.
///
/// Used by the CLI `check-range` command; tests substitute their own
/// collaborators through `RangeChecker::new`.
pub fn range_checker(
    decompress_tool: PathBuf,
    last_id_tool: PathBuf,
) -> anyhow::Result<dumpsplit_core::RangeChecker<ProcessDecompressor, LastIdTool, ApiPageLookup>> {
    Ok(dumpsplit_core::RangeChecker::new(
        ProcessDecompressor::new(decompress_tool),
        LastIdTool::new(last_id_tool),
        ApiPageLookup::new()?,
    ))
}
