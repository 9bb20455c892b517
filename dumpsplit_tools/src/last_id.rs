use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use dumpsplit_core::verify::LastRevisionSource;
use dumpsplit_core::DumpError;
use tracing::warn;

/// Last revision id via `getlastidinbz2xml -f <file> -t rev`, which prints
/// `rev_id:<n>`.
pub struct LastIdTool {
    tool: PathBuf,
}

impl LastIdTool {
    pub fn new(tool: impl Into<PathBuf>) -> Self {
        Self { tool: tool.into() }
    }
}

/// Parse the helper's `rev_id:<n>` output line.
pub fn parse_last_id_output(output: &str) -> Option<u64> {
    output.trim().strip_prefix("rev_id:")?.trim().parse().ok()
}

impl LastRevisionSource for LastIdTool {
    fn last_revision_id(&self, file: &Path) -> dumpsplit_core::Result<Option<u64>> {
        let output = Command::new(&self.tool)
            .arg("-f")
            .arg(file)
            .arg("-t")
            .arg("rev")
            .stdin(Stdio::null())
            .output()
            .map_err(|e| DumpError::Tool {
                tool: self.tool.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            warn!(
                file = %file.display(),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "failed to get last revision id"
            );
            return Ok(None);
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let id = parse_last_id_output(&stdout);
        if id.is_none() {
            warn!(file = %file.display(), output = %stdout.trim(), "unexpected last id output");
        }
        Ok(id)
    }
}
