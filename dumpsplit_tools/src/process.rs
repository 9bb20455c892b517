use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

use dumpsplit_core::{Decompressor, DumpError};
use tracing::debug;

/// Decompressor backed by an external `tool <file> <offset>` process, such
/// as `dumpbz2filefromoffset`.
pub struct ProcessDecompressor {
    tool: PathBuf,
}

impl ProcessDecompressor {
    pub fn new(tool: impl Into<PathBuf>) -> Self {
        Self { tool: tool.into() }
    }
}

impl Decompressor for ProcessDecompressor {
    fn open_at(&self, file: &Path, offset: u64) -> dumpsplit_core::Result<Box<dyn BufRead>> {
        debug!(
            tool = %self.tool.display(),
            file = %file.display(),
            offset,
            "starting decompressor"
        );
        let mut child = Command::new(&self.tool)
            .arg(file)
            .arg(offset.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| DumpError::Tool {
                tool: self.tool.clone(),
                message: e.to_string(),
            })?;
        let stdout = child.stdout.take().ok_or_else(|| DumpError::Tool {
            tool: self.tool.clone(),
            message: "stdout was not captured".to_string(),
        })?;
        Ok(Box::new(ChildReader {
            child,
            stdout: BufReader::new(stdout),
        }))
    }
}

/// Buffered stdout of a child process. Dropping it kills the child, since
/// callers read only a small window of an otherwise huge stream.
pub struct ChildReader {
    child: Child,
    stdout: BufReader<ChildStdout>,
}

impl Read for ChildReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stdout.read(buf)
    }
}

impl BufRead for ChildReader {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.stdout.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.stdout.consume(amt)
    }
}

impl Drop for ChildReader {
    fn drop(&mut self) {
        // already-exited children make kill() fail; that is fine
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
