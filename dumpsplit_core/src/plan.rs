use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{DumpError, Result};
use crate::filename::{FileSpec, OutputTemplate};
use crate::planner::split_offsets;
use crate::resolver::{Decompressor, PageBoundaryResolver};

/// Lifecycle of one output piece. Moves forward only:
/// `Pending → Batched → Done | Failed`, or `Pending → Done` when the output
/// is already on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum JobStatus {
    Pending,
    Batched,
    Done,
    Failed,
}

/// One output piece of an input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardJob {
    pub input_file: PathBuf,
    /// Compressed offset the piece is decompressed from.
    pub offset: u64,
    /// First page written, inclusive.
    pub start_page: u64,
    /// Last page named in the output filename, inclusive. The page itself
    /// may not exist (deleted pages leave gaps).
    pub end_page: u64,
    pub output_path: PathBuf,
    status: JobStatus,
}

impl ShardJob {
    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// File name of the output piece.
    pub fn output_name(&self) -> String {
        self.output_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Output spec handed to the writer tool: `name:start:end`, where `end`
    /// is one past the last page. Downstream tooling depends on the
    /// exclusive end.
    pub fn writer_spec(&self) -> String {
        format!("{}:{}:{}", self.output_name(), self.start_page, self.end_page + 1)
    }

    /// Move to `next` if that is a forward step. Returns whether it moved.
    pub(crate) fn advance(&mut self, next: JobStatus) -> bool {
        let allowed = matches!(
            (self.status, next),
            (JobStatus::Pending, JobStatus::Batched)
                | (JobStatus::Pending, JobStatus::Done)
                | (JobStatus::Batched, JobStatus::Done)
                | (JobStatus::Batched, JobStatus::Failed)
        );
        if allowed {
            self.status = next;
        }
        allowed
    }
}

/// Everything known about splitting one input file.
#[derive(Debug, Clone)]
pub struct FileTodo {
    pub input_file: PathBuf,
    /// Last page of the final piece.
    pub last_page: u64,
    /// Candidate split offsets, ascending.
    pub offsets: Vec<u64>,
    /// First page id seen after each offset that resolved.
    pub first_pages: BTreeMap<u64, u64>,
    pub template: OutputTemplate,
    pub output_dir: PathBuf,
    pub jobs: Vec<ShardJob>,
}

impl FileTodo {
    pub fn new(
        input_file: impl Into<PathBuf>,
        last_page: u64,
        mut offsets: Vec<u64>,
        output_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let input_file = input_file.into();
        let template = OutputTemplate::for_input(&input_file)?;
        offsets.sort_unstable();
        offsets.dedup();
        Ok(Self {
            input_file,
            last_page,
            offsets,
            first_pages: BTreeMap::new(),
            template,
            output_dir: output_dir.into(),
            jobs: Vec::new(),
        })
    }

    /// Offsets and naming for `spec`, or `None` when the file is too small to
    /// be worth splitting.
    pub fn plan(spec: &FileSpec, shard_size: u64, output_dir: &Path) -> Result<Option<Self>> {
        let file_size = std::fs::metadata(&spec.path)
            .map_err(|e| DumpError::planning(format!("cannot stat {}: {e}", spec.path.display())))?
            .len();
        let last_page = spec.resolve_last_page()?;
        let offsets = split_offsets(file_size, shard_size)?;
        if offsets.is_empty() {
            info!(
                file = %spec.path.display(),
                file_size,
                shard_size,
                "file smaller than or not much bigger than split size, skipping"
            );
            return Ok(None);
        }
        Self::new(&spec.path, last_page, offsets, output_dir).map(Some)
    }

    /// Look up the first page after every offset.
    pub fn resolve_pages<D: Decompressor>(
        &mut self,
        resolver: &PageBoundaryResolver<D>,
    ) -> Result<()> {
        self.first_pages = resolver.resolve_all(&self.input_file, &self.offsets)?;
        Ok(())
    }

    /// Turn resolved offsets into jobs.
    ///
    /// An offset whose first page equals the next offset's first page gets no
    /// job: both saw the same page start, and the piece must begin at a real
    /// page boundary. Each job ends one page before the next job starts; the
    /// last one ends at the file's last page.
    pub fn build_jobs(&mut self) -> Result<()> {
        let resolved: Vec<(u64, u64)> = self.first_pages.iter().map(|(&o, &p)| (o, p)).collect();
        let mut jobs = Vec::with_capacity(resolved.len());

        for (i, &(offset, start_page)) in resolved.iter().enumerate() {
            let end_page = match resolved.get(i + 1) {
                Some(&(_, next_page)) if next_page == start_page => {
                    debug!(
                        file = %self.input_file.display(),
                        offset,
                        page_id = start_page,
                        "chunk skipped, same page id as next offset"
                    );
                    continue;
                }
                Some(&(_, next_page)) => next_page.saturating_sub(1),
                None => self.last_page,
            };
            if end_page < start_page {
                return Err(DumpError::planning(format!(
                    "{}: piece at offset {offset} would end at page {end_page} \
                     before its first page {start_page}",
                    self.input_file.display()
                )));
            }
            let output_path = self.output_dir.join(self.template.render(start_page, end_page));
            jobs.push(ShardJob {
                input_file: self.input_file.clone(),
                offset,
                start_page,
                end_page,
                output_path,
                status: JobStatus::Pending,
            });
        }

        self.jobs = jobs;
        Ok(())
    }
}

/// Position of a job inside a [`SplitPlan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId {
    pub file: usize,
    pub job: usize,
}

/// The full set of per-file plans for one run.
#[derive(Debug, Clone, Default)]
pub struct SplitPlan {
    pub files: Vec<FileTodo>,
}

impl SplitPlan {
    pub fn new(files: Vec<FileTodo>) -> Self {
        Self { files }
    }

    /// Plan every file in `specs`.
    ///
    /// All filename and size checks happen before the first decompression,
    /// so a bad spec aborts the run without doing any work.
    pub fn build<D: Decompressor>(
        specs: &[FileSpec],
        shard_size: u64,
        output_dir: &Path,
        resolver: &PageBoundaryResolver<D>,
    ) -> Result<Self> {
        if !output_dir.is_dir() {
            return Err(DumpError::planning(format!("no such directory: {}", output_dir.display())));
        }

        let mut files = Vec::new();
        for spec in specs {
            if let Some(todo) = FileTodo::plan(spec, shard_size, output_dir)? {
                files.push(todo);
            }
        }

        for todo in &mut files {
            todo.resolve_pages(resolver)?;
            todo.build_jobs()?;
            debug!(
                file = %todo.input_file.display(),
                offsets = ?todo.offsets,
                jobs = todo.jobs.len(),
                "planned file"
            );
        }
        Ok(Self { files })
    }

    pub fn job(&self, id: JobId) -> &ShardJob {
        &self.files[id.file].jobs[id.job]
    }

    pub fn jobs(&self) -> impl Iterator<Item = &ShardJob> {
        self.files.iter().flat_map(|f| f.jobs.iter())
    }

    /// Record the outcome of a batched job.
    pub fn finish(&mut self, id: JobId, ok: bool) -> bool {
        let next = if ok { JobStatus::Done } else { JobStatus::Failed };
        self.files[id.file].jobs[id.job].advance(next)
    }

    /// Pending jobs whose output does not exist yet, in plan order. Nothing
    /// is marked; dry runs list these instead of batching them.
    pub fn runnable(&self) -> Vec<JobId> {
        let mut ids = Vec::new();
        for (file_idx, todo) in self.files.iter().enumerate() {
            for (job_idx, job) in todo.jobs.iter().enumerate() {
                if job.status == JobStatus::Pending && !job.output_path.exists() {
                    ids.push(JobId {
                        file: file_idx,
                        job: job_idx,
                    });
                }
            }
        }
        ids
    }

    /// Pick up to `width` pending jobs whose output does not exist yet and
    /// mark them batched.
    ///
    /// Jobs with an existing output file are marked done instead, so a rerun
    /// after a partial run picks up where it stopped. A file cut short by a
    /// crash mid-write also counts as existing.
    pub fn next_batch(&mut self, width: usize) -> Vec<JobId> {
        let width = width.max(1);
        let mut batch = Vec::with_capacity(width);
        for (file_idx, todo) in self.files.iter_mut().enumerate() {
            for (job_idx, job) in todo.jobs.iter_mut().enumerate() {
                if job.status != JobStatus::Pending {
                    continue;
                }
                if job.output_path.exists() {
                    debug!(
                        output = %job.output_path.display(),
                        "skipping job, output exists already"
                    );
                    job.advance(JobStatus::Done);
                    continue;
                }
                job.advance(JobStatus::Batched);
                batch.push(JobId {
                    file: file_idx,
                    job: job_idx,
                });
                if batch.len() >= width {
                    return batch;
                }
            }
        }
        batch
    }
}
