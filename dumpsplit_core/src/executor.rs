use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::plan::{JobId, ShardJob, SplitPlan};

/// Locations of the external helpers a split runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    /// Streams decompressed content from the first block at or after an
    /// offset: `tool <file> <offset>`.
    pub decompress: PathBuf,
    /// Writes pages `[start, end)` from stdin as a complete dump file:
    /// `tool -o <dir> -f <name:start:end>`.
    pub write: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            decompress: PathBuf::from("/usr/local/bin/dumpbz2filefromoffset"),
            write: PathBuf::from("/usr/local/bin/writeuptopageid"),
        }
    }
}

/// Decompress stage piped into a write stage.
pub struct Pipeline {
    producer: Command,
    consumer: Command,
}

impl Pipeline {
    pub fn for_job(job: &ShardJob, tools: &ToolPaths) -> Self {
        let mut producer = Command::new(&tools.decompress);
        producer.arg(&job.input_file).arg(job.offset.to_string());

        let output_dir = job
            .output_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_default();
        let mut consumer = Command::new(&tools.write);
        consumer.arg("-o").arg(output_dir).arg("-f").arg(job.writer_spec());

        Self { producer, consumer }
    }

    /// Shell-like rendering, for dry runs and logs.
    pub fn describe(&self) -> String {
        format!("{} | {}", render(&self.producer), render(&self.consumer))
    }

    /// Start both stages with the producer's stdout feeding the consumer.
    ///
    /// The producer's stdout handle moves into the consumer's stdin and the
    /// consumer `Command` is dropped right after spawning, so this process
    /// keeps no copy of the pipe. Otherwise a producer blocked on a full pipe
    /// could never see the consumer go away.
    pub fn spawn(self) -> io::Result<RunningPipeline> {
        let Pipeline {
            mut producer,
            mut consumer,
        } = self;

        let mut producer_child = producer.stdout(Stdio::piped()).spawn()?;
        let Some(stdout) = producer_child.stdout.take() else {
            let _ = producer_child.kill();
            let _ = producer_child.wait();
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "producer stdout not captured"));
        };

        let consumer_child = consumer.stdin(Stdio::from(stdout)).spawn();
        drop(consumer);
        match consumer_child {
            Ok(consumer_child) => Ok(RunningPipeline {
                producer: producer_child,
                consumer: consumer_child,
            }),
            Err(e) => {
                let _ = producer_child.kill();
                let _ = producer_child.wait();
                Err(e)
            }
        }
    }
}

fn render(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().into_owned()];
    parts.extend(cmd.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

pub struct RunningPipeline {
    producer: Child,
    consumer: Child,
}

impl RunningPipeline {
    /// Wait for both stages. There is no timeout.
    pub fn wait(mut self) -> io::Result<PipelineStatus> {
        let producer = self.producer.wait()?;
        let consumer = self.consumer.wait()?;
        Ok(PipelineStatus { producer, consumer })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineStatus {
    pub producer: ExitStatus,
    pub consumer: ExitStatus,
}

impl PipelineStatus {
    /// The write stage decides. The decompress stage is routinely cut off
    /// by a broken pipe once the writer has its last page.
    pub fn success(&self) -> bool {
        self.consumer.success()
    }
}

/// A job that did not produce its output.
#[derive(Debug, Clone)]
pub struct JobFailure {
    pub pipeline: String,
    pub output_path: PathBuf,
    pub reason: String,
}

/// Outcome of one batch.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// 1-based batch number.
    pub number: usize,
    /// Pipelines in the batch, rendered.
    pub pipelines: Vec<String>,
    /// Set when nothing was executed.
    pub dry_run: bool,
    /// Pipelines that were actually spawned.
    pub started: usize,
    pub failures: Vec<JobFailure>,
}

/// Totals over a whole run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub batches: usize,
    pub pipelines_run: usize,
    pub failures: Vec<JobFailure>,
}

/// Runs a plan's jobs as batches of concurrent pipelines.
#[derive(Debug, Clone)]
pub struct BatchExecutor {
    tools: ToolPaths,
    width: usize,
    dry_run: bool,
}

impl BatchExecutor {
    pub fn new(tools: ToolPaths, width: usize) -> Self {
        Self {
            tools,
            width: width.max(1),
            dry_run: false,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Run batches until no job is left to batch. `on_batch` sees every
    /// batch's report as soon as that batch has finished.
    ///
    /// A failed job never stops the run; failures are collected per batch
    /// and in the summary. A dry run reports the batches it would run and
    /// leaves every job status as it was.
    pub fn run<F>(&self, plan: &mut SplitPlan, mut on_batch: F) -> Result<RunSummary>
    where
        F: FnMut(&BatchReport),
    {
        let mut summary = RunSummary::default();
        if self.dry_run {
            for batch in plan.runnable().chunks(self.width) {
                summary.batches += 1;
                on_batch(&self.describe_batch(plan, batch, summary.batches));
            }
            return Ok(summary);
        }

        loop {
            let batch = plan.next_batch(self.width);
            if batch.is_empty() {
                break;
            }
            summary.batches += 1;
            let report = self.run_batch(plan, &batch, summary.batches);
            summary.pipelines_run += report.started;
            summary.failures.extend(report.failures.iter().cloned());
            on_batch(&report);
        }
        info!(
            batches = summary.batches,
            pipelines = summary.pipelines_run,
            failures = summary.failures.len(),
            "split run finished"
        );
        Ok(summary)
    }

    fn describe_batch(&self, plan: &SplitPlan, batch: &[JobId], number: usize) -> BatchReport {
        BatchReport {
            number,
            pipelines: batch
                .iter()
                .map(|&id| Pipeline::for_job(plan.job(id), &self.tools).describe())
                .collect(),
            dry_run: self.dry_run,
            started: 0,
            failures: Vec::new(),
        }
    }

    fn run_batch(&self, plan: &mut SplitPlan, batch: &[JobId], number: usize) -> BatchReport {
        let mut report = self.describe_batch(plan, batch, number);
        info!(batch = number, jobs = batch.len(), "running batch");

        // start everything first, then wait
        let mut running = Vec::with_capacity(batch.len());
        for (&id, described) in batch.iter().zip(report.pipelines.iter()) {
            debug!(pipeline = %described, "spawning");
            let started = Pipeline::for_job(plan.job(id), &self.tools).spawn();
            if started.is_ok() {
                report.started += 1;
            }
            running.push((id, described.clone(), started));
        }

        for (id, described, started) in running {
            let output_path = plan.job(id).output_path.clone();
            let failure = match started.and_then(RunningPipeline::wait) {
                Ok(status) if status.success() => {
                    if !status.producer.success() {
                        debug!(
                            pipeline = %described,
                            status = %status.producer,
                            "decompress stage exited nonzero"
                        );
                    }
                    if output_path.exists() {
                        None
                    } else {
                        Some("write stage succeeded but left no output file".to_string())
                    }
                }
                Ok(status) => Some(format!("write stage exited with {}", status.consumer)),
                Err(e) => Some(format!("could not run pipeline: {e}")),
            };
            plan.finish(id, failure.is_none());
            if let Some(reason) = failure {
                warn!(pipeline = %described, %reason, "job failed");
                report.failures.push(JobFailure {
                    pipeline: described,
                    output_path,
                    reason,
                });
            }
        }
        report
    }
}
