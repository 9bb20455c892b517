pub mod error;
pub mod executor;
pub mod filename;
pub mod format;
pub mod plan;
pub mod planner;
pub mod resolver;
pub mod scanner;
pub mod verify;

pub use error::{DumpError, Result};
pub use executor::{BatchExecutor, BatchReport, JobFailure, Pipeline, RunSummary, ToolPaths};
pub use filename::{parse_size, FileSpec, FilenameMetadata, OutputTemplate};
pub use format::{combine_crc, BLOCK_MARKER, FOOTER_MAGIC};
pub use plan::{FileTodo, JobId, JobStatus, ShardJob, SplitPlan};
pub use planner::split_offsets;
pub use resolver::{Decompressor, PageBoundaryResolver};
pub use scanner::{BlockScanner, CompressedBlock, CrcReport};
pub use verify::{LastRevisionSource, PageLookup, RangeCheck, RangeChecker};
