use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use dumpsplit_core::format::DEFAULT_RESOLVE_WINDOW;
use dumpsplit_core::scanner::fold_crc_listing;
use dumpsplit_core::verify::content_files;
use dumpsplit_core::{
    parse_size, BatchExecutor, BatchReport, CompressedBlock, CrcReport, FileSpec,
    PageBoundaryResolver, SplitPlan, ToolPaths,
};
use dumpsplit_tools::{range_checker, ProcessDecompressor, DEFAULT_LAST_ID_TOOL};

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "dumpsplit",
    about = "Verify and split bzip2-compressed XML dump files without decompressing them",
    version
)]
struct Cli {
    /// Display progress messages while running
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split large bz2 dump files into smaller page-aligned ones
    ///
    /// The nth piece of an input file starts with the first page found after
    /// n * splitsize bytes into the compressed file. Pieces whose output file
    /// already exists are skipped, so an interrupted run can be repeated.
    Split {
        /// Comma-separated list of bz2 files to split. A file whose name does
        /// not carry an xml-p<first>p<last> range must be followed by
        /// :<last page id>
        #[arg(short, long)]
        files: String,
        /// Rough compressed size of each piece; K, M and G multiply by
        /// 1,000, 1,000,000 and 1,000,000,000
        #[arg(short, long)]
        splitsize: String,
        /// Existing directory in which to write output files
        #[arg(short, long)]
        odir: PathBuf,
        /// Number of split pipelines to run at once
        #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
        batchsize: u64,
        /// Print the pipelines that would run instead of running them
        #[arg(short, long)]
        dryrun: bool,
        /// Decompressed bytes to search for a page start after each offset
        #[arg(long, default_value_t = DEFAULT_RESOLVE_WINDOW)]
        window: usize,
        #[command(flatten)]
        tools: ToolArgs,
    },
    /// Show offset and CRC of every byte-aligned bz2 block, plus the combined CRC
    ///
    /// Blocks are found by their start markers. Nothing is decompressed and
    /// blocks that are not byte aligned are not found.
    Crcs {
        /// bz2 file to scan
        #[arg(short, long)]
        input: PathBuf,
        /// Emit the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Compute cumulative CRCs for a listing of `offset:<n> CRC:0x<hex>` lines
    MungeCrcs {
        /// Listing file
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Check that meta-history files hold the page ranges their names claim
    CheckRange {
        /// Name of the wiki as it appears in dblists
        #[arg(short, long, required_unless_present = "files")]
        wiki: Option<String>,
        /// Date of the dump run, YYYYMMDD
        #[arg(short, long, value_parser = parse_date, required_unless_present = "files")]
        date: Option<String>,
        /// Check these files instead of a whole dump run
        #[arg(short, long, value_delimiter = ',', conflicts_with_all = ["wiki", "date"])]
        files: Vec<PathBuf>,
        /// Print mv commands renaming bad files instead of the report
        #[arg(short, long)]
        renames: bool,
        /// Root of the public dumps tree
        #[arg(long, env = "DUMPSPLIT_DUMPS_ROOT", default_value = "/mnt/data/xmldatadumps/public")]
        dumps_root: PathBuf,
        /// getlastidinbz2xml helper
        #[arg(long, env = "DUMPSPLIT_LAST_ID_TOOL", default_value = DEFAULT_LAST_ID_TOOL)]
        last_id_tool: PathBuf,
        #[command(flatten)]
        tools: ToolArgs,
    },
}

#[derive(clap::Args)]
struct ToolArgs {
    /// dumpbz2filefromoffset helper
    #[arg(
        long,
        env = "DUMPSPLIT_DECOMPRESS_TOOL",
        default_value = "/usr/local/bin/dumpbz2filefromoffset"
    )]
    decompress_tool: PathBuf,
    /// writeuptopageid helper
    #[arg(long, env = "DUMPSPLIT_WRITE_TOOL", default_value = "/usr/local/bin/writeuptopageid")]
    write_tool: PathBuf,
}

impl From<ToolArgs> for ToolPaths {
    fn from(args: ToolArgs) -> Self {
        ToolPaths {
            decompress: args.decompress_tool,
            write: args.write_tool,
        }
    }
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn parse_date(s: &str) -> Result<String, String> {
    if s.len() == 8 && s.bytes().all(|b| b.is_ascii_digit()) {
        Ok(s.to_string())
    } else {
        Err("date must be of the form YYYYMMDD".to_string())
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn absolute(path: &Path) -> anyhow::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

fn print_block(block: &CompressedBlock) {
    println!(
        "Block_CRC: {:#010x} ( {} ), Cumul_CRC: {:#010x} ( {} ) Offset: {}",
        block.block_crc, block.block_crc, block.cumulative_crc, block.cumulative_crc, block.offset
    );
}

fn print_file_crc(crc: Option<u32>) {
    match crc {
        Some(crc) => println!("File CRC: {:#010x}", crc),
        None => println!("No crc retrieved for the file"),
    }
}

fn print_batch(report: &BatchReport) {
    if report.dry_run {
        for pipeline in &report.pipelines {
            println!("would run: {}", pipeline);
        }
        return;
    }
    if !report.failures.is_empty() {
        eprintln!("The following commands failed from batch {}:", report.number);
        for failure in &report.failures {
            eprintln!("  {} ({})", failure.pipeline, failure.reason);
        }
    }
}

// ── Subcommand implementations ─────────────────────────────────────────────

fn run_split(
    files: &str,
    splitsize: &str,
    odir: &Path,
    batchsize: u64,
    dryrun: bool,
    window: usize,
    tools: ToolPaths,
) -> anyhow::Result<()> {
    let shard_size = parse_size(splitsize)?;
    let specs = FileSpec::parse_list(files)?;
    if specs.is_empty() {
        anyhow::bail!("no input files given");
    }
    let odir = absolute(odir)?;

    let t0 = Instant::now();
    let resolver = PageBoundaryResolver::new(ProcessDecompressor::new(&tools.decompress))
        .with_window(window);
    let mut plan =
        SplitPlan::build(&specs, shard_size, &odir, &resolver).context("planning split")?;
    let planned = plan.jobs().count();
    tracing::info!(jobs = planned, elapsed = ?t0.elapsed(), "planning done");

    let executor = BatchExecutor::new(tools, batchsize as usize).dry_run(dryrun);
    let summary = executor.run(&mut plan, print_batch)?;

    eprintln!("  pieces planned : {}", planned);
    eprintln!("  batches        : {}", summary.batches);
    eprintln!("  pipelines run  : {}", summary.pipelines_run);
    eprintln!("  failures       : {}", summary.failures.len());
    eprintln!("  elapsed        : {:.3}s", t0.elapsed().as_secs_f64());

    if !summary.failures.is_empty() {
        anyhow::bail!("{} split pipeline(s) failed", summary.failures.len());
    }
    Ok(())
}

fn run_crcs(input: &Path, json: bool) -> anyhow::Result<()> {
    let report = CrcReport::from_path(input).with_context(|| format!("scanning {:?}", input))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for block in &report.blocks {
            print_block(block);
        }
        print_file_crc(report.file_crc);
        println!("And now the big finish, the computed crc");
        print_file_crc(Some(report.computed_crc));
    }

    if report.file_crc.is_some() && !report.is_consistent() {
        anyhow::bail!(
            "computed crc {:#010x} does not match file crc {:#010x}",
            report.computed_crc,
            report.file_crc.unwrap_or_default()
        );
    }
    Ok(())
}

fn run_munge_crcs(input: &Path) -> anyhow::Result<()> {
    let file = File::open(input).with_context(|| format!("opening listing {:?}", input))?;
    let blocks = fold_crc_listing(BufReader::new(file))?;
    for block in &blocks {
        print_block(block);
    }
    println!("And now the big finish, the final computed crc");
    print_file_crc(Some(blocks.last().map_or(0, |b| b.cumulative_crc)));
    Ok(())
}

fn run_check_range(
    run: Option<(String, String)>,
    files: Vec<PathBuf>,
    renames: bool,
    dumps_root: &Path,
    last_id_tool: PathBuf,
    tools: ToolPaths,
) -> anyhow::Result<()> {
    let files = match run {
        Some((wiki, date)) => {
            let dump_dir = dumps_root.join(wiki).join(date);
            content_files(&dump_dir).with_context(|| format!("listing {:?}", dump_dir))?
        }
        None => files,
    };
    let checker = range_checker(tools.decompress, last_id_tool)?;

    let mut bad = 0usize;
    for file in files {
        let check = match checker.check(&file) {
            Ok(check) => check,
            Err(e) => {
                bad += 1;
                eprintln!("BAD {} ({})", file.display(), e);
                continue;
            }
        };
        if check.is_ok() {
            if !renames {
                println!("{}", check.summary());
            }
            continue;
        }
        bad += 1;
        if !renames {
            println!("{}", check.summary());
        } else if let Some(new_path) = check.corrected_path() {
            println!("mv {} {}", file.display(), new_path.display());
        } else {
            eprintln!("cannot work out a new name for {}", file.display());
        }
    }
    tracing::info!(bad, "range check finished");
    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match cli.command {
        Commands::Split {
            files,
            splitsize,
            odir,
            batchsize,
            dryrun,
            window,
            tools,
        } => run_split(&files, &splitsize, &odir, batchsize, dryrun, window, tools.into()),
        Commands::Crcs { input, json } => run_crcs(&input, json),
        Commands::MungeCrcs { input } => run_munge_crcs(&input),
        Commands::CheckRange {
            wiki,
            date,
            files,
            renames,
            dumps_root,
            last_id_tool,
            tools,
        } => run_check_range(
            wiki.zip(date),
            files,
            renames,
            &dumps_root,
            last_id_tool,
            tools.into(),
        ),
    }
}
