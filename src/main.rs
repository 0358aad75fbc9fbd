//! Splits a speech corpus into nested training subsets and verifies the result.
//!
//! `corpus-split partition` reads a segment table (seg_id, talk_id, speaker_id, start, end),
//! splits it in 5, 25, 125 and 500 balanced subsets by default, writes one table per level and,
//! given the directory of segment audio files, a linked directory tree per subset.
//! `corpus-split verify` checks those outputs against the segment table and the filesystem.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use corpus_split::config::{
    AudioLayout, DEFAULT_SPLIT_FACTORS, FolderHierarchy, HierarchyPath, LinkMode,
    MATERIALIZE_NUM_THREADS, PartitionConfig, TableFormat, VerifyConfig,
};
use corpus_split::{GroupOrder, GroupbyKey, create_partitions, verify};

#[derive(Parser)]
#[command(
    name = "corpus-split",
    version,
    about = "Nested, duration-balanced training splits of a speech corpus"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Hide progress bars
    #[arg(long, global = true)]
    no_progress: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Split the training set into subsets of approximately the same length
    Partition(PartitionArgs),
    /// Verify partition tables and directories
    Verify(VerifyArgs),
}

#[derive(Args)]
struct PartitionArgs {
    /// Segment table with seg_id, talk_id, speaker_id, start and end columns
    segment_csv: PathBuf,

    /// Directory holding {speaker_id}/{seg_id}.wav; enables the per-partition directory trees
    #[arg(long)]
    full_dir: Option<PathBuf>,

    /// Keep segments with the same value of this column together
    #[arg(long, default_value = "seg_id")]
    groupby: GroupbyKey,

    #[arg(long, value_delimiter = ',', default_values_t = DEFAULT_SPLIT_FACTORS.to_vec())]
    factors: Vec<usize>,

    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Order groups are assigned in: key, first-seen or longest-first
    #[arg(long, default_value = "key")]
    order: GroupOrder,

    /// Where level tables go [default: <segment_csv dir>/<groupby>]
    #[arg(long)]
    table_dir: Option<PathBuf>,

    /// Where partition trees go [default: <full_dir parent>/<groupby>]
    #[arg(long)]
    audio_root: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = LinkMode::Symlink)]
    link_mode: LinkMode,

    #[arg(long, default_value_t = MATERIALIZE_NUM_THREADS)]
    threads: usize,

    /// Also write {split_count}.parquet next to every csv table
    #[arg(long)]
    parquet: bool,
}

#[derive(Args)]
struct VerifyArgs {
    /// The canonical segment table
    segment_csv: PathBuf,

    #[arg(long, default_value = "seg_id")]
    groupby: GroupbyKey,

    /// Directory of level tables [default: <segment_csv dir>/<groupby>]
    #[arg(long)]
    table_dir: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = TableFormat::Csv)]
    format: TableFormat,

    /// Expected split factors; without them, whatever levels exist are checked
    #[arg(long, value_delimiter = ',')]
    factors: Option<Vec<usize>>,

    /// Directory holding the full set of segment audio files
    #[arg(long)]
    full_dir: Option<PathBuf>,

    /// Root of the partition trees [default: <full_dir parent>/<groupby>]
    #[arg(long)]
    partition_root: Option<PathBuf>,

    /// Column naming each audio file's sub-directory
    #[arg(long, value_enum, default_value_t = FolderHierarchy::Speaker)]
    hierarchy: FolderHierarchy,

    /// Fraction of segments whose file is looked up
    #[arg(long, default_value_t = 1.0)]
    fraction: f64,

    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Also open sampled wav files and compare their length to the segment's
    #[arg(long)]
    check_audio: bool,

    /// Write the full report as JSON
    #[arg(long)]
    report: Option<PathBuf>,

    /// Exit with a failure status when any violation is found
    #[arg(long)]
    strict: bool,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!(e))
        .context("Failed to set tracing subscriber")?;

    let show_progress = !cli.no_progress;
    match cli.command {
        Commands::Partition(args) => run_partition(args, show_progress),
        Commands::Verify(args) => run_verify(args),
    }
}

fn run_partition(args: PartitionArgs, show_progress: bool) -> Result<ExitCode> {
    let start_time = Instant::now();

    let mut config = PartitionConfig::new(&args.segment_csv, args.groupby);
    config.path = HierarchyPath::new(args.factors).context("invalid split factors")?;
    config.order = args.order;
    config.seed = args.seed;
    config.write_parquet = args.parquet;
    config.show_progress = show_progress;
    if let Some(table_dir) = args.table_dir {
        config.table_dir = table_dir;
    }
    if let Some(full_dir) = &args.full_dir {
        let full_dir = full_dir
            .canonicalize()
            .with_context(|| format!("cannot resolve {}", full_dir.display()))?;
        let mut layout = AudioLayout::beside(&full_dir, args.groupby);
        if let Some(root) = args.audio_root {
            layout.output_root = root;
        }
        layout.link_mode = args.link_mode;
        layout.num_threads = args.threads;
        config.audio = Some(layout);
    }

    let summaries = create_partitions(&config).with_context(|| {
        format!("failed to partition {}", config.segment_csv.display())
    })?;

    let mut incomplete = 0;
    for summary in &summaries {
        println!(
            "  - {:>4} splits: {} (spread {:.2}s, {} empty)",
            summary.split_count,
            summary.csv.display(),
            summary.spread,
            summary.empty_partitions
        );
        if let Some(audio) = &summary.audio {
            incomplete += audio.issues.len();
        }
    }
    if incomplete > 0 {
        println!("  - {incomplete} segments could not be linked; run `corpus-split verify` for details.");
    }
    info!("Total time elapsed: {:?}", start_time.elapsed());
    Ok(ExitCode::SUCCESS)
}

fn run_verify(args: VerifyArgs) -> Result<ExitCode> {
    let mut config = VerifyConfig::new(&args.segment_csv, args.groupby);
    if let Some(table_dir) = args.table_dir {
        config.table_dir = table_dir;
    }
    config.format = args.format;
    config.path = args
        .factors
        .map(HierarchyPath::new)
        .transpose()
        .context("invalid split factors")?;
    config.partition_root = match (args.partition_root, &args.full_dir) {
        (Some(root), _) => Some(root),
        (None, Some(full_dir)) => {
            let full_dir = full_dir
                .canonicalize()
                .with_context(|| format!("cannot resolve {}", full_dir.display()))?;
            Some(AudioLayout::beside(&full_dir, args.groupby).output_root)
        }
        (None, None) => None,
    };
    config.full_dir = args.full_dir;
    config.hierarchy = args.hierarchy;
    config.fraction = args.fraction;
    config.seed = args.seed;
    config.check_audio = args.check_audio;

    let report = verify(&config).context("verification could not run")?;
    if let Some(path) = &args.report {
        report
            .write_json(path)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
    }

    for violation in &report.violations {
        println!("  - {violation}");
    }
    println!(
        "Checked {} levels and {} files: {} violations",
        report.levels_checked.len(),
        report.files_checked,
        report.violations.len()
    );
    if args.strict && !report.is_clean() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
