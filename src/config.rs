//! Configuration for how to split the corpus.
//!
//! The corpus is split in stages. Each stage takes every partition produced by the previous
//! stage and splits it into `split_factor` smaller partitions of roughly the same total duration,
//! never separating segments that share a group key. The default factors split the training set
//! in 5, then 25, 125 and 500 subsets, which is what the perceptual narrowing experiments train on.
//!
//! Nothing in this crate reads the environment: the binary builds a [`PartitionConfig`] or a
//! [`VerifyConfig`] from its arguments and hands it to the library.

use std::path::{Path, PathBuf};

use clap::ValueEnum;
use phf::phf_map;

use crate::error::ConfigError;
use crate::segment::GroupbyKey;
use crate::splitter::GroupOrder;

// Split in 5, then 25, 125, and 500.
pub const DEFAULT_SPLIT_FACTORS: &[usize] = &[5, 5, 5, 4];

pub const AUDIO_EXTENSION: &str = "wav";

// How many threads link or copy partition directories at once. Linking is cheap, copying is
// I/O bound, so a handful of threads is plenty either way.
pub const MATERIALIZE_NUM_THREADS: usize = 8;

// Relative. Summing thousands of segment durations in a different order drifts a little.
pub const DURATION_TOLERANCE: f64 = 1e-9;

// Seconds. Allowed difference between a wav file's length and its segment's `end - start`.
pub const AUDIO_DURATION_TOLERANCE: f64 = 0.05;

/// Every spelling of a group key accepted on the command line.
pub const GROUPBY_ALIASES: phf::Map<&'static str, GroupbyKey> = phf_map! {
    "seg_id" => GroupbyKey::Segment,
    "segment" => GroupbyKey::Segment,
    "talk_id" => GroupbyKey::File,
    "talk" => GroupbyKey::File,
    "file" => GroupbyKey::File,
    "speaker_id" => GroupbyKey::Speaker,
    "speaker" => GroupbyKey::Speaker,
};

pub const GROUP_ORDER_ALIASES: phf::Map<&'static str, GroupOrder> = phf_map! {
    "key" => GroupOrder::Key,
    "first-seen" => GroupOrder::FirstSeen,
    "longest-first" => GroupOrder::LongestFirst,
};

/// The chain of split factors applied one after the other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyPath {
    factors: Vec<usize>,
}

impl HierarchyPath {
    pub fn new(factors: Vec<usize>) -> Result<Self, ConfigError> {
        if factors.is_empty() {
            return Err(ConfigError::EmptyHierarchy);
        }
        if let Some(&bad) = factors.iter().find(|&&f| f < 2) {
            return Err(ConfigError::InvalidSplitFactor(bad));
        }
        factors
            .iter()
            .try_fold(1usize, |acc, &f| acc.checked_mul(f))
            .ok_or_else(|| ConfigError::SplitCountOverflow(factors.clone()))?;
        Ok(Self { factors })
    }

    pub fn factors(&self) -> &[usize] {
        &self.factors
    }

    /// Cumulative products, i.e. the split count label of every level.
    pub fn split_counts(&self) -> Vec<usize> {
        self.factors
            .iter()
            .scan(1usize, |acc, &f| {
                *acc *= f;
                Some(*acc)
            })
            .collect()
    }
}

impl Default for HierarchyPath {
    fn default() -> Self {
        Self {
            factors: DEFAULT_SPLIT_FACTORS.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LinkMode {
    #[default]
    Symlink,
    Copy,
}

/// Where the per-partition audio trees come from and go to.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioLayout {
    /// `{full_dir}/{speaker_id}/{seg_id}.wav`
    pub full_dir: PathBuf,
    /// Partitions land in `{output_root}/{split_count}/{split_id}`.
    pub output_root: PathBuf,
    pub link_mode: LinkMode,
    pub num_threads: usize,
}

impl AudioLayout {
    /// Partitions live next to the full set, under the groupby column.
    pub fn beside(full_dir: &Path, groupby: GroupbyKey) -> Self {
        let parent = full_dir.parent().unwrap_or_else(|| Path::new("."));
        Self {
            full_dir: full_dir.to_path_buf(),
            output_root: parent.join(groupby.column()),
            link_mode: LinkMode::default(),
            num_threads: MATERIALIZE_NUM_THREADS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartitionConfig {
    pub segment_csv: PathBuf,
    pub table_dir: PathBuf,
    pub groupby: GroupbyKey,
    pub order: GroupOrder,
    pub path: HierarchyPath,
    pub seed: u64,
    pub write_parquet: bool,
    pub audio: Option<AudioLayout>,
    pub show_progress: bool,
}

impl PartitionConfig {
    /// Tables go to `{segment_csv parent}/{groupby column}`, no audio trees.
    pub fn new(segment_csv: impl Into<PathBuf>, groupby: GroupbyKey) -> Self {
        let segment_csv = segment_csv.into();
        let table_dir = default_table_dir(&segment_csv, groupby);
        Self {
            segment_csv,
            table_dir,
            groupby,
            order: GroupOrder::default(),
            path: HierarchyPath::default(),
            seed: 0,
            write_parquet: false,
            audio: None,
            show_progress: false,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(audio) = &self.audio {
            if audio.num_threads == 0 {
                return Err(ConfigError::InvalidThreadCount);
            }
        }
        Ok(())
    }
}

/// Which table files the verifier reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum TableFormat {
    #[default]
    Csv,
    Parquet,
}

impl TableFormat {
    pub fn extension(self) -> &'static str {
        match self {
            TableFormat::Csv => "csv",
            TableFormat::Parquet => "parquet",
        }
    }
}

/// Column naming the sub-directory each segment's audio file lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum FolderHierarchy {
    #[default]
    #[value(name = "speaker_id")]
    Speaker,
    #[value(name = "lang_id")]
    Language,
}

impl FolderHierarchy {
    pub fn column(self) -> &'static str {
        match self {
            FolderHierarchy::Speaker => "speaker_id",
            FolderHierarchy::Language => "lang_id",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerifyConfig {
    pub segment_csv: PathBuf,
    pub table_dir: PathBuf,
    pub format: TableFormat,
    pub groupby: GroupbyKey,
    /// When set, the levels must be exactly this path's split counts.
    pub path: Option<HierarchyPath>,
    pub full_dir: Option<PathBuf>,
    pub partition_root: Option<PathBuf>,
    pub hierarchy: FolderHierarchy,
    pub fraction: f64,
    pub seed: u64,
    pub check_audio: bool,
    pub duration_tolerance: f64,
    pub audio_tolerance: f64,
}

impl VerifyConfig {
    pub fn new(segment_csv: impl Into<PathBuf>, groupby: GroupbyKey) -> Self {
        let segment_csv = segment_csv.into();
        let table_dir = default_table_dir(&segment_csv, groupby);
        Self {
            segment_csv,
            table_dir,
            format: TableFormat::default(),
            groupby,
            path: None,
            full_dir: None,
            partition_root: None,
            hierarchy: FolderHierarchy::default(),
            fraction: 1.0,
            seed: 0,
            check_audio: false,
            duration_tolerance: DURATION_TOLERANCE,
            audio_tolerance: AUDIO_DURATION_TOLERANCE,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.fraction > 0.0 && self.fraction <= 1.0) {
            return Err(ConfigError::InvalidFraction(self.fraction));
        }
        for tolerance in [self.duration_tolerance, self.audio_tolerance] {
            if !tolerance.is_finite() || tolerance < 0.0 {
                return Err(ConfigError::InvalidTolerance(tolerance));
            }
        }
        Ok(())
    }
}

pub fn default_table_dir(segment_csv: &Path, groupby: GroupbyKey) -> PathBuf {
    segment_csv
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(groupby.column())
}
