//! Cross-checks persisted partitions against the canonical segment table and the filesystem.
//!
//! Nothing here stops at the first problem. Every check appends to a [`VerificationReport`]
//! and the caller decides what a non-empty report means.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::{AUDIO_EXTENSION, VerifyConfig};
use crate::error::{PartitionError, Result, TableError};
use crate::materialize::segment_audio_path;
use crate::segment::{Segment, SegmentTable};
use crate::table::{LevelTable, level_paths, split_count_of};

#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    #[error("cannot read {path}: {reason}")]
    UnreadableTable { path: PathBuf, reason: String },
    #[error("{path} is not named after a split count")]
    BadLevelName { path: PathBuf },
    #[error("no table for {split_count} splits")]
    MissingLevel { split_count: usize },
    #[error("unexpected table for {split_count} splits")]
    UnexpectedLevel { split_count: usize },
    #[error("{split_count} splits: {found} rows instead of {expected}")]
    RowCount {
        split_count: usize,
        expected: usize,
        found: usize,
    },
    #[error("{split_count} splits: {found} distinct split ids")]
    SplitCount { split_count: usize, found: usize },
    #[error("{split_count} splits: split id {split_id} out of range")]
    SplitIdOutOfRange { split_count: usize, split_id: usize },
    #[error("{split_count} splits: segment {seg_id} is missing")]
    MissingSegment { split_count: usize, seg_id: String },
    #[error("{split_count} splits: segment {seg_id} appears {count} times")]
    DuplicateSegment {
        split_count: usize,
        seg_id: String,
        count: usize,
    },
    #[error("{split_count} splits: segment {seg_id} is not in the segment table")]
    UnknownSegment { split_count: usize, seg_id: String },
    #[error("{split_count} splits: group {group} is spread over splits {split_ids:?}")]
    GroupSplit {
        split_count: usize,
        group: String,
        split_ids: Vec<usize>,
    },
    #[error("{split_count} splits: total duration {found} instead of {expected}")]
    DurationDrift {
        split_count: usize,
        expected: f64,
        found: f64,
    },
    #[error(
        "split {split_id} of {split_count} takes segments from splits {parent_ids:?} of {parent_split_count}"
    )]
    NotNested {
        split_count: usize,
        split_id: usize,
        parent_split_count: usize,
        parent_ids: Vec<usize>,
    },
    #[error("missing directory {path}")]
    MissingDirectory { path: PathBuf },
    #[error("invalid number of files for {path}: {found} instead of {expected}")]
    FileCount {
        path: PathBuf,
        expected: usize,
        found: usize,
    },
    #[error("missing file: {path}")]
    MissingFile { path: PathBuf },
    #[error("cannot read audio {path}: {reason}")]
    UnreadableAudio { path: PathBuf, reason: String },
    #[error("{path} lasts {found:.3}s, its segment {expected:.3}s")]
    AudioDuration {
        path: PathBuf,
        expected: f64,
        found: f64,
    },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VerificationReport {
    pub segments: usize,
    pub levels_checked: Vec<usize>,
    pub files_checked: usize,
    pub violations: Vec<Violation>,
}

impl VerificationReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    fn push(&mut self, violation: Violation) {
        error!("{violation}");
        self.violations.push(violation);
    }

    pub fn write_json(&self, path: &Path) -> std::io::Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }
}

struct Checker<'a> {
    config: &'a VerifyConfig,
    canonical: &'a SegmentTable,
    folder_column: Option<usize>,
    rng: StdRng,
    report: VerificationReport,
}

/// Runs every check the configuration allows. Only an invalid configuration or an unreadable
/// canonical table is an error; everything else ends up in the report.
pub fn verify(config: &VerifyConfig) -> Result<VerificationReport> {
    config.validate()?;
    let canonical = SegmentTable::read_csv(&config.segment_csv)?;

    let checks_folders = config.full_dir.is_some() || config.partition_root.is_some();
    let folder_column = canonical.column_index(config.hierarchy.column());
    if checks_folders && folder_column.is_none() {
        return Err(PartitionError::Table(TableError::MissingColumn {
            path: config.segment_csv.clone(),
            column: config.hierarchy.column().to_string(),
        }));
    }

    let mut checker = Checker {
        config,
        canonical: &canonical,
        folder_column,
        rng: StdRng::seed_from_u64(config.seed),
        report: VerificationReport {
            segments: canonical.len(),
            ..Default::default()
        },
    };

    if let Some(full_dir) = &config.full_dir {
        info!("Checking full");
        let all: Vec<&Segment> = canonical.segments().iter().collect();
        checker.check_directory(&all, full_dir);
    }

    let levels = checker.read_levels();
    for level in &levels {
        info!("Checking for {} splits", level.split_count);
        checker.check_level(level);
    }
    for pair in levels.windows(2) {
        checker.check_nesting(&pair[0], &pair[1]);
    }
    if let Some(root) = &config.partition_root {
        for level in &levels {
            checker.check_partition_directories(level, root);
        }
    }

    let report = checker.report;
    if report.is_clean() {
        info!(
            levels = report.levels_checked.len(),
            files = report.files_checked,
            "verification passed"
        );
    } else {
        warn!(
            violations = report.violations.len(),
            "verification found problems"
        );
    }
    Ok(report)
}

impl Checker<'_> {
    fn read_levels(&mut self) -> Vec<LevelTable> {
        let config = self.config;
        let expected: Option<BTreeSet<usize>> =
            config.path.as_ref().map(|p| p.split_counts().into_iter().collect());

        let paths = if config.table_dir.is_dir() {
            match level_paths(&config.table_dir, config.format) {
                Ok(paths) => paths,
                Err(e) => {
                    self.push(Violation::UnreadableTable {
                        path: config.table_dir.clone(),
                        reason: e.to_string(),
                    });
                    Vec::new()
                }
            }
        } else {
            info!("no level tables under {}", config.table_dir.display());
            Vec::new()
        };

        let mut levels = Vec::new();
        let mut found = BTreeSet::new();
        for path in paths {
            let Some(split_count) = split_count_of(&path) else {
                self.push(Violation::BadLevelName { path });
                continue;
            };
            found.insert(split_count);
            if let Some(expected) = &expected {
                if !expected.contains(&split_count) {
                    self.push(Violation::UnexpectedLevel { split_count });
                }
            }
            match LevelTable::read(&path, split_count, config.format) {
                Ok(level) => levels.push(level),
                Err(e) => self.push(Violation::UnreadableTable {
                    path,
                    reason: e.to_string(),
                }),
            }
        }
        if let Some(expected) = expected {
            for split_count in expected.difference(&found) {
                self.push(Violation::MissingLevel {
                    split_count: *split_count,
                });
            }
        }
        levels
    }

    fn check_level(&mut self, level: &LevelTable) {
        let canonical = self.canonical;
        let split_count = level.split_count;
        self.report.levels_checked.push(split_count);
        let segments = level.table.segments();

        if segments.len() != canonical.len() {
            self.push(Violation::RowCount {
                split_count,
                expected: canonical.len(),
                found: segments.len(),
            });
        }

        let distinct: BTreeSet<usize> = level.split_ids.iter().copied().collect();
        for &split_id in distinct.range(split_count..) {
            self.push(Violation::SplitIdOutOfRange {
                split_count,
                split_id,
            });
        }
        if distinct.len() != split_count {
            self.push(Violation::SplitCount {
                split_count,
                found: distinct.len(),
            });
        }

        // Partition of unity against the canonical table.
        let known: HashSet<&str> = canonical
            .segments()
            .iter()
            .map(|s| s.seg_id.as_str())
            .collect();
        let mut counts: HashMap<&str, usize> = HashMap::with_capacity(segments.len());
        for segment in segments {
            *counts.entry(segment.seg_id.as_str()).or_default() += 1;
        }
        let mut reported = HashSet::new();
        for segment in segments {
            let seg_id = segment.seg_id.as_str();
            if !reported.insert(seg_id) {
                continue;
            }
            if !known.contains(seg_id) {
                self.push(Violation::UnknownSegment {
                    split_count,
                    seg_id: seg_id.to_string(),
                });
            }
            let count = counts[seg_id];
            if count > 1 {
                self.push(Violation::DuplicateSegment {
                    split_count,
                    seg_id: seg_id.to_string(),
                    count,
                });
            }
        }
        for segment in canonical.segments() {
            if !counts.contains_key(segment.seg_id.as_str()) {
                self.push(Violation::MissingSegment {
                    split_count,
                    seg_id: segment.seg_id.clone(),
                });
            }
        }

        // Group atomicity.
        let mut splits_of_group: BTreeMap<&str, BTreeSet<usize>> = BTreeMap::new();
        for (segment, &split_id) in segments.iter().zip(&level.split_ids) {
            splits_of_group
                .entry(segment.group(self.config.groupby))
                .or_default()
                .insert(split_id);
        }
        for (group, split_ids) in splits_of_group {
            if split_ids.len() > 1 {
                self.push(Violation::GroupSplit {
                    split_count,
                    group: group.to_string(),
                    split_ids: split_ids.into_iter().collect(),
                });
            }
        }

        // Duration conservation.
        let expected = canonical.total_duration();
        let found = level.table.total_duration();
        if (expected - found).abs() > self.config.duration_tolerance * expected.abs().max(1.0) {
            self.push(Violation::DurationDrift {
                split_count,
                expected,
                found,
            });
        }
    }

    /// Every split of `child` must draw all its segments from a single split of `parent`.
    fn check_nesting(&mut self, parent: &LevelTable, child: &LevelTable) {
        let parent_of: HashMap<&str, usize> = parent
            .table
            .segments()
            .iter()
            .zip(&parent.split_ids)
            .map(|(s, &id)| (s.seg_id.as_str(), id))
            .collect();

        let mut parents: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();
        for (segment, &split_id) in child.table.segments().iter().zip(&child.split_ids) {
            if let Some(&parent_id) = parent_of.get(segment.seg_id.as_str()) {
                parents.entry(split_id).or_default().insert(parent_id);
            }
        }
        for (split_id, parent_ids) in parents {
            if parent_ids.len() > 1 {
                self.push(Violation::NotNested {
                    split_count: child.split_count,
                    split_id,
                    parent_split_count: parent.split_count,
                    parent_ids: parent_ids.into_iter().collect(),
                });
            }
        }
    }

    fn check_partition_directories(&mut self, level: &LevelTable, root: &Path) {
        let level_dir = root.join(level.split_count.to_string());
        if !level_dir.is_dir() {
            self.push(Violation::MissingDirectory { path: level_dir });
            return;
        }
        let mut by_split: BTreeMap<usize, Vec<&Segment>> = BTreeMap::new();
        for (segment, &split_id) in level.table.segments().iter().zip(&level.split_ids) {
            by_split.entry(split_id).or_default().push(segment);
        }
        for split_id in 0..level.split_count {
            let folder = level_dir.join(split_id.to_string());
            if !folder.is_dir() {
                self.push(Violation::MissingDirectory { path: folder });
                continue;
            }
            let members = by_split.remove(&split_id).unwrap_or_default();
            self.check_directory(&members, &folder);
        }
    }

    /// File count over the whole folder, then existence (and optionally the wav header) of a
    /// sampled fraction of the segments.
    fn check_directory(&mut self, segments: &[&Segment], folder: &Path) {
        let found = count_audio_files(folder);
        if found != segments.len() {
            self.push(Violation::FileCount {
                path: folder.to_path_buf(),
                expected: segments.len(),
                found,
            });
            return;
        }

        let Some(column) = self.folder_column else {
            return;
        };
        let amount = ((segments.len() as f64 * self.config.fraction).round() as usize).min(segments.len());
        for i in index::sample(&mut self.rng, segments.len(), amount) {
            let segment = segments[i];
            let sub_folder = segment.field(column).unwrap_or_default();
            let path = segment_audio_path(folder, sub_folder, &segment.seg_id);
            self.report.files_checked += 1;
            if !path.is_file() {
                self.push(Violation::MissingFile { path });
                continue;
            }
            if self.config.check_audio {
                self.check_audio(&path, segment.duration());
            }
        }
    }

    fn check_audio(&mut self, path: &Path, expected: f64) {
        match hound::WavReader::open(path) {
            Ok(reader) => {
                let spec = reader.spec();
                let found = reader.duration() as f64 / spec.sample_rate as f64;
                if (found - expected).abs() > self.config.audio_tolerance {
                    self.push(Violation::AudioDuration {
                        path: path.to_path_buf(),
                        expected,
                        found,
                    });
                }
            }
            Err(e) => self.push(Violation::UnreadableAudio {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }),
        }
    }

    fn push(&mut self, violation: Violation) {
        self.report.push(violation);
    }
}

fn count_audio_files(folder: &Path) -> usize {
    let pattern = format!(
        "{}/**/*.{}",
        glob::Pattern::escape(&folder.to_string_lossy()),
        AUDIO_EXTENSION
    );
    match glob::glob(&pattern) {
        Ok(paths) => paths.filter_map(|p| p.ok()).filter(|p| p.is_file()).count(),
        Err(e) => {
            warn!("cannot list {}: {e}", folder.display());
            0
        }
    }
}
