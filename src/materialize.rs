//! Per-partition directory trees for the training code.
//!
//! Each partition of a level gets `{output_root}/{split_count}/{split_id}/`, laid out like the
//! full set: `{speaker_id}/{seg_id}.wav`. With speaker grouping and symlinks a whole speaker
//! directory is linked at once, otherwise every segment file is linked (or copied) on its own.
//!
//! Partitions are independent once assigned, so they are written in parallel on a rayon pool.
//! A missing source file never stops the run; it is logged and returned in the report so that
//! a later verification pass can point at the gap.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use rayon::ThreadPool;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{AUDIO_EXTENSION, AudioLayout, LinkMode};
use crate::error::{PartitionError, Result};
use crate::hierarchy::{Partition, PartitionLevel};
use crate::segment::{GroupbyKey, Segment, SegmentTable};

/// A segment (or speaker directory) that could not be linked into its partition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkIssue {
    pub split_id: usize,
    /// `None` when a whole directory was concerned.
    pub seg_id: Option<String>,
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MaterializeReport {
    pub split_count: usize,
    pub linked: usize,
    pub issues: Vec<LinkIssue>,
}

impl MaterializeReport {
    pub fn is_complete(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Where a segment's audio lives below a speaker-organized root.
pub fn segment_audio_path(root: &Path, folder: &str, seg_id: &str) -> PathBuf {
    root.join(folder).join(format!("{seg_id}.{AUDIO_EXTENSION}"))
}

#[cfg(unix)]
fn symlink(src: &Path, dst: &Path, _is_dir: bool) -> io::Result<()> {
    std::os::unix::fs::symlink(src, dst)
}

#[cfg(windows)]
fn symlink(src: &Path, dst: &Path, is_dir: bool) -> io::Result<()> {
    if is_dir {
        std::os::windows::fs::symlink_dir(src, dst)
    } else {
        std::os::windows::fs::symlink_file(src, dst)
    }
}

fn place_file(src: &Path, dst: &Path, mode: LinkMode) -> io::Result<()> {
    match mode {
        LinkMode::Symlink => symlink(src, dst, false),
        LinkMode::Copy => fs::copy(src, dst).map(|_| ()),
    }
}

/// Writes the directory tree of every partition in `level`. An existing tree for the same
/// split count is replaced, which keeps re-runs idempotent.
pub fn materialize_level(
    table: &SegmentTable,
    level: &PartitionLevel,
    groupby: GroupbyKey,
    layout: &AudioLayout,
    pool: &ThreadPool,
    show_progress: bool,
) -> Result<MaterializeReport> {
    let level_dir = layout.output_root.join(level.split_count.to_string());
    let io_error = |source| PartitionError::Io {
        path: level_dir.clone(),
        source,
    };
    if level_dir.exists() {
        fs::remove_dir_all(&level_dir).map_err(io_error)?;
    }
    fs::create_dir_all(&level_dir).map_err(io_error)?;

    // Links point at absolute paths.
    let source_root = fs::canonicalize(&layout.full_dir).unwrap_or_else(|_| layout.full_dir.clone());

    let pb = if show_progress {
        ProgressBar::new(level.partitions.len() as u64)
    } else {
        ProgressBar::hidden()
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} {prefix:20.bold.dim} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("#>-"),
    );
    pb.set_prefix(format!("Linking {} splits", level.split_count));

    let outcomes: Vec<(usize, Vec<LinkIssue>)> = pool.install(|| {
        level
            .partitions
            .par_iter()
            .progress_with(pb)
            .map(|partition| {
                let destination = level_dir.join(partition.split_id.to_string());
                materialize_partition(table, partition, groupby, layout.link_mode, &source_root, &destination)
            })
            .collect()
    });

    let mut report = MaterializeReport {
        split_count: level.split_count,
        ..Default::default()
    };
    for (linked, issues) in outcomes {
        report.linked += linked;
        report.issues.extend(issues);
    }
    for issue in &report.issues {
        warn!(
            split_count = level.split_count,
            split_id = issue.split_id,
            seg_id = issue.seg_id.as_deref().unwrap_or("-"),
            path = %issue.path.display(),
            "{}",
            issue.reason
        );
    }
    info!(
        split_count = level.split_count,
        linked = report.linked,
        issues = report.issues.len(),
        "materialized partitions under {}",
        level_dir.display()
    );
    Ok(report)
}

fn materialize_partition(
    table: &SegmentTable,
    partition: &Partition,
    groupby: GroupbyKey,
    mode: LinkMode,
    source_root: &Path,
    destination: &Path,
) -> (usize, Vec<LinkIssue>) {
    let mut issues = Vec::new();
    let issue = |seg_id: Option<&str>, path: &Path, reason: String| LinkIssue {
        split_id: partition.split_id,
        seg_id: seg_id.map(String::from),
        path: path.to_path_buf(),
        reason,
    };

    if let Err(e) = fs::create_dir(destination) {
        issues.push(issue(None, destination, format!("cannot create partition directory: {e}")));
        return (0, issues);
    }

    let mut by_speaker: BTreeMap<&str, Vec<&Segment>> = BTreeMap::new();
    for &idx in &partition.members {
        let segment = &table.segments()[idx];
        by_speaker.entry(&segment.speaker_id).or_default().push(segment);
    }

    let mut linked = 0;
    for (speaker, segments) in by_speaker {
        let source_dir = source_root.join(speaker);
        let target_dir = destination.join(speaker);

        if groupby == GroupbyKey::Speaker && mode == LinkMode::Symlink {
            if !source_dir.is_dir() {
                issues.push(issue(None, &source_dir, "missing speaker directory".to_string()));
                continue;
            }
            if let Err(e) = symlink(&source_dir, &target_dir, true) {
                issues.push(issue(None, &target_dir, format!("cannot link speaker directory: {e}")));
                continue;
            }
            for segment in segments {
                let src = segment_audio_path(source_root, speaker, &segment.seg_id);
                if src.is_file() {
                    linked += 1;
                } else {
                    issues.push(issue(Some(&segment.seg_id), &src, "missing source audio".to_string()));
                }
            }
            continue;
        }

        if let Err(e) = fs::create_dir(&target_dir) {
            issues.push(issue(None, &target_dir, format!("cannot create speaker directory: {e}")));
            continue;
        }
        for segment in segments {
            let src = segment_audio_path(source_root, speaker, &segment.seg_id);
            if !src.is_file() {
                issues.push(issue(Some(&segment.seg_id), &src, "missing source audio".to_string()));
                continue;
            }
            let dst = segment_audio_path(destination, speaker, &segment.seg_id);
            match place_file(&src, &dst, mode) {
                Ok(()) => linked += 1,
                Err(e) => issues.push(issue(Some(&segment.seg_id), &dst, format!("cannot place audio: {e}"))),
            }
        }
    }
    (linked, issues)
}
