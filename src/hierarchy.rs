//! Builds the nested partition hierarchy and persists it level by level.
//!
//! The segment order is shuffled once with a seeded RNG. The full shuffled set is the single
//! partition at the top; each split factor then splits every partition of the previous level
//! with [`greedy_split`]. The `b`-th bucket of partition `p` becomes partition
//! `p * split_factor + b` of the new level, so levels are strictly nested and the output only
//! depends on the seed, the input order and the factors.

use std::fs;
use std::path::PathBuf;

use indicatif::{ProgressBar, ProgressStyle};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::ThreadPoolBuilder;
use tracing::{debug, info, warn};

use crate::config::{HierarchyPath, PartitionConfig};
use crate::error::{PartitionError, Result};
use crate::materialize::{MaterializeReport, materialize_level};
use crate::segment::{GroupbyKey, SegmentTable};
use crate::splitter::{GroupOrder, greedy_split};
use crate::table::{write_level_csv, write_level_parquet};

#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub split_id: usize,
    /// `split_id` of the partition this one was split from, `None` at the top.
    pub parent_id: Option<usize>,
    /// Indices into the segment table, in output order.
    pub members: Vec<usize>,
    pub total_duration: f64,
}

impl Partition {
    fn new(
        table: &SegmentTable,
        split_id: usize,
        parent_id: Option<usize>,
        members: Vec<usize>,
    ) -> Self {
        let total_duration = members
            .iter()
            .map(|&i| table.segments()[i].duration())
            .sum();
        Self {
            split_id,
            parent_id,
            members,
            total_duration,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartitionLevel {
    pub split_factor: usize,
    pub split_count: usize,
    pub partitions: Vec<Partition>,
}

impl PartitionLevel {
    pub fn total_duration(&self) -> f64 {
        self.partitions.iter().map(|p| p.total_duration).sum()
    }

    /// Largest minus smallest partition duration.
    pub fn spread(&self) -> f64 {
        let (min, max) = self
            .partitions
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
                (lo.min(p.total_duration), hi.max(p.total_duration))
            });
        if min.is_finite() { max - min } else { 0.0 }
    }

    pub fn empty_partitions(&self) -> usize {
        self.partitions.iter().filter(|p| p.is_empty()).count()
    }
}

/// Yields one [`PartitionLevel`] per split factor, top-down.
pub struct HierarchyBuilder<'a> {
    table: &'a SegmentTable,
    factors: Vec<usize>,
    groupby: GroupbyKey,
    order: GroupOrder,
    depth: usize,
    split_count: usize,
    current: Vec<Partition>,
}

impl<'a> HierarchyBuilder<'a> {
    pub fn new(
        table: &'a SegmentTable,
        path: &HierarchyPath,
        groupby: GroupbyKey,
        order: GroupOrder,
        seed: u64,
    ) -> Self {
        let mut members: Vec<usize> = (0..table.len()).collect();
        let mut rng = StdRng::seed_from_u64(seed);
        members.shuffle(&mut rng);

        Self {
            table,
            factors: path.factors().to_vec(),
            groupby,
            order,
            depth: 0,
            split_count: 1,
            current: vec![Partition::new(table, 0, None, members)],
        }
    }

    /// The single partition everything starts from: all segments, shuffled.
    pub fn root(&self) -> Option<&Partition> {
        if self.depth == 0 { self.current.first() } else { None }
    }
}

impl Iterator for HierarchyBuilder<'_> {
    type Item = PartitionLevel;

    fn next(&mut self) -> Option<Self::Item> {
        let split_factor = *self.factors.get(self.depth)?;
        self.depth += 1;
        self.split_count *= split_factor;

        let segments = self.table.segments();
        let mut partitions = Vec::with_capacity(self.current.len() * split_factor);
        for parent in &self.current {
            let buckets = greedy_split(
                segments,
                &parent.members,
                split_factor,
                self.groupby,
                self.order,
            );
            for members in buckets {
                let split_id = partitions.len();
                partitions.push(Partition::new(
                    self.table,
                    split_id,
                    Some(parent.split_id),
                    members,
                ));
            }
        }

        self.current = partitions.clone();
        Some(PartitionLevel {
            split_factor,
            split_count: self.split_count,
            partitions,
        })
    }
}

/// Every level of the hierarchy, in memory.
pub fn build_hierarchy(
    table: &SegmentTable,
    path: &HierarchyPath,
    groupby: GroupbyKey,
    order: GroupOrder,
    seed: u64,
) -> Vec<PartitionLevel> {
    HierarchyBuilder::new(table, path, groupby, order, seed).collect()
}

/// What one persisted level looks like.
#[derive(Debug, Clone)]
pub struct LevelSummary {
    pub split_count: usize,
    pub partitions: usize,
    pub empty_partitions: usize,
    pub spread: f64,
    pub csv: PathBuf,
    pub parquet: Option<PathBuf>,
    pub audio: Option<MaterializeReport>,
}

/// Loads the segment table, builds the hierarchy and persists every level as soon as it
/// exists. Configuration and table errors surface before anything is written; missing audio
/// only shows up in the per-level [`MaterializeReport`].
pub fn create_partitions(config: &PartitionConfig) -> Result<Vec<LevelSummary>> {
    config.validate()?;
    let table = SegmentTable::read_csv(&config.segment_csv)?;
    info!(
        segments = table.len(),
        total_duration = table.total_duration(),
        groupby = %config.groupby,
        order = %config.order,
        seed = config.seed,
        "loaded segment table from {}",
        config.segment_csv.display()
    );
    if table.is_empty() {
        warn!("segment table is empty, every partition will be empty");
    }

    let io_error = |path: &PathBuf| {
        let path = path.clone();
        move |source| PartitionError::Io { path, source }
    };
    fs::create_dir_all(&config.table_dir).map_err(io_error(&config.table_dir))?;
    let pool = match &config.audio {
        Some(audio) => {
            fs::create_dir_all(&audio.output_root).map_err(io_error(&audio.output_root))?;
            Some(ThreadPoolBuilder::new().num_threads(audio.num_threads).build()?)
        }
        None => None,
    };

    let pb = if config.show_progress {
        ProgressBar::new(config.path.factors().len() as u64)
    } else {
        ProgressBar::hidden()
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} {msg:30} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("#>-"),
    );

    let mut summaries = Vec::with_capacity(config.path.factors().len());
    let builder = HierarchyBuilder::new(
        &table,
        &config.path,
        config.groupby,
        config.order,
        config.seed,
    );
    for level in builder {
        pb.set_message(format!("Split in {} by {}", level.split_count, config.groupby));

        let csv = write_level_csv(&table, &level, &config.table_dir)?;
        debug!(path = %csv.display(), "wrote level table");
        let parquet = if config.write_parquet {
            Some(write_level_parquet(&table, &level, &config.table_dir)?)
        } else {
            None
        };
        let audio = match (&config.audio, &pool) {
            (Some(layout), Some(pool)) => Some(materialize_level(
                &table,
                &level,
                config.groupby,
                layout,
                pool,
                config.show_progress,
            )?),
            _ => None,
        };

        let summary = LevelSummary {
            split_count: level.split_count,
            partitions: level.partitions.len(),
            empty_partitions: level.empty_partitions(),
            spread: level.spread(),
            csv,
            parquet,
            audio,
        };
        if summary.empty_partitions > 0 {
            warn!(
                split_count = summary.split_count,
                empty = summary.empty_partitions,
                "fewer groups than partitions, some partitions are empty"
            );
        }
        info!(
            split_count = summary.split_count,
            partitions = summary.partitions,
            spread = summary.spread,
            "level done"
        );
        summaries.push(summary);
        pb.inc(1);
    }
    pb.finish_with_message("All levels written.");

    Ok(summaries)
}
