//! Greedy balanced splitting of one partition into `split_factor` buckets.
//!
//! Segments are first aggregated by their group key, so a group can never end up in two
//! buckets. Groups are then handed out one by one to whichever bucket currently holds the
//! least audio. This is the usual greedy bound rather than an optimal packing: with total
//! duration `D`, `k` buckets and no group longer than `m`, the fullest bucket holds at most
//! `D / k + m`.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::config::GROUP_ORDER_ALIASES;
use crate::error::ConfigError;
use crate::segment::{GroupbyKey, Segment};

/// The order in which groups are handed to the greedy assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupOrder {
    /// Ascending group key, numeric when both keys are integers. Matches the sorted
    /// aggregation the existing partitions were produced with.
    #[default]
    Key,
    /// First appearance in the (shuffled) partition.
    FirstSeen,
    /// Longest group first, ties in first-appearance order.
    LongestFirst,
}

impl FromStr for GroupOrder {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GROUP_ORDER_ALIASES
            .get(s.trim().to_ascii_lowercase().as_str())
            .copied()
            .ok_or_else(|| ConfigError::UnknownGroupOrder(s.to_string()))
    }
}

impl fmt::Display for GroupOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GroupOrder::Key => "key",
            GroupOrder::FirstSeen => "first-seen",
            GroupOrder::LongestFirst => "longest-first",
        })
    }
}

/// One group key value and the summed duration of its segments.
#[derive(Debug, Clone, PartialEq)]
pub struct Group<'a> {
    pub key: &'a str,
    pub duration: f64,
}

/// Sums durations per group key over `members`, in first-appearance order.
pub fn aggregate_groups<'a>(
    segments: &'a [Segment],
    members: &[usize],
    key: GroupbyKey,
) -> Vec<Group<'a>> {
    let mut position: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<Group<'a>> = Vec::new();
    for &idx in members {
        let segment = &segments[idx];
        let value = segment.group(key);
        match position.get(value) {
            Some(&pos) => groups[pos].duration += segment.duration(),
            None => {
                position.insert(value, groups.len());
                groups.push(Group {
                    key: value,
                    duration: segment.duration(),
                });
            }
        }
    }
    groups
}

pub fn order_groups(groups: &mut [Group<'_>], order: GroupOrder) {
    match order {
        GroupOrder::Key => groups.sort_by(|a, b| compare_keys(a.key, b.key)),
        GroupOrder::FirstSeen => {}
        // Stable sort keeps first-appearance order among equal durations.
        GroupOrder::LongestFirst => groups.sort_by(|a, b| b.duration.total_cmp(&a.duration)),
    }
}

/// Integer keys first in numeric order, then every other key in lexicographic order.
fn compare_keys(a: &str, b: &str) -> Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Index of the lightest bucket, the first one on ties.
fn lightest(durations: &[f64]) -> usize {
    let mut best = 0;
    for (i, &d) in durations.iter().enumerate().skip(1) {
        if d < durations[best] {
            best = i;
        }
    }
    best
}

/// Splits `members` (indices into `segments`) into `split_factor` buckets of roughly equal
/// total duration. Every bucket keeps the relative order of `members`; buckets may be empty
/// when there are fewer groups than buckets.
pub fn greedy_split(
    segments: &[Segment],
    members: &[usize],
    split_factor: usize,
    key: GroupbyKey,
    order: GroupOrder,
) -> Vec<Vec<usize>> {
    debug_assert!(split_factor > 0);
    let mut groups = aggregate_groups(segments, members, key);
    order_groups(&mut groups, order);

    let mut durations = vec![0.0f64; split_factor];
    let mut bucket_of: HashMap<&str, usize> = HashMap::with_capacity(groups.len());
    for group in &groups {
        let bucket = lightest(&durations);
        durations[bucket] += group.duration;
        bucket_of.insert(group.key, bucket);
    }

    let mut buckets = vec![Vec::new(); split_factor];
    for &idx in members {
        let bucket = bucket_of[segments[idx].group(key)];
        buckets[bucket].push(idx);
    }
    buckets
}
