mod common;

use std::collections::{HashMap, HashSet};
use std::fs;

use corpus_split::table::LevelTable;
use corpus_split::{
    GroupOrder, GroupbyKey, HierarchyPath, PartitionConfig, PartitionError, PartitionLevel,
    SegmentTable, TableError, TableFormat, build_hierarchy, create_partitions,
};

const KEYS: [GroupbyKey; 3] = [GroupbyKey::Segment, GroupbyKey::File, GroupbyKey::Speaker];
const ORDERS: [GroupOrder; 3] = [GroupOrder::Key, GroupOrder::FirstSeen, GroupOrder::LongestFirst];

fn check_level(table: &SegmentTable, level: &PartitionLevel, key: GroupbyKey) {
    let segments = table.segments();

    // Partition of unity.
    let mut seen = vec![0usize; table.len()];
    for partition in &level.partitions {
        for &idx in &partition.members {
            seen[idx] += 1;
        }
    }
    assert!(seen.iter().all(|&n| n == 1), "level {}", level.split_count);

    // Group atomicity.
    let mut owner: HashMap<&str, usize> = HashMap::new();
    for partition in &level.partitions {
        for &idx in &partition.members {
            let group = segments[idx].group(key);
            let previous = *owner.entry(group).or_insert(partition.split_id);
            assert_eq!(previous, partition.split_id, "group {group} split at level {}", level.split_count);
        }
    }

    // Duration conservation.
    assert!((level.total_duration() - table.total_duration()).abs() < 1e-9);
}

#[test]
fn test_invariants_hold_at_every_level() {
    let table = common::table(1200, 40, 150);
    let path = HierarchyPath::default();

    for key in KEYS {
        for order in ORDERS {
            let levels = build_hierarchy(&table, &path, key, order, 3);
            assert_eq!(
                levels.iter().map(|l| l.split_count).collect::<Vec<_>>(),
                vec![5, 25, 125, 500]
            );
            for level in &levels {
                assert_eq!(level.partitions.len(), level.split_count);
                check_level(&table, level, key);
            }
        }
    }
}

#[test]
fn test_levels_are_nested() {
    let table = common::table(600, 30, 90);
    let path = HierarchyPath::new(vec![3, 4, 2]).unwrap();
    let levels = build_hierarchy(&table, &path, GroupbyKey::File, GroupOrder::Key, 11);

    for pair in levels.windows(2) {
        let (parent, child) = (&pair[0], &pair[1]);
        for partition in &child.partitions {
            let parent_id = partition.parent_id.unwrap();
            let parent_members: HashSet<usize> =
                parent.partitions[parent_id].members.iter().copied().collect();
            assert!(partition.members.iter().all(|m| parent_members.contains(m)));
        }
    }
}

#[test]
fn test_greedy_bound_holds_for_every_split() {
    let table = common::table(900, 45, 120);
    let segments = table.segments();
    let path = HierarchyPath::new(vec![5, 5, 3]).unwrap();

    for key in KEYS {
        let levels = build_hierarchy(&table, &path, key, GroupOrder::Key, 0);
        let mut parents = vec![(0..table.len()).collect::<Vec<_>>()];
        for level in &levels {
            let k = level.split_factor;
            for (parent_id, parent) in parents.iter().enumerate() {
                let mut groups: HashMap<&str, f64> = HashMap::new();
                for &idx in parent {
                    *groups.entry(segments[idx].group(key)).or_default() += segments[idx].duration();
                }
                let total: f64 = groups.values().sum();
                let largest = groups.values().cloned().fold(0.0, f64::max);
                let children = &level.partitions[parent_id * k..(parent_id + 1) * k];
                for child in children {
                    assert!(child.total_duration <= total / k as f64 + largest + 1e-9);
                }
            }
            parents = level.partitions.iter().map(|p| p.members.clone()).collect();
        }
    }
}

#[test]
fn test_more_partitions_than_speakers_leaves_some_empty() {
    let table = common::table(50, 4, 10);
    let path = HierarchyPath::new(vec![3, 3]).unwrap();
    let levels = build_hierarchy(&table, &path, GroupbyKey::Speaker, GroupOrder::Key, 0);
    let last = levels.last().unwrap();
    assert_eq!(last.partitions.len(), 9);
    assert_eq!(last.partitions.iter().filter(|p| !p.is_empty()).count(), 4);
    check_level(&table, last, GroupbyKey::Speaker);
}

#[test]
fn test_rerun_writes_identical_tables() {
    let corpus = common::write_corpus(300, 12, 40, false);
    let first_dir = corpus.dir.path().join("first");
    let second_dir = corpus.dir.path().join("second");
    let other_seed_dir = corpus.dir.path().join("other");

    let mut config = PartitionConfig::new(&corpus.segment_csv, GroupbyKey::Segment);
    config.table_dir = first_dir.clone();
    create_partitions(&config).unwrap();
    config.table_dir = second_dir.clone();
    create_partitions(&config).unwrap();
    config.table_dir = other_seed_dir.clone();
    config.seed = 1;
    create_partitions(&config).unwrap();

    for split_count in [5, 25, 125, 500] {
        let name = format!("{split_count}.csv");
        let first = fs::read(first_dir.join(&name)).unwrap();
        let second = fs::read(second_dir.join(&name)).unwrap();
        assert_eq!(first, second, "{name}");
    }
    // The seed only reorders segments within a partition, which shows on the coarse levels.
    assert_ne!(
        fs::read(first_dir.join("5.csv")).unwrap(),
        fs::read(other_seed_dir.join("5.csv")).unwrap()
    );
}

#[test]
fn test_level_table_layout() {
    let corpus = common::write_corpus(60, 6, 12, false);
    let mut config = PartitionConfig::new(&corpus.segment_csv, GroupbyKey::Speaker);
    config.path = HierarchyPath::new(vec![2, 3]).unwrap();
    let summaries = create_partitions(&config).unwrap();

    assert_eq!(summaries.len(), 2);
    let table_dir = corpus.dir.path().join("data").join("speaker_id");
    assert_eq!(summaries[0].csv, table_dir.join("2.csv"));

    let (header, rows) = common::read_rows(&table_dir.join("6.csv"));
    assert_eq!(
        header,
        ["seg_id", "talk_id", "speaker_id", "start", "end", "lang_id", "duration", "split_id"]
    );
    assert_eq!(rows.len(), 60);
    let split_ids: Vec<usize> = rows.iter().map(|r| r[7].parse().unwrap()).collect();
    assert!(split_ids.windows(2).all(|w| w[0] <= w[1]));
    for row in &rows {
        let start: f64 = row[3].parse().unwrap();
        let end: f64 = row[4].parse().unwrap();
        let duration: f64 = row[6].parse().unwrap();
        assert_eq!(duration, end - start);
    }
}

#[test]
fn test_parquet_tables_match_csv() {
    let corpus = common::write_corpus(80, 8, 16, false);
    let mut config = PartitionConfig::new(&corpus.segment_csv, GroupbyKey::File);
    config.path = HierarchyPath::new(vec![4, 2]).unwrap();
    config.write_parquet = true;
    let summaries = create_partitions(&config).unwrap();

    for summary in summaries {
        let parquet = summary.parquet.expect("parquet table");
        let from_csv = LevelTable::read(&summary.csv, summary.split_count, TableFormat::Csv).unwrap();
        let from_parquet = LevelTable::read(&parquet, summary.split_count, TableFormat::Parquet).unwrap();
        assert_eq!(from_csv.split_ids, from_parquet.split_ids);
        assert_eq!(from_csv.table.header(), from_parquet.table.header());
        let ids = |t: &LevelTable| t.table.segments().iter().map(|s| s.seg_id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&from_csv), ids(&from_parquet));
    }
}

#[test]
fn test_invalid_table_fails_before_writing() {
    let corpus = common::write_corpus(10, 2, 2, false);
    let (header, mut rows) = common::read_rows(&corpus.segment_csv);
    rows[3][4] = "0".to_string();
    common::write_rows(&corpus.segment_csv, &header, &rows);

    let config = PartitionConfig::new(&corpus.segment_csv, GroupbyKey::Segment);
    let err = create_partitions(&config).unwrap_err();
    assert!(matches!(err, PartitionError::Table(TableError::InvalidRow { row: 4, .. })));
    assert!(!config.table_dir.exists());
}

#[test]
fn test_unknown_groupby_key_is_a_config_error() {
    let err = "lang_id".parse::<GroupbyKey>().unwrap_err();
    assert!(err.to_string().contains("lang_id"));
    assert!(HierarchyPath::new(vec![5, 1]).is_err());
}
