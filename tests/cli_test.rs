mod common;

use std::process::{Command, Output};

use corpus_split::{GroupbyKey, HierarchyPath, PartitionConfig, create_partitions};

fn run(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_corpus-split"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

fn verify_args(csv: &str, strict: bool) -> Vec<&str> {
    let mut args = vec!["--no-progress", "verify", csv, "--groupby", "speaker_id", "--factors", "2,3"];
    if strict {
        args.push("--strict");
    }
    args
}

#[test]
fn test_strict_verify_fails_on_tampered_table() {
    let corpus = common::write_corpus(60, 6, 15, false);
    let mut config = PartitionConfig::new(&corpus.segment_csv, GroupbyKey::Speaker);
    config.path = HierarchyPath::new(vec![2, 3]).unwrap();
    create_partitions(&config).unwrap();
    let csv = corpus.segment_csv.to_string_lossy().into_owned();

    assert!(run(&verify_args(&csv, true)).status.success());

    let level = config.table_dir.join("6.csv");
    let (header, mut rows) = common::read_rows(&level);
    rows.pop();
    common::write_rows(&level, &header, &rows);

    let lenient = run(&verify_args(&csv, false));
    assert!(lenient.status.success());
    assert!(String::from_utf8_lossy(&lenient.stdout).contains("violations"));

    let strict = run(&verify_args(&csv, true));
    assert!(!strict.status.success());
    assert_eq!(strict.status.code(), Some(1));
}

#[test]
fn test_partition_rejects_factor_of_one() {
    let corpus = common::write_corpus(10, 2, 2, false);
    let csv = corpus.segment_csv.to_string_lossy().into_owned();
    let output = run(&["--no-progress", "partition", &csv, "--factors", "5,1"]);
    assert!(!output.status.success());
    assert!(!corpus.dir.path().join("data").join("seg_id").exists());
}
