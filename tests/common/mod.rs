#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use corpus_split::SegmentTable;
use hound::{SampleFormat, WavSpec, WavWriter};
use tempfile::TempDir;

pub const SAMPLE_RATE: u32 = 8000;

/// A small corpus on disk: `data/train_segments.csv` and `audio/full/{speaker}/{seg}.wav`.
pub struct Corpus {
    pub dir: TempDir,
    pub segment_csv: PathBuf,
    pub full_dir: PathBuf,
}

pub struct Row {
    pub seg_id: String,
    pub talk_id: String,
    pub speaker_id: String,
    pub start: f64,
    pub end: f64,
    pub lang_id: String,
}

/// Durations cycle through 0.25s steps between 0.25s and 2.25s, so every sum is exact.
pub fn rows(segments: usize, speakers: usize, talks: usize) -> Vec<Row> {
    let mut start = 0.0;
    (0..segments)
        .map(|i| {
            let duration = 0.25 * (1 + (i * 7) % 9) as f64;
            let speaker = i % speakers;
            let row = Row {
                seg_id: format!("seg{i:04}"),
                talk_id: format!("talk{:03}", i % talks),
                speaker_id: format!("spk{speaker:02}"),
                start,
                end: start + duration,
                lang_id: if speaker % 2 == 0 { "en" } else { "ja" }.to_string(),
            };
            start += duration;
            row
        })
        .collect()
}

pub fn table(segments: usize, speakers: usize, talks: usize) -> SegmentTable {
    let rows = rows(segments, speakers, talks);
    SegmentTable::from_spans(rows.iter().map(|r| {
        (
            r.seg_id.as_str(),
            r.talk_id.as_str(),
            r.speaker_id.as_str(),
            r.start,
            r.end,
        )
    }))
    .unwrap()
}

pub fn write_wav(path: &Path, seconds: f64) {
    let spec = WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec).unwrap();
    let samples = (seconds * SAMPLE_RATE as f64).round() as usize;
    for i in 0..samples {
        writer.write_sample(((i % 64) as i16 - 32) * 100).unwrap();
    }
    writer.finalize().unwrap();
}

pub fn write_corpus(segments: usize, speakers: usize, talks: usize, with_audio: bool) -> Corpus {
    let dir = TempDir::new().unwrap();
    let data_dir = dir.path().join("data");
    let full_dir = dir.path().join("audio").join("full");
    fs::create_dir_all(&data_dir).unwrap();
    fs::create_dir_all(&full_dir).unwrap();

    let segment_csv = data_dir.join("train_segments.csv");
    let mut writer = csv::Writer::from_path(&segment_csv).unwrap();
    writer
        .write_record(["seg_id", "talk_id", "speaker_id", "start", "end", "lang_id"])
        .unwrap();
    for row in rows(segments, speakers, talks) {
        writer
            .write_record([
                row.seg_id.clone(),
                row.talk_id.clone(),
                row.speaker_id.clone(),
                row.start.to_string(),
                row.end.to_string(),
                row.lang_id.clone(),
            ])
            .unwrap();
        if with_audio {
            let speaker_dir = full_dir.join(&row.speaker_id);
            fs::create_dir_all(&speaker_dir).unwrap();
            write_wav(&speaker_dir.join(format!("{}.wav", row.seg_id)), row.end - row.start);
        }
    }
    writer.flush().unwrap();

    Corpus {
        dir,
        segment_csv,
        full_dir,
    }
}

pub fn read_rows(path: &Path) -> (Vec<String>, Vec<Vec<String>>) {
    let mut reader = csv::Reader::from_path(path).unwrap();
    let header = reader.headers().unwrap().iter().map(String::from).collect();
    let rows = reader
        .records()
        .map(|r| r.unwrap().iter().map(String::from).collect())
        .collect();
    (header, rows)
}

pub fn write_rows(path: &Path, header: &[String], rows: &[Vec<String>]) {
    let mut writer = csv::Writer::from_path(path).unwrap();
    writer.write_record(header).unwrap();
    for row in rows {
        writer.write_record(row).unwrap();
    }
    writer.flush().unwrap();
}
