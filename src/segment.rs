//! Typed speech segments and the table they are loaded from.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use csv::ReaderBuilder;

use crate::config::GROUPBY_ALIASES;
use crate::error::{ConfigError, TableError};

pub const SEG_ID: &str = "seg_id";
pub const TALK_ID: &str = "talk_id";
pub const SPEAKER_ID: &str = "speaker_id";
pub const START: &str = "start";
pub const END: &str = "end";

pub const REQUIRED_COLUMNS: [&str; 5] = [SEG_ID, TALK_ID, SPEAKER_ID, START, END];

/// The granularity at which segments are kept together while splitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupbyKey {
    Segment,
    File,
    Speaker,
}

impl GroupbyKey {
    pub fn column(self) -> &'static str {
        match self {
            GroupbyKey::Segment => SEG_ID,
            GroupbyKey::File => TALK_ID,
            GroupbyKey::Speaker => SPEAKER_ID,
        }
    }
}

impl FromStr for GroupbyKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GROUPBY_ALIASES
            .get(s.trim().to_ascii_lowercase().as_str())
            .copied()
            .ok_or_else(|| ConfigError::UnknownGroupbyKey(s.to_string()))
    }
}

impl fmt::Display for GroupbyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub seg_id: String,
    pub talk_id: String,
    pub speaker_id: String,
    pub start: f64,
    pub end: f64,
    // The raw row, in the table's column order.
    fields: Vec<String>,
}

impl Segment {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn group(&self, key: GroupbyKey) -> &str {
        match key {
            GroupbyKey::Segment => &self.seg_id,
            GroupbyKey::File => &self.talk_id,
            GroupbyKey::Speaker => &self.speaker_id,
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }
}

/// Segments in input order, plus the header they were read with.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentTable {
    header: Vec<String>,
    segments: Vec<Segment>,
}

/// A single, non-empty path component that stays inside its parent directory.
fn is_path_component(value: &str) -> bool {
    !value.is_empty() && value != "." && value != ".." && !value.contains(['/', '\\', '\0'])
}

impl SegmentTable {
    pub fn read_csv(path: &Path) -> Result<Self, TableError> {
        let (header, rows) = read_csv_rows(path)?;
        Self::from_rows(path, header, rows)
    }

    /// Builds a table from raw string rows. Fails on a missing column, an unparsable or
    /// negative time span, a `seg_id` or `speaker_id` that cannot be a file name, or a
    /// repeated `seg_id`.
    pub fn from_rows(
        path: &Path,
        header: Vec<String>,
        rows: impl IntoIterator<Item = Vec<String>>,
    ) -> Result<Self, TableError> {
        let table = Self::parse(path, header, rows)?;
        let mut seen = HashSet::with_capacity(table.segments.len());
        for segment in &table.segments {
            if !seen.insert(segment.seg_id.as_str()) {
                return Err(TableError::DuplicateSegment {
                    path: path.to_path_buf(),
                    seg_id: segment.seg_id.clone(),
                });
            }
        }
        Ok(table)
    }

    /// Like [`SegmentTable::from_rows`] without the uniqueness check. Persisted level tables are
    /// read this way so that duplicates can be reported rather than rejected.
    pub(crate) fn parse(
        path: &Path,
        header: Vec<String>,
        rows: impl IntoIterator<Item = Vec<String>>,
    ) -> Result<Self, TableError> {
        let index = |column: &str| {
            header
                .iter()
                .position(|h| h == column)
                .ok_or_else(|| TableError::MissingColumn {
                    path: path.to_path_buf(),
                    column: column.to_string(),
                })
        };
        let [seg_idx, talk_idx, speaker_idx, start_idx, end_idx] = [
            index(SEG_ID)?,
            index(TALK_ID)?,
            index(SPEAKER_ID)?,
            index(START)?,
            index(END)?,
        ];

        let invalid = |row: usize, message: String| TableError::InvalidRow {
            path: path.to_path_buf(),
            row,
            message,
        };

        let mut segments = Vec::new();
        for (i, fields) in rows.into_iter().enumerate() {
            let row = i + 1;
            if fields.len() != header.len() {
                return Err(invalid(
                    row,
                    format!("expected {} fields, found {}", header.len(), fields.len()),
                ));
            }
            let time = |idx: usize, name: &str| -> Result<f64, TableError> {
                let raw = fields[idx].trim();
                match raw.parse::<f64>() {
                    Ok(value) if value.is_finite() => Ok(value),
                    _ => Err(invalid(row, format!("invalid {name} '{raw}'"))),
                }
            };
            let start = time(start_idx, START)?;
            let end = time(end_idx, END)?;
            if end < start {
                return Err(invalid(row, format!("end {end} is before start {start}")));
            }
            // Both ids become path components of the audio trees.
            for (idx, name) in [(seg_idx, SEG_ID), (speaker_idx, SPEAKER_ID)] {
                if !is_path_component(&fields[idx]) {
                    return Err(invalid(row, format!("{name} '{}' is not a valid file name", fields[idx])));
                }
            }
            segments.push(Segment {
                seg_id: fields[seg_idx].clone(),
                talk_id: fields[talk_idx].clone(),
                speaker_id: fields[speaker_idx].clone(),
                start,
                end,
                fields,
            });
        }
        Ok(Self { header, segments })
    }

    /// A table with only the required columns, mostly useful for synthetic corpora.
    pub fn from_spans<'a>(
        spans: impl IntoIterator<Item = (&'a str, &'a str, &'a str, f64, f64)>,
    ) -> Result<Self, TableError> {
        let header = REQUIRED_COLUMNS.iter().map(|c| c.to_string()).collect();
        let rows = spans
            .into_iter()
            .map(|(seg, talk, speaker, start, end)| {
                vec![
                    seg.to_string(),
                    talk.to_string(),
                    speaker.to_string(),
                    start.to_string(),
                    end.to_string(),
                ]
            })
            .collect::<Vec<_>>();
        Self::from_rows(Path::new("<memory>"), header, rows)
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.header.iter().position(|h| h == column)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn total_duration(&self) -> f64 {
        self.segments.iter().map(Segment::duration).sum()
    }
}

pub(crate) fn read_csv_rows(path: &Path) -> Result<(Vec<String>, Vec<Vec<String>>), TableError> {
    let csv_error = |source: csv::Error| TableError::Csv {
        path: PathBuf::from(path),
        source,
    };
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(csv_error)?;
    let header = reader
        .headers()
        .map_err(csv_error)?
        .iter()
        .map(String::from)
        .collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_error)?;
        rows.push(record.iter().map(String::from).collect());
    }
    Ok((header, rows))
}
