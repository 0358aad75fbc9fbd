//! Persisted level tables: `{split_count}.csv` and, optionally, `{split_count}.parquet`.
//!
//! A level table holds every column of the input table, the derived `duration` and the
//! `split_id` of the partition each segment belongs to. Partitions are written in `split_id`
//! order and segments in partition order, so the same hierarchy always produces the same bytes.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, RecordBatch, StringArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::util::display::array_value_to_string;
use csv::WriterBuilder;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use crate::config::TableFormat;
use crate::error::TableError;
use crate::hierarchy::PartitionLevel;
use crate::segment::{Segment, SegmentTable, read_csv_rows};

pub const DURATION: &str = "duration";
pub const SPLIT_ID: &str = "split_id";

/// Output header plus the positions of the `duration` and `split_id` columns in it. Both
/// are overwritten in place when the input already carries them, appended otherwise.
struct Layout {
    header: Vec<String>,
    duration: usize,
    split_id: usize,
}

impl Layout {
    fn new(input: &[String]) -> Self {
        let mut header = input.to_vec();
        let mut position = |name: &str| match header.iter().position(|h| h == name) {
            Some(pos) => pos,
            None => {
                header.push(name.to_string());
                header.len() - 1
            }
        };
        let duration = position(DURATION);
        let split_id = position(SPLIT_ID);
        Self {
            header,
            duration,
            split_id,
        }
    }

    fn row(&self, segment: &Segment, split_id: usize) -> Vec<String> {
        let mut row = segment.fields().to_vec();
        row.resize(self.header.len(), String::new());
        row[self.duration] = segment.duration().to_string();
        row[self.split_id] = split_id.to_string();
        row
    }
}

fn level_rows<'a>(
    table: &'a SegmentTable,
    level: &'a PartitionLevel,
) -> impl Iterator<Item = (&'a Segment, usize)> + 'a {
    level.partitions.iter().flat_map(move |partition| {
        partition
            .members
            .iter()
            .map(move |&idx| (&table.segments()[idx], partition.split_id))
    })
}

pub fn level_path(dir: &Path, split_count: usize, format: TableFormat) -> PathBuf {
    dir.join(format!("{}.{}", split_count, format.extension()))
}

/// Split count encoded in a level table's file stem, e.g. `125.csv`.
pub fn split_count_of(path: &Path) -> Option<usize> {
    path.file_stem()?.to_str()?.parse().ok()
}

// Write to a temporary name first, so a crash never leaves a truncated table behind.
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> TableError + '_ {
    move |source| TableError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub fn write_level_csv(
    table: &SegmentTable,
    level: &PartitionLevel,
    dir: &Path,
) -> Result<PathBuf, TableError> {
    let final_path = level_path(dir, level.split_count, TableFormat::Csv);
    let tmp = temp_path(&final_path);
    let csv_error = |source: csv::Error| TableError::Csv {
        path: tmp.clone(),
        source,
    };

    let layout = Layout::new(table.header());
    let mut writer = WriterBuilder::new().from_path(&tmp).map_err(csv_error)?;
    writer.write_record(&layout.header).map_err(csv_error)?;
    for (segment, split_id) in level_rows(table, level) {
        writer
            .write_record(layout.row(segment, split_id))
            .map_err(csv_error)?;
    }
    writer.flush().map_err(io_error(&tmp))?;
    drop(writer);

    fs::rename(&tmp, &final_path).map_err(io_error(&final_path))?;
    Ok(final_path)
}

pub fn write_level_parquet(
    table: &SegmentTable,
    level: &PartitionLevel,
    dir: &Path,
) -> Result<PathBuf, TableError> {
    let final_path = level_path(dir, level.split_count, TableFormat::Parquet);
    let tmp = temp_path(&final_path);
    let parquet_error = |source| TableError::Parquet {
        path: tmp.clone(),
        source,
    };

    let layout = Layout::new(table.header());
    let rows: Vec<(&Segment, usize)> = level_rows(table, level).collect();

    let mut fields = Vec::with_capacity(layout.header.len());
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(layout.header.len());
    for (col, name) in layout.header.iter().enumerate() {
        if col == layout.duration {
            fields.push(Field::new(name, DataType::Float64, false));
            columns.push(Arc::new(Float64Array::from_iter_values(
                rows.iter().map(|(s, _)| s.duration()),
            )));
        } else if col == layout.split_id {
            fields.push(Field::new(name, DataType::UInt64, false));
            columns.push(Arc::new(UInt64Array::from_iter_values(
                rows.iter().map(|&(_, id)| id as u64),
            )));
        } else {
            fields.push(Field::new(name, DataType::Utf8, false));
            columns.push(Arc::new(StringArray::from_iter_values(
                rows.iter().map(|(s, _)| s.field(col).unwrap_or_default()),
            )));
        }
    }
    let schema = Arc::new(Schema::new(fields));
    let batch = RecordBatch::try_new(schema.clone(), columns).map_err(|source| TableError::Arrow {
        path: final_path.clone(),
        source,
    })?;

    let file = File::create(&tmp).map_err(io_error(&tmp))?;
    let mut writer = ArrowWriter::try_new(file, schema, None).map_err(parquet_error)?;
    writer.write(&batch).map_err(parquet_error)?;
    writer.close().map_err(parquet_error)?;

    fs::rename(&tmp, &final_path).map_err(io_error(&final_path))?;
    Ok(final_path)
}

/// A level table read back from disk.
#[derive(Debug, Clone)]
pub struct LevelTable {
    pub path: PathBuf,
    pub split_count: usize,
    pub table: SegmentTable,
    /// One per segment, aligned with `table.segments()`.
    pub split_ids: Vec<usize>,
}

impl LevelTable {
    pub fn read(path: &Path, split_count: usize, format: TableFormat) -> Result<Self, TableError> {
        let (header, rows) = match format {
            TableFormat::Csv => read_csv_rows(path)?,
            TableFormat::Parquet => read_parquet_rows(path)?,
        };
        let table = SegmentTable::parse(path, header, rows)?;
        let split_col = table
            .column_index(SPLIT_ID)
            .ok_or_else(|| TableError::MissingColumn {
                path: path.to_path_buf(),
                column: SPLIT_ID.to_string(),
            })?;
        let split_ids = table
            .segments()
            .iter()
            .enumerate()
            .map(|(i, segment)| {
                let raw = segment.field(split_col).unwrap_or_default();
                raw.trim().parse::<usize>().map_err(|_| TableError::InvalidRow {
                    path: path.to_path_buf(),
                    row: i + 1,
                    message: format!("invalid {SPLIT_ID} '{raw}'"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            path: path.to_path_buf(),
            split_count,
            table,
            split_ids,
        })
    }
}

fn read_parquet_rows(path: &Path) -> Result<(Vec<String>, Vec<Vec<String>>), TableError> {
    let parquet_error = |source| TableError::Parquet {
        path: path.to_path_buf(),
        source,
    };
    let arrow_error = |source| TableError::Arrow {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(io_error(path))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(parquet_error)?;
    let header: Vec<String> = builder
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    let reader = builder.build().map_err(parquet_error)?;

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch.map_err(arrow_error)?;
        for i in 0..batch.num_rows() {
            let row = batch
                .columns()
                .iter()
                .map(|column| array_value_to_string(column.as_ref(), i))
                .collect::<Result<Vec<_>, _>>()
                .map_err(arrow_error)?;
            rows.push(row);
        }
    }
    Ok((header, rows))
}

/// Every level table of the given format in `dir`, by ascending split count. Files whose stem
/// is not a split count come last, in name order.
pub fn level_paths(dir: &Path, format: TableFormat) -> Result<Vec<PathBuf>, TableError> {
    let pattern = format!(
        "{}/*.{}",
        glob::Pattern::escape(&dir.to_string_lossy()),
        format.extension()
    );
    let mut paths: Vec<PathBuf> = glob::glob(&pattern)
        .map_err(|e| TableError::Io {
            path: dir.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidInput, e.to_string()),
        })?
        .collect::<Result<_, _>>()
        .map_err(|e| TableError::Io {
            path: e.path().to_path_buf(),
            source: e.into(),
        })?;
    paths.retain(|p| p.is_file());
    paths.sort_by_key(|p| (split_count_of(p).is_none(), split_count_of(p), p.clone()));
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_appends_missing_columns() {
        let header: Vec<String> = ["seg_id", "talk_id", "speaker_id", "start", "end"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let layout = Layout::new(&header);
        assert_eq!(layout.header.len(), 7);
        assert_eq!((layout.duration, layout.split_id), (5, 6));
    }

    #[test]
    fn test_layout_overwrites_existing_columns() {
        let header: Vec<String> = ["seg_id", "split_id", "talk_id", "speaker_id", "start", "end", "duration"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let layout = Layout::new(&header);
        assert_eq!(layout.header, header);
        assert_eq!((layout.duration, layout.split_id), (6, 1));
    }

    #[test]
    fn test_split_count_of() {
        assert_eq!(split_count_of(Path::new("/x/speaker_id/125.csv")), Some(125));
        assert_eq!(split_count_of(Path::new("/x/speaker_id/train.csv")), None);
    }

    #[test]
    fn test_level_paths_sorted_by_split_count() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["125.csv", "5.csv", "notes.csv", "25.csv", "25.parquet"] {
            std::fs::write(dir.path().join(name), "seg_id\n").unwrap();
        }
        std::fs::create_dir(dir.path().join("500.csv")).unwrap();

        let names: Vec<String> = level_paths(dir.path(), TableFormat::Csv)
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["5.csv", "25.csv", "125.csv", "notes.csv"]);
        assert!(level_paths(&dir.path().join("missing"), TableFormat::Csv).unwrap().is_empty());
    }
}
