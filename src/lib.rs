//! Nested, duration-balanced training splits of a speech corpus.
//!
//! A segment table is split into 5 partitions, each of those into 5 more, and so on, keeping
//! every partition's total duration close to its siblings' and never separating segments that
//! share a group key (segment, file or speaker). Every level is written as a table and,
//! optionally, as a directory tree of audio links, and [`verify`] checks the result.

pub mod config;
pub mod error;
pub mod hierarchy;
pub mod materialize;
pub mod segment;
pub mod splitter;
pub mod table;
pub mod verify;

pub use config::{AudioLayout, HierarchyPath, LinkMode, PartitionConfig, TableFormat, VerifyConfig};
pub use error::{ConfigError, PartitionError, TableError};
pub use hierarchy::{HierarchyBuilder, Partition, PartitionLevel, build_hierarchy, create_partitions};
pub use segment::{GroupbyKey, Segment, SegmentTable};
pub use splitter::{GroupOrder, greedy_split};
pub use verify::{VerificationReport, Violation, verify};
