//! Partitioned columnar storage
//!
//! On-disk shape under the data root:
//!
//! ```text
//! data/<source_id>/<bucket>/part-<uuid>.seg
//! data/<source_id>/<bucket>/_manifest.log
//! ```
//!
//! Segments are immutable. The manifest is the only record of which
//! segments are committed.

pub mod checksum;
pub mod errors;
pub mod gc;
pub mod layout;
pub mod manifest;
pub mod partition;
pub mod retry;
pub mod segment;

pub use errors::{StoreError, StoreErrorCode, StoreResult};
pub use gc::GcReport;
pub use layout::{bucket_dir_name, is_valid_source_id, Layout, PartitionKey};
pub use manifest::{read_manifest, ManifestEntry};
pub use partition::{FlushSummary, PartitionInfo, PartitionStore, StoreOptions};
pub use retry::RetryPolicy;
pub use segment::{ColumnStats, SegmentReader};
