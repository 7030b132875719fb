pub mod pool;
pub mod record;
pub mod set;

pub use pool::{PoolError, TransferJob, TransferOutcome, TransferPool, MAX_WORKERS};
pub use record::{hash_file, DownloadOutcome, FileRecord, Fingerprint, RecordSource, UploadOutcome};
pub use set::{chunk_ranges, Rejected, Selector, SyncSet, TransferFailure, DEFAULT_BATCH_SIZE};
