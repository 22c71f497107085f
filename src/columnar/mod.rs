//! The buffered columnar sink ingest writes transactions through before
//! they ever reach the event log (spec §4.1): bounded-latency, bounded
//! batch-size partitioned Parquet blobs.

mod schema;
mod writer;

pub use schema::build_record_batch;
pub use writer::{ColumnarWriter, FlushOutcome};
