pub mod columns;
pub mod ingest;

pub use columns::ColumnMap;
pub use ingest::{IngestOutcome, Ingestor, RowWarning};
