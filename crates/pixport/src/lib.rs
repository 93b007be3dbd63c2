pub mod config;
pub mod convert;
pub mod dispatch;
pub mod error;
pub mod finalizer;
pub mod job;
pub mod manifest;
pub mod registry;
pub mod resolve;
pub mod storage;
pub mod submit;
pub mod telemetry;
pub mod tracker;

pub use config::{load_config, Config, PrefixPolicy};
pub use convert::{ConvertPool, ConvertPoolConfig, Converter, ExternalConverter};
pub use dispatch::{Destination, Dispatcher, Envelope, Reply};
pub use error::{
    ConfigError, ConvertError, DispatchError, IngestError, PixportError, RegistryError, Result,
    StorageError,
};
pub use finalizer::{CompletionNotice, FinalizeReceipt, Finalizer, OperatorAlert};
pub use job::{Item, Job, WorkflowState};
pub use manifest::{IngestOutcome, Ingestor, RowWarning};
pub use registry::{JobCount, JobRegistry};
pub use storage::{FsObjectStore, ObjectStore, StoredObject};
pub use submit::{submit, SubmitOutcome};
pub use tracker::{CompletionTracker, ItemOutcome, ReportAck};
