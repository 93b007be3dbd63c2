use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PixportError {
    #[error("Ingestion error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Conversion error: {0}")]
    Convert(#[from] ConvertError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// A duplicated header role in a manifest. Ingestion collects every
/// duplication before failing once, so submitters see the full list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderProblem {
    pub label: &'static str,
    pub occurrences: usize,
}

impl fmt::Display for HeaderProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "column '{}' appears {} times",
            self.label, self.occurrences
        )
    }
}

fn join_problems(problems: &[HeaderProblem]) -> String {
    problems
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Invalid manifest header: {}", join_problems(.problems))]
    Header { problems: Vec<HeaderProblem> },

    #[error("Failed to read manifest '{path}': {source}")]
    ReadManifest {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed manifest: {0}")]
    Csv(#[from] csv::Error),

    #[error("Manifest has no header row")]
    MissingHeader,
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Timed out waiting for the job status lock after {0:?}")]
    LockTimeout(Duration),

    #[error("Job '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Job '{0}' not found")]
    NotFound(String),
}

impl RegistryError {
    /// A lock timeout is worth retrying; anything else is not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RegistryError::LockTimeout(_))
    }
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Destination '{0}' is unreachable")]
    Unreachable(String),

    #[error("Destination '{0}' dropped the reply")]
    NoReply(String),

    #[error("Send to '{0}' timed out after {1:?}")]
    SendTimeout(String, Duration),
}

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("Failed to spawn converter '{binary}': {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Converter failed ({status}) for '{source_path}': {stderr}")]
    ConverterFailed {
        status: std::process::ExitStatus,
        source_path: PathBuf,
        stderr: String,
    },

    #[error("Converter produced no output at '{0}'")]
    MissingOutput(PathBuf),

    #[error("Conversion queue is closed")]
    PoolClosed,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read artifact '{path}': {source}")]
    ReadArtifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write object '{path}': {source}")]
    WriteObject {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Object already exists: {0}")]
    ObjectExists(PathBuf),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {}", .problems.join("; "))]
    Validation { problems: Vec<String> },
}

pub type Result<T> = std::result::Result<T, PixportError>;
