pub mod pool;

use std::path::{Path, PathBuf};
use std::process::Command;

pub use pool::{
    pump_outcomes, spawn_intake, ConvertPool, ConvertPoolConfig, SubmitStatus, WorkOutcome,
    WorkRequest,
};

use crate::error::ConvertError;

/// Converts one source image into the access format.
///
/// Implementations are blocking; they run on the dedicated conversion pool,
/// never on the coordination runtime.
pub trait Converter: Send + Sync {
    fn convert(&self, source: &Path, destination: &Path) -> Result<(), ConvertError>;
}

/// Invokes an external converter binary, e.g. a JPEG 2000 encoder.
///
/// The binary is called as `<binary> <args...> <source> <destination>` and
/// must exit zero after writing the destination file.
pub struct ExternalConverter {
    binary: PathBuf,
    args: Vec<String>,
}

impl ExternalConverter {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}

impl Converter for ExternalConverter {
    fn convert(&self, source: &Path, destination: &Path) -> Result<(), ConvertError> {
        let output = Command::new(&self.binary)
            .args(&self.args)
            .arg(source)
            .arg(destination)
            .output()
            .map_err(|e| ConvertError::Spawn {
                binary: self.binary.clone(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(ConvertError::ConverterFailed {
                status: output.status,
                source_path: source.to_path_buf(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        if !destination.exists() {
            return Err(ConvertError::MissingOutput(destination.to_path_buf()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_external_converter_copies_via_cp() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("in.tif");
        let destination = temp.path().join("out.jp2");
        std::fs::write(&source, b"image bytes").unwrap();

        let converter = ExternalConverter::new("cp");
        converter.convert(&source, &destination).unwrap();

        assert_eq!(std::fs::read(&destination).unwrap(), b"image bytes");
    }

    #[test]
    fn test_nonzero_exit_is_converter_failed() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("in.tif");
        std::fs::write(&source, b"x").unwrap();

        // `cp` to a directory that does not exist exits nonzero.
        let converter = ExternalConverter::new("cp");
        let err = converter
            .convert(&source, &temp.path().join("no/such/dir/out.jp2"))
            .unwrap_err();
        assert!(matches!(err, ConvertError::ConverterFailed { .. }));
    }

    #[test]
    fn test_missing_binary_is_spawn_error() {
        let temp = TempDir::new().unwrap();
        let converter = ExternalConverter::new("/nonexistent/encoder");
        let err = converter
            .convert(&temp.path().join("in.tif"), &temp.path().join("out.jp2"))
            .unwrap_err();
        assert!(matches!(err, ConvertError::Spawn { .. }));
    }

    #[test]
    fn test_successful_exit_without_output_is_missing_output() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("in.tif");
        std::fs::write(&source, b"x").unwrap();

        // `true` exits zero but writes nothing.
        let converter = ExternalConverter::new("true");
        let err = converter
            .convert(&source, &temp.path().join("out.jp2"))
            .unwrap_err();
        assert!(matches!(err, ConvertError::MissingOutput(_)));
    }
}
