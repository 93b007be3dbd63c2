use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::job::state::WorkflowState;
use crate::resolve::PrefixResolver;

/// One manifest row tracked through the workflow state machine.
///
/// Owned exclusively by its parent [`crate::job::Job`]; never shared
/// across jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    /// Stable external identifier, unique within the job.
    pub id: String,
    /// Declared file name. Absent iff the item is structural.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// Public access URL, populated once the item succeeds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_url: Option<String>,
    pub state: WorkflowState,
    /// Resolved absolute source path, computed once on first use.
    #[serde(skip_serializing_if = "Option::is_none")]
    source_path: Option<PathBuf>,
}

impl Item {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            file_path: None,
            access_url: None,
            state: WorkflowState::Empty,
            source_path: None,
        }
    }

    pub fn has_file(&self) -> bool {
        self.file_path.is_some()
    }

    /// The resolved source path, combining the injected prefix policy with
    /// the raw file name under `source_root`. Computed lazily and cached;
    /// `None` when the item has no file or the prefix cannot be determined.
    pub fn resolved_source(
        &mut self,
        resolver: &dyn PrefixResolver,
        source_root: &Path,
    ) -> Option<&Path> {
        if self.source_path.is_none() {
            let file = self.file_path.as_deref()?;
            let prefix = resolver.resolve_prefix(file)?;
            self.source_path = Some(source_root.join(prefix).join(file));
        }
        self.source_path.as_deref()
    }

    /// The cached resolved path, if resolution has already happened.
    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }
}
