pub mod item;
pub mod state;

use std::path::Path;

use serde::Serialize;

pub use item::Item;
pub use state::WorkflowState;

/// A named batch of items submitted together, keyed in the registry by the
/// manifest's base file name.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub name: String,
    /// Items in manifest row order. Order is irrelevant for correctness but
    /// preserved for reporting.
    pub items: Vec<Item>,
    /// True when this is a re-submission retrying previously failed items.
    pub is_rerun: bool,
    /// Identity of whoever submitted the job, for completion notification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requester: Option<String>,
    /// Verbatim manifest header, retained so the original CSV can be
    /// reconstructed for audit.
    #[serde(skip)]
    pub header: Vec<String>,
    /// Verbatim manifest body rows, same purpose.
    #[serde(skip)]
    pub raw_rows: Vec<Vec<String>>,
}

impl Job {
    pub fn new(name: impl Into<String>, is_rerun: bool) -> Self {
        Self {
            name: name.into(),
            items: Vec::new(),
            is_rerun,
            requester: None,
            header: Vec::new(),
            raw_rows: Vec::new(),
        }
    }

    /// Derives the registry key from a manifest path: file name minus
    /// extension.
    pub fn name_from_manifest(path: &Path) -> String {
        path.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned())
    }

    /// Count of items still eligible for work: `Empty` items on a first run,
    /// `Failed` items on a subsequent run.
    pub fn remaining(&self) -> usize {
        let wanted = if self.is_rerun {
            WorkflowState::Failed
        } else {
            WorkflowState::Empty
        };
        self.items.iter().filter(|i| i.state == wanted).count()
    }

    /// A job is finished iff no item holds the `Empty` state.
    pub fn is_finished(&self) -> bool {
        !self.items.iter().any(|i| i.state == WorkflowState::Empty)
    }

    pub fn item(&self, id: &str) -> Option<&Item> {
        self.items.iter().find(|i| i.id == id)
    }

    /// Count of items converted and uploaded in this run.
    pub fn processed(&self) -> usize {
        self.items
            .iter()
            .filter(|i| i.state == WorkflowState::Succeeded)
            .count()
    }

    /// Re-emits the retained manifest verbatim.
    pub fn to_csv(&self) -> Result<String, csv::Error> {
        let mut buf = Vec::new();
        {
            let mut wtr = csv::Writer::from_writer(&mut buf);
            wtr.write_record(&self.header)?;
            for row in &self.raw_rows {
                wtr.write_record(row)?;
            }
            wtr.flush().map_err(csv::Error::from)?;
        }
        String::from_utf8(buf).map_err(|e| {
            csv::Error::from(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })
    }
}
