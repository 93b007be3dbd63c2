use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::warn;

use crate::error::IngestError;
use crate::job::{Item, Job, WorkflowState};
use crate::manifest::columns::ColumnMap;
use crate::resolve::PrefixResolver;

/// A non-fatal problem with one manifest row. The affected item is
/// downgraded; ingestion itself still succeeds.
#[derive(Debug, Clone)]
pub struct RowWarning {
    /// 1-based row number in the manifest, counting the header as row 1.
    pub row: usize,
    pub message: String,
}

#[derive(Debug)]
pub struct IngestOutcome {
    pub job: Job,
    pub warnings: Vec<RowWarning>,
}

/// Builds a [`Job`] from a manifest.
///
/// Framing problems (unterminated quoting, unequal column counts) and
/// duplicated header roles fail the whole submission; row-level problems
/// downgrade only the affected item.
pub struct Ingestor {
    resolver: Arc<dyn PrefixResolver>,
    source_root: PathBuf,
}

impl Ingestor {
    pub fn new(resolver: Arc<dyn PrefixResolver>, source_root: impl Into<PathBuf>) -> Self {
        Self {
            resolver,
            source_root: source_root.into(),
        }
    }

    /// Ingests a manifest file. The job name is the file name minus its
    /// extension.
    pub fn ingest_file(
        &self,
        path: &Path,
        is_rerun: bool,
        requester: Option<String>,
    ) -> Result<IngestOutcome, IngestError> {
        let file = std::fs::File::open(path).map_err(|e| IngestError::ReadManifest {
            path: path.to_path_buf(),
            source: e,
        })?;
        self.ingest(&Job::name_from_manifest(path), file, is_rerun, requester)
    }

    pub fn ingest<R: Read>(
        &self,
        name: &str,
        reader: R,
        is_rerun: bool,
        requester: Option<String>,
    ) -> Result<IngestOutcome, IngestError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(reader);
        let mut records = rdr.records();

        let header_record = match records.next() {
            Some(record) => record?,
            None => return Err(IngestError::MissingHeader),
        };
        let header: Vec<String> = header_record.iter().map(str::to_string).collect();
        let columns = ColumnMap::from_header(&header)?;

        let mut job = Job::new(name, is_rerun);
        job.requester = requester;
        job.header = header;

        let mut warnings: Vec<RowWarning> = Vec::new();
        let mut seen_ids: HashSet<String> = HashSet::new();

        for (index, record) in records.enumerate() {
            let record = record?;
            let row_number = index + 2;
            job.raw_rows.push(record.iter().map(str::to_string).collect());

            let (item, row_warnings) =
                self.classify_row(&columns, &record, row_number, is_rerun, &mut seen_ids);
            for warning in &row_warnings {
                warn!(
                    "manifest '{}' row {}: {}",
                    job.name, warning.row, warning.message
                );
            }
            warnings.extend(row_warnings);
            job.items.push(item);
        }

        Ok(IngestOutcome { job, warnings })
    }

    fn classify_row(
        &self,
        columns: &ColumnMap,
        record: &csv::StringRecord,
        row_number: usize,
        is_rerun: bool,
        seen_ids: &mut HashSet<String>,
    ) -> (Item, Vec<RowWarning>) {
        let mut errors: Vec<String> = Vec::new();

        // The file name is read before the identifier so a row aborted on a
        // missing required column can still be checked for a missing source
        // file below.
        let mut aborted = false;
        let file_value: Option<String> = if columns.file_name.is_some() {
            read_field(record, columns.file_name).map(str::to_string)
        } else {
            errors.push("required 'File Name' column is not present".to_string());
            aborted = true;
            None
        };

        let id_value: Option<String> = if aborted {
            None
        } else if columns.item_id.is_some() {
            read_field(record, columns.item_id).map(str::to_string)
        } else {
            errors.push("required 'Item ID' column is not present".to_string());
            aborted = true;
            None
        };

        let mut structural = false;
        let mut has_file = file_value.is_some();
        let mut prior = WorkflowState::Empty;
        let mut access_url: Option<String> = None;

        if !aborted {
            if id_value.is_none() {
                errors.push("row has no item identifier".to_string());
            }

            let viewing_hint_present = read_field(record, columns.viewing_hint).is_some();
            if let Some(kind) = read_field(record, columns.object_type) {
                if kind.eq_ignore_ascii_case("collection") {
                    has_file = false;
                    structural = true;
                } else if kind.eq_ignore_ascii_case("work") && viewing_hint_present {
                    // The file is optional for such records even though they
                    // are nominally works.
                    has_file = false;
                    structural = true;
                }
            }

            if let Some(token) = read_field(record, columns.workflow_state) {
                match WorkflowState::parse(token) {
                    Some(state) => prior = state,
                    None => errors.push(format!("unrecognized workflow state '{}'", token)),
                }
            }

            access_url = read_field(record, columns.access_url).map(str::to_string);
        }

        // Run-type reset: a subsequent run retries prior failures and keeps
        // prior successes; a first run treats any prior state as
        // informational only.
        let mut state = if structural || prior == WorkflowState::Structural {
            WorkflowState::Structural
        } else if is_rerun {
            match prior {
                WorkflowState::Failed | WorkflowState::Missing => WorkflowState::Empty,
                WorkflowState::Succeeded => WorkflowState::Ingested,
                other => other,
            }
        } else {
            WorkflowState::Empty
        };

        let id = match id_value {
            Some(id) => {
                if seen_ids.insert(id.clone()) {
                    id
                } else {
                    errors.push(format!("duplicate item identifier '{}'", id));
                    let placeholder = format!("row-{}", row_number);
                    seen_ids.insert(placeholder.clone());
                    placeholder
                }
            }
            None => {
                let placeholder = format!("row-{}", row_number);
                seen_ids.insert(placeholder.clone());
                placeholder
            }
        };

        let mut item = Item::new(id);
        item.file_path = if has_file { file_value } else { None };
        item.access_url = access_url;

        // File-existence check, only for items still eligible for work
        // after the reset.
        if has_file && state == WorkflowState::Empty {
            let declared = item.file_path.clone().unwrap_or_default();
            match item.resolved_source(self.resolver.as_ref(), &self.source_root) {
                None => {
                    errors.push(format!(
                        "cannot determine a source path for '{}'",
                        declared
                    ));
                    state = WorkflowState::Missing;
                }
                Some(path) if !path.exists() => {
                    errors.push(format!("source file '{}' does not exist", path.display()));
                    state = WorkflowState::Missing;
                }
                Some(_) => {}
            }
        }

        // Row problems downgrade the item, but a more specific Missing
        // classification always wins and structural rows are left alone.
        if !errors.is_empty()
            && state != WorkflowState::Missing
            && state != WorkflowState::Structural
        {
            state = WorkflowState::Failed;
        }
        item.state = state;

        let warnings = errors
            .into_iter()
            .map(|message| RowWarning {
                row: row_number,
                message,
            })
            .collect();
        (item, warnings)
    }
}

/// Trimmed, non-empty value of the column at `index`, if the role was
/// resolved and the cell holds anything.
fn read_field(record: &csv::StringRecord, index: Option<usize>) -> Option<&str> {
    index
        .and_then(|i| record.get(i))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
