use crate::error::{HeaderProblem, IngestError};

/// Recognized manifest column labels. Matching is by exact string.
pub const ITEM_ID: &str = "Item ID";
pub const FILE_NAME: &str = "File Name";
pub const OBJECT_TYPE: &str = "Object Type";
pub const WORKFLOW_STATE: &str = "Workflow State";
pub const ACCESS_URL: &str = "Access URL";
pub const VIEWING_HINT: &str = "Viewing Hint";

const ROLES: [&str; 6] = [
    ITEM_ID,
    FILE_NAME,
    OBJECT_TYPE,
    WORKFLOW_STATE,
    ACCESS_URL,
    VIEWING_HINT,
];

/// Header indices of the recognized column roles. Unrecognized columns are
/// preserved in the retained raw rows but ignored here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMap {
    pub item_id: Option<usize>,
    pub file_name: Option<usize>,
    pub object_type: Option<usize>,
    pub workflow_state: Option<usize>,
    pub access_url: Option<usize>,
    pub viewing_hint: Option<usize>,
}

impl ColumnMap {
    /// Scans a header row. Each role may appear at most once; every
    /// duplicated role is collected before failing, so the error names
    /// them all.
    pub fn from_header(header: &[String]) -> Result<ColumnMap, IngestError> {
        let mut map = ColumnMap::default();
        let mut problems: Vec<HeaderProblem> = Vec::new();

        for role in ROLES {
            let hits: Vec<usize> = header
                .iter()
                .enumerate()
                .filter(|(_, name)| name.as_str() == role)
                .map(|(i, _)| i)
                .collect();

            if hits.len() > 1 {
                problems.push(HeaderProblem {
                    label: role,
                    occurrences: hits.len(),
                });
                continue;
            }

            let index = hits.first().copied();
            match role {
                ITEM_ID => map.item_id = index,
                FILE_NAME => map.file_name = index,
                OBJECT_TYPE => map.object_type = index,
                WORKFLOW_STATE => map.workflow_state = index,
                ACCESS_URL => map.access_url = index,
                VIEWING_HINT => map.viewing_hint = index,
                _ => unreachable!(),
            }
        }

        if problems.is_empty() {
            Ok(map)
        } else {
            Err(IngestError::Header { problems })
        }
    }
}
