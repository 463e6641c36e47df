use serde::{Deserialize, Serialize};

const FILE_ID_PREFIX: &str = "f_";
const FILE_ID_SUFFIX_LEN: usize = 12;

/// Metadata for one uploaded file, as stored in the index document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    pub course_id: String,
    /// Filename exactly as the client sent it.
    pub name: String,
    pub blob_url: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    /// Milliseconds since the Unix epoch, shared by all files of one upload.
    pub uploaded_at: i64,
}

/// Generate a record id: `f_` followed by random lowercase hex.
///
/// Ids are not coordinated; uniqueness is probabilistic.
pub fn new_file_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{FILE_ID_PREFIX}{}", &suffix[..FILE_ID_SUFFIX_LEN])
}
