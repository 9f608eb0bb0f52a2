//! Remote resource records
//!
//! Field names follow the service's JSON. Unknown fields on job and
//! configuration records are kept in `extra` so nothing is lost when a
//! record is printed or persisted.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Caller-supplied query parameters, merged over operation defaults
pub type Params = BTreeMap<String, String>;

/// Completion threshold for job status
pub const STATUS_COMPLETE: u8 = 100;

/// Uploaded audio file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFile {
    pub id: u64,
    /// Source URL of the stored file
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub valid: Option<bool>,
    #[serde(default)]
    pub is_valid: Option<bool>,
    /// Seconds; `-1` while unknown
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub channel_number: Option<u32>,
    #[serde(default)]
    pub original_file_type: Option<String>,
    #[serde(default)]
    pub resource_uri: Option<String>,
}

/// Pagination metadata of a listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListMeta {
    pub limit: u32,
    pub offset: u32,
    pub total_count: u64,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
}

/// Paginated audio file listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFileListing {
    pub meta: ListMeta,
    pub objects: Vec<AudioFile>,
}

/// Result of the `files` operation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FilesResponse {
    Single(AudioFile),
    Listing(AudioFileListing),
}

impl FilesResponse {
    pub fn as_single(&self) -> Option<&AudioFile> {
        match self {
            FilesResponse::Single(file) => Some(file),
            FilesResponse::Listing(_) => None,
        }
    }

    pub fn as_listing(&self) -> Option<&AudioFileListing> {
        match self {
            FilesResponse::Listing(listing) => Some(listing),
            FilesResponse::Single(_) => None,
        }
    }
}

/// Pre-analysis algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    #[serde(rename = "pitch")]
    Pitch,
    #[serde(rename = "csnt")]
    Consonant,
}

impl Algorithm {
    /// Tag sent on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Pitch => "pitch",
            Algorithm::Consonant => "csnt",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pitch" => Ok(Algorithm::Pitch),
            "csnt" | "consonant" => Ok(Algorithm::Consonant),
            other => Err(format!(
                "unknown algorithm '{}' (expected pitch or csnt)",
                other
            )),
        }
    }
}

/// Kind of job resource whose status is polled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    PreAnalysis,
    Separation,
}

impl ResourceKind {
    /// Path segment under the endpoint
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::PreAnalysis => "preanalysis",
            ResourceKind::Separation => "separation",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "preanalysis" | "pre-analysis" => Ok(ResourceKind::PreAnalysis),
            "separation" => Ok(ResourceKind::Separation),
            other => Err(format!(
                "unknown resource '{}' (expected preanalysis or separation)",
                other
            )),
        }
    }
}

/// Pre-analysis job record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreAnalysisJob {
    pub id: u64,
    pub input_file_id: u64,
    #[serde(default)]
    pub algo: Option<String>,
    #[serde(default, deserialize_with = "progress")]
    pub status: u8,
    #[serde(default)]
    pub is_finished: Option<bool>,
    #[serde(default)]
    pub resource_uri: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Separation job record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeparationJob {
    pub id: u64,
    pub input_file_id: u64,
    #[serde(default)]
    pub config_id: Option<u64>,
    #[serde(default)]
    pub extracted_file_id: Option<u64>,
    #[serde(default, deserialize_with = "progress")]
    pub status: u8,
    #[serde(default)]
    pub resource_uri: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Status record of a pre-analysis or separation job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub id: u64,
    #[serde(deserialize_with = "progress")]
    pub status: u8,
    #[serde(default)]
    pub is_finished: Option<bool>,
    #[serde(default)]
    pub input_file_id: Option<u64>,
    #[serde(default)]
    pub extracted_file_id: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JobStatus {
    /// Terminal state: progress 100 or an explicit `is_finished`
    pub fn is_complete(&self) -> bool {
        self.status >= STATUS_COMPLETE || self.is_finished == Some(true)
    }
}

/// Uploaded configuration record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub id: u64,
    #[serde(default)]
    pub resource_uri: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Result of a streamed download
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Body written to `path`
    Written { path: std::path::PathBuf, bytes: u64 },
    /// Non-success response; nothing written
    Skipped { status: u16 },
}

impl DownloadOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, DownloadOutcome::Written { .. })
    }
}

/// Accept progress as a number or a numeric string, clamped to 0..=100
fn progress<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let value = Value::deserialize(deserializer)?;
    let raw = match &value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| D::Error::custom(format!("invalid status {}", n)))?,
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| D::Error::custom(format!("invalid status '{}'", s)))?,
        Value::Null => 0.0,
        other => return Err(D::Error::custom(format!("invalid status {}", other))),
    };
    Ok(raw.clamp(0.0, STATUS_COMPLETE as f64) as u8)
}
