//! Annotation artifact merging and export
//!
//! A finished pre-analysis job yields a JSON object (the annotation
//! artifact). The pitch and consonant artifacts are merged into one
//! configuration document before separation.

use crate::{fileutil, Error, Result};
use serde_json::{Map, Value};
use std::io::Write;
use std::path::Path;
use tracing::debug;

/// Field of the pitch artifact holding the JSON-encoded segment list
pub const PITCH_ANNOTATION_KEY: &str = "pitch_annotation";

/// Right-biased key union
///
/// Keys present in both inputs take the value from `second`.
pub fn merge(first: &Map<String, Value>, second: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = first.clone();
    for (key, value) in second {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Merge two annotation values, both of which must be JSON objects
pub fn merge_values(first: &Value, second: &Value) -> Result<Value> {
    let first = as_object(first, "first annotation")?;
    let second = as_object(second, "second annotation")?;
    Ok(Value::Object(merge(first, second)))
}

/// Read two artifacts, merge them and persist the result at `output`
pub async fn merge_files(
    first: impl AsRef<Path>,
    second: impl AsRef<Path>,
    output: impl AsRef<Path>,
) -> Result<Value> {
    let first: Value = fileutil::read_json_async(first.as_ref()).await?;
    let second: Value = fileutil::read_json_async(second.as_ref()).await?;
    let merged = merge_values(&first, &second)?;

    fileutil::write_json_async(output.as_ref(), &merged).await?;
    debug!(
        output = %output.as_ref().display(),
        keys = merged.as_object().map(|m| m.len()).unwrap_or(0),
        "Merged annotation artifacts"
    );
    Ok(merged)
}

/// Extract the pitch segments from a pitch artifact
///
/// The service stores the segment list as a JSON-encoded string; an
/// already-decoded array is accepted too. Each segment is a list of rows.
pub fn pitch_segments(artifact: &Value) -> Result<Vec<Vec<Vec<Value>>>> {
    let field = artifact.get(PITCH_ANNOTATION_KEY).ok_or_else(|| {
        Error::InvalidInput(format!("artifact has no '{}' field", PITCH_ANNOTATION_KEY))
    })?;

    let decoded = match field {
        Value::String(encoded) => serde_json::from_str::<Value>(encoded)?,
        other => other.clone(),
    };

    Ok(serde_json::from_value(decoded)?)
}

/// Write every pitch row as one CSV line
///
/// Returns the number of rows written.
pub fn pitch_to_csv<W: Write>(artifact: &Value, mut writer: W) -> Result<usize> {
    let mut rows = 0;
    for segment in pitch_segments(artifact)? {
        for row in segment {
            let line = row.iter().map(csv_field).collect::<Vec<_>>().join(",");
            writeln!(writer, "{}", line)?;
            rows += 1;
        }
    }
    writer.flush()?;
    Ok(rows)
}

fn csv_field(value: &Value) -> String {
    let raw = match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw
    }
}

fn as_object<'a>(value: &'a Value, what: &str) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| Error::InvalidInput(format!("{} is not a JSON object", what)))
}
