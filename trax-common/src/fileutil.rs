//! File utilities for intermediate artifacts
//!
//! Annotation artifacts and merged configurations are persisted between
//! workflow stages as JSON files at caller-chosen paths. Blocking variants
//! use `std::fs`; async variants use `tokio::fs` and must be called from a
//! Tokio runtime.

use crate::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Platform temporary directory
pub fn temp_dir() -> PathBuf {
    std::env::temp_dir()
}

/// Whether a file exists at `path`
pub fn exists(path: impl AsRef<Path>) -> bool {
    path.as_ref().is_file()
}

/// Read a UTF-8 text file
pub fn read_to_string(path: impl AsRef<Path>) -> Result<String> {
    Ok(std::fs::read_to_string(path)?)
}

/// Write text, creating parent directories as needed
pub fn write_string(path: impl AsRef<Path>, contents: &str) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)?;
    Ok(())
}

/// Delete a file
pub fn delete(path: impl AsRef<Path>) -> Result<()> {
    std::fs::remove_file(path)?;
    Ok(())
}

/// Read and deserialize a JSON file
pub fn read_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let content = read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Serialize a value as pretty-printed JSON and write it
pub fn write_json<T: Serialize + ?Sized>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    write_string(path, &content)
}

/// Async variant of [`exists`]
pub async fn exists_async(path: impl AsRef<Path>) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// Async variant of [`read_to_string`]
pub async fn read_to_string_async(path: impl AsRef<Path>) -> Result<String> {
    Ok(tokio::fs::read_to_string(path).await?)
}

/// Async variant of [`write_string`]
pub async fn write_string_async(path: impl AsRef<Path>, contents: &str) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, contents).await?;
    Ok(())
}

/// Async variant of [`delete`]
pub async fn delete_async(path: impl AsRef<Path>) -> Result<()> {
    tokio::fs::remove_file(path).await?;
    Ok(())
}

/// Async variant of [`read_json`]
pub async fn read_json_async<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let content = read_to_string_async(path).await?;
    Ok(serde_json::from_str(&content)?)
}

/// Async variant of [`write_json`]
pub async fn write_json_async<T: Serialize + ?Sized>(
    path: impl AsRef<Path>,
    value: &T,
) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    write_string_async(path, &content).await
}
