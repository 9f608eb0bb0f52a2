//! # trax common library
//!
//! Shared code for the trax client and CLI including:
//! - Error types
//! - Configuration loading and credential resolution
//! - File utilities for intermediate JSON artifacts
//! - Annotation merging and export
//! - Workflow event types and the event bus

pub mod annotation;
pub mod config;
pub mod error;
pub mod events;
pub mod fileutil;

pub use error::{Error, Result};
