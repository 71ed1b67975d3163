//! Utility functions shared by the tasks and the binaries.
//!

use crate::config::Config;
use crate::object_store::ObjectStore;
use anyhow::{Context, Result};
use bytes::Bytes;
use std::path::Path;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Read an entire [`Bytes`] slice into a [`String`].
///
/// Returns an error if the slice contains invalid UTF-8.
pub fn string_from_bytes(buf: Bytes) -> Result<String> {
    Ok(String::from_utf8(buf.as_ref().into())?)
}

/// The final path component of a document name, e.g. `doc1.txt` for
/// `books/doc1.txt`. Falls back to the whole name.
pub fn document_basename(name: &str) -> &str {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(name)
}

/// Install the fmt subscriber used by every binary. `RUST_LOG` overrides
/// the default `info` level.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Uploads every local file matching `pattern` into the input namespace
/// under its file name. Returns the staged document names.
pub async fn stage_documents(
    objects: &dyn ObjectStore,
    config: &Config,
    pattern: &str,
) -> Result<Vec<String>> {
    let mut staged = Vec::new();
    for entry in glob::glob(pattern).with_context(|| format!("invalid glob `{pattern}`"))? {
        let path = entry?;
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            warn!(path = %path.display(), "skipping file with a non UTF-8 name");
            continue;
        };
        let content = tokio::fs::read(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        objects
            .put(&config.input_object(&name), Bytes::from(content))
            .await?;
        info!(document = %name, "staged");
        staged.push(name);
    }
    Ok(staged)
}
