//! Per-request scratch storage for files handed to external tools.

use crate::error::CapabilityError;
use crate::models::SchemaDefinition;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const SCHEMA_FILE_NAME: &str = "schema.yaml";

/// A private directory owned by one request; removed on drop.
pub struct ScratchSpace {
    dir: TempDir,
}

impl ScratchSpace {
    pub async fn create_in(root: &Path) -> Result<Self, CapabilityError> {
        let root = root.to_path_buf();
        let dir = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new()
                .prefix("linkml-request-")
                .tempdir_in(root)
        })
        .await
        .map_err(std::io::Error::other)??;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Writes the canonical YAML of `schema` and returns the file's path.
    pub async fn write_schema(&self, schema: &SchemaDefinition) -> Result<PathBuf, CapabilityError> {
        let yaml = schema
            .to_canonical_yaml()
            .map_err(|e| CapabilityError::MalformedOutput {
                tool: "schema serializer".to_string(),
                reason: e.to_string(),
            })?;

        let path = self.dir.path().join(SCHEMA_FILE_NAME);
        tokio::fs::write(&path, yaml).await?;
        Ok(path)
    }
}
