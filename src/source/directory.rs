//! File-system frame source

use std::path::Path;

use bytes::Bytes;

use super::{Direction, FrameSource};
use crate::error::SourceError;

/// Reads frames straight from a directory with `tokio::fs`
///
/// Every read goes to disk; nothing is cached between ticks or sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectorySource;

impl FrameSource for DirectorySource {
    async fn list_frames(
        &self,
        directory: &Path,
        direction: Direction,
    ) -> Result<Vec<String>, SourceError> {
        let mut entries = tokio::fs::read_dir(directory)
            .await
            .map_err(|e| SourceError::directory_read(directory, e))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SourceError::directory_read(directory, e))?
        {
            // Follows symlinks, so a link to a frame file still counts
            match tokio::fs::metadata(entry.path()).await {
                Ok(meta) if meta.is_dir() => continue,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(path = %entry.path().display(), error = %e, "Skipping unreadable entry");
                    continue;
                }
            }

            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(name) => {
                    tracing::warn!(
                        directory = %directory.display(),
                        name = ?name,
                        "Skipping frame with non UTF-8 name"
                    );
                }
            }
        }

        direction.sort(&mut names);
        Ok(names)
    }

    async fn read_frame(&self, directory: &Path, identifier: &str) -> Result<Bytes, SourceError> {
        let path = directory.join(identifier);
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| SourceError::frame_read(&path, e))?;
        Ok(Bytes::from(data))
    }
}
