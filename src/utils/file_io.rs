use std::fs::File;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::error;

use crate::Result;
use crate::SystemError;

pub async fn create_parent_dir_if_not_exist(path: &Path) -> Result<()> {
    if let Some(parent_dir) = path.parent() {
        if !parent_dir.exists() {
            if let Err(e) = tokio::fs::create_dir_all(parent_dir).await {
                error!("Failed to create directory {:?}: {:?}", parent_dir, e);
                return Err(SystemError::PathError {
                    path: parent_dir.to_path_buf(),
                    source: e,
                }
                .into());
            }
        }
    }
    Ok(())
}

/// Writes a whole buffer, creating parent directories on the way.
pub async fn write_into_file(
    path: PathBuf,
    buf: &[u8],
) -> Result<()> {
    create_parent_dir_if_not_exist(&path).await?;

    tokio::fs::write(&path, buf).await.map_err(|e| {
        SystemError::PathError {
            path: path.clone(),
            source: e,
        }
        .into()
    })
}

/// Append-opens a file, creating missing parents. Sync on purpose: the
/// log writer needs a plain [`File`] before the runtime is fully up.
pub fn open_file_for_append(path: PathBuf) -> Result<File> {
    if let Some(parent_dir) = path.parent() {
        std::fs::create_dir_all(parent_dir).map_err(|e| SystemError::PathError {
            path: parent_dir.to_path_buf(),
            source: e,
        })?;
    }
    OpenOptions::new().append(true).create(true).open(&path).map_err(|e| {
        SystemError::PathError {
            path,
            source: e,
        }
        .into()
    })
}

/// Gzip-compresses a buffer and writes it next to a `.gz` suffix.
///
/// Evidence dumps are collected over a degraded cluster; compressing at
/// write time keeps the artifact volume inside upload limits.
pub async fn write_gzip_file(
    path: PathBuf,
    buf: &[u8],
) -> Result<()> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(buf).map_err(SystemError::Io)?;
    let compressed = encoder.finish().map_err(SystemError::Io)?;

    let mut gz_path = path.into_os_string();
    gz_path.push(".gz");
    write_into_file(PathBuf::from(gz_path), &compressed).await
}
