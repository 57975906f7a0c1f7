use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use dashmap::DashSet;
use tracing::debug;

use super::Signal;
use super::SignalBoard;
use crate::CoordinationError;
use crate::Result;

/// Durable board backed by one file per raised flag.
///
/// File existence is the commit point; the content is an advisory
/// timestamp for whoever inspects the directory after a bad run. Flags
/// survive phase crashes and restarts.
pub struct FileSignalBoard {
    dir: PathBuf,
}

impl FileSignalBoard {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Creates the board directory so the first raise cannot race peers
    /// probing a missing directory.
    pub async fn ensure_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            CoordinationError::BoardIo {
                signal: "board-dir",
                source: e,
            }
            .into()
        })
    }

    fn flag_path(
        &self,
        signal: Signal,
    ) -> PathBuf {
        self.dir.join(signal.file_name())
    }
}

#[async_trait]
impl SignalBoard for FileSignalBoard {
    async fn raise(
        &self,
        signal: Signal,
    ) -> Result<()> {
        let stamp = format!("{}\n", crate::utils::time::get_now_as_u64());
        tokio::fs::write(self.flag_path(signal), stamp).await.map_err(|e| {
            CoordinationError::BoardIo {
                signal: signal.file_name(),
                source: e,
            }
        })?;
        debug!("raised `{}` on {:?}", signal, self.dir);
        Ok(())
    }

    async fn is_raised(
        &self,
        signal: Signal,
    ) -> Result<bool> {
        match tokio::fs::metadata(self.flag_path(signal)).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CoordinationError::BoardIo {
                signal: signal.file_name(),
                source: e,
            }
            .into()),
        }
    }
}

/// In-memory board for tests and single-process embedding.
#[derive(Default)]
pub struct MemorySignalBoard {
    raised: DashSet<&'static str>,
}

impl MemorySignalBoard {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SignalBoard for MemorySignalBoard {
    async fn raise(
        &self,
        signal: Signal,
    ) -> Result<()> {
        self.raised.insert(signal.file_name());
        Ok(())
    }

    async fn is_raised(
        &self,
        signal: Signal,
    ) -> Result<bool> {
        Ok(self.raised.contains(signal.file_name()))
    }
}
