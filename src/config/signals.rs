use std::path::PathBuf;
use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use super::validate_directory;
use crate::Error;
use crate::Result;

/// Sentinel board shared by every phase.
///
/// Phases never talk to each other directly; they raise named flags in
/// `board_dir` and poll for flags raised by their peers. Keeping the board
/// on disk means a phase can crash and restart without losing the
/// conversation.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SignalBoardConfig {
    /// Directory every phase can reach; one file per raised flag
    #[serde(default = "default_board_dir")]
    pub board_dir: PathBuf,

    /// Pause between observation polls
    #[serde(default = "default_poll_secs")]
    pub poll_secs: u64,

    /// How many times teardown re-checks for the exit flag before it
    /// collects artifacts from a still-running test phase anyway
    #[serde(default = "default_exit_wait_attempts")]
    pub exit_wait_attempts: usize,

    /// Pause between those teardown re-checks
    #[serde(default = "default_exit_wait_secs")]
    pub exit_wait_secs: u64,
}

impl Default for SignalBoardConfig {
    fn default() -> Self {
        Self {
            board_dir: default_board_dir(),
            poll_secs: default_poll_secs(),
            exit_wait_attempts: default_exit_wait_attempts(),
            exit_wait_secs: default_exit_wait_secs(),
        }
    }
}

impl SignalBoardConfig {
    pub fn validate(&self) -> Result<()> {
        validate_directory(&self.board_dir, "signal board")?;

        if self.poll_secs == 0 {
            return Err(Error::Config(ConfigError::Message(
                "signal poll_secs cannot be 0".into(),
            )));
        }

        if self.exit_wait_attempts == 0 {
            return Err(Error::Config(ConfigError::Message(
                "exit_wait_attempts cannot be 0".into(),
            )));
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_secs)
    }

    pub fn exit_wait_interval(&self) -> Duration {
        Duration::from_secs(self.exit_wait_secs)
    }
}

fn default_board_dir() -> PathBuf {
    PathBuf::from("/tmp/shared")
}

fn default_poll_secs() -> u64 {
    15
}

fn default_exit_wait_attempts() -> usize {
    180
}

fn default_exit_wait_secs() -> u64 {
    60
}
