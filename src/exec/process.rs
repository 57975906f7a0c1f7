use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::CoordinationError;
use crate::Result;
use crate::SystemError;

/// Description of one child-process invocation.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    pub stdin: Option<Vec<u8>>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Opaque script run through a shell, as suite commands arrive
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("bash").arg("-c").arg(script)
    }

    pub fn arg(
        mut self,
        arg: impl Into<String>,
    ) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(
        mut self,
        args: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(
        mut self,
        dir: impl Into<PathBuf>,
    ) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Bytes fed to the child's stdin, for `oc create -f -` style piping.
    pub fn stdin_bytes(
        mut self,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        self.stdin = Some(bytes.into());
        self
    }

    /// One-line rendering for logs
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Captured outcome of a finished child.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Exit code; -1 when the child died to a signal
    pub status: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    pub fn stdout_utf8(&self) -> String {
        String::from_utf8_lossy(&self.stdout).trim().to_string()
    }

    pub fn stderr_utf8(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProcessRunner: Send + Sync + 'static {
    /// Runs a child to completion, capturing both output streams.
    async fn run(
        &self,
        spec: CommandSpec,
    ) -> Result<ProcessOutput>;
}

/// Production runner on top of `tokio::process`.
///
/// Children are killed when the harness shuts down; a leaked installer or
/// suite process would keep billing the cloud account after the run.
pub struct TokioProcessRunner {
    cancel: CancellationToken,
}

impl TokioProcessRunner {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(
        &self,
        spec: CommandSpec,
    ) -> Result<ProcessOutput> {
        debug!("exec: {}", spec.display());

        let mut cmd = tokio::process::Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd.stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        for (key, value) in &spec.envs {
            cmd.env(key, value);
        }
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| SystemError::Process {
            program: spec.program.clone(),
            detail: format!("spawn failed: {e}"),
        })?;

        if let Some(bytes) = &spec.stdin {
            if let Some(mut handle) = child.stdin.take() {
                handle.write_all(bytes).await.map_err(SystemError::Io)?;
                // Handle drops here so the child sees EOF
            }
        }

        let output = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                // Dropping the future reaps the child via kill_on_drop
                return Err(CoordinationError::Cancelled.into());
            }
            out = child.wait_with_output() => out.map_err(|e| SystemError::Process {
                program: spec.program.clone(),
                detail: format!("wait failed: {e}"),
            })?,
        };

        Ok(ProcessOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}
