use std::path::Path;
use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::cluster::NodeShell;
use crate::exec::ProcessOutput;
use crate::Result;

/// Builds the captured output a scripted remote command hands back.
pub fn remote_output(
    status: i32,
    stdout: &str,
) -> ProcessOutput {
    ProcessOutput {
        status,
        stdout: stdout.as_bytes().to_vec(),
        stderr: Vec::new(),
    }
}

struct Rule {
    node: Option<&'static str>,
    needle: &'static str,
    output: ProcessOutput,
}

/// Shell that answers scripts from a response table and records every
/// call.
///
/// Responses match on a substring of the script, optionally narrowed to
/// one node; the first matching rule wins and stays in the table, so one
/// rule answers any number of calls. Unmatched scripts succeed with
/// empty output.
#[derive(Default)]
pub struct ScriptedShell {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<(String, String)>>,
    uploads: Mutex<Vec<(String, PathBuf, String)>>,
}

impl ScriptedShell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers any node running a script containing `needle`.
    pub fn respond(
        self,
        needle: &'static str,
        output: ProcessOutput,
    ) -> Self {
        self.rules.lock().push(Rule {
            node: None,
            needle,
            output,
        });
        self
    }

    /// Answers only `node` running a script containing `needle`. More
    /// specific rules must be registered before broad ones.
    pub fn respond_on(
        self,
        node: &'static str,
        needle: &'static str,
        output: ProcessOutput,
    ) -> Self {
        self.rules.lock().push(Rule {
            node: Some(node),
            needle,
            output,
        });
        self
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }

    pub fn calls_matching(
        &self,
        needle: &str,
    ) -> Vec<(String, String)> {
        self.calls
            .lock()
            .iter()
            .filter(|(_, script)| script.contains(needle))
            .cloned()
            .collect()
    }

    pub fn uploads(&self) -> Vec<(String, PathBuf, String)> {
        self.uploads.lock().clone()
    }
}

#[async_trait]
impl NodeShell for ScriptedShell {
    async fn ensure_ready(&self) -> Result<()> {
        Ok(())
    }

    async fn run_on(
        &self,
        node: &str,
        script: &str,
    ) -> Result<ProcessOutput> {
        self.calls
            .lock()
            .push((node.to_string(), script.to_string()));

        let rules = self.rules.lock();
        for rule in rules.iter() {
            if let Some(wanted) = rule.node {
                if wanted != node {
                    continue;
                }
            }
            if script.contains(rule.needle) {
                return Ok(rule.output.clone());
            }
        }
        Ok(remote_output(0, ""))
    }

    async fn upload(
        &self,
        node: &str,
        local: &Path,
        remote: &str,
    ) -> Result<()> {
        self.uploads
            .lock()
            .push((node.to_string(), local.to_path_buf(), remote.to_string()));
        Ok(())
    }
}
