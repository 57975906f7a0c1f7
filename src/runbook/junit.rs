//! JUnit rendering for drill reports, plus the append-only run log the
//! suite tooling tails.

use std::path::Path;
use std::path::PathBuf;

use tokio::io::AsyncWriteExt;

use crate::runbook::RunbookReport;
use crate::runbook::StepStatus;
use crate::utils::file_io::create_parent_dir_if_not_exist;
use crate::utils::file_io::write_into_file;
use crate::Result;
use crate::SystemError;

/// Renders the report as one JUnit testsuite, one testcase per executed
/// step. Steps after an abort never ran and are not reported.
pub fn render_junit(report: &RunbookReport) -> String {
    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str(&format!(
        "<testsuite name=\"{}\" tests=\"{}\" failures=\"{}\" time=\"{:.3}\">\n",
        escape(report.runbook),
        report.steps.len(),
        report.failures(),
        report.total_elapsed().as_secs_f64(),
    ));

    for step in &report.steps {
        match step.status {
            StepStatus::Passed => {
                xml.push_str(&format!(
                    "  <testcase name=\"{}\" time=\"{:.3}\"/>\n",
                    escape(step.name),
                    step.elapsed.as_secs_f64(),
                ));
            }
            StepStatus::Failed => {
                let detail = step.detail.as_deref().unwrap_or("step failed");
                xml.push_str(&format!(
                    "  <testcase name=\"{}\" time=\"{:.3}\">\n    <failure message=\"{}\"/>\n  </testcase>\n",
                    escape(step.name),
                    step.elapsed.as_secs_f64(),
                    escape(detail),
                ));
            }
        }
    }

    xml.push_str("</testsuite>\n");
    xml
}

/// Writes `junit_<runbook>.xml` under `junit_dir` and returns the path.
pub async fn write_junit(
    report: &RunbookReport,
    junit_dir: &Path,
) -> Result<PathBuf> {
    let path = junit_dir.join(format!("junit_{}.xml", report.runbook));
    write_into_file(path.clone(), render_junit(report).as_bytes()).await?;
    Ok(path)
}

/// Appends one line per executed step to the run log.
pub async fn append_run_log(
    report: &RunbookReport,
    log_path: &Path,
) -> Result<()> {
    let mut rendered = String::new();
    for step in &report.steps {
        let verdict = match step.status {
            StepStatus::Passed => "passed",
            StepStatus::Failed => "failed",
        };
        rendered.push_str(&format!(
            "[{}] {} {} in {:.3}s",
            report.runbook,
            step.name,
            verdict,
            step.elapsed.as_secs_f64(),
        ));
        if let Some(detail) = &step.detail {
            rendered.push_str(": ");
            rendered.push_str(detail);
        }
        rendered.push('\n');
    }

    create_parent_dir_if_not_exist(log_path).await?;
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .await
        .map_err(|e| SystemError::PathError {
            path: log_path.to_path_buf(),
            source: e,
        })?;
    file.write_all(rendered.as_bytes())
        .await
        .map_err(SystemError::Io)?;
    Ok(())
}

fn escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
