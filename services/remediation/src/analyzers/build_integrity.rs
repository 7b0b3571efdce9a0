use super::{names, Analyzer};
use crate::error::AnalyzerError;
use crate::types::{AnalyzerResult, Issue, Severity};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;
use vigil_config::defaults::probes::OUTPUT_TAIL_CHARS;

/// Runs the type-check and lint commands in the working directory
pub struct BuildIntegrityAnalyzer {
    working_dir: PathBuf,
    typecheck: Vec<String>,
    lint: Vec<String>,
    tail_chars: usize,
}

impl BuildIntegrityAnalyzer {
    pub fn new(working_dir: impl Into<PathBuf>, typecheck: Vec<String>, lint: Vec<String>) -> Self {
        Self {
            working_dir: working_dir.into(),
            typecheck,
            lint,
            tail_chars: OUTPUT_TAIL_CHARS,
        }
    }

    pub fn with_tail_chars(mut self, tail_chars: usize) -> Self {
        self.tail_chars = tail_chars;
        self
    }

    async fn check(&self, label: &str, command: &[String]) -> Option<Issue> {
        let (program, args) = command.split_first()?;
        let rendered = command.join(" ");
        debug!("Running {} command: {}", label, rendered);

        let output = match Command::new(program)
            .args(args)
            .current_dir(&self.working_dir)
            .kill_on_drop(true)
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                return Some(
                    Issue::new(
                        names::BUILD_INTEGRITY,
                        format!("{}-unavailable", label),
                        Severity::Medium,
                        format!("Could not run {} command `{}`: {}", label, rendered, e),
                    )
                    .with_data("command", rendered),
                )
            }
        };

        if output.status.success() {
            return None;
        }

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let exit_code = output.status.code().unwrap_or(-1);

        Some(
            Issue::new(
                names::BUILD_INTEGRITY,
                format!("{}-failed", label),
                Severity::High,
                format!("{} command `{}` exited with {}", label, rendered, exit_code),
            )
            .with_data("command", rendered)
            .with_data("exitCode", exit_code)
            .with_data("output", tail(&combined, self.tail_chars)),
        )
    }
}

/// Last `max_chars` characters of `text`
fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    text.chars().skip(count - max_chars).collect()
}

#[async_trait]
impl Analyzer for BuildIntegrityAnalyzer {
    fn name(&self) -> &str {
        names::BUILD_INTEGRITY
    }

    async fn analyze(&self) -> Result<AnalyzerResult, AnalyzerError> {
        let mut result = AnalyzerResult::new(names::BUILD_INTEGRITY);

        if let Some(issue) = self.check("typecheck", &self.typecheck).await {
            result.push_issue(issue);
        }
        if let Some(issue) = self.check("lint", &self.lint).await {
            result.push_issue(issue);
        }

        if !result.issues.is_empty() {
            result.recommend("Fix type and lint errors before the next deploy");
        }
        Ok(result)
    }
}
