//! The extraction work the runner executes
//!
//! The runner treats the work as a black box with three observable
//! outcomes: success with an artifact reference, failure with a
//! diagnostic, or never finishing (handled by the runner's deadline).

use crate::config::ExtractorConfig;
use crate::storage::RunId;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::process::Command;

/// Environment variable carrying the run ID into the extraction command
pub const RUN_ID_ENV: &str = "RUNKEEPER_RUN_ID";

/// Longest diagnostic kept from the command's output
const MAX_DIAGNOSTIC_BYTES: usize = 2048;

/// What the work reported when it finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    Succeeded { result_ref: String },
    Failed { diagnostic: String },
}

/// One invocation of the external extraction work
///
/// Implementations must be cancel-safe: the runner drops the future when
/// the deadline passes, and dropping it must stop the work.
#[async_trait]
pub trait ExtractionWork: Send + Sync {
    async fn run(&self, run_id: &RunId) -> WorkOutcome;
}

/// Runs the extraction as an external command
///
/// Exit status 0 with a non-empty last line on stdout is a success, and
/// that line is the artifact reference. Anything else is a failure whose
/// diagnostic is the tail of stderr (or stdout when stderr is empty).
#[derive(Debug, Clone)]
pub struct CommandWork {
    command: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    env: BTreeMap<String, String>,
}

impl CommandWork {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            working_dir: None,
            env: BTreeMap::new(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    fn build_command(&self, run_id: &RunId) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .envs(&self.env)
            .env(RUN_ID_ENV, run_id.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        cmd
    }
}

impl From<&ExtractorConfig> for CommandWork {
    fn from(config: &ExtractorConfig) -> Self {
        let mut work = CommandWork::new(config.command.clone()).args(config.args.clone());
        if let Some(dir) = &config.working_dir {
            work = work.working_dir(dir);
        }
        for (key, value) in &config.env {
            work = work.env(key.clone(), value.clone());
        }
        work
    }
}

#[async_trait]
impl ExtractionWork for CommandWork {
    async fn run(&self, run_id: &RunId) -> WorkOutcome {
        let child = match self.build_command(run_id).spawn() {
            Ok(child) => child,
            Err(e) => {
                return WorkOutcome::Failed {
                    diagnostic: format!("failed to launch '{}': {}", self.command, e),
                }
            }
        };
        tracing::debug!(
            "Launched '{}' for run {} (pid {:?})",
            self.command,
            run_id,
            child.id()
        );

        // Dropping this future at the deadline drops the child, which kills it
        match child.wait_with_output().await {
            Ok(output) => interpret_output(
                &self.command,
                output.status,
                &String::from_utf8_lossy(&output.stdout),
                &String::from_utf8_lossy(&output.stderr),
            ),
            Err(e) => WorkOutcome::Failed {
                diagnostic: format!("failed to wait for '{}': {}", self.command, e),
            },
        }
    }
}

fn interpret_output(command: &str, status: ExitStatus, stdout: &str, stderr: &str) -> WorkOutcome {
    if status.success() {
        return match stdout.lines().map(str::trim).filter(|l| !l.is_empty()).last() {
            Some(line) => WorkOutcome::Succeeded {
                result_ref: line.to_string(),
            },
            None => WorkOutcome::Failed {
                diagnostic: format!(
                    "'{}' exited successfully but printed no artifact reference",
                    command
                ),
            },
        };
    }

    let output = if stderr.trim().is_empty() { stdout } else { stderr };
    let tail = tail(output, MAX_DIAGNOSTIC_BYTES);
    let diagnostic = if tail.is_empty() {
        format!("'{}' {}", command, status)
    } else {
        format!("'{}' {}: {}", command, status, tail)
    };

    WorkOutcome::Failed { diagnostic }
}

/// Last `max` bytes of trimmed text, cut on a character boundary
fn tail(text: &str, max: usize) -> &str {
    let text = text.trim();
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}
