//! Implementer that shells out to an external command per job.
//!
//! The job descriptor is written to the child's stdin as JSON. The selected
//! backend is exported through `LANE_BACKEND` and `LANE_BACKEND_ADDRESS`. The
//! last non-empty stdout line is the artifact; on a non-zero exit the last
//! non-empty stderr line becomes the error.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::core::{BackendEndpoint, ImplementError, Implementer, Job};

/// Environment variable carrying the backend name.
pub const BACKEND_ENV: &str = "LANE_BACKEND";
/// Environment variable carrying the backend address.
pub const BACKEND_ADDRESS_ENV: &str = "LANE_BACKEND_ADDRESS";

/// Runs one child process per job.
///
/// The child is killed when the returned future is dropped, which is how the
/// timeout supervisor stops a stuck job.
#[derive(Debug, Clone)]
pub struct CommandImplementer {
    program: String,
    args: Vec<String>,
    workdir: Option<PathBuf>,
}

impl CommandImplementer {
    /// Run `program` with `args` for every job.
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            workdir: None,
        }
    }

    /// Run the child inside `dir`.
    #[must_use]
    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    /// Program being run.
    pub fn program(&self) -> &str {
        &self.program
    }

    fn command(&self, backend: Option<&BackendEndpoint>) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }
        match backend {
            Some(b) => {
                cmd.env(BACKEND_ENV, &b.name).env(BACKEND_ADDRESS_ENV, &b.address);
            }
            None => {
                cmd.env_remove(BACKEND_ENV).env_remove(BACKEND_ADDRESS_ENV);
            }
        }
        cmd
    }
}

fn last_line(bytes: &[u8]) -> Option<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::trim)
        .rfind(|l| !l.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl Implementer for CommandImplementer {
    async fn implement(
        &self,
        job: &Job,
        backend: Option<&BackendEndpoint>,
    ) -> Result<String, ImplementError> {
        let input = serde_json::to_vec(job)
            .map_err(|e| ImplementError::new("SerializationError", e.to_string()))?;
        let mut child = self
            .command(backend)
            .spawn()
            .map_err(|e| ImplementError::new("SpawnError", format!("{}: {e}", self.program)))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A child that never reads stdin closes the pipe early; not an error.
            if let Err(e) = stdin.write_all(&input).await {
                debug!(title = %job.title, error = %e, "child closed stdin");
            }
            drop(stdin);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ImplementError::new("IoError", e.to_string()))?;

        if output.status.success() {
            last_line(&output.stdout)
                .ok_or_else(|| ImplementError::new("EmptyOutput", "command printed no artifact"))
        } else {
            Err(last_line(&output.stderr).map_or_else(
                || ImplementError::new("ExitError", format!("command exited with {}", output.status)),
                ImplementError::from_message,
            ))
        }
    }
}
