//! Runs registry tools as child processes
//!
//! No shell is involved: the program gets an argv array and an explicit
//! environment overlay. Every run is bounded by a timeout; a child that
//! outlives it is killed when its handle is dropped.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::error::RegistryError;

/// Captured output of a successful run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: String,
}

/// Spawns tools from a fixed directory or the configured search path
#[derive(Debug, Clone)]
pub struct ToolRunner {
    bin_dir: Option<PathBuf>,
    search_path: Option<String>,
    env: Vec<(String, String)>,
}

impl ToolRunner {
    pub fn new(
        bin_dir: Option<PathBuf>,
        search_path: Option<String>,
        env: Vec<(String, String)>,
    ) -> Self {
        Self {
            bin_dir,
            search_path,
            env,
        }
    }

    /// Path passed to spawn; bare names are resolved through PATH
    pub fn program_path(&self, program: &str) -> PathBuf {
        match &self.bin_dir {
            Some(dir) => dir.join(program),
            None => PathBuf::from(program),
        }
    }

    /// Find the binary on disk, if it exists
    pub fn locate(&self, program: &str) -> Option<PathBuf> {
        if let Some(dir) = &self.bin_dir {
            let candidate = dir.join(program);
            return candidate.is_file().then_some(candidate);
        }

        let search_path = self.search_path.as_deref()?;
        std::env::split_paths(search_path)
            .map(|dir| dir.join(program))
            .find(|candidate| candidate.is_file())
    }

    /// Run `program` to completion or until `timeout` elapses
    pub async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<ToolOutput, RegistryError> {
        let path = self.program_path(program);
        debug!("Running {} {}", path.display(), args.join(" "));

        let mut command = Command::new(&path);
        command
            .args(args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(search_path) = &self.search_path {
            command.env("PATH", search_path);
        }

        let child = command.spawn().map_err(|source| RegistryError::Spawn {
            program: program.to_string(),
            source,
        })?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| RegistryError::Timeout {
                program: program.to_string(),
                seconds: timeout.as_secs(),
            })?
            .map_err(|source| RegistryError::Io {
                path: path.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            let status = output.status.code().unwrap_or(-1);
            debug!("{} failed with exit code {}", program, status);
            return Err(RegistryError::ToolFailed {
                program: program.to_string(),
                status,
                stderr: stderr.trim().to_string(),
            });
        }

        if !stderr.trim().is_empty() {
            debug!("{} stderr: {}", program, stderr.trim());
        }

        Ok(ToolOutput { stdout })
    }
}
