/// Pipeline Scan Jobs
///
/// A scan's identity lives on disk in `.veracode/pipeline/pipeline.json`, next
/// to its results and log, so `pipeline-status` keeps working after a server
/// restart. The spawning server records the exit code when the process ends;
/// a job with no exit code whose process is gone was interrupted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::error::ToolError;

pub const JOB_FILE: &str = "pipeline.json";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PipelineJob {
    pub pid: u32,
    pub command: String,
    pub results_file: PathBuf,
    pub filtered_results_file: PathBuf,
    pub log_file: PathBuf,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Completed,
    Failed { exit_code: i32 },
    Interrupted,
}

impl PipelineJob {
    /// Reads the job file. A missing file means no scan has been started.
    pub async fn load(output_dir: &Path) -> Result<Option<Self>, ToolError> {
        let path = output_dir.join(JOB_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes the job file through a temporary file and a rename, so readers
    /// never observe a partial document.
    pub async fn save(&self, output_dir: &Path) -> Result<(), ToolError> {
        let tmp = output_dir.join(format!("{JOB_FILE}.tmp"));
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(self)?).await?;
        tokio::fs::rename(&tmp, output_dir.join(JOB_FILE)).await?;
        Ok(())
    }

    /// Stores the exit code of process `pid`. Does nothing if a newer scan has
    /// replaced the job in the meantime.
    pub async fn record_exit(output_dir: &Path, pid: u32, exit_code: i32) -> Result<(), ToolError> {
        match Self::load(output_dir).await? {
            Some(mut job) if job.pid == pid => {
                job.exit_code = Some(exit_code);
                job.save(output_dir).await
            }
            _ => {
                tracing::debug!(pid, "scan job superseded, exit code not recorded");
                Ok(())
            }
        }
    }

    pub fn state(&self, process_alive: bool) -> JobState {
        match self.exit_code {
            Some(0) if self.results_file.is_file() => JobState::Completed,
            Some(exit_code) => JobState::Failed { exit_code },
            None if process_alive => JobState::Running,
            None => JobState::Interrupted,
        }
    }
}

/// Whether a process with this pid exists.
#[cfg(target_os = "linux")]
pub fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

/// Without procfs the recorded exit code is the only signal, so a job with
/// none is reported as running.
#[cfg(not(target_os = "linux"))]
pub fn process_alive(_pid: u32) -> bool {
    true
}

/// Newest file in `dir` named `<prefix>*<suffix>`. Names embed a sortable
/// timestamp, so the lexically greatest match is the newest. An unreadable
/// directory has no newest file.
pub async fn newest_file(dir: &Path, prefix: &str, suffix: &str) -> Option<PathBuf> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(dir = %dir.display(), error = %e, "output directory unreadable");
            }
            return None;
        }
    };

    let mut newest: Option<PathBuf> = None;
    while let Ok(Some(entry)) = entries.next_entry().await {
        if !entry.file_type().await.is_ok_and(|t| t.is_file()) {
            continue;
        }
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if !name.starts_with(prefix) || !name.ends_with(suffix) {
            continue;
        }
        let path = entry.path();
        if newest.as_ref().is_none_or(|current| path > *current) {
            newest = Some(path);
        }
    }
    newest
}

/// Last `lines` lines of a log file, or an empty string if it cannot be read.
pub async fn log_tail(path: &Path, lines: usize) -> String {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => {
            let all: Vec<&str> = text.lines().collect();
            all[all.len().saturating_sub(lines)..].join("\n")
        }
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "scan log unreadable");
            String::new()
        }
    }
}
