/// Pipeline Status Tool
///
/// Reports the state of the latest pipeline scan from its job file.

use std::path::Path;

use crate::core::convert::ToolOutput;
use crate::core::error::ToolError;
use crate::core::registry::{Arguments, HandlerRegistry, ToolImplementation, ToolResult, handler};
use crate::tools::args::{required_str, work_dir};
use crate::tools::pipeline_job::{JobState, PipelineJob, log_tail, newest_file, process_alive};

pub const NAME: &str = "pipeline-status";

/// Log lines shown for a failed scan.
const FAILURE_LOG_LINES: usize = 20;

pub struct PipelineStatusTool;

impl ToolImplementation for PipelineStatusTool {
    fn register_handlers(&self, registry: &HandlerRegistry) -> Result<(), ToolError> {
        registry.register(NAME, handler(|_ctx, args| async move { scan_status(&args).await }));
        Ok(())
    }
}

async fn scan_status(args: &Arguments) -> ToolResult {
    let application_path = Path::new(required_str(args, "application_path")?);
    let output_dir = work_dir(application_path, "pipeline");

    let Some(job) = PipelineJob::load(&output_dir).await? else {
        // Results left by a scan started outside this server.
        return Ok(ToolOutput::text(match newest_file(&output_dir, "results-", ".json").await {
            Some(results) => format!(
                "Pipeline Scan Status\n====================\n\n\
                 Application Path: {}\n\
                 Status: COMPLETED\n\
                 Results File: {}\n\n\
                 Use pipeline-findings to read the results.\n",
                application_path.display(),
                results.display()
            ),
            None => format!(
                "Pipeline Scan Status\n====================\n\n\
                 Application Path: {}\n\
                 Status: NOT FOUND\n\n\
                 No pipeline scan has been started for this application. Use pipeline-scan to start one.\n",
                application_path.display()
            ),
        }));
    };

    let state = job.state(process_alive(job.pid));
    tracing::debug!(pid = job.pid, ?state, "pipeline scan status");

    let mut text = format!(
        "Pipeline Scan Status\n====================\n\n\
         Application Path: {}\n\
         PID: {}\n\
         Started: {}\n\
         Status: {}\n\
         Results File: {}\n\
         Log File: {}\n\n",
        application_path.display(),
        job.pid,
        job.started_at.to_rfc3339(),
        state_label(state),
        job.results_file.display(),
        job.log_file.display(),
    );

    match state {
        JobState::Running => {
            text.push_str("The scan is in progress. Check again later.\n");
        }
        JobState::Completed => {
            text.push_str("The scan has finished. Use pipeline-findings to read the results.\n");
        }
        JobState::Failed { exit_code } => {
            text.push_str(&format!("The scan failed with exit code {exit_code}.\n"));
            let tail = log_tail(&job.log_file, FAILURE_LOG_LINES).await;
            if !tail.is_empty() {
                text.push_str(&format!("\nLast lines of the log:\n{tail}\n"));
            }
        }
        JobState::Interrupted => {
            text.push_str(
                "The scan process is no longer running and did not record an exit code. \
                 It was probably interrupted; start a new scan with pipeline-scan.\n",
            );
        }
    }

    Ok(ToolOutput::text(text))
}

fn state_label(state: JobState) -> &'static str {
    match state {
        JobState::Running => "RUNNING",
        JobState::Completed => "COMPLETED",
        JobState::Failed { .. } => "FAILED",
        JobState::Interrupted => "INTERRUPTED",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::convert::convert;
    use crate::core::registry::ToolContext;
    use chrono::Utc;
    use serde_json::json;
    use std::path::PathBuf;

    async fn status_text(app: &Path) -> String {
        let args = json!({"application_path": app}).as_object().cloned().unwrap();
        let result = convert(scan_status(&args).await.unwrap());
        assert!(!result.is_error);
        result.content[0].text.clone().unwrap()
    }

    fn write_job(app: &Path, pid: u32, exit_code: Option<i32>) -> PipelineJob {
        let dir = work_dir(app, "pipeline");
        std::fs::create_dir_all(&dir).unwrap();
        let job = PipelineJob {
            pid,
            command: "veracode static scan app.jar".to_string(),
            results_file: dir.join("results-20260101-120000.json"),
            filtered_results_file: dir.join("filtered-results-20260101-120000.json"),
            log_file: dir.join("scan-20260101-120000.log"),
            started_at: Utc::now(),
            exit_code,
        };
        std::fs::write(dir.join("pipeline.json"), serde_json::to_vec(&job).unwrap()).unwrap();
        job
    }

    #[tokio::test]
    async fn test_no_scan() {
        let app = tempfile::tempdir().unwrap();
        assert!(status_text(app.path()).await.contains("Status: NOT FOUND"));
    }

    #[tokio::test]
    async fn test_results_without_job_file() {
        let app = tempfile::tempdir().unwrap();
        let dir = work_dir(app.path(), "pipeline");
        std::fs::create_dir_all(&dir).unwrap();
        let results = dir.join("results-20260101-120000.json");
        std::fs::write(&results, r#"{"findings":[]}"#).unwrap();

        let text = status_text(app.path()).await;
        assert!(text.contains("Status: COMPLETED"));
        assert!(text.contains(&results.display().to_string()));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_running_and_interrupted() {
        let app = tempfile::tempdir().unwrap();

        write_job(app.path(), std::process::id(), None);
        assert!(status_text(app.path()).await.contains("Status: RUNNING"));

        write_job(app.path(), u32::MAX, None);
        assert!(status_text(app.path()).await.contains("Status: INTERRUPTED"));
    }

    #[tokio::test]
    async fn test_failed_scan_shows_log_tail() {
        let app = tempfile::tempdir().unwrap();
        let job = write_job(app.path(), 1234, Some(2));
        std::fs::write(&job.log_file, "Command: veracode\n\nerror: invalid credentials\n").unwrap();

        let text = status_text(app.path()).await;
        assert!(text.contains("Status: FAILED"));
        assert!(text.contains("exit code 2"));
        assert!(text.contains("error: invalid credentials"));
    }

    #[tokio::test]
    async fn test_completed_scan() {
        let app = tempfile::tempdir().unwrap();
        let job = write_job(app.path(), 1234, Some(0));
        std::fs::write(&job.results_file, r#"{"findings":[]}"#).unwrap();

        assert!(status_text(app.path()).await.contains("Status: COMPLETED"));
    }

    /// Writes an executable stand-in for the Veracode CLI that writes an
    /// empty results file and exits with `exit_code`.
    #[cfg(unix)]
    fn fake_cli(dir: &Path, exit_code: i32) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-veracode");
        let script = format!(
            "#!/bin/sh\n\
             while [ $# -gt 0 ]; do\n\
             \x20 case \"$1\" in\n\
             \x20   --results-file) echo '{{\"findings\":[]}}' > \"$2\"; shift ;;\n\
             \x20 esac\n\
             \x20 shift\n\
             done\n\
             echo 'scan output'\n\
             exit {exit_code}\n"
        );
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    async fn run_scan_to_completion(exit_code: i32) -> String {
        use crate::tools::pipeline_scan::PipelineScanTool;

        let app = tempfile::tempdir().unwrap();
        let bin = tempfile::tempdir().unwrap();
        std::fs::write(app.path().join("app.jar"), "jar").unwrap();

        let registry = HandlerRegistry::new();
        PipelineScanTool::new(fake_cli(bin.path(), exit_code))
            .register_handlers(&registry)
            .unwrap();
        let scan = registry.get("pipeline-scan").unwrap();

        let args = json!({"application_path": app.path(), "filename": app.path().join("app.jar")});
        let started = convert(scan(ToolContext::default(), args.as_object().cloned().unwrap()).await.unwrap());
        assert!(started.content[0].text.as_deref().unwrap().contains("started in the background"));

        let output_dir = work_dir(app.path(), "pipeline");
        let finished = tokio::time::timeout(std::time::Duration::from_secs(10), async {
            loop {
                if let Some(job) = PipelineJob::load(&output_dir).await.unwrap() {
                    if job.exit_code.is_some() {
                        return job;
                    }
                }
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("scan should finish");
        assert_eq!(finished.exit_code, Some(exit_code));

        status_text(app.path()).await
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_scan_lifecycle_completed() {
        assert!(run_scan_to_completion(0).await.contains("Status: COMPLETED"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_scan_lifecycle_failed() {
        let text = run_scan_to_completion(3).await;
        assert!(text.contains("Status: FAILED"));
        assert!(text.contains("scan output"));
    }
}
