/// Pipeline Scan Tool
///
/// Starts the Veracode CLI's pipeline static scan in the background and
/// returns at once. The scan writes its results, filtered results and log
/// into `<app>/.veracode/pipeline`; progress is followed with
/// `pipeline-status`.

use chrono::{Local, Utc};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};

use crate::core::convert::ToolOutput;
use crate::core::error::ToolError;
use crate::core::registry::{Arguments, HandlerRegistry, ToolImplementation, ToolResult, handler};
use crate::tools::args::{optional_str, required_str, work_dir};
use crate::tools::pipeline_job::PipelineJob;

pub const NAME: &str = "pipeline-scan";

pub struct PipelineScanTool {
    cli: Arc<PathBuf>,
}

impl PipelineScanTool {
    pub fn new(cli: PathBuf) -> Self {
        Self { cli: Arc::new(cli) }
    }
}

impl ToolImplementation for PipelineScanTool {
    fn initialize(&mut self) -> Result<(), ToolError> {
        if self.cli.as_os_str().is_empty() {
            return Err(ToolError::Initialization("Veracode CLI path is empty".to_string()));
        }
        Ok(())
    }

    fn register_handlers(&self, registry: &HandlerRegistry) -> Result<(), ToolError> {
        let cli = Arc::clone(&self.cli);
        registry.register(
            NAME,
            handler(move |_ctx, args| {
                let cli = Arc::clone(&cli);
                async move { start_scan(&cli, &args).await }
            }),
        );
        Ok(())
    }
}

#[derive(Debug, PartialEq)]
struct ScanRequest {
    application_path: PathBuf,
    filename: Option<PathBuf>,
}

impl ScanRequest {
    fn parse(args: &Arguments) -> Result<Self, ToolError> {
        let application_path = PathBuf::from(required_str(args, "application_path")?);

        // A bare file name refers to the packaging directory.
        let filename = optional_str(args, "filename").map(|name| {
            let path = Path::new(name);
            if path.file_name() == Some(path.as_os_str()) {
                work_dir(&application_path, "packaging").join(path)
            } else {
                path.to_path_buf()
            }
        });

        Ok(Self {
            application_path,
            filename,
        })
    }
}

async fn start_scan(cli: &Path, args: &Arguments) -> ToolResult {
    let request = ScanRequest::parse(args)?;
    let output_dir = prepare_output_dir(&request.application_path).await?;
    let target = resolve_target(&request).await?;

    let stamp = Local::now().format("%Y%m%d-%H%M%S");
    let results_file = output_dir.join(format!("results-{stamp}.json"));
    let filtered_results_file = output_dir.join(format!("filtered-results-{stamp}.json"));
    let log_file = output_dir.join(format!("scan-{stamp}.log"));

    let scan_args = vec![
        "static".to_string(),
        "scan".to_string(),
        target.display().to_string(),
        "--results-file".to_string(),
        results_file.display().to_string(),
        "--filtered-json-output-file".to_string(),
        filtered_results_file.display().to_string(),
        "-v".to_string(),
    ];
    let command = format!("{} {}", cli.display(), scan_args.join(" "));

    let mut child = spawn_scanner(cli, &scan_args, &command, &log_file).await?;
    let pid = child
        .id()
        .ok_or_else(|| ToolError::Process("scanner exited before it could be tracked".to_string()))?;

    let job = PipelineJob {
        pid,
        command,
        results_file,
        filtered_results_file,
        log_file,
        started_at: Utc::now(),
        exit_code: None,
    };
    if let Err(e) = job.save(&output_dir).await {
        let _ = child.start_kill();
        return Err(e);
    }

    tracing::info!(pid, target = %target.display(), "pipeline scan started");
    tokio::spawn(watch_scan(child, output_dir, pid));

    Ok(ToolOutput::text(started_text(&request.application_path, &target, &job)))
}

/// Creates the pipeline directory and clears files left by earlier scans.
async fn prepare_output_dir(application_path: &Path) -> Result<PathBuf, ToolError> {
    match tokio::fs::metadata(application_path).await {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            return Err(ToolError::InvalidArgument(format!(
                "application path is not a directory: {}",
                application_path.display()
            )));
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ToolError::NotFound(format!(
                "application path does not exist: {}",
                application_path.display()
            )));
        }
        Err(e) => return Err(e.into()),
    }

    let output_dir = work_dir(application_path, "pipeline");
    tokio::fs::create_dir_all(&output_dir).await?;

    let mut entries = tokio::fs::read_dir(&output_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(true) {
            continue;
        }
        if let Err(e) = tokio::fs::remove_file(entry.path()).await {
            tracing::warn!(path = %entry.path().display(), error = %e, "failed to remove stale scan file");
        }
    }

    Ok(output_dir)
}

/// The requested file, or the largest file in `.veracode/packaging`.
async fn resolve_target(request: &ScanRequest) -> Result<PathBuf, ToolError> {
    if let Some(filename) = &request.filename {
        if !tokio::fs::try_exists(filename).await.unwrap_or(false) {
            return Err(ToolError::NotFound(format!(
                "specified file does not exist: {}",
                filename.display()
            )));
        }
        return Ok(filename.clone());
    }

    let packaging = work_dir(&request.application_path, "packaging");
    largest_file(&packaging).await?.ok_or_else(|| {
        ToolError::NotFound(format!(
            "no file to scan in {}. Either specify a filename or package the application first",
            packaging.display()
        ))
    })
}

async fn largest_file(dir: &Path) -> Result<Option<PathBuf>, ToolError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut largest: Option<(u64, PathBuf)> = None;
    while let Some(entry) = entries.next_entry().await? {
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        if largest.as_ref().is_none_or(|(size, _)| meta.len() > *size) {
            largest = Some((meta.len(), entry.path()));
        }
    }

    Ok(largest.map(|(_, path)| path))
}

/// Starts the scanner with stdout and stderr appended to the log file.
async fn spawn_scanner(cli: &Path, scan_args: &[String], command: &str, log_file: &Path) -> Result<Child, ToolError> {
    let mut log = tokio::fs::File::create(log_file).await?;
    log.write_all(format!("Command: {command}\n\n").as_bytes()).await?;
    log.flush().await?;

    let stdout = log.into_std().await;
    let stderr = stdout.try_clone()?;

    Command::new(cli)
        .args(scan_args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .spawn()
        .map_err(|e| ToolError::Process(format!("failed to start {}: {e}", cli.display())))
}

/// Waits for the scanner and records its exit code in the job file.
async fn watch_scan(mut child: Child, output_dir: PathBuf, pid: u32) {
    let exit_code = match child.wait().await {
        // killed by a signal
        Ok(status) => status.code().unwrap_or(-1),
        Err(e) => {
            tracing::warn!(pid, error = %e, "failed to wait for pipeline scan");
            -1
        }
    };
    tracing::info!(pid, exit_code, "pipeline scan finished");

    if let Err(e) = PipelineJob::record_exit(&output_dir, pid, exit_code).await {
        tracing::warn!(pid, error = %e, "failed to record pipeline scan exit code");
    }
}

fn started_text(application_path: &Path, target: &Path, job: &PipelineJob) -> String {
    format!(
        "Veracode Pipeline Static Scan - Started\n\
         ========================================\n\n\
         Application Path: {}\n\
         Scan Target: {}\n\
         PID: {}\n\
         Results File: {}\n\
         Filtered Results File: {}\n\
         Log File: {}\n\n\
         Command executed:\n{}\n\n\
         Pipeline scan started in the background.\n\n\
         Next steps:\n\
         - Use pipeline-status to check scan progress\n\
         - Use pipeline-findings to read the results once the scan has completed\n",
        application_path.display(),
        target.display(),
        job.pid,
        job.results_file.display(),
        job.filtered_results_file.display(),
        job.log_file.display(),
        job.command,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn args(value: Value) -> Arguments {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_bare_filename_resolves_into_packaging() {
        let request = ScanRequest::parse(&args(json!({"application_path": "/src/app", "filename": "app.war"}))).unwrap();
        assert_eq!(request.filename, Some(PathBuf::from("/src/app/.veracode/packaging/app.war")));

        let request =
            ScanRequest::parse(&args(json!({"application_path": "/src/app", "filename": "build/app.war"}))).unwrap();
        assert_eq!(request.filename, Some(PathBuf::from("build/app.war")));

        let request = ScanRequest::parse(&args(json!({"application_path": "/src/app", "filename": ""}))).unwrap();
        assert_eq!(request.filename, None);
    }

    #[tokio::test]
    async fn test_prepare_output_dir_clears_stale_files() {
        let app = tempfile::tempdir().unwrap();
        let output_dir = work_dir(app.path(), "pipeline");
        std::fs::create_dir_all(output_dir.join("keep")).unwrap();
        std::fs::write(output_dir.join("results-old.json"), "{}").unwrap();
        std::fs::write(output_dir.join("pipeline.json"), "{}").unwrap();

        assert_eq!(prepare_output_dir(app.path()).await.unwrap(), output_dir);
        let remaining: Vec<_> = std::fs::read_dir(&output_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(remaining, vec![std::ffi::OsString::from("keep")]);
    }

    #[tokio::test]
    async fn test_missing_application_path() {
        let app = tempfile::tempdir().unwrap();
        let err = prepare_output_dir(&app.path().join("nope")).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_target_defaults_to_largest_packaged_file() {
        let app = tempfile::tempdir().unwrap();
        let packaging = work_dir(app.path(), "packaging");
        std::fs::create_dir_all(packaging.join("nested")).unwrap();
        std::fs::write(packaging.join("small.jar"), vec![0u8; 10]).unwrap();
        std::fs::write(packaging.join("big.jar"), vec![0u8; 1000]).unwrap();

        let request = ScanRequest {
            application_path: app.path().to_path_buf(),
            filename: None,
        };
        assert_eq!(resolve_target(&request).await.unwrap(), packaging.join("big.jar"));
    }

    #[tokio::test]
    async fn test_target_errors() {
        let app = tempfile::tempdir().unwrap();

        let request = ScanRequest {
            application_path: app.path().to_path_buf(),
            filename: None,
        };
        let err = resolve_target(&request).await.unwrap_err();
        assert!(err.to_string().contains("no file to scan"));

        let request = ScanRequest {
            application_path: app.path().to_path_buf(),
            filename: Some(app.path().join("missing.jar")),
        };
        let err = resolve_target(&request).await.unwrap_err();
        assert!(err.to_string().contains("specified file does not exist"));
    }

    #[tokio::test]
    async fn test_unstartable_cli() {
        let app = tempfile::tempdir().unwrap();
        std::fs::write(app.path().join("app.jar"), "jar").unwrap();

        let cli = app.path().join("no-such-veracode");
        let err = start_scan(
            &cli,
            &args(json!({"application_path": app.path(), "filename": app.path().join("app.jar")})),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ToolError::Process(_)));
    }

    #[test]
    fn test_empty_cli_fails_initialization() {
        let mut tool = PipelineScanTool::new(PathBuf::new());
        assert!(matches!(tool.initialize(), Err(ToolError::Initialization(_))));
    }
}
