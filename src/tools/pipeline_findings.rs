/// Pipeline Findings Tool
///
/// Reads the newest pipeline scan results and returns one page of findings,
/// most severe first. The full results file drives the summary totals; the
/// filtered results file marks which findings violate policy and, when
/// `violates_policy` is set, is the list that gets paginated.
///
/// Clients with MCP Apps UI support get a short summary plus the report as
/// `structuredContent` for the embedded viewer. Other clients get the summary
/// followed by the whole report as pretty-printed JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use crate::core::convert::ToolOutput;
use crate::core::error::ToolError;
use crate::core::protocol::ContentBlock;
use crate::core::registry::{Arguments, HandlerRegistry, ToolContext, ToolImplementation, ToolResult, handler};
use crate::tools::args::{bounded_int, optional_bool, required_str, work_dir};
use crate::tools::pipeline_job::newest_file;

pub const NAME: &str = "pipeline-findings";

const DEFAULT_PAGE_SIZE: i64 = 10;
const MAX_PAGE_SIZE: i64 = 500;
const MAX_PAGE: i64 = 500;

pub struct PipelineFindingsTool;

impl ToolImplementation for PipelineFindingsTool {
    fn register_handlers(&self, registry: &HandlerRegistry) -> Result<(), ToolError> {
        registry.register(NAME, handler(|ctx, args| async move { findings(ctx, &args).await }));
        Ok(())
    }
}

// Scanner output

#[derive(Deserialize, Debug, Default)]
struct ScanResults {
    #[serde(default)]
    findings: Vec<Flaw>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
struct Flaw {
    issue_id: i64,
    /// A string in scanner output, occasionally a number.
    cwe_id: Value,
    issue_type: String,
    severity: i64,
    display_text: String,
    files: FlawFiles,
    flaw_match: FlawMatch,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
struct FlawFiles {
    source_file: SourceFile,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
struct SourceFile {
    file: String,
    line: u64,
    function_name: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
struct FlawMatch {
    flaw_hash: String,
}

impl Flaw {
    /// issue_id alone repeats across occurrences; with the flaw hash it
    /// identifies one occurrence.
    fn key(&self) -> (i64, &str) {
        (self.issue_id, self.flaw_match.flaw_hash.as_str())
    }

    fn cwe(&self) -> i64 {
        match &self.cwe_id {
            Value::Number(n) => n.as_i64().unwrap_or(0),
            Value::String(s) => s.trim().parse().unwrap_or(0),
            _ => 0,
        }
    }
}

// Report

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct FindingsReport {
    pub application: String,
    pub application_path: String,
    pub policy_filter: bool,
    pub summary: Summary,
    pub findings: Vec<Finding>,
    pub pagination: Pagination,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Summary {
    pub total_findings: usize,
    pub policy_violations: usize,
    pub by_severity: BTreeMap<&'static str, usize>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Finding {
    pub flaw_id: String,
    pub scan_type: &'static str,
    pub severity: &'static str,
    pub severity_score: i64,
    pub cwe_id: i64,
    pub cwe_name: String,
    pub description: String,
    pub file_path: String,
    pub line: u64,
    pub procedure: String,
    pub violates_policy: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Pagination {
    pub current_page: usize,
    pub page_size: usize,
    pub total_elements: usize,
    pub total_pages: usize,
    pub has_next: bool,
    pub has_previous: bool,
}

struct FindingsRequest<'a> {
    application_path: &'a Path,
    page_size: usize,
    page: usize,
    violates_policy: bool,
}

impl<'a> FindingsRequest<'a> {
    fn parse(args: &'a Arguments) -> Result<Self, ToolError> {
        Ok(Self {
            application_path: Path::new(required_str(args, "application_path")?),
            page_size: bounded_int(args, "page_size", DEFAULT_PAGE_SIZE, 1, MAX_PAGE_SIZE)? as usize,
            page: bounded_int(args, "page", 0, 0, MAX_PAGE)? as usize,
            violates_policy: optional_bool(args, "violates_policy", true)?,
        })
    }
}

async fn findings(ctx: ToolContext, args: &Arguments) -> ToolResult {
    let request = FindingsRequest::parse(args)?;
    let output_dir = work_dir(request.application_path, "pipeline");

    let (results, source) = match newest_file(&output_dir, "results-", ".json").await {
        Some(path) => (read_results(&path).await?, path.display().to_string()),
        None => (ScanResults::default(), "no results".to_string()),
    };

    // Without a filtered file nothing is known to violate policy.
    let filtered = match newest_file(&output_dir, "filtered-results-", ".json").await {
        Some(path) => match read_results(&path).await {
            Ok(filtered) => Some(filtered),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable filtered results");
                None
            }
        },
        None => None,
    };

    let report = build_report(&request, &results, filtered.as_ref());
    tracing::debug!(
        findings = report.findings.len(),
        source = %source,
        ui = ctx.client_supports_ui,
        "returning pipeline findings"
    );
    render(&report, ctx.client_supports_ui)
}

async fn read_results(path: &Path) -> Result<ScanResults, ToolError> {
    let bytes = tokio::fs::read(path).await?;
    serde_json::from_slice(&bytes).map_err(|e| {
        tracing::warn!(path = %path.display(), error = %e, "results file is not valid scan output");
        ToolError::Serialization(e)
    })
}

fn build_report(request: &FindingsRequest<'_>, results: &ScanResults, filtered: Option<&ScanResults>) -> FindingsReport {
    let violating: HashSet<(i64, &str)> = filtered
        .map(|f| f.findings.iter().map(Flaw::key).collect())
        .unwrap_or_default();

    let mut by_severity: BTreeMap<&'static str, usize> =
        SEVERITIES.iter().map(|(_, label)| (*label, 0)).collect();
    for flaw in &results.findings {
        *by_severity.entry(severity_label(flaw.severity)).or_default() += 1;
    }
    let summary = Summary {
        total_findings: results.findings.len(),
        policy_violations: filtered.map(|f| f.findings.len()).unwrap_or(0),
        by_severity,
    };

    let display = match (request.violates_policy, filtered) {
        (true, Some(filtered)) => &filtered.findings,
        _ => &results.findings,
    };

    let mut occurrences: HashMap<i64, usize> = HashMap::new();
    let mut findings: Vec<Finding> = display
        .iter()
        .map(|flaw| {
            let occurrence = occurrences.entry(flaw.issue_id).or_default();
            *occurrence += 1;
            to_finding(flaw, *occurrence, violating.contains(&flaw.key()))
        })
        .collect();

    findings.sort_by(|a, b| {
        b.severity_score
            .cmp(&a.severity_score)
            .then_with(|| a.flaw_id.cmp(&b.flaw_id))
    });

    let total = findings.len();
    let start = (request.page * request.page_size).min(total);
    let end = (start + request.page_size).min(total);
    let pagination = Pagination {
        current_page: request.page,
        page_size: request.page_size,
        total_elements: total,
        total_pages: total.div_ceil(request.page_size),
        has_next: (request.page + 1) * request.page_size < total,
        has_previous: request.page > 0,
    };

    let application = request
        .application_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| request.application_path.display().to_string());

    FindingsReport {
        application,
        application_path: request.application_path.display().to_string(),
        policy_filter: request.violates_policy,
        summary,
        findings: findings.drain(start..end).collect(),
        pagination,
    }
}

fn to_finding(flaw: &Flaw, occurrence: usize, violates_policy: bool) -> Finding {
    Finding {
        flaw_id: format!("{}-{}", flaw.issue_id, occurrence),
        scan_type: "STATIC",
        severity: severity_label(flaw.severity),
        severity_score: flaw.severity,
        cwe_id: flaw.cwe(),
        cwe_name: flaw.issue_type.clone(),
        description: strip_markup(&flaw.display_text),
        file_path: flaw.files.source_file.file.clone(),
        line: flaw.files.source_file.line,
        procedure: flaw.files.source_file.function_name.clone(),
        violates_policy,
    }
}

const SEVERITIES: [(i64, &str); 6] = [
    (5, "very high"),
    (4, "high"),
    (3, "medium"),
    (2, "low"),
    (1, "very low"),
    (0, "info"),
];

/// Out-of-range scores count as info.
fn severity_label(score: i64) -> &'static str {
    SEVERITIES
        .iter()
        .find(|(s, _)| *s == score)
        .map(|(_, label)| *label)
        .unwrap_or("info")
}

/// Scanner descriptions carry HTML markup.
fn strip_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn render(report: &FindingsReport, client_supports_ui: bool) -> ToolResult {
    let label = if report.policy_filter {
        "policy-relevant findings"
    } else {
        "findings"
    };
    let summary = format!(
        "Showing {} findings on page {} of {} (Total: {} {} across all pages)",
        report.findings.len(),
        report.pagination.current_page + 1,
        report.pagination.total_pages,
        report.pagination.total_elements,
        label,
    );

    if client_supports_ui {
        return Ok(ToolOutput::structured(vec![ContentBlock::text(summary)], report));
    }

    let json = serde_json::to_string_pretty(report)?;
    Ok(ToolOutput::text(format!("{summary}\n\n{json}")))
}
