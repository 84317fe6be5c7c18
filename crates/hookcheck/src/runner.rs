use std::ffi::OsString;
use std::fmt;
use std::path::Path;
use std::time::Instant;

use hookcheck_contracts::{screenshot_branch, SCREENSHOT_DIR_NAME, VALIDATOR_VERB};
use serde::Serialize;
use tracing::info;

use crate::case::TestCase;
use crate::compare::{self, Delta};
use crate::config::HarnessConfig;
use crate::repo::{Repository, WorkLayout};
use crate::tool::run_tool;
use crate::util;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Discover,
    Prepare,
    Build,
    Commit,
    Fixup,
    Validate,
    Compare,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Discover => "discover",
            Stage::Prepare => "prepare",
            Stage::Build => "build",
            Stage::Commit => "commit",
            Stage::Fixup => "fixup",
            Stage::Validate => "validate",
            Stage::Compare => "compare",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tool or I/O failure. Fatal to the whole run.
#[derive(Debug, Clone, Serialize, thiserror::Error)]
#[error("{stage} failed{}: {detail}", for_case(.case.as_deref()))]
pub struct InfraFailure {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case: Option<String>,
    pub stage: Stage,
    pub detail: String,
}

fn for_case(case: Option<&str>) -> String {
    match case {
        Some(id) => format!(" for {id}"),
        None => String::new(),
    }
}

impl InfraFailure {
    pub fn new(case: Option<&str>, stage: Stage, detail: impl Into<String>) -> Self {
        Self {
            case: case.map(str::to_string),
            stage,
            detail: detail.into(),
        }
    }
}

/// Outcome of a case that ran to completion.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Mismatch { deltas: Vec<Delta> },
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseResult {
    pub id: String,
    #[serde(flatten)]
    pub verdict: Verdict,
    pub stages: Vec<Stage>,
    pub fixups_applied: usize,
    pub report_path: String,
    pub expected_path: String,
    pub duration_ms: u64,
}

/// Everything a case needs besides the case itself.
pub struct RunContext<'a> {
    pub config: &'a HarnessConfig,
    pub layout: WorkLayout,
    /// When false, validate and compare what is already on disk.
    pub build: bool,
}

/// Build, commit, fix up, validate, and compare one case. `Err` means the run must stop.
pub fn run_case(ctx: &RunContext<'_>, case: &TestCase) -> Result<CaseResult, InfraFailure> {
    let start = Instant::now();
    let id = case.id.as_str();
    let repo = ctx.layout.repository(id);
    let report_path = ctx.layout.report_for(id);
    let fail = |stage: Stage, detail: String| InfraFailure::new(Some(id), stage, detail);

    let mut stages = Vec::new();
    let mut fixups_applied = 0;

    if ctx.build {
        prepare(ctx, &repo, &report_path).map_err(|e| fail(Stage::Prepare, format!("{e:#}")))?;
        stages.push(Stage::Prepare);

        build(ctx, case, &repo).map_err(|d| fail(Stage::Build, d))?;
        stages.push(Stage::Build);

        if ctx.config.is_screenshot_exempt(id) {
            info!(case = id, stage = "commit", "screenshot branches skipped");
        } else {
            commit_screenshots(ctx, id, &repo).map_err(|d| fail(Stage::Commit, d))?;
            stages.push(Stage::Commit);
        }

        fixups_applied = ctx
            .config
            .fixups
            .apply(&repo, &ctx.config.ref_kinds, id)
            .map_err(|e| fail(Stage::Fixup, format!("{e:#}")))?;
        if fixups_applied > 0 {
            stages.push(Stage::Fixup);
        }
    } else {
        if !repo.path().is_dir() {
            return Err(fail(
                Stage::Validate,
                format!("no repository at {} (build it first)", repo.path().display()),
            ));
        }
        std::fs::create_dir_all(&ctx.layout.results)
            .map_err(|e| fail(Stage::Prepare, format!("create results dir: {e}")))?;
    }

    validate(ctx, id, &repo, &report_path).map_err(|d| fail(Stage::Validate, d))?;
    stages.push(Stage::Validate);

    let verdict = compare_report(case, &report_path).map_err(|d| fail(Stage::Compare, d))?;
    stages.push(Stage::Compare);

    Ok(CaseResult {
        id: case.id.clone(),
        verdict,
        stages,
        fixups_applied,
        report_path: util::display_path(&report_path),
        expected_path: util::display_path(&case.expected),
        duration_ms: util::duration_ms(start.elapsed()),
    })
}

fn prepare(ctx: &RunContext<'_>, repo: &Repository, report_path: &Path) -> anyhow::Result<()> {
    use anyhow::Context as _;

    for dir in [&ctx.layout.repos, &ctx.layout.builds, &ctx.layout.results] {
        std::fs::create_dir_all(dir).with_context(|| format!("create dir: {}", dir.display()))?;
    }
    util::rm_rf(repo.path())
        .with_context(|| format!("remove stale repository: {}", repo.path().display()))?;
    match std::fs::remove_file(report_path) {
        Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(err)
            .with_context(|| format!("remove stale report: {}", report_path.display())),
        _ => Ok(()),
    }
}

fn build(ctx: &RunContext<'_>, case: &TestCase, repo: &Repository) -> Result<(), String> {
    info!(case = %case.id, stage = "build", manifest = %case.manifest.display(), "building");

    let mut repo_arg = OsString::from("--repo=");
    repo_arg.push(repo.path());
    let extra = [
        OsString::from("--force-clean"),
        repo_arg,
        OsString::from(format!(
            "--mirror-screenshots-url={}",
            ctx.config.mirror_screenshots_url
        )),
        repo.build_dir().as_os_str().to_os_string(),
        case.manifest.as_os_str().to_os_string(),
    ];

    let run = run_tool(&ctx.config.builder, &extra, None).map_err(|e| e.to_string())?;
    if !run.success {
        return Err(run.failure_detail());
    }
    Ok(())
}

fn commit_screenshots(ctx: &RunContext<'_>, id: &str, repo: &Repository) -> Result<(), String> {
    let screenshots = repo.branch_working_dir(Path::new(SCREENSHOT_DIR_NAME));
    std::fs::create_dir_all(&screenshots)
        .map_err(|e| format!("create {}: {e}", screenshots.display()))?;

    for arch in &ctx.config.screenshot_arches {
        let branch = screenshot_branch(arch);
        info!(case = id, stage = "commit", branch = %branch, "committing screenshots");
        repo.commit_branch(&ctx.config.commit, &branch, &screenshots)
            .map_err(|e| e.to_string())?;
        if !repo.has_branch(&branch) {
            return Err(format!(
                "commit tool succeeded but {} does not exist",
                repo.branch_ref_path(&branch).display()
            ));
        }
    }
    Ok(())
}

fn validate(
    ctx: &RunContext<'_>,
    id: &str,
    repo: &Repository,
    report_path: &Path,
) -> Result<(), String> {
    info!(case = id, stage = "validate", report = %report_path.display(), "validating");

    let run = run_tool(
        &ctx.config.validator,
        &[OsString::from(VALIDATOR_VERB)],
        Some(repo.path()),
    )
    .map_err(|e| e.to_string())?;

    std::fs::write(report_path, &run.stdout)
        .map_err(|e| format!("write report {}: {e}", report_path.display()))?;

    // Findings about the app live in the report body; a nonzero exit means the
    // validator itself broke.
    if !run.success {
        return Err(run.failure_detail());
    }
    Ok(())
}

fn compare_report(case: &TestCase, report_path: &Path) -> Result<Verdict, String> {
    if !case.expected.is_file() {
        return Err(format!(
            "missing expected report: {}",
            case.expected.display()
        ));
    }
    let expected = compare::read_json_file(&case.expected).map_err(|e| format!("{e:#}"))?;
    let actual = compare::read_json_file(report_path).map_err(|e| format!("{e:#}"))?;

    let deltas = compare::diff_values(&expected, &actual);
    if deltas.is_empty() {
        Ok(Verdict::Pass)
    } else {
        Ok(Verdict::Mismatch { deltas })
    }
}
