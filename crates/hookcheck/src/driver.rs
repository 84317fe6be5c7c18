use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;
use hookcheck_contracts::HOOKCHECK_RUN_REPORT_SCHEMA_VERSION;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::case::{self, TestCase};
use crate::config::{self, SuiteArgs};
use crate::repo::WorkLayout;
use crate::runner::{self, CaseResult, InfraFailure, RunContext, Stage, Verdict};
use crate::util;

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub suite: SuiteArgs,

    /// Skip build, commit, and fixup; validate and compare the existing repositories.
    #[arg(long)]
    pub no_build: bool,

    /// Also write the JSON run report here.
    #[arg(long, value_name = "PATH")]
    pub report_out: Option<PathBuf>,

    /// Print the JSON run report on stdout instead of text lines.
    #[arg(long)]
    pub json: bool,
}

/// Cases that completed, plus the failure that stopped the run early, if any.
#[derive(Debug, Default)]
pub struct RunOutcome {
    pub cases: Vec<CaseResult>,
    pub aborted: Option<InfraFailure>,
}

impl RunOutcome {
    pub fn mismatched(&self) -> usize {
        self.cases
            .iter()
            .filter(|c| matches!(c.verdict, Verdict::Mismatch { .. }))
            .count()
    }

    pub fn passed(&self) -> usize {
        self.cases
            .iter()
            .filter(|c| matches!(c.verdict, Verdict::Pass))
            .count()
    }
}

/// Runs cases one after another. A mismatch moves on to the next case; an
/// infrastructure failure stops before the next case starts.
pub fn run_cases<F>(cases: &[TestCase], mut run_one: F) -> RunOutcome
where
    F: FnMut(&TestCase) -> Result<CaseResult, InfraFailure>,
{
    let mut outcome = RunOutcome::default();
    for case in cases {
        info!(case = %case.id, "case started");
        match run_one(case) {
            Ok(result) => {
                match &result.verdict {
                    Verdict::Pass => info!(case = %case.id, "passed"),
                    Verdict::Mismatch { deltas } => {
                        warn!(case = %case.id, differences = deltas.len(), "report mismatch")
                    }
                }
                outcome.cases.push(result);
            }
            Err(failure) => {
                error!(case = %case.id, stage = %failure.stage, "{}", failure.detail);
                outcome.aborted = Some(failure);
                break;
            }
        }
    }
    outcome
}

pub fn compute_exit_code(outcome: &RunOutcome) -> u8 {
    if outcome.aborted.is_some() || outcome.mismatched() > 0 {
        1
    } else {
        0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub schema_version: String,
    pub tool: ToolInfo,
    pub invocation: InvocationInfo,
    pub summary: Summary,
    pub cases: Vec<CaseResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<InfraFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvocationInfo {
    pub argv: Vec<String>,
    pub manifest_dir: String,
    pub work_dir: String,
    pub build: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Summary {
    pub total: u64,
    pub passed: u64,
    pub mismatched: u64,
    pub not_run: u64,
    pub aborted: bool,
    pub exit_code: u8,
    pub duration_ms: u64,
}

pub fn finalize_report(
    invocation: InvocationInfo,
    total: usize,
    outcome: RunOutcome,
    elapsed: std::time::Duration,
) -> RunReport {
    let completed = outcome.cases.len();
    let summary = Summary {
        total: total as u64,
        passed: outcome.passed() as u64,
        mismatched: outcome.mismatched() as u64,
        not_run: total.saturating_sub(completed) as u64,
        aborted: outcome.aborted.is_some(),
        exit_code: compute_exit_code(&outcome),
        duration_ms: util::duration_ms(elapsed),
    };

    RunReport {
        schema_version: HOOKCHECK_RUN_REPORT_SCHEMA_VERSION.to_string(),
        tool: ToolInfo {
            name: "hookcheck".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        invocation,
        summary,
        cases: outcome.cases,
        failure: outcome.aborted,
    }
}

pub fn cmd_run(args: RunArgs) -> Result<std::process::ExitCode> {
    let started = Instant::now();
    let config = config::load_config(&args.suite)?;
    let manifest_dir = util::absolutize(&args.suite.manifest_dir);
    let work_dir = util::absolutize(&args.suite.work_dir);

    let invocation = InvocationInfo {
        argv: std::env::args().collect(),
        manifest_dir: util::display_path(&manifest_dir),
        work_dir: util::display_path(&work_dir),
        build: !args.no_build,
    };

    let cases = match discover_cases(&args.suite, &manifest_dir, &config.manifest_extension) {
        Ok(cases) => cases,
        Err(failure) => {
            error!(stage = %failure.stage, "{}", failure.detail);
            let outcome = RunOutcome {
                cases: Vec::new(),
                aborted: Some(failure),
            };
            let report = finalize_report(invocation, 0, outcome, started.elapsed());
            return write_report_and_exit(&args, &report);
        }
    };

    info!(
        cases = cases.len(),
        manifest_dir = %manifest_dir.display(),
        work_dir = %work_dir.display(),
        "starting run"
    );

    let ctx = RunContext {
        config: &config,
        layout: WorkLayout::new(&work_dir),
        build: !args.no_build,
    };
    let outcome = run_cases(&cases, |case| runner::run_case(&ctx, case));

    let report = finalize_report(invocation, cases.len(), outcome, started.elapsed());
    write_report_and_exit(&args, &report)
}

fn discover_cases(
    suite: &SuiteArgs,
    manifest_dir: &Path,
    extension: &str,
) -> Result<Vec<TestCase>, InfraFailure> {
    let mut cases = case::discover(manifest_dir, extension)
        .map_err(|e| InfraFailure::new(None, Stage::Discover, format!("{e:#}")))?;
    case::filter_cases(&mut cases, suite.filter.as_deref(), suite.exact);
    if cases.is_empty() {
        return Err(InfraFailure::new(
            None,
            Stage::Discover,
            format!(
                "no matching *.{extension} manifests in {}",
                manifest_dir.display()
            ),
        ));
    }
    Ok(cases)
}

fn write_report_and_exit(args: &RunArgs, report: &RunReport) -> Result<std::process::ExitCode> {
    let exit_code = report.summary.exit_code;
    let json = serde_json::to_string_pretty(report)? + "\n";

    if let Some(out_path) = &args.report_out {
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create report dir: {}", parent.display()))?;
        }
        std::fs::write(out_path, json.as_bytes())
            .with_context(|| format!("write report: {}", out_path.display()))?;
    }

    if let Some(failure) = &report.failure {
        eprintln!("error: {failure}");
    }

    if args.json {
        print!("{json}");
    } else {
        print!("{}", render_text(report));
    }

    Ok(std::process::ExitCode::from(exit_code))
}

pub fn render_text(report: &RunReport) -> String {
    let mut out = String::new();
    for case in &report.cases {
        match &case.verdict {
            Verdict::Pass => out.push_str(&format!("passed\t{}\n", case.id)),
            Verdict::Mismatch { deltas } => {
                out.push_str(&format!("mismatch\t{}\n", case.id));
                for delta in deltas {
                    out.push_str(&format!("    {}\n", delta.render()));
                }
            }
        }
    }

    let s = &report.summary;
    if let Some(failure) = &report.failure {
        out.push_str(&format!(
            "aborted at {}: {} passed, {} mismatched, {} not run (exit={})\n",
            failure.stage, s.passed, s.mismatched, s.not_run, s.exit_code
        ));
    } else {
        out.push_str(&format!(
            "summary: {} passed, {} mismatched (exit={})\n",
            s.passed, s.mismatched, s.exit_code
        ));
    }
    out
}
