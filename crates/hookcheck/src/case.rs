use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use hookcheck_contracts::EXPECTED_REPORT_SUFFIX;

use crate::config::{self, SuiteArgs};
use crate::util;

/// One manifest and its golden report. Immutable once discovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    pub id: String,
    pub manifest: PathBuf,
    pub expected: PathBuf,
}

/// Every `*.<extension>` file directly inside `manifest_dir`, ordered by file name.
pub fn discover(manifest_dir: &Path, extension: &str) -> Result<Vec<TestCase>> {
    let entries = std::fs::read_dir(manifest_dir)
        .with_context(|| format!("read manifest dir: {}", manifest_dir.display()))?;

    let mut out = Vec::new();
    for entry in entries {
        let entry =
            entry.with_context(|| format!("read manifest dir: {}", manifest_dir.display()))?;
        let path = entry.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(extension) {
            continue;
        }
        let id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .with_context(|| format!("manifest name is not UTF-8: {}", path.display()))?
            .to_string();
        if id.is_empty() {
            continue;
        }
        let expected = manifest_dir.join(format!("{id}{EXPECTED_REPORT_SUFFIX}"));
        out.push(TestCase {
            id,
            manifest: path,
            expected,
        });
    }

    out.sort_by(|a, b| a.manifest.file_name().cmp(&b.manifest.file_name()));
    Ok(out)
}

pub fn filter_cases(cases: &mut Vec<TestCase>, filter: Option<&str>, exact: bool) {
    if let Some(filter) = filter {
        if exact {
            cases.retain(|c| c.id == filter);
        } else {
            cases.retain(|c| c.id.contains(filter));
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct ListArgs {
    #[command(flatten)]
    pub suite: SuiteArgs,
}

pub fn cmd_list(args: ListArgs) -> Result<std::process::ExitCode> {
    let config = config::load_config(&args.suite)?;
    let manifest_dir = util::absolutize(&args.suite.manifest_dir);
    let mut cases = discover(&manifest_dir, &config.manifest_extension)?;
    filter_cases(&mut cases, args.suite.filter.as_deref(), args.suite.exact);

    for case in &cases {
        let mut notes = Vec::new();
        if config.is_screenshot_exempt(&case.id) {
            notes.push("no-screenshots".to_string());
        }
        for action in config.fixups.actions_for(&case.id) {
            notes.push(action.to_string());
        }
        if !case.expected.is_file() {
            notes.push("missing-fixture".to_string());
        }
        println!("{}\t{}", case.id, notes.join(","));
    }
    Ok(std::process::ExitCode::SUCCESS)
}
