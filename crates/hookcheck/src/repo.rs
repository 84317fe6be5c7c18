use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use hookcheck_contracts::{BUILD_DIR, REPOS_DIR, RESULTS_DIR};

use crate::tool::{run_tool, ToolSpec};

/// Where every case's repository, build output tree, and captured report live.
#[derive(Debug, Clone)]
pub struct WorkLayout {
    pub repos: PathBuf,
    pub builds: PathBuf,
    pub results: PathBuf,
}

impl WorkLayout {
    pub fn new(work_dir: &Path) -> Self {
        Self {
            repos: work_dir.join(REPOS_DIR),
            builds: work_dir.join(BUILD_DIR),
            results: work_dir.join(RESULTS_DIR),
        }
    }

    pub fn repository(&self, case_id: &str) -> Repository {
        Repository::new(self.repos.join(case_id), self.builds.join(case_id))
    }

    pub fn report_for(&self, case_id: &str) -> PathBuf {
        self.results.join(format!("{case_id}.json"))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("commit of branch `{branch}` into {} failed: {cause}", .repo.display())]
pub struct CommitFailure {
    pub repo: PathBuf,
    pub branch: String,
    pub cause: String,
}

/// One case's content-addressed repository plus the build output tree it was built from.
#[derive(Debug, Clone)]
pub struct Repository {
    path: PathBuf,
    build_dir: PathBuf,
}

impl Repository {
    pub fn new(path: PathBuf, build_dir: PathBuf) -> Self {
        Self { path, build_dir }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    pub fn refs_heads_dir(&self) -> PathBuf {
        self.path.join("refs").join("heads")
    }

    pub fn branch_ref_path(&self, branch: &str) -> PathBuf {
        let mut path = self.refs_heads_dir();
        for part in branch.split('/') {
            path.push(part);
        }
        path
    }

    pub fn has_branch(&self, branch: &str) -> bool {
        self.branch_ref_path(branch).is_file()
    }

    /// Path of `relative` inside the checked-out build output tree. Pure lookup.
    pub fn branch_working_dir(&self, relative: &Path) -> PathBuf {
        self.build_dir.join(relative)
    }

    /// Snapshots `source_dir` as the head of `branch`, with ownership and mode bits
    /// canonicalized so the commit does not depend on the local checkout.
    pub fn commit_branch(
        &self,
        tool: &ToolSpec,
        branch: &str,
        source_dir: &Path,
    ) -> Result<(), CommitFailure> {
        let fail = |cause: String| CommitFailure {
            repo: self.path.clone(),
            branch: branch.to_string(),
            cause,
        };

        let mut repo_arg = OsString::from("--repo=");
        repo_arg.push(&self.path);
        let extra = [
            repo_arg,
            OsString::from("--canonical-permissions"),
            OsString::from(format!("--branch={branch}")),
            source_dir.as_os_str().to_os_string(),
        ];

        let run = run_tool(tool, &extra, None).map_err(|e| fail(e.to_string()))?;
        if !run.success {
            return Err(fail(run.failure_detail()));
        }
        Ok(())
    }

    /// Existing `refs/heads/<kind>/<name>/<arch>` directories, sorted.
    pub fn arch_subtrees(&self, ref_kinds: &[String], arch: &str) -> Result<Vec<PathBuf>> {
        let heads = self.refs_heads_dir();
        let mut out = Vec::new();
        for kind in ref_kinds {
            let kind_dir = heads.join(kind);
            if !kind_dir.is_dir() {
                continue;
            }
            let mut names = Vec::new();
            for entry in std::fs::read_dir(&kind_dir)
                .with_context(|| format!("read dir: {}", kind_dir.display()))?
            {
                let entry = entry.with_context(|| format!("read dir: {}", kind_dir.display()))?;
                names.push(entry.path());
            }
            names.sort();
            for name_dir in names {
                let cand = name_dir.join(arch);
                if cand.is_dir() {
                    out.push(cand);
                }
            }
        }
        Ok(out)
    }
}
