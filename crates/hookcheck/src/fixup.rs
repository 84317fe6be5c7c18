use std::collections::BTreeMap;
use std::fmt;

use anyhow::{Context, Result};
use hookcheck_contracts::{ARCH_AARCH64, ARCH_X86_64, WRONG_ARCH_EXECUTABLE_CASE};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::repo::Repository;
use crate::util;

/// One structural repair applied to a built repository before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FixupAction {
    /// Delete every `refs/heads/<kind>/<name>/<arch>` subtree.
    RemoveArch { arch: String },
    /// Copy every `<from>` subtree to a sibling `<to>` subtree, replacing it.
    DuplicateArch { from: String, to: String },
}

impl fmt::Display for FixupAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FixupAction::RemoveArch { arch } => write!(f, "remove_arch({arch})"),
            FixupAction::DuplicateArch { from, to } => write!(f, "duplicate_arch({from}->{to})"),
        }
    }
}

/// Case identifier -> ordered fixups. Cases without an entry get none.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FixupRegistry {
    entries: BTreeMap<String, Vec<FixupAction>>,
}

impl FixupRegistry {
    /// The repairs the acceptance suite relies on.
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        // Ship the x86_64 build under the aarch64 name so the validator sees
        // executables of the wrong architecture.
        registry.insert(
            WRONG_ARCH_EXECUTABLE_CASE,
            vec![
                FixupAction::RemoveArch {
                    arch: ARCH_AARCH64.to_string(),
                },
                FixupAction::DuplicateArch {
                    from: ARCH_X86_64.to_string(),
                    to: ARCH_AARCH64.to_string(),
                },
            ],
        );
        registry
    }

    pub fn insert(&mut self, case_id: impl Into<String>, actions: Vec<FixupAction>) {
        self.entries.insert(case_id.into(), actions);
    }

    pub fn actions_for(&self, case_id: &str) -> &[FixupAction] {
        self.entries.get(case_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<FixupAction>)> {
        self.entries.iter()
    }

    /// Applies the case's fixups in order. Returns how many were applied.
    pub fn apply(
        &self,
        repo: &Repository,
        ref_kinds: &[String],
        case_id: &str,
    ) -> Result<usize> {
        let actions = self.actions_for(case_id);
        for action in actions {
            info!(case = case_id, stage = "fixup", %action, "applying fixup");
            apply_action(repo, ref_kinds, action).with_context(|| format!("fixup {action}"))?;
        }
        Ok(actions.len())
    }
}

fn apply_action(repo: &Repository, ref_kinds: &[String], action: &FixupAction) -> Result<()> {
    match action {
        FixupAction::RemoveArch { arch } => {
            for dir in repo.arch_subtrees(ref_kinds, arch)? {
                util::rm_rf(&dir).with_context(|| format!("remove: {}", dir.display()))?;
            }
        }
        FixupAction::DuplicateArch { from, to } => {
            let sources = repo.arch_subtrees(ref_kinds, from)?;
            if sources.is_empty() {
                anyhow::bail!(
                    "no `{from}` ref subtree under {}",
                    repo.refs_heads_dir().display()
                );
            }
            for src in sources {
                let dst = src.with_file_name(to);
                util::rm_rf(&dst).with_context(|| format!("remove: {}", dst.display()))?;
                util::copy_tree(&src, &dst)?;

                let want = util::tree_digest(&src)?;
                let got = util::tree_digest(&dst)?;
                if want != got {
                    anyhow::bail!(
                        "copied tree {} does not match {} (sha256 {got} != {want})",
                        dst.display(),
                        src.display()
                    );
                }
            }
        }
    }
    Ok(())
}
