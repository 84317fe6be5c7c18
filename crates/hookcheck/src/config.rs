use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use hookcheck_contracts::{
    DEFAULT_BUILDER_PROGRAM, DEFAULT_COMMIT_PROGRAM, DEFAULT_COMMIT_VERB,
    DEFAULT_MANIFEST_EXTENSION, DEFAULT_MIRROR_SCREENSHOTS_URL, DEFAULT_REF_KINDS,
    DEFAULT_SCREENSHOT_ARCHES, DEFAULT_VALIDATOR_PROGRAM, HOOKCHECK_CONFIG_SCHEMA_VERSION,
    NO_SCREENSHOT_BRANCH_CASE,
};
use serde::Deserialize;

use crate::fixup::{FixupAction, FixupRegistry};
use crate::tool::ToolSpec;

/// Arguments shared by every command that operates on a manifest directory.
#[derive(Debug, Clone, Args)]
pub struct SuiteArgs {
    /// Harness config (JSON). Fields present replace the built-in defaults.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory holding `<id>.<ext>` manifests and `<id>.expected.json` fixtures.
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub manifest_dir: PathBuf,

    /// Directory receiving `repos/`, `builddir/`, and `results/`.
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub work_dir: PathBuf,

    #[arg(long, value_name = "SUBSTR")]
    pub filter: Option<String>,

    #[arg(long)]
    pub exact: bool,

    /// Override the builder program.
    #[arg(long, value_name = "PROGRAM")]
    pub builder: Option<String>,

    /// Override the commit tool program.
    #[arg(long, value_name = "PROGRAM")]
    pub commit_tool: Option<String>,

    /// Override the validator program.
    #[arg(long, value_name = "PROGRAM")]
    pub validator: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct HarnessConfig {
    pub schema_version: Option<String>,
    pub builder: ToolSpec,
    pub commit: ToolSpec,
    pub validator: ToolSpec,
    pub mirror_screenshots_url: String,
    pub manifest_extension: String,
    pub screenshot_arches: Vec<String>,
    pub ref_kinds: Vec<String>,
    pub no_screenshot_cases: BTreeSet<String>,
    pub fixups: FixupRegistry,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            schema_version: None,
            builder: ToolSpec::new(DEFAULT_BUILDER_PROGRAM, &[]),
            commit: ToolSpec::new(DEFAULT_COMMIT_PROGRAM, &[DEFAULT_COMMIT_VERB]),
            validator: ToolSpec::new(DEFAULT_VALIDATOR_PROGRAM, &[]),
            mirror_screenshots_url: DEFAULT_MIRROR_SCREENSHOTS_URL.to_string(),
            manifest_extension: DEFAULT_MANIFEST_EXTENSION.to_string(),
            screenshot_arches: DEFAULT_SCREENSHOT_ARCHES
                .iter()
                .map(|a| (*a).to_string())
                .collect(),
            ref_kinds: DEFAULT_REF_KINDS.iter().map(|k| (*k).to_string()).collect(),
            no_screenshot_cases: BTreeSet::from([NO_SCREENSHOT_BRANCH_CASE.to_string()]),
            fixups: FixupRegistry::builtin(),
        }
    }
}

impl HarnessConfig {
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        let mut config: HarnessConfig = serde_json::from_slice(bytes)?;
        config.manifest_extension = config
            .manifest_extension
            .trim_start_matches('.')
            .to_string();
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("read config: {}", path.display()))?;
        Self::from_json_bytes(&bytes).with_context(|| format!("config: {}", path.display()))
    }

    /// Cases exempt from the screenshot branch commits.
    pub fn is_screenshot_exempt(&self, case_id: &str) -> bool {
        self.no_screenshot_cases.contains(case_id)
    }

    fn validate(&self) -> Result<()> {
        if let Some(v) = &self.schema_version {
            if v != HOOKCHECK_CONFIG_SCHEMA_VERSION {
                anyhow::bail!(
                    "schema_version mismatch: expected {HOOKCHECK_CONFIG_SCHEMA_VERSION} got {v:?}"
                );
            }
        }
        for (name, tool) in [
            ("builder", &self.builder),
            ("commit", &self.commit),
            ("validator", &self.validator),
        ] {
            if tool.program.trim().is_empty() {
                anyhow::bail!("{name}.program must not be empty");
            }
        }
        if self.manifest_extension.is_empty() {
            anyhow::bail!("manifest_extension must not be empty");
        }
        for arch in self.screenshot_arches.iter().chain(self.ref_kinds.iter()) {
            check_path_component(arch)?;
        }
        for (case_id, actions) in self.fixups.iter() {
            for action in actions {
                match action {
                    FixupAction::RemoveArch { arch } => check_path_component(arch)?,
                    FixupAction::DuplicateArch { from, to } => {
                        check_path_component(from)?;
                        check_path_component(to)?;
                        if from == to {
                            anyhow::bail!(
                                "fixups[{case_id:?}]: cannot duplicate {from} onto itself"
                            );
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

fn check_path_component(s: &str) -> Result<()> {
    if s.is_empty() || s == "." || s == ".." || s.contains('/') || s.contains('\\') {
        anyhow::bail!("invalid name {s:?}: expected a single path component");
    }
    Ok(())
}

/// Built-in defaults, then the config file, then per-tool CLI overrides.
pub fn load_config(args: &SuiteArgs) -> Result<HarnessConfig> {
    let mut config = match &args.config {
        Some(path) => HarnessConfig::load(path)?,
        None => HarnessConfig::default(),
    };
    if let Some(program) = &args.builder {
        config.builder.program = program.clone();
    }
    if let Some(program) = &args.commit_tool {
        config.commit.program = program.clone();
    }
    if let Some(program) = &args.validator {
        config.validator.program = program.clone();
    }
    config.validate()?;
    Ok(config)
}
