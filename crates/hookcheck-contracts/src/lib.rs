//! Shared, version-pinned identifiers.
//!
//! These constants are the single source of truth for schema/version strings that
//! appear in machine-readable I/O, and for the well-known names the harness agrees on
//! with the builder, commit tool, and validator.

pub const HOOKCHECK_RUN_REPORT_SCHEMA_VERSION: &str = "hookcheck.run.report@0.1.0";
pub const HOOKCHECK_CONFIG_SCHEMA_VERSION: &str = "hookcheck.config@0.1.0";

pub const DEFAULT_BUILDER_PROGRAM: &str = "flatpak-builder";
pub const DEFAULT_COMMIT_PROGRAM: &str = "ostree";
pub const DEFAULT_COMMIT_VERB: &str = "commit";
pub const DEFAULT_VALIDATOR_PROGRAM: &str = "flat-manager-hooks";
pub const VALIDATOR_VERB: &str = "validate";

pub const DEFAULT_MIRROR_SCREENSHOTS_URL: &str = "https://dl.flathub.org/repo/screenshots";

pub const DEFAULT_MANIFEST_EXTENSION: &str = "yml";
pub const EXPECTED_REPORT_SUFFIX: &str = ".expected.json";

/// Branches `screenshots/<arch>` are committed for every case that is not exempt.
pub const SCREENSHOT_BRANCH_PREFIX: &str = "screenshots";
/// Subdirectory of the build output tree holding mirrored screenshots.
pub const SCREENSHOT_DIR_NAME: &str = "screenshots";

pub const ARCH_X86_64: &str = "x86_64";
pub const ARCH_AARCH64: &str = "aarch64";
pub const DEFAULT_SCREENSHOT_ARCHES: &[&str] = &[ARCH_X86_64, ARCH_AARCH64];

pub const DEFAULT_REF_KINDS: &[&str] = &["app", "runtime"];

pub const NO_SCREENSHOT_BRANCH_CASE: &str = "com.example.NoScreenshotBranch";
pub const WRONG_ARCH_EXECUTABLE_CASE: &str = "com.example.WrongArchExecutable";

/// Per-case layout below the work directory.
pub const REPOS_DIR: &str = "repos";
pub const BUILD_DIR: &str = "builddir";
pub const RESULTS_DIR: &str = "results";

pub fn screenshot_branch(arch: &str) -> String {
    format!("{SCREENSHOT_BRANCH_PREFIX}/{arch}")
}
