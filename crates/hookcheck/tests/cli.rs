#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use hookcheck_contracts::HOOKCHECK_RUN_REPORT_SCHEMA_VERSION;
use serde_json::Value;

const FAKE_BUILDER: &str = r#"#!/bin/sh
set -e
repo=""
builddir=""
manifest=""
for a in "$@"; do
  case "$a" in
    --repo=*) repo="${a#--repo=}" ;;
    --*) ;;
    *) if [ -z "$builddir" ]; then builddir="$a"; else manifest="$a"; fi ;;
  esac
done
if grep -q fail-build "$manifest"; then
  echo boom >&2
  exit 3
fi
id=$(basename "$manifest" .yml)
rm -rf "$builddir"
mkdir -p "$repo/refs/heads/app/$id/x86_64" "$repo/refs/heads/app/$id/aarch64" "$builddir/screenshots"
echo x86-commit > "$repo/refs/heads/app/$id/x86_64/stable"
echo arm-commit > "$repo/refs/heads/app/$id/aarch64/stable"
echo png > "$builddir/screenshots/shot.png"
"#;

const FAKE_COMMIT: &str = r#"#!/bin/sh
set -e
[ "$1" = commit ] || exit 9
shift
repo=""
branch=""
dir=""
for a in "$@"; do
  case "$a" in
    --repo=*) repo="${a#--repo=}" ;;
    --branch=*) branch="${a#--branch=}" ;;
    --*) ;;
    *) dir="$a" ;;
  esac
done
if [ ! -d "$dir" ]; then
  echo "no such dir: $dir" >&2
  exit 4
fi
mkdir -p "$(dirname "$repo/refs/heads/$branch")"
(cd "$dir" && find . | sort && find . -type f | sort | xargs cat) | cksum > "$repo/refs/heads/$branch"
"#;

const FAKE_VALIDATOR: &str = r#"#!/bin/sh
[ "$1" = validate ] || exit 9
if [ -f refs/heads/screenshots/x86_64 ] && [ -f refs/heads/screenshots/aarch64 ]; then
  shots=true
else
  shots=false
fi
arm=$(cat refs/heads/app/*/aarch64/stable)
x86=$(cat refs/heads/app/*/x86_64/stable)
printf '{"screenshots": %s, "aarch64": "%s", "x86_64": "%s"}\n' "$shots" "$arm" "$x86"
"#;

const ARM_COMMIT_BROKEN: &str = r#"#!/bin/sh
case "$*" in
  *--branch=screenshots/aarch64*)
    echo "arm commit broke" >&2
    exit 7
    ;;
esac
exec "$(dirname "$0")/commit" "$@"
"#;

const SILENT_COMMIT: &str = "#!/bin/sh\nexit 0\n";

const BROKEN_VALIDATOR: &str = r#"#!/bin/sh
echo '{"partial": true}'
echo "validator crashed" >&2
exit 5
"#;

fn run_hookcheck(args: &[&str]) -> Output {
    let exe = env!("CARGO_BIN_EXE_hookcheck");
    Command::new(exe)
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("run hookcheck")
}

fn write_bytes(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent dir");
    }
    std::fs::write(path, bytes).expect("write file");
}

fn write_script(path: &Path, body: &str) {
    write_bytes(path, body.as_bytes());
    let mut perms = std::fs::metadata(path).expect("metadata").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).expect("chmod");
}

fn s(path: &Path) -> &str {
    path.to_str().expect("utf-8 path")
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

struct Suite {
    _tmp: tempfile::TempDir,
    root: PathBuf,
    manifests: PathBuf,
    work: PathBuf,
    config: PathBuf,
}

impl Suite {
    fn new() -> Self {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path().to_path_buf();
        let bin = root.join("bin");
        write_script(&bin.join("builder"), FAKE_BUILDER);
        write_script(&bin.join("commit"), FAKE_COMMIT);
        write_script(&bin.join("validator"), FAKE_VALIDATOR);
        write_script(&bin.join("broken-validator"), BROKEN_VALIDATOR);
        write_script(&bin.join("arm-commit-broken"), ARM_COMMIT_BROKEN);
        write_script(&bin.join("silent-commit"), SILENT_COMMIT);

        let config = root.join("hookcheck.json");
        let doc = serde_json::json!({
            "schema_version": "hookcheck.config@0.1.0",
            "builder": {"program": s(&bin.join("builder"))},
            "commit": {"program": s(&bin.join("commit")), "args": ["commit"]},
            "validator": {"program": s(&bin.join("validator"))},
        });
        write_bytes(&config, doc.to_string().as_bytes());

        let manifests = root.join("manifests");
        std::fs::create_dir_all(&manifests).expect("mkdir manifests");
        Suite {
            _tmp: tmp,
            work: root.join("work"),
            manifests,
            config,
            root,
        }
    }

    fn add_case(&self, id: &str, manifest: &str, expected: Option<Value>) {
        write_bytes(
            &self.manifests.join(format!("{id}.yml")),
            manifest.as_bytes(),
        );
        if let Some(expected) = expected {
            let text = serde_json::to_string_pretty(&expected).expect("serialize");
            write_bytes(
                &self.manifests.join(format!("{id}.expected.json")),
                text.as_bytes(),
            );
        }
    }

    fn add_acceptance_cases(&self) {
        self.add_case(
            "A",
            "app-id: A\n",
            Some(serde_json::json!({"screenshots": true, "aarch64": "arm-commit", "x86_64": "x86-commit"})),
        );
        self.add_case(
            "com.example.NoScreenshotBranch",
            "app-id: com.example.NoScreenshotBranch\n",
            Some(serde_json::json!({"screenshots": false, "aarch64": "arm-commit", "x86_64": "x86-commit"})),
        );
        self.add_case(
            "com.example.WrongArchExecutable",
            "app-id: com.example.WrongArchExecutable\n",
            Some(serde_json::json!({"screenshots": true, "aarch64": "x86-commit", "x86_64": "x86-commit"})),
        );
    }

    fn run(&self, extra: &[&str]) -> Output {
        let mut args = vec![
            "run",
            "--config",
            s(&self.config),
            "--manifest-dir",
            s(&self.manifests),
            "--work-dir",
            s(&self.work),
        ];
        args.extend_from_slice(extra);
        run_hookcheck(&args)
    }
}

#[test]
fn acceptance_suite_passes() {
    let suite = Suite::new();
    suite.add_acceptance_cases();

    let out = suite.run(&[]);
    assert_eq!(out.status.code(), Some(0), "stderr:\n{}", stderr(&out));
    let text = stdout(&out);
    assert_eq!(
        text,
        "passed\tA\n\
         passed\tcom.example.NoScreenshotBranch\n\
         passed\tcom.example.WrongArchExecutable\n\
         summary: 3 passed, 0 mismatched (exit=0)\n"
    );

    let wrong_arch = suite
        .work
        .join("repos/com.example.WrongArchExecutable/refs/heads/app/com.example.WrongArchExecutable/aarch64/stable");
    assert_eq!(
        std::fs::read_to_string(wrong_arch).expect("read ref"),
        "x86-commit\n"
    );
    assert!(!suite
        .work
        .join("repos/com.example.NoScreenshotBranch/refs/heads/screenshots")
        .exists());
    assert!(suite.work.join("results/A.json").is_file());

    let shots = suite.work.join("repos/A/refs/heads/screenshots");
    let x86 = std::fs::read(shots.join("x86_64")).expect("read x86_64 screenshot ref");
    let arm = std::fs::read(shots.join("aarch64")).expect("read aarch64 screenshot ref");
    assert!(!x86.is_empty());
    assert_eq!(x86, arm, "screenshot branches point at different trees");
}

#[test]
fn screenshot_commit_failure_aborts_run() {
    let suite = Suite::new();
    suite.add_acceptance_cases();
    let broken = suite.root.join("bin/arm-commit-broken");

    let out = suite.run(&["--commit-tool", s(&broken)]);
    assert_eq!(out.status.code(), Some(1));
    let err = stderr(&out);
    assert!(err.contains("error: commit failed for A"), "stderr:\n{err}");
    assert!(err.contains("exit code 7"), "stderr:\n{err}");
    assert!(err.contains("arm commit broke"), "stderr:\n{err}");
    assert!(!suite.work.join("repos/com.example.NoScreenshotBranch").exists());
    assert!(stdout(&out).contains("aborted at commit: 0 passed, 0 mismatched, 3 not run (exit=1)"));
}

#[test]
fn commit_without_ref_is_infra_failure() {
    let suite = Suite::new();
    suite.add_acceptance_cases();
    let silent = suite.root.join("bin/silent-commit");

    let out = suite.run(&["--commit-tool", s(&silent)]);
    assert_eq!(out.status.code(), Some(1));
    let err = stderr(&out);
    assert!(err.contains("error: commit failed for A"), "stderr:\n{err}");
    assert!(err.contains("screenshots/x86_64 does not exist"), "stderr:\n{err}");
}

#[test]
fn mismatch_is_reported_and_run_continues() {
    let suite = Suite::new();
    suite.add_acceptance_cases();
    suite.add_case(
        "A",
        "app-id: A\n",
        Some(serde_json::json!({"screenshots": true, "aarch64": "zzz", "x86_64": "x86-commit"})),
    );

    let out = suite.run(&[]);
    assert_eq!(out.status.code(), Some(1), "stderr:\n{}", stderr(&out));
    let text = stdout(&out);
    assert!(text.starts_with("mismatch\tA\n    ~ /aarch64: expected \"zzz\", got \"arm-commit\"\n"));
    assert!(text.contains("passed\tcom.example.NoScreenshotBranch\n"));
    assert!(text.contains("passed\tcom.example.WrongArchExecutable\n"));
    assert!(text.ends_with("summary: 2 passed, 1 mismatched (exit=1)\n"));
}

#[test]
fn build_failure_aborts_before_next_case() {
    let suite = Suite::new();
    suite.add_case("A", "app-id: A\n# fail-build\n", Some(serde_json::json!({})));
    suite.add_case("B", "app-id: B\n", Some(serde_json::json!({})));

    let out = suite.run(&[]);
    assert_eq!(out.status.code(), Some(1));
    let err = stderr(&out);
    assert!(err.contains("error: build failed for A"), "stderr:\n{err}");
    assert!(err.contains("boom"), "stderr:\n{err}");
    assert!(!suite.work.join("repos/B").exists());
    assert!(stdout(&out).contains("aborted at build: 0 passed, 0 mismatched, 2 not run (exit=1)"));
}

#[test]
fn validator_failure_is_fatal_and_keeps_output() {
    let suite = Suite::new();
    suite.add_acceptance_cases();
    let broken = suite.root.join("bin/broken-validator");

    let out = suite.run(&["--validator", s(&broken)]);
    assert_eq!(out.status.code(), Some(1));
    let err = stderr(&out);
    assert!(err.contains("error: validate failed for A"), "stderr:\n{err}");
    assert!(err.contains("exit code 5"), "stderr:\n{err}");
    assert_eq!(
        std::fs::read_to_string(suite.work.join("results/A.json")).expect("read report"),
        "{\"partial\": true}\n"
    );
    assert!(!suite.work.join("repos/com.example.NoScreenshotBranch").exists());
}

#[test]
fn missing_fixture_is_fatal() {
    let suite = Suite::new();
    suite.add_case("A", "app-id: A\n", None);

    let out = suite.run(&[]);
    assert_eq!(out.status.code(), Some(1));
    let err = stderr(&out);
    assert!(
        err.contains("error: compare failed for A: missing expected report"),
        "stderr:\n{err}"
    );
}

#[test]
fn revalidate_without_build_is_stable() {
    let suite = Suite::new();
    suite.add_acceptance_cases();
    let report_out = suite.root.join("out/report.json");

    let out = suite.run(&[]);
    assert_eq!(out.status.code(), Some(0), "stderr:\n{}", stderr(&out));
    let first = std::fs::read(suite.work.join("results/A.json")).expect("read report");

    let out = suite.run(&[
        "--no-build",
        "--builder",
        "/nonexistent/builder",
        "--json",
        "--report-out",
        s(&report_out),
    ]);
    assert_eq!(out.status.code(), Some(0), "stderr:\n{}", stderr(&out));
    let second = std::fs::read(suite.work.join("results/A.json")).expect("read report");
    assert_eq!(first, second);

    let v: Value = serde_json::from_slice(&out.stdout).expect("parse stdout JSON");
    assert_eq!(v["schema_version"], HOOKCHECK_RUN_REPORT_SCHEMA_VERSION);
    assert_eq!(v["invocation"]["build"], false);
    assert_eq!(v["summary"]["passed"], 3);
    assert_eq!(v["summary"]["exit_code"], 0);
    for case in v["cases"].as_array().expect("cases[]") {
        assert_eq!(case["status"], "pass");
        assert_eq!(case["stages"], serde_json::json!(["validate", "compare"]));
    }

    let on_disk: Value =
        serde_json::from_slice(&std::fs::read(&report_out).expect("read report-out"))
            .expect("parse report-out");
    assert_eq!(on_disk["summary"], v["summary"]);
}

#[test]
fn filter_selects_cases_and_empty_selection_fails() {
    let suite = Suite::new();
    suite.add_acceptance_cases();

    let out = suite.run(&["--filter", "WrongArch"]);
    assert_eq!(out.status.code(), Some(0), "stderr:\n{}", stderr(&out));
    assert!(stdout(&out).starts_with("passed\tcom.example.WrongArchExecutable\n"));
    assert!(!suite.work.join("repos/A").exists());

    let out = suite.run(&["--filter", "A", "--exact"]);
    assert_eq!(out.status.code(), Some(0), "stderr:\n{}", stderr(&out));
    assert!(stdout(&out).contains("summary: 1 passed"));

    let out = suite.run(&["--filter", "nothing-matches"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("error: discover failed"));
}

#[test]
fn bad_config_is_usage_error() {
    let suite = Suite::new();
    suite.add_acceptance_cases();
    write_bytes(&suite.config, br#"{"buildr": {"program": "x"}}"#);

    let out = suite.run(&[]);
    assert_eq!(out.status.code(), Some(2));
    assert!(stderr(&out).contains("unknown field"));

    let out = run_hookcheck(&[]);
    assert_eq!(out.status.code(), Some(2));

    let out = run_hookcheck(&["run", "--help"]);
    assert_eq!(out.status.code(), Some(0));
    assert!(stdout(&out).contains("2 on usage, config, or report-writing errors"));
}

#[test]
fn list_shows_special_handling() {
    let suite = Suite::new();
    suite.add_acceptance_cases();
    suite.add_case("B", "app-id: B\n", None);

    let out = run_hookcheck(&[
        "list",
        "--config",
        s(&suite.config),
        "--manifest-dir",
        s(&suite.manifests),
    ]);
    assert_eq!(out.status.code(), Some(0), "stderr:\n{}", stderr(&out));
    assert_eq!(
        stdout(&out),
        "A\t\n\
         B\tmissing-fixture\n\
         com.example.NoScreenshotBranch\tno-screenshots\n\
         com.example.WrongArchExecutable\tremove_arch(aarch64),duplicate_arch(x86_64->aarch64)\n"
    );
}

#[test]
fn compare_subcommand_reports_differences() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let expected = tmp.path().join("expected.json");
    let actual = tmp.path().join("actual.json");
    write_bytes(&expected, br#"{"b": [1, 2], "a": true}"#);
    write_bytes(&actual, b"{\n  \"a\": true,\n  \"b\": [1, 2]\n}\n");

    let out = run_hookcheck(&["compare", "--expected", s(&expected), "--actual", s(&actual)]);
    assert_eq!(out.status.code(), Some(0));
    assert_eq!(stdout(&out), "equal\n");

    write_bytes(&actual, br#"{"a": false, "b": [1]}"#);
    let out = run_hookcheck(&["compare", "--expected", s(&expected), "--actual", s(&actual)]);
    assert_eq!(out.status.code(), Some(1));
    assert_eq!(
        stdout(&out),
        "~ /a: expected true, got false\n- /b/1: 2\n2 difference(s)\n"
    );
}
