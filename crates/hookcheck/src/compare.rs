use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use serde_json::Value;

/// One structural difference between an expected and an actual JSON document,
/// addressed by JSON pointer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Delta {
    Missing {
        pointer: String,
        expected: Value,
    },
    Unexpected {
        pointer: String,
        actual: Value,
    },
    Changed {
        pointer: String,
        expected: Value,
        actual: Value,
    },
}

impl Delta {
    pub fn render(&self) -> String {
        match self {
            Delta::Missing { pointer, expected } => {
                format!("- {}: {}", display_pointer(pointer), compact(expected))
            }
            Delta::Unexpected { pointer, actual } => {
                format!("+ {}: {}", display_pointer(pointer), compact(actual))
            }
            Delta::Changed {
                pointer,
                expected,
                actual,
            } => format!(
                "~ {}: expected {}, got {}",
                display_pointer(pointer),
                compact(expected),
                compact(actual)
            ),
        }
    }
}

/// Structural diff: object key order and formatting are irrelevant; arrays compare by
/// index. Empty iff the documents are equal.
pub fn diff_values(expected: &Value, actual: &Value) -> Vec<Delta> {
    let mut out = Vec::new();
    diff_at("", expected, actual, &mut out);
    out
}

fn diff_at(ptr: &str, expected: &Value, actual: &Value, out: &mut Vec<Delta>) {
    match (expected, actual) {
        (Value::Object(e), Value::Object(a)) => {
            let keys: BTreeSet<&String> = e.keys().chain(a.keys()).collect();
            for key in keys {
                let child = format!("{ptr}/{}", escape_json_pointer(key));
                match (e.get(key), a.get(key)) {
                    (Some(ev), Some(av)) => diff_at(&child, ev, av, out),
                    (Some(ev), None) => out.push(Delta::Missing {
                        pointer: child,
                        expected: ev.clone(),
                    }),
                    (None, Some(av)) => out.push(Delta::Unexpected {
                        pointer: child,
                        actual: av.clone(),
                    }),
                    (None, None) => {}
                }
            }
        }
        (Value::Array(e), Value::Array(a)) => {
            for idx in 0..e.len().max(a.len()) {
                let child = format!("{ptr}/{idx}");
                match (e.get(idx), a.get(idx)) {
                    (Some(ev), Some(av)) => diff_at(&child, ev, av, out),
                    (Some(ev), None) => out.push(Delta::Missing {
                        pointer: child,
                        expected: ev.clone(),
                    }),
                    (None, Some(av)) => out.push(Delta::Unexpected {
                        pointer: child,
                        actual: av.clone(),
                    }),
                    (None, None) => {}
                }
            }
        }
        _ => {
            if expected != actual {
                out.push(Delta::Changed {
                    pointer: ptr.to_string(),
                    expected: expected.clone(),
                    actual: actual.clone(),
                });
            }
        }
    }
}

pub fn read_json_file(path: &Path) -> Result<Value> {
    let bytes = std::fs::read(path).with_context(|| format!("read: {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parse JSON: {}", path.display()))
}

pub(crate) fn escape_json_pointer(s: &str) -> String {
    s.replace('~', "~0").replace('/', "~1")
}

fn display_pointer(ptr: &str) -> &str {
    if ptr.is_empty() {
        "(root)"
    } else {
        ptr
    }
}

fn compact(v: &Value) -> String {
    serde_json::to_string(v).unwrap_or_else(|_| "<unprintable>".to_string())
}

#[derive(Debug, Clone, Args)]
pub struct CompareArgs {
    /// Golden report.
    #[arg(long, value_name = "PATH")]
    pub expected: PathBuf,

    /// Report produced by the validator.
    #[arg(long, value_name = "PATH")]
    pub actual: PathBuf,
}

pub fn cmd_compare(args: CompareArgs) -> Result<std::process::ExitCode> {
    let expected = read_json_file(&args.expected)?;
    let actual = read_json_file(&args.actual)?;
    let deltas = diff_values(&expected, &actual);
    if deltas.is_empty() {
        println!("equal");
        return Ok(std::process::ExitCode::SUCCESS);
    }
    for delta in &deltas {
        println!("{}", delta.render());
    }
    println!("{} difference(s)", deltas.len());
    Ok(std::process::ExitCode::from(1))
}
