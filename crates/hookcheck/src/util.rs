use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

pub fn hex_lower(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(nybble_to_hex((b >> 4) & 0x0f));
        out.push(nybble_to_hex(b & 0x0f));
    }
    out
}

fn nybble_to_hex(n: u8) -> char {
    match n {
        0..=9 => (b'0' + n) as char,
        10..=15 => (b'a' + (n - 10)) as char,
        _ => '0',
    }
}

/// SHA-256 over a directory tree: relative paths, entry kinds, and file bytes, walked in
/// file-name order. Two trees digest equal iff they are byte-identical.
pub fn tree_digest(root: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.with_context(|| format!("walk: {}", root.display()))?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .with_context(|| format!("strip prefix: {}", entry.path().display()))?;
        let rel = rel.to_string_lossy();
        let ft = entry.file_type();
        if ft.is_dir() {
            hasher.update(format!("d {rel}\n").as_bytes());
        } else if ft.is_symlink() {
            let target = std::fs::read_link(entry.path())
                .with_context(|| format!("read link: {}", entry.path().display()))?;
            hasher.update(format!("l {rel} {}\n", target.display()).as_bytes());
        } else {
            let bytes = std::fs::read(entry.path())
                .with_context(|| format!("read: {}", entry.path().display()))?;
            hasher.update(format!("f {rel} {}\n", bytes.len()).as_bytes());
            hasher.update(&bytes);
        }
    }
    Ok(hex_lower(&hasher.finalize()))
}

/// Recursively copies `src` to `dst`. `dst` must not exist yet.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    for entry in WalkDir::new(src).sort_by_file_name() {
        let entry = entry.with_context(|| format!("walk: {}", src.display()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .with_context(|| format!("strip prefix: {}", entry.path().display()))?;
        let target = dst.join(rel);
        let ft = entry.file_type();
        if ft.is_dir() {
            std::fs::create_dir_all(&target)
                .with_context(|| format!("create dir: {}", target.display()))?;
        } else if ft.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target).with_context(|| {
                format!("copy {} -> {}", entry.path().display(), target.display())
            })?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    let link = std::fs::read_link(src).with_context(|| format!("read link: {}", src.display()))?;
    std::os::unix::fs::symlink(&link, dst)
        .with_context(|| format!("symlink {} -> {}", dst.display(), link.display()))
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, _dst: &Path) -> Result<()> {
    anyhow::bail!("cannot copy symlink on this platform: {}", src.display())
}

pub fn rm_rf(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(path) {
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

pub fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    cwd.join(path)
}

/// Milliseconds in `d`, saturating at `u64::MAX`.
pub fn duration_ms(d: std::time::Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

pub fn display_path<P: AsRef<Path>>(p: P) -> String {
    p.as_ref().display().to_string()
}
