//! External interface: source-tree ownership lookup.
//!
//! `resolve_owner(repo_root, rel_path) -> (email?, confidence)`. Consults
//! `CODEOWNERS` (repo root, `.github/`, `docs/`) with prefix/`*`-suffix
//! matching at confidence 0.9, falling back to `git blame` at confidence
//! 0.6. Best-effort: any failure yields `(None, 0.0)`, never an error.

use std::path::{Path, PathBuf};
use std::sync::mpsc;

use crate::config::GIT_BLAME_TIMEOUT;

const CODEOWNERS_LOCATIONS: [&str; 3] = ["CODEOWNERS", ".github/CODEOWNERS", "docs/CODEOWNERS"];

fn find_codeowners(repo_root: &Path) -> Option<PathBuf> {
    CODEOWNERS_LOCATIONS
        .iter()
        .map(|rel| repo_root.join(rel))
        .find(|p| p.is_file())
}

/// Does `pattern` (a CODEOWNERS glob: exact path, prefix, or `*`-suffix)
/// match `rel_path`?
fn pattern_matches(pattern: &str, rel_path: &str) -> bool {
    let pattern = pattern.trim_start_matches('/');
    if let Some(prefix) = pattern.strip_suffix('*') {
        rel_path.starts_with(prefix)
    } else {
        rel_path == pattern || rel_path.starts_with(&format!("{pattern}/"))
    }
}

/// Parse a CODEOWNERS file, returning the owner for `rel_path` if any rule
/// matches. CODEOWNERS semantics: later rules override earlier ones, so we
/// keep scanning and return the last match.
fn owner_from_codeowners(contents: &str, rel_path: &str) -> Option<String> {
    let mut matched_owner = None;
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let Some(pattern) = parts.next() else {
            continue;
        };
        let Some(owner) = parts.next() else {
            continue;
        };
        if pattern_matches(pattern, rel_path) {
            matched_owner = Some(owner.trim_start_matches('@').to_string());
        }
    }
    matched_owner
}

/// Runs `git blame --porcelain` with a hard wall-clock bound. `Command::output`
/// has no built-in timeout, so the child is spawned directly, stdout is drained
/// on a background thread, and the main thread polls `try_wait` until the
/// process exits or `GIT_BLAME_TIMEOUT` elapses, killing it on the latter.
fn git_blame_email(repo_root: &Path, rel_path: &str) -> Option<String> {
    if !repo_root.exists() {
        return None;
    }

    let mut child = std::process::Command::new("git")
        .arg("-C")
        .arg(repo_root)
        .arg("blame")
        .arg("--porcelain")
        .arg(rel_path)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::null())
        .spawn()
        .ok()?;

    let (tx, rx) = mpsc::channel();
    let mut stdout = child.stdout.take()?;
    std::thread::spawn(move || {
        use std::io::Read;
        let mut buf = Vec::new();
        let _ = stdout.read_to_end(&mut buf);
        let _ = tx.send(buf);
    });

    let deadline = std::time::Instant::now() + GIT_BLAME_TIMEOUT;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if std::time::Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return None;
                }
                std::thread::sleep(std::time::Duration::from_millis(25));
            }
            Err(_) => return None,
        }
    };

    if !status.success() {
        return None;
    }

    let stdout_bytes = rx.recv_timeout(GIT_BLAME_TIMEOUT).ok()?;
    let stdout = String::from_utf8_lossy(&stdout_bytes);
    for line in stdout.lines() {
        if let Some(rest) = line.strip_prefix("author-mail ") {
            let email = rest.trim_start_matches('<').trim_end_matches('>');
            return Some(email.to_string());
        }
    }
    None
}

/// Best-effort ownership resolution. `rel_path` is the nodeid's file-path
/// prefix (everything before the first `::`).
pub fn resolve_owner(repo_root: &Path, rel_path: &str) -> (Option<String>, f64) {
    if let Some(codeowners_path) = find_codeowners(repo_root) {
        if let Ok(contents) = std::fs::read_to_string(&codeowners_path) {
            if let Some(owner) = owner_from_codeowners(&contents, rel_path) {
                return (Some(owner), 0.9);
            }
        }
    }

    match git_blame_email(repo_root, rel_path) {
        Some(email) => (Some(email), 0.6),
        None => (None, 0.0),
    }
}
