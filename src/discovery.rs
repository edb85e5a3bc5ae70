//! Log file discovery for providers that keep local session logs

use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Directory depth searched below a Claude projects root
pub const CLAUDE_SCAN_DEPTH: usize = 3;

/// Directory depth searched below the Codex home; sessions nest by date
pub const CODEX_SCAN_DEPTH: usize = 5;

/// All Claude data roots that may contain project logs.
///
/// `CLAUDE_CONFIG_DIR` overrides everything and accepts a comma-separated
/// list of config directories, each getting a `projects` subpath. Without
/// it, both the XDG config location and the legacy dotfile location are
/// searched.
pub fn claude_project_roots() -> Vec<PathBuf> {
    if let Ok(env) = std::env::var("CLAUDE_CONFIG_DIR") {
        let mut roots = Vec::new();
        for part in env.split(',') {
            let trimmed = part.trim();
            if trimmed.is_empty() {
                continue;
            }
            roots.push(PathBuf::from(trimmed).join("projects"));
        }
        if !roots.is_empty() {
            return roots;
        }
    }

    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"));
    let xdg_config = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home.join(".config"));

    vec![
        xdg_config.join("claude").join("projects"),
        home.join(".claude").join("projects"),
    ]
}

/// The Codex home directory, honoring `CODEX_HOME`
pub fn codex_root() -> PathBuf {
    if let Ok(env) = std::env::var("CODEX_HOME") {
        let trimmed = env.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/"))
        .join(".codex")
}

/// Recursively collect `.jsonl` files below `root`, descending at most
/// `max_depth` directory levels. Missing or unreadable directories yield
/// nothing; dot-directories are skipped.
pub async fn find_log_files(root: &Path, max_depth: usize) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![(root.to_path_buf(), 0usize)];

    while let Some((dir, depth)) = stack.pop() {
        if depth >= max_depth {
            continue;
        }
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let file_type = match entry.file_type().await {
                Ok(file_type) => file_type,
                Err(_) => continue,
            };
            if file_type.is_dir() {
                if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
                    if name.starts_with('.') {
                        continue;
                    }
                }
                stack.push((path, depth + 1));
            } else if path.extension().and_then(|ext| ext.to_str()) == Some("jsonl") {
                files.push(path);
            }
        }
    }

    files
}

/// The `limit` most recently modified files. Files whose metadata cannot be
/// read sort last (epoch mtime) but are never dropped outright.
pub async fn most_recent_files(files: Vec<PathBuf>, limit: usize) -> Vec<PathBuf> {
    let mut stamped = Vec::with_capacity(files.len());
    for file in files {
        let mtime = match tokio::fs::metadata(&file).await {
            Ok(metadata) => metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            Err(_) => SystemTime::UNIX_EPOCH,
        };
        stamped.push((file, mtime));
    }

    stamped.sort_by(|a, b| b.1.cmp(&a.1));
    stamped.truncate(limit);
    stamped.into_iter().map(|(file, _)| file).collect()
}
