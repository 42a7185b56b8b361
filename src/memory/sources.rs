//! Where memory logs come from: a source-list file or the local logs folder.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::debug;

static BUILD_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"build/(.+?)/logs").expect("valid regex"));
static LABEL_SEPARATOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*=\s*").expect("valid regex"));
static FILE_EXTENSION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.\w+$").expect("valid regex"));
static UNDERSCORES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_+").expect("valid regex"));
static FILE_NAME_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s./:;#@-]+").expect("valid regex"));
static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\W").expect("valid regex"));

const MAX_FILE_NAME_LEN: usize = 255;

/// A labelled log location (URL or filesystem path).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub label: String,
    pub location: String,
}

impl SourceEntry {
    pub fn new(label: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            location: location.into(),
        }
    }

    pub fn is_url(&self) -> bool {
        self.location.starts_with("http://") || self.location.starts_with("https://")
    }
}

/// Parses a source list: one `label = location` or bare `location` per line.
///
/// Blank lines and lines starting with `#` or `;` are skipped. A repeated
/// label keeps its first position and takes the latest location.
pub fn parse_source_list(content: &str) -> Vec<SourceEntry> {
    let mut entries: Vec<SourceEntry> = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        let mut parts = LABEL_SEPARATOR.split(line);
        let first = parts.next().unwrap_or_default();
        let rest: Vec<&str> = parts.collect();
        let (label, location) = if rest.is_empty() {
            (infer_label(first), first.to_string())
        } else {
            let location = rest.join("=");
            let label = if first.is_empty() {
                infer_label(&location)
            } else {
                first.to_string()
            };
            (label, location)
        };
        let label = if label.is_empty() {
            format!("Build url #{}", entries.len() + 1)
        } else {
            unquote(&label).to_string()
        };
        match entries.iter_mut().find(|entry| entry.label == label) {
            Some(entry) => entry.location = location,
            None => entries.push(SourceEntry::new(label, location)),
        }
    }
    entries
}

/// Label for an unlabelled location: the build id of a `build/<id>/logs`
/// path, else its last path segment.
pub fn infer_label(location: &str) -> String {
    if let Some(caps) = BUILD_NAME.captures(location) {
        return caps[1].to_string();
    }
    let separator = if location.contains(std::path::MAIN_SEPARATOR) {
        std::path::MAIN_SEPARATOR
    } else {
        '/'
    };
    location.rsplit(separator).next().unwrap_or_default().to_string()
}

pub fn unquote(text: &str) -> &str {
    let quoted = text.len() >= 2
        && ((text.starts_with('"') && text.ends_with('"')) || (text.starts_with('\'') && text.ends_with('\'')));
    if quoted {
        &text[1..text.len() - 1]
    } else {
        text
    }
}

/// `memory_leak_tour.txt` -> `Memory leak tour`.
pub fn file_name_to_label(file_name: &str) -> String {
    let stripped = FILE_EXTENSION.replace(file_name, "");
    let spaced = UNDERSCORES.replace_all(&stripped, " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// File name under which a downloaded source is cached in the logs folder.
pub fn label_to_file_name(label: &str) -> String {
    let lowered = label.trim().to_lowercase();
    let separated = FILE_NAME_SEPARATOR.replace_all(&lowered, "_");
    let name: String = NON_WORD.replace_all(&separated, "").chars().take(MAX_FILE_NAME_LEN).collect();
    format!("{}.txt", name)
}

pub async fn read_source_file(path: &Path) -> Result<Vec<SourceEntry>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read source list {}", path.display()))?;
    Ok(parse_source_list(&content))
}

/// One entry per file in the logs folder, sorted by file name. A missing
/// folder yields no entries.
pub async fn list_log_directory(logs_dir: &Path) -> Result<Vec<SourceEntry>> {
    let mut dir = match tokio::fs::read_dir(logs_dir).await {
        Ok(dir) => dir,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err).with_context(|| format!("failed to list {}", logs_dir.display())),
    };
    let mut files: Vec<(String, PathBuf)> = Vec::new();
    while let Some(entry) = dir.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push((entry.file_name().to_string_lossy().to_string(), entry.path()));
        }
    }
    files.sort();
    Ok(files
        .into_iter()
        .map(|(name, path)| SourceEntry::new(file_name_to_label(&name), path.display().to_string()))
        .collect())
}

/// Fetches the text of one source. Downloads are also saved in `logs_dir`
/// so a later `--local` run can reuse them.
pub async fn fetch_source(client: &reqwest::Client, entry: &SourceEntry, logs_dir: &Path) -> Result<String> {
    if !entry.is_url() {
        debug!("reading memory logs from file: {}", entry.location);
        return tokio::fs::read_to_string(&entry.location)
            .await
            .with_context(|| format!("failed to read {}", entry.location));
    }
    debug!("fetching memory logs from URL: {}", entry.location);
    let content = client
        .get(&entry.location)
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .with_context(|| format!("failed to fetch {}", entry.location))?
        .text()
        .await
        .with_context(|| format!("failed to read response from {}", entry.location))?;
    tokio::fs::create_dir_all(logs_dir)
        .await
        .with_context(|| format!("failed to create {}", logs_dir.display()))?;
    let dest = logs_dir.join(label_to_file_name(&entry.label));
    tokio::fs::write(&dest, &content)
        .await
        .with_context(|| format!("failed to write {}", dest.display()))?;
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labelled_and_inferred_entries() {
        let entries = parse_source_list(
            "\
# nightly builds
MyBuild = https://example.com/log.txt
build/123/logs/mem.txt

; local copy
/tmp/runs/run_2.log
\"Quoted\"=https://example.com/q?a=b
",
        );
        assert_eq!(
            entries,
            vec![
                SourceEntry::new("MyBuild", "https://example.com/log.txt"),
                SourceEntry::new("123", "build/123/logs/mem.txt"),
                SourceEntry::new("run_2.log", "/tmp/runs/run_2.log"),
                SourceEntry::new("Quoted", "https://example.com/q?a=b"),
            ]
        );
        assert!(entries[0].is_url());
        assert!(!entries[1].is_url());
    }

    #[test]
    fn blank_inferred_label_is_numbered_and_duplicates_overwrite() {
        let entries = parse_source_list("a = one\nhttps://example.com/dir/\na = two\n");
        assert_eq!(
            entries,
            vec![
                SourceEntry::new("a", "two"),
                SourceEntry::new("Build url #2", "https://example.com/dir/"),
            ]
        );
    }

    #[test]
    fn build_label_stops_at_first_logs_segment() {
        assert_eq!(infer_label("https://ci/build/42/logs/x/build/7/logs/y"), "42");
    }

    #[test]
    fn file_names_and_labels() {
        assert_eq!(file_name_to_label("memory__leak_tour.txt"), "Memory leak tour");
        assert_eq!(label_to_file_name(" Build #12: web-tour "), "build_12_web_tour.txt");
        assert_eq!(unquote("'x'"), "x");
        assert_eq!(unquote("\"x'"), "\"x'");
    }

    #[tokio::test]
    async fn lists_files_of_the_logs_folder() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("second_run.txt"), "b").unwrap();
        std::fs::write(dir.path().join("first_run.txt"), "a").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        let entries = list_log_directory(dir.path()).await.unwrap();
        let labels: Vec<&str> = entries.iter().map(|entry| entry.label.as_str()).collect();
        assert_eq!(labels, vec!["First run", "Second run"]);
        assert!(list_log_directory(&dir.path().join("missing")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fetches_local_sources() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        std::fs::write(&path, "content").unwrap();
        let entry = SourceEntry::new("run", path.display().to_string());
        let client = reqwest::Client::new();
        let text = fetch_source(&client, &entry, dir.path()).await.unwrap();
        assert_eq!(text, "content");
    }
}
