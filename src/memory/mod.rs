//! The `memory` command: collect memory readings from test logs and chart them.

pub mod output;
pub mod readings;
pub mod sources;

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use tracing::{debug, info, warn};

use crate::app::AppContext;
use crate::command::Command;
use crate::error::CliError;
use crate::option::LiveOption;
use crate::runner::SpawnOptions;
use output::{flat_records, grouped_records, render_csv, render_script, write_outputs, Format, SourceData};
use readings::{chart_points, extract_readings, Metric};
use sources::{fetch_source, list_log_directory, read_source_file};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Parse,
    Clear,
    Edit,
}

impl FromStr for Mode {
    type Err = CliError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "parse" => Ok(Mode::Parse),
            "clear" => Ok(Mode::Clear),
            "edit" => Ok(Mode::Edit),
            other => Err(CliError::UnknownMode(other.to_string())),
        }
    }
}

/// Locations used by one run, resolved under the memory root.
#[derive(Debug, Clone, PartialEq, Eq)]
struct MemoryPaths {
    logs_dir: PathBuf,
    output_dir: PathBuf,
    sources: PathBuf,
}

impl MemoryPaths {
    fn from_command(command: &Command, root: &Path) -> Self {
        let under_root = |option: &str| {
            command
                .values(option)
                .iter()
                .fold(root.to_path_buf(), |path, segment| path.join(segment))
        };
        Self {
            logs_dir: under_root("logs-dir"),
            output_dir: under_root("output-dir"),
            sources: under_root("sources"),
        }
    }
}

pub fn parse_memory_logs<'a>(command: &'a Command, _args: Vec<String>, app: &'a AppContext) -> BoxFuture<'a, Result<()>> {
    async move {
        let paths = MemoryPaths::from_command(command, &app.settings.memory_root);
        match first_value::<Mode>(command, "mode", Mode::Parse)? {
            Mode::Clear => {
                info!("clearing local memory logs and data outputs");
                clear_directories(&[paths.logs_dir.as_path(), paths.output_dir.as_path()]).await
            }
            Mode::Edit => {
                info!("opening source file for editing");
                edit_sources(app, &paths.sources).await;
                Ok(())
            }
            Mode::Parse => parse(command, app, &paths).await,
        }
    }
    .boxed()
}

fn first_value<T>(command: &Command, option: &str, fallback: T) -> Result<T, CliError>
where
    T: FromStr<Err = CliError>,
{
    match command.option(option).and_then(LiveOption::first_value) {
        Some(value) => value.parse(),
        None => Ok(fallback),
    }
}

async fn parse(command: &Command, app: &AppContext, paths: &MemoryPaths) -> Result<()> {
    let (entries, consulted) = if command.has_option("local") {
        debug!("reading memory logs from logs folder");
        (list_log_directory(&paths.logs_dir).await?, &paths.logs_dir)
    } else {
        debug!("reading memory logs from source file");
        (read_source_file(&paths.sources).await?, &paths.sources)
    };
    if entries.is_empty() {
        return Err(CliError::NoSources(consulted.display().to_string()).into());
    }

    info!("parsing memory data from {} sources", entries.len());
    let client = reqwest::Client::builder()
        .user_agent(format!("odev/{}", env!("CARGO_PKG_VERSION")))
        .timeout(app.settings.fetch_timeout)
        .build()
        .context("failed to build HTTP client")?;
    let contents = try_join_all(
        entries
            .iter()
            .map(|entry| fetch_source(&client, entry, &paths.logs_dir)),
    )
    .await?;

    let metric = first_value::<Metric>(command, "metric", Metric::Used)?;
    let variance = command.has_option("variance");
    let include_mobile = command.has_option("mobile");
    let data: Vec<SourceData> = entries
        .into_iter()
        .zip(contents)
        .map(|(entry, content)| {
            let points = chart_points(&extract_readings(&content), metric, variance, include_mobile);
            if points.is_empty() {
                warn!("memory log source {} is empty", entry.label);
            } else {
                let charted = points.iter().filter(|point| point.value.is_some()).count();
                debug!("got {} memory readings ({} charted) from source: {}", points.len(), charted, entry.label);
            }
            SourceData {
                label: entry.label,
                points,
            }
        })
        .collect();

    let script = match first_value::<Format>(command, "format", Format::Grouped)? {
        Format::Grouped => render_script(&grouped_records(&data)?)?,
        Format::Flat => render_script(&flat_records(&data))?,
    };
    let csv = if command.has_option("csv") {
        Some(render_csv(&data)?)
    } else {
        None
    };
    write_outputs(&paths.output_dir, script, csv).await?;

    if command.has_option("open") {
        open_viewer(app).await;
    }
    Ok(())
}

/// Empties each directory; a missing directory is left alone.
async fn clear_directories(directories: &[&Path]) -> Result<()> {
    try_join_all(directories.iter().map(|dir| clear_directory(dir))).await?;
    Ok(())
}

async fn clear_directory(dir: &Path) -> Result<()> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err).with_context(|| format!("failed to list {}", dir.display())),
    };
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let removed = if entry.file_type().await?.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        removed.with_context(|| format!("failed to remove {}", path.display()))?;
    }
    Ok(())
}

/// Tries each configured editor in turn until one succeeds.
async fn edit_sources(app: &AppContext, sources: &Path) {
    let path = sources.display().to_string();
    for editor in &app.settings.editors {
        match app
            .children
            .spawn(&[editor.clone(), path.clone()], SpawnOptions::default())
            .await
        {
            Ok(_) => return,
            Err(err) => debug!("editor {} unavailable: {}", editor, err),
        }
    }
    debug!("no editor could open {}", path);
}

async fn open_viewer(app: &AppContext) {
    let index = app.settings.memory_root.join("memory_data").join("index.html");
    info!("opening graph view in browser");
    let argv = [app.settings.opener.clone(), index.display().to_string()];
    if let Err(err) = app.children.spawn(&argv, SpawnOptions::ignore_fail()).await {
        warn!("could not open {}: {}", index.display(), err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes_are_validated() {
        assert_eq!("clear".parse::<Mode>(), Ok(Mode::Clear));
        assert_eq!(
            "purge".parse::<Mode>().unwrap_err().to_string(),
            "unknown mode for memory parsing: purge"
        );
    }

    #[tokio::test]
    async fn clearing_empties_directories_and_skips_missing_ones() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("logs");
        std::fs::create_dir_all(logs.join("nested")).unwrap();
        std::fs::write(logs.join("run.txt"), "x").unwrap();
        std::fs::write(logs.join("nested").join("deep.txt"), "y").unwrap();
        let missing = dir.path().join("output");

        clear_directories(&[logs.as_path(), missing.as_path()]).await.unwrap();
        assert!(logs.exists());
        assert_eq!(std::fs::read_dir(&logs).unwrap().count(), 0);
        assert!(!missing.exists());
    }
}
