//! Handlers for the server-facing commands.

use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::app::AppContext;
use crate::command::Command;
use crate::runner::{exec_shell, exec_shell_with_timeout, SpawnOptions};

const FALLBACK_DATABASE: &str = "dev";
const GIT_TIMEOUT: Duration = Duration::from_secs(5);

static BRANCH_DATABASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+\.\d|saas-\d+\.\d|master)").expect("valid regex"));

pub fn start<'a>(command: &'a Command, args: Vec<String>, app: &'a AppContext) -> BoxFuture<'a, Result<()>> {
    async move {
        info!("starting database \"{}\"", command.values("database").join(" "));
        start_server(app, args).await
    }
    .boxed()
}

/// Drops the listed databases, then either starts the server on them (with
/// `--start`) or creates them empty.
pub fn create<'a>(command: &'a Command, args: Vec<String>, app: &'a AppContext) -> BoxFuture<'a, Result<()>> {
    async move {
        let databases = command.values("database");
        let auto_start = command.has_option("start");
        info!(
            "creating new database \"{}\" ({} auto-start)",
            databases.join(" "),
            if auto_start { "with" } else { "without" }
        );
        drop_databases(app, databases).await?;
        if auto_start {
            start_server(app, args).await
        } else {
            for database in databases {
                app.children
                    .spawn(&argv(["createdb", database.as_str()]), SpawnOptions::ignore_fail())
                    .await?;
            }
            Ok(())
        }
    }
    .boxed()
}

pub fn drop_db<'a>(command: &'a Command, _args: Vec<String>, app: &'a AppContext) -> BoxFuture<'a, Result<()>> {
    async move {
        let databases = command.values("database");
        info!("dropping database \"{}\"", databases.join(" "));
        drop_databases(app, databases).await
    }
    .boxed()
}

/// Lists the local databases.
pub fn list_databases<'a>(_command: &'a Command, _args: Vec<String>, app: &'a AppContext) -> BoxFuture<'a, Result<()>> {
    async move {
        app.children
            .spawn(&argv(["psql", "--list"]), SpawnOptions::default())
            .await?;
        Ok(())
    }
    .boxed()
}

async fn start_server(app: &AppContext, args: Vec<String>) -> Result<()> {
    let mut server = vec![
        app.settings.python.clone(),
        app.settings.server_bin.display().to_string(),
    ];
    server.extend(args);
    app.children.spawn(&server, SpawnOptions::default()).await?;
    Ok(())
}

// One `dropdb` per name: it only accepts a single database.
async fn drop_databases(app: &AppContext, databases: &[String]) -> Result<()> {
    for database in databases {
        app.children
            .spawn(&argv(["dropdb", "-f", database.as_str()]), SpawnOptions::ignore_fail())
            .await?;
    }
    Ok(())
}

fn argv<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(|part| part.to_string()).collect()
}

/// Default database name: the version prefix of the checked-out branch.
pub async fn default_database_name(community_root: PathBuf) -> Result<Vec<String>> {
    let command_line = format!(
        "git -C {} rev-parse --abbrev-ref HEAD",
        shell_words::quote(&community_root.display().to_string())
    );
    let name = match exec_shell_with_timeout(&command_line, Some(GIT_TIMEOUT)).await {
        Ok(branch) => database_for_branch(&branch),
        Err(err) => {
            warn!("could not read branch of {}: {}", community_root.display(), err);
            FALLBACK_DATABASE.to_string()
        }
    };
    Ok(vec![name])
}

fn database_for_branch(branch: &str) -> String {
    BRANCH_DATABASE
        .captures(branch)
        .map(|caps| caps[1].to_string())
        .unwrap_or_else(|| FALLBACK_DATABASE.to_string())
}

/// Kills whatever listens on the given ports. Finding nothing is expected
/// and stays quiet.
pub async fn stop_processes_on_ports(ports: &[String]) {
    if ports.is_empty() {
        return;
    }
    let mut ports = ports.to_vec();
    ports.sort();
    let joined = ports.join(",");

    // lsof exits 1 without output when nothing listens
    let pids = match exec_shell(&format!("lsof -ti :{}", joined)).await {
        Ok(output) => listening_pids(&output),
        Err(err) => {
            debug!("no process found on port(s) {}: {}", joined, err);
            return;
        }
    };
    if pids.is_empty() {
        return;
    }
    match exec_shell(&format!("kill -9 {}", pids.join(" "))).await {
        Ok(_) => info!("terminated existing processes listening on port(s): {}", joined),
        Err(err) => debug!("could not stop processes on port(s) {}: {}", joined, err),
    }
}

/// Distinct pids from `lsof -t` output, in order of appearance.
fn listening_pids(output: &str) -> Vec<String> {
    let mut pids: Vec<String> = Vec::new();
    for pid in output.split_whitespace() {
        if pid.parse::<u32>().is_ok() && !pids.iter().any(|seen| seen == pid) {
            pids.push(pid.to_string());
        }
    }
    pids
}
