//! Configuration management for odev.
//!
//! This module defines the structure of the optional `odev.toml` file and
//! resolves it, together with the user's home directory, into the `Settings`
//! used by commands.

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "odev.toml";
const DEBUG_ENV: &str = "ODEV_DEBUG";
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 60;

/// Top-level configuration structure corresponding to `odev.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Git checkout of the community sources (used for the default database name).
    pub community_root: Option<PathBuf>,
    /// Server entry point script.
    pub server_bin: Option<PathBuf>,
    /// Interpreter used to run the server.
    pub python: Option<String>,
    /// Addon directories, by name. `community` is the one forced by `--community`.
    pub addon_paths: Option<BTreeMap<String, PathBuf>>,
    /// Named addon packs expanded by the `addons` option.
    pub addon_packs: Option<BTreeMap<String, Vec<String>>>,
    /// Directory that holds `memory_data/`.
    pub memory_root: Option<PathBuf>,
    /// Editors tried in order by `memory edit`.
    pub editors: Option<Vec<String>>,
    /// Program used to open the chart viewer.
    pub opener: Option<String>,
    /// Start with debug logs enabled.
    pub debug: Option<bool>,
    /// Timeout for downloading log sources, in seconds.
    pub fetch_timeout_secs: Option<u64>,
}

/// Loads and parses the configuration from a file path.
pub fn load_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: Config = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(config)
}

/// Looks for `odev.toml` in the current directory.
pub fn default_config_path() -> Option<PathBuf> {
    let path = Path::new(DEFAULT_CONFIG_FILE);
    if path.exists() {
        Some(path.to_path_buf())
    } else {
        None
    }
}

/// Resolved settings: configuration values with defaults applied.
#[derive(Debug, Clone)]
pub struct Settings {
    pub community_root: PathBuf,
    pub server_bin: PathBuf,
    pub python: String,
    pub addon_paths: BTreeMap<String, PathBuf>,
    pub addon_packs: BTreeMap<String, Vec<String>>,
    pub memory_root: PathBuf,
    pub editors: Vec<String>,
    pub opener: String,
    pub debug: bool,
    pub fetch_timeout: Duration,
}

impl Settings {
    pub fn from_config(config: Config, home: &Path) -> Self {
        let community_root = config.community_root.unwrap_or_else(|| home.join("odoo"));
        let addon_paths = config.addon_paths.unwrap_or_else(|| {
            BTreeMap::from([
                ("community".to_string(), community_root.join("addons")),
                ("design-themes".to_string(), home.join("design-themes")),
                ("enterprise".to_string(), home.join("enterprise")),
            ])
        });
        Self {
            server_bin: config
                .server_bin
                .unwrap_or_else(|| community_root.join("odoo-bin")),
            community_root,
            python: config.python.unwrap_or_else(|| "python3".to_string()),
            addon_paths,
            addon_packs: config.addon_packs.unwrap_or_else(default_addon_packs),
            memory_root: config.memory_root.unwrap_or_else(|| PathBuf::from(".")),
            editors: config
                .editors
                .unwrap_or_else(|| vec!["code".into(), "codium".into(), "nano".into()]),
            opener: config.opener.unwrap_or_else(default_opener),
            debug: config.debug.unwrap_or(false) || debug_env_enabled(),
            fetch_timeout: Duration::from_secs(
                config.fetch_timeout_secs.unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS),
            ),
        }
    }

    /// Addon path forced by the `community` option.
    pub fn community_addons(&self) -> PathBuf {
        self.addon_paths
            .get("community")
            .cloned()
            .unwrap_or_else(|| self.community_root.join("addons"))
    }
}

pub fn home_dir() -> PathBuf {
    env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

fn debug_env_enabled() -> bool {
    env::var(DEBUG_ENV)
        .ok()
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

fn default_opener() -> String {
    if cfg!(target_os = "macos") {
        "open".to_string()
    } else {
        "xdg-open".to_string()
    }
}

fn default_addon_packs() -> BTreeMap<String, Vec<String>> {
    let pack = |modules: &[&str]| modules.iter().map(|m| m.to_string()).collect::<Vec<_>>();
    let sale = pack(&["crm", "project", "website", "sale_subscription"]);
    BTreeMap::from([
        ("default".to_string(), pack(&["crm", "project", "website"])),
        (
            "hr".to_string(),
            pack(&["crm", "project", "planning", "hr_holidays_attendance", "hr_payroll"]),
        ),
        ("sale".to_string(), sale.clone()),
        ("sales".to_string(), sale),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_optional_fields() {
        let raw = r#"
community_root = "/src/odoo"
python = "python3.12"
editors = ["vim"]
opener = "firefox"
debug = true
fetch_timeout_secs = 5

[addon_paths]
community = "/src/odoo/addons"
enterprise = "/src/enterprise"

[addon_packs]
mini = ["crm"]
"#;
        let config: Config = toml::from_str(raw).unwrap();
        let settings = Settings::from_config(config, Path::new("/home/dev"));
        assert_eq!(settings.community_root, PathBuf::from("/src/odoo"));
        assert_eq!(settings.server_bin, PathBuf::from("/src/odoo/odoo-bin"));
        assert_eq!(settings.python, "python3.12");
        assert_eq!(settings.editors, vec!["vim"]);
        assert_eq!(settings.opener, "firefox");
        assert!(settings.debug);
        assert_eq!(settings.fetch_timeout, Duration::from_secs(5));
        assert_eq!(settings.addon_paths.len(), 2);
        assert_eq!(settings.addon_packs["mini"], vec!["crm"]);
        assert_eq!(settings.community_addons(), PathBuf::from("/src/odoo/addons"));
    }

    #[test]
    fn defaults_derive_from_home() {
        let settings = Settings::from_config(Config::default(), Path::new("/home/dev"));
        assert_eq!(settings.server_bin, PathBuf::from("/home/dev/odoo/odoo-bin"));
        let names: Vec<&str> = settings.addon_paths.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["community", "design-themes", "enterprise"]);
        assert_eq!(settings.community_addons(), PathBuf::from("/home/dev/odoo/addons"));
        assert_eq!(settings.addon_packs["sales"], settings.addon_packs["sale"]);
        assert_eq!(settings.editors, vec!["code", "codium", "nano"]);
    }
}
