//! Addon discovery and expansion of `addons` / `update` values.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use futures::future::try_join_all;
use regex::Regex;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::CliError;

pub const MANIFEST_FILE_NAME: &str = "__manifest__.py";
const ALL_ADDONS: &str = "all";

static VALID_MODULE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][\w-]*$").expect("valid regex"));
static VALUE_SEPARATOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*,\s*").expect("valid regex"));

/// Addons available in the configured addon paths, discovered on first use.
#[derive(Debug)]
pub struct AddonCatalog {
    paths: Vec<PathBuf>,
    packs: BTreeMap<String, Vec<String>>,
    modules: OnceCell<Vec<String>>,
}

impl AddonCatalog {
    pub fn new(paths: Vec<PathBuf>, packs: BTreeMap<String, Vec<String>>) -> Self {
        Self {
            paths,
            packs,
            modules: OnceCell::new(),
        }
    }

    pub async fn valid_addons(&self) -> Result<&[String]> {
        let modules = self
            .modules
            .get_or_try_init(|| async {
                let found = try_join_all(self.paths.iter().map(|path| path_modules(path))).await?;
                Ok::<_, anyhow::Error>(found.concat())
            })
            .await?;
        Ok(modules.as_slice())
    }

    /// Expands raw option values into addon names.
    ///
    /// Values are comma-separated; `all` yields every addon except foreign
    /// localisations, and pack names expand to their members.
    pub async fn expand(&self, values: Vec<String>) -> Result<Vec<String>> {
        let valid = self.valid_addons().await?;
        let mut addons = Vec::new();
        let mut invalid = Vec::new();
        let names = values
            .iter()
            .flat_map(|value| VALUE_SEPARATOR.split(value.trim()))
            .filter(|name| !name.is_empty());
        for name in names {
            if name == ALL_ADDONS {
                return Ok(valid
                    .iter()
                    .filter(|addon| !addon.starts_with("l10n_") || addon.starts_with("l10n_be"))
                    .cloned()
                    .collect());
            }
            let members = match self.packs.get(name) {
                Some(pack) => pack.clone(),
                None => vec![name.to_string()],
            };
            for member in members {
                if valid.contains(&member) {
                    addons.push(member);
                } else {
                    invalid.push(member);
                }
            }
        }
        if !invalid.is_empty() {
            debug!("valid addons: {}", valid.join(", "));
            return Err(CliError::InvalidAddons(invalid).into());
        }
        Ok(addons)
    }
}

/// Sorted names of the module directories directly under `path`.
async fn path_modules(path: &Path) -> Result<Vec<String>> {
    let mut entries = match tokio::fs::read_dir(path).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            warn!("addon path {} does not exist", path.display());
            return Ok(Vec::new());
        }
        Err(err) => {
            return Err(err).with_context(|| format!("failed to list {}", path.display()));
        }
    };
    let mut modules = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if !VALID_MODULE_NAME.is_match(&name) {
            continue;
        }
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        if tokio::fs::try_exists(entry.path().join(MANIFEST_FILE_NAME)).await? {
            modules.push(name);
        }
    }
    modules.sort();
    Ok(modules)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(root: &Path, name: &str) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(MANIFEST_FILE_NAME), "{}").unwrap();
    }

    fn catalog(root: &Path) -> AddonCatalog {
        for name in ["crm", "project", "website", "l10n_be", "l10n_fr", "sale"] {
            module(root, name);
        }
        std::fs::create_dir_all(root.join("no_manifest")).unwrap();
        std::fs::create_dir_all(root.join("Upper")).unwrap();
        std::fs::write(root.join("file.py"), "").unwrap();
        let packs = BTreeMap::from([(
            "default".to_string(),
            vec!["crm".to_string(), "project".to_string(), "website".to_string()],
        )]);
        AddonCatalog::new(vec![root.to_path_buf(), root.join("missing")], packs)
    }

    #[tokio::test]
    async fn discovers_only_module_directories() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog(dir.path());
        assert_eq!(
            catalog.valid_addons().await.unwrap(),
            ["crm", "l10n_be", "l10n_fr", "project", "sale", "website"]
        );
    }

    #[tokio::test]
    async fn expands_packs_and_comma_lists() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog(dir.path());
        let addons = catalog
            .expand(vec!["default , sale".to_string(), "crm".to_string()])
            .await
            .unwrap();
        assert_eq!(addons, vec!["crm", "project", "website", "sale", "crm"]);
    }

    #[tokio::test]
    async fn all_skips_foreign_localisations() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog(dir.path());
        let addons = catalog.expand(vec!["all".to_string()]).await.unwrap();
        assert_eq!(addons, vec!["crm", "l10n_be", "project", "sale", "website"]);
    }

    #[tokio::test]
    async fn invalid_addons_are_all_reported() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog(dir.path());
        let err = catalog
            .expand(vec!["crm,nope".to_string(), "no_manifest".to_string()])
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<CliError>(),
            Some(&CliError::InvalidAddons(vec!["nope".into(), "no_manifest".into()]))
        );
    }
}
