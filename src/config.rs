use crate::store::{StoreSettings, DEFAULT_LIMIT};
use crate::types::QuotePolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct VellumConfig {
    pub database: Option<String>,
    /// Milliseconds to wait on a locked database; 0 fails immediately
    pub busy_timeout_ms: Option<u64>,
    pub default_limit: Option<u32>,
    /// `placeholder` or `double`
    pub literal_quotes: Option<QuotePolicy>,
}

impl VellumConfig {
    /// Store settings, with defaults for everything left unset
    pub fn settings(&self) -> anyhow::Result<StoreSettings> {
        let default_limit = self.default_limit.unwrap_or(DEFAULT_LIMIT);
        if default_limit == 0 {
            anyhow::bail!("default_limit must be at least 1");
        }
        Ok(StoreSettings {
            busy_timeout: Duration::from_millis(self.busy_timeout_ms.unwrap_or(0)),
            default_limit,
            quote_policy: self.literal_quotes.unwrap_or_default(),
        })
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("vellum.toml")
}

pub fn default_database_path_in(base: &Path) -> PathBuf {
    base.join(".vellum").join("vellum.db")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<VellumConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: VellumConfig = toml::from_str(&contents)?;
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &VellumConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_db_dir(db_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

pub fn ensure_gitignore(project_root: &Path) -> anyhow::Result<()> {
    let gitignore_path = project_root.join(".gitignore");
    let entry = ".vellum/";

    let mut content = String::new();
    if gitignore_path.exists() {
        content = std::fs::read_to_string(&gitignore_path)?;
        if content.lines().any(|line| line.trim() == entry) {
            return Ok(());
        }
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
    }
    content.push_str(entry);
    content.push('\n');
    std::fs::write(&gitignore_path, content)?;
    Ok(())
}
