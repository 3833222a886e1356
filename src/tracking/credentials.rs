//! Cached tracking-service credentials.
//!
//! Stored as a small JSON file under the user config directory. The store
//! itself never talks to the network; callers are expected to verify a
//! credential set (via `Session::connect`) before saving it.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub url: String,
    pub user: String,
    pub secret: String,
    /// `true` for interactive user login, `false` for script-key auth.
    #[serde(default)]
    pub user_login: bool,
}

pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Could not determine config directory")?;
        Ok(config_dir.join("shotsub").join("credentials.json"))
    }

    pub fn open_default() -> Result<Self> {
        Ok(Self::new(Self::default_path()?))
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Load cached credentials, or `None` when nothing is stored.
    pub fn load(&self) -> Result<Option<Credentials>> {
        if !self.path.is_file() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read credentials: {}", self.path.display()))?;
        let creds = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse credentials: {}", self.path.display()))?;
        Ok(Some(creds))
    }

    pub fn save(&self, creds: &Credentials) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create credentials directory: {}", parent.display())
            })?;
        }
        let contents = serde_json::to_string_pretty(creds).context("Failed to serialize credentials")?;
        fs::write(&self.path, contents)
            .with_context(|| format!("Failed to write credentials: {}", self.path.display()))?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        if self.path.is_file() {
            fs::remove_file(&self.path).with_context(|| {
                format!("Failed to remove credentials: {}", self.path.display())
            })?;
        }
        Ok(())
    }
}
