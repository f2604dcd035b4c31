//! Process configuration consumed by the origin resolver
//!
//! The resolver never reads ambient global state. Callers build a [`Config`]
//! snapshot (or take [`Config::default`]) and pass it explicitly; the
//! snapshot is immutable for the lifetime of the entities built from it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Preferred data access mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Only local sources (DB, then file). Never touches the network.
    Local,
    /// Only the remote API. Filenames are not resolvable in this mode.
    Remote,
    /// Try local sources first, fall back to the remote API.
    Auto,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Auto
    }
}

/// Immutable configuration snapshot for one resolution/load
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Current data release (e.g. "MPL-5")
    pub release: String,

    /// Preferred access mode
    pub mode: Mode,

    /// Root directory under which survey files and snapshots live
    pub data_root: PathBuf,

    /// Path to the local sqlite database. `None` means no DB is connected.
    pub db_path: Option<PathBuf>,

    /// Base URL of the remote API
    pub api_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            release: "MPL-5".to_string(),
            mode: Mode::Auto,
            data_root: PathBuf::from("data"),
            db_path: None,
            api_url: "https://api.sdss.org/marvin".to_string(),
        }
    }
}

impl Config {
    /// Create a configuration for a given release with default everything else
    pub fn new(release: impl Into<String>) -> Self {
        Self {
            release: release.into(),
            ..Self::default()
        }
    }

    /// Set the access mode
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the local data root
    pub fn with_data_root(mut self, root: impl AsRef<Path>) -> Self {
        self.data_root = root.as_ref().to_path_buf();
        self
    }

    /// Connect the local database
    pub fn with_db_path(mut self, path: impl AsRef<Path>) -> Self {
        self.db_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the remote API base URL
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    /// Whether a local database is configured
    pub fn db_connected(&self) -> bool {
        self.db_path.is_some()
    }

    /// Derive the canonical cube file path for a plate-ifu under this config
    pub fn cube_path(&self, plateifu: &str) -> PathBuf {
        self.data_root
            .join(&self.release)
            .join(plateifu)
            .join(format!("manga-{}-LOGCUBE.fits", plateifu))
    }

    /// Derive the canonical maps file path for a plate-ifu under this config
    pub fn maps_path(&self, plateifu: &str) -> PathBuf {
        self.data_root
            .join(&self.release)
            .join(plateifu)
            .join(format!("manga-{}-MAPS.fits", plateifu))
    }
}
