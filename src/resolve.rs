//! Data-origin resolution
//!
//! Given partial user input (a filename, or a plate-ifu / mangaid
//! identifier) and a configuration snapshot, commit to the unique backend
//! an entity will load from. The fallback order is deterministic: local
//! database, then local file, then remote API, constrained by the access
//! mode. Once committed, origin and release are frozen for the entity's
//! lifetime.

use crate::config::{Config, Mode};
use crate::db::DbStore;
use crate::error::{MangaError, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Which backend currently backs a loaded entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    File,
    Db,
    Api,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::File => write!(f, "file"),
            Origin::Db => write!(f, "db"),
            Origin::Api => write!(f, "api"),
        }
    }
}

/// Identifying arguments for one entity construction
#[derive(Debug, Clone, Default)]
pub struct Input {
    pub filename: Option<PathBuf>,
    pub plateifu: Option<String>,
    pub mangaid: Option<String>,
    /// Overrides the configured mode when set
    pub mode: Option<Mode>,
    /// Overrides the configured release when set
    pub release: Option<String>,
}

impl Input {
    pub fn filename(path: impl AsRef<Path>) -> Self {
        Self {
            filename: Some(path.as_ref().to_path_buf()),
            ..Self::default()
        }
    }

    pub fn plateifu(plateifu: impl Into<String>) -> Self {
        Self {
            plateifu: Some(plateifu.into()),
            ..Self::default()
        }
    }

    pub fn mangaid(mangaid: impl Into<String>) -> Self {
        Self {
            mangaid: Some(mangaid.into()),
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_release(mut self, release: impl Into<String>) -> Self {
        self.release = Some(release.into());
        self
    }
}

/// The entity kinds the resolver derives local paths for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntityKind {
    Cube,
    Maps,
}

impl EntityKind {
    pub(crate) fn label(self) -> &'static str {
        match self {
            EntityKind::Cube => "cube",
            EntityKind::Maps => "maps",
        }
    }

    fn default_path(self, config: &Config, release: &str, plateifu: &str) -> PathBuf {
        let scoped = Config {
            release: release.to_string(),
            ..config.clone()
        };
        match self {
            EntityKind::Cube => scoped.cube_path(plateifu),
            EntityKind::Maps => scoped.maps_path(plateifu),
        }
    }
}

/// A committed origin plus the backend handle material the loader needs
#[derive(Debug, Clone)]
pub(crate) struct Resolution {
    pub origin: Origin,
    /// Resolved absolute path, for `file` origin
    pub path: Option<PathBuf>,
    /// Identifier, when known at resolution time
    pub plateifu: Option<String>,
    pub mangaid: Option<String>,
    pub release: String,
}

/// Commit to a data origin for one entity construction.
pub(crate) fn resolve(kind: EntityKind, input: &Input, config: &Config) -> Result<Resolution> {
    let has_identifier = input.plateifu.is_some() || input.mangaid.is_some();
    if input.filename.is_some() == has_identifier {
        return Err(MangaError::InvalidArguments(
            "Enter filename, plateifu, or mangaid!".to_string(),
        ));
    }

    let mode = input.mode.unwrap_or(config.mode);
    let release = input
        .release
        .clone()
        .unwrap_or_else(|| config.release.clone());

    if let Some(filename) = &input.filename {
        if mode == Mode::Remote {
            return Err(MangaError::InvalidArguments(
                "filename not allowed in remote mode".to_string(),
            ));
        }

        let absolute = to_absolute(filename)?;
        if !absolute.exists() {
            return Err(MangaError::FileNotFound(absolute.display().to_string()));
        }
        debug!("resolved {} to file origin: {}", kind.label(), absolute.display());
        return Ok(Resolution {
            origin: Origin::File,
            path: Some(absolute),
            plateifu: input.plateifu.clone(),
            mangaid: input.mangaid.clone(),
            release,
        });
    }

    // Identifier path. Local sources first unless the mode forbids them.
    if mode != Mode::Remote {
        if let Some(db_path) = &config.db_path {
            match probe_db(db_path, input, &release) {
                Ok(Some(plateifu)) => {
                    debug!("resolved {} {} to db origin", kind.label(), plateifu);
                    return Ok(Resolution {
                        origin: Origin::Db,
                        path: None,
                        plateifu: Some(plateifu),
                        mangaid: input.mangaid.clone(),
                        release,
                    });
                }
                Ok(None) if mode == Mode::Local => {
                    // No rows for this identifier.
                    let id = identifier(input);
                    return Err(MangaError::NotFound(format!(
                        "Could not retrieve {} for plate-ifu {}: No Results Found",
                        kind.label(),
                        id
                    )));
                }
                Ok(None) => {}
                Err(err) if mode == Mode::Local => return Err(err),
                Err(err) => debug!("db probe failed, falling back: {}", err),
            }
        }

        // Local file derived from configuration and identifier. A mangaid
        // alone cannot be turned into a path without the DB.
        if let Some(plateifu) = &input.plateifu {
            let path = kind.default_path(config, &release, plateifu);
            if path.exists() {
                debug!("resolved {} {} to file origin", kind.label(), plateifu);
                return Ok(Resolution {
                    origin: Origin::File,
                    path: Some(path),
                    plateifu: Some(plateifu.clone()),
                    mangaid: input.mangaid.clone(),
                    release,
                });
            }
            if mode == Mode::Local {
                return Err(MangaError::FileNotFound(path.display().to_string()));
            }
        } else if mode == Mode::Local {
            return Err(MangaError::Db(format!(
                "No db connected to resolve mangaid {:?}",
                input.mangaid.as_deref().unwrap_or("")
            )));
        }
    }

    // Remote mode, or every local avenue exhausted under auto. The load
    // request itself doubles as the remote existence check.
    debug!("resolved {} to api origin", kind.label());
    Ok(Resolution {
        origin: Origin::Api,
        path: None,
        plateifu: input.plateifu.clone(),
        mangaid: input.mangaid.clone(),
        release,
    })
}

/// Look the identifier up in the DB. `Ok(Some(plateifu))` on a hit,
/// `Ok(None)` on zero rows; DB-layer failures are classified by the caller
/// according to mode.
fn probe_db(db_path: &Path, input: &Input, release: &str) -> Result<Option<String>> {
    let db = DbStore::open(db_path)?;

    let plateifu = match (&input.plateifu, &input.mangaid) {
        (Some(plateifu), _) => Some(plateifu.clone()),
        (None, Some(mangaid)) => db.resolve_mangaid(mangaid, release)?,
        (None, None) => None,
    };

    let Some(plateifu) = plateifu else {
        return Ok(None);
    };

    if db.cube_exists(&plateifu, release)? {
        Ok(Some(plateifu))
    } else {
        Ok(None)
    }
}

fn identifier(input: &Input) -> String {
    input
        .plateifu
        .clone()
        .or_else(|| input.mangaid.clone())
        .unwrap_or_default()
}

fn to_absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()?.join(path))
}
