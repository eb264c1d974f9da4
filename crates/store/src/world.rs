//! The durable world-state file.
//!
//! One JSON document, replaced atomically on every commit: write to a temp
//! file in the same directory, fsync, rename. A load that fails to parse
//! resets to defaults with a logged warning rather than blocking the turn.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;

use cortex_domain::error::{Error, Result};
use cortex_domain::world::WorldState;

pub struct WorldFile {
    path: PathBuf,
}

impl WorldFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read a consistent snapshot.
    ///
    /// A missing file yields defaults (first run). Unparseable or
    /// non-object content also yields defaults, with a warning; the
    /// previous file is left in place until the next commit.
    pub fn load(&self) -> WorldState {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return WorldState::default();
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "world state unreadable, using defaults");
                return WorldState::default();
            }
        };

        match serde_json::from_str::<WorldState>(&raw) {
            Ok(world) => world,
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "world state corrupt, resetting to defaults"
                );
                WorldState::default()
            }
        }
    }

    /// Atomic replace: temp file in the same directory + fsync + rename.
    pub fn save(&self, world: &WorldState) -> Result<()> {
        let json = serde_json::to_string_pretty(world)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut tmp = fs::File::create(&tmp_path)?;
            tmp.write_all(json.as_bytes())?;
            tmp.write_all(b"\n")?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Stamp `updated_at` and save, retrying once on failure.
    pub fn commit(&self, world: &mut WorldState) -> Result<()> {
        world.updated_at = Utc::now().to_rfc3339();

        if let Err(first) = self.save(world) {
            tracing::warn!(path = %self.path.display(), error = %first, "world write failed, retrying once");
            self.save(world)
                .map_err(|e| Error::WorldWrite(e.to_string()))?;
        }
        Ok(())
    }
}
