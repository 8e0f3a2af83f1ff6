//! Durable crawl checkpoint: a single JSON file recording the last fully
//! committed district and page. Corruption is treated as "no prior progress".

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub current_district: String,
    /// -1 means the district has not been started (or was completed).
    pub current_page: i32,
    pub total_pages: i32,
}

impl Checkpoint {
    pub fn sentinel() -> Self {
        Self {
            current_district: String::new(),
            current_page: -1,
            total_pages: 0,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.current_district.is_empty()
    }
}

pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the persisted checkpoint. A missing or corrupt file initializes
    /// and persists the sentinel instead; this never fails the caller.
    pub fn load(&self) -> Checkpoint {
        match fs::read_to_string(&self.path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(checkpoint) => return checkpoint,
                Err(e) => warn!("checkpoint file unreadable ({e}); starting fresh"),
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("checkpoint file unreadable ({e}); starting fresh"),
        }

        let sentinel = Checkpoint::sentinel();
        if let Err(e) = self.write(&sentinel) {
            warn!("could not persist initial checkpoint: {e:#}");
        }
        sentinel
    }

    /// Overwrite the checkpoint synchronously. Called after every committed
    /// page, and with `page = -1, total_pages = 0` when a district completes.
    pub fn save(&self, district: &str, page: i32, total_pages: i32) -> Result<()> {
        self.write(&Checkpoint {
            current_district: district.to_string(),
            current_page: page,
            total_pages,
        })
    }

    // Temp file + rename so a crash mid-write leaves the old checkpoint intact.
    fn write(&self, checkpoint: &Checkpoint) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_string(checkpoint)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
