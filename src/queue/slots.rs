use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::queue::song::SlotId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotUse {
    Idle,
    /// A fetch may be writing the slot file.
    Fetching,
    /// The slot file is being deleted.
    Reclaiming,
}

/// Hands out slot ids in strict rotation and tracks which slots are busy.
///
/// Assignment never waits: the n-th call to [`SlotAllocator::allocate`] returns
/// `n mod capacity`. Whether a slot may be written is a separate question,
/// answered by [`SlotAllocator::acquire`], which refuses while a previous fetch
/// or a file deletion on the same slot is still outstanding.
#[derive(Debug)]
pub struct SlotAllocator {
    uses: Vec<SlotUse>,
    issued: u64,
}

impl SlotAllocator {
    pub fn new(capacity: usize) -> Self {
        Self { uses: vec![SlotUse::Idle; capacity.max(1)], issued: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.uses.len()
    }

    pub fn allocate(&mut self) -> SlotId {
        let slot = (self.issued % self.uses.len() as u64) as usize;
        self.issued += 1;
        SlotId(slot)
    }

    pub fn state(&self, slot: SlotId) -> SlotUse {
        self.uses[slot.0]
    }

    /// Idle -> Fetching. Returns false if the slot is busy.
    pub fn acquire(&mut self, slot: SlotId) -> bool {
        if self.uses[slot.0] != SlotUse::Idle {
            return false;
        }
        self.uses[slot.0] = SlotUse::Fetching;
        true
    }

    pub fn begin_reclaim(&mut self, slot: SlotId) {
        self.uses[slot.0] = SlotUse::Reclaiming;
    }

    pub fn release(&mut self, slot: SlotId) {
        self.uses[slot.0] = SlotUse::Idle;
    }
}

/// Maps slots to files inside the cache directory (`<dir>/<slot>.<ext>`).
#[derive(Debug, Clone)]
pub struct SlotFiles {
    dir: PathBuf,
    extension: String,
}

impl SlotFiles {
    pub fn new(dir: impl Into<PathBuf>, extension: &str) -> Self {
        Self { dir: dir.into(), extension: extension.trim_start_matches('.').to_string() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, slot: SlotId) -> PathBuf {
        self.dir.join(format!("{}.{}", slot.0, self.extension))
    }

    /// Creates the cache directory and drops slot files left by an earlier run.
    pub fn prepare(&self, capacity: usize) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("create cache dir {}", self.dir.display()))?;
        self.clear(capacity);
        Ok(())
    }

    pub fn clear(&self, capacity: usize) {
        for slot in 0..capacity {
            let path = self.path(SlotId(slot));
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "removed stale slot file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(?e, path = %path.display(), "failed to remove slot file"),
            }
        }
    }

    pub async fn remove(&self, slot: SlotId) {
        let path = self.path(slot);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(%slot, "slot file deleted"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(?e, path = %path.display(), "failed to delete slot file"),
        }
    }
}
