//! Persistence layer backed by `sled`
//!
//! Every topic gets its own tree. Keys are the zero-padded creation timestamp
//! followed by a database-wide monotonic id, so iteration order is creation
//! order and the first key of a tree is the topic's oldest message.

use std::path::{Path, PathBuf};

use sled::{Db, Tree};
use tracing::{info, warn};

use crate::broker::message::Message;
use crate::persistence::Backlog;
use crate::utils::Result;

// Field order matters: `db` is dropped (and sled closed) before `storage`
// removes the directory.
pub struct SledBacklog {
    db: Db,
    storage: StorageDir,
}

struct StorageDir {
    path: PathBuf,
    discard_on_drop: bool,
}

impl Drop for StorageDir {
    fn drop(&mut self) {
        if !self.discard_on_drop {
            return;
        }

        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => info!("Discarded backlog at {}", self.path.display()),
            Err(e) => warn!("Failed to discard backlog at {}: {e}", self.path.display()),
        }
    }
}

impl SledBacklog {
    /// Open or create a sled database at `path`. With `discard_on_drop` the
    /// database directory is deleted once the backlog is dropped.
    pub fn open(path: impl AsRef<Path>, discard_on_drop: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let db = sled::open(&path)?;
        info!("Opened backlog at {}", path.display());
        Ok(Self {
            db,
            storage: StorageDir {
                path,
                discard_on_drop,
            },
        })
    }

    /// Directory of the underlying sled database.
    pub fn path(&self) -> &Path {
        &self.storage.path
    }

    fn tree(&self, topic: &str) -> Result<Tree> {
        // prefixed so a topic can never alias sled's default tree
        Ok(self.db.open_tree(format!("topic:{topic}"))?)
    }
}

impl Backlog for SledBacklog {
    fn insert(&self, message: &Message) -> Result<()> {
        let serialized = serde_json::to_vec(message)?;
        let key = format!("{:020}_{:020}", message.created_at, self.db.generate_id()?);
        self.tree(&message.topic)?.insert(key.as_bytes(), serialized)?;
        Ok(())
    }

    fn oldest(&self, topic: &str) -> Result<Option<Message>> {
        match self.tree(topic)?.first()? {
            Some((_, value)) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn delete_all(&self, topic: &str) -> Result<usize> {
        let tree = self.tree(topic)?;
        let removed = tree.len();
        tree.clear()?;
        Ok(removed)
    }

    fn count(&self, topic: &str) -> Result<usize> {
        Ok(self.tree(topic)?.len())
    }

    fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for SledBacklog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledBacklog")
            .field("db", &"sled::Db")
            .field("path", &self.storage.path)
            .field("discard_on_drop", &self.storage.discard_on_drop)
            .finish()
    }
}
