//! Where connection states are kept between restarts.

use super::{ConnectionState, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::fs;

/// Storage of `ConnectionState`s, keyed by connection id.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Returns the stored state of `id`, or `None` if nothing has been saved yet.
    async fn load(&self, id: &str) -> Result<Option<ConnectionState>>;

    async fn save(&self, state: &ConnectionState) -> Result<()>;

    /// Removes the stored state of `id`.  Removing a state that does not exist is not an error.
    async fn destroy(&self, id: &str) -> Result<()>;
}

/// Stores each state as a JSON file in a directory.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// The file of `id`.  Bytes other than ASCII letters, digits, `-` and `_` are written as
    /// `%XX`, so that two ids never share a file.
    fn path(&self, id: &str) -> PathBuf {
        let mut name = String::with_capacity(id.len() + 5);
        for b in id.bytes() {
            if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
                name.push(char::from(b));
            } else {
                name.push_str(&format!("%{:02X}", b));
            }
        }
        name.push_str(".json");
        self.dir.join(name)
    }
}

#[async_trait]
impl StateStore for FileStore {
    async fn load(&self, id: &str) -> Result<Option<ConnectionState>> {
        let contents = match fs::read(self.path(id)).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_slice(&contents)?))
    }

    async fn save(&self, state: &ConnectionState) -> Result<()> {
        let contents = serde_json::to_vec_pretty(state)?;
        let path = self.path(&state.id);
        let tmp = path.with_extension("json.tmp");
        fs::create_dir_all(&self.dir).await?;
        fs::write(&tmp, contents).await?;
        fs::rename(&tmp, &path).await?;
        log::trace!("{}: State saved to {}", state.id, path.display());
        Ok(())
    }

    async fn destroy(&self, id: &str) -> Result<()> {
        match fs::remove_file(self.path(id)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Keeps serialized states in memory.  Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    states: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    fn states(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.states.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self, id: &str) -> Result<Option<ConnectionState>> {
        let contents = self.states().get(id).cloned();
        match contents {
            Some(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, state: &ConnectionState) -> Result<()> {
        let contents = serde_json::to_string(state)?;
        self.states().insert(state.id.clone(), contents);
        Ok(())
    }

    async fn destroy(&self, id: &str) -> Result<()> {
        self.states().remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("kiwibnc-{}-{}", name, std::process::id()));
        dir
    }

    #[tokio::test]
    async fn test_file_store() {
        let dir = temp_dir("file-store");
        let store = FileStore::new(&dir);

        assert!(store.load("net/1").await.unwrap().is_none());

        let mut state = ConnectionState::new("net/1");
        state.nick = "kiwi".to_owned();
        state.add_buffer("#kiwi").joined = true;
        store.save(&state).await.unwrap();
        assert!(dir.join("net%2F1.json").exists());

        // Ids that only differ by special characters get their own files.
        let mut other = ConnectionState::new("net_1");
        other.nick = "other".to_owned();
        store.save(&other).await.unwrap();
        assert_eq!(store.load("net_1").await.unwrap().unwrap().nick, "other");

        let loaded = store.load("net/1").await.unwrap().unwrap();
        assert_eq!(loaded.nick, "kiwi");
        assert!(loaded.get_buffer("#KIWI").unwrap().joined);

        store.destroy("net/1").await.unwrap();
        store.destroy("net/1").await.unwrap();
        assert!(store.load("net/1").await.unwrap().is_none());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_file_store_corrupted() {
        let dir = temp_dir("corrupted");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("bad.json"), b"{not json").unwrap();

        let store = FileStore::new(&dir);
        assert!(matches!(store.load("bad").await, Err(super::super::Error::Format(_))));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
