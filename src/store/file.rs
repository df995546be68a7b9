use crate::error::CheckpointError;
use crate::store::CheckpointStore;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, trace};

/// source id -> partition id -> resume token
type StateMap = BTreeMap<String, BTreeMap<String, String>>;

/// Checkpoint store backed by a single JSON snapshot file
///
/// Tokens are kept in memory and the whole mapping is rewritten on every
/// [`flush`](CheckpointStore::flush). The snapshot is written to a sibling
/// temporary file and renamed over the previous one, so a crash mid-flush leaves
/// the last complete snapshot in place.
#[derive(Debug)]
pub struct FileCheckpointStore {
    path: PathBuf,
    states: Mutex<StateMap>,
    // serializes writers so an older snapshot can never be renamed over a newer one
    write_lock: tokio::sync::Mutex<()>,
}

impl FileCheckpointStore {
    /// Load the snapshot at `path`; a missing or empty file yields an empty store
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let path = path.as_ref().to_path_buf();
        let states = match std::fs::read(&path) {
            Ok(data) if data.iter().all(u8::is_ascii_whitespace) => StateMap::new(),
            Ok(data) => serde_json::from_slice(&data).map_err(|e| {
                CheckpointError::InvalidData(format!("{}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == ErrorKind::NotFound => StateMap::new(),
            Err(e) => {
                return Err(CheckpointError::ReadFailed(format!(
                    "{}: {}",
                    path.display(),
                    e
                )))
            }
        };

        info!(
            path = %path.display(),
            sources = states.len(),
            "Loaded checkpoint state"
        );

        Ok(Self {
            path,
            states: Mutex::new(states),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn write_snapshot(path: &Path, temp: &Path, data: &[u8]) -> Result<(), CheckpointError> {
        let write = || -> std::io::Result<()> {
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(temp)?;
            file.write_all(data)?;
            file.sync_all()?;
            std::fs::rename(temp, path)?;
            Self::sync_parent(path)
        };
        write().map_err(|e| CheckpointError::WriteFailed(format!("{}: {}", path.display(), e)))
    }

    /// Persist the rename itself by syncing the containing directory
    #[cfg(unix)]
    fn sync_parent(path: &Path) -> std::io::Result<()> {
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        std::fs::File::open(dir)?.sync_all()
    }

    #[cfg(not(unix))]
    fn sync_parent(_path: &Path) -> std::io::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    #[instrument(skip(self))]
    async fn get_checkpoint(
        &self,
        source_id: &str,
        partition_id: &str,
    ) -> anyhow::Result<Option<String>> {
        let checkpoint = self
            .states
            .lock()
            .get(source_id)
            .and_then(|partitions| partitions.get(partition_id))
            .cloned();

        trace!(checkpoint = ?checkpoint, "Retrieved checkpoint");
        Ok(checkpoint)
    }

    #[instrument(skip(self))]
    async fn save_checkpoint(
        &self,
        source_id: &str,
        partition_id: &str,
        token: &str,
    ) -> anyhow::Result<()> {
        self.states
            .lock()
            .entry(source_id.to_string())
            .or_default()
            .insert(partition_id.to_string(), token.to_string());

        trace!("Checkpoint updated");
        Ok(())
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn flush(&self) -> anyhow::Result<()> {
        let _writer = self.write_lock.lock().await;

        let data = {
            let states = self.states.lock();
            serde_json::to_vec_pretty(&*states)
                .map_err(|e| CheckpointError::InvalidData(e.to_string()))?
        };

        let path = self.path.clone();
        let temp = self.temp_path();
        tokio::task::spawn_blocking(move || Self::write_snapshot(&path, &temp, &data)).await??;

        debug!("Flushed checkpoint state");
        Ok(())
    }
}
