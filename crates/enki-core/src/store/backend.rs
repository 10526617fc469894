use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::warn;

use crate::error::StoreError;

/// Durable storage for the serialized credential store.
pub trait StoreBackend: Send + Sync {
    /// Read the raw contents; `None` when nothing has been persisted yet.
    fn read(&self) -> Result<Option<String>, StoreError>;

    /// Replace the contents.
    fn write(&self, contents: &str) -> Result<(), StoreError>;

    /// Location used in diagnostics.
    fn location(&self) -> PathBuf;
}

/// Store file on local disk.
///
/// Writes go to a temp file in the same directory which is then renamed over
/// the target, so readers see either the old or the new contents.
pub struct FileStoreBackend {
    path: PathBuf,
}

impl FileStoreBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StoreBackend for FileStoreBackend {
    fn read(&self) -> Result<Option<String>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            warn!("Credential store {} is empty, starting fresh", self.path.display());
            return Ok(None);
        }
        Ok(Some(content))
    }

    fn write(&self, contents: &str) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(contents.as_bytes())?;
        tmp.as_file().sync_all()?;

        // Password hashes and API keys live here.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }

        tmp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }

    fn location(&self) -> PathBuf {
        self.path.clone()
    }
}

/// In-process store, used for tests and ephemeral servers.
#[derive(Default)]
pub struct MemoryStoreBackend {
    contents: Mutex<Option<String>>,
}

impl MemoryStoreBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from existing serialized contents.
    pub fn with_contents(contents: impl Into<String>) -> Self {
        Self {
            contents: Mutex::new(Some(contents.into())),
        }
    }

    pub fn contents(&self) -> Option<String> {
        self.contents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl StoreBackend for MemoryStoreBackend {
    fn read(&self) -> Result<Option<String>, StoreError> {
        Ok(self.contents())
    }

    fn write(&self, contents: &str) -> Result<(), StoreError> {
        *self
            .contents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(contents.to_string());
        Ok(())
    }

    fn location(&self) -> PathBuf {
        PathBuf::from(":memory:")
    }
}
