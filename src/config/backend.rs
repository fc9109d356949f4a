//! Persistence seam: opaque bytes in and out by locator

use super::ConfigError;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

pub trait ConfigBackend: Send + Sync {
    /// `Ok(None)` when nothing is stored at `locator`
    fn read(&self, locator: &str) -> Result<Option<Vec<u8>>, ConfigError>;

    /// Returns false when the backend declined the write
    fn write(&self, locator: &str, content: &[u8]) -> Result<bool, ConfigError>;

    fn is_encrypted(&self, _locator: &str) -> bool { false }
}

/// Plain files, readable by the owner only
#[derive(Debug, Clone, Copy, Default)]
pub struct FileBackend;

impl ConfigBackend for FileBackend {
    fn read(&self, locator: &str) -> Result<Option<Vec<u8>>, ConfigError> {
        match std::fs::read(locator) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, locator: &str, content: &[u8]) -> Result<bool, ConfigError> {
        let path = Path::new(locator);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))?;
                }
            }
        }
        let mut file = open_private(path)?;
        file.write_all(content)?;
        file.sync_all()?;
        debug!(path = %path.display(), bytes = content.len(), "wrote config");
        Ok(true)
    }
}

/// Created 0600; an existing file is tightened before anything is written
#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
    let file = OpenOptions::new().write(true).create(true).truncate(true).mode(0o600).open(path)?;
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    Ok(file)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().write(true).create(true).truncate(true).open(path)
}

/// In-process store; used by tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    read_only: bool,
}

impl MemoryBackend {
    pub fn new() -> Self { Self::default() }

    /// Accepts reads, declines every write
    pub fn read_only() -> Self { Self { read_only: true, ..Self::default() } }

    pub fn insert(&self, locator: &str, content: impl Into<Vec<u8>>) {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).insert(locator.to_string(), content.into());
    }

    pub fn get(&self, locator: &str) -> Option<Vec<u8>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).get(locator).cloned()
    }
}

impl ConfigBackend for MemoryBackend {
    fn read(&self, locator: &str) -> Result<Option<Vec<u8>>, ConfigError> {
        Ok(self.get(locator))
    }

    fn write(&self, locator: &str, content: &[u8]) -> Result<bool, ConfigError> {
        if self.read_only {
            return Ok(false);
        }
        self.insert(locator, content);
        Ok(true)
    }
}
