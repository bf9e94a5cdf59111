use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use super::{LockError, LockKey, LockProvider};

const LOCK_FILE_SUFFIX: &str = "lock";
const HOLDER_PREFIX: &str = "holder=";

/// [`LockProvider`] backed by create-exclusive files under a root directory.
///
/// `<root>/<scope>/<PURPOSE>.lock` exists exactly while the key is held, and
/// records the holder that created it. Stale lock files left by crashed
/// processes are not reclaimed here.
#[derive(Debug, Clone)]
pub struct FileLockProvider {
    root: PathBuf,
}

impl FileLockProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the lock file for `key`.
    pub fn lock_path(&self, key: &LockKey) -> PathBuf {
        self.root.join(key.scope_name()).join(format!(
            "{}.{}",
            key.purpose().as_str(),
            LOCK_FILE_SUFFIX
        ))
    }
}

fn io_error(path: &Path, source: io::Error) -> LockError {
    LockError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn read_holder(path: &Path) -> Result<Option<String>, LockError> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(contents
            .lines()
            .find_map(|line| line.strip_prefix(HOLDER_PREFIX))
            .map(str::to_string)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_error(path, err)),
    }
}

impl LockProvider for FileLockProvider {
    fn try_acquire(&self, key: &LockKey, holder: &str) -> Result<bool, LockError> {
        let path = self.lock_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| io_error(parent, err))?;
        }
        // Atomic "create only if not exists" is the mutual exclusion.
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
            Err(err) => return Err(io_error(&path, err)),
        };
        let acquired_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let written = writeln!(file, "{HOLDER_PREFIX}{holder}")
            .and_then(|_| writeln!(file, "acquired_at_ms={acquired_at_ms}"))
            .and_then(|_| file.sync_all());
        if let Err(err) = written {
            let _ = fs::remove_file(&path);
            return Err(io_error(&path, err));
        }
        Ok(true)
    }

    fn release(&self, key: &LockKey, holder: &str) -> Result<bool, LockError> {
        let path = self.lock_path(key);
        match read_holder(&path)? {
            Some(current) if current == holder => match fs::remove_file(&path) {
                Ok(()) => Ok(true),
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
                Err(err) => Err(io_error(&path, err)),
            },
            _ => Ok(false),
        }
    }

    fn is_locked(&self, key: &LockKey) -> Result<bool, LockError> {
        let path = self.lock_path(key);
        match fs::metadata(&path) {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(io_error(&path, err)),
        }
    }
}
