use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::{CacheError, CachedResponse, ResponseStore, Result};
use crate::fingerprint::RequestFingerprint;

/// Filesystem-backed response store with git-style 2-char sharding.
///
/// Layout: `<root>/responses/<first 2 hex chars>/<remaining hex chars>.json`
pub struct FsResponseStore {
    responses_dir: PathBuf,
}

impl FsResponseStore {
    /// Create a store rooted at `root`. Creates `root/responses/` if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let responses_dir = root.as_ref().join("responses");
        fs::create_dir_all(&responses_dir)?;
        Ok(Self { responses_dir })
    }

    fn entry_path(&self, fingerprint: &RequestFingerprint) -> PathBuf {
        let hex = fingerprint.as_str();
        self.responses_dir
            .join(&hex[..2])
            .join(format!("{}.json", &hex[2..]))
    }

    fn shard_dirs(&self) -> Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        for entry in fs::read_dir(&self.responses_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                dirs.push(entry.path());
            }
        }
        Ok(dirs)
    }
}

impl ResponseStore for FsResponseStore {
    fn get(&self, fingerprint: &RequestFingerprint) -> Result<Option<CachedResponse>> {
        let path = self.entry_path(fingerprint);
        let body = match fs::read_to_string(&path) {
            Ok(body) => body,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::Io(e)),
        };

        let entry: CachedResponse =
            serde_json::from_str(&body).map_err(|e| CacheError::Corrupt {
                fingerprint: fingerprint.to_string(),
                reason: e.to_string(),
            })?;
        if &entry.fingerprint != fingerprint {
            return Err(CacheError::Corrupt {
                fingerprint: fingerprint.to_string(),
                reason: format!("entry is stored under {}", entry.fingerprint),
            });
        }
        Ok(Some(entry))
    }

    fn put(&self, entry: &CachedResponse) -> Result<()> {
        let path = self.entry_path(&entry.fingerprint);
        if path.exists() {
            return Ok(());
        }

        let Some(shard_dir) = path.parent() else {
            return Err(CacheError::Io(std::io::Error::new(
                ErrorKind::InvalidInput,
                "cache entry path has no parent directory",
            )));
        };
        fs::create_dir_all(shard_dir)?;

        // Write to a temp file in the same shard, then rename into place.
        let mut tmp = NamedTempFile::new_in(shard_dir)?;
        tmp.write_all(serde_json::to_string_pretty(entry)?.as_bytes())?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }

    fn count(&self) -> Result<usize> {
        let mut total = 0;
        for shard in self.shard_dirs()? {
            for entry in fs::read_dir(shard)? {
                let path = entry?.path();
                if path.extension().is_some_and(|ext| ext == "json") {
                    total += 1;
                }
            }
        }
        Ok(total)
    }

    fn clear(&self) -> Result<usize> {
        let removed = self.count()?;
        for shard in self.shard_dirs()? {
            fs::remove_dir_all(shard)?;
        }
        Ok(removed)
    }
}
