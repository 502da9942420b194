//! The content-addressed TOC cache (`spec.md` §4.5), keyed by the device's
//! reported CRC so a parameter or log TOC never has to be walked twice for
//! firmware that hasn't changed.
//!
//! Grounded in `cache/cache.go`: one file per checksum under a cache
//! directory, `<hex-crc>.paramcache` / `.logcache`. The original uses `gob`
//! and `go-homedir`; here that's `serde_json` (already a crate the TOC entry
//! types need for their own derive) and `dirs`.

use crate::error::Result;
use crate::log::LogTocEntry;
use crate::param::ParamTocEntry;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

const CACHE_DIR_NAME: &str = ".crtp-core-cache";

pub struct Cache {
    dir: PathBuf,
}

impl Cache {
    /// Uses `dirs::home_dir()/.crtp-core-cache`, creating it if needed.
    /// Falls back to an in-process-only cache (never persisted) if no home
    /// directory can be resolved, rather than failing every TOC fetch.
    pub fn open_default() -> Cache {
        let dir = dirs::home_dir().map(|h| h.join(CACHE_DIR_NAME)).unwrap_or_else(|| PathBuf::from(CACHE_DIR_NAME));
        if let Err(e) = fs::create_dir_all(&dir) {
            warn!(error = %e, path = ?dir, "failed to create cache directory, caching disabled");
        }
        Cache { dir }
    }

    pub fn at(dir: PathBuf) -> Cache {
        Cache { dir }
    }

    fn path_for(&self, crc: u32, suffix: &str) -> PathBuf {
        self.dir.join(format!("{:08X}.{}", crc, suffix))
    }

    pub fn load_param_toc(&self, crc: u32) -> Result<Option<Vec<ParamTocEntry>>> {
        self.load(crc, "paramcache")
    }

    pub fn save_param_toc(&self, crc: u32, entries: &[ParamTocEntry]) -> Result<()> {
        self.save(crc, "paramcache", entries)
    }

    pub fn load_log_toc(&self, crc: u32) -> Result<Option<Vec<LogTocEntry>>> {
        self.load(crc, "logcache")
    }

    pub fn save_log_toc(&self, crc: u32, entries: &[LogTocEntry]) -> Result<()> {
        self.save(crc, "logcache", entries)
    }

    fn load<T: serde::de::DeserializeOwned>(&self, crc: u32, suffix: &str) -> Result<Option<Vec<T>>> {
        let path = self.path_for(crc, suffix);
        match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(entries) => {
                    debug!(?path, "TOC cache hit");
                    Ok(Some(entries))
                }
                Err(e) => {
                    warn!(error = %e, ?path, "cache file corrupt, ignoring");
                    Ok(None)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save<T: serde::Serialize>(&self, crc: u32, suffix: &str, entries: &[T]) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(crc, suffix);
        let bytes = serde_json::to_vec(entries).expect("TOC entries are always serializable");
        fs::write(&path, bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::ParamType;

    #[test]
    fn miss_then_save_then_hit() {
        let dir = std::env::temp_dir().join(format!("crtp-core-cache-test-{}", std::process::id()));
        let cache = Cache::at(dir.clone());

        assert!(cache.load_param_toc(0x1234).unwrap().is_none());

        let entries = vec![ParamTocEntry {
            id: 0,
            group: "sys".to_string(),
            name: "id".to_string(),
            datatype: ParamType::Uint8,
            read_only: true,
        }];
        cache.save_param_toc(0x1234, &entries).unwrap();

        let loaded = cache.load_param_toc(0x1234).unwrap().unwrap();
        assert_eq!(loaded, entries);

        let _ = fs::remove_dir_all(&dir);
    }
}
