//! Durable token persistence, one JSON record per system id.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info};

use crate::auth::tokens::TokenRecord;
use crate::error::{Error, Result};

/// File-backed store for [`TokenRecord`]s.
///
/// Writes go to a temp sibling first and land via rename, so a concurrent
/// reader never observes a half-written record. Records are only ever
/// overwritten, never deleted.
pub struct TokenStore {
    store_dir: PathBuf,
}

impl TokenStore {
    pub fn new(store_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&store_dir)
            .map_err(|e| Error::Storage(format!("cannot create {}: {}", store_dir.display(), e)))?;
        Ok(Self { store_dir })
    }

    fn record_path(&self, system_id: &str) -> PathBuf {
        // System ids are provider-issued hex, but don't trust them as path
        // components.
        let safe: String = system_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.store_dir.join(format!("tokens-{}.json", safe))
    }

    /// Fetch the record for a system id, `None` if never persisted.
    pub fn get(&self, system_id: &str) -> Result<Option<TokenRecord>> {
        let path = self.record_path(system_id);
        if !path.exists() {
            debug!(system_id = %system_id, "no stored token record");
            return Ok(None);
        }

        let contents = read_to_string(&path)?;
        let record: TokenRecord = serde_json::from_str(&contents)
            .map_err(|e| Error::Storage(format!("corrupt token record {}: {}", path.display(), e)))?;
        Ok(Some(record))
    }

    /// Upsert the record for its system id, stamping `last_updated`.
    /// Returns the record as persisted.
    pub fn put(&self, record: &TokenRecord) -> Result<TokenRecord> {
        let mut stamped = record.clone();
        stamped.last_updated = Utc::now();

        let path = self.record_path(&record.system_id);
        let contents = serde_json::to_string_pretty(&stamped)
            .map_err(|e| Error::Storage(format!("cannot serialize token record: {}", e)))?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)
            .map_err(|e| Error::Storage(format!("cannot write {}: {}", tmp.display(), e)))?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| Error::Storage(format!("cannot commit {}: {}", path.display(), e)))?;

        info!(system_id = %record.system_id, "token record persisted");
        Ok(stamped)
    }
}

fn read_to_string(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| Error::Storage(format!("cannot read {}: {}", path.display(), e)))
}
