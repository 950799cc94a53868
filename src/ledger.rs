use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    processed_email_ids: Vec<u64>,
    #[serde(default)]
    last_updated: Option<String>,
}

/// Durable set of email ids that have already been handled.
///
/// Every mutation is written through to disk. A single process is assumed to
/// own the file; there is no locking.
#[derive(Debug)]
pub struct EmailLedger {
    path: PathBuf,
    ids: BTreeSet<u64>,
}

impl EmailLedger {
    /// Load the ledger at `path`. A missing or unreadable file starts empty.
    pub fn load(path: &Path) -> Self {
        let ids = match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<LedgerFile>(&content) {
                Ok(file) => file.processed_email_ids.into_iter().collect(),
                Err(e) => {
                    log::warn!("Discarding corrupt ledger {}: {e}", path.display());
                    BTreeSet::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeSet::new(),
            Err(e) => {
                log::warn!("Error loading processed emails from {}: {e}", path.display());
                BTreeSet::new()
            }
        };
        Self {
            path: path.to_path_buf(),
            ids,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.ids.iter().copied()
    }

    pub fn is_processed(&self, id: u64) -> bool {
        self.ids.contains(&id)
    }

    /// Record `id` and persist immediately. On a write error the in-memory
    /// mark stays in place and the error is returned.
    pub fn mark_as_processed(&mut self, id: u64) -> Result<()> {
        self.ids.insert(id);
        self.save()?;
        log::info!("Marked email {id} as processed");
        Ok(())
    }

    /// Keep only the `keep_last_n` largest ids. Returns how many were dropped.
    pub fn cleanup_old_entries(&mut self, keep_last_n: usize) -> Result<usize> {
        if self.ids.len() <= keep_last_n {
            return Ok(0);
        }
        let dropped = self.ids.len() - keep_last_n;
        self.ids = self.ids.iter().rev().take(keep_last_n).copied().collect();
        self.save()?;
        log::info!("Cleaned up old processed emails, keeping {keep_last_n} most recent");
        Ok(dropped)
    }

    // Write to a sibling temp file, then rename over the ledger.
    fn save(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let file = LedgerFile {
            processed_email_ids: self.ids.iter().copied().collect(),
            last_updated: Some(chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()),
        };
        let json = serde_json::to_string_pretty(&file)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, format!("{json}\n"))?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
