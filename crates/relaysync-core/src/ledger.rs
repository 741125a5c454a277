//! Processed-file ledger.
//!
//! One file name per line in `processed_{nodeId}.log`, next to the events it
//! describes. The in-memory set only gains an entry after the line is on disk.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, SyncError};
use crate::naming::ledger_file_name;

#[derive(Debug)]
pub struct ProcessedLedger {
    path: PathBuf,
    entries: HashSet<String>,
}

impl ProcessedLedger {
    /// Load the ledger of `node_id` from `folder`. A missing file is an empty ledger.
    pub fn load(folder: &Path, node_id: &str) -> Result<Self> {
        let path = folder.join(ledger_file_name(node_id));
        let entries = match fs::read_to_string(&path) {
            Ok(contents) => contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => return Err(SyncError::io(&path, e)),
        };
        debug!(
            "Loaded {} processed entries from {}",
            entries.len(),
            path.display()
        );
        Ok(Self { path, entries })
    }

    pub fn contains(&self, file_name: &str) -> bool {
        self.entries.contains(file_name)
    }

    /// Append `file_name` and flush it to disk.
    pub fn record(&mut self, file_name: &str) -> Result<()> {
        if self.contains(file_name) {
            return Ok(());
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| SyncError::io(&self.path, e))?;
        writeln!(file, "{}", file_name)
            .and_then(|_| file.sync_data())
            .map_err(|e| SyncError::io(&self.path, e))?;
        self.entries.insert(file_name.to_string());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn survives_reload() {
        let dir = tempdir().expect("tempdir");
        let mut ledger = ProcessedLedger::load(dir.path(), "NODE_A").expect("load");
        assert!(ledger.is_empty());

        ledger.record("20250101000000000_NODE_B_Dolar_00000001.json").expect("record");
        ledger.record("20250101000000001_NODE_B_Dolar_00000002.json").expect("record");
        ledger.record("20250101000000001_NODE_B_Dolar_00000002.json").expect("record");

        let reloaded = ProcessedLedger::load(dir.path(), "NODE_A").expect("reload");
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.contains("20250101000000000_NODE_B_Dolar_00000001.json"));
        assert_eq!(
            fs::read_to_string(reloaded.path()).expect("read").lines().count(),
            2
        );
    }

    #[test]
    fn ledgers_are_per_node() {
        let dir = tempdir().expect("tempdir");
        let mut a = ProcessedLedger::load(dir.path(), "NODE_A").expect("load");
        a.record("x.json").expect("record");

        let b = ProcessedLedger::load(dir.path(), "NODE_B").expect("load");
        assert!(!b.contains("x.json"));
        assert!(dir.path().join("processed_NODE_A.log").exists());
    }

    #[test]
    fn failed_append_leaves_entry_out() {
        let dir = tempdir().expect("tempdir");
        let mut ledger = ProcessedLedger::load(dir.path(), "NODE_A").expect("load");
        fs::create_dir(ledger.path()).expect("block ledger path");

        assert!(ledger.record("x.json").is_err());
        assert!(!ledger.contains("x.json"));
    }
}
