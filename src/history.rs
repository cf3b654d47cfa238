// src/history.rs
// History collaborator contract and an in-process implementation

use crate::downloader::DownloadRecord;
use crate::error::AppError;

/// A stored history row
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub id: u64,
    pub record: DownloadRecord,
}

/// Where the consumer records finished downloads
pub trait HistoryStore {
    /// Store a record and return its id
    fn record(&mut self, record: DownloadRecord) -> Result<u64, AppError>;

    /// All entries, most recently finished first
    fn entries(&self) -> Vec<HistoryEntry>;

    fn remove(&mut self, id: u64) -> Result<(), AppError>;
}

/// History kept in memory for the current session
#[derive(Debug, Default)]
pub struct MemoryHistory {
    entries: Vec<HistoryEntry>,
    next_id: u64,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl HistoryStore for MemoryHistory {
    fn record(&mut self, record: DownloadRecord) -> Result<u64, AppError> {
        self.next_id += 1;
        let id = self.next_id;
        self.entries.push(HistoryEntry { id, record });
        Ok(id)
    }

    fn entries(&self) -> Vec<HistoryEntry> {
        let mut entries = self.entries.clone();
        entries.sort_by(|a, b| {
            b.record
                .finished_at
                .cmp(&a.record.finished_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        entries
    }

    fn remove(&mut self, id: u64) -> Result<(), AppError> {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        if self.entries.len() == before {
            return Err(AppError::General(format!("No history entry with id {}", id)));
        }
        Ok(())
    }
}
