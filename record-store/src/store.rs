use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};
use tracker_core::{CoreError, StoreError};

/// Matching comments of one author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: u64,
    pub author_name: String,
    pub author_id: String,
    #[serde(rename = "subReddit", default)]
    pub subreddit: Option<String>,
    #[serde(rename = "commentsList")]
    pub comments_list: Vec<String>,
}

impl Record {
    /// Placeholder written into every new store so the file is never an empty array.
    pub fn seed() -> Self {
        Self {
            id: 1,
            author_name: "John Doe".to_string(),
            author_id: "JohnDoe".to_string(),
            subreddit: Some("test".to_string()),
            comments_list: vec!["None".to_string()],
        }
    }
}

/// Result of [`RecordStore::record_comment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    NewAuthor { id: u64 },
    Appended { id: u64 },
    Duplicate { id: u64 },
}

impl RecordOutcome {
    /// Whether the in-memory records changed and need a flush.
    pub fn is_mutation(self) -> bool {
        !matches!(self, RecordOutcome::Duplicate { .. })
    }
}

/// Per-author records for one day, mirrored to a single JSON file.
#[derive(Debug)]
pub struct RecordStore {
    path: PathBuf,
    records: Vec<Record>,
}

impl RecordStore {
    /// Loads `path`, or seeds it when the file is missing or empty.
    pub fn open_or_create(path: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let path = path.into();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(source) => {
                return Err(StoreError::ReadFailed {
                    path: path.display().to_string(),
                    source,
                }
                .into())
            }
        };

        if raw.trim().is_empty() {
            return Self::create_seeded(path);
        }

        let records: Vec<Record> =
            serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
                path: path.display().to_string(),
                details: e.to_string(),
            })?;

        if records.is_empty() {
            return Self::create_seeded(path);
        }

        debug!("Loaded {} records from {}", records.len(), path.display());
        Ok(Self { path, records })
    }

    fn create_seeded(path: PathBuf) -> Result<Self, CoreError> {
        let store = Self {
            path,
            records: vec![Record::seed()],
        };
        store.flush()?;
        info!("Created record file {}", store.path.display());
        Ok(store)
    }

    pub fn find_by_author(&self, author_id: &str) -> Option<&Record> {
        self.records.iter().find(|r| r.author_id == author_id)
    }

    /// Adds `comment_text` under `author_id`, creating the author's record if needed.
    pub fn record_comment(
        &mut self,
        author_id: &str,
        author_name: &str,
        subreddit: Option<&str>,
        comment_text: &str,
    ) -> RecordOutcome {
        if let Some(record) = self.records.iter_mut().find(|r| r.author_id == author_id) {
            if record.comments_list.iter().any(|c| c == comment_text) {
                return RecordOutcome::Duplicate { id: record.id };
            }
            record.comments_list.push(comment_text.to_string());
            return RecordOutcome::Appended { id: record.id };
        }

        let id = self.next_id();
        self.records.push(Record {
            id,
            author_name: author_name.to_string(),
            author_id: author_id.to_string(),
            subreddit: subreddit.map(str::to_string),
            comments_list: vec![comment_text.to_string()],
        });
        RecordOutcome::NewAuthor { id }
    }

    fn next_id(&self) -> u64 {
        self.records.iter().map(|r| r.id).max().unwrap_or(0) + 1
    }

    /// Writes every record to a temp file next to `path`, then renames it over `path`.
    pub fn flush(&self) -> Result<(), CoreError> {
        self.write_atomically().map_err(|source| {
            StoreError::FlushFailed {
                path: self.path.display().to_string(),
                source,
            }
            .into()
        })
    }

    fn write_atomically(&self) -> io::Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, &self.records)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
