use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, warn};

use crate::MessageRecord;

/// Line-delimited JSON file holding the most recent fetch.
///
/// Every write replaces the whole file: records are serialized to a sibling
/// `.tmp` file which is renamed over the store once complete, so a failed
/// write never leaves a half-written store behind.
#[derive(Debug, Clone)]
pub struct MessageStore {
    path: PathBuf,
}

impl MessageStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn replace_all(&self, records: &[MessageRecord]) -> Result<usize> {
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;
        let tmp = self.path.with_extension("tmp");
        {
            let file = std::fs::File::create(&tmp)?;
            let mut writer = std::io::BufWriter::new(file);
            for record in records {
                serde_json::to_writer(&mut writer, record)?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        debug!(count = records.len(), path = %self.path.display(), "store replaced");
        Ok(records.len())
    }

    pub fn read_all(&self) -> Result<Vec<MessageRecord>> {
        let file = match std::fs::File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut out = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<MessageRecord>(&line) {
                Ok(record) => out.push(record),
                Err(err) => warn!(line = idx + 1, "skipping unreadable store record: {}", err),
            }
        }
        Ok(out)
    }

    pub fn clear(&self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        std::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::MessageStore;
    use crate::MessageRecord;

    fn record(id: &str, subject: &str) -> MessageRecord {
        MessageRecord {
            id: id.to_string(),
            date: "2025-03-01 09:30:00".to_string(),
            from: "alice@example.com".to_string(),
            to: "me@example.com".to_string(),
            subject: subject.to_string(),
            body: "hello there".to_string(),
        }
    }

    #[test]
    fn second_replace_discards_first_batch() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = MessageStore::new(dir.path().join("email_data.jsonl"));

        store.replace_all(&[record("1", "first"), record("2", "second")])?;
        store.replace_all(&[record("3", "third")])?;

        let records = store.read_all()?;
        assert_eq!(records, vec![record("3", "third")]);
        Ok(())
    }

    #[test]
    fn unreadable_lines_are_skipped() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("email_data.jsonl");
        let good = serde_json::to_string(&record("7", "kept"))?;
        std::fs::write(&path, format!("{{not json\n\n{}\n{{\"id\": 1}}\n", good))?;

        let records = MessageStore::new(&path).read_all()?;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].subject, "kept");
        Ok(())
    }

    #[test]
    fn missing_store_reads_empty() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = MessageStore::new(dir.path().join("absent.jsonl"));
        assert!(store.read_all()?.is_empty());
        store.clear()?;
        assert!(!store.path().exists());
        Ok(())
    }

    #[test]
    fn clear_truncates_existing_store() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = MessageStore::new(dir.path().join("email_data.jsonl"));
        store.replace_all(&[record("1", "one")])?;

        store.clear()?;

        assert!(store.path().exists());
        assert_eq!(std::fs::metadata(store.path())?.len(), 0);
        assert!(store.read_all()?.is_empty());
        Ok(())
    }

    #[test]
    fn replace_leaves_no_temp_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = MessageStore::new(dir.path().join("nested").join("email_data.jsonl"));
        assert_eq!(store.replace_all(&[record("1", "one")])?, 1);
        assert!(!store.path().with_extension("tmp").exists());
        Ok(())
    }

    #[test]
    fn failed_replace_keeps_previous_records() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = MessageStore::new(dir.path().join("email_data.jsonl"));
        store.replace_all(&[record("1", "first"), record("2", "second")])?;
        std::fs::create_dir(store.path().with_extension("tmp"))?;

        assert!(store.replace_all(&[record("3", "third")]).is_err());

        let records = store.read_all()?;
        assert_eq!(records, vec![record("1", "first"), record("2", "second")]);
        Ok(())
    }
}
