//! Journal (§4.3): append-only write-ahead log with transaction framing and
//! replay-on-open crash recovery.
//!
//! Grounded on `original_source/defrag/journaler.py`'s `Journaler` class:
//! same line structure (image path, then `TRANSACTION <kind>` / JSON event /
//! `CLOSED` lines, transactions may nest via a stack), same abandon-if-path-
//! mismatches replay behavior, same reopened-truncate semantics. The JSON
//! event shape is carried over unchanged; we use `serde`/`serde_json` for it
//! rather than hand-rolling the encoding, per the ambient-stack expansion.

use std::fs::OpenOptions as FsOpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Kinds of transaction a journal frame can carry (§4.3, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransactionKind {
    WriteTable = 0,
    WriteCluster = 1,
    WriteBoth = 2,
}

impl TransactionKind {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(TransactionKind::WriteTable),
            1 => Some(TransactionKind::WriteCluster),
            2 => Some(TransactionKind::WriteBoth),
            _ => None,
        }
    }
}

/// One journaled mutation (§4.3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEvent {
    pub cluster_number: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<u32>,
}

impl JournalEvent {
    pub fn new(cluster_number: u32, value: Option<u32>, table: Option<u32>) -> Self {
        Self {
            cluster_number,
            value,
            table,
        }
    }
}

/// A transaction observed as still-open at the end of the log: every event it
/// carries becomes an UNCLOSED_TRANSACTION error for that cluster (§4.3, §8).
#[derive(Debug)]
struct OpenFrame {
    #[allow(dead_code)]
    kind: TransactionKind,
    events: Vec<JournalEvent>,
}

/// Default journal filename if the caller doesn't provide one (§6).
pub const DEFAULT_JOURNAL_FILENAME: &str = "fat_journal.log";

pub struct Journal {
    path: PathBuf,
    image_path: String,
    stack: Vec<(TransactionKind, Vec<JournalEvent>)>,
    file: std::fs::File,
}

impl Journal {
    /// Open (or create) the journal file for `image_path`, replaying any
    /// prior unclosed transactions first.
    ///
    /// Returns the journal plus every cluster number that was left dangling
    /// by an unclosed transaction (UNCLOSED_TRANSACTION, §4.3, §7).
    pub fn open(image_path: &str, journal_path: Option<PathBuf>) -> crate::Result<(Self, Vec<u32>)> {
        let path = journal_path.unwrap_or_else(|| PathBuf::from(DEFAULT_JOURNAL_FILENAME));

        let unclosed = if path.exists() {
            replay(&path, image_path)?
        } else {
            Vec::new()
        };

        // Reopened-truncate semantics: re-capture the log with just the image
        // path line (§4.3).
        let mut file = FsOpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        writeln!(file, "{}", image_path)?;
        file.flush()?;

        Ok((
            Self {
                path,
                image_path: image_path.to_string(),
                stack: Vec::new(),
                file,
            },
            unclosed,
        ))
    }

    /// Open a new transaction frame. Transactions may nest (§4.3).
    pub fn begin(&mut self, kind: TransactionKind) -> crate::Result<()> {
        writeln!(self.file, "TRANSACTION {}", kind as u8)?;
        self.file.flush()?;
        self.stack.push((kind, Vec::new()));
        Ok(())
    }

    /// Record one mutation event inside the innermost open transaction.
    pub fn record(&mut self, event: JournalEvent) -> crate::Result<()> {
        let line = serde_json::to_string(&event)?;
        writeln!(self.file, "{}", line)?;
        self.file.flush()?;
        if let Some((_, events)) = self.stack.last_mut() {
            events.push(event);
        }
        Ok(())
    }

    /// Close the innermost open transaction frame (§5 ordering guarantee:
    /// `CLOSED` is only written after every mutation for the frame has
    /// already been issued by the caller).
    pub fn close(&mut self) -> crate::Result<()> {
        writeln!(self.file, "CLOSED")?;
        self.file.flush()?;
        self.stack.pop();
        Ok(())
    }

    pub fn image_path(&self) -> &str {
        &self.image_path
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Truncate the log back to just the image-path line (§5 `close()`):
    /// there is nothing left to replay once a session closes cleanly.
    pub fn truncate(&mut self) -> crate::Result<()> {
        self.file = FsOpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        writeln!(self.file, "{}", self.image_path)?;
        self.file.flush()?;
        self.stack.clear();
        Ok(())
    }
}

/// Stream the log into a stack of frames; any frame still open at end of
/// stream contributes UNCLOSED_TRANSACTION errors for every cluster its
/// events carried (§4.3).
fn replay(path: &Path, current_image_path: &str) -> crate::Result<Vec<u32>> {
    let file = std::fs::File::open(path)?;
    let mut lines = BufReader::new(file).lines();

    let first_line = match lines.next() {
        Some(line) => line?,
        None => return Ok(Vec::new()),
    };

    if first_line != current_image_path {
        // The log belongs to a different image; abandon replay wholesale
        // rather than partially replaying (§4.3).
        return Ok(Vec::new());
    }

    let mut frames: Vec<OpenFrame> = Vec::new();

    for line in lines {
        let line = line?;
        if line == "CLOSED" {
            frames.pop();
        } else if let Some(rest) = line.strip_prefix("TRANSACTION ") {
            let kind_num: u8 = rest.trim().parse().unwrap_or(0);
            let kind = TransactionKind::from_u8(kind_num).unwrap_or(TransactionKind::WriteTable);
            frames.push(OpenFrame {
                kind,
                events: Vec::new(),
            });
        } else if !line.is_empty() {
            let event: JournalEvent = serde_json::from_str(&line)?;
            if let Some(frame) = frames.last_mut() {
                frame.events.push(event);
            }
        }
    }

    let mut unclosed = Vec::new();
    for frame in frames {
        for event in frame.events {
            unclosed.push(event.cluster_number);
        }
    }
    unclosed.sort_unstable();
    unclosed.dedup();
    Ok(unclosed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn replay_reports_unclosed_transactions() {
        let dir = tempfile_dir();
        let journal_path = dir.join("journal.log");
        let mut f = std::fs::File::create(&journal_path).unwrap();
        writeln!(f, "image.img").unwrap();
        writeln!(f, "TRANSACTION 2").unwrap();
        writeln!(f, r#"{{"cluster_number":25,"value":0,"table":null}}"#).unwrap();
        writeln!(f, "TRANSACTION 0").unwrap();
        writeln!(f, r#"{{"cluster_number":25,"value":0,"table":0}}"#).unwrap();
        writeln!(f, "CLOSED").unwrap();
        drop(f);

        let (_, unclosed) = Journal::open("image.img", Some(journal_path)).unwrap();
        assert_eq!(unclosed, vec![25]);
    }

    #[test]
    fn replay_abandoned_on_path_mismatch() {
        let dir = tempfile_dir();
        let journal_path = dir.join("journal.log");
        let mut f = std::fs::File::create(&journal_path).unwrap();
        writeln!(f, "other.img").unwrap();
        writeln!(f, "TRANSACTION 0").unwrap();
        writeln!(f, r#"{{"cluster_number":7,"value":0,"table":null}}"#).unwrap();
        drop(f);

        let (_, unclosed) = Journal::open("image.img", Some(journal_path)).unwrap();
        assert!(unclosed.is_empty());
    }

    fn tempfile_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "fatfsck-journal-test-{}-{}",
            std::process::id(),
            COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    static COUNTER: std::sync::atomic::AtomicU32 = std::sync::atomic::AtomicU32::new(0);
}
