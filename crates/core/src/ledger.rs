//! Append-only, hash-chained decision ledger.
//!
//! Each line is a JSON object `{ts, event, ..fields, hash_prev, hash}` where
//! `hash = sha256(canonical json of the record without "hash")` and
//! `hash_prev` is the previous line's `hash` (empty for the first line).
//! `serde_json::Map` keeps keys sorted, which makes the serialization canonical.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ledger serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("ledger record must serialize to a JSON object, got {0}")]
    NotAnObject(String),

    #[error("ledger chain broken at line {line}: {reason}")]
    ChainBroken { line: usize, reason: String },
}

enum Sink {
    File(BufWriter<File>),
    Memory(Vec<String>),
}

/// Single-writer ledger. Concurrent runs must use distinct paths.
pub struct DecisionLedger {
    path: Option<PathBuf>,
    sink: Sink,
    last_hash: String,
    records: usize,
}

impl DecisionLedger {
    /// Opens (or creates) a file-backed ledger and resumes its chain.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or its parent directory cannot be created,
    /// or if the existing file cannot be read.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let (last_hash, records) = if path.exists() {
            load_tail(path)?
        } else {
            (String::new(), 0)
        };
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        tracing::debug!(path = %path.display(), records, "opened decision ledger");
        Ok(Self {
            path: Some(path.to_path_buf()),
            sink: Sink::File(BufWriter::new(file)),
            last_hash,
            records,
        })
    }

    /// Ledger kept in memory. Used for fast parameter-search runs and tests.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            sink: Sink::Memory(Vec::new()),
            last_hash: String::new(),
            records: 0,
        }
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    #[must_use]
    pub fn last_hash(&self) -> &str {
        &self.last_hash
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.records
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.records == 0
    }

    /// Lines held by an in-memory ledger (empty for file-backed ledgers).
    #[must_use]
    pub fn lines(&self) -> &[String] {
        match &self.sink {
            Sink::Memory(lines) => lines,
            Sink::File(_) => &[],
        }
    }

    /// Appends `fields` under `event` and returns the stored record.
    ///
    /// # Errors
    ///
    /// Returns an error if `fields` is not a JSON object or the write fails.
    pub fn append<T: Serialize>(
        &mut self,
        ts: DateTime<Utc>,
        event: &str,
        fields: &T,
    ) -> Result<Map<String, Value>, LedgerError> {
        let mut record = match serde_json::to_value(fields)? {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => return Err(LedgerError::NotAnObject(other.to_string())),
        };
        record.insert(
            "ts".to_string(),
            Value::String(ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        record.insert("event".to_string(), Value::String(event.to_string()));
        record.insert("hash_prev".to_string(), Value::String(self.last_hash.clone()));
        let hash = hash_record(&record)?;
        record.insert("hash".to_string(), Value::String(hash.clone()));

        let line = serde_json::to_string(&record)?;
        match &mut self.sink {
            Sink::File(writer) => {
                writeln!(writer, "{line}")?;
                writer.flush()?;
            }
            Sink::Memory(lines) => lines.push(line),
        }
        self.last_hash = hash;
        self.records += 1;
        Ok(record)
    }
}

/// SHA-256 over the canonical serialization of `record` minus its `hash` key.
///
/// # Errors
///
/// Returns an error if the record cannot be serialized.
pub fn hash_record(record: &Map<String, Value>) -> Result<String, LedgerError> {
    let bytes = if record.contains_key("hash") {
        let mut base = record.clone();
        base.remove("hash");
        serde_json::to_vec(&base)?
    } else {
        serde_json::to_vec(record)?
    };
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Verifies every line of a ledger read from `reader`.
///
/// Returns the number of verified records.
///
/// # Errors
///
/// Returns `LedgerError::ChainBroken` for the first record whose stored hash
/// does not match its content or whose `hash_prev` does not match its
/// predecessor.
pub fn verify_lines<I, S>(lines: I) -> Result<usize, LedgerError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut prev = String::new();
    let mut count = 0;
    for (idx, line) in lines.into_iter().enumerate() {
        let line = line.as_ref().trim();
        if line.is_empty() {
            continue;
        }
        let line_no = idx + 1;
        let record: Map<String, Value> = serde_json::from_str(line)?;
        let stored = record.get("hash").and_then(Value::as_str).unwrap_or_default();
        let stored_prev = record
            .get("hash_prev")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if stored_prev != prev {
            return Err(LedgerError::ChainBroken {
                line: line_no,
                reason: format!("hash_prev {stored_prev:?} != previous hash {prev:?}"),
            });
        }
        let recomputed = hash_record(&record)?;
        if recomputed != stored {
            return Err(LedgerError::ChainBroken {
                line: line_no,
                reason: format!("stored hash {stored} != recomputed {recomputed}"),
            });
        }
        prev = stored.to_string();
        count += 1;
    }
    Ok(count)
}

/// Verifies the ledger file at `path`.
///
/// # Errors
///
/// Returns an I/O error or the first chain violation.
pub fn verify_chain(path: impl AsRef<Path>) -> Result<usize, LedgerError> {
    let reader = BufReader::new(File::open(path)?);
    let lines = reader.lines().collect::<Result<Vec<_>, _>>()?;
    verify_lines(lines)
}

fn load_tail(path: &Path) -> Result<(String, usize), LedgerError> {
    let reader = BufReader::new(File::open(path)?);
    let mut last_hash = String::new();
    let mut records = 0;
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: Map<String, Value> = serde_json::from_str(&line)?;
        last_hash = record
            .get("hash")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        records += 1;
    }
    Ok((last_hash, records))
}
