// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSONL op log underlying the store.
//!
//! Each entry is a single line of JSON: `{"seq":N,"op":"put",...}\n`.
//! Appends are batched per transaction and made durable with one fsync.
//! A corrupt tail (torn write on crash) is truncated back to the last
//! complete entry on open.

use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// One store mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    Put {
        c: String,
        k: String,
        v: serde_json::Value,
    },
    Delete {
        c: String,
        k: String,
    },
}

/// A single log entry with sequence number.
#[derive(Debug, Clone, Deserialize)]
pub struct LogEntry {
    pub seq: u64,
    #[serde(flatten)]
    pub op: Op,
}

/// Serialization helper for writing entries without cloning the op.
#[derive(Serialize)]
struct LogEntryRef<'a> {
    seq: u64,
    #[serde(flatten)]
    op: &'a Op,
}

/// Append-only JSONL log with crash-safe replay and atomic rewrite.
pub struct OpLog {
    file: File,
    path: PathBuf,
    write_seq: u64,
    size_bytes: u64,
}

impl OpLog {
    /// Open or create the log, replaying every complete entry.
    ///
    /// Trailing garbage after the last complete entry is truncated with a
    /// warning so a torn write cannot poison subsequent appends.
    pub fn open(path: &Path) -> Result<(Self, Vec<Op>), StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        let mut ops = Vec::new();
        let mut write_seq = 0u64;
        let mut good_offset = 0u64;
        let mut offset = 0u64;

        let mut reader = BufReader::new(File::open(path)?);
        let mut line = String::new();
        loop {
            line.clear();
            let n = reader.read_line(&mut line)?;
            if n == 0 {
                break;
            }
            let trimmed = line.trim_end();
            if trimmed.is_empty() {
                offset += n as u64;
                good_offset = offset;
                continue;
            }
            match serde_json::from_str::<LogEntry>(trimmed) {
                Ok(entry) => {
                    write_seq = entry.seq;
                    ops.push(entry.op);
                    offset += n as u64;
                    good_offset = offset;
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        offset,
                        error = %e,
                        "corrupt store entry, truncating tail"
                    );
                    break;
                }
            }
        }

        let file_len = file.metadata()?.len();
        if good_offset < file_len {
            file.set_len(good_offset)?;
        }

        Ok((
            Self {
                file,
                path: path.to_path_buf(),
                write_seq,
                size_bytes: good_offset,
            },
            ops,
        ))
    }

    /// Append a batch of ops and make them durable with a single fsync.
    pub fn append(&mut self, ops: &[Op]) -> Result<(), StoreError> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut buf = Vec::new();
        for op in ops {
            self.write_seq += 1;
            serde_json::to_writer(
                &mut buf,
                &LogEntryRef {
                    seq: self.write_seq,
                    op,
                },
            )?;
            buf.push(b'\n');
        }
        self.file.write_all(&buf)?;
        self.file.sync_all()?;
        self.size_bytes += buf.len() as u64;
        Ok(())
    }

    /// Current on-disk size in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite the log from scratch (compaction): write every op to a
    /// sibling tmp file, fsync, rename atomically, reopen.
    pub fn rewrite<'a>(&mut self, ops: impl Iterator<Item = &'a Op>) -> Result<(), StoreError> {
        let tmp = self.path.with_extension("tmp");
        let mut seq = 0u64;
        {
            let file = File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            for op in ops {
                seq += 1;
                serde_json::to_writer(&mut writer, &LogEntryRef { seq, op })?;
                writer.write_all(b"\n")?;
            }
            let file = writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        self.file = OpenOptions::new().append(true).open(&self.path)?;
        self.write_seq = seq;
        self.size_bytes = self.file.metadata()?.len();
        Ok(())
    }
}

#[cfg(test)]
#[path = "log_tests.rs"]
mod tests;
