// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Write-ahead journal for the ledger store.
//!
//! Every committed unit of work is appended as a single JSON line before it
//! becomes visible in memory. On startup the journal is replayed to rebuild
//! wallets and ledger entries.
//!
//! Only newline-terminated records count as committed. A trailing fragment
//! without a newline is the remains of a torn write: it is dropped and the
//! file is truncated back to the last complete record.

use crate::config::JournalConfig;
use crate::error::StoreError;
use crate::transaction::Transaction;
use crate::wallet::Wallet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

/// One committed unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum JournalRecord {
    /// A wallet row was inserted.
    WalletCreated { wallet: Wallet },
    /// A wallet row was updated together with the ledger entries inserted
    /// in the same unit.
    Committed {
        wallet: Wallet,
        transactions: Vec<Transaction>,
    },
}

const DISABLED: &str = "journal disabled after an earlier write failure";

struct JournalWriter {
    /// `None` once a write or sync failed; no further records are accepted.
    writer: Option<BufWriter<File>>,
    /// File length covering every record acknowledged to a caller.
    acked_len: u64,
    records_since_sync: usize,
    sync_interval: usize,
    #[cfg(test)]
    fail_next_sync: bool,
}

impl JournalWriter {
    /// Writes one record line, syncing once the interval is reached. The
    /// record counts as acknowledged only when this returns `Ok`.
    fn append(&mut self, line: &str) -> io::Result<()> {
        let writer = self.writer.as_mut().ok_or_else(|| io::Error::other(DISABLED))?;
        writeln!(writer, "{line}")?;
        self.records_since_sync += 1;
        if self.records_since_sync >= self.sync_interval {
            self.sync()?;
        }
        self.acked_len += line.len() as u64 + 1;
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        #[cfg(test)]
        let injected = std::mem::take(&mut self.fail_next_sync);

        let writer = self.writer.as_mut().ok_or_else(|| io::Error::other(DISABLED))?;
        writer.flush()?;
        #[cfg(test)]
        if injected {
            return Err(io::Error::other("injected sync failure"));
        }
        writer.get_ref().sync_data()?;
        self.records_since_sync = 0;
        Ok(())
    }

    /// Disables the writer after a failure. Buffered bytes are discarded
    /// and the file is cut back to the last acknowledged record, so a
    /// record whose append was reported as failed is never replayed.
    fn disable(&mut self, path: &Path) {
        let Some(writer) = self.writer.take() else {
            return;
        };
        if self.records_since_sync > 0 {
            tracing::error!(
                path = %path.display(),
                unsynced = self.records_since_sync,
                "acknowledged journal records may not have reached disk"
            );
        }

        let (file, _unwritten) = writer.into_parts();
        let acked_len = self.acked_len;
        let result = file.metadata().and_then(|meta| {
            if meta.len() > acked_len {
                file.set_len(acked_len)?;
                file.sync_data()?;
            }
            Ok(())
        });
        if let Err(e) = result {
            tracing::error!(
                path = %path.display(),
                error = %e,
                "failed to cut journal back to the last acknowledged record"
            );
        }
    }
}

/// Append-only journal file shared by all writers of a store.
pub struct Journal {
    path: PathBuf,
    inner: Mutex<JournalWriter>,
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal").field("path", &self.path).finish()
    }
}

impl Journal {
    /// Replays the journal at `config.path` (if any) and opens it for
    /// appending.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Corrupt`] if a complete record cannot be decoded.
    /// - [`StoreError::Journal`] on I/O failure.
    pub fn recover(config: &JournalConfig) -> Result<(Self, Vec<JournalRecord>), StoreError> {
        let path = config.path.clone();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| io_error("failed to create journal directory", &e))?;
        }

        let (records, valid_len) = read_records(&path)?;

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| io_error("failed to open journal", &e))?;

        let current_len = file
            .metadata()
            .map_err(|e| io_error("failed to stat journal", &e))?
            .len();
        if current_len > valid_len {
            tracing::warn!(
                path = %path.display(),
                dropped_bytes = current_len - valid_len,
                "truncating torn journal tail"
            );
            file.set_len(valid_len)
                .map_err(|e| io_error("failed to truncate journal", &e))?;
        }
        drop(file);

        let file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|e| io_error("failed to open journal", &e))?;

        tracing::info!(
            path = %path.display(),
            records = records.len(),
            "journal replayed"
        );

        let journal = Self {
            path,
            inner: Mutex::new(JournalWriter {
                writer: Some(BufWriter::new(file)),
                acked_len: valid_len,
                records_since_sync: 0,
                sync_interval: config.sync_interval.max(1),
                #[cfg(test)]
                fail_next_sync: false,
            }),
        };
        Ok((journal, records))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record, syncing every `sync_interval` records.
    ///
    /// After any write failure the journal refuses further appends and the
    /// failed record is removed from the file.
    pub fn append(&self, record: &JournalRecord) -> Result<(), StoreError> {
        let line = serde_json::to_string(record)
            .map_err(|e| StoreError::Journal(format!("failed to encode record: {e}")))?;

        let mut inner = self.inner.lock();
        if inner.writer.is_none() {
            return Err(StoreError::Journal(DISABLED.to_owned()));
        }
        if let Err(e) = inner.append(&line) {
            tracing::error!(path = %self.path.display(), error = %e, "journal write failed");
            inner.disable(&self.path);
            return Err(io_error("failed to append journal record", &e));
        }
        Ok(())
    }

    /// Flushes buffered records and fsyncs the file.
    ///
    /// # Errors
    ///
    /// Fails if the sync fails, and on every call after an earlier write
    /// failure, since acknowledged records may then be missing on disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.writer.is_none() {
            return Err(StoreError::Journal(DISABLED.to_owned()));
        }
        if let Err(e) = inner.sync() {
            tracing::error!(path = %self.path.display(), error = %e, "journal sync failed");
            inner.disable(&self.path);
            return Err(io_error("failed to sync journal", &e));
        }
        Ok(())
    }

    /// Makes the next sync fail after its flush.
    #[cfg(test)]
    pub(crate) fn fail_next_sync(&self) {
        self.inner.lock().fail_next_sync = true;
    }
}

impl Drop for Journal {
    fn drop(&mut self) {
        if self.inner.get_mut().writer.is_none() {
            return;
        }
        if let Err(e) = self.sync() {
            tracing::warn!(path = %self.path.display(), error = %e, "journal sync on close failed");
        }
    }
}

fn io_error(context: &str, error: &std::io::Error) -> StoreError {
    StoreError::Journal(format!("{context}: {error}"))
}

/// Decodes every complete record and returns the byte length they span.
fn read_records(path: &Path) -> Result<(Vec<JournalRecord>, u64), StoreError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(io_error("failed to read journal", &e)),
    };

    let mut records = Vec::new();
    let mut offset = 0usize;
    let mut line_no = 0usize;

    while let Some(end) = bytes[offset..].iter().position(|&b| b == b'\n') {
        line_no += 1;
        let line = &bytes[offset..offset + end];
        offset += end + 1;

        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let record = serde_json::from_slice(line).map_err(|e| StoreError::Corrupt {
            line: line_no,
            reason: e.to_string(),
        })?;
        records.push(record);
    }

    Ok((records, offset as u64))
}
