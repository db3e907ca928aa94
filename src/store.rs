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

//! In-process ledger store.
//!
//! [`MemoryStore`] plays the role of the relational backing store: one
//! wallet row per user, an append-only transaction table, exclusive row
//! locks with a bounded wait, and all-or-nothing commits. With a
//! [`JournalConfig`](crate::JournalConfig) every commit is written ahead to
//! disk and replayed on [`MemoryStore::open`].
//!
//! # Locking
//!
//! Each row has a mutex that serializes mutators of that user, and a
//! separately locked committed image that readers copy without waiting for
//! the mutex. Mutators work on a private snapshot; the committed image is
//! replaced only after the unit validated and journaled successfully.

use crate::base::{ReferenceId, UserId};
use crate::config::StoreConfig;
use crate::error::{StoreError, WalletError};
use crate::journal::{Journal, JournalRecord};
use crate::repository::{LedgerWriter, WalletRepository};
use crate::transaction::{NewTransaction, Transaction};
use crate::transaction_log::TransactionLog;
use crate::wallet::Wallet;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
struct WalletRow {
    /// Row lock held for the whole unit of work.
    lock: Mutex<()>,
    committed: RwLock<Wallet>,
}

impl WalletRow {
    fn new(wallet: Wallet) -> Self {
        Self {
            lock: Mutex::new(()),
            committed: RwLock::new(wallet),
        }
    }
}

/// Ledger entries staged by one unit of work.
struct UnitOfWork<'a> {
    log: &'a TransactionLog,
    user_id: UserId,
    now: DateTime<Utc>,
    staged: Vec<Transaction>,
}

impl LedgerWriter for UnitOfWork<'_> {
    fn insert_transaction(&mut self, entry: NewTransaction) -> Result<Transaction, StoreError> {
        if entry.user_id != self.user_id {
            return Err(StoreError::Constraint(format!(
                "ledger entry for user {} inserted under lock of user {}",
                entry.user_id, self.user_id
            )));
        }
        let transaction = entry.into_transaction(self.log.allocate_id(), self.now);
        self.staged.push(transaction.clone());
        Ok(transaction)
    }
}

/// Wallet rows plus ledger table with row-level locking.
#[derive(Debug)]
pub struct MemoryStore {
    wallets: DashMap<UserId, Arc<WalletRow>>,
    log: TransactionLog,
    journal: Option<Journal>,
    /// Serializes journaled wallet creation so the map shard is never
    /// locked across a journal write.
    creating: Mutex<()>,
    lock_timeout: Duration,
}

impl MemoryStore {
    /// Creates an empty, non-durable store with default settings.
    pub fn new() -> Self {
        Self::empty(StoreConfig::DEFAULT_LOCK_TIMEOUT, None)
    }

    /// Opens a store, replaying its journal when one is configured.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Journal`] or [`StoreError::Corrupt`] if the
    /// journal cannot be read or does not describe a consistent ledger.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let Some(journal_config) = &config.journal else {
            return Ok(Self::empty(config.lock_timeout, None));
        };

        let (journal, records) = Journal::recover(journal_config)?;
        let store = Self::empty(config.lock_timeout, None);
        for (index, record) in records.into_iter().enumerate() {
            store
                .apply_recovered(record)
                .map_err(|reason| StoreError::Corrupt {
                    line: index + 1,
                    reason,
                })?;
        }

        tracing::info!(
            wallets = store.wallets.len(),
            transactions = store.log.len(),
            "ledger store recovered"
        );
        Ok(Self {
            journal: Some(journal),
            ..store
        })
    }

    fn empty(lock_timeout: Duration, journal: Option<Journal>) -> Self {
        Self {
            wallets: DashMap::new(),
            log: TransactionLog::new(),
            journal,
            creating: Mutex::new(()),
            lock_timeout,
        }
    }

    fn apply_recovered(&self, record: JournalRecord) -> Result<(), String> {
        match record {
            JournalRecord::WalletCreated { wallet } => {
                self.wallets
                    .entry(wallet.user_id())
                    .or_insert_with(|| Arc::new(WalletRow::new(wallet)));
            }
            JournalRecord::Committed {
                wallet,
                transactions,
            } => {
                wallet.check_constraints().map_err(|e| e.to_string())?;
                for transaction in transactions {
                    if transaction.user_id != wallet.user_id() {
                        return Err(format!(
                            "transaction {} does not belong to wallet of user {}",
                            transaction.id,
                            wallet.user_id()
                        ));
                    }
                    self.log
                        .resume_after(transaction.id)
                        .map_err(|e| e.to_string())?;
                    self.log.push(transaction).map_err(|e| e.to_string())?;
                }
                match self.wallets.entry(wallet.user_id()) {
                    Entry::Occupied(row) => *row.get().committed.write() = wallet,
                    Entry::Vacant(vacant) => {
                        vacant.insert(Arc::new(WalletRow::new(wallet)));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Committed wallets ordered by user id.
    pub fn wallets(&self) -> Vec<Wallet> {
        let mut wallets: Vec<Wallet> = self
            .wallets
            .iter()
            .map(|row| row.value().committed.read().clone())
            .collect();
        wallets.sort_by_key(Wallet::user_id);
        wallets
    }

    /// Number of committed ledger entries across all users.
    pub fn transaction_count(&self) -> usize {
        self.log.len()
    }

    /// Forces buffered journal records to disk. No-op without a journal.
    pub fn sync(&self) -> Result<(), StoreError> {
        match &self.journal {
            Some(journal) => journal.sync(),
            None => Ok(()),
        }
    }

    fn row(&self, user_id: UserId) -> Option<Arc<WalletRow>> {
        self.wallets.get(&user_id).map(|row| Arc::clone(row.value()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl WalletRepository for MemoryStore {
    fn find_wallet(&self, user_id: UserId) -> Result<Option<Wallet>, StoreError> {
        Ok(self.row(user_id).map(|row| row.committed.read().clone()))
    }

    fn create_wallet(&self, user_id: UserId) -> Result<Wallet, StoreError> {
        let Some(journal) = &self.journal else {
            // The map entry is the unique index on user_id: only one creator
            // wins, everyone else reads the winner's row.
            let row = self
                .wallets
                .entry(user_id)
                .or_insert_with(|| Arc::new(WalletRow::new(Wallet::new(user_id))));
            return Ok(row.value().committed.read().clone());
        };

        if let Some(row) = self.row(user_id) {
            return Ok(row.committed.read().clone());
        }
        let _creating = self.creating.lock();
        if let Some(row) = self.row(user_id) {
            return Ok(row.committed.read().clone());
        }

        // Journaled before it becomes visible; a failed append leaves no row.
        let wallet = Wallet::new(user_id);
        journal.append(&JournalRecord::WalletCreated {
            wallet: wallet.clone(),
        })?;
        self.wallets
            .insert(user_id, Arc::new(WalletRow::new(wallet.clone())));
        tracing::debug!(%user_id, "wallet row inserted");
        Ok(wallet)
    }

    fn with_lock<T, F>(&self, user_id: UserId, mutator: F) -> Result<T, WalletError>
    where
        F: FnOnce(&mut Wallet, &mut dyn LedgerWriter) -> Result<T, WalletError>,
    {
        let row = self.row(user_id).ok_or(WalletError::NotFound)?;

        let _guard = row.lock.try_lock_for(self.lock_timeout).ok_or_else(|| {
            tracing::warn!(%user_id, timeout = ?self.lock_timeout, "wallet lock wait timed out");
            StoreError::LockTimeout {
                user_id,
                waited: self.lock_timeout,
            }
        })?;

        let mut wallet = row.committed.read().clone();
        wallet.bump_version();
        let mut unit = UnitOfWork {
            log: &self.log,
            user_id,
            now: Utc::now(),
            staged: Vec::new(),
        };

        // Any early return from here on drops the snapshot and the staged
        // entries, which is the rollback.
        let value = mutator(&mut wallet, &mut unit)?;

        if wallet.user_id() != user_id {
            return Err(StoreError::Constraint(format!(
                "wallet of user {user_id} rewritten as user {}",
                wallet.user_id()
            ))
            .into());
        }
        wallet.check_constraints()?;

        if let Some(journal) = &self.journal {
            journal.append(&JournalRecord::Committed {
                wallet: wallet.clone(),
                transactions: unit.staged.clone(),
            })?;
        }

        // Ledger first, wallet image last: a reader that sees the new
        // balance also sees its entries.
        let staged = unit.staged.len();
        for transaction in unit.staged {
            self.log.push(transaction)?;
        }
        *row.committed.write() = wallet;

        tracing::trace!(%user_id, staged, "unit of work committed");
        Ok(value)
    }

    fn transactions(
        &self,
        user_id: UserId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Transaction>, StoreError> {
        Ok(self.log.for_user(user_id, since))
    }

    fn find_by_reference(
        &self,
        user_id: UserId,
        reference_id: &ReferenceId,
    ) -> Result<Option<Transaction>, StoreError> {
        Ok(self.log.find_by_reference(user_id, reference_id))
    }
}
