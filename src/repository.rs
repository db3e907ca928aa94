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

//! Storage abstraction used by the [`Engine`](crate::Engine).
//!
//! A repository offers plain reads, an insert-or-fetch wallet create, and
//! [`WalletRepository::with_lock`]: the single place where wallet rows
//! change. `with_lock` runs a caller-supplied mutator against an exclusive,
//! row-locked snapshot and commits the wallet together with every ledger
//! entry the mutator inserted, or nothing at all.

use crate::base::{ReferenceId, UserId};
use crate::error::{StoreError, WalletError};
use crate::transaction::{NewTransaction, Transaction};
use crate::wallet::Wallet;
use chrono::{DateTime, Utc};

/// Ledger insert handle valid for the duration of one locked unit of work.
pub trait LedgerWriter {
    /// Stages a ledger entry. It commits with the wallet or not at all.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Constraint`] if the entry belongs to a
    /// different user than the locked wallet.
    fn insert_transaction(&mut self, entry: NewTransaction) -> Result<Transaction, StoreError>;
}

/// Transactional access to wallet rows and the ledger table.
pub trait WalletRepository: Send + Sync {
    /// Reads the committed wallet, if the row exists.
    fn find_wallet(&self, user_id: UserId) -> Result<Option<Wallet>, StoreError>;

    /// Inserts a zero-balance wallet, or returns the existing row when one
    /// is already there. Concurrent callers all observe the same row.
    fn create_wallet(&self, user_id: UserId) -> Result<Wallet, StoreError>;

    /// Runs `mutator` under the wallet's row lock.
    ///
    /// 1. Waits, bounded, for the exclusive row lock.
    /// 2. Hands the mutator a snapshot of the row and a [`LedgerWriter`].
    /// 3. On `Ok`, validates and persists the wallet and the staged ledger
    ///    entries as one unit; on `Err` (or panic) discards both.
    ///
    /// # Errors
    ///
    /// - [`WalletError::NotFound`] if the row does not exist. Rows are
    ///   never created here.
    /// - [`WalletError::Store`] on lock timeout or persistence failure.
    /// - Whatever the mutator returns.
    fn with_lock<T, F>(&self, user_id: UserId, mutator: F) -> Result<T, WalletError>
    where
        F: FnOnce(&mut Wallet, &mut dyn LedgerWriter) -> Result<T, WalletError>;

    /// Ledger entries of a user created at or after `since`, oldest first.
    fn transactions(
        &self,
        user_id: UserId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Transaction>, StoreError>;

    /// Latest ledger entry of a user carrying `reference_id`.
    fn find_by_reference(
        &self,
        user_id: UserId,
        reference_id: &ReferenceId,
    ) -> Result<Option<Transaction>, StoreError>;
}
