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

//! Append-only transaction table.
//!
//! Holds committed ledger entries, indexed by id and by owning user, and
//! hands out ids from a monotonic sequence.

use crate::base::{ReferenceId, TransactionId, UserId};
use crate::error::StoreError;
use crate::transaction::Transaction;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// A thread-safe, append-only ledger table.
///
/// Entries are never updated or removed. The per-user index keeps ids in
/// commit order, which the wallet row lock makes well defined for a single
/// user.
#[derive(Debug)]
pub struct TransactionLog {
    /// Primary key index; also rejects duplicate ids.
    entries: DashMap<TransactionId, Arc<Transaction>>,

    /// Secondary index on `user_id`, in commit order.
    by_user: DashMap<UserId, Vec<TransactionId>>,

    /// Next id to hand out.
    next_id: AtomicU64,
}

impl TransactionLog {
    /// Creates an empty table whose first id is 1.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            by_user: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Reserves the next id. Reserved ids of rolled-back units are skipped.
    pub fn allocate_id(&self) -> TransactionId {
        TransactionId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Makes sure future ids are greater than `id` (used after replay).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Constraint`] if `id` is the last id of the
    /// sequence, leaving nothing to hand out.
    pub fn resume_after(&self, id: TransactionId) -> Result<(), StoreError> {
        let next = id.0.checked_add(1).ok_or_else(|| {
            StoreError::Constraint(format!("transaction id {id} exhausts the id sequence"))
        })?;
        self.next_id.fetch_max(next, Ordering::SeqCst);
        Ok(())
    }

    /// Appends a committed entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Constraint`] if an entry with the same id
    /// already exists.
    pub fn push(&self, transaction: Transaction) -> Result<(), StoreError> {
        let id = transaction.id;
        let user_id = transaction.user_id;

        // Atomic check-and-insert, like a primary key.
        match self.entries.entry(id) {
            Entry::Occupied(_) => {
                return Err(StoreError::Constraint(format!(
                    "duplicate transaction id {id}"
                )));
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(transaction));
            }
        }

        self.by_user.entry(user_id).or_default().push(id);
        Ok(())
    }

    /// Entries of one user created at or after `since`, oldest first.
    pub fn for_user(&self, user_id: UserId, since: Option<DateTime<Utc>>) -> Vec<Transaction> {
        let ids = match self.by_user.get(&user_id) {
            Some(ids) => ids.value().clone(),
            None => return Vec::new(),
        };

        let mut transactions: Vec<Transaction> = ids
            .iter()
            .filter_map(|id| self.entries.get(id).map(|entry| Transaction::clone(&entry)))
            .filter(|tx| since.is_none_or(|since| tx.created_at >= since))
            .collect();
        transactions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        transactions
    }

    /// Most recent entry of `user_id` tagged with `reference_id`.
    pub fn find_by_reference(
        &self,
        user_id: UserId,
        reference_id: &ReferenceId,
    ) -> Option<Transaction> {
        let ids = self.by_user.get(&user_id)?.value().clone();
        ids.iter().rev().find_map(|id| {
            self.entries
                .get(id)
                .filter(|entry| &entry.reference_id == reference_id)
                .map(|entry| Transaction::clone(&entry))
        })
    }

    pub fn get(&self, id: TransactionId) -> Option<Transaction> {
        self.entries.get(&id).map(|entry| Transaction::clone(&entry))
    }

    /// Number of committed entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for TransactionLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::NewTransaction;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn entry(log: &TransactionLog, user: u64, reference: &str, at: DateTime<Utc>) -> Transaction {
        NewTransaction::top_up(UserId(user), dec!(1), reference.into())
            .into_transaction(log.allocate_id(), at)
    }

    #[test]
    fn ids_are_monotonic() {
        let log = TransactionLog::new();
        let a = log.allocate_id();
        let b = log.allocate_id();
        assert_eq!(a, TransactionId(1));
        assert!(b > a);
    }

    #[test]
    fn duplicate_id_rejected() {
        let log = TransactionLog::new();
        let tx = entry(&log, 1, "a", Utc::now());
        log.push(tx.clone()).unwrap();

        let result = log.push(tx);
        assert!(matches!(result, Err(StoreError::Constraint(_))));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn for_user_filters_owner_and_orders_by_time() {
        let log = TransactionLog::new();
        let t0 = Utc::now();
        let late = entry(&log, 1, "late", t0 + Duration::seconds(5));
        let other = entry(&log, 2, "other", t0);
        let early = entry(&log, 1, "early", t0);
        log.push(late).unwrap();
        log.push(other).unwrap();
        log.push(early).unwrap();

        let refs: Vec<_> = log
            .for_user(UserId(1), None)
            .into_iter()
            .map(|tx| tx.reference_id.0)
            .collect();
        assert_eq!(refs, vec!["early", "late"]);

        let since = log.for_user(UserId(1), Some(t0 + Duration::seconds(1)));
        assert_eq!(since.len(), 1);
        assert_eq!(since[0].reference_id.as_str(), "late");

        assert!(log.for_user(UserId(3), None).is_empty());
    }

    #[test]
    fn find_by_reference_returns_latest_match() {
        let log = TransactionLog::new();
        let now = Utc::now();
        let first = entry(&log, 1, "dup", now);
        let second = entry(&log, 1, "dup", now);
        let second_id = second.id;
        log.push(first).unwrap();
        log.push(second).unwrap();

        let found = log.find_by_reference(UserId(1), &"dup".into()).unwrap();
        assert_eq!(found.id, second_id);
        assert!(log.find_by_reference(UserId(2), &"dup".into()).is_none());
    }

    #[test]
    fn resume_after_skips_recovered_ids() {
        let log = TransactionLog::new();
        log.resume_after(TransactionId(41)).unwrap();
        assert_eq!(log.allocate_id(), TransactionId(42));
        // Never moves backwards.
        log.resume_after(TransactionId(3)).unwrap();
        assert_eq!(log.allocate_id(), TransactionId(43));
    }

    #[test]
    fn resume_after_last_id_is_rejected() {
        let log = TransactionLog::new();
        let result = log.resume_after(TransactionId(u64::MAX));
        assert!(matches!(result, Err(StoreError::Constraint(_))));
        assert_eq!(log.allocate_id(), TransactionId(1));
    }
}
