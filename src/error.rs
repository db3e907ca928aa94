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

//! Error types for wallet operations and the backing store.

use crate::base::UserId;
use std::time::Duration;
use thiserror::Error;

/// Wallet operation errors.
///
/// Every variant aborts the enclosing unit of work: when an operation
/// returns one of these, neither the wallet nor the ledger has changed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// Amount, grams or price is zero or negative
    #[error("invalid amount (must be positive)")]
    InvalidAmount,

    /// Fiat or gold balance is below what the operation needs
    #[error("insufficient balance")]
    InsufficientBalance,

    /// Wallet is administratively frozen
    #[error("wallet is locked")]
    WalletLocked,

    /// No wallet row exists for the user
    #[error("wallet not found")]
    NotFound,

    /// The backing store failed or timed out
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl WalletError {
    /// Whether the caller may reasonably retry the same request.
    ///
    /// Only lock timeouts qualify. A retried operation is applied again
    /// unless the caller deduplicates by reference first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WalletError::Store(StoreError::LockTimeout { .. }))
    }
}

/// Persistence errors raised by the ledger store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The wallet row lock could not be acquired in time
    #[error("timed out after {waited:?} waiting for wallet lock of user {user_id}")]
    LockTimeout { user_id: UserId, waited: Duration },

    /// A check or uniqueness constraint rejected the write
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// Writing or syncing the journal failed
    #[error("journal write failed: {0}")]
    Journal(String),

    /// A journal record could not be replayed
    #[error("corrupt journal record at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },
}

/// Errors returned when handing a job to a [`WorkerPool`](crate::WorkerPool).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// The shard's queue is at capacity
    #[error("job queue full")]
    QueueFull,

    /// The pool has been shut down
    #[error("worker pool is shut down")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        assert_eq!(
            WalletError::InvalidAmount.to_string(),
            "invalid amount (must be positive)"
        );
        assert_eq!(WalletError::InsufficientBalance.to_string(), "insufficient balance");
        assert_eq!(WalletError::WalletLocked.to_string(), "wallet is locked");
        assert_eq!(WalletError::NotFound.to_string(), "wallet not found");
        assert_eq!(
            WalletError::Store(StoreError::Constraint("fiat_balance >= 0".into())).to_string(),
            "store error: constraint violation: fiat_balance >= 0"
        );
        assert_eq!(SubmitError::QueueFull.to_string(), "job queue full");
        assert_eq!(
            StoreError::Corrupt {
                line: 3,
                reason: "eof".into()
            }
            .to_string(),
            "corrupt journal record at line 3: eof"
        );
    }

    #[test]
    fn lock_timeout_message_names_user() {
        let err = StoreError::LockTimeout {
            user_id: UserId(7),
            waited: Duration::from_millis(250),
        };
        assert_eq!(
            err.to_string(),
            "timed out after 250ms waiting for wallet lock of user 7"
        );
    }

    #[test]
    fn only_lock_timeouts_are_retryable() {
        let timeout = WalletError::from(StoreError::LockTimeout {
            user_id: UserId(1),
            waited: Duration::from_secs(1),
        });
        assert!(timeout.is_retryable());
        assert!(!WalletError::InsufficientBalance.is_retryable());
        assert!(!WalletError::from(StoreError::Journal("disk full".into())).is_retryable());
    }

    #[test]
    fn errors_are_cloneable() {
        let error = WalletError::InsufficientBalance;
        let cloned = error.clone();
        assert_eq!(error, cloned);
    }
}
