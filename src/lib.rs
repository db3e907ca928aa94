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

//! # Gold Wallet Ledger
//!
//! This library provides a wallet ledger engine for a dual-currency account:
//! every user holds a fiat balance and a gold balance, and moves value
//! between them with top-ups, gold purchases and gold sales. Each movement
//! is recorded as an immutable ledger entry in the same atomic unit as the
//! balance change.
//!
//! ## Core Components
//!
//! - [`Engine`]: validates operations and drives the locking protocol
//! - [`WalletRepository`]: storage seam with the row-locked `with_lock` unit of work
//! - [`MemoryStore`]: row-locked ledger store with an optional durable [`Journal`]
//! - [`Wallet`] / [`Transaction`]: the data model
//! - [`WalletError`]: error kinds surfaced to callers
//! - [`WorkerPool`]: user-sharded worker threads for driving the engine
//!
//! ## Example
//!
//! ```
//! use gold_wallet_ledger::{Engine, TransactionKind, UserId};
//! use rust_decimal_macros::dec;
//!
//! let engine = Engine::in_memory();
//! let user = UserId(1);
//!
//! engine.top_up(user, dec!(1000), "topup_1".into()).unwrap();
//! let receipt = engine.buy_gold(user, dec!(2), dec!(100), "buy_1".into()).unwrap();
//!
//! assert_eq!(receipt.wallet.fiat_balance(), dec!(800));
//! assert_eq!(receipt.wallet.gold_grams(), dec!(2));
//! assert_eq!(receipt.transaction.kind, TransactionKind::Buy);
//! assert_eq!(receipt.transaction.amount, dec!(200));
//! ```
//!
//! ## Thread Safety
//!
//! The engine holds no state of its own. Mutations of one user are
//! serialized by the store's row lock, with a bounded wait; mutations of
//! different users run in parallel.

mod base;
pub mod config;
mod engine;
pub mod error;
pub mod journal;
pub mod repository;
mod store;
mod transaction;
mod transaction_log;
pub mod wallet;
mod worker_pool;

pub use base::{ReferenceId, TransactionId, UserId};
pub use config::{JournalConfig, StoreConfig};
pub use engine::{Engine, Receipt};
pub use error::{StoreError, SubmitError, WalletError};
pub use journal::{Journal, JournalRecord};
pub use repository::{LedgerWriter, WalletRepository};
pub use store::MemoryStore;
pub use transaction::{NewTransaction, Transaction, TransactionKind, TransactionStatus};
pub use transaction_log::TransactionLog;
pub use wallet::{Wallet, WalletReport};
pub use worker_pool::{PoolStats, WorkerPool};
