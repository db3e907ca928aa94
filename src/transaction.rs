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

//! Ledger entries.
//!
//! A [`Transaction`] is written in the same unit of work as the wallet
//! mutation it describes and never changes afterwards. Its status is fixed
//! at creation time.

use crate::base::{ReferenceId, TransactionId, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    TopUp,
    Buy,
    Sell,
    Refund,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
}

/// A ledger entry that has not been inserted yet.
///
/// The store assigns the id and timestamps on insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub user_id: UserId,
    pub kind: TransactionKind,
    /// Fiat moved, as a magnitude.
    pub amount: Decimal,
    /// Gold moved, as a magnitude. Zero for fiat-only entries.
    pub gold_grams: Decimal,
    /// Price snapshot used. Zero for fiat-only entries.
    pub price_per_gram: Decimal,
    pub status: TransactionStatus,
    pub reference_id: ReferenceId,
}

impl NewTransaction {
    pub fn top_up(user_id: UserId, amount: Decimal, reference_id: ReferenceId) -> Self {
        Self::fiat_only(user_id, TransactionKind::TopUp, amount, reference_id)
    }

    pub fn refund(user_id: UserId, amount: Decimal, reference_id: ReferenceId) -> Self {
        Self::fiat_only(user_id, TransactionKind::Refund, amount, reference_id)
    }

    pub fn buy(
        user_id: UserId,
        grams: Decimal,
        price_per_gram: Decimal,
        total_cost: Decimal,
        reference_id: ReferenceId,
    ) -> Self {
        Self {
            user_id,
            kind: TransactionKind::Buy,
            amount: total_cost,
            gold_grams: grams,
            price_per_gram,
            status: TransactionStatus::Success,
            reference_id,
        }
    }

    pub fn sell(
        user_id: UserId,
        grams: Decimal,
        price_per_gram: Decimal,
        total_value: Decimal,
        reference_id: ReferenceId,
    ) -> Self {
        Self {
            user_id,
            kind: TransactionKind::Sell,
            amount: total_value,
            gold_grams: grams,
            price_per_gram,
            status: TransactionStatus::Success,
            reference_id,
        }
    }

    fn fiat_only(
        user_id: UserId,
        kind: TransactionKind,
        amount: Decimal,
        reference_id: ReferenceId,
    ) -> Self {
        Self {
            user_id,
            kind,
            amount,
            gold_grams: Decimal::ZERO,
            price_per_gram: Decimal::ZERO,
            status: TransactionStatus::Success,
            reference_id,
        }
    }

    /// Materializes the row the store persists.
    pub fn into_transaction(self, id: TransactionId, now: DateTime<Utc>) -> Transaction {
        Transaction {
            id,
            user_id: self.user_id,
            kind: self.kind,
            amount: self.amount,
            gold_grams: self.gold_grams,
            price_per_gram: self.price_per_gram,
            status: self.status,
            reference_id: self.reference_id,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Immutable audit record of one balance-changing operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub gold_grams: Decimal,
    pub price_per_gram: Decimal,
    pub status: TransactionStatus,
    pub reference_id: ReferenceId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
