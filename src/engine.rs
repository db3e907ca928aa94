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

//! Wallet ledger engine.
//!
//! The [`Engine`] is the central component that moves value between a
//! user's fiat and gold balances. It validates requests, then expresses
//! every balance change as a mutator run inside
//! [`WalletRepository::with_lock`], so the wallet update and its ledger
//! entry commit together or not at all.
//!
//! # Operations
//!
//! - **TopUp / Refund**: credit fiat.
//! - **BuyGold**: debit `grams * price` fiat, credit `grams` gold.
//! - **SellGold**: debit `grams` gold, credit `grams * price` fiat.
//! - **SetLocked**: administrative freeze or unfreeze, no ledger entry.
//!
//! # Thread Safety
//!
//! The engine keeps no state of its own. Operations on the same user are
//! serialized by the repository's row lock; operations on different users
//! run fully in parallel.

use crate::base::{ReferenceId, UserId};
use crate::error::WalletError;
use crate::repository::{LedgerWriter, WalletRepository};
use crate::store::MemoryStore;
use crate::transaction::{NewTransaction, Transaction};
use crate::wallet::Wallet;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::instrument;

/// Result of a successful balance-moving operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Receipt {
    /// Wallet as committed.
    pub wallet: Wallet,
    /// Ledger entry committed with it.
    pub transaction: Transaction,
}

/// Wallet ledger engine over a [`WalletRepository`].
///
/// # Invariants
///
/// - `fiat_balance >= 0` and `gold_grams >= 0` in every committed state.
/// - A successful operation commits exactly one ledger entry; a failed one
///   commits nothing.
/// - Reference ids are recorded but never checked for uniqueness.
pub struct Engine<R = MemoryStore> {
    repository: R,
}

impl Engine<MemoryStore> {
    /// Creates an engine over an empty in-memory store.
    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new())
    }
}

impl Default for Engine<MemoryStore> {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl<R: WalletRepository> Engine<R> {
    pub fn new(repository: R) -> Self {
        Engine { repository }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    /// Returns the user's wallet, creating a zero-balance one if needed.
    ///
    /// Creation is insert-or-fetch, so concurrent first calls for the same
    /// user all return the same row.
    #[instrument(skip(self))]
    pub fn get_wallet(&self, user_id: UserId) -> Result<Wallet, WalletError> {
        if let Some(wallet) = self.repository.find_wallet(user_id)? {
            return Ok(wallet);
        }
        let wallet = self.repository.create_wallet(user_id)?;
        tracing::info!(%user_id, "wallet created");
        Ok(wallet)
    }

    /// Returns the user's wallet without creating it.
    ///
    /// # Errors
    ///
    /// [`WalletError::NotFound`] if the user has no wallet yet.
    pub fn find_wallet(&self, user_id: UserId) -> Result<Wallet, WalletError> {
        self.repository
            .find_wallet(user_id)?
            .ok_or(WalletError::NotFound)
    }

    /// Credits `amount` fiat.
    ///
    /// # Errors
    ///
    /// - [`WalletError::InvalidAmount`] - `amount <= 0`.
    /// - [`WalletError::WalletLocked`] - the wallet is frozen.
    /// - [`WalletError::Store`] - lock timeout or persistence failure.
    #[instrument(skip(self), fields(kind = "topup"))]
    pub fn top_up(
        &self,
        user_id: UserId,
        amount: Decimal,
        reference_id: ReferenceId,
    ) -> Result<Receipt, WalletError> {
        require_positive(&[amount])?;
        self.apply(user_id, move |wallet, ledger| {
            wallet.credit_fiat(amount)?;
            Ok(ledger.insert_transaction(NewTransaction::top_up(user_id, amount, reference_id))?)
        })
    }

    /// Credits `amount` fiat as a refund.
    ///
    /// Same rules as [`Engine::top_up`]; only the ledger entry type differs.
    #[instrument(skip(self), fields(kind = "refund"))]
    pub fn refund(
        &self,
        user_id: UserId,
        amount: Decimal,
        reference_id: ReferenceId,
    ) -> Result<Receipt, WalletError> {
        require_positive(&[amount])?;
        self.apply(user_id, move |wallet, ledger| {
            wallet.credit_fiat(amount)?;
            Ok(ledger.insert_transaction(NewTransaction::refund(user_id, amount, reference_id))?)
        })
    }

    /// Buys `grams` of gold at `price_per_gram`.
    ///
    /// # Errors
    ///
    /// - [`WalletError::InvalidAmount`] - non-positive grams or price, or a
    ///   cost outside the decimal range.
    /// - [`WalletError::WalletLocked`] - the wallet is frozen.
    /// - [`WalletError::InsufficientBalance`] - fiat below `grams * price`.
    /// - [`WalletError::Store`] - lock timeout or persistence failure.
    #[instrument(skip(self), fields(kind = "buy"))]
    pub fn buy_gold(
        &self,
        user_id: UserId,
        grams: Decimal,
        price_per_gram: Decimal,
        reference_id: ReferenceId,
    ) -> Result<Receipt, WalletError> {
        let total_cost = quote(grams, price_per_gram)?;
        self.apply(user_id, move |wallet, ledger| {
            wallet.buy_gold(grams, total_cost)?;
            let entry =
                NewTransaction::buy(user_id, grams, price_per_gram, total_cost, reference_id);
            Ok(ledger.insert_transaction(entry)?)
        })
    }

    /// Sells `grams` of gold at `price_per_gram`.
    ///
    /// # Errors
    ///
    /// Mirrors [`Engine::buy_gold`], with the sufficiency check on gold.
    #[instrument(skip(self), fields(kind = "sell"))]
    pub fn sell_gold(
        &self,
        user_id: UserId,
        grams: Decimal,
        price_per_gram: Decimal,
        reference_id: ReferenceId,
    ) -> Result<Receipt, WalletError> {
        let total_value = quote(grams, price_per_gram)?;
        self.apply(user_id, move |wallet, ledger| {
            wallet.sell_gold(grams, total_value)?;
            let entry =
                NewTransaction::sell(user_id, grams, price_per_gram, total_value, reference_id);
            Ok(ledger.insert_transaction(entry)?)
        })
    }

    /// Freezes or unfreezes the wallet.
    ///
    /// Balances do not move, so no ledger entry is written.
    #[instrument(skip(self))]
    pub fn set_locked(&self, user_id: UserId, locked: bool) -> Result<Wallet, WalletError> {
        self.get_wallet(user_id)?;
        let wallet = self.repository.with_lock(user_id, |wallet, _| {
            wallet.set_locked(locked);
            Ok(wallet.clone())
        })?;
        tracing::info!(%user_id, locked, "wallet freeze flag changed");
        Ok(wallet)
    }

    /// All ledger entries of the user, oldest first.
    #[instrument(skip(self))]
    pub fn get_user_transactions(&self, user_id: UserId) -> Result<Vec<Transaction>, WalletError> {
        Ok(self.repository.transactions(user_id, None)?)
    }

    /// Ledger entries of the user created at or after `since`.
    #[instrument(skip(self))]
    pub fn get_user_transactions_since(
        &self,
        user_id: UserId,
        since: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, WalletError> {
        Ok(self.repository.transactions(user_id, Some(since))?)
    }

    /// Looks up an earlier entry by reference so callers can deduplicate
    /// retries. The engine itself never does.
    #[instrument(skip(self))]
    pub fn find_by_reference(
        &self,
        user_id: UserId,
        reference_id: &ReferenceId,
    ) -> Result<Option<Transaction>, WalletError> {
        Ok(self.repository.find_by_reference(user_id, reference_id)?)
    }

    /// Ensures the row exists, then runs `mutator` under the row lock and
    /// packages the committed wallet with its ledger entry.
    fn apply<F>(&self, user_id: UserId, mutator: F) -> Result<Receipt, WalletError>
    where
        F: FnOnce(&mut Wallet, &mut dyn LedgerWriter) -> Result<Transaction, WalletError>,
    {
        self.get_wallet(user_id)?;

        let result = self.repository.with_lock(user_id, |wallet, ledger| {
            let transaction = mutator(wallet, ledger)?;
            Ok(Receipt {
                wallet: wallet.clone(),
                transaction,
            })
        });

        match &result {
            Ok(receipt) => tracing::info!(
                %user_id,
                transaction_id = %receipt.transaction.id,
                reference_id = %receipt.transaction.reference_id,
                amount = %receipt.transaction.amount,
                gold_grams = %receipt.transaction.gold_grams,
                "ledger entry committed"
            ),
            Err(WalletError::Store(e)) => tracing::warn!(%user_id, error = %e, "store failure"),
            Err(e) => tracing::debug!(%user_id, error = %e, "operation rejected"),
        }
        result
    }
}

fn require_positive(values: &[Decimal]) -> Result<(), WalletError> {
    if values.iter().any(|value| *value <= Decimal::ZERO) {
        return Err(WalletError::InvalidAmount);
    }
    Ok(())
}

/// `grams * price_per_gram`, exact.
fn quote(grams: Decimal, price_per_gram: Decimal) -> Result<Decimal, WalletError> {
    require_positive(&[grams, price_per_gram])?;
    grams
        .checked_mul(price_per_gram)
        .filter(|total| *total > Decimal::ZERO)
        .ok_or(WalletError::InvalidAmount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn quote_is_exact() {
        assert_eq!(quote(dec!(2), dec!(100)).unwrap(), dec!(200));
        assert_eq!(quote(dec!(0.3), dec!(0.1)).unwrap(), dec!(0.03));
    }

    #[test]
    fn quote_rejects_non_positive_inputs() {
        assert_eq!(quote(dec!(0), dec!(1)), Err(WalletError::InvalidAmount));
        assert_eq!(quote(dec!(1), dec!(-1)), Err(WalletError::InvalidAmount));
    }

    #[test]
    fn quote_rejects_overflow() {
        assert_eq!(
            quote(Decimal::MAX, dec!(2)),
            Err(WalletError::InvalidAmount)
        );
    }

    #[test]
    fn set_locked_creates_wallet_if_missing() {
        let engine = Engine::in_memory();
        let wallet = engine.set_locked(UserId(5), true).unwrap();
        assert!(wallet.locked());
        assert_eq!(wallet.version(), 2);
        assert!(engine.get_user_transactions(UserId(5)).unwrap().is_empty());
    }
}
