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

//! Wallet data model.
//!
//! A wallet holds two balances, fiat cash and gold grams, plus an
//! administrative freeze flag. Balance changes only happen through the
//! mutation helpers below, each of which checks the freeze flag first and
//! sufficiency second, and leaves the wallet untouched when it fails.
//!
//! # Example
//!
//! ```
//! use rust_decimal_macros::dec;
//! use gold_wallet_ledger::{UserId, Wallet};
//!
//! let wallet = Wallet::new(UserId(1));
//! assert_eq!(wallet.fiat_balance(), dec!(0));
//! assert_eq!(wallet.gold_grams(), dec!(0));
//! assert!(!wallet.locked());
//! ```

use crate::base::UserId;
use crate::error::{StoreError, WalletError};
use rust_decimal::Decimal;
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};

/// Per-user dual-currency balance record.
///
/// The serde derives are exact (decimals as strings) and are what the
/// journal persists. Use [`Wallet::report`] for rounded display output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    user_id: UserId,
    fiat_balance: Decimal,
    gold_grams: Decimal,
    locked: bool,
    /// Bumped on every committed mutation.
    version: u64,
}

impl Wallet {
    /// Fiat column scale used for reports.
    pub const FIAT_PRECISION: u32 = 2;
    /// Gold column scale used for reports.
    pub const GOLD_PRECISION: u32 = 4;

    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            fiat_balance: Decimal::ZERO,
            gold_grams: Decimal::ZERO,
            locked: false,
            version: 1,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn fiat_balance(&self) -> Decimal {
        self.fiat_balance
    }

    pub fn gold_grams(&self) -> Decimal {
        self.gold_grams
    }

    pub fn locked(&self) -> bool {
        self.locked
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Rounded view for CSV/JSON reports.
    pub fn report(&self) -> WalletReport<'_> {
        WalletReport(self)
    }

    /// Checks the non-negative balance constraint.
    ///
    /// The store calls this before committing, the same way a `CHECK`
    /// constraint would reject the row.
    pub fn check_constraints(&self) -> Result<(), StoreError> {
        if self.fiat_balance < Decimal::ZERO {
            return Err(StoreError::Constraint(format!(
                "fiat_balance must be non-negative, got {} for user {}",
                self.fiat_balance, self.user_id
            )));
        }
        if self.gold_grams < Decimal::ZERO {
            return Err(StoreError::Constraint(format!(
                "gold_grams must be non-negative, got {} for user {}",
                self.gold_grams, self.user_id
            )));
        }
        Ok(())
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.fiat_balance >= Decimal::ZERO,
            "Invariant violated: fiat balance went negative: {}",
            self.fiat_balance
        );
        debug_assert!(
            self.gold_grams >= Decimal::ZERO,
            "Invariant violated: gold balance went negative: {}",
            self.gold_grams
        );
    }

    fn ensure_unfrozen(&self) -> Result<(), WalletError> {
        if self.locked {
            return Err(WalletError::WalletLocked);
        }
        Ok(())
    }

    /// Increases fiat balance (top-up, refund).
    pub(crate) fn credit_fiat(&mut self, amount: Decimal) -> Result<(), WalletError> {
        if amount <= Decimal::ZERO {
            return Err(WalletError::InvalidAmount);
        }
        self.ensure_unfrozen()?;
        self.fiat_balance = checked(self.fiat_balance.checked_add(amount))?;
        self.assert_invariants();
        Ok(())
    }

    /// Exchanges `cost` fiat for `grams` gold.
    pub(crate) fn buy_gold(&mut self, grams: Decimal, cost: Decimal) -> Result<(), WalletError> {
        if grams <= Decimal::ZERO || cost <= Decimal::ZERO {
            return Err(WalletError::InvalidAmount);
        }
        self.ensure_unfrozen()?;
        if self.fiat_balance < cost {
            return Err(WalletError::InsufficientBalance);
        }
        let gold_grams = checked(self.gold_grams.checked_add(grams))?;
        self.fiat_balance -= cost;
        self.gold_grams = gold_grams;
        self.assert_invariants();
        Ok(())
    }

    /// Exchanges `grams` gold for `proceeds` fiat.
    pub(crate) fn sell_gold(
        &mut self,
        grams: Decimal,
        proceeds: Decimal,
    ) -> Result<(), WalletError> {
        if grams <= Decimal::ZERO || proceeds <= Decimal::ZERO {
            return Err(WalletError::InvalidAmount);
        }
        self.ensure_unfrozen()?;
        if self.gold_grams < grams {
            return Err(WalletError::InsufficientBalance);
        }
        let fiat_balance = checked(self.fiat_balance.checked_add(proceeds))?;
        self.gold_grams -= grams;
        self.fiat_balance = fiat_balance;
        self.assert_invariants();
        Ok(())
    }

    pub(crate) fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }

    pub(crate) fn bump_version(&mut self) {
        self.version += 1;
    }

    /// Overwrites balances without any checks.
    #[cfg(test)]
    pub(crate) fn force_balances(&mut self, fiat_balance: Decimal, gold_grams: Decimal) {
        self.fiat_balance = fiat_balance;
        self.gold_grams = gold_grams;
    }
}

/// Balances beyond `Decimal`'s range are rejected as invalid amounts.
fn checked(value: Option<Decimal>) -> Result<Decimal, WalletError> {
    value.ok_or(WalletError::InvalidAmount)
}

/// Serializes a wallet with balances rounded to their column scale.
pub struct WalletReport<'a>(&'a Wallet);

impl serde::Serialize for WalletReport<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let wallet = self.0;
        let mut state = serializer.serialize_struct("Wallet", 4)?;
        state.serialize_field("user", &wallet.user_id)?;
        state.serialize_field(
            "fiat_balance",
            &wallet.fiat_balance.round_dp(Wallet::FIAT_PRECISION),
        )?;
        state.serialize_field(
            "gold_grams",
            &wallet.gold_grams.round_dp(Wallet::GOLD_PRECISION),
        )?;
        state.serialize_field("locked", &wallet.locked)?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn funded(fiat: Decimal) -> Wallet {
        let mut wallet = Wallet::new(UserId(1));
        wallet.credit_fiat(fiat).unwrap();
        wallet
    }

    #[test]
    fn buy_moves_fiat_into_gold() {
        let mut wallet = funded(dec!(1000));
        wallet.buy_gold(dec!(2), dec!(200)).unwrap();
        assert_eq!(wallet.fiat_balance, dec!(800));
        assert_eq!(wallet.gold_grams, dec!(2));
    }

    #[test]
    fn buy_with_insufficient_fiat_leaves_wallet_untouched() {
        let mut wallet = funded(dec!(100));
        let before = wallet.clone();
        let result = wallet.buy_gold(dec!(1), dec!(100.01));
        assert_eq!(result, Err(WalletError::InsufficientBalance));
        assert_eq!(wallet, before);
    }

    #[test]
    fn sell_with_insufficient_gold_returns_error() {
        let mut wallet = funded(dec!(100));
        let result = wallet.sell_gold(dec!(0.0001), dec!(1));
        assert_eq!(result, Err(WalletError::InsufficientBalance));
    }

    #[test]
    fn frozen_check_precedes_sufficiency_check() {
        let mut wallet = Wallet::new(UserId(1));
        wallet.set_locked(true);
        // Empty wallet would also be insufficient; frozen wins.
        assert_eq!(
            wallet.buy_gold(dec!(1), dec!(10)),
            Err(WalletError::WalletLocked)
        );
        assert_eq!(
            wallet.sell_gold(dec!(1), dec!(10)),
            Err(WalletError::WalletLocked)
        );
        assert_eq!(wallet.credit_fiat(dec!(10)), Err(WalletError::WalletLocked));
    }

    #[test]
    fn non_positive_amounts_rejected() {
        let mut wallet = funded(dec!(10));
        assert_eq!(wallet.credit_fiat(dec!(0)), Err(WalletError::InvalidAmount));
        assert_eq!(
            wallet.buy_gold(dec!(-1), dec!(10)),
            Err(WalletError::InvalidAmount)
        );
        assert_eq!(
            wallet.sell_gold(dec!(1), dec!(0)),
            Err(WalletError::InvalidAmount)
        );
        assert_eq!(wallet.fiat_balance, dec!(10));
    }

    #[test]
    fn check_constraints_rejects_negative_balances() {
        let mut wallet = Wallet::new(UserId(3));
        assert!(wallet.check_constraints().is_ok());

        wallet.gold_grams = dec!(-0.0001);
        assert!(matches!(
            wallet.check_constraints(),
            Err(StoreError::Constraint(msg)) if msg.contains("gold_grams")
        ));
    }

    #[test]
    fn exact_serde_round_trip_keeps_full_precision() {
        let mut wallet = Wallet::new(UserId(9));
        wallet.fiat_balance = dec!(123.456789);
        wallet.gold_grams = dec!(0.123456);

        let json = serde_json::to_string(&wallet).unwrap();
        let restored: Wallet = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, wallet);
    }

    #[test]
    fn report_rounds_to_column_scale() {
        let mut wallet = Wallet::new(UserId(42));
        wallet.fiat_balance = dec!(123.456789);
        wallet.gold_grams = dec!(0.123456);

        let json = serde_json::to_string(&wallet.report()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed["user"], 42);
        assert_eq!(parsed["fiat_balance"].as_str().unwrap(), "123.46");
        assert_eq!(parsed["gold_grams"].as_str().unwrap(), "0.1235");
        assert_eq!(parsed["locked"], false);
    }

    #[test]
    fn report_uses_bankers_rounding() {
        let mut wallet = Wallet::new(UserId(1));
        wallet.fiat_balance = dec!(0.125);
        wallet.gold_grams = dec!(0.00005);

        let json = serde_json::to_string(&wallet.report()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed["fiat_balance"].as_str().unwrap(), "0.12");
        assert_eq!(parsed["gold_grams"].as_str().unwrap(), "0.0000");
    }
}
