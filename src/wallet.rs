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

//! Point balance storage.
//!
//! One wallet per user, keyed in a concurrent map. Balances are whole points
//! (`u64`, smallest point unit) and can never go negative.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use points_ledger::{UserId, WalletStore};
//!
//! let store = WalletStore::new(Duration::from_secs(5));
//! let alice = UserId::from("alice");
//! assert_eq!(store.balance(&alice), 0);
//! assert_eq!(store.adjust(&alice, 100), Ok(100));
//! ```

use crate::base::UserId;
use crate::error::RedemptionError;
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
struct WalletData {
    user_id: UserId,
    balance: u64,
}

impl WalletData {
    fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            balance: 0,
        }
    }

    /// Increases the balance.
    fn credit(&mut self, amount: u64) -> Result<u64, RedemptionError> {
        if amount == 0 {
            return Err(RedemptionError::InvalidAmount);
        }
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or(RedemptionError::InvalidAmount)?;
        Ok(self.balance)
    }

    /// Decreases the balance, refusing to overdraw.
    fn debit(&mut self, amount: u64) -> Result<u64, RedemptionError> {
        if amount == 0 {
            return Err(RedemptionError::InvalidAmount);
        }
        if self.balance < amount {
            return Err(RedemptionError::InsufficientFunds {
                balance: self.balance,
                required: amount,
            });
        }
        self.balance -= amount;
        Ok(self.balance)
    }
}

/// A user's point balance.
///
/// Mutation goes through [`Wallet::lock_for`]; the returned guard serializes
/// every balance transition for the user and lets a caller keep the wallet
/// locked across a compound step, such as checking funds and debiting as one
/// atomic operation.
#[derive(Debug)]
pub struct Wallet {
    inner: Mutex<WalletData>,
}

impl Wallet {
    pub fn new(user_id: UserId) -> Self {
        Self {
            inner: Mutex::new(WalletData::new(user_id)),
        }
    }

    /// Current balance in points.
    pub fn balance(&self) -> u64 {
        self.inner.lock().balance
    }

    pub fn user_id(&self) -> UserId {
        self.inner.lock().user_id.clone()
    }

    /// Acquires the wallet for mutation, waiting at most `timeout`.
    ///
    /// Timing out maps to [`RedemptionError::StoreUnavailable`], the one
    /// retryable error in the taxonomy.
    pub fn lock_for(&self, timeout: Duration) -> Result<WalletGuard<'_>, RedemptionError> {
        let data = self
            .inner
            .try_lock_for(timeout)
            .ok_or(RedemptionError::StoreUnavailable)?;
        Ok(WalletGuard { data })
    }
}

impl Serialize for Wallet {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data = self.inner.lock();
        let mut state = serializer.serialize_struct("Wallet", 2)?;
        state.serialize_field("user", &data.user_id)?;
        state.serialize_field("balance", &data.balance)?;
        state.end()
    }
}

/// Exclusive access to one wallet's balance.
pub struct WalletGuard<'a> {
    data: MutexGuard<'a, WalletData>,
}

impl WalletGuard<'_> {
    pub fn balance(&self) -> u64 {
        self.data.balance
    }

    /// Adds points, returning the new balance.
    pub fn credit(&mut self, amount: u64) -> Result<u64, RedemptionError> {
        self.data.credit(amount)
    }

    /// Removes points, returning the new balance. Fails with
    /// [`RedemptionError::InsufficientFunds`] rather than overdraw.
    pub fn debit(&mut self, amount: u64) -> Result<u64, RedemptionError> {
        self.data.debit(amount)
    }
}

/// Keyed wallet storage.
///
/// Unknown users materialize as zero-balance wallets on first access and the
/// record is never removed afterwards. Lookups hand out `Arc<Wallet>` handles
/// so callers never hold a map shard guard while waiting on a wallet lock.
#[derive(Debug)]
pub struct WalletStore {
    wallets: DashMap<UserId, Arc<Wallet>>,
    lock_timeout: Duration,
}

impl WalletStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            wallets: DashMap::new(),
            lock_timeout,
        }
    }

    /// Returns the user's wallet, creating an empty one for unknown users.
    pub fn wallet(&self, user: &UserId) -> Arc<Wallet> {
        self.wallets
            .entry(user.clone())
            .or_insert_with(|| Arc::new(Wallet::new(user.clone())))
            .clone()
    }

    /// Current balance; zero for a user never seen before.
    pub fn balance(&self, user: &UserId) -> u64 {
        self.wallet(user).balance()
    }

    /// Applies a relative balance change atomically, returning the new
    /// balance.
    ///
    /// | `delta` | Behavior |
    /// |---------|----------|
    /// | `> 0` | credit |
    /// | `< 0` | debit; [`RedemptionError::InsufficientFunds`] if it would overdraw, balance unchanged |
    /// | `0` | [`RedemptionError::InvalidAmount`] |
    pub fn adjust(&self, user: &UserId, delta: i64) -> Result<u64, RedemptionError> {
        let wallet = self.wallet(user);
        let mut guard = wallet.lock_for(self.lock_timeout)?;
        if delta >= 0 {
            guard.credit(delta as u64)
        } else {
            guard.debit(delta.unsigned_abs())
        }
    }

    /// All known wallets, for reporting.
    pub fn all(&self) -> &DashMap<UserId, Arc<Wallet>> {
        &self.wallets
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(1);

    // === WalletData Internal Tests ===
    // These test the private WalletData methods directly.

    #[test]
    fn wallet_data_credit_and_debit() {
        let mut data = WalletData::new(UserId::from("u1"));
        assert_eq!(data.credit(100), Ok(100));
        assert_eq!(data.debit(30), Ok(70));
        assert_eq!(data.balance, 70);
    }

    #[test]
    fn wallet_data_rejects_zero_amounts() {
        let mut data = WalletData::new(UserId::from("u1"));
        assert_eq!(data.credit(0), Err(RedemptionError::InvalidAmount));
        assert_eq!(data.debit(0), Err(RedemptionError::InvalidAmount));
    }

    #[test]
    fn wallet_data_debit_insufficient_returns_error() {
        let mut data = WalletData::new(UserId::from("u1"));
        data.credit(50).unwrap();
        let result = data.debit(100);
        assert_eq!(
            result,
            Err(RedemptionError::InsufficientFunds {
                balance: 50,
                required: 100
            })
        );
        assert_eq!(data.balance, 50); // unchanged
    }

    #[test]
    fn wallet_data_credit_overflow_returns_error() {
        let mut data = WalletData::new(UserId::from("u1"));
        data.credit(u64::MAX).unwrap();
        assert_eq!(data.credit(1), Err(RedemptionError::InvalidAmount));
        assert_eq!(data.balance, u64::MAX); // unchanged
    }

    // === Store Tests ===

    #[test]
    fn unknown_user_reads_as_zero() {
        let store = WalletStore::new(TIMEOUT);
        assert_eq!(store.balance(&UserId::from("nobody")), 0);
        // The read materialized the record.
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn adjust_round_trip() {
        let store = WalletStore::new(TIMEOUT);
        let user = UserId::from("u1");
        assert_eq!(store.adjust(&user, 100), Ok(100));
        assert_eq!(store.adjust(&user, -40), Ok(60));
        assert_eq!(store.adjust(&user, 15), Ok(75));
        assert_eq!(store.balance(&user), 75);
    }

    #[test]
    fn adjust_negative_past_zero_fails_and_preserves_balance() {
        let store = WalletStore::new(TIMEOUT);
        let user = UserId::from("u1");
        store.adjust(&user, 60).unwrap();
        assert_eq!(
            store.adjust(&user, -70),
            Err(RedemptionError::InsufficientFunds {
                balance: 60,
                required: 70
            })
        );
        assert_eq!(store.balance(&user), 60);
    }

    #[test]
    fn adjust_zero_is_invalid() {
        let store = WalletStore::new(TIMEOUT);
        assert_eq!(
            store.adjust(&UserId::from("u1"), 0),
            Err(RedemptionError::InvalidAmount)
        );
    }

    #[test]
    fn guard_holds_balance_steady_across_check_and_debit() {
        let store = WalletStore::new(TIMEOUT);
        let user = UserId::from("u1");
        store.adjust(&user, 100).unwrap();

        let wallet = store.wallet(&user);
        let mut guard = wallet.lock_for(TIMEOUT).unwrap();
        assert_eq!(guard.balance(), 100);
        guard.debit(100).unwrap();
        assert_eq!(guard.balance(), 0);
    }

    #[test]
    fn contended_lock_times_out_as_store_unavailable() {
        use std::thread;

        let store = Arc::new(WalletStore::new(TIMEOUT));
        let user = UserId::from("u1");
        let wallet = store.wallet(&user);

        let held = wallet.lock_for(TIMEOUT).unwrap();
        let contender = {
            let store = Arc::clone(&store);
            let user = user.clone();
            thread::spawn(move || {
                let wallet = store.wallet(&user);
                wallet
                    .lock_for(Duration::from_millis(50))
                    .map(|_| ())
                    .unwrap_err()
            })
        };
        assert_eq!(contender.join().unwrap(), RedemptionError::StoreUnavailable);
        drop(held);
    }

    // === Serialization Tests ===

    #[test]
    fn wallet_serializes_user_and_balance() {
        let store = WalletStore::new(TIMEOUT);
        let user = UserId::from("alice");
        store.adjust(&user, 250).unwrap();

        let wallet = store.wallet(&user);
        let json = serde_json::to_string(&*wallet).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed["user"], "alice");
        assert_eq!(parsed["balance"], 250);
    }
}
