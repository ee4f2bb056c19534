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

//! Redemption processing engine.
//!
//! The [`RedemptionEngine`] is the central component that manages point
//! wallets and drives reservations through their lifecycle:
//!
//! - **Grant**: credit points to a wallet (the funding entry point).
//! - **Reserve**: debit points and issue a one-time confirmation token.
//! - **Confirm**: finalize a reservation by presenting its token.
//! - **Cancel**: abandon a reservation by id and refund its points.
//! - **Expiry**: reservations pending longer than the configured window are
//!   cancelled with reason `"expired"`, either by the sweeper or lazily when
//!   a stale confirm arrives.
//!
//! # Thread Safety
//!
//! Wallets and reservation records live in [`dashmap::DashMap`] stores and
//! carry their own locks, so operations on different users and different
//! reservations proceed in parallel. Operations touching the same wallet or
//! the same reservation are serialized by that record's lock.

use crate::base::{ConfirmationToken, ReservationId, UserId};
use crate::error::RedemptionError;
use crate::reservation::{EXPIRED_REASON, Reservation, ReservationStatus};
use crate::store::ReservationStore;
use crate::wallet::{Wallet, WalletStore};
use chrono::{TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long a reservation may stay pending before it is expired.
pub const DEFAULT_EXPIRY_WINDOW: Duration = Duration::from_secs(15 * 60);

/// How often the background sweeper looks for stale reservations. Production
/// deployments should keep this between one and five minutes.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// How long a store operation may wait on a record lock before giving up
/// with [`RedemptionError::StoreUnavailable`].
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

const DEFAULT_TOKEN_RETRIES: u32 = 4;

/// Engine tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Pending reservations older than this are cancelled and refunded.
    pub expiry_window: Duration,
    /// Cadence of the background expiry sweeper.
    pub sweep_interval: Duration,
    /// Bound on waiting for any wallet or reservation lock.
    pub lock_timeout: Duration,
    /// Attempts at minting a non-colliding confirmation token.
    pub token_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            expiry_window: DEFAULT_EXPIRY_WINDOW,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            token_retries: DEFAULT_TOKEN_RETRIES,
        }
    }
}

/// What a successful reserve hands back: the id names the reservation for
/// cancellation, the token is the capability to confirm it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveReceipt {
    pub reservation_id: ReservationId,
    pub confirmation_token: ConfirmationToken,
}

/// What a successful confirm hands back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmReceipt {
    pub reservation_id: ReservationId,
    /// Order reference on the settled record, after any merge.
    pub order_id: Option<String>,
}

/// Outcome of a cancel. `refunded` is `false` when the reservation was
/// already cancelled: the call still succeeds, but no points moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOutcome {
    pub refunded: bool,
}

/// Per-user accounting snapshot: the balance plus where reserved points went.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    #[serde(rename = "user")]
    pub user_id: UserId,
    pub balance: u64,
    /// Points held by pending reservations.
    pub pending: u64,
    /// Points permanently redeemed.
    pub redeemed: u64,
}

/// Redemption engine managing wallets and reservations.
///
/// # Invariants
///
/// - For every user, `balance + pending + redeemed` equals the sum of all
///   grants: points only move between the wallet and reservation records,
///   never appear or vanish.
/// - A reservation's points are debited exactly once (at reserve) and
///   refunded at most once (at cancel or expiry).
/// - Exactly one transition out of pending wins; later attempts observe the
///   settled record.
/// - A failed operation leaves both stores exactly as it found them. The one
///   deliberate exception is a confirm that finds the reservation expired:
///   its defined effect is the expiry cancellation itself.
pub struct RedemptionEngine {
    /// Point balances keyed by user.
    wallets: WalletStore,
    /// Reservation records keyed by id, with a unique token index.
    reservations: ReservationStore,
    config: EngineConfig,
}

impl RedemptionEngine {
    /// Creates an engine with default configuration (15 minute expiry).
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            wallets: WalletStore::new(config.lock_timeout),
            reservations: ReservationStore::new(),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Credits points to a user's wallet, creating it if needed, and returns
    /// the new balance.
    ///
    /// # Errors
    ///
    /// - [`RedemptionError::InvalidAmount`] - `amount` is zero.
    /// - [`RedemptionError::StoreUnavailable`] - wallet lock timed out.
    pub fn grant(&self, user: &UserId, amount: u64) -> Result<u64, RedemptionError> {
        if amount == 0 {
            return Err(RedemptionError::InvalidAmount);
        }
        let wallet = self.wallets.wallet(user);
        let mut funds = wallet.lock_for(self.config.lock_timeout)?;
        let balance = funds.credit(amount)?;
        debug!(user = %user, amount, balance, "granted points");
        Ok(balance)
    }

    /// Current balance; zero for users never seen before (the read creates
    /// the wallet record).
    pub fn balance(&self, user: &UserId) -> u64 {
        self.wallets.balance(user)
    }

    /// Places a hold on `amount` points for the user.
    ///
    /// The funds check, the record insert, and the debit happen while the
    /// wallet lock is held, so concurrent reserves against one wallet can
    /// never jointly overdraw it, and no interleaving observes a debit
    /// without its reservation or a reservation without its debit.
    ///
    /// # Errors
    ///
    /// - [`RedemptionError::InvalidAmount`] - `amount` is zero.
    /// - [`RedemptionError::InsufficientFunds`] - balance below `amount`;
    ///   nothing is mutated (carries the balance and the required amount).
    /// - [`RedemptionError::DuplicateToken`] - token minting kept colliding
    ///   after all retries; nothing is mutated. Not seen in practice.
    /// - [`RedemptionError::StoreUnavailable`] - wallet lock timed out.
    pub fn reserve(
        &self,
        user: &UserId,
        amount: u64,
        order_id: Option<String>,
    ) -> Result<ReserveReceipt, RedemptionError> {
        if amount == 0 {
            return Err(RedemptionError::InvalidAmount);
        }

        let wallet = self.wallets.wallet(user);
        let mut funds = wallet.lock_for(self.config.lock_timeout)?;

        let balance = funds.balance();
        if balance < amount {
            return Err(RedemptionError::InsufficientFunds {
                balance,
                required: amount,
            });
        }

        // Debit first, then insert; the wallet lock is held across both, so
        // the pair is atomic to every observer. If the insert loses after
        // all token retries the debit is put back under the same lock and
        // nothing was ever visible.
        funds.debit(amount)?;

        let id = ReservationId::new();
        let now = Utc::now();
        for attempt in 1..=self.config.token_retries.max(1) {
            let token = ConfirmationToken::new();
            let record =
                Reservation::new(id, user.clone(), amount, token, order_id.clone(), now);
            match self.reservations.create(record) {
                Ok(_) => {
                    debug!(user = %user, reservation = %id, amount, "reserved points");
                    return Ok(ReserveReceipt {
                        reservation_id: id,
                        confirmation_token: token,
                    });
                }
                Err(RedemptionError::DuplicateToken) => {
                    warn!(user = %user, attempt, "confirmation token collision, re-minting");
                }
                Err(other) => {
                    funds.credit(amount)?;
                    return Err(other);
                }
            }
        }

        funds.credit(amount)?;
        Err(RedemptionError::DuplicateToken)
    }

    /// Finalizes the reservation named by `token`, making the redemption
    /// permanent.
    ///
    /// | Condition | Result |
    /// |-----------|--------|
    /// | token unknown | [`RedemptionError::NotFound`] |
    /// | record not pending | [`RedemptionError::InvalidState`] |
    /// | `expected_amount` differs from the reserved amount | [`RedemptionError::AmountMismatch`], record untouched |
    /// | pending longer than the expiry window | record cancelled and refunded with reason `"expired"`, then [`RedemptionError::Expired`] |
    /// | otherwise | record completed, `order_id` adopted if the record had none |
    ///
    /// Checks run in exactly that order, so a mismatched amount is reported
    /// even on a reservation that has also expired.
    pub fn confirm(
        &self,
        token: &ConfirmationToken,
        expected_amount: Option<u64>,
        order_id: Option<String>,
    ) -> Result<ConfirmReceipt, RedemptionError> {
        let slot = self
            .reservations
            .get_by_token(token)
            .ok_or(RedemptionError::NotFound)?;
        let mut record = slot.lock_for(self.config.lock_timeout)?;

        if !record.is_pending() {
            return Err(RedemptionError::InvalidState);
        }

        if let Some(received) = expected_amount {
            if received != record.amount {
                return Err(RedemptionError::AmountMismatch {
                    reserved: record.amount,
                    received,
                });
            }
        }

        let now = Utc::now();
        if record.age(now) > self.config.expiry_window {
            // Too stale to honor. The confirm settles the record as an
            // expiry cancellation so the points go back without waiting for
            // the sweeper.
            self.refund(&record)?;
            record.mark_cancelled(Some(EXPIRED_REASON.to_owned()), now);
            info!(reservation = %record.id, "stale reservation cancelled on confirm");
            return Err(RedemptionError::Expired);
        }

        record.mark_completed(order_id, now);
        debug!(reservation = %record.id, amount = record.amount, "confirmed reservation");
        Ok(ConfirmReceipt {
            reservation_id: record.id,
            order_id: record.order_id.clone(),
        })
    }

    /// Abandons the reservation named by `id`, refunding its points.
    ///
    /// Cancelling an already-cancelled reservation succeeds again without
    /// moving points (`refunded: false`), so retried cancellations are
    /// harmless. Completed reservations are final and cannot be cancelled.
    ///
    /// # Errors
    ///
    /// - [`RedemptionError::NotFound`] - no reservation has this id.
    /// - [`RedemptionError::InvalidState`] - reservation already completed.
    /// - [`RedemptionError::StoreUnavailable`] - a lock timed out; the
    ///   record is unchanged and the call may be retried.
    pub fn cancel(
        &self,
        id: &ReservationId,
        reason: Option<String>,
    ) -> Result<CancelOutcome, RedemptionError> {
        let slot = self.reservations.get(id).ok_or(RedemptionError::NotFound)?;
        let mut record = slot.lock_for(self.config.lock_timeout)?;

        match record.status {
            ReservationStatus::Cancelled => Ok(CancelOutcome { refunded: false }),
            ReservationStatus::Completed => Err(RedemptionError::InvalidState),
            ReservationStatus::Pending => {
                self.refund(&record)?;
                record.mark_cancelled(reason, Utc::now());
                debug!(reservation = %record.id, amount = record.amount, "cancelled reservation");
                Ok(CancelOutcome { refunded: true })
            }
        }
    }

    /// Snapshot of a reservation record.
    pub fn inspect(&self, id: &ReservationId) -> Result<Reservation, RedemptionError> {
        self.reservations
            .get(id)
            .map(|slot| slot.snapshot())
            .ok_or(RedemptionError::NotFound)
    }

    /// One expiry pass: cancel and refund every reservation that has been
    /// pending longer than the expiry window. Returns how many were expired.
    ///
    /// Each stale record is settled independently; one failure is logged and
    /// the pass moves on. Records that a racing confirm settles between the
    /// scan and the re-check under the lock are skipped.
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let Some(cutoff) = TimeDelta::from_std(self.config.expiry_window)
            .ok()
            .and_then(|window| now.checked_sub_signed(window))
        else {
            return 0;
        };

        let stale = self.reservations.pending_older_than(cutoff);
        let mut expired = 0usize;
        for id in &stale {
            match self.expire(id) {
                Ok(true) => expired += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(reservation = %id, error = %err, "failed to expire reservation");
                }
            }
        }
        if expired > 0 {
            info!(expired, scanned = stale.len(), "expired stale reservations");
        }
        expired
    }

    /// Per-user accounting snapshot. Point-in-time: under concurrent traffic
    /// the three figures are read close together but not as one atomic step.
    pub fn summary(&self, user: &UserId) -> UserSummary {
        let totals = self.reservations.totals(user);
        UserSummary {
            user_id: user.clone(),
            balance: self.wallets.balance(user),
            pending: totals.pending,
            redeemed: totals.completed,
        }
    }

    /// Returns an iterator over all known wallets, for reporting.
    pub fn wallets(
        &self,
    ) -> impl Iterator<Item = dashmap::mapref::multiple::RefMulti<'_, UserId, Arc<Wallet>>> {
        self.wallets.all().iter()
    }

    /// Read access to the reservation store.
    pub fn reservations(&self) -> &ReservationStore {
        &self.reservations
    }

    /// Expires one reservation if it is still pending and still stale when
    /// re-checked under its lock. Returns whether a cancellation happened.
    fn expire(&self, id: &ReservationId) -> Result<bool, RedemptionError> {
        let slot = self.reservations.get(id).ok_or(RedemptionError::NotFound)?;
        let mut record = slot.lock_for(self.config.lock_timeout)?;

        let now = Utc::now();
        if !record.is_expired(now, self.config.expiry_window) {
            return Ok(false);
        }

        self.refund(&record)?;
        record.mark_cancelled(Some(EXPIRED_REASON.to_owned()), now);
        debug!(reservation = %record.id, amount = record.amount, "expired reservation");
        Ok(true)
    }

    /// Returns a reservation's points to its wallet. Callers hold the record
    /// lock; the wallet lock is always taken second, never the other way
    /// around.
    fn refund(&self, record: &Reservation) -> Result<u64, RedemptionError> {
        let wallet = self.wallets.wallet(&record.user_id);
        let mut funds = wallet.lock_for(self.config.lock_timeout)?;
        funds.credit(record.amount)
    }
}

impl Default for RedemptionEngine {
    fn default() -> Self {
        Self::new()
    }
}
