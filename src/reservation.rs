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

//! Reservation records.
//!
//! A reservation follows a state machine with one non-terminal state:
//! - [`Pending`] → [`Completed`] (via confirm)
//! - [`Pending`] → [`Cancelled`] (via cancel, or expiry with reason `"expired"`)
//!
//! [`Pending`]: ReservationStatus::Pending
//! [`Completed`]: ReservationStatus::Completed
//! [`Cancelled`]: ReservationStatus::Cancelled

use crate::base::{ConfirmationToken, ReservationId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reason recorded when the sweeper or a stale confirm cancels a reservation.
pub const EXPIRED_REASON: &str = "expired";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    /// Points debited, outcome undecided. The only mutable state.
    Pending,
    /// Redemption finalized; the points have permanently left the wallet.
    Completed,
    /// Redemption abandoned; the points went back to the wallet.
    Cancelled,
}

/// A point reservation held against an order.
///
/// Created in [`ReservationStatus::Pending`] with the points already debited
/// from the wallet; the record carries the debited amount until the
/// reservation settles one way or the other.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reservation {
    pub id: ReservationId,
    pub user_id: UserId,
    /// Points debited at reserve time.
    pub amount: u64,
    pub confirmation_token: ConfirmationToken,
    /// External order reference, if the caller supplied one.
    pub order_id: Option<String>,
    pub status: ReservationStatus,
    /// Why the reservation was cancelled; `None` while pending or completed.
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    pub fn new(
        id: ReservationId,
        user_id: UserId,
        amount: u64,
        confirmation_token: ConfirmationToken,
        order_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            amount,
            confirmation_token,
            order_id,
            status: ReservationStatus::Pending,
            reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ReservationStatus::Pending
    }

    /// Time elapsed since creation. Clock skew that would make the record
    /// younger than zero reads as zero age.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.created_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// True once the record has been pending longer than `window`.
    pub fn is_expired(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.is_pending() && self.age(now) > window
    }

    /// Finalizes the redemption. Keeps the reserve-time `order_id` if one was
    /// recorded; otherwise adopts the confirmer's.
    pub(crate) fn mark_completed(&mut self, order_id: Option<String>, now: DateTime<Utc>) {
        debug_assert!(
            self.is_pending(),
            "completed a non-pending reservation: {:?}",
            self.status
        );
        self.status = ReservationStatus::Completed;
        if self.order_id.is_none() {
            self.order_id = order_id;
        }
        self.updated_at = now;
    }

    /// Abandons the redemption, recording why.
    pub(crate) fn mark_cancelled(&mut self, reason: Option<String>, now: DateTime<Utc>) {
        debug_assert!(
            self.is_pending(),
            "cancelled a non-pending reservation: {:?}",
            self.status
        );
        self.status = ReservationStatus::Cancelled;
        self.reason = reason;
        self.updated_at = now;
    }
}
