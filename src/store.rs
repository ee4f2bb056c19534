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

//! Thread-safe reservation storage with a unique token index.
//!
//! Records are addressable two ways at the same O(1) cost: by reservation id
//! (cancellation) and by confirmation token (confirmation, which sits on the
//! checkout critical path).

use crate::base::{ConfirmationToken, ReservationId, UserId};
use crate::error::RedemptionError;
use crate::reservation::{Reservation, ReservationStatus};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// One stored reservation behind its transition lock.
///
/// All status transitions for a record are serialized by this lock; of any
/// number of concurrent confirm/cancel/expire attempts, exactly one observes
/// the record pending.
#[derive(Debug)]
pub struct ReservationSlot {
    inner: Mutex<Reservation>,
}

impl ReservationSlot {
    fn new(reservation: Reservation) -> Self {
        Self {
            inner: Mutex::new(reservation),
        }
    }

    /// Acquires the record for a transition, waiting at most `timeout`.
    pub(crate) fn lock_for(
        &self,
        timeout: Duration,
    ) -> Result<MutexGuard<'_, Reservation>, RedemptionError> {
        self.inner
            .try_lock_for(timeout)
            .ok_or(RedemptionError::StoreUnavailable)
    }

    /// Point-in-time copy of the record.
    pub fn snapshot(&self) -> Reservation {
        self.inner.lock().clone()
    }
}

/// Per-user reservation amount sums by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReservationTotals {
    /// Points debited and still awaiting confirmation.
    pub pending: u64,
    /// Points permanently redeemed.
    pub completed: u64,
}

/// A thread-safe reservation store with token deduplication.
///
/// Combines a primary [`DashMap`] keyed by id with a secondary token index.
/// The index entry is claimed with an atomic check-and-insert before the
/// record lands, so a confirmation token can never name two reservations;
/// index entries are never removed, so a token keeps naming its reservation
/// after the reservation settles.
#[derive(Debug)]
pub struct ReservationStore {
    /// Primary records keyed by reservation id.
    by_id: DashMap<ReservationId, Arc<ReservationSlot>>,

    /// Unique confirmation-token index into `by_id`.
    by_token: DashMap<ConfirmationToken, ReservationId>,
}

impl ReservationStore {
    pub fn new() -> Self {
        Self {
            by_id: DashMap::new(),
            by_token: DashMap::new(),
        }
    }

    /// Inserts a new reservation record.
    ///
    /// # Errors
    ///
    /// Returns [`RedemptionError::DuplicateToken`] if the confirmation token
    /// already names a reservation, in which case nothing is inserted. The
    /// engine handles this by minting a fresh token and retrying.
    pub fn create(&self, reservation: Reservation) -> Result<ReservationId, RedemptionError> {
        let id = reservation.id;

        // Claim the token before the record goes in; the entry API makes the
        // uniqueness check and the claim one atomic step.
        match self.by_token.entry(reservation.confirmation_token) {
            Entry::Occupied(_) => Err(RedemptionError::DuplicateToken),
            Entry::Vacant(entry) => {
                entry.insert(id);
                let previous = self
                    .by_id
                    .insert(id, Arc::new(ReservationSlot::new(reservation)));
                debug_assert!(previous.is_none(), "reservation id collided: {id}");
                Ok(id)
            }
        }
    }

    /// Looks up a reservation by id.
    pub fn get(&self, id: &ReservationId) -> Option<Arc<ReservationSlot>> {
        self.by_id.get(id).map(|slot| Arc::clone(slot.value()))
    }

    /// Looks up a reservation through the token index. Costs the same as
    /// [`ReservationStore::get`]: two point lookups, no scan.
    pub fn get_by_token(&self, token: &ConfirmationToken) -> Option<Arc<ReservationSlot>> {
        let id = *self.by_token.get(token)?;
        self.get(&id)
    }

    /// Ids of pending reservations created at or before `cutoff`.
    ///
    /// Slot handles are cloned out before any record lock is taken, so the
    /// scan never holds a map shard guard against a transition in progress.
    /// A record whose lock is contended is skipped; it is mid-transition and
    /// the next pass sees its settled state.
    pub fn pending_older_than(&self, cutoff: DateTime<Utc>) -> Vec<ReservationId> {
        let slots: Vec<Arc<ReservationSlot>> = self
            .by_id
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut stale = Vec::new();
        for slot in slots {
            if let Some(record) = slot.inner.try_lock() {
                if record.is_pending() && record.created_at <= cutoff {
                    stale.push(record.id);
                }
            }
        }
        stale
    }

    /// Sums reservation amounts for one user by status.
    pub fn totals(&self, user: &UserId) -> ReservationTotals {
        let slots: Vec<Arc<ReservationSlot>> = self
            .by_id
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut totals = ReservationTotals::default();
        for slot in slots {
            let record = slot.inner.lock();
            if record.user_id != *user {
                continue;
            }
            match record.status {
                ReservationStatus::Pending => totals.pending += record.amount,
                ReservationStatus::Completed => totals.completed += record.amount,
                ReservationStatus::Cancelled => {}
            }
        }
        totals
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl Default for ReservationStore {
    fn default() -> Self {
        Self::new()
    }
}
