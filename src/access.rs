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

//! The service boundary.
//!
//! [`AccessFacade`] is the one entry point external callers go through. It
//! authenticates (via pluggable collaborators), rejects malformed input, and
//! parses wire identifiers; every business rule stays in the engine.
//!
//! Two caller populations exist, mirroring the deployment model: customers
//! reserve their own points (resolved to a [`UserId`] by an
//! [`IdentityResolver`]), while the fulfilment side confirms, cancels, and
//! inspects reservations under a shared-credential [`TrustedCaller`] check.

use crate::base::{ConfirmationToken, ReservationId, UserId};
use crate::engine::{CancelOutcome, ConfirmReceipt, RedemptionEngine, ReserveReceipt};
use crate::error::RedemptionError;
use crate::reservation::Reservation;
use serde::Deserialize;
use std::sync::Arc;

/// Maps caller credentials to verified users.
///
/// Implementations wrap whatever the embedding service uses for customer
/// authentication (session tokens, JWTs, an upstream gateway header).
pub trait IdentityResolver: Send + Sync {
    /// Returns the verified user for `credential`, or
    /// [`RedemptionError::Unauthorized`].
    fn resolve(&self, credential: &str) -> Result<UserId, RedemptionError>;
}

/// Decides whether a credential belongs to the fulfilment party that may
/// confirm, cancel, and inspect reservations.
pub trait TrustedCaller: Send + Sync {
    fn is_trusted(&self, credential: &str) -> bool;
}

/// Reserve request as it arrives off the wire.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveRequest {
    pub amount: Option<i64>,
    pub order_id: Option<String>,
}

/// Confirm request as it arrives off the wire.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest {
    pub confirmation_token: Option<String>,
    /// The amount the confirmer believes was reserved; checked against the
    /// record when present.
    pub expected_amount: Option<i64>,
    pub order_id: Option<String>,
}

/// Cancel request as it arrives off the wire.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    pub reservation_id: Option<String>,
    pub reason: Option<String>,
}

/// Validating front door over a shared [`RedemptionEngine`].
pub struct AccessFacade<I, T> {
    engine: Arc<RedemptionEngine>,
    identity: I,
    trusted: T,
}

impl<I: IdentityResolver, T: TrustedCaller> AccessFacade<I, T> {
    pub fn new(engine: Arc<RedemptionEngine>, identity: I, trusted: T) -> Self {
        Self {
            engine,
            identity,
            trusted,
        }
    }

    pub fn engine(&self) -> &RedemptionEngine {
        &self.engine
    }

    /// Reserves points for the authenticated customer.
    ///
    /// # Errors
    ///
    /// - [`RedemptionError::Unauthorized`] - credential did not resolve.
    /// - [`RedemptionError::MissingAmount`] - no amount in the request.
    /// - [`RedemptionError::InvalidAmount`] - amount not positive.
    /// - anything [`RedemptionEngine::reserve`] returns.
    pub fn reserve(
        &self,
        credential: &str,
        request: ReserveRequest,
    ) -> Result<ReserveReceipt, RedemptionError> {
        let user = self.identity.resolve(credential)?;
        let amount = positive_amount(request.amount.ok_or(RedemptionError::MissingAmount)?)?;
        self.engine.reserve(&user, amount, request.order_id)
    }

    /// Confirms a reservation on behalf of the fulfilment party.
    ///
    /// An unparseable token is reported as [`RedemptionError::NotFound`],
    /// indistinguishable from a token that was never issued.
    pub fn confirm(
        &self,
        credential: &str,
        request: ConfirmRequest,
    ) -> Result<ConfirmReceipt, RedemptionError> {
        self.require_trusted(credential)?;
        let token = request
            .confirmation_token
            .ok_or(RedemptionError::MissingToken)?
            .parse::<ConfirmationToken>()
            .map_err(|_| RedemptionError::NotFound)?;
        let expected = request
            .expected_amount
            .map(positive_amount)
            .transpose()?;
        self.engine.confirm(&token, expected, request.order_id)
    }

    /// Cancels a reservation on behalf of the fulfilment party.
    pub fn cancel(
        &self,
        credential: &str,
        request: CancelRequest,
    ) -> Result<CancelOutcome, RedemptionError> {
        self.require_trusted(credential)?;
        let id = request
            .reservation_id
            .ok_or(RedemptionError::MissingReservationId)?
            .parse::<ReservationId>()
            .map_err(|_| RedemptionError::NotFound)?;
        self.engine.cancel(&id, request.reason)
    }

    /// Snapshot of a reservation, for the fulfilment party.
    pub fn inspect(
        &self,
        credential: &str,
        reservation_id: &str,
    ) -> Result<Reservation, RedemptionError> {
        self.require_trusted(credential)?;
        let id = reservation_id
            .parse::<ReservationId>()
            .map_err(|_| RedemptionError::NotFound)?;
        self.engine.inspect(&id)
    }

    fn require_trusted(&self, credential: &str) -> Result<(), RedemptionError> {
        if self.trusted.is_trusted(credential) {
            Ok(())
        } else {
            Err(RedemptionError::Unauthorized)
        }
    }
}

/// Wire amounts are signed; the ledger only deals in positive points.
fn positive_amount(value: i64) -> Result<u64, RedemptionError> {
    if value <= 0 {
        return Err(RedemptionError::InvalidAmount);
    }
    Ok(value as u64)
}
