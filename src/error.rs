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

//! Error types for redemption processing.

use thiserror::Error;

/// Redemption processing errors.
///
/// All variants except [`RedemptionError::StoreUnavailable`] are permanent
/// for the request that produced them; retrying without changing the request
/// yields the same answer. `StoreUnavailable` is transient and safe to retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RedemptionError {
    /// Amount field is missing from the request
    #[error("missing amount")]
    MissingAmount,

    /// Amount is zero, negative, or not representable
    #[error("invalid amount (must be positive)")]
    InvalidAmount,

    /// Reservation would exceed the current balance
    #[error("insufficient points (balance {balance}, required {required})")]
    InsufficientFunds { balance: u64, required: u64 },

    /// Confirmation token is missing from the request
    #[error("missing confirmation token")]
    MissingToken,

    /// Reservation id is missing from the request
    #[error("missing reservation id")]
    MissingReservationId,

    /// No reservation matches the given token or id
    #[error("reservation not found")]
    NotFound,

    /// Reservation is already completed or cancelled
    #[error("reservation already processed or cancelled")]
    InvalidState,

    /// Presented amount differs from the reserved amount
    #[error("amount mismatch (reserved {reserved}, received {received})")]
    AmountMismatch { reserved: u64, received: u64 },

    /// Reservation exceeded the expiry window and has been cancelled
    #[error("reservation expired")]
    Expired,

    /// Confirmation token collides with an existing reservation
    #[error("duplicate confirmation token")]
    DuplicateToken,

    /// A store lock could not be acquired within the bounded timeout
    #[error("store unavailable, retry later")]
    StoreUnavailable,

    /// Caller identity could not be established or is not trusted
    #[error("unauthorized")]
    Unauthorized,
}

impl RedemptionError {
    /// True for errors a caller may retry verbatim.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RedemptionError::StoreUnavailable)
    }
}
