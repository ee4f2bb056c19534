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

//! # Points Ledger
//!
//! This library provides a loyalty-points redemption engine: customers hold
//! integer point balances, a storefront reserves points against an order at
//! checkout, and a trusted fulfilment party later confirms the redemption
//! with a one-time token or cancels it for a refund. Reservations abandoned
//! past the expiry window are cancelled and refunded automatically.
//!
//! ## Core Components
//!
//! - [`RedemptionEngine`]: Central processor driving wallets and the
//!   reservation lifecycle (grant, reserve, confirm, cancel, expire)
//! - [`WalletStore`]/[`Wallet`]: Point balances, never negative
//! - [`ReservationStore`]/[`Reservation`]: Reservation records with a unique
//!   confirmation-token index
//! - [`ExpirySweeper`]: Background thread reclaiming stale reservations
//! - [`AccessFacade`]: Validating entry point with pluggable authentication
//! - [`RedemptionError`]: Error taxonomy for every failure the engine reports
//!
//! ## Example
//!
//! ```
//! use points_ledger::{RedemptionEngine, UserId};
//!
//! let engine = RedemptionEngine::new();
//! let alice = UserId::from("alice");
//!
//! // Fund the wallet, then hold 40 points against an order.
//! engine.grant(&alice, 100).unwrap();
//! let receipt = engine.reserve(&alice, 40, Some("order-1".into())).unwrap();
//! assert_eq!(engine.balance(&alice), 60);
//!
//! // The fulfilment side confirms with the token; the redemption is final.
//! engine.confirm(&receipt.confirmation_token, Some(40), None).unwrap();
//! assert_eq!(engine.balance(&alice), 60);
//! ```
//!
//! ## Thread Safety
//!
//! Every store is safe for concurrent use. Operations on different users and
//! different reservations run in parallel; operations on the same wallet or
//! the same reservation are serialized by per-record locks, so concurrent
//! reserves can never jointly overdraw a balance and concurrent settlement
//! attempts resolve to exactly one winner.

pub mod access;
mod base;
mod engine;
pub mod error;
mod reservation;
mod store;
mod sweeper;
pub mod wallet;

pub use access::{
    AccessFacade, CancelRequest, ConfirmRequest, IdentityResolver, ReserveRequest, TrustedCaller,
};
pub use base::{ConfirmationToken, ReservationId, UserId};
pub use engine::{
    CancelOutcome, ConfirmReceipt, DEFAULT_EXPIRY_WINDOW, DEFAULT_LOCK_TIMEOUT,
    DEFAULT_SWEEP_INTERVAL, EngineConfig, RedemptionEngine, ReserveReceipt, UserSummary,
};
pub use error::RedemptionError;
pub use reservation::{EXPIRED_REASON, Reservation, ReservationStatus};
pub use store::{ReservationSlot, ReservationStore, ReservationTotals};
pub use sweeper::ExpirySweeper;
pub use wallet::{Wallet, WalletStore};
