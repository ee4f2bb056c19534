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

//! Background expiry sweeping.
//!
//! A dedicated thread runs [`RedemptionEngine::sweep_expired`] at the
//! configured cadence so abandoned reservations get their points back
//! without anyone asking. Correctness never depends on the sweeper keeping
//! up: a stale reservation that reaches confirm first is rejected and
//! refunded there.

use crate::engine::RedemptionEngine;
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::info;

/// Handle to the background sweeper thread.
///
/// The thread stops when [`ExpirySweeper::stop`] is called or the handle is
/// dropped; `stop` additionally waits for the thread to finish its current
/// pass.
pub struct ExpirySweeper {
    shutdown: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl ExpirySweeper {
    /// Starts sweeping `engine` every `engine.config().sweep_interval`.
    ///
    /// The first pass runs one interval after spawn; a reservation cannot
    /// outlive its expiry window by more than one interval plus the pass
    /// itself.
    pub fn spawn(engine: Arc<RedemptionEngine>) -> Self {
        let interval = engine.config().sweep_interval;
        let (shutdown, signal) = channel::bounded::<()>(1);

        let handle = thread::spawn(move || {
            info!(interval_ms = interval.as_millis() as u64, "expiry sweeper started");
            loop {
                match signal.recv_timeout(interval) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {
                        engine.sweep_expired();
                    }
                }
            }
            info!("expiry sweeper stopped");
        });

        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Signals the sweeper and waits for the thread to exit.
    pub fn stop(mut self) {
        let _ = self.shutdown.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        // Wake the thread so it exits promptly; dropping must not block on
        // a join.
        let _ = self.shutdown.try_send(());
    }
}
