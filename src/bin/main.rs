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

use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use points_ledger::{EngineConfig, RedemptionEngine, RedemptionError, ReserveReceipt, UserId};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Points Ledger - Replay redemption operation CSV files
///
/// Reads ledger operations from a CSV file, replays them through the
/// redemption engine, and outputs per-user summaries to stdout. Supports
/// grants, reserves, confirms, and cancels; reserves are labeled by their
/// order reference so later rows can settle them.
#[derive(Parser, Debug)]
#[command(name = "points-ledger")]
#[command(about = "A redemption engine that replays operation CSVs", long_about = None)]
struct Args {
    /// Path to CSV file with operations
    ///
    /// Expected format: op,user,amount,order
    /// Example: cargo run -- operations.csv > summaries.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Reservation expiry window in seconds (default: 900)
    ///
    /// Confirms arriving past the window cancel and refund the reservation,
    /// so shrinking this replays what-if expiry scenarios.
    #[arg(long, value_name = "SECS")]
    expiry_window_secs: Option<u64>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let mut config = EngineConfig::default();
    if let Some(secs) = args.expiry_window_secs {
        config.expiry_window = Duration::from_secs(secs);
    }
    let engine = RedemptionEngine::with_config(config);

    if let Err(e) = replay_operations(&engine, BufReader::new(file)) {
        eprintln!("Error replaying operations: {}", e);
        process::exit(1);
    }

    if let Err(e) = write_summaries(&engine, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Raw CSV record matching the input format.
///
/// Fields: `op, user, amount, order`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    op: String,
    user: String,
    #[serde(deserialize_with = "csv::invalid_option")]
    amount: Option<i64>,
    order: Option<String>,
}

/// One replayable ledger operation.
#[derive(Debug)]
enum Op {
    Grant {
        user: UserId,
        amount: u64,
    },
    Reserve {
        user: UserId,
        amount: u64,
        label: Option<String>,
    },
    Confirm {
        label: String,
        expected: Option<u64>,
    },
    Cancel {
        label: String,
    },
}

impl CsvRecord {
    /// Converts a CSV record to an operation.
    ///
    /// Returns `None` for unknown ops or missing required fields:
    /// grants and reserves need a user and a positive amount, confirms and
    /// cancels need the order label of an earlier reserve.
    fn into_op(self) -> Option<Op> {
        match self.op.to_lowercase().as_str() {
            "grant" => {
                if self.user.is_empty() {
                    return None;
                }
                Some(Op::Grant {
                    user: UserId::from(self.user),
                    amount: positive(self.amount?)?,
                })
            }
            "reserve" => {
                if self.user.is_empty() {
                    return None;
                }
                Some(Op::Reserve {
                    user: UserId::from(self.user),
                    amount: positive(self.amount?)?,
                    label: self.order.filter(|label| !label.is_empty()),
                })
            }
            "confirm" => {
                let expected = match self.amount {
                    Some(value) => Some(positive(value)?),
                    None => None,
                };
                Some(Op::Confirm {
                    label: self.order.filter(|label| !label.is_empty())?,
                    expected,
                })
            }
            "cancel" => Some(Op::Cancel {
                label: self.order.filter(|label| !label.is_empty())?,
            }),
            _ => None,
        }
    }
}

fn positive(value: i64) -> Option<u64> {
    u64::try_from(value).ok().filter(|v| *v > 0)
}

/// Replays operations from a CSV reader through the given engine.
///
/// Streaming parse, so arbitrarily large files never load fully into memory.
/// The driver retains each labeled reserve's receipt and plays the
/// storefront's role when a later `confirm` or `cancel` row references the
/// label. Malformed rows, unknown labels, and operations the engine rejects
/// are skipped; the replay carries on.
///
/// # CSV Format
///
/// Expected columns: `op, user, amount, order`
/// - `op`: Operation (grant, reserve, confirm, cancel)
/// - `user`: User id (grant/reserve only)
/// - `amount`: Points (grant/reserve; optional expected amount on confirm)
/// - `order`: Order label naming the reservation (reserve/confirm/cancel)
///
/// # Example
///
/// ```csv
/// op,user,amount,order
/// grant,alice,100,
/// reserve,alice,40,order-1
/// confirm,,40,order-1
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the CSV structure is invalid.
/// Individual operation errors are logged in debug mode but don't stop the
/// replay.
pub fn replay_operations<R: Read>(
    engine: &RedemptionEngine,
    reader: R,
) -> Result<(), csv::Error> {
    let mut receipts: HashMap<String, ReserveReceipt> = HashMap::new();

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All) // Handle whitespace in fields like " grant "
        .flexible(true) // Allow missing trailing fields
        .has_headers(true) // Skip first row as header
        .from_reader(reader);

    for result in rdr.deserialize::<CsvRecord>() {
        match result {
            Ok(record) => {
                let Some(op) = record.into_op() else {
                    #[cfg(debug_assertions)]
                    eprintln!("Skipping invalid operation record");
                    continue;
                };

                if let Err(_e) = apply(engine, &mut receipts, op) {
                    #[cfg(debug_assertions)]
                    eprintln!("Skipping operation: {_e}");
                }
            }
            Err(_e) => {
                // Skip malformed rows
                #[cfg(debug_assertions)]
                eprintln!("Skipping malformed row: {_e}");
                continue;
            }
        }
    }

    Ok(())
}

fn apply(
    engine: &RedemptionEngine,
    receipts: &mut HashMap<String, ReserveReceipt>,
    op: Op,
) -> Result<(), RedemptionError> {
    match op {
        Op::Grant { user, amount } => {
            engine.grant(&user, amount)?;
        }
        Op::Reserve {
            user,
            amount,
            label,
        } => {
            let receipt = engine.reserve(&user, amount, label.clone())?;
            if let Some(label) = label {
                receipts.insert(label, receipt);
            }
        }
        Op::Confirm { label, expected } => {
            let receipt = receipts.get(&label).ok_or(RedemptionError::NotFound)?;
            engine.confirm(&receipt.confirmation_token, expected, None)?;
        }
        Op::Cancel { label } => {
            let receipt = receipts.get(&label).ok_or(RedemptionError::NotFound)?;
            engine.cancel(&receipt.reservation_id, None)?;
        }
    }
    Ok(())
}

/// Write per-user summaries to a CSV writer.
///
/// Users are sorted for deterministic output.
///
/// # CSV Format
///
/// Columns: `user, balance, pending, redeemed`
///
/// # Example
///
/// ```csv
/// user,balance,pending,redeemed
/// alice,60,0,40
/// bob,25,10,0
/// ```
///
/// # Errors
///
/// Returns a CSV error if writing fails.
pub fn write_summaries<W: Write>(engine: &RedemptionEngine, writer: W) -> Result<(), csv::Error> {
    let mut users: Vec<UserId> = engine.wallets().map(|entry| entry.key().clone()).collect();
    users.sort();

    let mut wtr = Writer::from_writer(writer);
    for user in &users {
        wtr.serialize(engine.summary(user))?;
    }

    wtr.flush()?;
    Ok(())
}
