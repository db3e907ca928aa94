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
use gold_wallet_ledger::{
    Engine, JournalConfig, MemoryStore, ReferenceId, StoreConfig, UserId, Wallet, WalletError,
    WorkerPool,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Gold Wallet Ledger - Replay wallet operation CSV files
///
/// Reads wallet operations from a CSV file, applies them through the ledger
/// engine and writes the final wallets to stdout.
#[derive(Parser, Debug)]
#[command(name = "gold-wallet-ledger")]
#[command(about = "Replays fiat/gold wallet operations from CSV", long_about = None)]
struct Args {
    /// Path to CSV file with operations
    ///
    /// Expected format: op,user,amount,grams,price,reference
    /// Example: gold-wallet-ledger operations.csv > wallets.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Journal file; existing state is replayed before processing
    #[arg(long, env = "WALLET_JOURNAL")]
    journal: Option<PathBuf>,

    /// Maximum wait for a wallet lock, in milliseconds
    #[arg(long, env = "WALLET_LOCK_TIMEOUT_MS", default_value_t = 5_000)]
    lock_timeout_ms: u64,

    /// fsync the journal every N records
    #[arg(long, env = "WALLET_SYNC_INTERVAL", default_value_t = 1)]
    sync_interval: usize,

    /// Worker threads; 0 processes rows inline in file order
    #[arg(long, env = "WALLET_WORKERS", default_value_t = 0)]
    workers: usize,

    /// Total queued jobs across workers
    #[arg(long, env = "WALLET_QUEUE_SIZE", default_value_t = 100)]
    queue_size: usize,
}

impl Args {
    fn store_config(&self) -> StoreConfig {
        let config =
            StoreConfig::in_memory().with_lock_timeout(Duration::from_millis(self.lock_timeout_ms));
        match &self.journal {
            Some(path) => config
                .with_journal(JournalConfig::new(path).with_sync_interval(self.sync_interval)),
            None => config,
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let store = match MemoryStore::open(args.store_config()) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = %e, "failed to open ledger store");
            process::exit(1);
        }
    };
    let engine = Arc::new(Engine::new(store));

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            tracing::error!(path = %args.input.display(), error = %e, "failed to open input");
            process::exit(1);
        }
    };

    let pool = if args.workers > 0 {
        match WorkerPool::new(args.workers, args.queue_size) {
            Ok(pool) => Some(pool),
            Err(e) => {
                tracing::error!(error = %e, "failed to start worker pool");
                process::exit(1);
            }
        }
    } else {
        None
    };

    if let Err(e) = process_operations(BufReader::new(file), &engine, pool.as_ref()) {
        tracing::error!(error = %e, "failed to process operations");
        process::exit(1);
    }
    if let Some(pool) = pool {
        let stats = pool.shutdown();
        tracing::info!(succeeded = stats.succeeded, failed = stats.failed, "workers drained");
    }

    if let Err(e) = engine.repository().sync() {
        tracing::error!(error = %e, "failed to sync journal");
        process::exit(1);
    }

    if let Err(e) = write_wallets(&engine.repository().wallets(), std::io::stdout()) {
        tracing::error!(error = %e, "failed to write output");
        process::exit(1);
    }
}

/// Raw CSV record matching the input format.
///
/// Fields: `op, user, amount, grams, price, reference`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    op: String,
    user: u64,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    amount: Option<Decimal>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    grams: Option<Decimal>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    price: Option<Decimal>,
    #[serde(default)]
    reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Operation {
    TopUp { amount: Decimal },
    Refund { amount: Decimal },
    Buy { grams: Decimal, price: Decimal },
    Sell { grams: Decimal, price: Decimal },
    Freeze,
    Unfreeze,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Command {
    user_id: UserId,
    reference_id: ReferenceId,
    operation: Operation,
}

impl CsvRecord {
    /// Converts the record into a command.
    ///
    /// Returns `None` for unknown operations or missing required fields.
    /// Rows without a reference get `<op>_<row>`.
    fn into_command(self, row: usize) -> Option<Command> {
        let op = self.op.to_lowercase();
        let operation = match op.as_str() {
            "topup" => Operation::TopUp {
                amount: self.amount?,
            },
            "refund" => Operation::Refund {
                amount: self.amount?,
            },
            "buy" => Operation::Buy {
                grams: self.grams?,
                price: self.price?,
            },
            "sell" => Operation::Sell {
                grams: self.grams?,
                price: self.price?,
            },
            "freeze" => Operation::Freeze,
            "unfreeze" => Operation::Unfreeze,
            _ => return None,
        };
        let reference_id = match self.reference.filter(|r| !r.is_empty()) {
            Some(reference) => ReferenceId::new(reference),
            None => ReferenceId::new(format!("{op}_{row}")),
        };
        Some(Command {
            user_id: UserId(self.user),
            reference_id,
            operation,
        })
    }
}

fn execute(engine: &Engine, command: Command) -> Result<(), WalletError> {
    let Command {
        user_id,
        reference_id,
        operation,
    } = command;
    match operation {
        Operation::TopUp { amount } => engine.top_up(user_id, amount, reference_id).map(drop),
        Operation::Refund { amount } => engine.refund(user_id, amount, reference_id).map(drop),
        Operation::Buy { grams, price } => engine
            .buy_gold(user_id, grams, price, reference_id)
            .map(drop),
        Operation::Sell { grams, price } => engine
            .sell_gold(user_id, grams, price, reference_id)
            .map(drop),
        Operation::Freeze => engine.set_locked(user_id, true).map(drop),
        Operation::Unfreeze => engine.set_locked(user_id, false).map(drop),
    }
}

/// Process wallet operations from a CSV reader.
///
/// Rows are streamed, so files of any size work. Malformed rows and
/// rejected operations are logged and skipped. With a worker pool, rows
/// for one user still apply in file order.
///
/// # CSV Format
///
/// Expected columns: `op, user, amount, grams, price, reference`
/// - `op`: topup, refund, buy, sell, freeze or unfreeze
/// - `user`: user id (u64)
/// - `amount`: fiat amount for topup/refund
/// - `grams`, `price`: gold quantity and price per gram for buy/sell
/// - `reference`: optional caller reference
///
/// # Example
///
/// ```csv
/// op,user,amount,grams,price,reference
/// topup,1,1000,,,
/// buy,1,,2,100,order-17
/// sell,1,,1,150,
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the CSV structure is invalid.
fn process_operations<R: Read>(
    reader: R,
    engine: &Arc<Engine>,
    pool: Option<&WorkerPool>,
) -> Result<(), csv::Error> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for (index, result) in rdr.deserialize::<CsvRecord>().enumerate() {
        let row = index + 1;
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(row, error = %e, "skipping malformed row");
                continue;
            }
        };
        let Some(command) = record.into_command(row) else {
            tracing::warn!(row, "skipping invalid operation record");
            continue;
        };

        match pool {
            Some(pool) => {
                let engine = Arc::clone(engine);
                let user_id = command.user_id;
                if let Err(e) = pool.submit(user_id, move || execute(&engine, command)) {
                    tracing::warn!(row, error = %e, "failed to queue operation");
                }
            }
            None => {
                if let Err(e) = execute(engine, command) {
                    tracing::warn!(row, error = %e, "skipping rejected operation");
                }
            }
        }
    }

    Ok(())
}

/// Write wallets to a CSV writer.
///
/// Columns: `user, fiat_balance, gold_grams, locked`, fiat rounded to 2
/// and gold to 4 decimal places.
///
/// # Errors
///
/// Returns a CSV error if writing fails.
fn write_wallets<W: Write>(wallets: &[Wallet], writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for wallet in wallets {
        wtr.serialize(wallet.report())?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Cursor;

    fn run(csv: &str) -> Arc<Engine> {
        let engine = Arc::new(Engine::in_memory());
        process_operations(Cursor::new(csv.to_owned()), &engine, None).unwrap();
        engine
    }

    fn wallet(engine: &Engine, user: u64) -> Wallet {
        engine.find_wallet(UserId(user)).unwrap()
    }

    #[test]
    fn parse_top_up() {
        let engine = run("op,user,amount,grams,price,reference\ntopup,1,100.0,,,\n");
        assert_eq!(wallet(&engine, 1).fiat_balance(), dec!(100.0));
    }

    #[test]
    fn parse_buy_and_sell_sequence() {
        let engine = run("op,user,amount,grams,price,reference\n\
                          topup,1,1000,,,\n\
                          buy,1,,2,100,order-1\n\
                          sell,1,,1,150,order-2\n");
        let wallet = wallet(&engine, 1);
        assert_eq!(wallet.fiat_balance(), dec!(950));
        assert_eq!(wallet.gold_grams(), dec!(1));

        let refs: Vec<_> = engine
            .get_user_transactions(UserId(1))
            .unwrap()
            .into_iter()
            .map(|tx| tx.reference_id.0)
            .collect();
        assert_eq!(refs, vec!["topup_1", "order-1", "order-2"]);
    }

    #[test]
    fn parse_with_whitespace_and_case() {
        let engine = run("op,user,amount,grams,price,reference\n TopUp , 1 , 10.5 ,,, \n");
        assert_eq!(wallet(&engine, 1).fiat_balance(), dec!(10.5));
    }

    #[test]
    fn short_rows_are_accepted() {
        let engine = run("op,user,amount,grams,price,reference\ntopup,3,7\nfreeze,3\n");
        let wallet = wallet(&engine, 3);
        assert_eq!(wallet.fiat_balance(), dec!(7));
        assert!(wallet.locked());
    }

    #[test]
    fn skip_malformed_and_rejected_rows() {
        let engine = run("op,user,amount,grams,price,reference\n\
                          topup,1,100,,,\n\
                          invalid,row,data,here,,\n\
                          buy,1,,5,100,\n\
                          transfer,1,5,,,\n\
                          topup,2,50,,,\n");
        assert_eq!(engine.repository().wallets().len(), 2);
        // The oversized buy was rejected without side effects.
        assert_eq!(wallet(&engine, 1).fiat_balance(), dec!(100));
        assert_eq!(engine.repository().transaction_count(), 2);
    }

    #[test]
    fn missing_required_field_is_invalid() {
        let record = CsvRecord {
            op: "buy".into(),
            user: 1,
            amount: None,
            grams: Some(dec!(1)),
            price: None,
            reference: None,
        };
        assert!(record.into_command(1).is_none());
    }

    #[test]
    fn worker_pool_preserves_per_user_order() {
        let mut csv = String::from("op,user,amount,grams,price,reference\n");
        for user in 1..=8 {
            csv.push_str(&format!("topup,{user},100,,,\n"));
            for _ in 0..10 {
                csv.push_str(&format!("buy,{user},,1,10,\n"));
            }
            // Only succeeds if every buy above already applied.
            csv.push_str(&format!("sell,{user},,10,10,\n"));
        }

        let engine = Arc::new(Engine::in_memory());
        let pool = WorkerPool::new(4, 16).unwrap();
        process_operations(Cursor::new(csv), &engine, Some(&pool)).unwrap();
        let stats = pool.shutdown();

        assert_eq!(stats.failed, 0);
        for user in 1..=8 {
            let wallet = wallet(&engine, user);
            assert_eq!(wallet.fiat_balance(), dec!(100));
            assert_eq!(wallet.gold_grams(), dec!(0));
        }
    }

    #[test]
    fn write_wallets_to_csv() {
        let engine = run("op,user,amount,grams,price,reference\n\
                          topup,2,200.255,,,\n\
                          topup,1,100.5,,,\n\
                          buy,1,,0.33333,3,\n");
        let mut output = Vec::new();
        write_wallets(&engine.repository().wallets(), &mut output).unwrap();

        let output = String::from_utf8(output).unwrap();
        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines[0], "user,fiat_balance,gold_grams,locked");
        assert_eq!(lines[1], "1,99.50,0.3333,false");
        assert_eq!(lines[2], "2,200.26,0,false");
    }
}
