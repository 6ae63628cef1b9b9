use balance_ledger::application::accounts::AccountService;
use balance_ledger::application::engine::TransactionEngine;
use balance_ledger::application::lock::LockCoordinator;
use balance_ledger::config::EngineConfig;
use balance_ledger::domain::ports::{LockProviderHandle, StoreHandle};
use balance_ledger::infrastructure::clock::SystemClock;
use balance_ledger::infrastructure::in_memory::InMemoryStore;
use balance_ledger::infrastructure::lease_lock::LeaseLockProvider;
use balance_ledger::interfaces::batch::BatchRunner;
use balance_ledger::interfaces::csv::command_reader::CommandReader;
use balance_ledger::interfaces::csv::report_writer::{ReportFormat, ReportWriter};
use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Command script (CSV with header `op, user, account, tx, amount`)
    input: PathBuf,

    /// Path to persistent database (optional). Requires the `storage-rocksdb` feature.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Redis URL for a lock shared between processes. Requires the `lock-redis` feature.
    #[arg(long, env = "LEDGER_LOCK_URL")]
    lock_url: Option<String>,

    /// Emit JSON lines instead of CSV
    #[arg(long)]
    json: bool,

    /// Milliseconds to wait for a busy account
    #[arg(long, env = "LEDGER_LOCK_WAIT_MS", default_value_t = 1_000)]
    lock_wait_ms: u64,

    /// Milliseconds before an account lock lapses
    #[arg(long, env = "LEDGER_LOCK_LEASE_MS", default_value_t = 15_000)]
    lock_lease_ms: u64,

    /// Months during which a use may still be cancelled
    #[arg(long, env = "LEDGER_CANCEL_WINDOW_MONTHS", default_value_t = 12)]
    cancel_window_months: u32,

    /// Accounts a single user may open
    #[arg(long, env = "LEDGER_MAX_ACCOUNTS_PER_USER", default_value_t = 10)]
    max_accounts_per_user: usize,
}

impl Cli {
    fn engine_config(&self) -> EngineConfig {
        EngineConfig::default()
            .with_lock_wait(Duration::from_millis(self.lock_wait_ms))
            .with_lock_lease(Duration::from_millis(self.lock_lease_ms))
            .with_cancel_window_months(self.cancel_window_months)
            .with_max_accounts_per_user(self.max_accounts_per_user)
    }
}

#[cfg(feature = "storage-rocksdb")]
fn open_store(db_path: Option<&PathBuf>) -> Result<StoreHandle> {
    use balance_ledger::infrastructure::rocksdb::RocksDBStore;

    match db_path {
        Some(path) => Ok(Arc::new(RocksDBStore::open(path)?)),
        None => Ok(Arc::new(InMemoryStore::new())),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_store(db_path: Option<&PathBuf>) -> Result<StoreHandle> {
    if db_path.is_some() {
        miette::bail!("--db-path requires building with the `storage-rocksdb` feature");
    }
    Ok(Arc::new(InMemoryStore::new()))
}

#[cfg(feature = "lock-redis")]
async fn open_locks(lock_url: Option<&str>) -> Result<LockProviderHandle> {
    use balance_ledger::infrastructure::redis_lock::RedisLockProvider;

    match lock_url {
        Some(url) => Ok(Arc::new(RedisLockProvider::new(url).await?)),
        None => Ok(Arc::new(LeaseLockProvider::new())),
    }
}

#[cfg(not(feature = "lock-redis"))]
async fn open_locks(lock_url: Option<&str>) -> Result<LockProviderHandle> {
    if lock_url.is_some() {
        miette::bail!("--lock-url requires building with the `lock-redis` feature");
    }
    Ok(Arc::new(LeaseLockProvider::new()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.engine_config();

    let store = open_store(cli.db_path.as_ref())?;
    let locks = LockCoordinator::new(open_locks(cli.lock_url.as_deref()).await?, config.lock);
    let clock = Arc::new(SystemClock);
    let engine = TransactionEngine::new(store.clone(), locks.clone(), clock.clone(), &config);
    let accounts = AccountService::new(store, locks, clock, &config);

    let file = File::open(&cli.input).into_diagnostic()?;
    let reader = CommandReader::new(file);
    let mut runner = BatchRunner::new(&engine, &accounts);
    let mut rows = Vec::new();
    for (line, command) in reader.commands() {
        let row = match command {
            Ok(command) => runner.run(line, command).await,
            Err(e) => {
                eprintln!("Error reading command on line {line}: {e}");
                runner.reject(line, &e)
            }
        };
        rows.push(row);
    }

    let format = if cli.json {
        ReportFormat::JsonLines
    } else {
        ReportFormat::Csv
    };
    let final_accounts = runner.touched_accounts().await?;

    let stdout = io::stdout();
    let mut writer = ReportWriter::new(stdout.lock(), format);
    writer.write_results(&rows)?;
    writer.write_accounts(&final_accounts)?;

    Ok(())
}
