//! Node library: mempool, block assembly, miner loop and process startup.

pub mod assembler;
pub mod config;
pub mod mempool;
pub mod miner;
pub mod node;

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use fs2::FileExt;
use mvsd_chainstate::ledger::LedgerStore;
use mvsd_consensus::consensus_params;
use mvsd_storage::fjall::FjallStore;
use mvsd_storage::memory::MemoryStore;
use mvsd_storage::{Column, KeyValueStore, PrefixVisitor, ScanResult, StoreError, WriteBatch};
use mvsd_witness::EpochWitnessSchedule;

use crate::config::{Backend, CliAction, Config};
use crate::miner::{MinerConfig, MinerHandle, DEFAULT_POW_TRIES_PER_POLL};
use crate::node::{Node, NodeOptions};

const DATA_DIR_LOCK_FILE_NAME: &str = ".lock";

pub enum Store {
    Memory(MemoryStore),
    Fjall(FjallStore),
}

impl KeyValueStore for Store {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        match self {
            Store::Memory(store) => store.get(column, key),
            Store::Fjall(store) => store.get(column, key),
        }
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        match self {
            Store::Memory(store) => store.put(column, key, value),
            Store::Fjall(store) => store.put(column, key, value),
        }
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError> {
        match self {
            Store::Memory(store) => store.delete(column, key),
            Store::Fjall(store) => store.delete(column, key),
        }
    }

    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        match self {
            Store::Memory(store) => store.scan_prefix(column, prefix),
            Store::Fjall(store) => store.scan_prefix(column, prefix),
        }
    }

    fn for_each_prefix<'a>(
        &self,
        column: Column,
        prefix: &[u8],
        visitor: &mut PrefixVisitor<'a>,
    ) -> Result<(), StoreError> {
        match self {
            Store::Memory(store) => store.for_each_prefix(column, prefix, visitor),
            Store::Fjall(store) => store.for_each_prefix(column, prefix, visitor),
        }
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        match self {
            Store::Memory(store) => store.write_batch(batch),
            Store::Fjall(store) => store.write_batch(batch),
        }
    }
}

/// Held for the life of the process; dropping it releases the directory.
pub struct DataDirLock {
    _file: File,
}

pub fn lock_data_dir(data_dir: &Path) -> Result<DataDirLock, String> {
    let lock_path = data_dir.join(DATA_DIR_LOCK_FILE_NAME);
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|err| format!("failed to open lock file {}: {err}", lock_path.display()))?;

    match file.try_lock_exclusive() {
        Ok(()) => {
            let pid = std::process::id();
            let _ = file.set_len(0);
            let _ = file.seek(SeekFrom::Start(0));
            let _ = writeln!(file, "pid={pid}");
            let _ = file.flush();
            Ok(DataDirLock { _file: file })
        }
        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
            let mut holder = String::new();
            let _ =
                File::open(&lock_path).and_then(|mut reader| reader.read_to_string(&mut holder));
            let holder = holder.trim();
            let suffix = if holder.is_empty() {
                String::new()
            } else {
                format!(" ({holder})")
            };
            Err(format!(
                "data dir {} is already locked (another mvsd instance may be running); lock file {}{suffix}",
                data_dir.display(),
                lock_path.display()
            ))
        }
        Err(err) => Err(format!(
            "failed to lock data dir {}: {err}",
            data_dir.display()
        )),
    }
}

fn open_store(config: &Config) -> Result<Store, String> {
    match config.backend {
        Backend::Memory => Ok(Store::Memory(MemoryStore::new())),
        Backend::Fjall => {
            let path = config.data_dir.join("db");
            FjallStore::open(&path)
                .map(Store::Fjall)
                .map_err(|err| format!("failed to open store at {}: {err}", path.display()))
        }
    }
}

pub async fn run_entry() -> Result<(), String> {
    let config = match config::parse_args().map_err(|err| err.to_string())? {
        CliAction::PrintHelp => {
            println!("{}", config::usage());
            return Ok(());
        }
        CliAction::PrintVersion => {
            println!("mvsd {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        CliAction::Run(config) => *config,
    };
    mvsd_log::init(config.log);

    fs::create_dir_all(&config.data_dir).map_err(|err| {
        format!(
            "failed to create data dir {}: {err}",
            config.data_dir.display()
        )
    })?;
    let _lock = lock_data_dir(&config.data_dir)?;

    let mut params = consensus_params(config.network);
    if let Some(fee) = config.min_tx_fee {
        params.min_tx_fee = fee;
    }
    let store = open_store(&config)?;
    let ledger = Arc::new(LedgerStore::new(store));
    let tip = ledger.tip().map_err(|err| err.to_string())?;
    mvsd_log::log_info!(
        "mvsd {} starting on {} (data dir {}, tip {})",
        env!("CARGO_PKG_VERSION"),
        config.network,
        config.data_dir.display(),
        tip.map_or_else(|| "empty".to_string(), |tip| tip.height.to_string())
    );

    let witnesses = Arc::new(EpochWitnessSchedule::new(&params));
    let node = Arc::new(Node::new(
        ledger,
        Arc::new(params),
        witnesses,
        NodeOptions {
            mode: config.consensus,
            policy: config.policy,
            miner_key: config.miner_key.clone(),
            mining_asset: config.mining_asset.clone(),
            mempool_max_bytes: config.mempool_max_bytes,
        },
    ));
    node.restore_witnesses()
        .map_err(|err| format!("failed to restore the witness list: {err}"))?;

    let miner = match (&config.miner_address, config.mine) {
        (Some(pay_address), true) => Some(
            MinerHandle::start(
                node.clone(),
                MinerConfig {
                    pay_address: pay_address.clone(),
                    poll: config.miner_poll,
                    pow_tries_per_poll: DEFAULT_POW_TRIES_PER_POLL,
                },
            )
            .map_err(|err| format!("failed to start miner: {err}"))?,
        ),
        _ => None,
    };

    tokio::signal::ctrl_c()
        .await
        .map_err(|err| format!("failed to wait for ctrl-c: {err}"))?;
    mvsd_log::log_info!("shutdown requested");
    node.stop();
    if let Some(mut miner) = miner {
        let status = tokio::task::spawn_blocking(move || {
            miner.shutdown();
            miner.status()
        })
        .await
        .map_err(|err| format!("miner shutdown failed: {err}"))?;
        mvsd_log::log_info!("miner status {}", status.to_json());
    }
    Ok(())
}
