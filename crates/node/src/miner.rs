//! Background block production.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use mvsd_consensus::ConsensusMode;
use mvsd_pow::solve_header;
use mvsd_primitives::block::Block;
use mvsd_primitives::hash::hash_to_hex;
use mvsd_storage::KeyValueStore;
use serde::Serialize;

use crate::node::{Node, NodeError};

/// Nonces tried per poll before the loop checks for a new tip.
pub const DEFAULT_POW_TRIES_PER_POLL: u64 = 200_000;

#[derive(Clone, Debug)]
pub struct MinerConfig {
    pub pay_address: String,
    pub poll: Duration,
    pub pow_tries_per_poll: u64,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct MinerStatus {
    pub mode: String,
    pub running: bool,
    pub candidates: u64,
    pub blocks_found: u64,
    pub last_height: Option<u64>,
    pub last_hash: Option<String>,
    pub last_error: Option<String>,
}

impl MinerStatus {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

pub struct MinerHandle {
    stop: Arc<AtomicBool>,
    wake: Sender<()>,
    status: Arc<Mutex<MinerStatus>>,
    handle: Option<JoinHandle<()>>,
}

impl MinerHandle {
    pub fn start<S>(node: Arc<Node<S>>, config: MinerConfig) -> std::io::Result<Self>
    where
        S: KeyValueStore + Send + Sync + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let (wake, wake_rx) = bounded::<()>(1);
        let status = Arc::new(Mutex::new(MinerStatus {
            mode: node.assembler().mode().as_str().to_string(),
            running: true,
            ..MinerStatus::default()
        }));
        let loop_stop = stop.clone();
        let loop_status = status.clone();
        let handle = thread::Builder::new()
            .name("miner".to_string())
            .spawn(move || {
                mvsd_log::log_info!(
                    "miner started ({}, paying {})",
                    node.assembler().mode().as_str(),
                    config.pay_address
                );
                let mut miner = Miner {
                    node,
                    config,
                    status: loop_status,
                    work: None,
                };
                while !loop_stop.load(Ordering::SeqCst) && !miner.node.is_stopped() {
                    if !miner.poll() {
                        break;
                    }
                    match wake_rx.recv_timeout(miner.config.poll) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                miner.status().running = false;
                mvsd_log::log_info!("miner stopped");
            })?;
        Ok(Self {
            stop,
            wake,
            status,
            handle: Some(handle),
        })
    }

    pub fn status(&self) -> MinerStatus {
        lock_status(&self.status).clone()
    }

    /// Signals the loop and waits for the in-flight attempt to finish.
    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.wake.try_send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                mvsd_log::log_error!("miner thread panicked");
            }
        }
    }
}

impl Drop for MinerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock_status(status: &Mutex<MinerStatus>) -> MutexGuard<'_, MinerStatus> {
    status.lock().unwrap_or_else(|err| err.into_inner())
}

struct Miner<S> {
    node: Arc<Node<S>>,
    config: MinerConfig,
    status: Arc<Mutex<MinerStatus>>,
    /// Unsolved proof-of-work candidate carried across polls.
    work: Option<Block>,
}

impl<S: KeyValueStore> Miner<S> {
    fn status(&self) -> MutexGuard<'_, MinerStatus> {
        lock_status(&self.status)
    }

    /// One attempt. Returns false once the node has stopped.
    fn poll(&mut self) -> bool {
        let tip = match self.node.ledger().tip_hash() {
            Ok(tip) => tip.unwrap_or([0u8; 32]),
            Err(err) => {
                self.record_error(err.to_string());
                return true;
            }
        };
        if self
            .work
            .as_ref()
            .is_some_and(|work| work.header.prev_hash != tip)
        {
            mvsd_log::log_debug!("tip moved; dropping stale work");
            self.work = None;
        }

        if self.work.is_none() {
            match self.node.create_candidate_block(&self.config.pay_address) {
                Ok(Some(block)) => {
                    self.status().candidates += 1;
                    if self.node.assembler().mode() == ConsensusMode::Pow {
                        self.work = Some(block);
                    } else {
                        return self.submit(block);
                    }
                }
                Ok(None) => return true,
                Err(NodeError::ServiceStopped) => return false,
                Err(err) => {
                    self.record_error(err.to_string());
                    return true;
                }
            }
        }

        let Some(work) = self.work.as_mut() else {
            return true;
        };
        match solve_header(&mut work.header, self.config.pow_tries_per_poll) {
            Ok(true) => match self.work.take() {
                Some(block) => self.submit(block),
                None => true,
            },
            Ok(false) => true,
            Err(err) => {
                self.work = None;
                self.record_error(err.to_string());
                true
            }
        }
    }

    fn submit(&mut self, block: Block) -> bool {
        let hash = hash_to_hex(&block.header.hash());
        match self.node.submit_mined_block(block) {
            Ok(height) => {
                let mut status = self.status();
                status.blocks_found += 1;
                status.last_height = Some(height);
                status.last_hash = Some(hash);
                status.last_error = None;
                true
            }
            Err(NodeError::ServiceStopped) => false,
            Err(err) => {
                self.record_error(format!("block {hash} rejected: {err}"));
                true
            }
        }
    }

    fn record_error(&self, message: String) {
        mvsd_log::log_warn!("miner: {message}");
        self.status().last_error = Some(message);
    }
}
