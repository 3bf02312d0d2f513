//! Interfaces of the node modules the web wallet drives.
//!
//! The wallet never implements consensus or cryptography itself; it talks
//! to these handles. [`memory`] provides an in-process node.

pub mod memory;
pub mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::currency::Currency;
use crate::error::NodeError;
use crate::seed::{CipherKey, SeedPhrase};
use types::{
    Address, BlockHeight, ConfirmedBalance, OutputId, ProcessedTransaction, SiafundClass,
    TransactionId, UnconfirmedBalance, UnspentOutput,
};

pub const GATEWAY_DIR: &str = "gateway";
pub const CONSENSUS_DIR: &str = "consensus";
pub const TRANSACTION_POOL_DIR: &str = "transactionpool";
pub const WALLETS_DIR: &str = "wallets";

pub trait Module: Send + Sync {
    fn close(&self) -> Result<(), NodeError>;
}

pub trait Gateway: Module {
    fn address(&self) -> String;
}

/// Tells which siafund class an output belongs to.
pub trait SiafundClassifier {
    fn is_siafund_b_output(&self, id: &OutputId) -> Result<bool, NodeError>;
}

pub trait ConsensusSet: Module + SiafundClassifier {
    fn height(&self) -> BlockHeight;
    fn synced(&self) -> bool;
}

pub trait TransactionPool: Module {}

pub trait Wallet: Module {
    fn encrypted(&self) -> Result<bool, NodeError>;
    fn unlocked(&self) -> Result<bool, NodeError>;
    fn unlock(&self, key: &CipherKey) -> Result<(), NodeError>;
    fn lock(&self) -> Result<(), NodeError>;
    /// Creates the primary seed and encrypts the wallet with `key`.
    fn encrypt(&self, key: &CipherKey) -> Result<SeedPhrase, NodeError>;
    fn init_from_seed(&self, key: &CipherKey, seed: &SeedPhrase) -> Result<(), NodeError>;
    fn primary_seed(&self) -> Result<SeedPhrase, NodeError>;
    fn change_key_with_seed(&self, seed: &SeedPhrase, key: &CipherKey) -> Result<(), NodeError>;
    fn is_master_key(&self, key: &CipherKey) -> Result<bool, NodeError>;
    fn height(&self) -> Result<BlockHeight, NodeError>;
    fn rescanning(&self) -> Result<bool, NodeError>;
    fn transactions(
        &self,
        start: BlockHeight,
        end: BlockHeight,
    ) -> Result<Vec<ProcessedTransaction>, NodeError>;
    fn unconfirmed_transactions(&self) -> Result<Vec<ProcessedTransaction>, NodeError>;
    fn transaction(&self, id: &TransactionId) -> Result<Option<ProcessedTransaction>, NodeError>;
    fn unspent_outputs(&self) -> Result<Vec<UnspentOutput>, NodeError>;
    fn confirmed_balance(&self) -> Result<ConfirmedBalance, NodeError>;
    fn unconfirmed_balance(&self) -> Result<UnconfirmedBalance, NodeError>;
    fn send_siacoins(
        &self,
        amount: &Currency,
        dest: &Address,
    ) -> Result<Vec<TransactionId>, NodeError>;
    fn send_siafunds(
        &self,
        class: SiafundClass,
        amount: &Currency,
        dest: &Address,
    ) -> Result<Vec<TransactionId>, NodeError>;
    fn next_address(&self) -> Result<Address, NodeError>;
    fn last_addresses(&self, count: usize) -> Result<Vec<Address>, NodeError>;
}

/// Creates node modules. Dependencies are passed as options so a module can
/// report being created without one.
pub trait ModuleFactory: Send + Sync {
    fn create_gateway(&self, bootstrap: bool, dir: &Path) -> Result<Arc<dyn Gateway>, NodeError>;

    fn create_consensus_set(
        &self,
        gateway: Option<Arc<dyn Gateway>>,
        bootstrap: bool,
        dir: &Path,
    ) -> Result<Arc<dyn ConsensusSet>, NodeError>;

    fn create_transaction_pool(
        &self,
        consensus_set: Option<Arc<dyn ConsensusSet>>,
        gateway: Option<Arc<dyn Gateway>>,
        dir: &Path,
    ) -> Result<Arc<dyn TransactionPool>, NodeError>;

    fn create_wallet(
        &self,
        consensus_set: Option<Arc<dyn ConsensusSet>>,
        transaction_pool: Option<Arc<dyn TransactionPool>>,
        dir: &Path,
    ) -> Result<Arc<dyn Wallet>, NodeError>;
}

/// Module handles that are currently running.
#[derive(Default, Clone)]
pub struct Node {
    pub dir: PathBuf,
    pub gateway: Option<Arc<dyn Gateway>>,
    pub consensus_set: Option<Arc<dyn ConsensusSet>>,
    pub transaction_pool: Option<Arc<dyn TransactionPool>>,
    /// Miner, host, renter and similar modules, closed newest first.
    pub auxiliary: Vec<(String, Arc<dyn Module>)>,
    pub mux: Option<Arc<dyn Module>>,
}
