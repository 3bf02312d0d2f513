//! In-process node used by the binary and by tests.
//!
//! Modules share one [`MemoryChain`] that holds the block height, the sync
//! flag and the siafund class registry. Wallets are kept per directory so a
//! wallet opened twice sees the same ledger, like a wallet reloaded from disk.

use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use super::types::*;
use super::{ConsensusSet, Gateway, Module, ModuleFactory, SiafundClassifier, TransactionPool, Wallet};
use crate::currency::{Currency, Unit};
use crate::error::NodeError;
use crate::seed::{CipherKey, SeedPhrase};

const SEED_LEN: usize = 28;
const SEED_DICTIONARY: [&str; 16] = [
    "abbey", "amidst", "bakery", "cactus", "dapper", "eagle", "fabrics", "gadget", "habitat",
    "icon", "jaded", "karate", "lagoon", "macro", "nabbing", "oasis",
];

/// Fee charged by every send.
pub fn transaction_fee() -> Currency {
    Currency::from_units(1, Unit::MilliScp)
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn random_hex() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Chain state shared by every module of one factory.
#[derive(Default)]
pub struct MemoryChain {
    height: AtomicU64,
    synced: AtomicBool,
    siafund_b: Mutex<HashSet<OutputId>>,
    classifier_down: AtomicBool,
    failing_close: Mutex<HashSet<String>>,
    events: Mutex<Vec<String>>,
}

impl MemoryChain {
    pub fn set_height(&self, height: BlockHeight) {
        self.height.store(height, Ordering::SeqCst);
    }

    pub fn set_synced(&self, synced: bool) {
        self.synced.store(synced, Ordering::SeqCst);
    }

    pub fn mark_siafund_b(&self, id: OutputId) {
        lock(&self.siafund_b).insert(id);
    }

    /// Makes every siafund classification fail.
    pub fn set_classifier_down(&self, down: bool) {
        self.classifier_down.store(down, Ordering::SeqCst);
    }

    /// Makes the named module return an error from `close`.
    pub fn fail_close(&self, module: &str) {
        lock(&self.failing_close).insert(module.to_string());
    }

    /// Module creations and closes in the order they happened.
    pub fn events(&self) -> Vec<String> {
        lock(&self.events).clone()
    }

    /// A module with no behaviour besides recording its close, standing in
    /// for miner, host and similar modules.
    pub fn auxiliary(self: &Arc<Self>, name: &str) -> Arc<dyn Module> {
        Arc::new(MemoryAuxiliary {
            chain: self.clone(),
            name: name.to_string(),
        })
    }

    fn record(&self, event: String) {
        debug!("memory node: {}", event);
        lock(&self.events).push(event);
    }

    fn close_module(&self, name: &str) -> Result<(), NodeError> {
        self.record(format!("close {}", name));
        if lock(&self.failing_close).contains(name) {
            return Err(NodeError::new(format!("{} refused to close", name)));
        }
        Ok(())
    }
}

struct MemoryAuxiliary {
    chain: Arc<MemoryChain>,
    name: String,
}

impl Module for MemoryAuxiliary {
    fn close(&self) -> Result<(), NodeError> {
        self.chain.close_module(&self.name)
    }
}

pub struct MemoryGateway {
    chain: Arc<MemoryChain>,
    address: String,
}

impl Module for MemoryGateway {
    fn close(&self) -> Result<(), NodeError> {
        self.chain.close_module("gateway")
    }
}

impl Gateway for MemoryGateway {
    fn address(&self) -> String {
        self.address.clone()
    }
}

pub struct MemoryConsensusSet {
    chain: Arc<MemoryChain>,
}

impl Module for MemoryConsensusSet {
    fn close(&self) -> Result<(), NodeError> {
        self.chain.close_module("consensus set")
    }
}

impl SiafundClassifier for MemoryConsensusSet {
    fn is_siafund_b_output(&self, id: &OutputId) -> Result<bool, NodeError> {
        if self.chain.classifier_down.load(Ordering::SeqCst) {
            return Err(NodeError::new("siafund output database unavailable"));
        }
        Ok(lock(&self.chain.siafund_b).contains(id))
    }
}

impl ConsensusSet for MemoryConsensusSet {
    fn height(&self) -> BlockHeight {
        self.chain.height.load(Ordering::SeqCst)
    }

    fn synced(&self) -> bool {
        self.chain.synced.load(Ordering::SeqCst)
    }
}

pub struct MemoryTransactionPool {
    chain: Arc<MemoryChain>,
}

impl Module for MemoryTransactionPool {
    fn close(&self) -> Result<(), NodeError> {
        self.chain.close_module("transaction pool")
    }
}

impl TransactionPool for MemoryTransactionPool {}

#[derive(Default)]
struct WalletState {
    master_key: Option<CipherKey>,
    seed: Option<SeedPhrase>,
    unlocked: bool,
    closed: bool,
    confirmed: Vec<ProcessedTransaction>,
    unconfirmed: Vec<ProcessedTransaction>,
    unspent: Vec<UnspentOutput>,
    addresses: Vec<Address>,
    siacoins: Currency,
    siafunds_a: Currency,
    siafunds_b: Currency,
    siacoin_claim: Currency,
    outgoing: Currency,
}

impl WalletState {
    fn usable(&self) -> Result<(), NodeError> {
        if self.closed {
            return Err(NodeError::new("wallet has been closed"));
        }
        if !self.unlocked {
            return Err(NodeError::new("wallet must be unlocked before it can be used"));
        }
        Ok(())
    }

    fn seed_key_matches(&self, key: &CipherKey) -> bool {
        self.master_key.as_ref() == Some(key)
            || self
                .seed
                .as_ref()
                .map(|s| CipherKey::from_seed(s) == *key)
                .unwrap_or(false)
    }

    fn derive_address(&self, index: usize) -> Address {
        let seed = self.seed.as_ref().map(|s| s.as_str()).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(seed.as_bytes());
        hasher.update((index as u64).to_le_bytes());
        let hash: [u8; 32] = hasher.finalize().into();
        let checksum = Sha256::digest(hash);
        Address::new(format!("{}{}", hex::encode(hash), hex::encode(&checksum[..6])))
    }
}

pub struct MemoryWallet {
    name: String,
    chain: Arc<MemoryChain>,
    state: Mutex<WalletState>,
}

impl MemoryWallet {
    fn new(name: String, chain: Arc<MemoryChain>) -> Self {
        Self {
            name,
            chain,
            state: Mutex::new(WalletState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, WalletState> {
        lock(&self.state)
    }

    /// Records a confirmed payment of `value` to this wallet at `height`.
    pub fn credit(&self, value: Currency, height: BlockHeight) -> TransactionId {
        let mut state = self.state();
        let address = state.derive_address(state.addresses.len());
        let output = OutputId::new(random_hex());
        let tx = ProcessedTransaction {
            transaction_id: TransactionId::new(random_hex()),
            tx_type: TxType::SiacoinTransfer,
            confirmation_height: height,
            confirmation_timestamp: chrono::Utc::now().timestamp().max(0) as u64,
            inputs: vec![],
            outputs: vec![ProcessedOutput {
                id: output.clone(),
                parent_id: None,
                fund_type: FundType::SiacoinOutput,
                maturity_height: height,
                wallet_address: true,
                related_address: address,
                value: value.clone(),
            }],
            miner_fees: vec![],
        };
        state.unspent.push(UnspentOutput {
            id: output,
            parent_id: None,
            fund_type: FundType::SiacoinOutput,
            value: value.clone(),
            confirmation_height: height,
            wallet_address: true,
        });
        state.siacoins += &value;
        let id = tx.transaction_id.clone();
        state.confirmed.push(tx);
        id
    }

    /// Records siafunds of `class` arriving in this wallet.
    pub fn credit_siafunds(&self, class: SiafundClass, value: Currency, height: BlockHeight) {
        let mut state = self.state();
        let output = OutputId::new(random_hex());
        if class == SiafundClass::B {
            self.chain.mark_siafund_b(output.clone());
        }
        let address = state.derive_address(state.addresses.len());
        state.confirmed.push(ProcessedTransaction {
            transaction_id: TransactionId::new(random_hex()),
            tx_type: TxType::SiafundTransfer,
            confirmation_height: height,
            confirmation_timestamp: chrono::Utc::now().timestamp().max(0) as u64,
            inputs: vec![],
            outputs: vec![ProcessedOutput {
                id: output.clone(),
                parent_id: None,
                fund_type: FundType::SiafundOutput,
                maturity_height: height,
                wallet_address: true,
                related_address: address,
                value: value.clone(),
            }],
            miner_fees: vec![],
        });
        state.unspent.push(UnspentOutput {
            id: output,
            parent_id: None,
            fund_type: FundType::SiafundOutput,
            value: value.clone(),
            confirmation_height: height,
            wallet_address: true,
        });
        match class {
            SiafundClass::A => state.siafunds_a += &value,
            SiafundClass::B => state.siafunds_b += &value,
        }
    }

    fn record_send(
        &self,
        state: &mut WalletState,
        fund_in: FundType,
        fund_out: FundType,
        spent: Currency,
        amount: &Currency,
        dest: &Address,
        class: Option<SiafundClass>,
    ) -> TransactionId {
        let fee = transaction_fee();
        let change_address = state.derive_address(state.addresses.len());
        let output = OutputId::new(random_hex());
        if class == Some(SiafundClass::B) {
            self.chain.mark_siafund_b(output.clone());
        }
        let mut inputs = vec![ProcessedInput {
            parent_id: OutputId::new(random_hex()),
            fund_type: fund_in,
            wallet_address: true,
            related_address: change_address.clone(),
            value: spent,
        }];
        if class.is_some() {
            inputs.push(ProcessedInput {
                parent_id: OutputId::new(random_hex()),
                fund_type: FundType::SiacoinInput,
                wallet_address: true,
                related_address: change_address,
                value: fee.clone(),
            });
        }
        let tx = ProcessedTransaction {
            transaction_id: TransactionId::new(random_hex()),
            tx_type: if class.is_some() {
                TxType::SiafundTransfer
            } else {
                TxType::SiacoinTransfer
            },
            confirmation_height: 0,
            confirmation_timestamp: UNCONFIRMED_TIMESTAMP,
            inputs,
            outputs: vec![ProcessedOutput {
                id: output,
                parent_id: None,
                fund_type: fund_out,
                maturity_height: 0,
                wallet_address: false,
                related_address: dest.clone(),
                value: amount.clone(),
            }],
            miner_fees: vec![fee.clone()],
        };
        state.outgoing += &fee;
        let id = tx.transaction_id.clone();
        state.unconfirmed.push(tx);
        id
    }
}

impl Module for MemoryWallet {
    fn close(&self) -> Result<(), NodeError> {
        {
            let mut state = self.state();
            state.closed = true;
            state.unlocked = false;
        }
        self.chain.close_module(&format!("wallet {}", self.name))
    }
}

impl Wallet for MemoryWallet {
    fn encrypted(&self) -> Result<bool, NodeError> {
        Ok(self.state().master_key.is_some())
    }

    fn unlocked(&self) -> Result<bool, NodeError> {
        Ok(self.state().unlocked)
    }

    fn unlock(&self, key: &CipherKey) -> Result<(), NodeError> {
        let mut state = self.state();
        if state.closed {
            return Err(NodeError::new("wallet has been closed"));
        }
        if state.master_key.is_none() {
            return Err(NodeError::new("wallet has not been encrypted yet"));
        }
        if state.unlocked {
            return Err(NodeError::new("wallet has already been unlocked"));
        }
        if !state.seed_key_matches(key) {
            return Err(NodeError::new("provided encryption key is incorrect"));
        }
        state.unlocked = true;
        info!("Wallet {} unlocked", self.name);
        Ok(())
    }

    fn lock(&self) -> Result<(), NodeError> {
        let mut state = self.state();
        if !state.unlocked {
            return Err(NodeError::new("wallet must be unlocked before it can be locked"));
        }
        state.unlocked = false;
        Ok(())
    }

    fn encrypt(&self, key: &CipherKey) -> Result<SeedPhrase, NodeError> {
        let mut state = self.state();
        if state.master_key.is_some() {
            return Err(NodeError::new("wallet is already encrypted, cannot encrypt again"));
        }
        let words: Vec<&str> = (0..SEED_LEN)
            .filter_map(|_| SEED_DICTIONARY.choose(&mut OsRng).copied())
            .collect();
        let seed = SeedPhrase::parse(&words.join(" ")).map_err(|e| NodeError::new(e.to_string()))?;
        state.master_key = Some(key.clone());
        state.seed = Some(seed.clone());
        Ok(seed)
    }

    fn init_from_seed(&self, key: &CipherKey, seed: &SeedPhrase) -> Result<(), NodeError> {
        let mut state = self.state();
        if state.master_key.is_some() {
            return Err(NodeError::new("wallet is already encrypted, cannot encrypt again"));
        }
        state.master_key = Some(key.clone());
        state.seed = Some(seed.clone());
        Ok(())
    }

    fn primary_seed(&self) -> Result<SeedPhrase, NodeError> {
        let state = self.state();
        state.usable()?;
        state
            .seed
            .clone()
            .ok_or_else(|| NodeError::new("wallet has no primary seed"))
    }

    fn change_key_with_seed(&self, seed: &SeedPhrase, key: &CipherKey) -> Result<(), NodeError> {
        let mut state = self.state();
        if state.seed.as_ref() != Some(seed) {
            return Err(NodeError::new("provided seed does not match the primary seed"));
        }
        state.master_key = Some(key.clone());
        Ok(())
    }

    fn is_master_key(&self, key: &CipherKey) -> Result<bool, NodeError> {
        Ok(self.state().seed_key_matches(key))
    }

    fn height(&self) -> Result<BlockHeight, NodeError> {
        Ok(self.chain.height.load(Ordering::SeqCst))
    }

    fn rescanning(&self) -> Result<bool, NodeError> {
        Ok(false)
    }

    fn transactions(
        &self,
        start: BlockHeight,
        end: BlockHeight,
    ) -> Result<Vec<ProcessedTransaction>, NodeError> {
        let state = self.state();
        Ok(state
            .confirmed
            .iter()
            .filter(|t| t.confirmation_height >= start && t.confirmation_height <= end)
            .cloned()
            .collect())
    }

    fn unconfirmed_transactions(&self) -> Result<Vec<ProcessedTransaction>, NodeError> {
        Ok(self.state().unconfirmed.clone())
    }

    fn transaction(&self, id: &TransactionId) -> Result<Option<ProcessedTransaction>, NodeError> {
        let state = self.state();
        Ok(state
            .confirmed
            .iter()
            .chain(state.unconfirmed.iter())
            .find(|t| &t.transaction_id == id)
            .cloned())
    }

    fn unspent_outputs(&self) -> Result<Vec<UnspentOutput>, NodeError> {
        Ok(self.state().unspent.clone())
    }

    fn confirmed_balance(&self) -> Result<ConfirmedBalance, NodeError> {
        let state = self.state();
        Ok(ConfirmedBalance {
            siacoins: state.siacoins.clone(),
            siafunds: &state.siafunds_a + &state.siafunds_b,
            siacoin_claim: state.siacoin_claim.clone(),
        })
    }

    fn unconfirmed_balance(&self) -> Result<UnconfirmedBalance, NodeError> {
        Ok(UnconfirmedBalance {
            outgoing: self.state().outgoing.clone(),
            incoming: Currency::zero(),
        })
    }

    fn send_siacoins(
        &self,
        amount: &Currency,
        dest: &Address,
    ) -> Result<Vec<TransactionId>, NodeError> {
        let mut state = self.state();
        state.usable()?;
        let spent = amount + &transaction_fee();
        state.siacoins = state
            .siacoins
            .checked_sub(&spent)
            .ok_or_else(|| NodeError::new("unable to fund transaction: insufficient balance"))?;
        let id = self.record_send(
            &mut state,
            FundType::SiacoinInput,
            FundType::SiacoinOutput,
            spent,
            amount,
            dest,
            None,
        );
        state.outgoing += amount;
        Ok(vec![id])
    }

    fn send_siafunds(
        &self,
        class: SiafundClass,
        amount: &Currency,
        dest: &Address,
    ) -> Result<Vec<TransactionId>, NodeError> {
        let mut state = self.state();
        state.usable()?;
        let fee = transaction_fee();
        let insufficient = || NodeError::new("unable to fund transaction: insufficient balance");
        let coins = state.siacoins.checked_sub(&fee).ok_or_else(insufficient)?;
        let funds = match class {
            SiafundClass::A => state.siafunds_a.checked_sub(amount),
            SiafundClass::B => state.siafunds_b.checked_sub(amount),
        }
        .ok_or_else(insufficient)?;
        state.siacoins = coins;
        match class {
            SiafundClass::A => state.siafunds_a = funds,
            SiafundClass::B => state.siafunds_b = funds,
        }
        let id = self.record_send(
            &mut state,
            FundType::SiafundInput,
            FundType::SiafundOutput,
            amount.clone(),
            amount,
            dest,
            Some(class),
        );
        Ok(vec![id])
    }

    fn next_address(&self) -> Result<Address, NodeError> {
        let mut state = self.state();
        state.usable()?;
        let address = state.derive_address(state.addresses.len());
        state.addresses.push(address.clone());
        Ok(address)
    }

    fn last_addresses(&self, count: usize) -> Result<Vec<Address>, NodeError> {
        let state = self.state();
        state.usable()?;
        Ok(state.addresses.iter().rev().take(count).cloned().collect())
    }
}

/// Builds in-process modules. Every module checks that its dependencies
/// were supplied.
pub struct MemoryFactory {
    chain: Arc<MemoryChain>,
    wallets: Mutex<HashMap<PathBuf, Arc<MemoryWallet>>>,
}

impl MemoryFactory {
    pub fn new() -> Self {
        let chain = MemoryChain::default();
        chain.set_synced(true);
        Self {
            chain: Arc::new(chain),
            wallets: Mutex::new(HashMap::new()),
        }
    }

    pub fn chain(&self) -> Arc<MemoryChain> {
        self.chain.clone()
    }

    /// The wallet previously opened from `dir`.
    pub fn wallet(&self, dir: &Path) -> Option<Arc<MemoryWallet>> {
        lock(&self.wallets).get(dir).cloned()
    }
}

impl Default for MemoryFactory {
    fn default() -> Self {
        Self::new()
    }
}

fn ensure_dir(dir: &Path) -> Result<(), NodeError> {
    std::fs::create_dir_all(dir)
        .map_err(|e| NodeError::new(format!("unable to create {}: {}", dir.display(), e)))
}

impl ModuleFactory for MemoryFactory {
    fn create_gateway(&self, bootstrap: bool, dir: &Path) -> Result<Arc<dyn Gateway>, NodeError> {
        ensure_dir(dir)?;
        self.chain.record(format!("create gateway (bootstrap={})", bootstrap));
        Ok(Arc::new(MemoryGateway {
            chain: self.chain.clone(),
            address: "127.0.0.1:4281".to_string(),
        }))
    }

    fn create_consensus_set(
        &self,
        gateway: Option<Arc<dyn Gateway>>,
        _bootstrap: bool,
        dir: &Path,
    ) -> Result<Arc<dyn ConsensusSet>, NodeError> {
        if gateway.is_none() {
            return Err(NodeError::new("cannot have a nil gateway as input"));
        }
        ensure_dir(dir)?;
        self.chain.record("create consensus set".to_string());
        Ok(Arc::new(MemoryConsensusSet {
            chain: self.chain.clone(),
        }))
    }

    fn create_transaction_pool(
        &self,
        consensus_set: Option<Arc<dyn ConsensusSet>>,
        gateway: Option<Arc<dyn Gateway>>,
        dir: &Path,
    ) -> Result<Arc<dyn TransactionPool>, NodeError> {
        if consensus_set.is_none() {
            return Err(NodeError::new("transaction pool cannot initialize with a nil consensus set"));
        }
        if gateway.is_none() {
            return Err(NodeError::new("transaction pool cannot initialize with a nil gateway"));
        }
        ensure_dir(dir)?;
        self.chain.record("create transaction pool".to_string());
        Ok(Arc::new(MemoryTransactionPool {
            chain: self.chain.clone(),
        }))
    }

    fn create_wallet(
        &self,
        consensus_set: Option<Arc<dyn ConsensusSet>>,
        transaction_pool: Option<Arc<dyn TransactionPool>>,
        dir: &Path,
    ) -> Result<Arc<dyn Wallet>, NodeError> {
        if consensus_set.is_none() {
            return Err(NodeError::new("wallet cannot initialize with a nil consensus set"));
        }
        if transaction_pool.is_none() {
            return Err(NodeError::new("wallet cannot initialize with a nil transaction pool"));
        }
        ensure_dir(dir)?;
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.chain.record(format!("create wallet {}", name));

        let mut wallets = lock(&self.wallets);
        let wallet = wallets
            .entry(dir.to_path_buf())
            .or_insert_with(|| Arc::new(MemoryWallet::new(name, self.chain.clone())))
            .clone();
        wallet.state().closed = false;
        Ok(wallet)
    }
}
