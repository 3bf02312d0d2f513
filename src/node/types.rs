//! Ledger records the wallet module reports about its own transactions.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::currency::Currency;

pub type BlockHeight = u64;

/// Confirmation timestamp of a transaction still sitting in the pool.
pub const UNCONFIRMED_TIMESTAMP: u64 = u64::MAX;

macro_rules! hex_id {
    ($name:ident) => {
        #[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

hex_id!(TransactionId);
hex_id!(OutputId);
hex_id!(Address);

/// Length of a hex encoded unlock hash with its checksum.
pub const ADDRESS_HEX_LEN: usize = 76;

impl Address {
    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        if s.len() != ADDRESS_HEX_LEN {
            return Err(format!(
                "Address must be {} hex characters, got {}",
                ADDRESS_HEX_LEN,
                s.len()
            ));
        }
        if hex::decode(s).is_err() {
            return Err("Address is not valid hex".to_string());
        }
        Ok(Self(s.to_lowercase()))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SiafundClass {
    A,
    B,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FundType {
    SiacoinInput,
    SiacoinOutput,
    SiafundInput,
    SiafundOutput,
    ClaimOutput,
    MinerPayout,
    MinerFee,
}

impl FundType {
    pub fn label(self) -> &'static str {
        match self {
            FundType::SiacoinInput => "SCP INPUT",
            FundType::SiacoinOutput => "SCP OUTPUT",
            FundType::SiafundInput => "SPF INPUT",
            FundType::SiafundOutput => "SPF OUTPUT",
            FundType::ClaimOutput => "CLAIM OUTPUT",
            FundType::MinerPayout => "MINER PAYOUT",
            FundType::MinerFee => "MINER FEE",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxType {
    Setup,
    SiacoinTransfer,
    SiafundTransfer,
    Miner,
    Contract,
    Storage,
    Unknown,
}

impl TxType {
    pub fn label(self) -> &'static str {
        match self {
            TxType::Setup => "SETUP",
            TxType::SiacoinTransfer => "SCP TRANSFER",
            TxType::SiafundTransfer => "SPF TRANSFER",
            TxType::Miner => "MINER",
            TxType::Contract => "CONTRACT",
            TxType::Storage => "STORAGE",
            TxType::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProcessedInput {
    pub parent_id: OutputId,
    pub fund_type: FundType,
    pub wallet_address: bool,
    pub related_address: Address,
    pub value: Currency,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProcessedOutput {
    pub id: OutputId,
    /// Siafund output a claim output was created from.
    #[serde(default)]
    pub parent_id: Option<OutputId>,
    pub fund_type: FundType,
    pub maturity_height: BlockHeight,
    pub wallet_address: bool,
    pub related_address: Address,
    pub value: Currency,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProcessedTransaction {
    pub transaction_id: TransactionId,
    pub tx_type: TxType,
    pub confirmation_height: BlockHeight,
    pub confirmation_timestamp: u64,
    pub inputs: Vec<ProcessedInput>,
    pub outputs: Vec<ProcessedOutput>,
    pub miner_fees: Vec<Currency>,
}

impl ProcessedTransaction {
    pub fn is_confirmed(&self) -> bool {
        self.confirmation_timestamp != UNCONFIRMED_TIMESTAMP
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UnspentOutput {
    pub id: OutputId,
    #[serde(default)]
    pub parent_id: Option<OutputId>,
    pub fund_type: FundType,
    pub value: Currency,
    pub confirmation_height: BlockHeight,
    pub wallet_address: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ConfirmedBalance {
    pub siacoins: Currency,
    pub siafunds: Currency,
    pub siacoin_claim: Currency,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct UnconfirmedBalance {
    pub outgoing: Currency,
    pub incoming: Currency,
}
