//! What a page shows. Templating into HTML is left to the browser side;
//! these are the values that fill it.

use serde::{Deserialize, Serialize};

use crate::currency::{self, Currency, Unit};
use crate::node::types::{ProcessedTransaction, UNCONFIRMED_TIMESTAMP};
use crate::node::Wallet;
use crate::summary::{display_time, HistoryPage, SummarizedTransaction};

pub const UNKNOWN: &str = "?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Form {
    UnlockWallet,
    InitializeWallet,
    ScanningWallet,
    CreateNewWallet,
    RestoreFromSeed,
    ChangeLock,
    SendCoins,
    ExplainWhale,
}

/// Where the node is while it is not yet serving wallets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum NodeStage {
    BuildingConsensus { progress: String },
    Bootstrapping { progress: String },
    /// Neither task has started; the user picks download or local build.
    ChooseConsensusSource { message: String },
    Ready,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Page {
    Node(NodeStage),
    Form { title: String, form: Form },
    Message { title: String, message: String },
    Error { message: String },
    Wallet(WalletView),
    Transaction(TransactionView),
    Privacy,
}

impl Page {
    pub fn form(title: &str, form: Form) -> Self {
        Page::Form {
            title: title.to_string(),
            form,
        }
    }

    pub fn unlock() -> Self {
        Page::form("UNLOCK WALLET", Form::UnlockWallet)
    }

    pub fn scanning(status: &str) -> Self {
        Page::Form {
            title: format!("{} WALLET", status.to_uppercase()),
            form: Form::ScanningWallet,
        }
    }

    pub fn message(title: &str, message: impl Into<String>) -> Self {
        Page::Message {
            title: title.to_string(),
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Page::Error {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRow {
    pub transaction_id: String,
    pub short_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub amount: String,
    pub confirmed: String,
    pub time: String,
}

impl From<&SummarizedTransaction> for HistoryRow {
    fn from(s: &SummarizedTransaction) -> Self {
        let mut amount = format!("{:>15.2} SCP", s.scp);
        let spf = s.spf_display();
        if !spf.is_empty() {
            amount = format!("{}; {}", amount, spf);
        }
        Self {
            transaction_id: s.transaction_id.clone(),
            short_id: short_id(&s.transaction_id),
            kind: s.kind.label().to_string(),
            amount,
            confirmed: s.confirmed_label().to_string(),
            time: s.time.clone(),
        }
    }
}

fn short_id(id: &str) -> String {
    if id.len() <= 32 || !id.is_ascii() {
        return id.to_string();
    }
    format!("{}...{}", &id[..16], &id[id.len() - 16..])
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletView {
    pub history: Vec<HistoryRow>,
    pub page: usize,
    pub pages: usize,
    pub is_last_page: bool,
}

impl From<HistoryPage> for WalletView {
    fn from(page: HistoryPage) -> Self {
        Self {
            history: page.rows.iter().map(HistoryRow::from).collect(),
            page: page.page,
            pages: page.pages,
            is_last_page: page.page == page.pages,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRow {
    pub value: String,
    pub address: String,
    pub fund_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionView {
    pub transaction_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub time: String,
    pub block: String,
    pub inputs: Vec<TransferRow>,
    pub outputs: Vec<TransferRow>,
}

impl From<&ProcessedTransaction> for TransactionView {
    fn from(txn: &ProcessedTransaction) -> Self {
        let time = if txn.confirmation_timestamp == UNCONFIRMED_TIMESTAMP {
            String::new()
        } else {
            display_time(txn.confirmation_timestamp)
        };
        Self {
            transaction_id: txn.transaction_id.as_str().to_uppercase(),
            kind: txn.tx_type.label().to_string(),
            time,
            block: txn.confirmation_height.to_string(),
            inputs: txn
                .inputs
                .iter()
                .map(|i| TransferRow {
                    value: i.value.to_string(),
                    address: i.related_address.as_str().to_uppercase(),
                    fund_type: i.fund_type.label().to_string(),
                })
                .collect(),
            outputs: txn
                .outputs
                .iter()
                .map(|o| TransferRow {
                    value: o.value.to_string(),
                    address: o.related_address.as_str().to_uppercase(),
                    fund_type: o.fund_type.label().to_string(),
                })
                .collect(),
        }
    }
}

/// Block height and sync status shown in the page header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusLine {
    pub height: String,
    pub status: String,
    pub color: String,
}

impl StatusLine {
    pub fn new(height: String, status: &str, color: &str) -> Self {
        Self {
            height,
            status: status.to_string(),
            color: color.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Balances {
    pub scp: String,
    pub unconfirmed: String,
    pub spf: String,
    pub claim: String,
    pub whale: String,
}

impl Default for Balances {
    fn default() -> Self {
        Self {
            scp: UNKNOWN.to_string(),
            unconfirmed: UNKNOWN.to_string(),
            spf: UNKNOWN.to_string(),
            claim: UNKNOWN.to_string(),
            whale: UNKNOWN.to_string(),
        }
    }
}

impl Balances {
    /// Balances of an unlocked wallet. Anything the wallet cannot answer
    /// stays `?`.
    pub fn of(wallet: &dyn Wallet) -> Self {
        let mut balances = Self::default();
        if !wallet.unlocked().unwrap_or(false) {
            return balances;
        }
        if let Ok(confirmed) = wallet.confirmed_balance() {
            balances.scp = currency::display_balance(&confirmed.siacoins, Unit::Scp);
            balances.spf = confirmed.siafunds.to_string();
            balances.claim = currency::display_balance(&confirmed.siacoin_claim, Unit::Scp);
            balances.whale = whale_size(confirmed.siacoins.to_f64(Unit::Scp)).to_string();
        }
        if let Ok(unconfirmed) = wallet.unconfirmed_balance() {
            balances.unconfirmed = unconfirmed_delta(&unconfirmed.incoming, &unconfirmed.outgoing);
        }
        balances
    }
}

fn unconfirmed_delta(incoming: &Currency, outgoing: &Currency) -> String {
    match incoming.checked_sub(outgoing) {
        Some(gain) => currency::display_balance(&gain, Unit::Scp),
        None => {
            let loss = format!("-{}", currency::format(&outgoing.saturating_sub(incoming), Unit::Scp, 2));
            format!("{:>15}", loss)
        }
    }
}

/// How big a fish a balance of `scp` makes you.
pub fn whale_size(scp: f64) -> &'static str {
    const SIZES: [(f64, &str); 11] = [
        (50.0, "🦐"),
        (100.0, "🐟"),
        (1_000.0, "🦀"),
        (5_000.0, "🐢"),
        (10_000.0, "⚔️🐠"),
        (25_000.0, "🐬"),
        (50_000.0, "🦈"),
        (100_000.0, "🌊🦄"),
        (250_000.0, "🌊🐫"),
        (500_000.0, "🐋"),
        (1_000_000.0, "🐙"),
    ];
    SIZES
        .iter()
        .find(|(limit, _)| scp < *limit)
        .map(|(_, fish)| *fish)
        .unwrap_or("🐳")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summary::SummaryKind;
    use crate::node::types::TxType;

    #[test]
    fn test_whale_thresholds() {
        assert_eq!(whale_size(0.0), "🦐");
        assert_eq!(whale_size(49.99), "🦐");
        assert_eq!(whale_size(50.0), "🐟");
        assert_eq!(whale_size(9_999.0), "⚔️🐠");
        assert_eq!(whale_size(999_999.0), "🐙");
        assert_eq!(whale_size(1_000_000.0), "🐳");
    }

    #[test]
    fn test_unconfirmed_delta_sign() {
        let one = Currency::from_units(1, Unit::Scp);
        let two = Currency::from_units(2, Unit::Scp);
        assert_eq!(unconfirmed_delta(&two, &one).trim(), "1.00");
        assert_eq!(unconfirmed_delta(&one, &two).trim(), "-1.00");
        assert_eq!(unconfirmed_delta(&one, &two).len(), 15);
    }

    #[test]
    fn test_history_row() {
        let summary = SummarizedTransaction {
            transaction_id: "AB".repeat(32),
            kind: SummaryKind::Transfer(TxType::SiafundTransfer),
            scp: -0.5,
            spf_a: -3.0,
            spf_b: 0.0,
            fee: -0.001,
            confirmed: true,
            time: "2024-01-02 03:04".to_string(),
        };
        let row = HistoryRow::from(&summary);
        assert_eq!(row.short_id, format!("{}...{}", "AB".repeat(8), "AB".repeat(8)));
        assert_eq!(row.kind, "SPF TRANSFER");
        assert_eq!(row.amount.trim_start(), "-0.50 SCP; -3 SPF-A");
        assert_eq!(row.confirmed, "Yes");
    }

    #[test]
    fn test_page_survives_cache() {
        let page = Page::Wallet(WalletView {
            history: vec![],
            page: 1,
            pages: 1,
            is_last_page: true,
        });
        let cached = serde_json::to_string(&page).unwrap();
        assert_eq!(serde_json::from_str::<Page>(&cached).unwrap(), page);
        assert_eq!(Page::scanning("Scanning"), Page::form("SCANNING WALLET", Form::ScanningWallet));
    }
}
