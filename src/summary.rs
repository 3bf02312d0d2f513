//! Net effect of raw ledger transactions on one wallet.

use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::currency::{Currency, Unit};
use crate::error::NodeError;
use crate::node::types::{
    BlockHeight, FundType, OutputId, ProcessedTransaction, TransactionId, TxType, UnspentOutput,
};
use crate::node::SiafundClassifier;

pub const HISTORY_PAGE_SIZE: usize = 20;
pub const CSV_HEADER: &str =
    r#""Transaction ID","Type","Amount SCP","Amount SPF","Confirmed","DateTime""#;

/// Primary currency deltas below this are fee dust.
const DUST_THRESHOLD: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryKind {
    Setup,
    Transfer(TxType),
    CollectSpfRewards,
}

impl SummaryKind {
    pub fn label(&self) -> &'static str {
        match self {
            SummaryKind::Setup => "SETUP",
            SummaryKind::Transfer(t) => t.label(),
            SummaryKind::CollectSpfRewards => "COLLECT SPF REWARDS",
        }
    }

    fn from_tx_type(t: TxType) -> Self {
        match t {
            TxType::Setup => SummaryKind::Setup,
            other => SummaryKind::Transfer(other),
        }
    }
}

impl Serialize for SummaryKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummarizedTransaction {
    pub transaction_id: String,
    #[serde(rename = "type")]
    pub kind: SummaryKind,
    pub scp: f64,
    pub spf_a: f64,
    pub spf_b: f64,
    /// Negative when the wallet paid the miner fee, otherwise zero.
    pub fee: f64,
    pub confirmed: bool,
    /// `YYYY-MM-DD HH:MM` in UTC, empty while unconfirmed.
    pub time: String,
}

impl SummarizedTransaction {
    pub fn confirmed_label(&self) -> &'static str {
        if self.confirmed {
            "Yes"
        } else {
            "No"
        }
    }

    /// Secondary asset movement such as `-3 SPF-A; 2 SPF-B`, empty when none.
    pub fn spf_display(&self) -> String {
        let mut parts = Vec::new();
        if self.spf_a != 0.0 {
            parts.push(format!("{} SPF-A", self.spf_a));
        }
        if self.spf_b != 0.0 {
            parts.push(format!("{} SPF-B", self.spf_b));
        }
        parts.join("; ")
    }
}

/// The classifier failed part way through. `partial` holds the summaries
/// of every transaction before the failing one.
#[derive(Error, Debug)]
#[error("Unable to classify siafund output {output} of transaction {transaction}: {source}")]
pub struct SummaryError {
    pub transaction: TransactionId,
    pub output: OutputId,
    #[source]
    pub source: NodeError,
    pub partial: Vec<SummarizedTransaction>,
}

#[derive(Default)]
struct Flows {
    incoming: Currency,
    outgoing: Currency,
    fee: Currency,
    spf_in_a: Currency,
    spf_in_b: Currency,
    spf_out_a: Currency,
    spf_out_b: Currency,
    spf_io: bool,
}

pub fn display_time(timestamp: u64) -> String {
    i64::try_from(timestamp)
        .ok()
        .and_then(|t| chrono::DateTime::from_timestamp(t, 0))
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default()
}

/// Summarizes `txns` in order. `unspent` and the transactions themselves
/// are searched for the claim outputs reward collections refer to.
pub fn summarize<C: SiafundClassifier + ?Sized>(
    txns: &[ProcessedTransaction],
    chain_height: BlockHeight,
    unspent: &[UnspentOutput],
    classifier: &C,
) -> Result<Vec<SummarizedTransaction>, SummaryError> {
    let mut summaries = Vec::with_capacity(txns.len());
    for txn in txns {
        let flows = match wallet_flows(txn, chain_height, classifier) {
            Ok(f) => f,
            Err((output, source)) => {
                return Err(SummaryError {
                    transaction: txn.transaction_id.clone(),
                    output,
                    source,
                    partial: summaries,
                })
            }
        };

        let net_outgoing = flows.outgoing.saturating_sub(&flows.fee);
        let scp = flows.incoming.to_f64(Unit::Scp) - net_outgoing.to_f64(Unit::Scp);
        let spf_a = flows.spf_in_a.to_f64(Unit::Spf) - flows.spf_out_a.to_f64(Unit::Spf);
        let spf_b = flows.spf_in_b.to_f64(Unit::Spf) - flows.spf_out_b.to_f64(Unit::Spf);

        let (kind, scp) = if !flows.spf_io {
            (SummaryKind::from_tx_type(txn.tx_type), scp)
        } else if flows.spf_in_a != flows.spf_out_a || flows.spf_in_b != flows.spf_out_b {
            let scp = if scp.abs() < DUST_THRESHOLD { 0.0 } else { scp };
            (SummaryKind::from_tx_type(txn.tx_type), scp)
        } else {
            let claim = claimed(txn, txns, unspent);
            if claim.is_zero() {
                (SummaryKind::Setup, 0.0)
            } else {
                (SummaryKind::CollectSpfRewards, claim.to_f64(Unit::Scp) + scp)
            }
        };

        let confirmed = txn.is_confirmed();
        summaries.push(SummarizedTransaction {
            transaction_id: txn.transaction_id.as_str().to_uppercase(),
            kind,
            scp,
            spf_a,
            spf_b,
            fee: -flows.fee.to_f64(Unit::Scp),
            confirmed,
            time: if confirmed {
                display_time(txn.confirmation_timestamp)
            } else {
                String::new()
            },
        });
    }
    Ok(summaries)
}

fn wallet_flows<C: SiafundClassifier + ?Sized>(
    txn: &ProcessedTransaction,
    chain_height: BlockHeight,
    classifier: &C,
) -> Result<Flows, (OutputId, NodeError)> {
    let mut f = Flows::default();
    let mut funded = false;

    for input in txn.inputs.iter().filter(|i| i.wallet_address) {
        funded = true;
        match input.fund_type {
            FundType::SiacoinInput => f.outgoing += &input.value,
            FundType::SiafundInput => {
                f.spf_io = true;
                let is_b = classifier
                    .is_siafund_b_output(&input.parent_id)
                    .map_err(|e| (input.parent_id.clone(), e))?;
                if is_b {
                    f.spf_out_b += &input.value;
                } else {
                    f.spf_out_a += &input.value;
                }
            }
            _ => {}
        }
    }

    for output in txn.outputs.iter().filter(|o| o.wallet_address) {
        match output.fund_type {
            FundType::SiacoinOutput | FundType::MinerPayout => {
                if output.maturity_height <= chain_height {
                    f.incoming += &output.value;
                }
            }
            FundType::SiafundOutput => {
                f.spf_io = true;
                let is_b = classifier
                    .is_siafund_b_output(&output.id)
                    .map_err(|e| (output.id.clone(), e))?;
                if is_b {
                    f.spf_in_b += &output.value;
                } else {
                    f.spf_in_a += &output.value;
                }
            }
            _ => {}
        }
    }

    if funded {
        f.fee = txn.miner_fees.iter().sum();
    }
    Ok(f)
}

/// Claim outputs created by the siafund outputs `txn` spends.
fn claimed(
    txn: &ProcessedTransaction,
    pool: &[ProcessedTransaction],
    unspent: &[UnspentOutput],
) -> Currency {
    let mut total = Currency::zero();
    for input in txn
        .inputs
        .iter()
        .filter(|i| i.wallet_address && i.fund_type == FundType::SiafundInput)
    {
        let parent = Some(&input.parent_id);
        let from_unspent = unspent
            .iter()
            .find(|u| u.fund_type == FundType::ClaimOutput && u.parent_id.as_ref() == parent)
            .map(|u| &u.value);
        let found = from_unspent.or_else(|| {
            pool.iter()
                .flat_map(|t| t.outputs.iter())
                .find(|o| o.fund_type == FundType::ClaimOutput && o.parent_id.as_ref() == parent)
                .map(|o| &o.value)
        });
        if let Some(value) = found {
            total += value;
        }
    }
    total
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryPage {
    pub rows: Vec<SummarizedTransaction>,
    pub page: usize,
    pub pages: usize,
}

/// Newest first, without empty setup rows. `page` is clamped into range.
pub fn history_page(summaries: &[SummarizedTransaction], page: usize) -> HistoryPage {
    let visible: Vec<&SummarizedTransaction> = summaries
        .iter()
        .rev()
        .filter(|s| !(s.kind == SummaryKind::Setup && s.scp == 0.0))
        .collect();
    let pages = visible.len().div_ceil(HISTORY_PAGE_SIZE).max(1);
    let page = page.clamp(1, pages);
    let rows = visible
        .into_iter()
        .skip((page - 1) * HISTORY_PAGE_SIZE)
        .take(HISTORY_PAGE_SIZE)
        .cloned()
        .collect();
    HistoryPage { rows, page, pages }
}

pub fn history_csv(summaries: &[SummarizedTransaction]) -> String {
    let mut csv = format!("{}\n", CSV_HEADER);
    for s in summaries.iter().filter(|s| s.kind != SummaryKind::Setup) {
        let spf = s.spf_display();
        csv.push_str(&format!(
            "\"{}\",\"{}\",\"{:.2}\",\"{}\",\"{}\",\"{}\"\n",
            s.transaction_id,
            s.kind.label(),
            s.scp,
            if spf.is_empty() { "0".to_string() } else { spf },
            s.confirmed_label(),
            s.time
        ));
    }
    csv
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::types::{
        Address, ProcessedInput, ProcessedOutput, UNCONFIRMED_TIMESTAMP,
    };
    use std::collections::HashSet;

    #[derive(Default)]
    struct Classes {
        b: HashSet<OutputId>,
        broken: HashSet<OutputId>,
    }

    impl SiafundClassifier for Classes {
        fn is_siafund_b_output(&self, id: &OutputId) -> Result<bool, NodeError> {
            if self.broken.contains(id) {
                return Err(NodeError::new("index offline"));
            }
            Ok(self.b.contains(id))
        }
    }

    fn scp(text: &str) -> Currency {
        crate::currency::parse(&format!("{}SCP", text)).unwrap().value
    }

    fn addr() -> Address {
        Address::new("00".repeat(38))
    }

    fn input(fund_type: FundType, parent: &str, value: Currency, ours: bool) -> ProcessedInput {
        ProcessedInput {
            parent_id: OutputId::new(parent),
            fund_type,
            wallet_address: ours,
            related_address: addr(),
            value,
        }
    }

    fn output(fund_type: FundType, id: &str, value: Currency, ours: bool) -> ProcessedOutput {
        ProcessedOutput {
            id: OutputId::new(id),
            parent_id: None,
            fund_type,
            maturity_height: 0,
            wallet_address: ours,
            related_address: addr(),
            value,
        }
    }

    fn tx(
        id: &str,
        tx_type: TxType,
        inputs: Vec<ProcessedInput>,
        outputs: Vec<ProcessedOutput>,
        fees: Vec<Currency>,
    ) -> ProcessedTransaction {
        ProcessedTransaction {
            transaction_id: TransactionId::new(id),
            tx_type,
            confirmation_height: 5,
            confirmation_timestamp: 1_600_000_000,
            inputs,
            outputs,
            miner_fees: fees,
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_incoming_transfer() {
        let t = tx(
            "ab01",
            TxType::SiacoinTransfer,
            vec![input(FundType::SiacoinInput, "p", scp("11"), false)],
            vec![output(FundType::SiacoinOutput, "o", scp("10"), true)],
            vec![scp("1")],
        );
        let s = summarize(&[t], 10, &[], &Classes::default()).unwrap();
        assert_eq!(s[0].transaction_id, "AB01");
        assert_eq!(s[0].kind.label(), "SCP TRANSFER");
        assert!(close(s[0].scp, 10.0));
        assert_eq!(s[0].fee, 0.0);
        assert!(s[0].confirmed);
        assert_eq!(s[0].time, "2020-09-13 12:26");
    }

    #[test]
    fn test_outgoing_nets_fee() {
        let t = tx(
            "cd",
            TxType::SiacoinTransfer,
            vec![input(FundType::SiacoinInput, "p", scp("10"), true)],
            vec![
                output(FundType::SiacoinOutput, "change", scp("4.999"), true),
                output(FundType::SiacoinOutput, "paid", scp("5"), false),
            ],
            vec![scp("0.001")],
        );
        let s = summarize(&[t], 10, &[], &Classes::default()).unwrap();
        assert!(close(s[0].scp, -5.0));
        assert!(close(s[0].fee, -0.001));
    }

    #[test]
    fn test_immature_payout_ignored() {
        let mut payout = output(FundType::MinerPayout, "m", scp("300"), true);
        payout.maturity_height = 150;
        let t = tx("ef", TxType::Miner, vec![], vec![payout], vec![]);
        let s = summarize(&[t.clone()], 10, &[], &Classes::default()).unwrap();
        assert_eq!(s[0].scp, 0.0);
        let s = summarize(&[t], 150, &[], &Classes::default()).unwrap();
        assert!(close(s[0].scp, 300.0));
    }

    #[test]
    fn test_siafund_transfer_drops_dust() {
        let t = tx(
            "f1",
            TxType::SiafundTransfer,
            vec![
                input(FundType::SiafundInput, "fundA", Currency::from_u64(3), true),
                input(FundType::SiacoinInput, "coin", scp("1"), true),
            ],
            vec![output(FundType::SiacoinOutput, "change", scp("0.995"), true)],
            vec![scp("0.001")],
        );
        let s = summarize(&[t], 10, &[], &Classes::default()).unwrap();
        assert_eq!(s[0].kind.label(), "SPF TRANSFER");
        assert_eq!(s[0].scp, 0.0);
        assert!(close(s[0].spf_a, -3.0));
        assert_eq!(s[0].spf_b, 0.0);
        assert_eq!(s[0].spf_display(), "-3 SPF-A");
    }

    #[test]
    fn test_siafund_b_partition() {
        let mut classes = Classes::default();
        classes.b.insert(OutputId::new("fundB"));
        let t = tx(
            "f2",
            TxType::SiafundTransfer,
            vec![],
            vec![output(FundType::SiafundOutput, "fundB", Currency::from_u64(2), true)],
            vec![],
        );
        let s = summarize(&[t], 10, &[], &classes).unwrap();
        assert!(close(s[0].spf_b, 2.0));
        assert_eq!(s[0].spf_a, 0.0);
    }

    fn claim_tx() -> ProcessedTransaction {
        tx(
            "c1",
            TxType::SiafundTransfer,
            vec![input(FundType::SiafundInput, "old", Currency::from_u64(5), true)],
            vec![output(FundType::SiafundOutput, "new", Currency::from_u64(5), true)],
            vec![],
        )
    }

    #[test]
    fn test_claim_from_unspent() {
        let unspent = vec![UnspentOutput {
            id: OutputId::new("claim"),
            parent_id: Some(OutputId::new("old")),
            fund_type: FundType::ClaimOutput,
            value: scp("2"),
            confirmation_height: 5,
            wallet_address: true,
        }];
        let txns = vec![claim_tx()];
        let before = txns.clone();
        let first = summarize(&txns, 10, &unspent, &Classes::default()).unwrap();
        let second = summarize(&txns, 10, &unspent, &Classes::default()).unwrap();
        assert_eq!(first, second);
        assert_eq!(txns, before);
        assert_eq!(first[0].kind, SummaryKind::CollectSpfRewards);
        assert!(close(first[0].scp, 2.0));
    }

    #[test]
    fn test_claim_from_pool() {
        let mut claim = output(FundType::ClaimOutput, "claim", scp("1.5"), true);
        claim.parent_id = Some(OutputId::new("old"));
        let spender = tx("c2", TxType::SiacoinTransfer, vec![], vec![claim], vec![]);
        let s = summarize(&[claim_tx(), spender], 10, &[], &Classes::default()).unwrap();
        assert_eq!(s[0].kind.label(), "COLLECT SPF REWARDS");
        assert!(close(s[0].scp, 1.5));
    }

    #[test]
    fn test_unspent_claim_wins_over_pool() {
        let unspent = vec![UnspentOutput {
            id: OutputId::new("claim"),
            parent_id: Some(OutputId::new("old")),
            fund_type: FundType::ClaimOutput,
            value: scp("2"),
            confirmation_height: 5,
            wallet_address: true,
        }];
        let mut claim = output(FundType::ClaimOutput, "claim", scp("9"), true);
        claim.parent_id = Some(OutputId::new("old"));
        let other = tx("c3", TxType::SiacoinTransfer, vec![], vec![claim], vec![]);
        let s = summarize(&[claim_tx(), other], 10, &unspent, &Classes::default()).unwrap();
        assert!(close(s[0].scp, 2.0));
    }

    #[test]
    fn test_zero_claim_is_setup() {
        let s = summarize(&[claim_tx()], 10, &[], &Classes::default()).unwrap();
        assert_eq!(s[0].kind, SummaryKind::Setup);
        assert_eq!(s[0].scp, 0.0);
    }

    #[test]
    fn test_classifier_error_keeps_partial() {
        let mut classes = Classes::default();
        classes.broken.insert(OutputId::new("old"));
        let first = tx(
            "a1",
            TxType::SiacoinTransfer,
            vec![],
            vec![output(FundType::SiacoinOutput, "o", scp("1"), true)],
            vec![],
        );
        let err = summarize(&[first, claim_tx(), claim_tx()], 10, &[], &classes).unwrap_err();
        assert_eq!(err.partial.len(), 1);
        assert_eq!(err.transaction, TransactionId::new("c1"));
        assert_eq!(err.output, OutputId::new("old"));
    }

    #[test]
    fn test_unconfirmed() {
        let mut t = tx("u1", TxType::SiacoinTransfer, vec![], vec![], vec![]);
        t.confirmation_timestamp = UNCONFIRMED_TIMESTAMP;
        let s = summarize(&[t], 10, &[], &Classes::default()).unwrap();
        assert!(!s[0].confirmed);
        assert_eq!(s[0].confirmed_label(), "No");
        assert_eq!(s[0].time, "");
    }

    fn row(id: usize, kind: SummaryKind, scp: f64) -> SummarizedTransaction {
        SummarizedTransaction {
            transaction_id: format!("{:04}", id),
            kind,
            scp,
            spf_a: 0.0,
            spf_b: 0.0,
            fee: 0.0,
            confirmed: true,
            time: "2020-09-13 12:26".to_string(),
        }
    }

    #[test]
    fn test_history_page() {
        let mut rows: Vec<_> = (0..45)
            .map(|i| row(i, SummaryKind::Transfer(TxType::SiacoinTransfer), 1.0))
            .collect();
        rows.push(row(99, SummaryKind::Setup, 0.0));

        let first = history_page(&rows, 1);
        assert_eq!(first.pages, 3);
        assert_eq!(first.rows.len(), HISTORY_PAGE_SIZE);
        assert_eq!(first.rows[0].transaction_id, "0044");

        let last = history_page(&rows, 9);
        assert_eq!(last.page, 3);
        assert_eq!(last.rows.len(), 5);
        assert_eq!(last.rows[4].transaction_id, "0000");

        assert_eq!(history_page(&[], 0).pages, 1);
    }

    #[test]
    fn test_history_csv() {
        let rows = vec![
            row(1, SummaryKind::Transfer(TxType::SiacoinTransfer), -2.5),
            row(2, SummaryKind::Setup, 0.0),
        ];
        let csv = history_csv(&rows);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(
            lines[1],
            r#""0001","SCP TRANSFER","-2.50","0","Yes","2020-09-13 12:26""#
        );
        assert_eq!(lines.len(), 2);
    }
}
