//! The escrow contract as seen from the coordinator.
//!
//! Wallets sign and broadcast transactions; the coordinator only ever reads
//! the chain. [`EscrowLedger`] is the seam: [`rpc::JsonRpcLedger`] talks to a
//! real node, and tests use a simulated escrow.

use std::future::Future;

use serde::Serialize;

use crate::amount::Wei;
use crate::errors::Result;

pub mod abi;
pub mod rpc;
#[cfg(test)]
pub mod sim;

pub type TxHash = String;

/// A state-changing escrow call, decoded from (or encoded into) calldata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscrowCall {
    CreateBounty {
        amount: Wei,
        deadline: u64,
        metadata_hash: [u8; 32],
    },
    SubmitWork {
        bounty_id: u64,
        content_hash: [u8; 32],
    },
    SelectWinner {
        bounty_id: u64,
        submission_id: u64,
    },
    CancelBounty {
        bounty_id: u64,
    },
    ClaimRefund {
        bounty_id: u64,
    },
}

impl EscrowCall {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateBounty { .. } => "createBounty",
            Self::SubmitWork { .. } => "submitWork",
            Self::SelectWinner { .. } => "selectWinner",
            Self::CancelBounty { .. } => "cancelBounty",
            Self::ClaimRefund { .. } => "claimRefund",
        }
    }
}

/// Escrow events consumed for mirroring and reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscrowEvent {
    BountyCreated {
        bounty_id: u64,
        creator: String,
        amount: Wei,
        deadline: u64,
        metadata_hash: String,
    },
    SubmissionCreated {
        bounty_id: u64,
        submission_id: u64,
        submitter: String,
        content_hash: String,
    },
    WinnerSelected {
        bounty_id: u64,
        submission_id: u64,
        winner: String,
        amount: Wei,
    },
}

/// A transaction that has been included (and buried deep enough).
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmedTx {
    pub hash: TxHash,
    /// Signed sender; the only identity the coordinator trusts.
    pub from: String,
    pub to: String,
    pub value: Wei,
    pub call: EscrowCall,
    pub block_number: u64,
    pub block_timestamp: i64,
    pub events: Vec<EscrowEvent>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TxStatus {
    /// Unknown to the node, not yet mined, or not yet deep enough.
    Pending,
    Confirmed(ConfirmedTx),
    /// Reverted, or not an escrow call at all.
    Failed(String),
}

/// Where an action stands between the wallet and the database.
#[derive(Debug, Clone, PartialEq)]
pub enum TxPhase {
    /// Nothing signed yet; at most a prepared call handed to the wallet.
    Idle,
    Submitted(TxHash),
    Confirmed(ConfirmedTx),
    Failed {
        tx_hash: Option<TxHash>,
        reason: String,
    },
}

/// `getBounty` view of the escrow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnChainBounty {
    pub creator: String,
    pub amount: Wei,
    pub deadline: u64,
    pub status: u8,
    pub winner: String,
    pub metadata_hash: String,
    pub created_at: u64,
    pub submission_count: u64,
}

/// Read access to the escrow contract.
pub trait EscrowLedger: Send + Sync + 'static {
    /// Current status of a transaction.
    fn tx_status(&self, tx_hash: &str) -> impl Future<Output = Result<TxStatus>> + Send;

    /// Current on-chain state of a bounty.
    fn bounty(&self, onchain_id: u64) -> impl Future<Output = Result<OnChainBounty>> + Send;

    /// Address of the escrow contract this ledger reads from.
    fn escrow_address(&self) -> &str;
}
