//! In-process escrow used by the coordinator tests.
//!
//! Wallet calls execute the escrow rules immediately and land either as a
//! confirmed transaction with the matching events or as a reverted one.
//! Transactions can be held back to model the confirmation wait.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::amount::Wei;
use crate::errors::{CoordinatorError, Result};

use super::abi::to_hex;
use super::{ConfirmedTx, EscrowCall, EscrowEvent, EscrowLedger, OnChainBounty, TxStatus};

pub const ESCROW: &str = "0x00000000000000000000000000000000000e5c80";

const STATUS_ACTIVE: u8 = 0;
const STATUS_COMPLETED: u8 = 1;
const STATUS_CANCELLED: u8 = 2;

#[derive(Default)]
struct SimState {
    bounties: Vec<OnChainBounty>,
    submissions: Vec<(u64, String)>,
    refunded: HashSet<u64>,
    txs: HashMap<String, TxStatus>,
    held: HashMap<String, TxStatus>,
    next_tx: u64,
    block: u64,
}

pub struct SimLedger {
    fee_bps: u32,
    state: Mutex<SimState>,
}

impl SimLedger {
    pub fn new(fee_bps: u32) -> Self {
        SimLedger {
            fee_bps,
            state: Mutex::new(SimState::default()),
        }
    }

    /// Sign and broadcast `call` from `from`. Returns the tx hash whether the
    /// call succeeds or reverts, like a wallet would.
    pub fn send(&self, from: &str, call: EscrowCall, value: Wei) -> String {
        self.send_at(from, call, value, chrono::Utc::now().timestamp())
    }

    /// Like [`send`](Self::send) with an explicit block timestamp.
    pub fn send_at(&self, from: &str, call: EscrowCall, value: Wei, block_ts: i64) -> String {
        let mut st = self.state.lock().expect("sim ledger poisoned");
        st.next_tx += 1;
        st.block += 1;
        let hash = format!("0x{:064x}", st.next_tx);
        let from = from.to_ascii_lowercase();

        let status = match execute(&mut st, self.fee_bps, &from, &call, value, block_ts) {
            Ok(events) => TxStatus::Confirmed(ConfirmedTx {
                hash: hash.clone(),
                from,
                to: ESCROW.to_string(),
                value,
                call,
                block_number: st.block,
                block_timestamp: block_ts,
                events,
            }),
            Err(reason) => TxStatus::Failed(reason),
        };
        st.txs.insert(hash.clone(), status);
        hash
    }

    /// Record `call` as confirmed without running the escrow rules, as a
    /// contract with looser checks than the coordinator's would.
    pub fn force_confirm(&self, from: &str, call: EscrowCall, events: Vec<EscrowEvent>) -> String {
        let mut st = self.state.lock().expect("sim ledger poisoned");
        st.next_tx += 1;
        st.block += 1;
        let hash = format!("0x{:064x}", st.next_tx);
        let confirmed = ConfirmedTx {
            hash: hash.clone(),
            from: from.to_ascii_lowercase(),
            to: ESCROW.to_string(),
            value: Wei::ZERO,
            call,
            block_number: st.block,
            block_timestamp: chrono::Utc::now().timestamp(),
            events,
        };
        st.txs.insert(hash.clone(), TxStatus::Confirmed(confirmed));
        hash
    }

    /// Keep `hash` pending until [`release`](Self::release).
    pub fn hold(&self, hash: &str) {
        let mut st = self.state.lock().expect("sim ledger poisoned");
        if let Some(status) = st.txs.remove(hash) {
            st.held.insert(hash.to_string(), status);
        }
    }

    pub fn release(&self, hash: &str) {
        let mut st = self.state.lock().expect("sim ledger poisoned");
        if let Some(status) = st.held.remove(hash) {
            st.txs.insert(hash.to_string(), status);
        }
    }

    /// Overwrite the on-chain amount of a bounty, to provoke divergence.
    pub fn tamper_amount(&self, onchain_id: u64, amount: Wei) {
        let mut st = self.state.lock().expect("sim ledger poisoned");
        if let Some(b) = st.bounties.get_mut(onchain_id as usize) {
            b.amount = amount;
        }
    }
}

fn execute(
    st: &mut SimState,
    fee_bps: u32,
    from: &str,
    call: &EscrowCall,
    value: Wei,
    now: i64,
) -> std::result::Result<Vec<EscrowEvent>, String> {
    let now = now as u64;
    match call {
        EscrowCall::CreateBounty {
            amount,
            deadline,
            metadata_hash,
        } => {
            let required = amount.with_fee(fee_bps).map_err(|e| e.to_string())?;
            if amount.is_zero() || value < required {
                return Err("insufficient value".into());
            }
            if *deadline <= now {
                return Err("deadline in the past".into());
            }
            let id = st.bounties.len() as u64;
            st.bounties.push(OnChainBounty {
                creator: from.to_string(),
                amount: *amount,
                deadline: *deadline,
                status: STATUS_ACTIVE,
                winner: to_hex(&[0u8; 20]),
                metadata_hash: to_hex(metadata_hash),
                created_at: now,
                submission_count: 0,
            });
            Ok(vec![EscrowEvent::BountyCreated {
                bounty_id: id,
                creator: from.to_string(),
                amount: *amount,
                deadline: *deadline,
                metadata_hash: to_hex(metadata_hash),
            }])
        }
        EscrowCall::SubmitWork {
            bounty_id,
            content_hash,
        } => {
            let b = st
                .bounties
                .get_mut(*bounty_id as usize)
                .ok_or("unknown bounty")?;
            if b.status != STATUS_ACTIVE || now >= b.deadline {
                return Err("bounty not open".into());
            }
            b.submission_count += 1;
            let submission_id = st.submissions.len() as u64;
            st.submissions.push((*bounty_id, from.to_string()));
            Ok(vec![EscrowEvent::SubmissionCreated {
                bounty_id: *bounty_id,
                submission_id,
                submitter: from.to_string(),
                content_hash: to_hex(content_hash),
            }])
        }
        EscrowCall::SelectWinner {
            bounty_id,
            submission_id,
        } => {
            let (sub_bounty, submitter) = st
                .submissions
                .get(*submission_id as usize)
                .cloned()
                .ok_or("unknown submission")?;
            let b = st
                .bounties
                .get_mut(*bounty_id as usize)
                .ok_or("unknown bounty")?;
            if b.creator != from {
                return Err("only creator".into());
            }
            if b.status != STATUS_ACTIVE || sub_bounty != *bounty_id {
                return Err("cannot select winner".into());
            }
            b.status = STATUS_COMPLETED;
            b.winner = submitter.clone();
            Ok(vec![EscrowEvent::WinnerSelected {
                bounty_id: *bounty_id,
                submission_id: *submission_id,
                winner: submitter,
                amount: b.amount,
            }])
        }
        EscrowCall::CancelBounty { bounty_id } => {
            let b = st
                .bounties
                .get_mut(*bounty_id as usize)
                .ok_or("unknown bounty")?;
            if b.creator != from || b.status != STATUS_ACTIVE {
                return Err("cannot cancel".into());
            }
            b.status = STATUS_CANCELLED;
            Ok(Vec::new())
        }
        EscrowCall::ClaimRefund { bounty_id } => {
            let b = st
                .bounties
                .get(*bounty_id as usize)
                .ok_or("unknown bounty")?;
            let refundable = b.status == STATUS_CANCELLED
                || (b.status == STATUS_ACTIVE && now >= b.deadline);
            if b.creator != from || !refundable || st.refunded.contains(bounty_id) {
                return Err("cannot refund".into());
            }
            st.refunded.insert(*bounty_id);
            Ok(Vec::new())
        }
    }
}

impl EscrowLedger for SimLedger {
    async fn tx_status(&self, tx_hash: &str) -> Result<TxStatus> {
        let st = self.state.lock().expect("sim ledger poisoned");
        Ok(st.txs.get(tx_hash).cloned().unwrap_or(TxStatus::Pending))
    }

    async fn bounty(&self, onchain_id: u64) -> Result<OnChainBounty> {
        let st = self.state.lock().expect("sim ledger poisoned");
        st.bounties
            .get(onchain_id as usize)
            .cloned()
            .ok_or_else(|| CoordinatorError::Rpc(format!("escrow has no bounty {onchain_id}")))
    }

    fn escrow_address(&self) -> &str {
        ESCROW
    }
}
