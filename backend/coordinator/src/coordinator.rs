//! Bounty lifecycle coordination.
//!
//! Wallets sign and broadcast escrow calls; the coordinator prepares the
//! calldata, waits for the resulting transaction to confirm, checks it
//! against the off-chain ledger and mirrors its effect. Amounts, deadlines
//! and the acting address always come from the confirmed transaction, never
//! from the request that reports it.
//!
//! Every mirror is keyed by its transaction hash, so reporting the same hash
//! twice is harmless: the second call returns what the first one recorded.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::amount::Wei;
use crate::config::{ConfirmationConfig, Policy};
use crate::db::{self, Mirror, NewBounty, NewSubmission, TxMeta};
use crate::errors::{CoordinatorError, Result};
use crate::ledger::abi;
use crate::ledger::{ConfirmedTx, EscrowCall, EscrowEvent, EscrowLedger, OnChainBounty, TxPhase, TxStatus};
use crate::lifecycle;
use crate::model::{
    Bounty, BountyDraft, BountyFilter, BountyPage, BountyRow, BountyStatus, CreateBountyRecord,
    CreateSubmissionRecord, LedgerTxRecord, Submission, SubmissionDraft, TransactionRecord, User,
    WinnerSelectionRecord,
};
use crate::validate;

// ─────────────────────────────────────────────────────────
// Prepared calls
// ─────────────────────────────────────────────────────────

/// Unsigned escrow call for the wallet to sign and broadcast.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedCall {
    pub function: &'static str,
    pub to: String,
    pub data: String,
    /// Wei to attach to the transaction.
    pub value: Wei,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedBounty {
    pub call: PreparedCall,
    pub amount: Wei,
    pub platform_fee: Wei,
}

// ─────────────────────────────────────────────────────────
// Reconciliation
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Divergence {
    pub field: &'static str,
    pub off_chain: String,
    pub on_chain: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconciliation {
    pub bounty_id: i64,
    pub onchain_id: i64,
    pub on_chain: OnChainBounty,
    pub divergences: Vec<Divergence>,
    pub consistent: bool,
}

/// Status codes of the escrow's `getBounty` view.
fn onchain_status(code: u8) -> Option<BountyStatus> {
    match code {
        0 => Some(BountyStatus::Active),
        1 => Some(BountyStatus::Completed),
        2 => Some(BountyStatus::Cancelled),
        _ => None,
    }
}

fn now() -> i64 {
    Utc::now().timestamp()
}

// ─────────────────────────────────────────────────────────
// Coordinator
// ─────────────────────────────────────────────────────────

pub struct Coordinator<L> {
    pool: SqlitePool,
    ledger: Arc<L>,
    policy: Policy,
    confirmation: ConfirmationConfig,
    shutdown: CancellationToken,
}

impl<L> Clone for Coordinator<L> {
    fn clone(&self) -> Self {
        Coordinator {
            pool: self.pool.clone(),
            ledger: Arc::clone(&self.ledger),
            policy: self.policy.clone(),
            confirmation: self.confirmation.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<L: EscrowLedger> Coordinator<L> {
    pub fn new(
        pool: SqlitePool,
        ledger: Arc<L>,
        policy: Policy,
        confirmation: ConfirmationConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Coordinator {
            pool,
            ledger,
            policy,
            confirmation,
            shutdown,
        }
    }

    // ─── Confirmation ─────────────────────────────────────

    /// Drive a submitted transaction to `Confirmed` or `Failed`. Polls the
    /// ledger until the configured timeout or shutdown; any other phase is
    /// returned unchanged.
    pub async fn await_confirmation(&self, phase: TxPhase) -> TxPhase {
        let TxPhase::Submitted(tx_hash) = phase else {
            return phase;
        };
        let deadline = tokio::time::Instant::now() + self.confirmation.timeout;
        let failed = |reason: String| TxPhase::Failed {
            tx_hash: Some(tx_hash.clone()),
            reason,
        };

        loop {
            let status = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    return failed("shutting down before confirmation".to_string());
                }
                _ = tokio::time::sleep_until(deadline) => {
                    return failed(format!(
                        "not confirmed within {}s; retry with the same hash",
                        self.confirmation.timeout.as_secs()
                    ));
                }
                status = self.ledger.tx_status(&tx_hash) => status,
            };

            match status {
                Ok(TxStatus::Confirmed(tx)) => {
                    debug!("{tx_hash} confirmed in block {}", tx.block_number);
                    return TxPhase::Confirmed(tx);
                }
                Ok(TxStatus::Failed(reason)) => {
                    warn!("{tx_hash} failed on the ledger: {reason}");
                    return failed(reason);
                }
                Ok(TxStatus::Pending) => debug!("{tx_hash} still pending"),
                Err(e) => warn!("Status lookup for {tx_hash} failed: {e}"),
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    return failed("shutting down before confirmation".to_string());
                }
                _ = tokio::time::sleep_until(deadline) => {
                    return failed(format!(
                        "not confirmed within {}s; retry with the same hash",
                        self.confirmation.timeout.as_secs()
                    ));
                }
                _ = tokio::time::sleep(self.confirmation.poll_interval) => {}
            }
        }
    }

    async fn confirm(&self, tx_hash: &str) -> Result<ConfirmedTx> {
        match self
            .await_confirmation(TxPhase::Submitted(tx_hash.to_string()))
            .await
        {
            TxPhase::Confirmed(tx) => Ok(tx),
            TxPhase::Failed { tx_hash, reason } => {
                Err(CoordinatorError::LedgerTransactionFailed { tx_hash, reason })
            }
            TxPhase::Idle | TxPhase::Submitted(_) => Err(CoordinatorError::LedgerTransactionFailed {
                tx_hash: Some(tx_hash.to_string()),
                reason: "transaction did not reach a final state".to_string(),
            }),
        }
    }

    /// A database failure after the ledger confirmed is not a plain error:
    /// the chain has moved and the mirror must be retried.
    fn after_confirmation(&self, tx_hash: &str, err: CoordinatorError) -> CoordinatorError {
        match err {
            CoordinatorError::Database(source) => {
                error!("{tx_hash} confirmed but mirroring failed: {source}");
                CoordinatorError::PersistenceFailure {
                    tx_hash: tx_hash.to_string(),
                    source,
                }
            }
            other => other,
        }
    }

    fn prepared(&self, call: EscrowCall, value: Wei) -> PreparedCall {
        PreparedCall {
            function: call.name(),
            to: self.ledger.escrow_address().to_string(),
            data: abi::to_hex(&abi::encode_call(&call)),
            value,
        }
    }

    async fn bounty_row(&self, bounty_id: i64) -> Result<BountyRow> {
        db::get_bounty(&self.pool, bounty_id)
            .await?
            .ok_or(CoordinatorError::BountyNotFound(bounty_id))
    }

    async fn bounty_after_mirror(&self, bounty_id: i64, tx_hash: &str) -> Result<Bounty> {
        self.bounty_row(bounty_id)
            .await
            .and_then(|row| row.into_bounty(now()))
            .map_err(|e| self.after_confirmation(tx_hash, e))
    }

    fn unexpected_call(tx: &ConfirmedTx, expected: &str) -> CoordinatorError {
        CoordinatorError::Validation(format!(
            "transaction {} is a {} call, not {expected}",
            tx.hash,
            tx.call.name()
        ))
    }

    fn missing_event(tx: &ConfirmedTx, event: &str) -> CoordinatorError {
        CoordinatorError::LedgerTransactionFailed {
            tx_hash: Some(tx.hash.clone()),
            reason: format!("confirmed {} emitted no {event} event", tx.call.name()),
        }
    }

    fn require_creator(tx: &ConfirmedTx, bounty: &BountyRow, action: &str) -> Result<()> {
        if tx.from != bounty.creator_address {
            return Err(CoordinatorError::Unauthorized(format!(
                "only the creator of bounty {} can {action}",
                bounty.id
            )));
        }
        Ok(())
    }

    fn require_onchain_bounty(tx: &ConfirmedTx, chain_bounty: u64, bounty: &BountyRow) -> Result<()> {
        if chain_bounty as i64 != bounty.onchain_id {
            return Err(CoordinatorError::Validation(format!(
                "transaction {} targets on-chain bounty {chain_bounty}, bounty {} is on-chain bounty {}",
                tx.hash, bounty.id, bounty.onchain_id
            )));
        }
        Ok(())
    }

    // ─── Prepare (calldata for the wallet) ────────────────

    /// Validate a draft against deployment policy and build the funded
    /// `createBounty` call. Nothing is recorded until the wallet's
    /// transaction confirms.
    pub async fn prepare_bounty(&self, draft: &BountyDraft) -> Result<PreparedBounty> {
        let (amount, creator, metadata_hash) = validate::draft(draft, now(), &self.policy)?;
        let platform_fee = amount.fee(self.policy.platform_fee_bps)?;
        let value = amount.with_fee(self.policy.platform_fee_bps)?;
        let call = EscrowCall::CreateBounty {
            amount,
            deadline: draft.deadline.timestamp() as u64,
            metadata_hash: abi::bytes32_from_hex(&metadata_hash)?,
        };
        info!(
            "Prepared createBounty for {creator}: {} ETH + {} ETH fee",
            amount.to_eth_string(),
            platform_fee.to_eth_string()
        );
        Ok(PreparedBounty {
            call: self.prepared(call, value),
            amount,
            platform_fee,
        })
    }

    pub async fn prepare_submission(
        &self,
        bounty_id: i64,
        draft: &SubmissionDraft,
    ) -> Result<PreparedCall> {
        let content_hash = abi::bytes32_from_hex(&validate::bytes32(&draft.content_hash)?)?;
        let bounty = self.bounty_row(bounty_id).await?;
        lifecycle::check_submission_gate(bounty.id, bounty.stored_status()?, bounty.deadline, now())?;
        Ok(self.prepared(
            EscrowCall::SubmitWork {
                bounty_id: bounty.onchain_id as u64,
                content_hash,
            },
            Wei::ZERO,
        ))
    }

    pub async fn prepare_winner_selection(
        &self,
        bounty_id: i64,
        submission_id: i64,
    ) -> Result<PreparedCall> {
        let bounty = self.bounty_row(bounty_id).await?;
        let stored = bounty.stored_status()?;
        lifecycle::next_status(bounty.id, Some(stored), lifecycle::LifecycleEvent::WinnerSelected)?;
        let submission = db::get_submission(&self.pool, submission_id)
            .await?
            .ok_or(CoordinatorError::SubmissionNotFound(submission_id))?;
        if submission.bounty_id != bounty.id {
            return Err(CoordinatorError::Validation(format!(
                "submission {submission_id} does not belong to bounty {bounty_id}"
            )));
        }
        let onchain_submission = submission.onchain_id.ok_or_else(|| {
            CoordinatorError::Validation(format!(
                "submission {submission_id} was not made through the escrow"
            ))
        })?;
        Ok(self.prepared(
            EscrowCall::SelectWinner {
                bounty_id: bounty.onchain_id as u64,
                submission_id: onchain_submission as u64,
            },
            Wei::ZERO,
        ))
    }

    pub async fn prepare_cancel(&self, bounty_id: i64) -> Result<PreparedCall> {
        let bounty = self.bounty_row(bounty_id).await?;
        lifecycle::next_status(
            bounty.id,
            Some(bounty.stored_status()?),
            lifecycle::LifecycleEvent::CancelConfirmed,
        )?;
        Ok(self.prepared(
            EscrowCall::CancelBounty {
                bounty_id: bounty.onchain_id as u64,
            },
            Wei::ZERO,
        ))
    }

    pub async fn prepare_refund(&self, bounty_id: i64) -> Result<PreparedCall> {
        let bounty = self.bounty_row(bounty_id).await?;
        let refunded = db::list_transactions(&self.pool, bounty_id)
            .await?
            .iter()
            .any(|t| t.kind == "REFUND_CLAIMED");
        lifecycle::check_refundable(
            bounty.id,
            bounty.stored_status()?,
            bounty.deadline,
            now(),
            self.policy.refund_grace_period,
            refunded,
        )?;
        Ok(self.prepared(
            EscrowCall::ClaimRefund {
                bounty_id: bounty.onchain_id as u64,
            },
            Wei::ZERO,
        ))
    }

    // ─── Mirror confirmed transactions ────────────────────

    /// Mirror a wallet-signed `createBounty`. Amount, deadline, metadata
    /// hash and creator address are taken from the confirmed transaction.
    pub async fn create_bounty_record(&self, input: CreateBountyRecord) -> Result<Mirror<Bounty>> {
        let tx_hash = validate::bounty_record(&input)?;

        if let Some(existing) = db::get_bounty_by_creation_tx(&self.pool, &tx_hash).await? {
            debug!("{tx_hash} already mirrored as bounty {}", existing.id);
            return Ok(Mirror::AlreadyApplied(existing.into_bounty(now())?));
        }

        let tx = self.confirm(&tx_hash).await?;
        let EscrowCall::CreateBounty {
            amount,
            deadline,
            metadata_hash,
        } = tx.call
        else {
            return Err(Self::unexpected_call(&tx, "createBounty"));
        };
        let (onchain_id, locked) = tx
            .events
            .iter()
            .find_map(|e| match e {
                EscrowEvent::BountyCreated {
                    bounty_id, amount, ..
                } => Some((*bounty_id, *amount)),
                _ => None,
            })
            .ok_or_else(|| Self::missing_event(&tx, "BountyCreated"))?;
        if locked != amount {
            return Err(CoordinatorError::LedgerTransactionFailed {
                tx_hash: Some(tx_hash.clone()),
                reason: format!(
                    "escrow locked {locked} wei but the call asked for {amount} wei"
                ),
            });
        }
        lifecycle::check_creation(amount, deadline as i64, tx.block_timestamp, Duration::ZERO)?;

        let bounty = NewBounty {
            onchain_id: onchain_id as i64,
            creator_fid: input.creator_fid,
            creator_address: tx.from.clone(),
            creator_username: input.creator_username,
            title: input.title,
            description: input.description,
            amount,
            deadline: deadline as i64,
            category: input.category,
            metadata_ipfs: input.metadata_ipfs,
            metadata_hash: abi::to_hex(&metadata_hash),
        };
        let meta = TxMeta {
            tx_hash: tx_hash.clone(),
            block_number: tx.block_number as i64,
        };

        let outcome = db::mirror_bounty_created(&self.pool, &bounty, &meta, now())
            .await
            .map_err(|e| self.after_confirmation(&tx_hash, e))?;
        let id = outcome.into_inner();
        if outcome.is_applied() {
            info!(
                "Bounty {id} (on-chain {onchain_id}) created by {} for {} ETH",
                tx.from,
                amount.to_eth_string()
            );
        }

        let record = self.bounty_after_mirror(id, &tx_hash).await?;
        Ok(match outcome {
            Mirror::Applied(_) => Mirror::Applied(record),
            Mirror::AlreadyApplied(_) => Mirror::AlreadyApplied(record),
        })
    }

    /// Record a submission. With a transaction hash the submission mirrors a
    /// confirmed `submitWork` and is gated on its block time; without one it
    /// is a direct, off-chain-only submission gated on the server clock.
    pub async fn create_submission_record(
        &self,
        input: CreateSubmissionRecord,
    ) -> Result<Mirror<Submission>> {
        let (submitter, tx_hash) = validate::submission_record(&input)?;
        let mut submission = NewSubmission {
            bounty_id: input.bounty_id,
            onchain_id: None,
            submitter_fid: input.submitter_fid,
            submitter_address: submitter,
            submitter_username: input.submitter_username,
            content_ipfs: input.content_ipfs,
            external_url: input.external_url,
            description: input.description,
        };

        let Some(tx_hash) = tx_hash else {
            let at = now();
            let id = db::mirror_submission_created(&self.pool, &submission, None, at, at)
                .await?
                .into_inner();
            info!("Direct submission {id} to bounty {}", input.bounty_id);
            return Ok(Mirror::Applied(self.submission(id).await?));
        };

        let bounty = self.bounty_row(input.bounty_id).await?;
        let tx = self.confirm(&tx_hash).await?;
        let EscrowCall::SubmitWork {
            bounty_id: chain_bounty,
            ..
        } = tx.call
        else {
            return Err(Self::unexpected_call(&tx, "submitWork"));
        };
        Self::require_onchain_bounty(&tx, chain_bounty, &bounty)?;
        let onchain_id = tx
            .events
            .iter()
            .find_map(|e| match e {
                EscrowEvent::SubmissionCreated {
                    bounty_id,
                    submission_id,
                    ..
                } if *bounty_id == chain_bounty => Some(*submission_id as i64),
                _ => None,
            })
            .ok_or_else(|| Self::missing_event(&tx, "SubmissionCreated"))?;
        submission.onchain_id = Some(onchain_id);
        submission.submitter_address = tx.from.clone();

        let meta = TxMeta {
            tx_hash: tx_hash.clone(),
            block_number: tx.block_number as i64,
        };
        let outcome = db::mirror_submission_created(
            &self.pool,
            &submission,
            Some(&meta),
            tx.block_timestamp,
            now(),
        )
        .await
        .map_err(|e| self.after_confirmation(&tx_hash, e))?;

        let record = self
            .submission(outcome.into_inner())
            .await
            .map_err(|e| self.after_confirmation(&tx_hash, e))?;
        Ok(match outcome {
            Mirror::Applied(_) => {
                info!("Submission {} to bounty {} by {}", record.id, bounty.id, tx.from);
                Mirror::Applied(record)
            }
            Mirror::AlreadyApplied(_) => Mirror::AlreadyApplied(record),
        })
    }

    /// Mirror a confirmed `selectWinner`. The signer must be the creator the
    /// ledger recorded for this bounty.
    pub async fn record_winner_selection(
        &self,
        bounty_id: i64,
        input: WinnerSelectionRecord,
    ) -> Result<Mirror<Bounty>> {
        let tx_hash = validate::tx_hash(&input.tx_hash)?;
        let bounty = self.bounty_row(bounty_id).await?;
        let submission = db::get_submission(&self.pool, input.submission_id)
            .await?
            .ok_or(CoordinatorError::SubmissionNotFound(input.submission_id))?;
        if submission.bounty_id != bounty.id {
            return Err(CoordinatorError::Validation(format!(
                "submission {} does not belong to bounty {bounty_id}",
                submission.id
            )));
        }
        let onchain = submission.onchain_id.ok_or_else(|| {
            CoordinatorError::Validation(format!(
                "submission {} was not made through the escrow and cannot win",
                submission.id
            ))
        })?;

        let tx = self.confirm(&tx_hash).await?;
        let EscrowCall::SelectWinner {
            bounty_id: chain_bounty,
            submission_id: chain_submission,
        } = tx.call
        else {
            return Err(Self::unexpected_call(&tx, "selectWinner"));
        };
        Self::require_onchain_bounty(&tx, chain_bounty, &bounty)?;
        if onchain != chain_submission as i64 {
            return Err(CoordinatorError::Validation(format!(
                "transaction {tx_hash} selects on-chain submission {chain_submission}, \
                 submission {} is on-chain submission {onchain}",
                submission.id
            )));
        }
        Self::require_creator(&tx, &bounty, "select a winner")?;

        // The payout the escrow made must be the one about to be recorded.
        let (paid_to, paid) = tx
            .events
            .iter()
            .find_map(|e| match e {
                EscrowEvent::WinnerSelected {
                    bounty_id,
                    submission_id,
                    winner,
                    amount,
                } if *bounty_id == chain_bounty && *submission_id == chain_submission => {
                    Some((winner.as_str(), *amount))
                }
                _ => None,
            })
            .ok_or_else(|| Self::missing_event(&tx, "WinnerSelected"))?;
        if !paid_to.eq_ignore_ascii_case(&submission.submitter_address) {
            return Err(CoordinatorError::StateConflict(format!(
                "escrow paid {paid_to}, submission {} is by {}",
                submission.id, submission.submitter_address
            )));
        }
        let amount: Wei = bounty.amount_wei.parse()?;
        if paid != amount {
            return Err(CoordinatorError::StateConflict(format!(
                "escrow paid {paid} wei, bounty {} holds {amount} wei",
                bounty.id
            )));
        }

        let meta = TxMeta {
            tx_hash: tx_hash.clone(),
            block_number: tx.block_number as i64,
        };
        let outcome = db::mirror_winner_selected(
            &self.pool,
            bounty.id,
            submission.id,
            &meta,
            self.policy.reputation_per_win,
            now(),
        )
        .await
        .map_err(|e| self.after_confirmation(&tx_hash, e))?;
        if outcome.is_applied() {
            info!(
                "Bounty {} completed; winner {} (submission {})",
                bounty.id, submission.submitter_address, submission.id
            );
        }

        let record = self.bounty_after_mirror(bounty.id, &tx_hash).await?;
        Ok(match outcome {
            Mirror::Applied(_) => Mirror::Applied(record),
            Mirror::AlreadyApplied(_) => Mirror::AlreadyApplied(record),
        })
    }

    pub async fn cancel_bounty(&self, bounty_id: i64, input: LedgerTxRecord) -> Result<Mirror<Bounty>> {
        let tx_hash = validate::tx_hash(&input.tx_hash)?;
        let bounty = self.bounty_row(bounty_id).await?;

        let tx = self.confirm(&tx_hash).await?;
        let EscrowCall::CancelBounty {
            bounty_id: chain_bounty,
        } = tx.call
        else {
            return Err(Self::unexpected_call(&tx, "cancelBounty"));
        };
        Self::require_onchain_bounty(&tx, chain_bounty, &bounty)?;
        Self::require_creator(&tx, &bounty, "cancel it")?;

        let meta = TxMeta {
            tx_hash: tx_hash.clone(),
            block_number: tx.block_number as i64,
        };
        let outcome = db::mirror_bounty_cancelled(&self.pool, bounty.id, &meta, now())
            .await
            .map_err(|e| self.after_confirmation(&tx_hash, e))?;
        if outcome.is_applied() {
            info!("Bounty {} cancelled", bounty.id);
        }

        let record = self.bounty_after_mirror(bounty.id, &tx_hash).await?;
        Ok(match outcome {
            Mirror::Applied(_) => Mirror::Applied(record),
            Mirror::AlreadyApplied(_) => Mirror::AlreadyApplied(record),
        })
    }

    /// Mirror a confirmed `claimRefund`. Cancelled bounties refund at once;
    /// expired ones only once the grace period after the deadline has run,
    /// measured at the refund's block time.
    pub async fn claim_refund(
        &self,
        bounty_id: i64,
        input: LedgerTxRecord,
    ) -> Result<Mirror<TransactionRecord>> {
        let tx_hash = validate::tx_hash(&input.tx_hash)?;
        let bounty = self.bounty_row(bounty_id).await?;

        let tx = self.confirm(&tx_hash).await?;
        let EscrowCall::ClaimRefund {
            bounty_id: chain_bounty,
        } = tx.call
        else {
            return Err(Self::unexpected_call(&tx, "claimRefund"));
        };
        Self::require_onchain_bounty(&tx, chain_bounty, &bounty)?;
        Self::require_creator(&tx, &bounty, "claim its refund")?;

        let meta = TxMeta {
            tx_hash: tx_hash.clone(),
            block_number: tx.block_number as i64,
        };
        let outcome = db::mirror_refund_claimed(
            &self.pool,
            bounty.id,
            &meta,
            tx.block_timestamp,
            self.policy.refund_grace_period.as_secs() as i64,
            now(),
        )
        .await
        .map_err(|e| self.after_confirmation(&tx_hash, e))?;
        if outcome.is_applied() {
            info!("Refund of bounty {} to {}", bounty.id, tx.from);
        }

        let record = db::find_transaction(&self.pool, &tx_hash)
            .await
            .map_err(|e| self.after_confirmation(&tx_hash, e))?
            .ok_or_else(|| CoordinatorError::TransactionNotFound(tx_hash.clone()))?;
        let record = TransactionRecord::try_from(record)?;
        Ok(match outcome {
            Mirror::Applied(_) => Mirror::Applied(record),
            Mirror::AlreadyApplied(_) => Mirror::AlreadyApplied(record),
        })
    }

    // ─── Reads ────────────────────────────────────────────

    pub async fn get_bounty(&self, bounty_id: i64) -> Result<Bounty> {
        self.bounty_row(bounty_id).await?.into_bounty(now())
    }

    pub async fn list_bounties(&self, filter: &BountyFilter) -> Result<BountyPage> {
        let at = now();
        let (rows, total) = db::list_bounties(&self.pool, filter, at).await?;
        let bounties = rows
            .into_iter()
            .map(|row| row.into_bounty(at))
            .collect::<Result<Vec<_>>>()?;
        let (limit, offset) = (filter.limit(), filter.offset());
        Ok(BountyPage {
            has_more: offset + (bounties.len() as i64) < total,
            bounties,
            total,
            limit,
            offset,
        })
    }

    async fn submission(&self, submission_id: i64) -> Result<Submission> {
        db::get_submission(&self.pool, submission_id)
            .await?
            .map(Submission::from)
            .ok_or(CoordinatorError::SubmissionNotFound(submission_id))
    }

    pub async fn list_submissions(&self, bounty_id: i64) -> Result<Vec<Submission>> {
        self.bounty_row(bounty_id).await?;
        Ok(db::list_submissions(&self.pool, bounty_id)
            .await?
            .into_iter()
            .map(Submission::from)
            .collect())
    }

    pub async fn get_user(&self, fid: i64) -> Result<User> {
        db::get_user(&self.pool, fid)
            .await?
            .ok_or(CoordinatorError::UserNotFound(fid))?
            .try_into()
    }

    pub async fn list_transactions(&self, bounty_id: i64) -> Result<Vec<TransactionRecord>> {
        self.bounty_row(bounty_id).await?;
        db::list_transactions(&self.pool, bounty_id)
            .await?
            .into_iter()
            .map(TransactionRecord::try_from)
            .collect()
    }

    pub async fn get_transaction(&self, tx_hash: &str) -> Result<TransactionRecord> {
        let tx_hash = validate::tx_hash(tx_hash)?;
        db::find_transaction(&self.pool, &tx_hash)
            .await?
            .ok_or(CoordinatorError::TransactionNotFound(tx_hash))?
            .try_into()
    }

    /// Compare a mirrored bounty with the escrow's view of it.
    pub async fn reconcile_bounty(&self, bounty_id: i64) -> Result<Reconciliation> {
        let row = self.bounty_row(bounty_id).await?;
        let on_chain = self.ledger.bounty(row.onchain_id as u64).await?;
        let stored = row.stored_status()?;
        let amount: Wei = row.amount_wei.parse()?;
        let no_winner = abi::to_hex(&[0u8; 20]);

        let mut divergences = Vec::new();
        let mut check = |field: &'static str, off_chain: String, on_chain: String| {
            if off_chain != on_chain {
                divergences.push(Divergence {
                    field,
                    off_chain,
                    on_chain,
                });
            }
        };
        check("creator", row.creator_address.clone(), on_chain.creator.to_ascii_lowercase());
        check("amount", amount.to_string(), on_chain.amount.to_string());
        check("deadline", row.deadline.to_string(), on_chain.deadline.to_string());
        check(
            "status",
            stored.as_str().to_string(),
            onchain_status(on_chain.status)
                .map(|s| s.as_str().to_string())
                .unwrap_or_else(|| format!("UNKNOWN({})", on_chain.status)),
        );
        check(
            "winner",
            row.winner_address.clone().unwrap_or_else(|| no_winner.clone()),
            on_chain.winner.to_ascii_lowercase(),
        );
        check("metadataHash", row.metadata_hash.clone(), on_chain.metadata_hash.to_ascii_lowercase());

        for d in &divergences {
            warn!(
                "Bounty {bounty_id} diverges on {}: off-chain {} vs on-chain {}",
                d.field, d.off_chain, d.on_chain
            );
        }
        Ok(Reconciliation {
            bounty_id,
            onchain_id: row.onchain_id,
            consistent: divergences.is_empty(),
            divergences,
            on_chain,
        })
    }
}
