//! # Bounty lifecycle
//!
//! ```text
//! (pending create) ──► ACTIVE ──► COMPLETED
//!                        │
//!                        ├──────► CANCELLED
//!                        │
//!                        └ ─ ─ ─► EXPIRED   (read-time only)
//! ```
//!
//! `EXPIRED` is never written: an `ACTIVE` row whose deadline has passed is
//! classified as expired when read. It blocks new submissions and opens the
//! refund path, but the creator can still select a winner until a refund has
//! been claimed.
//!
//! Every guard here is pure; the database layer re-runs the relevant ones
//! inside the transaction that applies the mirror so a stale read cannot slip
//! a transition through.

use std::time::Duration;

use crate::amount::Wei;
use crate::errors::{CoordinatorError, Result};
use crate::model::BountyStatus;

/// A confirmed ledger operation, as seen by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    CreateConfirmed,
    WinnerSelected,
    CancelConfirmed,
    RefundConfirmed,
}

/// Read-time classification of a stored status.
pub fn effective_status(stored: BountyStatus, deadline: i64, now: i64) -> BountyStatus {
    if stored == BountyStatus::Active && now >= deadline {
        BountyStatus::Expired
    } else {
        stored
    }
}

/// Stored status after `event`, or a conflict if the event is not allowed
/// from `stored`. `None` means "no bounty row yet".
pub fn next_status(
    bounty_id: i64,
    stored: Option<BountyStatus>,
    event: LifecycleEvent,
) -> Result<BountyStatus> {
    use BountyStatus::*;
    use LifecycleEvent::*;

    match (stored, event) {
        (None, CreateConfirmed) => Ok(Active),
        (Some(_), CreateConfirmed) => Err(CoordinatorError::StateConflict(format!(
            "bounty {bounty_id} already exists"
        ))),
        (None, _) => Err(CoordinatorError::BountyNotFound(bounty_id)),
        (Some(Active), WinnerSelected) => Ok(Completed),
        (Some(Active), CancelConfirmed) => Ok(Cancelled),
        // Refunds move funds, not status.
        (Some(s @ (Active | Cancelled)), RefundConfirmed) => Ok(s),
        (Some(status), _) => Err(CoordinatorError::BountyNotActive { bounty_id, status }),
    }
}

/// Guard for the `create confirmed` transition: a positive amount and a
/// deadline beyond `confirmed_at + min_lead`.
pub fn check_creation(amount: Wei, deadline: i64, confirmed_at: i64, min_lead: Duration) -> Result<()> {
    if amount.is_zero() {
        return Err(CoordinatorError::Validation(
            "bounty amount must be greater than zero".to_string(),
        ));
    }
    if deadline <= confirmed_at + min_lead.as_secs() as i64 {
        return Err(CoordinatorError::Validation(format!(
            "deadline {deadline} does not leave the minimum lead time after {confirmed_at}"
        )));
    }
    Ok(())
}

/// Submissions are accepted only while the bounty is ACTIVE and strictly
/// before its deadline.
pub fn check_submission_gate(
    bounty_id: i64,
    stored: BountyStatus,
    deadline: i64,
    at: i64,
) -> Result<()> {
    if stored != BountyStatus::Active {
        return Err(CoordinatorError::BountyNotActive {
            bounty_id,
            status: stored,
        });
    }
    if at >= deadline {
        return Err(CoordinatorError::DeadlinePassed { bounty_id });
    }
    Ok(())
}

/// Refund guard. Cancelled bounties are refundable at once; an expired one
/// only after the grace period that follows its deadline.
pub fn check_refundable(
    bounty_id: i64,
    stored: BountyStatus,
    deadline: i64,
    at: i64,
    grace: Duration,
    already_refunded: bool,
) -> Result<()> {
    if already_refunded {
        return Err(CoordinatorError::StateConflict(format!(
            "bounty {bounty_id} has already been refunded"
        )));
    }
    match effective_status(stored, deadline, at) {
        BountyStatus::Cancelled => Ok(()),
        BountyStatus::Expired if at >= deadline + grace.as_secs() as i64 => Ok(()),
        BountyStatus::Expired => Err(CoordinatorError::StateConflict(format!(
            "bounty {bounty_id} is still inside its refund grace period"
        ))),
        status => Err(CoordinatorError::BountyNotActive { bounty_id, status }),
    }
}
