//! Boundary validation. Everything here runs before the ledger is touched.

use crate::amount::Wei;
use crate::config::Policy;
use crate::errors::{CoordinatorError, Result};
use crate::model::{BountyDraft, CreateBountyRecord, CreateSubmissionRecord};

const TITLE_LEN: (usize, usize) = (5, 100);
const BOUNTY_DESCRIPTION_LEN: (usize, usize) = (10, 1000);
const SUBMISSION_DESCRIPTION_MAX: usize = 500;

/// Validate and lowercase a `0x`-prefixed 20-byte address.
pub fn address(raw: &str) -> Result<String> {
    hex_string(raw, 20, "address")
}

/// Validate and lowercase a `0x`-prefixed 32-byte transaction hash.
pub fn tx_hash(raw: &str) -> Result<String> {
    hex_string(raw, 32, "transaction hash")
}

/// Validate and lowercase a `0x`-prefixed `bytes32` value.
pub fn bytes32(raw: &str) -> Result<String> {
    hex_string(raw, 32, "bytes32 value")
}

fn hex_string(raw: &str, len: usize, what: &str) -> Result<String> {
    let body = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .ok_or_else(|| CoordinatorError::Validation(format!("{what} must start with 0x")))?;
    if body.len() != len * 2 || !body.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(CoordinatorError::Validation(format!(
            "malformed {what}: {raw}"
        )));
    }
    Ok(format!("0x{}", body.to_ascii_lowercase()))
}

fn text_len(field: &str, value: &str, (min, max): (usize, usize)) -> Result<()> {
    let len = value.trim().chars().count();
    if len < min || len > max {
        return Err(CoordinatorError::Validation(format!(
            "{field} must be between {min} and {max} characters"
        )));
    }
    Ok(())
}

fn fid(value: i64) -> Result<()> {
    if value <= 0 {
        return Err(CoordinatorError::Validation(format!("invalid fid: {value}")));
    }
    Ok(())
}

/// Amount bounds from deployment policy.
pub fn amount_in_policy(amount: Wei, policy: &Policy) -> Result<()> {
    if amount < policy.min_bounty_amount || amount > policy.max_bounty_amount {
        return Err(CoordinatorError::Validation(format!(
            "amount {} ETH outside allowed range {}..={} ETH",
            amount.to_eth_string(),
            policy.min_bounty_amount.to_eth_string(),
            policy.max_bounty_amount.to_eth_string()
        )));
    }
    Ok(())
}

/// Deadline must leave at least the minimum lead time and stay within the horizon.
pub fn deadline_in_policy(deadline: i64, now: i64, policy: &Policy) -> Result<()> {
    let earliest = now + policy.min_deadline_lead.as_secs() as i64;
    let latest = now + policy.max_deadline_horizon.as_secs() as i64;
    if deadline <= earliest {
        return Err(CoordinatorError::Validation(format!(
            "deadline must be more than {}s in the future",
            policy.min_deadline_lead.as_secs()
        )));
    }
    if deadline > latest {
        return Err(CoordinatorError::Validation(format!(
            "deadline must be within {}s from now",
            policy.max_deadline_horizon.as_secs()
        )));
    }
    Ok(())
}

/// Full validation of a draft. Returns the parsed amount, normalized creator
/// address and metadata hash.
pub fn draft(draft: &BountyDraft, now: i64, policy: &Policy) -> Result<(Wei, String, String)> {
    text_len("title", &draft.title, TITLE_LEN)?;
    text_len("description", &draft.description, BOUNTY_DESCRIPTION_LEN)?;
    fid(draft.creator_fid)?;
    let creator = address(&draft.creator_address)?;
    let metadata_hash = bytes32(&draft.metadata_hash)?;
    let amount = Wei::from_eth_str(&draft.amount)?;
    amount_in_policy(amount, policy)?;
    deadline_in_policy(draft.deadline.timestamp(), now, policy)?;
    Ok((amount, creator, metadata_hash))
}

pub fn bounty_record(input: &CreateBountyRecord) -> Result<String> {
    text_len("title", &input.title, TITLE_LEN)?;
    text_len("description", &input.description, BOUNTY_DESCRIPTION_LEN)?;
    fid(input.creator_fid)?;
    tx_hash(&input.tx_hash)
}

/// Returns the normalized submitter address and optional tx hash.
pub fn submission_record(input: &CreateSubmissionRecord) -> Result<(String, Option<String>)> {
    fid(input.submitter_fid)?;
    let submitter = address(&input.submitter_address)?;
    if let Some(desc) = &input.description {
        if desc.chars().count() > SUBMISSION_DESCRIPTION_MAX {
            return Err(CoordinatorError::Validation(format!(
                "description must be at most {SUBMISSION_DESCRIPTION_MAX} characters"
            )));
        }
    }
    if let Some(url) = &input.external_url {
        let ok = (url.starts_with("https://") || url.starts_with("http://"))
            && url.len() > "https://".len()
            && !url.chars().any(char::is_whitespace);
        if !ok {
            return Err(CoordinatorError::Validation(format!(
                "externalUrl is not a valid URL: {url}"
            )));
        }
    }
    if input.external_url.is_none() && input.description.is_none() && input.content_ipfs.is_none()
    {
        return Err(CoordinatorError::Validation(
            "a submission needs a URL, a description or content".to_string(),
        ));
    }
    let hash = input.tx_hash.as_deref().map(tx_hash).transpose()?;
    Ok((submitter, hash))
}
