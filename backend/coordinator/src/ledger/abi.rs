//! Minimal ABI codec for the `BountyEscrow` contract.
//!
//! Only static types appear in the escrow interface (`uint256`, `address`,
//! `bytes32`, `uint8`), so every argument, return value and non-indexed event
//! field is a single 32-byte word and no dynamic offsets are involved.

use crate::amount::Wei;
use crate::errors::{CoordinatorError, Result};

use super::{EscrowCall, EscrowEvent, OnChainBounty};

const WORD: usize = 32;

// keccak256 of the canonical signatures, first four bytes.
pub const SELECTOR_CREATE_BOUNTY: [u8; 4] = [0xf5, 0x28, 0xa8, 0x14]; // createBounty(uint256,uint256,bytes32)
pub const SELECTOR_SUBMIT_WORK: [u8; 4] = [0x0a, 0x9e, 0xed, 0xed]; // submitWork(uint256,bytes32)
pub const SELECTOR_SELECT_WINNER: [u8; 4] = [0xe6, 0xfa, 0x02, 0x09]; // selectWinner(uint256,uint256)
pub const SELECTOR_CANCEL_BOUNTY: [u8; 4] = [0xe5, 0xe5, 0xdf, 0xf1]; // cancelBounty(uint256)
pub const SELECTOR_CLAIM_REFUND: [u8; 4] = [0x5b, 0x7b, 0xaf, 0x64]; // claimRefund(uint256)
pub const SELECTOR_GET_BOUNTY: [u8; 4] = [0xee, 0x8c, 0x4b, 0xbf]; // getBounty(uint256)

// Event topic0 values (full keccak256 of the event signature).
pub const TOPIC_BOUNTY_CREATED: &str =
    "0xd37a9da467464dc6d80f3c31886aa190d5c0f2048eaa8f4cd3a9b3b9c1a74f96";
pub const TOPIC_SUBMISSION_CREATED: &str =
    "0xa16a6f64dc627b3852f88297dcf8bd39c0d3c22f080df4885c8c66ff633a1caa";
pub const TOPIC_WINNER_SELECTED: &str =
    "0xb8639d96359347ee9c2450fb169ec40a1539570d38bca935b1e2a6fed3e694e4";

// ─────────────────────────────────────────────────────────
// Hex helpers
// ─────────────────────────────────────────────────────────

pub fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

pub fn from_hex(s: &str) -> Result<Vec<u8>> {
    let body = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(body).map_err(|e| CoordinatorError::Abi(format!("bad hex {s:?}: {e}")))
}

pub fn bytes32_from_hex(s: &str) -> Result<[u8; 32]> {
    from_hex(s)?
        .try_into()
        .map_err(|_| CoordinatorError::Abi(format!("expected 32 bytes: {s}")))
}

/// Parse a JSON-RPC quantity (`"0x1a"`).
pub fn quantity(s: &str) -> Result<u128> {
    let body = s.strip_prefix("0x").unwrap_or(s);
    if body.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(body, 16)
        .map_err(|e| CoordinatorError::Abi(format!("bad quantity {s:?}: {e}")))
}

pub fn to_quantity(v: u128) -> String {
    format!("0x{v:x}")
}

// ─────────────────────────────────────────────────────────
// Words
// ─────────────────────────────────────────────────────────

fn word_u128(v: u128) -> [u8; WORD] {
    let mut w = [0u8; WORD];
    w[16..].copy_from_slice(&v.to_be_bytes());
    w
}

fn read_u128(w: &[u8]) -> Result<u128> {
    if w[..16].iter().any(|b| *b != 0) {
        return Err(CoordinatorError::Abi("uint256 value exceeds 128 bits".into()));
    }
    let mut buf = [0u8; 16];
    buf.copy_from_slice(&w[16..WORD]);
    Ok(u128::from_be_bytes(buf))
}

fn read_u64(w: &[u8]) -> Result<u64> {
    u64::try_from(read_u128(w)?)
        .map_err(|_| CoordinatorError::Abi("uint256 value exceeds 64 bits".into()))
}

fn read_address(w: &[u8]) -> Result<String> {
    if w[..12].iter().any(|b| *b != 0) {
        return Err(CoordinatorError::Abi("address word has dirty high bytes".into()));
    }
    Ok(to_hex(&w[12..WORD]))
}

fn words(data: &[u8], expected: usize) -> Result<Vec<&[u8]>> {
    if data.len() < expected * WORD {
        return Err(CoordinatorError::Abi(format!(
            "expected {expected} words, got {} bytes",
            data.len()
        )));
    }
    Ok(data.chunks(WORD).take(expected).collect())
}

// ─────────────────────────────────────────────────────────
// Calls
// ─────────────────────────────────────────────────────────

pub fn encode_call(call: &EscrowCall) -> Vec<u8> {
    let (selector, args): ([u8; 4], Vec<[u8; WORD]>) = match call {
        EscrowCall::CreateBounty {
            amount,
            deadline,
            metadata_hash,
        } => (
            SELECTOR_CREATE_BOUNTY,
            vec![word_u128(amount.0), word_u128(*deadline as u128), *metadata_hash],
        ),
        EscrowCall::SubmitWork {
            bounty_id,
            content_hash,
        } => (
            SELECTOR_SUBMIT_WORK,
            vec![word_u128(*bounty_id as u128), *content_hash],
        ),
        EscrowCall::SelectWinner {
            bounty_id,
            submission_id,
        } => (
            SELECTOR_SELECT_WINNER,
            vec![word_u128(*bounty_id as u128), word_u128(*submission_id as u128)],
        ),
        EscrowCall::CancelBounty { bounty_id } => {
            (SELECTOR_CANCEL_BOUNTY, vec![word_u128(*bounty_id as u128)])
        }
        EscrowCall::ClaimRefund { bounty_id } => {
            (SELECTOR_CLAIM_REFUND, vec![word_u128(*bounty_id as u128)])
        }
    };

    let mut out = Vec::with_capacity(4 + args.len() * WORD);
    out.extend_from_slice(&selector);
    for w in args {
        out.extend_from_slice(&w);
    }
    out
}

/// Decode transaction input back into an [`EscrowCall`].
pub fn decode_call(input: &[u8]) -> Result<EscrowCall> {
    if input.len() < 4 {
        return Err(CoordinatorError::Abi("calldata shorter than a selector".into()));
    }
    let (selector, data) = input.split_at(4);
    let bytes32 = |w: &[u8]| -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&w[..WORD]);
        out
    };

    match <[u8; 4]>::try_from(selector).unwrap_or_default() {
        SELECTOR_CREATE_BOUNTY => {
            let w = words(data, 3)?;
            Ok(EscrowCall::CreateBounty {
                amount: Wei(read_u128(w[0])?),
                deadline: read_u64(w[1])?,
                metadata_hash: bytes32(w[2]),
            })
        }
        SELECTOR_SUBMIT_WORK => {
            let w = words(data, 2)?;
            Ok(EscrowCall::SubmitWork {
                bounty_id: read_u64(w[0])?,
                content_hash: bytes32(w[1]),
            })
        }
        SELECTOR_SELECT_WINNER => {
            let w = words(data, 2)?;
            Ok(EscrowCall::SelectWinner {
                bounty_id: read_u64(w[0])?,
                submission_id: read_u64(w[1])?,
            })
        }
        SELECTOR_CANCEL_BOUNTY => Ok(EscrowCall::CancelBounty {
            bounty_id: read_u64(words(data, 1)?[0])?,
        }),
        SELECTOR_CLAIM_REFUND => Ok(EscrowCall::ClaimRefund {
            bounty_id: read_u64(words(data, 1)?[0])?,
        }),
        other => Err(CoordinatorError::Abi(format!(
            "unknown selector {}",
            to_hex(&other)
        ))),
    }
}

pub fn encode_get_bounty(bounty_id: u64) -> Vec<u8> {
    let mut out = SELECTOR_GET_BOUNTY.to_vec();
    out.extend_from_slice(&word_u128(bounty_id as u128));
    out
}

/// Decode the static tuple returned by `getBounty`.
pub fn decode_bounty(data: &[u8]) -> Result<OnChainBounty> {
    let w = words(data, 8)?;
    let status = read_u128(w[3])?;
    Ok(OnChainBounty {
        creator: read_address(w[0])?,
        amount: Wei(read_u128(w[1])?),
        deadline: read_u64(w[2])?,
        status: u8::try_from(status)
            .map_err(|_| CoordinatorError::Abi("uint8 status out of range".into()))?,
        winner: read_address(w[4])?,
        metadata_hash: to_hex(w[5]),
        created_at: read_u64(w[6])?,
        submission_count: read_u64(w[7])?,
    })
}

// ─────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────

/// Decode one escrow log. Unknown topics yield `Ok(None)`.
pub fn decode_log(topics: &[String], data: &str) -> Result<Option<EscrowEvent>> {
    let Some(topic0) = topics.first() else {
        return Ok(None);
    };
    let topic = |i: usize| -> Result<Vec<u8>> {
        let t = topics
            .get(i)
            .ok_or_else(|| CoordinatorError::Abi(format!("missing topic {i}")))?;
        let raw = from_hex(t)?;
        if raw.len() != WORD {
            return Err(CoordinatorError::Abi(format!("topic {i} is not 32 bytes")));
        }
        Ok(raw)
    };
    let data = from_hex(data)?;

    let event = match topic0.to_ascii_lowercase().as_str() {
        TOPIC_BOUNTY_CREATED => {
            let w = words(&data, 3)?;
            EscrowEvent::BountyCreated {
                bounty_id: read_u64(&topic(1)?)?,
                creator: read_address(&topic(2)?)?,
                amount: Wei(read_u128(w[0])?),
                deadline: read_u64(w[1])?,
                metadata_hash: to_hex(w[2]),
            }
        }
        TOPIC_SUBMISSION_CREATED => {
            let w = words(&data, 1)?;
            EscrowEvent::SubmissionCreated {
                bounty_id: read_u64(&topic(1)?)?,
                submission_id: read_u64(&topic(2)?)?,
                submitter: read_address(&topic(3)?)?,
                content_hash: to_hex(w[0]),
            }
        }
        TOPIC_WINNER_SELECTED => {
            let w = words(&data, 1)?;
            EscrowEvent::WinnerSelected {
                bounty_id: read_u64(&topic(1)?)?,
                submission_id: read_u64(&topic(2)?)?,
                winner: read_address(&topic(3)?)?,
                amount: Wei(read_u128(w[0])?),
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(event))
}

/// Encode an event as `(topics, data)`, the shape found in a receipt log.
#[cfg(test)]
pub fn encode_log(event: &EscrowEvent) -> (Vec<String>, String) {
    let addr_word = |a: &str| -> [u8; WORD] {
        let mut w = [0u8; WORD];
        let raw = from_hex(a).unwrap_or_default();
        if raw.len() == 20 {
            w[12..].copy_from_slice(&raw);
        }
        w
    };
    let b32 = |h: &str| bytes32_from_hex(h).unwrap_or([0u8; 32]);

    let (topics, data): (Vec<[u8; WORD]>, Vec<[u8; WORD]>) = match event {
        EscrowEvent::BountyCreated {
            bounty_id,
            creator,
            amount,
            deadline,
            metadata_hash,
        } => (
            vec![
                bytes32_from_hex(TOPIC_BOUNTY_CREATED).unwrap_or_default(),
                word_u128(*bounty_id as u128),
                addr_word(creator),
            ],
            vec![word_u128(amount.0), word_u128(*deadline as u128), b32(metadata_hash)],
        ),
        EscrowEvent::SubmissionCreated {
            bounty_id,
            submission_id,
            submitter,
            content_hash,
        } => (
            vec![
                bytes32_from_hex(TOPIC_SUBMISSION_CREATED).unwrap_or_default(),
                word_u128(*bounty_id as u128),
                word_u128(*submission_id as u128),
                addr_word(submitter),
            ],
            vec![b32(content_hash)],
        ),
        EscrowEvent::WinnerSelected {
            bounty_id,
            submission_id,
            winner,
            amount,
        } => (
            vec![
                bytes32_from_hex(TOPIC_WINNER_SELECTED).unwrap_or_default(),
                word_u128(*bounty_id as u128),
                word_u128(*submission_id as u128),
                addr_word(winner),
            ],
            vec![word_u128(amount.0)],
        ),
    };
    (
        topics.iter().map(|t| to_hex(t)).collect(),
        to_hex(&data.concat()),
    )
}
