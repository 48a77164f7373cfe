//! Off-chain ledger records and the inputs that create them.
//!
//! Row structs (`*Row`) are what SQLite hands back; they are converted into
//! the public types once the textual columns (status, category, wei amounts)
//! have been parsed.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::amount::Wei;
use crate::errors::{CoordinatorError, Result};
use crate::lifecycle;

// ─────────────────────────────────────────────────────────
// Enumerations
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BountyStatus {
    Active,
    Completed,
    Cancelled,
    /// Never stored; derived at read time from an ACTIVE row past its deadline.
    Expired,
}

impl BountyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for BountyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BountyStatus {
    type Err = CoordinatorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(Self::Active),
            "COMPLETED" => Ok(Self::Completed),
            "CANCELLED" => Ok(Self::Cancelled),
            "EXPIRED" => Ok(Self::Expired),
            other => Err(CoordinatorError::Validation(format!(
                "unknown bounty status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BountyCategory {
    Design,
    Code,
    Content,
    Research,
    Translation,
    Other,
}

impl BountyCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Design => "DESIGN",
            Self::Code => "CODE",
            Self::Content => "CONTENT",
            Self::Research => "RESEARCH",
            Self::Translation => "TRANSLATION",
            Self::Other => "OTHER",
        }
    }
}

impl FromStr for BountyCategory {
    type Err = CoordinatorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "DESIGN" => Ok(Self::Design),
            "CODE" => Ok(Self::Code),
            "CONTENT" => Ok(Self::Content),
            "RESEARCH" => Ok(Self::Research),
            "TRANSLATION" => Ok(Self::Translation),
            "OTHER" => Ok(Self::Other),
            other => Err(CoordinatorError::Validation(format!(
                "unknown bounty category: {other}"
            ))),
        }
    }
}

/// Kind of confirmed ledger operation recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    BountyCreated,
    SubmissionCreated,
    WinnerSelected,
    BountyCancelled,
    RefundClaimed,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BountyCreated => "BOUNTY_CREATED",
            Self::SubmissionCreated => "SUBMISSION_CREATED",
            Self::WinnerSelected => "WINNER_SELECTED",
            Self::BountyCancelled => "BOUNTY_CANCELLED",
            Self::RefundClaimed => "REFUND_CLAIMED",
        }
    }
}

impl FromStr for TransactionKind {
    type Err = CoordinatorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "BOUNTY_CREATED" => Ok(Self::BountyCreated),
            "SUBMISSION_CREATED" => Ok(Self::SubmissionCreated),
            "WINNER_SELECTED" => Ok(Self::WinnerSelected),
            "BOUNTY_CANCELLED" => Ok(Self::BountyCancelled),
            "REFUND_CLAIMED" => Ok(Self::RefundClaimed),
            other => Err(CoordinatorError::Validation(format!(
                "unknown transaction kind: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    #[default]
    #[serde(alias = "created_at")]
    CreatedAt,
    #[serde(alias = "amount_wei")]
    Amount,
    Deadline,
    Title,
}

impl SortField {
    /// ORDER BY expression. `amount_wei` is TEXT, so it sorts by length first
    /// to get numeric order without leaving integer precision.
    pub fn order_expr(&self, order: SortOrder) -> String {
        let dir = order.as_sql();
        match self {
            Self::CreatedAt => format!("b.created_at {dir}, b.id {dir}"),
            Self::Amount => format!("length(b.amount_wei) {dir}, b.amount_wei {dir}, b.id {dir}"),
            Self::Deadline => format!("b.deadline {dir}, b.id {dir}"),
            Self::Title => format!("b.title {dir}, b.id {dir}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[serde(alias = "ASC")]
    Asc,
    #[default]
    #[serde(alias = "DESC")]
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

// ─────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bounty {
    pub id: i64,
    pub onchain_id: i64,
    pub creator_fid: i64,
    pub creator_address: String,
    pub creator_username: Option<String>,
    pub title: String,
    pub description: String,
    pub amount_wei: Wei,
    pub deadline: DateTime<Utc>,
    pub category: BountyCategory,
    /// Effective status: ACTIVE rows past their deadline read as EXPIRED.
    pub status: BountyStatus,
    pub winner_address: Option<String>,
    pub metadata_ipfs: Option<String>,
    pub metadata_hash: String,
    pub creation_tx_hash: String,
    pub submission_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Bounty {
    pub fn deadline_ts(&self) -> i64 {
        self.deadline.timestamp()
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BountyRow {
    pub id: i64,
    pub onchain_id: i64,
    pub creator_fid: i64,
    pub creator_address: String,
    pub creator_username: Option<String>,
    pub title: String,
    pub description: String,
    pub amount_wei: String,
    pub deadline: i64,
    pub category: String,
    pub status: String,
    pub winner_address: Option<String>,
    pub metadata_ipfs: Option<String>,
    pub metadata_hash: String,
    pub creation_tx_hash: String,
    pub submission_count: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl BountyRow {
    /// Stored status, without the read-time EXPIRED classification.
    pub fn stored_status(&self) -> Result<BountyStatus> {
        self.status.parse()
    }

    pub fn into_bounty(self, now: i64) -> Result<Bounty> {
        let stored = self.stored_status()?;
        Ok(Bounty {
            id: self.id,
            onchain_id: self.onchain_id,
            creator_fid: self.creator_fid,
            creator_address: self.creator_address,
            creator_username: self.creator_username,
            title: self.title,
            description: self.description,
            amount_wei: self.amount_wei.parse()?,
            deadline: timestamp(self.deadline),
            category: self.category.parse()?,
            status: lifecycle::effective_status(stored, self.deadline, now),
            winner_address: self.winner_address,
            metadata_ipfs: self.metadata_ipfs,
            metadata_hash: self.metadata_hash,
            creation_tx_hash: self.creation_tx_hash,
            submission_count: self.submission_count,
            created_at: timestamp(self.created_at),
            updated_at: timestamp(self.updated_at),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: i64,
    pub bounty_id: i64,
    pub onchain_id: Option<i64>,
    pub submitter_fid: i64,
    pub submitter_address: String,
    pub submitter_username: Option<String>,
    pub submitter_reputation: Option<i64>,
    pub content_ipfs: Option<String>,
    pub external_url: Option<String>,
    pub description: Option<String>,
    pub tx_hash: Option<String>,
    pub is_winner: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SubmissionRow {
    pub id: i64,
    pub bounty_id: i64,
    pub onchain_id: Option<i64>,
    pub submitter_fid: i64,
    pub submitter_address: String,
    pub submitter_username: Option<String>,
    pub submitter_reputation: Option<i64>,
    pub content_ipfs: Option<String>,
    pub external_url: Option<String>,
    pub description: Option<String>,
    pub tx_hash: Option<String>,
    pub is_winner: bool,
    pub created_at: i64,
}

impl From<SubmissionRow> for Submission {
    fn from(row: SubmissionRow) -> Self {
        Submission {
            id: row.id,
            bounty_id: row.bounty_id,
            onchain_id: row.onchain_id,
            submitter_fid: row.submitter_fid,
            submitter_address: row.submitter_address,
            submitter_username: row.submitter_username,
            submitter_reputation: row.submitter_reputation,
            content_ipfs: row.content_ipfs,
            external_url: row.external_url,
            description: row.description,
            tx_hash: row.tx_hash,
            is_winner: row.is_winner,
            created_at: timestamp(row.created_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub fid: i64,
    pub address: Option<String>,
    pub username: Option<String>,
    pub reputation_score: i64,
    pub total_earned_wei: Wei,
    pub bounties_created: i64,
    pub bounties_won: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub fid: i64,
    pub address: Option<String>,
    pub username: Option<String>,
    pub reputation_score: i64,
    pub total_earned_wei: String,
    pub bounties_created: i64,
    pub bounties_won: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TryFrom<UserRow> for User {
    type Error = CoordinatorError;

    fn try_from(row: UserRow) -> Result<Self> {
        Ok(User {
            fid: row.fid,
            address: row.address,
            username: row.username,
            reputation_score: row.reputation_score,
            total_earned_wei: row.total_earned_wei.parse()?,
            bounties_created: row.bounties_created,
            bounties_won: row.bounties_won,
            created_at: timestamp(row.created_at),
            updated_at: timestamp(row.updated_at),
        })
    }
}

/// Audit row correlating one confirmed ledger operation to its mirror.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub id: i64,
    pub bounty_id: i64,
    pub submission_id: Option<i64>,
    pub kind: TransactionKind,
    pub tx_hash: String,
    pub amount_wei: Wei,
    pub block_number: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TransactionRow {
    pub id: i64,
    pub bounty_id: i64,
    pub submission_id: Option<i64>,
    pub kind: String,
    pub tx_hash: String,
    pub amount_wei: String,
    pub block_number: i64,
    pub created_at: i64,
}

impl TryFrom<TransactionRow> for TransactionRecord {
    type Error = CoordinatorError;

    fn try_from(row: TransactionRow) -> Result<Self> {
        Ok(TransactionRecord {
            id: row.id,
            bounty_id: row.bounty_id,
            submission_id: row.submission_id,
            kind: row.kind.parse()?,
            tx_hash: row.tx_hash,
            amount_wei: row.amount_wei.parse()?,
            block_number: row.block_number,
            created_at: timestamp(row.created_at),
        })
    }
}

pub fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

// ─────────────────────────────────────────────────────────
// Inputs
// ─────────────────────────────────────────────────────────

/// A bounty the creator intends to fund; validated before any ledger call.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BountyDraft {
    pub title: String,
    pub description: String,
    /// ETH amount as a decimal string, e.g. `"0.1"`.
    pub amount: String,
    pub deadline: DateTime<Utc>,
    pub category: BountyCategory,
    pub creator_fid: i64,
    pub creator_address: String,
    pub creator_username: Option<String>,
    pub metadata_ipfs: Option<String>,
    /// `bytes32` committed on-chain for the off-chain metadata.
    pub metadata_hash: String,
}

/// Mirror request for a wallet-signed `createBounty` transaction. Amount,
/// deadline and creator address are read from the confirmed transaction,
/// never from the request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBountyRecord {
    pub tx_hash: String,
    pub creator_fid: i64,
    pub creator_username: Option<String>,
    pub title: String,
    pub description: String,
    pub category: BountyCategory,
    pub metadata_ipfs: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubmissionRecord {
    pub bounty_id: i64,
    pub submitter_fid: i64,
    pub submitter_address: String,
    pub submitter_username: Option<String>,
    pub external_url: Option<String>,
    pub description: Option<String>,
    pub content_ipfs: Option<String>,
    /// Hash of a wallet-signed `submitWork`; absent for direct submissions.
    pub tx_hash: Option<String>,
}

/// `selectWinner` mirror request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WinnerSelectionRecord {
    pub submission_id: i64,
    pub tx_hash: String,
}

/// Mirror request for calls that carry nothing but the bounty (cancel, refund).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerTxRecord {
    pub tx_hash: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionDraft {
    /// `bytes32` committed on-chain for the submitted content.
    pub content_hash: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BountyFilter {
    pub category: Option<BountyCategory>,
    pub status: Option<BountyStatus>,
    #[serde(default, alias = "sortBy")]
    pub sort_field: SortField,
    #[serde(default)]
    pub sort_order: SortOrder,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

impl BountyFilter {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BountyPage {
    pub bounties: Vec<Bounty>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
    pub has_more: bool,
}
