//! Database layer: pool, migrations, reads and the mirroring writes.
//!
//! Every mirroring write runs in one database transaction whose first
//! statement is the conditional write itself (an INSERT guarded by the
//! expected pre-state, or an UPDATE compare-and-swap on `status`). That both
//! takes SQLite's write lock up front and makes the precondition check and
//! the write a single step, so two racing mirrors for the same bounty cannot
//! both pass. When the guarded write touches no row, the current state is
//! re-read only to tell the caller *why*.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqliteExecutor, SqlitePool};
use tracing::{debug, info};

use crate::amount::Wei;
use crate::config::PoolConfig;
use crate::errors::{CoordinatorError, Result};
use crate::lifecycle::{self, LifecycleEvent};
use crate::model::{
    BountyCategory, BountyFilter, BountyRow, BountyStatus, SubmissionRow, TransactionKind,
    TransactionRow, UserRow,
};

/// Establish the SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str, cfg: &PoolConfig) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    let options = SqliteConnectOptions::from_str(&url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(cfg.max_connections)
        .idle_timeout(cfg.idle_timeout)
        .acquire_timeout(cfg.acquire_timeout)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

/// Single-connection in-memory database with the schema applied.
#[cfg(test)]
pub async fn memory_pool() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    // One connection that never idles out, or the in-memory database goes with it.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}

// ─────────────────────────────────────────────────────────
// Inputs to the mirroring writes
// ─────────────────────────────────────────────────────────

/// The confirmed ledger transaction a mirror write belongs to.
#[derive(Debug, Clone)]
pub struct TxMeta {
    pub tx_hash: String,
    pub block_number: i64,
}

#[derive(Debug, Clone)]
pub struct NewBounty {
    pub onchain_id: i64,
    pub creator_fid: i64,
    pub creator_address: String,
    pub creator_username: Option<String>,
    pub title: String,
    pub description: String,
    pub amount: Wei,
    pub deadline: i64,
    pub category: BountyCategory,
    pub metadata_ipfs: Option<String>,
    pub metadata_hash: String,
}

#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub bounty_id: i64,
    pub onchain_id: Option<i64>,
    pub submitter_fid: i64,
    pub submitter_address: String,
    pub submitter_username: Option<String>,
    pub content_ipfs: Option<String>,
    pub external_url: Option<String>,
    pub description: Option<String>,
}

/// Outcome of a mirroring write. Replaying a write for a transaction that is
/// already mirrored is not an error; it reports what is already there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mirror<T> {
    Applied(T),
    AlreadyApplied(T),
}

impl<T> Mirror<T> {
    pub fn into_inner(self) -> T {
        match self {
            Mirror::Applied(v) | Mirror::AlreadyApplied(v) => v,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Mirror::Applied(_))
    }
}

// ─────────────────────────────────────────────────────────
// Bounty reads
// ─────────────────────────────────────────────────────────

const BOUNTY_SELECT: &str = r#"
    SELECT b.id, b.onchain_id, b.creator_fid, b.creator_address,
           u.username AS creator_username,
           b.title, b.description, b.amount_wei, b.deadline, b.category, b.status,
           b.winner_address, b.metadata_ipfs, b.metadata_hash, b.creation_tx_hash,
           (SELECT COUNT(*) FROM submissions s WHERE s.bounty_id = b.id) AS submission_count,
           b.created_at, b.updated_at
    FROM   bounties b
    LEFT JOIN users u ON u.fid = b.creator_fid
"#;

pub async fn get_bounty<'e, E: SqliteExecutor<'e>>(ex: E, id: i64) -> Result<Option<BountyRow>> {
    let row = sqlx::query_as::<_, BountyRow>(&format!("{BOUNTY_SELECT} WHERE b.id = ?1"))
        .bind(id)
        .fetch_optional(ex)
        .await?;
    Ok(row)
}

pub async fn get_bounty_by_creation_tx<'e, E: SqliteExecutor<'e>>(
    ex: E,
    tx_hash: &str,
) -> Result<Option<BountyRow>> {
    let row = sqlx::query_as::<_, BountyRow>(&format!(
        "{BOUNTY_SELECT} WHERE b.creation_tx_hash = ?1"
    ))
    .bind(tx_hash)
    .fetch_optional(ex)
    .await?;
    Ok(row)
}

fn push_bounty_filters(qb: &mut QueryBuilder<'_, Sqlite>, filter: &BountyFilter, now: i64) {
    qb.push(" WHERE 1 = 1");
    if let Some(category) = filter.category {
        qb.push(" AND b.category = ").push_bind(category.as_str());
    }
    match filter.status {
        Some(BountyStatus::Active) => {
            qb.push(" AND b.status = 'ACTIVE' AND b.deadline > ")
                .push_bind(now);
        }
        Some(BountyStatus::Expired) => {
            qb.push(" AND b.status = 'ACTIVE' AND b.deadline <= ")
                .push_bind(now);
        }
        Some(status) => {
            qb.push(" AND b.status = ").push_bind(status.as_str());
        }
        None => {}
    }
}

/// One page of bounties plus the total number matching the filter.
/// Status filtering follows the read-time classification: ACTIVE excludes
/// rows past their deadline, EXPIRED selects exactly those.
pub async fn list_bounties(
    pool: &SqlitePool,
    filter: &BountyFilter,
    now: i64,
) -> Result<(Vec<BountyRow>, i64)> {
    let mut page = QueryBuilder::<Sqlite>::new(BOUNTY_SELECT);
    push_bounty_filters(&mut page, filter, now);
    page.push(" ORDER BY ")
        .push(filter.sort_field.order_expr(filter.sort_order));
    page.push(" LIMIT ")
        .push_bind(filter.limit())
        .push(" OFFSET ")
        .push_bind(filter.offset());
    let rows = page.build_query_as::<BountyRow>().fetch_all(pool).await?;

    let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM bounties b");
    push_bounty_filters(&mut count, filter, now);
    let (total,): (i64,) = count.build_query_as().fetch_one(pool).await?;

    Ok((rows, total))
}

// ─────────────────────────────────────────────────────────
// Submission, user and transaction reads
// ─────────────────────────────────────────────────────────

const SUBMISSION_SELECT: &str = r#"
    SELECT s.id, s.bounty_id, s.onchain_id, s.submitter_fid, s.submitter_address,
           u.username AS submitter_username,
           u.reputation_score AS submitter_reputation,
           s.content_ipfs, s.external_url, s.description, s.tx_hash, s.is_winner,
           s.created_at
    FROM   submissions s
    LEFT JOIN users u ON u.fid = s.submitter_fid
"#;

pub async fn get_submission<'e, E: SqliteExecutor<'e>>(
    ex: E,
    id: i64,
) -> Result<Option<SubmissionRow>> {
    let row = sqlx::query_as::<_, SubmissionRow>(&format!("{SUBMISSION_SELECT} WHERE s.id = ?1"))
        .bind(id)
        .fetch_optional(ex)
        .await?;
    Ok(row)
}

async fn get_submission_by_tx<'e, E: SqliteExecutor<'e>>(
    ex: E,
    tx_hash: &str,
) -> Result<Option<SubmissionRow>> {
    let row = sqlx::query_as::<_, SubmissionRow>(&format!(
        "{SUBMISSION_SELECT} WHERE s.tx_hash = ?1"
    ))
    .bind(tx_hash)
    .fetch_optional(ex)
    .await?;
    Ok(row)
}

/// Submissions for a bounty, newest first.
pub async fn list_submissions(pool: &SqlitePool, bounty_id: i64) -> Result<Vec<SubmissionRow>> {
    let rows = sqlx::query_as::<_, SubmissionRow>(&format!(
        "{SUBMISSION_SELECT} WHERE s.bounty_id = ?1 ORDER BY s.created_at DESC, s.id DESC"
    ))
    .bind(bounty_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn get_user(pool: &SqlitePool, fid: i64) -> Result<Option<UserRow>> {
    let row = sqlx::query_as::<_, UserRow>(
        r#"
        SELECT fid, address, username, reputation_score, total_earned_wei,
               bounties_created, bounties_won, created_at, updated_at
        FROM   users
        WHERE  fid = ?1
        "#,
    )
    .bind(fid)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn find_transaction<'e, E: SqliteExecutor<'e>>(
    ex: E,
    tx_hash: &str,
) -> Result<Option<TransactionRow>> {
    let row = sqlx::query_as::<_, TransactionRow>(
        r#"
        SELECT id, bounty_id, submission_id, kind, tx_hash, amount_wei, block_number, created_at
        FROM   transactions
        WHERE  tx_hash = ?1
        "#,
    )
    .bind(tx_hash)
    .fetch_optional(ex)
    .await?;
    Ok(row)
}

/// Audit trail of a bounty, oldest first.
pub async fn list_transactions(pool: &SqlitePool, bounty_id: i64) -> Result<Vec<TransactionRow>> {
    let rows = sqlx::query_as::<_, TransactionRow>(
        r#"
        SELECT id, bounty_id, submission_id, kind, tx_hash, amount_wei, block_number, created_at
        FROM   transactions
        WHERE  bounty_id = ?1
        ORDER  BY id ASC
        "#,
    )
    .bind(bounty_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

async fn is_refunded<'e, E: SqliteExecutor<'e>>(ex: E, bounty_id: i64) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT 1 FROM transactions WHERE bounty_id = ?1 AND kind = 'REFUND_CLAIMED'",
    )
    .bind(bounty_id)
    .fetch_optional(ex)
    .await?;
    Ok(row.is_some())
}

// ─────────────────────────────────────────────────────────
// Mirroring writes
// ─────────────────────────────────────────────────────────

/// Append the audit record. A hash that is already recorded means the same
/// ledger transaction is being mirrored as a different operation.
async fn insert_transaction(
    conn: &mut SqliteConnection,
    bounty_id: i64,
    submission_id: Option<i64>,
    kind: TransactionKind,
    meta: &TxMeta,
    amount: Wei,
    now: i64,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        INSERT INTO transactions
            (bounty_id, submission_id, kind, tx_hash, amount_wei, block_number, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(bounty_id)
    .bind(submission_id)
    .bind(kind.as_str())
    .bind(&meta.tx_hash)
    .bind(amount.to_string())
    .bind(meta.block_number)
    .bind(now)
    .execute(conn)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            Err(CoordinatorError::StateConflict(format!(
                "transaction {} is already recorded",
                meta.tx_hash
            )))
        }
        Err(e) => Err(e.into()),
    }
}

/// Fast path for replays: a hash already recorded as `kind` for `bounty_id`
/// is an idempotent success, recorded as anything else is a conflict.
async fn replayed(
    pool: &SqlitePool,
    meta: &TxMeta,
    kind: TransactionKind,
    bounty_id: i64,
) -> Result<bool> {
    match find_transaction(pool, &meta.tx_hash).await? {
        None => Ok(false),
        Some(row) if row.kind == kind.as_str() && row.bounty_id == bounty_id => {
            debug!("{} already mirrored as {}", meta.tx_hash, row.kind);
            Ok(true)
        }
        Some(row) => Err(CoordinatorError::StateConflict(format!(
            "transaction {} is already recorded as {} for bounty {}",
            meta.tx_hash, row.kind, row.bounty_id
        ))),
    }
}

/// Explain why a guarded write on `bounty_id` matched no row.
async fn bounty_conflict(
    pool: &SqlitePool,
    bounty_id: i64,
    event: LifecycleEvent,
) -> CoordinatorError {
    let row = match get_bounty(pool, bounty_id).await {
        Ok(row) => row,
        Err(e) => return e,
    };
    let stored = match row.as_ref().map(BountyRow::stored_status).transpose() {
        Ok(stored) => stored,
        Err(e) => return e,
    };
    match lifecycle::next_status(bounty_id, stored, event) {
        Err(e) => e,
        Ok(_) => CoordinatorError::StateConflict(format!(
            "bounty {bounty_id} changed concurrently; re-fetch and retry"
        )),
    }
}

/// A fid is bound to the first wallet that signed for it. Reporting a signed
/// transaction under a fid bound to another wallet is refused.
async fn check_fid_binding(conn: &mut SqliteConnection, fid: i64, signer: &str) -> Result<()> {
    let bound: Option<(Option<String>,)> =
        sqlx::query_as("SELECT address FROM users WHERE fid = ?1")
            .bind(fid)
            .fetch_optional(conn)
            .await?;
    match bound {
        Some((Some(address),)) if !address.eq_ignore_ascii_case(signer) => {
            Err(CoordinatorError::Unauthorized(format!(
                "fid {fid} acts through {address}, not {signer}"
            )))
        }
        _ => Ok(()),
    }
}

/// Mirror a confirmed `createBounty`: bounty row, audit record and the
/// creator's `bounties_created` counter, all or nothing.
pub async fn mirror_bounty_created(
    pool: &SqlitePool,
    bounty: &NewBounty,
    meta: &TxMeta,
    now: i64,
) -> Result<Mirror<i64>> {
    let mut tx = pool.begin().await?;

    let inserted: Option<(i64,)> = sqlx::query_as(
        r#"
        INSERT INTO bounties
            (onchain_id, creator_fid, creator_address, title, description, amount_wei,
             deadline, category, status, metadata_ipfs, metadata_hash, creation_tx_hash,
             created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'ACTIVE', ?9, ?10, ?11, ?12, ?12)
        ON CONFLICT DO NOTHING
        RETURNING id
        "#,
    )
    .bind(bounty.onchain_id)
    .bind(bounty.creator_fid)
    .bind(&bounty.creator_address)
    .bind(bounty.title.trim())
    .bind(bounty.description.trim())
    .bind(bounty.amount.to_string())
    .bind(bounty.deadline)
    .bind(bounty.category.as_str())
    .bind(&bounty.metadata_ipfs)
    .bind(&bounty.metadata_hash)
    .bind(&meta.tx_hash)
    .bind(now)
    .fetch_optional(&mut *tx)
    .await?;

    let Some((id,)) = inserted else {
        tx.rollback().await?;
        return match get_bounty_by_creation_tx(pool, &meta.tx_hash).await? {
            Some(existing) => Ok(Mirror::AlreadyApplied(existing.id)),
            None => Err(CoordinatorError::StateConflict(format!(
                "on-chain bounty {} is already mirrored by another transaction",
                bounty.onchain_id
            ))),
        };
    };

    insert_transaction(
        &mut tx,
        id,
        None,
        TransactionKind::BountyCreated,
        meta,
        bounty.amount,
        now,
    )
    .await?;

    check_fid_binding(&mut tx, bounty.creator_fid, &bounty.creator_address).await?;

    sqlx::query(
        r#"
        INSERT INTO users (fid, address, username, bounties_created, created_at, updated_at)
        VALUES (?1, ?2, ?3, 1, ?4, ?4)
        ON CONFLICT (fid) DO UPDATE
        SET bounties_created = users.bounties_created + 1,
            address          = COALESCE(users.address, excluded.address),
            username         = COALESCE(excluded.username, users.username),
            updated_at       = excluded.updated_at
        "#,
    )
    .bind(bounty.creator_fid)
    .bind(&bounty.creator_address)
    .bind(&bounty.creator_username)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(Mirror::Applied(id))
}

/// Mirror a submission. The gate (bounty ACTIVE and `at` strictly before the
/// deadline) is part of the INSERT itself.
pub async fn mirror_submission_created(
    pool: &SqlitePool,
    submission: &NewSubmission,
    meta: Option<&TxMeta>,
    at: i64,
    now: i64,
) -> Result<Mirror<i64>> {
    if let Some(meta) = meta {
        if let Some(existing) = get_submission_by_tx(pool, &meta.tx_hash).await? {
            return Ok(Mirror::AlreadyApplied(existing.id));
        }
    }

    let mut tx = pool.begin().await?;

    let inserted: Option<(i64,)> = sqlx::query_as(
        r#"
        INSERT INTO submissions
            (bounty_id, onchain_id, submitter_fid, submitter_address, content_ipfs,
             external_url, description, tx_hash, is_winner, created_at)
        SELECT b.id, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9
        FROM   bounties b
        WHERE  b.id = ?1 AND b.status = 'ACTIVE' AND b.deadline > ?10
        ON CONFLICT DO NOTHING
        RETURNING id
        "#,
    )
    .bind(submission.bounty_id)
    .bind(submission.onchain_id)
    .bind(submission.submitter_fid)
    .bind(&submission.submitter_address)
    .bind(&submission.content_ipfs)
    .bind(&submission.external_url)
    .bind(&submission.description)
    .bind(meta.map(|m| m.tx_hash.as_str()))
    .bind(now)
    .bind(at)
    .fetch_optional(&mut *tx)
    .await?;

    let Some((id,)) = inserted else {
        tx.rollback().await?;
        if let Some(meta) = meta {
            if let Some(existing) = get_submission_by_tx(pool, &meta.tx_hash).await? {
                return Ok(Mirror::AlreadyApplied(existing.id));
            }
        }
        let row = get_bounty(pool, submission.bounty_id)
            .await?
            .ok_or(CoordinatorError::BountyNotFound(submission.bounty_id))?;
        lifecycle::check_submission_gate(row.id, row.stored_status()?, row.deadline, at)?;
        return Err(CoordinatorError::StateConflict(format!(
            "submission to bounty {} was not recorded; re-fetch and retry",
            row.id
        )));
    };

    if let Some(meta) = meta {
        insert_transaction(
            &mut tx,
            submission.bounty_id,
            Some(id),
            TransactionKind::SubmissionCreated,
            meta,
            Wei::ZERO,
            now,
        )
        .await?;
        check_fid_binding(&mut tx, submission.submitter_fid, &submission.submitter_address)
            .await?;
    }

    // Only a signed submission binds the fid to a wallet; a direct one
    // carries whatever address the client sent.
    sqlx::query(
        r#"
        INSERT INTO users (fid, address, username, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?4)
        ON CONFLICT (fid) DO UPDATE
        SET address    = COALESCE(users.address, excluded.address),
            username   = COALESCE(excluded.username, users.username),
            updated_at = excluded.updated_at
        "#,
    )
    .bind(submission.submitter_fid)
    .bind(meta.map(|_| submission.submitter_address.as_str()))
    .bind(&submission.submitter_username)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(Mirror::Applied(id))
}

/// Mirror a confirmed `selectWinner`: CAS the bounty ACTIVE → COMPLETED,
/// flag the submission, append WINNER_SELECTED and credit the winner.
pub async fn mirror_winner_selected(
    pool: &SqlitePool,
    bounty_id: i64,
    submission_id: i64,
    meta: &TxMeta,
    reputation_per_win: i64,
    now: i64,
) -> Result<Mirror<()>> {
    if replayed(pool, meta, TransactionKind::WinnerSelected, bounty_id).await? {
        return Ok(Mirror::AlreadyApplied(()));
    }

    let submission = get_submission(pool, submission_id)
        .await?
        .ok_or(CoordinatorError::SubmissionNotFound(submission_id))?;
    if submission.bounty_id != bounty_id {
        return Err(CoordinatorError::Validation(format!(
            "submission {submission_id} does not belong to bounty {bounty_id}"
        )));
    }
    if submission.is_winner {
        return Err(CoordinatorError::AlreadyWinner { submission_id });
    }

    let mut tx = pool.begin().await?;

    let swapped = sqlx::query(
        r#"
        UPDATE bounties
        SET    status = 'COMPLETED', winner_address = ?2, updated_at = ?3
        WHERE  id = ?1
          AND  status = 'ACTIVE'
          AND  winner_address IS NULL
          AND  NOT EXISTS (SELECT 1 FROM transactions t
                           WHERE t.bounty_id = ?1 AND t.kind = 'REFUND_CLAIMED')
        "#,
    )
    .bind(bounty_id)
    .bind(&submission.submitter_address)
    .bind(now)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if swapped == 0 {
        tx.rollback().await?;
        if replayed(pool, meta, TransactionKind::WinnerSelected, bounty_id).await? {
            return Ok(Mirror::AlreadyApplied(()));
        }
        if is_refunded(pool, bounty_id).await? {
            return Err(CoordinatorError::StateConflict(format!(
                "bounty {bounty_id} has been refunded"
            )));
        }
        return Err(bounty_conflict(pool, bounty_id, LifecycleEvent::WinnerSelected).await);
    }

    let flagged = sqlx::query(
        "UPDATE submissions SET is_winner = 1 WHERE id = ?1 AND bounty_id = ?2 AND is_winner = 0",
    )
    .bind(submission_id)
    .bind(bounty_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    if flagged == 0 {
        tx.rollback().await?;
        return Err(CoordinatorError::AlreadyWinner { submission_id });
    }

    let (amount,): (String,) = sqlx::query_as("SELECT amount_wei FROM bounties WHERE id = ?1")
        .bind(bounty_id)
        .fetch_one(&mut *tx)
        .await?;
    let amount: Wei = amount.parse()?;

    insert_transaction(
        &mut tx,
        bounty_id,
        Some(submission_id),
        TransactionKind::WinnerSelected,
        meta,
        amount,
        now,
    )
    .await?;

    let earned: Option<(String,)> =
        sqlx::query_as("SELECT total_earned_wei FROM users WHERE fid = ?1")
            .bind(submission.submitter_fid)
            .fetch_optional(&mut *tx)
            .await?;
    let earned = match earned {
        Some((raw,)) => raw.parse::<Wei>()?,
        None => Wei::ZERO,
    };
    let earned = earned
        .checked_add(amount)
        .ok_or_else(|| CoordinatorError::Validation("total earned overflowed".into()))?;

    sqlx::query(
        r#"
        INSERT INTO users
            (fid, address, reputation_score, total_earned_wei, bounties_won, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)
        ON CONFLICT (fid) DO UPDATE
        SET reputation_score = users.reputation_score + excluded.reputation_score,
            total_earned_wei = excluded.total_earned_wei,
            bounties_won     = users.bounties_won + 1,
            address          = COALESCE(users.address, excluded.address),
            updated_at       = excluded.updated_at
        "#,
    )
    .bind(submission.submitter_fid)
    .bind(&submission.submitter_address)
    .bind(reputation_per_win)
    .bind(earned.to_string())
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(Mirror::Applied(()))
}

/// Mirror a confirmed `cancelBounty`: CAS ACTIVE → CANCELLED while no winner.
pub async fn mirror_bounty_cancelled(
    pool: &SqlitePool,
    bounty_id: i64,
    meta: &TxMeta,
    now: i64,
) -> Result<Mirror<()>> {
    if replayed(pool, meta, TransactionKind::BountyCancelled, bounty_id).await? {
        return Ok(Mirror::AlreadyApplied(()));
    }

    let mut tx = pool.begin().await?;

    let amount: Option<(String,)> = sqlx::query_as(
        r#"
        UPDATE bounties
        SET    status = 'CANCELLED', updated_at = ?2
        WHERE  id = ?1 AND status = 'ACTIVE' AND winner_address IS NULL
        RETURNING amount_wei
        "#,
    )
    .bind(bounty_id)
    .bind(now)
    .fetch_optional(&mut *tx)
    .await?;

    let Some((amount,)) = amount else {
        tx.rollback().await?;
        if replayed(pool, meta, TransactionKind::BountyCancelled, bounty_id).await? {
            return Ok(Mirror::AlreadyApplied(()));
        }
        return Err(bounty_conflict(pool, bounty_id, LifecycleEvent::CancelConfirmed).await);
    };

    insert_transaction(
        &mut tx,
        bounty_id,
        None,
        TransactionKind::BountyCancelled,
        meta,
        amount.parse()?,
        now,
    )
    .await?;

    tx.commit().await?;
    Ok(Mirror::Applied(()))
}

/// Mirror a confirmed `claimRefund`. No status change; the audit record is
/// the refund, and at most one may exist per bounty.
pub async fn mirror_refund_claimed(
    pool: &SqlitePool,
    bounty_id: i64,
    meta: &TxMeta,
    at: i64,
    grace_secs: i64,
    now: i64,
) -> Result<Mirror<()>> {
    if replayed(pool, meta, TransactionKind::RefundClaimed, bounty_id).await? {
        return Ok(Mirror::AlreadyApplied(()));
    }

    let inserted: Option<(i64,)> = sqlx::query_as(
        r#"
        INSERT INTO transactions
            (bounty_id, submission_id, kind, tx_hash, amount_wei, block_number, created_at)
        SELECT b.id, NULL, 'REFUND_CLAIMED', ?2, b.amount_wei, ?3, ?4
        FROM   bounties b
        WHERE  b.id = ?1
          AND  (b.status = 'CANCELLED'
                OR (b.status = 'ACTIVE' AND b.deadline + ?5 <= ?6))
        ON CONFLICT DO NOTHING
        RETURNING id
        "#,
    )
    .bind(bounty_id)
    .bind(&meta.tx_hash)
    .bind(meta.block_number)
    .bind(now)
    .bind(grace_secs)
    .bind(at)
    .fetch_optional(pool)
    .await?;

    if inserted.is_some() {
        return Ok(Mirror::Applied(()));
    }

    if replayed(pool, meta, TransactionKind::RefundClaimed, bounty_id).await? {
        return Ok(Mirror::AlreadyApplied(()));
    }
    let row = get_bounty(pool, bounty_id)
        .await?
        .ok_or(CoordinatorError::BountyNotFound(bounty_id))?;
    lifecycle::check_refundable(
        bounty_id,
        row.stored_status()?,
        row.deadline,
        at,
        std::time::Duration::from_secs(grace_secs.max(0) as u64),
        is_refunded(pool, bounty_id).await?,
    )?;
    Err(CoordinatorError::StateConflict(format!(
        "refund for bounty {bounty_id} was not recorded; re-fetch and retry"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SortField, SortOrder};

    const NOW: i64 = 1_700_000_000;
    const DAY: i64 = 86_400;

    fn new_bounty(onchain_id: i64, amount: Wei, deadline: i64) -> NewBounty {
        NewBounty {
            onchain_id,
            creator_fid: 1,
            creator_address: format!("0x{}", "aa".repeat(20)),
            creator_username: Some("alice".to_string()),
            title: format!("Bounty number {onchain_id}"),
            description: "A description that is long enough".to_string(),
            amount,
            deadline,
            category: BountyCategory::Code,
            metadata_ipfs: None,
            metadata_hash: format!("0x{}", "00".repeat(32)),
        }
    }

    fn meta(n: u64) -> TxMeta {
        TxMeta {
            tx_hash: format!("0x{n:064x}"),
            block_number: n as i64,
        }
    }

    fn new_submission(bounty_id: i64, fid: i64) -> NewSubmission {
        NewSubmission {
            bounty_id,
            onchain_id: None,
            submitter_fid: fid,
            submitter_address: format!("0x{}", "bb".repeat(20)),
            submitter_username: Some("bob".to_string()),
            content_ipfs: None,
            external_url: Some("https://example.com".to_string()),
            description: None,
        }
    }

    #[tokio::test]
    async fn creation_mirror_is_idempotent() {
        let pool = memory_pool().await.unwrap();
        let b = new_bounty(0, Wei(5), NOW + DAY);

        let first = mirror_bounty_created(&pool, &b, &meta(1), NOW).await.unwrap();
        let second = mirror_bounty_created(&pool, &b, &meta(1), NOW).await.unwrap();
        assert!(first.is_applied());
        assert_eq!(second, Mirror::AlreadyApplied(first.into_inner()));

        let user = get_user(&pool, 1).await.unwrap().unwrap();
        assert_eq!(user.bounties_created, 1);
        assert_eq!(list_transactions(&pool, first.into_inner()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn same_onchain_bounty_under_another_hash_conflicts() {
        let pool = memory_pool().await.unwrap();
        let b = new_bounty(0, Wei(5), NOW + DAY);
        mirror_bounty_created(&pool, &b, &meta(1), NOW).await.unwrap();
        let err = mirror_bounty_created(&pool, &b, &meta(2), NOW).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::StateConflict(_)));
    }

    #[tokio::test]
    async fn fid_stays_bound_to_its_first_signer() {
        let pool = memory_pool().await.unwrap();
        let first = new_bounty(0, Wei(5), NOW + DAY);
        let mut second = new_bounty(1, Wei(5), NOW + DAY);
        second.creator_address = format!("0x{}", "cc".repeat(20));
        let id = mirror_bounty_created(&pool, &first, &meta(1), NOW)
            .await
            .unwrap()
            .into_inner();
        let err = mirror_bounty_created(&pool, &second, &meta(2), NOW)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Unauthorized(_)));
        assert!(get_bounty_by_creation_tx(&pool, &meta(2).tx_hash)
            .await
            .unwrap()
            .is_none());

        let user = get_user(&pool, 1).await.unwrap().unwrap();
        assert_eq!(user.address.as_deref(), Some(first.creator_address.as_str()));
        assert_eq!(user.bounties_created, 1);

        // A signed submission under fid 1 from another wallet is refused too.
        let mut signed = new_submission(id, 1);
        signed.onchain_id = Some(0);
        let err = mirror_submission_created(&pool, &signed, Some(&meta(3)), NOW, NOW)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Unauthorized(_)));
        assert!(list_submissions(&pool, id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn direct_submission_binds_no_wallet() {
        let pool = memory_pool().await.unwrap();
        let id = mirror_bounty_created(&pool, &new_bounty(0, Wei(5), NOW + DAY), &meta(1), NOW)
            .await
            .unwrap()
            .into_inner();
        mirror_submission_created(&pool, &new_submission(id, 2), None, NOW, NOW)
            .await
            .unwrap();
        assert_eq!(get_user(&pool, 2).await.unwrap().unwrap().address, None);

        let mut signed = new_submission(id, 2);
        signed.submitter_address = format!("0x{}", "dd".repeat(20));
        mirror_submission_created(&pool, &signed, Some(&meta(2)), NOW, NOW)
            .await
            .unwrap();
        assert_eq!(
            get_user(&pool, 2).await.unwrap().unwrap().address,
            Some(signed.submitter_address)
        );
    }

    #[tokio::test]
    async fn submission_gate_runs_inside_the_insert() {
        let pool = memory_pool().await.unwrap();
        let id = mirror_bounty_created(&pool, &new_bounty(0, Wei(5), NOW + DAY), &meta(1), NOW)
            .await
            .unwrap()
            .into_inner();

        mirror_submission_created(&pool, &new_submission(id, 2), None, NOW, NOW)
            .await
            .unwrap();

        let late = mirror_submission_created(&pool, &new_submission(id, 2), None, NOW + DAY, NOW)
            .await
            .unwrap_err();
        assert!(matches!(late, CoordinatorError::DeadlinePassed { .. }));

        let missing = mirror_submission_created(&pool, &new_submission(99, 2), None, NOW, NOW)
            .await
            .unwrap_err();
        assert!(matches!(missing, CoordinatorError::BountyNotFound(99)));

        assert_eq!(list_submissions(&pool, id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn winner_selection_is_single_shot() {
        let pool = memory_pool().await.unwrap();
        let id = mirror_bounty_created(&pool, &new_bounty(0, Wei(700), NOW + DAY), &meta(1), NOW)
            .await
            .unwrap()
            .into_inner();
        let s1 = mirror_submission_created(&pool, &new_submission(id, 2), None, NOW, NOW)
            .await
            .unwrap()
            .into_inner();
        let s2 = mirror_submission_created(&pool, &new_submission(id, 3), None, NOW, NOW)
            .await
            .unwrap()
            .into_inner();

        let won = mirror_winner_selected(&pool, id, s1, &meta(2), 10, NOW).await.unwrap();
        assert!(won.is_applied());
        // Replay of the same transaction is a no-op.
        let replay = mirror_winner_selected(&pool, id, s1, &meta(2), 10, NOW).await.unwrap();
        assert_eq!(replay, Mirror::AlreadyApplied(()));
        // A second selection under another hash loses.
        let err = mirror_winner_selected(&pool, id, s2, &meta(3), 10, NOW)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::BountyNotActive { .. }));

        let winners: Vec<_> = list_submissions(&pool, id)
            .await
            .unwrap()
            .into_iter()
            .filter(|s| s.is_winner)
            .collect();
        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0].id, s1);

        let winner = get_user(&pool, 2).await.unwrap().unwrap();
        assert_eq!(winner.bounties_won, 1);
        assert_eq!(winner.reputation_score, 10);
        assert_eq!(winner.total_earned_wei, "700");
    }

    #[tokio::test]
    async fn cancelled_bounty_refunds_once_and_blocks_winner() {
        let pool = memory_pool().await.unwrap();
        let id = mirror_bounty_created(&pool, &new_bounty(0, Wei(5), NOW + DAY), &meta(1), NOW)
            .await
            .unwrap()
            .into_inner();
        let s = mirror_submission_created(&pool, &new_submission(id, 2), None, NOW, NOW)
            .await
            .unwrap()
            .into_inner();

        mirror_bounty_cancelled(&pool, id, &meta(2), NOW).await.unwrap();
        let again = mirror_bounty_cancelled(&pool, id, &meta(3), NOW).await.unwrap_err();
        assert!(matches!(again, CoordinatorError::BountyNotActive { .. }));

        assert!(mirror_refund_claimed(&pool, id, &meta(4), NOW, 7 * DAY, NOW)
            .await
            .unwrap()
            .is_applied());
        let second = mirror_refund_claimed(&pool, id, &meta(5), NOW, 7 * DAY, NOW)
            .await
            .unwrap_err();
        assert!(matches!(second, CoordinatorError::StateConflict(_)));

        let err = mirror_winner_selected(&pool, id, s, &meta(6), 10, NOW).await.unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::StateConflict);
    }

    #[tokio::test]
    async fn expired_bounty_refund_waits_for_grace() {
        let pool = memory_pool().await.unwrap();
        let deadline = NOW + DAY;
        let id = mirror_bounty_created(&pool, &new_bounty(0, Wei(5), deadline), &meta(1), NOW)
            .await
            .unwrap()
            .into_inner();

        let early = mirror_refund_claimed(&pool, id, &meta(2), deadline + 1, 7 * DAY, NOW)
            .await
            .unwrap_err();
        assert!(matches!(early, CoordinatorError::StateConflict(_)));

        let ok = mirror_refund_claimed(&pool, id, &meta(3), deadline + 7 * DAY, 7 * DAY, NOW)
            .await
            .unwrap();
        assert!(ok.is_applied());
    }

    #[tokio::test]
    async fn listing_filters_sorts_and_counts() {
        let pool = memory_pool().await.unwrap();
        // Amounts chosen so string order differs from numeric order.
        for (i, amount) in [Wei(9), Wei(10), Wei(100)].into_iter().enumerate() {
            mirror_bounty_created(
                &pool,
                &new_bounty(i as i64, amount, NOW + DAY),
                &meta(i as u64 + 1),
                NOW,
            )
            .await
            .unwrap();
        }
        // One already past its deadline.
        mirror_bounty_created(&pool, &new_bounty(3, Wei(1), NOW - 1), &meta(10), NOW)
            .await
            .unwrap();

        let filter = BountyFilter {
            status: Some(BountyStatus::Active),
            sort_field: SortField::Amount,
            sort_order: SortOrder::Asc,
            limit: Some(2),
            ..Default::default()
        };
        let (rows, total) = list_bounties(&pool, &filter, NOW).await.unwrap();
        assert_eq!(total, 3);
        let amounts: Vec<_> = rows.iter().map(|r| r.amount_wei.as_str()).collect();
        assert_eq!(amounts, ["9", "10"]);

        let expired = BountyFilter {
            status: Some(BountyStatus::Expired),
            ..Default::default()
        };
        let (rows, total) = list_bounties(&pool, &expired, NOW).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].onchain_id, 3);
    }
}
