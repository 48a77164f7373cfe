//! Axum REST API handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::coordinator::{Coordinator, PreparedBounty, PreparedCall, Reconciliation};
use crate::db::Mirror;
use crate::errors::{CoordinatorError, ErrorKind};
use crate::ledger::EscrowLedger;
use crate::model::{
    Bounty, BountyDraft, BountyFilter, BountyPage, CreateBountyRecord, CreateSubmissionRecord,
    LedgerTxRecord, Submission, SubmissionDraft, TransactionRecord, User, WinnerSelectionRecord,
};

pub struct ApiState<L> {
    pub coordinator: Coordinator<L>,
}

type ApiResult<T> = Result<T, CoordinatorError>;

// ─────────────────────────────────────────────────────────
// Response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    pub kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    /// Set when the ledger confirmed but the mirror has not caught up.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl IntoResponse for CoordinatorError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status = match kind {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Unauthorized => StatusCode::FORBIDDEN,
            ErrorKind::StateConflict => StatusCode::CONFLICT,
            ErrorKind::LedgerTransactionFailed => StatusCode::BAD_GATEWAY,
            ErrorKind::PersistenceFailure => StatusCode::ACCEPTED,
            ErrorKind::Internal => {
                error!("Request failed: {self}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let tx_hash = match &self {
            CoordinatorError::LedgerTransactionFailed { tx_hash, .. } => tx_hash.clone(),
            CoordinatorError::PersistenceFailure { tx_hash, .. } => Some(tx_hash.clone()),
            _ => None,
        };
        let body = ErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
            kind,
            tx_hash,
            status: (kind == ErrorKind::PersistenceFailure)
                .then(|| "confirmed_not_reflected".to_string()),
        };
        (status, Json(body)).into_response()
    }
}

/// 201 for a fresh mirror, 200 when the transaction was already mirrored.
fn mirrored<T: Serialize>(outcome: Mirror<T>) -> Response {
    match outcome {
        Mirror::Applied(v) => (StatusCode::CREATED, Json(v)).into_response(),
        Mirror::AlreadyApplied(v) => (StatusCode::OK, Json(v)).into_response(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareWinner {
    pub submission_id: i64,
}

// ─────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────

pub fn router<L: EscrowLedger>(state: Arc<ApiState<L>>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/bounties", get(list_bounties::<L>).post(create_bounty::<L>))
        .route("/bounties/prepare", post(prepare_bounty::<L>))
        .route("/bounties/:id", get(get_bounty::<L>))
        .route("/bounties/:id/submissions", get(list_submissions::<L>))
        .route(
            "/bounties/:id/submissions/prepare",
            post(prepare_submission::<L>),
        )
        .route("/bounties/:id/transactions", get(list_transactions::<L>))
        .route("/bounties/:id/reconcile", get(reconcile_bounty::<L>))
        .route("/bounties/:id/select-winner", post(select_winner::<L>))
        .route(
            "/bounties/:id/select-winner/prepare",
            post(prepare_winner::<L>),
        )
        .route("/bounties/:id/cancel", post(cancel_bounty::<L>))
        .route("/bounties/:id/cancel/prepare", post(prepare_cancel::<L>))
        .route("/bounties/:id/refund", post(claim_refund::<L>))
        .route("/bounties/:id/refund/prepare", post(prepare_refund::<L>))
        .route("/submissions", post(create_submission::<L>))
        .route("/users/:fid", get(get_user::<L>))
        .route("/transactions/:hash", get(get_transaction::<L>))
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /bounties?category=&status=&sortBy=&sortOrder=&limit=&offset=`
pub async fn list_bounties<L: EscrowLedger>(
    State(state): State<Arc<ApiState<L>>>,
    Query(filter): Query<BountyFilter>,
) -> ApiResult<Json<BountyPage>> {
    Ok(Json(state.coordinator.list_bounties(&filter).await?))
}

/// `POST /bounties/prepare`
///
/// Validates a draft and returns the funded `createBounty` call for the
/// creator's wallet.
pub async fn prepare_bounty<L: EscrowLedger>(
    State(state): State<Arc<ApiState<L>>>,
    Json(draft): Json<BountyDraft>,
) -> ApiResult<Json<PreparedBounty>> {
    Ok(Json(state.coordinator.prepare_bounty(&draft).await?))
}

/// `POST /bounties`
///
/// Mirrors a wallet-broadcast `createBounty` once it confirms.
pub async fn create_bounty<L: EscrowLedger>(
    State(state): State<Arc<ApiState<L>>>,
    Json(input): Json<CreateBountyRecord>,
) -> ApiResult<Response> {
    Ok(mirrored(state.coordinator.create_bounty_record(input).await?))
}

/// `GET /bounties/:id`
pub async fn get_bounty<L: EscrowLedger>(
    State(state): State<Arc<ApiState<L>>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Bounty>> {
    Ok(Json(state.coordinator.get_bounty(id).await?))
}

/// `GET /bounties/:id/submissions`
pub async fn list_submissions<L: EscrowLedger>(
    State(state): State<Arc<ApiState<L>>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Vec<Submission>>> {
    Ok(Json(state.coordinator.list_submissions(id).await?))
}

pub async fn prepare_submission<L: EscrowLedger>(
    State(state): State<Arc<ApiState<L>>>,
    Path(id): Path<i64>,
    Json(draft): Json<SubmissionDraft>,
) -> ApiResult<Json<PreparedCall>> {
    Ok(Json(state.coordinator.prepare_submission(id, &draft).await?))
}

/// `GET /bounties/:id/transactions`
pub async fn list_transactions<L: EscrowLedger>(
    State(state): State<Arc<ApiState<L>>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Vec<TransactionRecord>>> {
    Ok(Json(state.coordinator.list_transactions(id).await?))
}

/// `GET /bounties/:id/reconcile`
pub async fn reconcile_bounty<L: EscrowLedger>(
    State(state): State<Arc<ApiState<L>>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Reconciliation>> {
    Ok(Json(state.coordinator.reconcile_bounty(id).await?))
}

/// `POST /bounties/:id/select-winner`
pub async fn select_winner<L: EscrowLedger>(
    State(state): State<Arc<ApiState<L>>>,
    Path(id): Path<i64>,
    Json(input): Json<WinnerSelectionRecord>,
) -> ApiResult<Response> {
    Ok(mirrored(
        state.coordinator.record_winner_selection(id, input).await?,
    ))
}

pub async fn prepare_winner<L: EscrowLedger>(
    State(state): State<Arc<ApiState<L>>>,
    Path(id): Path<i64>,
    Json(input): Json<PrepareWinner>,
) -> ApiResult<Json<PreparedCall>> {
    Ok(Json(
        state
            .coordinator
            .prepare_winner_selection(id, input.submission_id)
            .await?,
    ))
}

/// `POST /bounties/:id/cancel`
pub async fn cancel_bounty<L: EscrowLedger>(
    State(state): State<Arc<ApiState<L>>>,
    Path(id): Path<i64>,
    Json(input): Json<LedgerTxRecord>,
) -> ApiResult<Response> {
    Ok(mirrored(state.coordinator.cancel_bounty(id, input).await?))
}

pub async fn prepare_cancel<L: EscrowLedger>(
    State(state): State<Arc<ApiState<L>>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<PreparedCall>> {
    Ok(Json(state.coordinator.prepare_cancel(id).await?))
}

/// `POST /bounties/:id/refund`
pub async fn claim_refund<L: EscrowLedger>(
    State(state): State<Arc<ApiState<L>>>,
    Path(id): Path<i64>,
    Json(input): Json<LedgerTxRecord>,
) -> ApiResult<Response> {
    Ok(mirrored(state.coordinator.claim_refund(id, input).await?))
}

pub async fn prepare_refund<L: EscrowLedger>(
    State(state): State<Arc<ApiState<L>>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<PreparedCall>> {
    Ok(Json(state.coordinator.prepare_refund(id).await?))
}

/// `POST /submissions`
///
/// With `txHash` this mirrors a confirmed `submitWork`; without it the
/// submission is recorded directly.
pub async fn create_submission<L: EscrowLedger>(
    State(state): State<Arc<ApiState<L>>>,
    Json(input): Json<CreateSubmissionRecord>,
) -> ApiResult<Response> {
    Ok(mirrored(
        state.coordinator.create_submission_record(input).await?,
    ))
}

/// `GET /users/:fid`
pub async fn get_user<L: EscrowLedger>(
    State(state): State<Arc<ApiState<L>>>,
    Path(fid): Path<i64>,
) -> ApiResult<Json<User>> {
    Ok(Json(state.coordinator.get_user(fid).await?))
}

/// `GET /transactions/:hash`
///
/// Looks up the mirror of a ledger transaction. A client that got a
/// `confirmed_not_reflected` answer polls this, or re-posts the original
/// request, until the record appears.
pub async fn get_transaction<L: EscrowLedger>(
    State(state): State<Arc<ApiState<L>>>,
    Path(hash): Path<String>,
) -> ApiResult<Json<TransactionRecord>> {
    Ok(Json(state.coordinator.get_transaction(&hash).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::Wei;
    use crate::coordinator::tests::{fail_inserts, funded_bounty, harness, restore_inserts, CREATOR};
    use crate::ledger::sim::SimLedger;
    use crate::ledger::EscrowCall;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn app() -> (Router, Coordinator<SimLedger>, Arc<SimLedger>) {
        let (coordinator, sim) = harness().await;
        let state = Arc::new(ApiState {
            coordinator: coordinator.clone(),
        });
        (router(state), coordinator, sim)
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (app, _, _) = app().await;
        let (status, body) = send(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn creation_is_201_then_200_on_replay() {
        let (app, _, sim) = app().await;
        let deadline = chrono::Utc::now().timestamp() as u64 + 86_400;
        let hash = sim.send(
            CREATOR,
            EscrowCall::CreateBounty {
                amount: Wei(1),
                deadline,
                metadata_hash: [1u8; 32],
            },
            Wei(1),
        );
        let body = serde_json::json!({
            "txHash": hash,
            "creatorFid": 1,
            "title": "Write a parser",
            "description": "A small parser for the config format",
            "category": "CODE",
        });

        let (status, created) = send(&app, post_json("/bounties", body.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["amountWei"], "1");
        assert_eq!(created["status"], "ACTIVE");

        let (status, replay) = send(&app, post_json("/bounties", body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(replay["id"], created["id"]);

        let (status, tx) = send(&app, get(&format!("/transactions/{hash}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(tx["kind"], "BOUNTY_CREATED");
    }

    #[tokio::test]
    async fn errors_carry_kind_and_code() {
        let (app, _, _) = app().await;

        let (status, body) = send(&app, get("/bounties/99")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "bounty_not_found");
        assert_eq!(body["kind"], "not_found");

        let malformed = serde_json::json!({
            "txHash": "0x12",
            "creatorFid": 1,
            "title": "Write a parser",
            "description": "A small parser for the config format",
            "category": "CODE",
        });
        let (status, body) = send(&app, post_json("/bounties", malformed)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "validation");
    }

    #[tokio::test]
    async fn reverted_transaction_is_bad_gateway_with_hash() {
        let (app, _, sim) = app().await;
        let deadline = chrono::Utc::now().timestamp() as u64 + 86_400;
        let hash = sim.send(
            CREATOR,
            EscrowCall::CreateBounty {
                amount: Wei::ONE_ETH,
                deadline,
                metadata_hash: [1u8; 32],
            },
            Wei::ZERO,
        );
        let body = serde_json::json!({
            "txHash": hash,
            "creatorFid": 1,
            "title": "Write a parser",
            "description": "A small parser for the config format",
            "category": "CODE",
        });
        let (status, body) = send(&app, post_json("/bounties", body)).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["kind"], "ledger_transaction_failed");
        assert_eq!(body["txHash"], hash.as_str());
    }

    #[tokio::test]
    async fn listing_accepts_query_filters() {
        let (app, coordinator, sim) = app().await;
        for _ in 0..3 {
            funded_bounty(&coordinator, &sim, Wei::ONE_ETH).await;
        }
        let (status, page) = send(
            &app,
            get("/bounties?status=ACTIVE&sortBy=amount&sortOrder=asc&limit=2"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["total"], 3);
        assert_eq!(page["bounties"].as_array().unwrap().len(), 2);
        assert_eq!(page["hasMore"], true);
    }

    #[tokio::test]
    async fn direct_submission_then_conflict_after_cancel() {
        let (app, coordinator, sim) = app().await;
        let bounty = funded_bounty(&coordinator, &sim, Wei::ONE_ETH).await;
        let submission = serde_json::json!({
            "bountyId": bounty.id,
            "submitterFid": 5,
            "submitterAddress": format!("0x{}", "55".repeat(20)),
            "externalUrl": "https://example.com/work",
        });
        let (status, _) = send(&app, post_json("/submissions", submission.clone())).await;
        assert_eq!(status, StatusCode::CREATED);

        let prepare = Request::post(format!("/bounties/{}/cancel/prepare", bounty.id))
            .body(Body::empty())
            .unwrap();
        let (status, prepared) = send(&app, prepare).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(prepared["function"], "cancelBounty");

        let cancel = sim.send(
            CREATOR,
            EscrowCall::CancelBounty {
                bounty_id: bounty.onchain_id as u64,
            },
            Wei::ZERO,
        );
        let (status, cancelled) = send(
            &app,
            post_json(
                &format!("/bounties/{}/cancel", bounty.id),
                serde_json::json!({ "txHash": cancel }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(cancelled["status"], "CANCELLED");

        let (status, body) = send(&app, post_json("/submissions", submission)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "bounty_not_active");
    }

    #[tokio::test]
    async fn unrecorded_confirmation_is_accepted_then_mirrored_on_resend() {
        let (app, coordinator, sim) = app().await;
        let deadline = chrono::Utc::now().timestamp() as u64 + 86_400;
        let hash = sim.send(
            CREATOR,
            EscrowCall::CreateBounty {
                amount: Wei(1),
                deadline,
                metadata_hash: [1u8; 32],
            },
            Wei(1),
        );
        let body = serde_json::json!({
            "txHash": hash,
            "creatorFid": 1,
            "title": "Write a parser",
            "description": "A small parser for the config format",
            "category": "CODE",
        });

        fail_inserts(&coordinator, "transactions").await;
        let (status, err) = send(&app, post_json("/bounties", body.clone())).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(err["status"], "confirmed_not_reflected");
        assert_eq!(err["kind"], "persistence_failure");
        assert_eq!(err["txHash"], hash);
        let (status, _) = send(&app, get(&format!("/transactions/{hash}"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        restore_inserts(&coordinator, "transactions").await;
        let (status, created) = send(&app, post_json("/bounties", body)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["creationTxHash"], hash);
    }
}
