//! Simple REST API server example for the redemption engine.
//!
//! Run with: `cargo run --example server`
//!
//! ## Endpoints
//!
//! - `POST /grant` - Credit points to a wallet (fulfilment secret)
//! - `POST /reserve` - Hold points against an order (customer key)
//! - `POST /confirm` - Finalize a reservation by token (fulfilment secret)
//! - `POST /cancel` - Cancel a reservation by id (fulfilment secret)
//! - `GET /reservations/{id}` - Inspect a reservation (fulfilment secret)
//! - `GET /wallets` - List all wallet summaries
//!
//! Authentication is a demo stub: customers `alice` and `bob` authenticate
//! with `Bearer alice-key` / `Bearer bob-key`, and the fulfilment side with
//! `Bearer pos-secret`.
//!
//! ## Example Usage
//!
//! ```bash
//! # Fund a wallet
//! curl -X POST http://localhost:3000/grant \
//!   -H "Authorization: Bearer pos-secret" \
//!   -H "Content-Type: application/json" \
//!   -d '{"userId": "alice", "amount": 100}'
//!
//! # Reserve points at checkout
//! curl -X POST http://localhost:3000/reserve \
//!   -H "Authorization: Bearer alice-key" \
//!   -H "Content-Type: application/json" \
//!   -d '{"amount": 40, "orderId": "order-1"}'
//!
//! # Confirm with the returned token
//! curl -X POST http://localhost:3000/confirm \
//!   -H "Authorization: Bearer pos-secret" \
//!   -H "Content-Type: application/json" \
//!   -d '{"confirmationToken": "<token>", "expectedAmount": 40}'
//!
//! # List all wallets
//! curl http://localhost:3000/wallets
//! ```

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use points_ledger::{
    AccessFacade, CancelRequest, ConfirmRequest, ExpirySweeper, IdentityResolver,
    RedemptionEngine, RedemptionError, ReserveRequest, TrustedCaller, UserId, UserSummary,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

// === Demo Authentication ===

const POS_SECRET: &str = "pos-secret";

/// Static credential table standing in for a real identity provider.
struct DemoUsers;

impl IdentityResolver for DemoUsers {
    fn resolve(&self, credential: &str) -> Result<UserId, RedemptionError> {
        match credential {
            "alice-key" => Ok(UserId::from("alice")),
            "bob-key" => Ok(UserId::from("bob")),
            _ => Err(RedemptionError::Unauthorized),
        }
    }
}

/// Shared secret standing in for the fulfilment party's API credential.
struct DemoSecret(&'static str);

impl TrustedCaller for DemoSecret {
    fn is_trusted(&self, credential: &str) -> bool {
        credential == self.0
    }
}

type DemoFacade = AccessFacade<DemoUsers, DemoSecret>;

// === Request/Response DTOs ===

/// Request body for funding a wallet. Demo-only surface, so the fields are
/// simply required.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantRequest {
    pub user_id: String,
    pub amount: i64,
}

/// Response body for grants.
#[derive(Debug, Serialize)]
pub struct GrantResponse {
    pub user: String,
    pub balance: u64,
}

/// Response body for errors.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// === Application State ===

/// Shared application state: the facade for the public operations, the
/// engine for the demo extras (grant, wallet listing).
#[derive(Clone)]
pub struct AppState {
    pub facade: Arc<DemoFacade>,
    pub engine: Arc<RedemptionEngine>,
}

// === Error Handling ===

/// Wrapper for converting `RedemptionError` into HTTP responses.
pub struct AppError(RedemptionError);

impl From<RedemptionError> for AppError {
    fn from(err: RedemptionError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            RedemptionError::MissingAmount => (StatusCode::BAD_REQUEST, "MISSING_AMOUNT"),
            RedemptionError::InvalidAmount => (StatusCode::BAD_REQUEST, "INVALID_AMOUNT"),
            RedemptionError::InsufficientFunds { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "INSUFFICIENT_POINTS")
            }
            RedemptionError::MissingToken => (StatusCode::BAD_REQUEST, "MISSING_TOKEN"),
            RedemptionError::MissingReservationId => {
                (StatusCode::BAD_REQUEST, "MISSING_RESERVATION_ID")
            }
            RedemptionError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            RedemptionError::InvalidState => (StatusCode::CONFLICT, "INVALID_STATE"),
            RedemptionError::AmountMismatch { .. } => (StatusCode::CONFLICT, "AMOUNT_MISMATCH"),
            RedemptionError::Expired => (StatusCode::GONE, "EXPIRED"),
            RedemptionError::DuplicateToken => (StatusCode::CONFLICT, "DUPLICATE_TOKEN"),
            RedemptionError::StoreUnavailable => {
                (StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE")
            }
            RedemptionError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
        };

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

fn bearer(headers: &HeaderMap) -> Result<&str, AppError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(AppError(RedemptionError::Unauthorized))
}

// === Handlers ===

/// POST /grant - Credit points to a wallet.
async fn grant(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<GrantRequest>,
) -> Result<Json<GrantResponse>, AppError> {
    if bearer(&headers)? != POS_SECRET {
        return Err(AppError(RedemptionError::Unauthorized));
    }
    if request.amount <= 0 {
        return Err(AppError(RedemptionError::InvalidAmount));
    }
    let user = UserId::from(request.user_id);
    let balance = state.engine.grant(&user, request.amount as u64)?;
    Ok(Json(GrantResponse {
        user: user.to_string(),
        balance,
    }))
}

/// POST /reserve - Hold points against an order.
async fn reserve(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ReserveRequest>,
) -> Result<impl IntoResponse, AppError> {
    let receipt = state.facade.reserve(bearer(&headers)?, request)?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// POST /confirm - Finalize a reservation by its token.
async fn confirm(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ConfirmRequest>,
) -> Result<impl IntoResponse, AppError> {
    let receipt = state.facade.confirm(bearer(&headers)?, request)?;
    Ok(Json(receipt))
}

/// POST /cancel - Cancel a reservation by its id.
async fn cancel(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CancelRequest>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state.facade.cancel(bearer(&headers)?, request)?;
    Ok(Json(outcome))
}

/// GET /reservations/{id} - Inspect a reservation.
async fn get_reservation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let reservation = state.facade.inspect(bearer(&headers)?, &id)?;
    Ok(Json(reservation))
}

/// GET /wallets - List all wallet summaries.
async fn list_wallets(State(state): State<AppState>) -> Json<Vec<UserSummary>> {
    let mut users: Vec<UserId> = state
        .engine
        .wallets()
        .map(|entry| entry.key().clone())
        .collect();
    users.sort();

    Json(users.iter().map(|user| state.engine.summary(user)).collect())
}

// === Router ===

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/grant", post(grant))
        .route("/reserve", post(reserve))
        .route("/confirm", post(confirm))
        .route("/cancel", post(cancel))
        .route("/reservations/{id}", get(get_reservation))
        .route("/wallets", get(list_wallets))
        .with_state(state)
}

// === Main ===

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let engine = Arc::new(RedemptionEngine::new());
    let facade = Arc::new(AccessFacade::new(
        Arc::clone(&engine),
        DemoUsers,
        DemoSecret(POS_SECRET),
    ));

    // Reclaims abandoned reservations for as long as the server runs.
    let _sweeper = ExpirySweeper::spawn(Arc::clone(&engine));

    let state = AppState { facade, engine };
    let app = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:3000").await.unwrap();
    println!("Points Ledger API server running on http://127.0.0.1:3000");
    println!();
    println!("Endpoints:");
    println!("  POST /grant              - Credit points (Bearer pos-secret)");
    println!("  POST /reserve            - Reserve points (Bearer alice-key | bob-key)");
    println!("  POST /confirm            - Confirm by token (Bearer pos-secret)");
    println!("  POST /cancel             - Cancel by id (Bearer pos-secret)");
    println!("  GET  /reservations/{{id}} - Inspect a reservation (Bearer pos-secret)");
    println!("  GET  /wallets            - List wallet summaries");

    axum::serve(listener, app).await.unwrap();
}
