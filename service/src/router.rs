use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use pool::coordinator::SystemStats;
use pool::payment::PaymentStrategy;
use pool::{BatchReport, Farmer, LauncherId, Partial, Payout, PoolCoordinator};
use serde::{Deserialize, Serialize};
use tower_http::{classify::ServerErrorsFailureClass, trace::TraceLayer};
use tracing::{info_span, Span};

pub const ROOT_RESPONSE: &str = "ok";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolInfo {
    pub name: String,
    pub url: String,
    pub version: String,
    pub total_farmers: usize,
    pub strategy: PaymentStrategy,
    pub fee_percent: f64,
    pub min_payout: u64,
    pub minimum_difficulty: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub launcher_id: LauncherId,
    #[serde(default)]
    pub pool_url: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PayoutRequest {
    /// 0 settles the whole balance.
    #[serde(default)]
    pub amount: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RewardRequest {
    pub amount: u64,
}

struct AppState {
    pool: Arc<PoolCoordinator>,
    name: String,
    url: String,
}

/// Error returned by the handlers.
#[derive(Debug)]
pub enum ApiError {
    Pool(pool::Error),
    Internal(String),
}

impl From<pool::Error> for ApiError {
    fn from(e: pool::Error) -> Self {
        ApiError::Pool(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        use pool::Error;

        let e = match self {
            ApiError::Internal(msg) => {
                return (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response();
            }
            ApiError::Pool(e) => e,
        };
        let status = match &e {
            Error::AlreadyExists(_) => StatusCode::CONFLICT,
            Error::NotFound(_) | Error::NoPayoutHistory(_) => StatusCode::NOT_FOUND,
            Error::BelowMinimum { .. } | Error::InsufficientBalance { .. } => {
                StatusCode::BAD_REQUEST
            }
            Error::ValidationFailure { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Bridge { .. } => {
                tracing::error!("{e}: {:?}", std::error::Error::source(&e));
                StatusCode::BAD_GATEWAY
            }
        };
        (status, e.to_string()).into_response()
    }
}

/// Run a pool operation on the blocking pool. Anything that may reach the
/// bridge or the solver goes through here.
async fn blocking<T, F>(pool: &Arc<PoolCoordinator>, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&PoolCoordinator) -> T + Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || f(&pool))
        .await
        .map_err(|e| {
            tracing::error!("pool task failed: {e:?}");
            ApiError::Internal("internal error".into())
        })
}

async fn root() -> impl IntoResponse {
    ROOT_RESPONSE
}

async fn pool_info(State(state): State<Arc<AppState>>) -> Json<PoolInfo> {
    let cfg = state.pool.config();
    Json(PoolInfo {
        name: state.name.clone(),
        url: state.url.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        total_farmers: state.pool.registry().count(),
        strategy: cfg.payments.strategy,
        fee_percent: cfg.payments.fee_percent,
        min_payout: cfg.payments.min_payout,
        minimum_difficulty: state.pool.difficulty().difficulty_range().0,
    })
}

async fn register_farmer(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<Farmer>), ApiError> {
    let url = req.pool_url.unwrap_or_else(|| state.url.clone());
    let farmer = blocking(&state.pool, move |pool| {
        pool.register_farmer(req.launcher_id, &url)
    })
    .await??;
    Ok((StatusCode::CREATED, Json(farmer)))
}

async fn get_farmer(
    State(state): State<Arc<AppState>>,
    Path(launcher_id): Path<LauncherId>,
) -> Result<Json<Farmer>, ApiError> {
    Ok(Json(state.pool.farmer(&launcher_id)?))
}

async fn submit_partial(
    State(state): State<Arc<AppState>>,
    Json(partial): Json<Partial>,
) -> Result<Json<Farmer>, ApiError> {
    tracing::debug!("partial from {}", partial.launcher_id);
    let farmer = blocking(&state.pool, move |pool| pool.submit_partial(&partial)).await??;
    Ok(Json(farmer))
}

async fn payout_history(
    State(state): State<Arc<AppState>>,
    Path(launcher_id): Path<LauncherId>,
) -> Result<Json<Vec<Payout>>, ApiError> {
    Ok(Json(state.pool.payout_history(&launcher_id)?))
}

async fn request_payout(
    State(state): State<Arc<AppState>>,
    Path(launcher_id): Path<LauncherId>,
    req: Option<Json<PayoutRequest>>,
) -> Result<Json<Payout>, ApiError> {
    let Json(req) = req.unwrap_or_default();
    let payout = blocking(&state.pool, move |pool| {
        pool.request_payout(&launcher_id, req.amount)
    })
    .await??;
    Ok(Json(payout))
}

async fn list_farmers(State(state): State<Arc<AppState>>) -> Json<Vec<Farmer>> {
    Json(state.pool.farmers())
}

async fn distribute_reward(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RewardRequest>,
) -> Result<Json<BatchReport<u64>>, ApiError> {
    let report = blocking(&state.pool, move |pool| pool.distribute_reward(req.amount)).await?;
    Ok(Json(report))
}

async fn process_payouts(
    State(state): State<Arc<AppState>>,
) -> Result<Json<BatchReport<Payout>>, ApiError> {
    let report = blocking(&state.pool, |pool| pool.process_all_payouts()).await?;
    Ok(Json(report))
}

async fn stats(State(state): State<Arc<AppState>>) -> Json<SystemStats> {
    Json(state.pool.system_stats())
}

pub fn new(pool: Arc<PoolCoordinator>, name: String, url: String) -> Router {
    let state = AppState { pool, name, url };

    Router::new()
        .route("/", get(root))
        .route("/pool_info", get(pool_info))
        .route("/farmer", post(register_farmer))
        .route("/farmer/:launcher_id", get(get_farmer))
        .route("/partial", post(submit_partial))
        .route(
            "/payouts/:launcher_id",
            get(payout_history).post(request_payout),
        )
        .route("/admin/farmers", get(list_farmers))
        .route("/admin/reward", post(distribute_reward))
        .route("/admin/payouts", post(process_payouts))
        .route("/admin/stats", get(stats))
        .with_state(Arc::new(state))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    info_span!(
                        "http_request",
                        method = ?request.method(),
                        uri = request.uri().to_string(),
                        status = tracing::field::Empty,
                    )
                })
                .on_response(|response: &Response, _latency: Duration, span: &Span| {
                    span.record("status", response.status().as_str());
                    tracing::debug!("served request");
                })
                .on_failure(
                    |error: ServerErrorsFailureClass, _latency: Duration, span: &Span| {
                        match error {
                            ServerErrorsFailureClass::StatusCode(code) => {
                                span.record("status", code.as_str());
                            }
                            ServerErrorsFailureClass::Error(err) => {
                                span.record("error", &err);
                            }
                        }
                        tracing::error!("request failed");
                    },
                ),
        )
}
