//! HTTP surface: JSON routes plus the SSE event stream. Identity is an
//! external collaborator; the authenticated user id arrives as an opaque
//! `x-user-id` header which the core trusts.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use futures_util::stream::{self, Stream};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::app::AppState;
use crate::domain::entities::account::AccountKind;
use crate::domain::entities::order::OrderWithPnl;
use crate::domain::entities::position::Position;
use crate::domain::entities::wallet::Wallet;
use crate::domain::errors::EngineError;
use crate::domain::services::market::PriceTick;
use crate::domain::services::order_intake::{PlaceOrderRequest, PlacedOrder};
use crate::domain::services::position_manager::{OpenPositionView, UpdateStopsRequest};
use crate::domain::services::settlement::ClosedPosition;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/orders/market", post(place_order))
        .route("/orders/history", get(order_history))
        .route("/positions/open", get(open_positions))
        .route("/positions/:id/stops", patch(update_stops))
        .route("/positions/:id/close", post(close_position))
        .route("/market/prices", get(all_prices))
        .route("/market/price", post(set_price))
        .route("/wallet", get(wallets))
        .route("/wallet/credit", post(credit_wallet))
        .route("/events", get(events_stream))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(64 * 1024))
        .with_state(state)
}

/// Error envelope for the HTTP layer.
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::Validation(_)
            | EngineError::InsufficientFunds { .. }
            | EngineError::PositionNotOpen(_) => StatusCode::BAD_REQUEST,
            EngineError::PositionNotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Database(e) => {
                error!("request failed: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// Opaque authenticated user id from the `x-user-id` header.
pub struct CurrentUser(pub String);

#[axum::async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| CurrentUser(s.to_string()))
            .ok_or((
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "missing x-user-id header" })),
            ))
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "running" }))
}

async fn place_order(
    State(app): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<PlaceOrderRequest>,
) -> Result<Json<PlacedOrder>, ApiError> {
    Ok(Json(app.orders.place_order(&user, req).await?))
}

async fn order_history(
    State(app): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<OrderWithPnl>>, ApiError> {
    Ok(Json(app.orders.history(&user).await?))
}

async fn open_positions(
    State(app): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<OpenPositionView>>, ApiError> {
    Ok(Json(app.positions.list_open(&user).await?))
}

async fn update_stops(
    State(app): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateStopsRequest>,
) -> Result<Json<Position>, ApiError> {
    Ok(Json(app.positions.update_stops(&user, &id, req).await?))
}

async fn close_position(
    State(app): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Option<ClosedPosition>>, ApiError> {
    Ok(Json(app.positions.close(&user, &id).await?))
}

async fn all_prices(State(app): State<Arc<AppState>>) -> Json<HashMap<String, f64>> {
    Json(app.market.all_prices().await)
}

#[derive(Debug, Deserialize)]
struct SetPriceRequest {
    symbol: String,
    price: f64,
}

async fn set_price(
    State(app): State<Arc<AppState>>,
    Json(req): Json<SetPriceRequest>,
) -> Result<Json<PriceTick>, ApiError> {
    Ok(Json(app.market.set_price(&req.symbol, req.price).await?))
}

async fn wallets(
    State(app): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<Wallet>>, ApiError> {
    Ok(Json(app.ledger.balances(&user).await?))
}

/// Deposit-confirmation contract: the payment collaborator credits a
/// confirmed external payment to the user's real wallet exactly once
/// (idempotency is the caller's responsibility).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreditRequest {
    user_id: String,
    amount: f64,
}

async fn credit_wallet(
    State(app): State<Arc<AppState>>,
    Json(req): Json<CreditRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !req.amount.is_finite() || req.amount <= 0.0 {
        return Err(EngineError::validation("amount_invalid").into());
    }
    let balance = app
        .ledger
        .credit(&req.user_id, req.amount, AccountKind::Real)
        .await?;
    Ok(Json(
        json!({ "userId": req.user_id, "kind": "real", "amount": balance }),
    ))
}

async fn events_stream(
    State(app): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = app.events.subscribe();

    let stream = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let data = serde_json::to_value(&event)
                        .ok()
                        .and_then(|v| v.get("data").cloned())
                        .unwrap_or(serde_json::Value::Null);
                    match Event::default().event(event.kind()).json_data(&data) {
                        Ok(sse_event) => return Some((Ok(sse_event), rx)),
                        Err(e) => {
                            error!("failed to serialize event: {}", e);
                            continue;
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("event subscriber lagged, {} events dropped", skipped);
                    continue;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
