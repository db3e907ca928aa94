// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! REST API example for the wallet ledger engine.
//!
//! Run with: `cargo run --example server`
//!
//! Identity comes from the path here; a real deployment puts an
//! authentication layer in front and derives the user id from the token.
//!
//! ## Endpoints
//!
//! - `GET  /wallets/{user_id}` - Get (or lazily create) a wallet
//! - `POST /wallets/{user_id}/topup` - Top up fiat
//! - `POST /wallets/{user_id}/buy` - Buy gold
//! - `POST /wallets/{user_id}/sell` - Sell gold
//! - `GET  /wallets/{user_id}/transactions` - Ledger history
//! - `PUT  /admin/wallets/{user_id}/lock` - Freeze or unfreeze a wallet
//!
//! ## Example Usage
//!
//! ```bash
//! curl -X POST http://localhost:3000/wallets/1/topup \
//!   -H "Content-Type: application/json" \
//!   -d '{"amount": "1000.00"}'
//!
//! curl -X POST http://localhost:3000/wallets/1/buy \
//!   -H "Content-Type: application/json" \
//!   -d '{"grams": "2", "price_per_gram": "100"}'
//!
//! curl http://localhost:3000/wallets/1/transactions
//! ```
//!
//! Set `WALLET_JOURNAL=/path/to/ledger.journal` to keep state across
//! restarts.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use gold_wallet_ledger::{
    Engine, JournalConfig, MemoryStore, Receipt, ReferenceId, StoreConfig, StoreError,
    Transaction, UserId, Wallet, WalletError,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

// === Request/Response Types ===

#[derive(Debug, Deserialize)]
pub struct TopUpRequest {
    pub amount: Decimal,
}

/// Shared by buy and sell.
#[derive(Debug, Deserialize)]
pub struct GoldRequest {
    pub grams: Decimal,
    pub price_per_gram: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct LockRequest {
    pub locked: bool,
}

#[derive(Debug, Serialize)]
pub struct OperationResponse {
    pub message: &'static str,
    #[serde(flatten)]
    pub receipt: Receipt,
}

#[derive(Debug, Serialize)]
pub struct WalletResponse {
    pub wallet: Wallet,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

// === Application State ===

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

impl AppState {
    /// Runs a blocking engine call off the async executor; it may wait on
    /// a wallet row lock.
    async fn run<T, F>(&self, call: F) -> Result<T, AppError>
    where
        T: Send + 'static,
        F: FnOnce(&Engine) -> Result<T, WalletError> + Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || call(&engine))
            .await
            .map_err(|e| AppError::Internal(e.to_string()))?
            .map_err(AppError::Wallet)
    }
}

// === Error Handling ===

pub enum AppError {
    Wallet(WalletError),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, error) = match self {
            AppError::Wallet(err) => {
                let (status, code) = match &err {
                    WalletError::InvalidAmount => (StatusCode::BAD_REQUEST, "INVALID_AMOUNT"),
                    WalletError::InsufficientBalance => {
                        (StatusCode::BAD_REQUEST, "INSUFFICIENT_BALANCE")
                    }
                    WalletError::WalletLocked => (StatusCode::LOCKED, "WALLET_LOCKED"),
                    WalletError::NotFound => (StatusCode::NOT_FOUND, "WALLET_NOT_FOUND"),
                    WalletError::Store(StoreError::LockTimeout { .. }) => {
                        (StatusCode::SERVICE_UNAVAILABLE, "LOCK_TIMEOUT")
                    }
                    WalletError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR"),
                };
                (status, code, err.to_string())
            }
            AppError::Internal(message) => {
                tracing::error!(error = %message, "handler task failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", message)
            }
        };

        (status, Json(ErrorResponse { error, code })).into_response()
    }
}

fn reference(prefix: &str) -> ReferenceId {
    ReferenceId::new(format!("{prefix}_{}", Uuid::new_v4()))
}

// === Handlers ===

/// GET /wallets/{user_id}
async fn get_wallet(
    State(state): State<AppState>,
    Path(user_id): Path<u64>,
) -> Result<Json<WalletResponse>, AppError> {
    let wallet = state
        .run(move |engine| engine.get_wallet(UserId(user_id)))
        .await?;
    Ok(Json(WalletResponse { wallet }))
}

/// POST /wallets/{user_id}/topup
async fn top_up(
    State(state): State<AppState>,
    Path(user_id): Path<u64>,
    Json(request): Json<TopUpRequest>,
) -> Result<Json<OperationResponse>, AppError> {
    let receipt = state
        .run(move |engine| engine.top_up(UserId(user_id), request.amount, reference("topup")))
        .await?;
    Ok(Json(OperationResponse {
        message: "top-up successful",
        receipt,
    }))
}

/// POST /wallets/{user_id}/buy
async fn buy_gold(
    State(state): State<AppState>,
    Path(user_id): Path<u64>,
    Json(request): Json<GoldRequest>,
) -> Result<Json<OperationResponse>, AppError> {
    let receipt = state
        .run(move |engine| {
            engine.buy_gold(
                UserId(user_id),
                request.grams,
                request.price_per_gram,
                reference("buy"),
            )
        })
        .await?;
    Ok(Json(OperationResponse {
        message: "gold purchase successful",
        receipt,
    }))
}

/// POST /wallets/{user_id}/sell
async fn sell_gold(
    State(state): State<AppState>,
    Path(user_id): Path<u64>,
    Json(request): Json<GoldRequest>,
) -> Result<Json<OperationResponse>, AppError> {
    let receipt = state
        .run(move |engine| {
            engine.sell_gold(
                UserId(user_id),
                request.grams,
                request.price_per_gram,
                reference("sell"),
            )
        })
        .await?;
    Ok(Json(OperationResponse {
        message: "gold sale successful",
        receipt,
    }))
}

/// GET /wallets/{user_id}/transactions
async fn list_transactions(
    State(state): State<AppState>,
    Path(user_id): Path<u64>,
) -> Result<Json<Vec<Transaction>>, AppError> {
    let transactions = state
        .run(move |engine| engine.get_user_transactions(UserId(user_id)))
        .await?;
    Ok(Json(transactions))
}

/// PUT /admin/wallets/{user_id}/lock
async fn set_lock(
    State(state): State<AppState>,
    Path(user_id): Path<u64>,
    Json(request): Json<LockRequest>,
) -> Result<Json<WalletResponse>, AppError> {
    let wallet = state
        .run(move |engine| engine.set_locked(UserId(user_id), request.locked))
        .await?;
    Ok(Json(WalletResponse { wallet }))
}

// === Router ===

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/wallets/{user_id}", get(get_wallet))
        .route("/wallets/{user_id}/topup", post(top_up))
        .route("/wallets/{user_id}/buy", post(buy_gold))
        .route("/wallets/{user_id}/sell", post(sell_gold))
        .route("/wallets/{user_id}/transactions", get(list_transactions))
        .route("/admin/wallets/{user_id}/lock", put(set_lock))
        .with_state(state)
}

// === Main ===

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut config = StoreConfig::in_memory();
    if let Ok(path) = std::env::var("WALLET_JOURNAL") {
        config = config.with_journal(JournalConfig::new(path));
    }
    let store = MemoryStore::open(config)?;
    let state = AppState {
        engine: Arc::new(Engine::new(store)),
    };

    let app = create_router(state);

    let addr = std::env::var("WALLET_BIND").unwrap_or_else(|_| "127.0.0.1:3000".to_owned());
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "wallet API server listening");

    axum::serve(listener, app).await?;
    Ok(())
}
