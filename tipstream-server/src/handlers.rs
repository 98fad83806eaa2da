//! Axum routes for the payment service.
//!
//! | Route | Operation |
//! |---|---|
//! | `POST /v1/payment-links` | `CreatePaymentLink` |
//! | `POST /v1/transaction-status` | `CheckTransactionStatus` |
//! | `POST /v1/qr-code` | `GetPaymentQRCode`, PNG as base64 |
//! | `POST /v1/donation-status` | `UpdateDonationStatus` |
//! | `GET /qr/{nonce}` | raw PNG |
//! | `GET /payment/{nonce}` | donor payment page |
//! | `GET /payments` | every request |
//! | `GET /` | summary |
//! | `GET /health` | liveness |

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::{Method, header};
use serde::Serialize;
use tipstream::poller::{Poller, PollerStatsSnapshot};
use tipstream::request::{PaymentRequest, PaymentTerms};
use tipstream::service::{
    CheckTransactionStatusRequest, CheckTransactionStatusResponse, CreatePaymentLinkResponse,
    GetPaymentQrCodeRequest, PaymentService, ServiceSummary, UpdateDonationStatusRequest,
    UpdateDonationStatusResponse,
};
use tipstream::timestamp::Clock as _;
use tower_http::cors::{self, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::ServerError;
use crate::page;

/// Shared state behind every handler.
#[derive(Debug)]
pub struct AppState {
    /// Engine facade.
    pub service: PaymentService,
    /// Running poller, reported on the summary route.
    pub poller: Option<Arc<Poller>>,
}

/// State as handed to axum.
pub type SharedState = Arc<AppState>;

/// `GetPaymentQRCode` answer with the image inlined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QrCodeResponse {
    /// Base64 PNG.
    pub qr_code_image: String,
    /// Public URL serving the same PNG.
    pub qr_code_url: String,
}

/// `GET /` body.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryResponse {
    /// Request counts.
    #[serde(flatten)]
    pub summary: ServiceSummary,
    /// Poller counters, absent when no poller runs.
    pub poller: Option<PollerStatsSnapshot>,
}

/// Builds the router with tracing and permissive CORS.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(get_summary))
        .route("/health", get(health))
        .route("/payments", get(get_payments))
        .route("/qr/{nonce}", get(get_qr_png))
        .route("/payment/{nonce}", get(get_payment_page))
        .route("/v1/payment-links", post(post_payment_link))
        .route("/v1/transaction-status", post(post_transaction_status))
        .route("/v1/qr-code", post(post_qr_code))
        .route("/v1/donation-status", post(post_donation_status))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        )
        .with_state(state)
}

/// `POST /v1/payment-links`
///
/// # Errors
///
/// 400 for rejected terms or a malformed body.
pub async fn post_payment_link(
    State(state): State<SharedState>,
    body: Result<Json<PaymentTerms>, JsonRejection>,
) -> Result<Json<CreatePaymentLinkResponse>, ServerError> {
    let Json(terms) = body?;
    let created = state.service.create_payment_link(terms)?;
    Ok(Json(created))
}

/// `POST /v1/transaction-status`
///
/// # Errors
///
/// 404 when the payment URL matches no request.
pub async fn post_transaction_status(
    State(state): State<SharedState>,
    body: Result<Json<CheckTransactionStatusRequest>, JsonRejection>,
) -> Result<Json<CheckTransactionStatusResponse>, ServerError> {
    let Json(request) = body?;
    Ok(Json(state.service.check_transaction_status(&request.payment_url)?))
}

/// `POST /v1/qr-code`
///
/// # Errors
///
/// 404 for unknown requests, 500 if the image cannot be rendered.
pub async fn post_qr_code(
    State(state): State<SharedState>,
    body: Result<Json<GetPaymentQrCodeRequest>, JsonRejection>,
) -> Result<Json<QrCodeResponse>, ServerError> {
    let Json(request) = body?;
    let qr = state.service.get_payment_qr_code(&request.payment_url).await?;
    Ok(Json(QrCodeResponse {
        qr_code_image: STANDARD.encode(&qr.qr_code_image),
        qr_code_url: qr.qr_code_url,
    }))
}

/// `POST /v1/donation-status`
///
/// # Errors
///
/// 404 for unknown nonces, 409 for transitions outside the lifecycle.
pub async fn post_donation_status(
    State(state): State<SharedState>,
    body: Result<Json<UpdateDonationStatusRequest>, JsonRejection>,
) -> Result<Json<UpdateDonationStatusResponse>, ServerError> {
    let Json(update) = body?;
    Ok(Json(state.service.update_donation_status(update)?))
}

/// `GET /qr/{nonce}`
///
/// # Errors
///
/// 404 for unknown nonces.
pub async fn get_qr_png(
    State(state): State<SharedState>,
    Path(nonce): Path<String>,
) -> Result<impl IntoResponse, ServerError> {
    let png = state.service.qr_code_by_nonce(&nonce).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "image/png"),
            (header::CACHE_CONTROL, "public, max-age=3600"),
        ],
        png.to_vec(),
    ))
}

/// `GET /payment/{nonce}`
///
/// # Errors
///
/// 404 for unknown nonces.
pub async fn get_payment_page(
    State(state): State<SharedState>,
    Path(nonce): Path<String>,
) -> Result<Html<String>, ServerError> {
    let registry = state.service.registry();
    let request = registry.get(&nonce)?;
    Ok(Html(page::render(&request, registry.clock().now())))
}

/// `GET /payments`
pub async fn get_payments(State(state): State<SharedState>) -> Json<Vec<PaymentRequest>> {
    Json(state.service.payments())
}

/// `GET /`
pub async fn get_summary(State(state): State<SharedState>) -> Json<SummaryResponse> {
    Json(SummaryResponse {
        summary: state.service.summary(),
        poller: state.poller.as_ref().map(|p| p.stats().snapshot()),
    })
}

/// `GET /health`
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
