//! REST and webhook handlers.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::auth::{Principal, generate_api_key};
use super::{ApiError, AppState};
use crate::autoreply::types::{InboundMessage, RuleBook, Tactic};
use crate::campaigns::NewCampaignRequest;
use crate::error::ValidationError;
use crate::leads::{DEFAULT_LEAD_SOURCE, LeadSubmission, normalize_phone};
use crate::store::Account;
use crate::whatsapp::webhook::{
    VerifyParams, WebhookNotification, extract_text_messages, verify_subscription,
};

pub(crate) fn routes() -> axum::Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/account", get(current_account))
        .route("/api/leads/register", post(register_lead))
        .route("/api/leads", get(list_leads))
        .route("/api/campaign/create", post(create_campaign))
        .route("/api/campaigns", get(list_campaigns))
        .route("/api/chatbot/tactics", get(get_tactics).put(put_tactics))
        .route("/api/chatbot/toggle", post(toggle_auto_reply))
        .route("/api/admin/accounts", get(list_accounts).post(create_account))
        .route(
            "/webhook/whatsapp/{unique_id}",
            get(verify_webhook).post(receive_webhook),
        )
        .route("/api/inbound/{unique_id}", post(inbound_message))
}

async fn principal(state: &AppState, headers: &HeaderMap) -> Result<Principal, ApiError> {
    Ok(state.authorizer.authorize(headers).await?)
}

async fn account_by_unique_id(state: &AppState, unique_id: &str) -> Result<Account, ApiError> {
    state
        .store
        .get_account_by_unique_id(unique_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Account not found"))
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "bumby"
    }))
}

async fn current_account(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let principal = principal(&state, &headers).await?;
    let account = state
        .store
        .get_account(principal.account_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Account not found"))?;
    Ok(Json(json!({
        "account": account,
        "is_admin": principal.is_admin,
    })))
}

// ── Leads ───────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RegisterLeadQuery {
    unique_id: Option<String>,
    source: Option<String>,
}

async fn register_lead(
    State(state): State<AppState>,
    Query(query): Query<RegisterLeadQuery>,
    Json(submission): Json<LeadSubmission>,
) -> Result<impl IntoResponse, ApiError> {
    let unique_id = query
        .unique_id
        .filter(|u| !u.trim().is_empty())
        .ok_or(ValidationError::MissingFields("unique_id".into()))?;
    let account = account_by_unique_id(&state, &unique_id).await?;

    let lead = submission.into_lead(query.source.as_deref())?;
    let created = state.store.add_lead(account.id, &lead).await?;

    info!(
        account_id = %account.id,
        source = %lead.source,
        created,
        "Lead registered"
    );
    Ok(Json(json!({
        "message": format!("Lead from {} added", lead.source),
        "created": created,
    })))
}

async fn list_leads(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let principal = principal(&state, &headers).await?;
    let leads = state.store.list_leads(principal.account_id).await?;
    Ok(Json(leads))
}

// ── Campaigns ───────────────────────────────────────────────────────────

async fn create_campaign(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<NewCampaignRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = principal(&state, &headers).await?;
    let campaign = request.into_campaign(Utc::now())?;

    state
        .store
        .insert_campaign(principal.account_id, &campaign)
        .await?;

    info!(
        account_id = %principal.account_id,
        campaign_id = %campaign.campaign_id,
        recipients = campaign.leads.len(),
        "Campaign created"
    );
    Ok(Json(json!({
        "message": "Campaign created successfully",
        "campaign_id": campaign.campaign_id,
    })))
}

async fn list_campaigns(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let principal = principal(&state, &headers).await?;
    let campaigns = state.store.list_campaigns(principal.account_id).await?;
    Ok(Json(campaigns))
}

// ── Auto-reply settings ─────────────────────────────────────────────────

/// Either a full rule book or a bare list of tactics.
#[derive(Deserialize)]
#[serde(untagged)]
enum TacticsPayload {
    List(Vec<Tactic>),
    Book(RuleBook),
}

impl From<TacticsPayload> for RuleBook {
    fn from(payload: TacticsPayload) -> Self {
        match payload {
            TacticsPayload::List(tactics) => RuleBook {
                tactics,
                active_tactic: None,
            },
            TacticsPayload::Book(book) => book,
        }
    }
}

async fn get_tactics(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let principal = principal(&state, &headers).await?;
    let book = state.store.load_rule_book(principal.account_id).await?;
    Ok(Json(book))
}

async fn put_tactics(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<TacticsPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = principal(&state, &headers).await?;
    let book = RuleBook::from(payload);
    book.validate()?;

    state
        .store
        .save_rule_book(principal.account_id, &book)
        .await?;

    info!(
        account_id = %principal.account_id,
        tactics = book.tactics.len(),
        "Auto-reply tactics replaced"
    );
    Ok(Json(book))
}

#[derive(Deserialize)]
struct ToggleRequest {
    enabled: bool,
    /// Omitted leaves the stored instructions unchanged.
    #[serde(default)]
    instructions: Option<String>,
}

async fn toggle_auto_reply(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ToggleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = principal(&state, &headers).await?;
    state
        .store
        .set_auto_reply_enabled(principal.account_id, req.enabled)
        .await?;
    if let Some(instructions) = &req.instructions {
        state
            .store
            .set_assistant_instructions(principal.account_id, instructions)
            .await?;
    }
    let account = state
        .store
        .get_account(principal.account_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Account not found"))?;

    let cancelled = if req.enabled {
        0
    } else {
        state.dispatcher.cancel_account(principal.account_id).await
    };

    info!(
        account_id = %principal.account_id,
        enabled = req.enabled,
        cancelled,
        "Auto-reply toggled"
    );
    Ok(Json(json!({
        "enabled": req.enabled,
        "instructions": account.assistant_instructions,
        "cancelled": cancelled,
    })))
}

// ── Admin ───────────────────────────────────────────────────────────────

async fn list_accounts(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    principal(&state, &headers).await?.require_admin()?;
    let accounts = state.store.list_accounts().await?;
    Ok(Json(accounts))
}

#[derive(Deserialize)]
struct CreateAccountRequest {
    #[serde(default)]
    email: String,
}

async fn create_account(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateAccountRequest>,
) -> Result<impl IntoResponse, ApiError> {
    principal(&state, &headers).await?.require_admin()?;

    let email = req.email.trim().to_lowercase();
    if email.is_empty() {
        return Err(ValidationError::MissingFields("email".into()).into());
    }

    let api_key = generate_api_key();
    let account = state.store.create_account(&email, &api_key).await?;

    info!(account_id = %account.id, email = %account.email, "Account created by admin");
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "account": account,
            "api_key": api_key,
        })),
    ))
}

// ── Inbound ─────────────────────────────────────────────────────────────

async fn verify_webhook(
    State(state): State<AppState>,
    Path(unique_id): Path<String>,
    Query(params): Query<VerifyParams>,
) -> Result<impl IntoResponse, ApiError> {
    account_by_unique_id(&state, &unique_id).await?;

    let expected = state.verify_token.as_ref().map(|t| t.expose_secret());
    match verify_subscription(&params, expected) {
        Some(challenge) => {
            info!(unique_id = %unique_id, "WhatsApp webhook verified");
            Ok((StatusCode::OK, challenge))
        }
        None => {
            warn!(unique_id = %unique_id, "WhatsApp webhook verification refused");
            Err(ApiError::new(StatusCode::FORBIDDEN, "Verification failed"))
        }
    }
}

/// Always answers 200 so Meta does not redeliver on business outcomes.
async fn receive_webhook(
    State(state): State<AppState>,
    Path(unique_id): Path<String>,
    body: Bytes,
) -> StatusCode {
    let account = match state.store.get_account_by_unique_id(&unique_id).await {
        Ok(Some(account)) => account,
        Ok(None) => {
            warn!(unique_id = %unique_id, "Webhook for unknown account");
            return StatusCode::OK;
        }
        Err(e) => {
            warn!(unique_id = %unique_id, error = %e, "Webhook account lookup failed");
            return StatusCode::OK;
        }
    };

    let notification: WebhookNotification = match serde_json::from_slice(&body) {
        Ok(n) => n,
        Err(e) => {
            warn!(account_id = %account.id, error = %e, "Unparseable WhatsApp webhook payload");
            return StatusCode::OK;
        }
    };

    for message in extract_text_messages(&notification) {
        match state.dispatcher.handle_inbound(account.id, &message).await {
            Ok(outcome) => debug!(
                account_id = %account.id,
                message_id = %message.id,
                outcome = ?outcome,
                "WhatsApp message dispatched"
            ),
            Err(e) => warn!(
                account_id = %account.id,
                message_id = %message.id,
                error = %e,
                "WhatsApp message dispatch failed"
            ),
        }
    }

    StatusCode::OK
}

#[derive(Deserialize)]
struct InboundRequest {
    id: Option<String>,
    body: Option<String>,
    message: Option<String>,
    phone: Option<String>,
    name: Option<String>,
    source: Option<String>,
}

async fn inbound_message(
    State(state): State<AppState>,
    Path(unique_id): Path<String>,
    Json(req): Json<InboundRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let account = account_by_unique_id(&state, &unique_id).await?;

    let phone = req
        .phone
        .as_deref()
        .map(normalize_phone)
        .filter(|p| !p.is_empty())
        .ok_or(ValidationError::MissingFields("phone".into()))?;
    let platform = req
        .source
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_LEAD_SOURCE.to_string());
    let body = req.body.or(req.message).unwrap_or_default();

    let mut message = InboundMessage::new(platform, phone, body);
    if let Some(id) = req.id.filter(|id| !id.is_empty()) {
        message = message.with_id(id);
    }
    if let Some(name) = req.name.filter(|n| !n.is_empty()) {
        message = message.with_sender_name(name);
    }

    let outcome = state.dispatcher.handle_inbound(account.id, &message).await?;
    Ok(Json(outcome))
}
