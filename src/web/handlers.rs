use super::{AppState, Result};
use crate::auth::Principal;
use crate::beneficiary::Beneficiary;
use crate::coordinator::{Evaluation, ResponseReceipt};
use crate::core::{BeneficiaryId, CycleId, InvitationDecision, LifecycleState, TrusteeId, UserId, Verdict};
use crate::facade::{ConsoleEntry, InvitationView, PurgeReport, SettingsUpdate, UserStatus};
use crate::release::ReleaseReceipt;
use crate::trustee::{InviteOutcome, TrusteeRelationship};
use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

type Body<T> = std::result::Result<Json<T>, JsonRejection>;
type PathParam<T> = std::result::Result<Path<T>, PathRejection>;

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

// ============================================================================
// Owner
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub inactivity_threshold_days: Option<u32>,
}

pub async fn register(
    State(vigil): State<AppState>,
    principal: Principal,
    body: Body<RegisterRequest>,
) -> Result<(StatusCode, Json<UserStatus>)> {
    let owner = principal.as_user()?;
    let Json(request) = body?;
    vigil
        .register_user(&owner, request.inactivity_threshold_days)
        .await?;
    Ok((StatusCode::CREATED, Json(vigil.status(&owner).await?)))
}

pub async fn status(State(vigil): State<AppState>, principal: Principal) -> Result<Json<UserStatus>> {
    let owner = principal.as_user()?;
    Ok(Json(vigil.status(&owner).await?))
}

#[derive(Debug, Serialize)]
pub struct PulseResponse {
    pub state: LifecycleState,
    pub last_active_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub closed_cycle_id: Option<CycleId>,
}

pub async fn pulse(State(vigil): State<AppState>, principal: Principal) -> Result<Json<PulseResponse>> {
    let owner = principal.as_user()?;
    let receipt = vigil.record_activity(&owner).await?;
    Ok(Json(PulseResponse {
        state: receipt.record.state(),
        last_active_at: receipt.record.last_active_at(),
        deadline: receipt.record.deadline(),
        closed_cycle_id: receipt.closed_cycle,
    }))
}

pub async fn update_settings(
    State(vigil): State<AppState>,
    principal: Principal,
    body: Body<SettingsUpdate>,
) -> Result<Json<UserStatus>> {
    let owner = principal.as_user()?;
    let Json(update) = body?;
    vigil.update_settings(&owner, &update).await?;
    Ok(Json(vigil.status(&owner).await?))
}

// ============================================================================
// Owner: trustees and beneficiaries
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct InviteRequest {
    pub contact: String,
    #[serde(default)]
    pub relation: String,
}

#[derive(Debug, Serialize)]
pub struct InviteResponse {
    pub trustee: TrusteeRelationship,
    pub outcome: InviteOutcome,
}

pub async fn list_trustees(
    State(vigil): State<AppState>,
    principal: Principal,
) -> Result<Json<Vec<TrusteeRelationship>>> {
    let owner = principal.as_user()?;
    Ok(Json(vigil.trustees_of(&owner).await?))
}

pub async fn invite_trustee(
    State(vigil): State<AppState>,
    principal: Principal,
    body: Body<InviteRequest>,
) -> Result<(StatusCode, Json<InviteResponse>)> {
    let owner = principal.as_user()?;
    let Json(request) = body?;
    let (trustee, outcome) = vigil
        .invite_trustee(&owner, &request.contact, &request.relation)
        .await?;
    let status = match outcome {
        InviteOutcome::Created => StatusCode::CREATED,
        InviteOutcome::Updated | InviteOutcome::Reinvited => StatusCode::OK,
    };
    Ok((status, Json(InviteResponse { trustee, outcome })))
}

pub async fn remove_trustee(
    State(vigil): State<AppState>,
    principal: Principal,
    path: PathParam<TrusteeId>,
) -> Result<Json<TrusteeRelationship>> {
    let owner = principal.as_user()?;
    let Path(trustee_id) = path?;
    Ok(Json(vigil.remove_trustee(&owner, trustee_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct BeneficiaryRequest {
    pub name: String,
    pub contact: String,
    #[serde(default)]
    pub relation: String,
}

pub async fn list_beneficiaries(
    State(vigil): State<AppState>,
    principal: Principal,
) -> Result<Json<Vec<Beneficiary>>> {
    let owner = principal.as_user()?;
    Ok(Json(vigil.beneficiaries_of(&owner).await?))
}

pub async fn add_beneficiary(
    State(vigil): State<AppState>,
    principal: Principal,
    body: Body<BeneficiaryRequest>,
) -> Result<(StatusCode, Json<Beneficiary>)> {
    let owner = principal.as_user()?;
    let Json(request) = body?;
    let beneficiary = vigil
        .add_beneficiary(&owner, &request.name, &request.contact, &request.relation)
        .await?;
    Ok((StatusCode::CREATED, Json(beneficiary)))
}

pub async fn remove_beneficiary(
    State(vigil): State<AppState>,
    principal: Principal,
    path: PathParam<BeneficiaryId>,
) -> Result<Json<Beneficiary>> {
    let owner = principal.as_user()?;
    let Path(id) = path?;
    Ok(Json(vigil.remove_beneficiary(&owner, id).await?))
}

// ============================================================================
// Trustee
// ============================================================================

pub async fn my_invitations(
    State(vigil): State<AppState>,
    principal: Principal,
) -> Result<Json<Vec<InvitationView>>> {
    let contact = principal.as_trustee()?;
    Ok(Json(vigil.invitations_for(&contact).await?))
}

#[derive(Debug, Deserialize)]
pub struct AnswerRequest {
    pub decision: InvitationDecision,
}

pub async fn answer_invitation(
    State(vigil): State<AppState>,
    principal: Principal,
    path: PathParam<TrusteeId>,
    body: Body<AnswerRequest>,
) -> Result<Json<TrusteeRelationship>> {
    let contact = principal.as_trustee()?;
    let Path(trustee_id) = path?;
    let Json(request) = body?;
    Ok(Json(
        vigil
            .respond_to_invitation(&contact, trustee_id, request.decision)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct CycleResponseRequest {
    pub trustee_id: TrusteeId,
    pub cycle_id: CycleId,
    pub verdict: Verdict,
}

pub async fn cycle_response(
    State(vigil): State<AppState>,
    principal: Principal,
    body: Body<CycleResponseRequest>,
) -> Result<Json<ResponseReceipt>> {
    let contact = principal.as_trustee()?;
    let Json(request) = body?;
    Ok(Json(
        vigil
            .submit_cycle_response(&contact, request.trustee_id, request.cycle_id, request.verdict)
            .await?,
    ))
}

// ============================================================================
// Administrator
// ============================================================================

pub async fn admin_console(
    State(vigil): State<AppState>,
    principal: Principal,
) -> Result<Json<Vec<ConsoleEntry>>> {
    principal.as_admin()?;
    Ok(Json(vigil.admin_console().await))
}

pub async fn user_trustees(
    State(vigil): State<AppState>,
    principal: Principal,
    path: PathParam<String>,
) -> Result<Json<Vec<TrusteeRelationship>>> {
    principal.as_admin()?;
    let Path(id) = path?;
    Ok(Json(vigil.trustees_of(&UserId::from(id)).await?))
}

pub async fn evaluate_user(
    State(vigil): State<AppState>,
    principal: Principal,
    path: PathParam<String>,
) -> Result<Json<Evaluation>> {
    principal.as_admin()?;
    let Path(id) = path?;
    Ok(Json(vigil.evaluate(&UserId::from(id)).await?))
}

pub async fn release_user(
    State(vigil): State<AppState>,
    principal: Principal,
    path: PathParam<String>,
) -> Result<Json<ReleaseReceipt>> {
    let admin = principal.as_admin()?;
    let Path(id) = path?;
    Ok(Json(vigil.release(&UserId::from(id), &admin).await?))
}

pub async fn purge_user(
    State(vigil): State<AppState>,
    principal: Principal,
    path: PathParam<String>,
) -> Result<Json<PurgeReport>> {
    principal.as_admin()?;
    let Path(id) = path?;
    Ok(Json(vigil.purge_user(&UserId::from(id)).await?))
}
