use axum::Json;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, header};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::engine::GateReport;
use crate::error::Error;
use crate::evidence::{EvidenceBlob, EvidenceRef};
use crate::model::{
    AttendanceRecord, ItemId, LinkId, PerformanceRecord, Quality, Rating, ReviewItem, Role,
    SubtaskId, Task, UserId, Verdict, VerifiedSet,
};
use crate::queue::QueueSnapshot;
use crate::walker::{LinkRoute, TaskView};

use super::{ApiError, AppState, Caller};

type ApiResult<T> = Result<Json<T>, ApiError>;

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Managers may act for anyone; everyone else only for themselves.
fn acting_for(caller: &Caller, target: Option<UserId>) -> Result<UserId, ApiError> {
    let me = &caller.0;
    match target {
        None => Ok(me.id),
        Some(id) if id == me.id || me.role == Role::Manager => Ok(id),
        Some(id) => Err(Error::Unauthorized(format!("user {} cannot act for user {id}", me.id)).into()),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DateQuery {
    pub date: Option<NaiveDate>,
}

// ---------------------------------------------------------------------------
// Review sessions
// ---------------------------------------------------------------------------

pub async fn session_start(State(s): State<AppState>, caller: Caller) -> ApiResult<QueueSnapshot> {
    Ok(Json(s.engine.start_review_session(&caller.0).await?))
}

pub async fn session_pause(State(s): State<AppState>, caller: Caller) -> ApiResult<QueueSnapshot> {
    Ok(Json(s.engine.pause_review_session(&caller.0).await?))
}

pub async fn session_resume(State(s): State<AppState>, caller: Caller) -> ApiResult<QueueSnapshot> {
    Ok(Json(s.engine.resume_review_session(&caller.0).await?))
}

pub async fn session_stop(State(s): State<AppState>, caller: Caller) -> ApiResult<QueueSnapshot> {
    Ok(Json(s.engine.stop_review_session(&caller.0).await?))
}

#[derive(Debug, Deserialize)]
pub struct NewReviewItem {
    pub id: ItemId,
    pub subject_worker_id: UserId,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub reviewer_id: Option<UserId>,
    pub items: Vec<NewReviewItem>,
}

pub async fn queue_enqueue(
    State(s): State<AppState>,
    caller: Caller,
    Json(req): Json<EnqueueRequest>,
) -> ApiResult<QueueSnapshot> {
    let reviewer = acting_for(&caller, req.reviewer_id)?;
    let items = req
        .items
        .into_iter()
        .map(|i| ReviewItem::new(i.id, i.subject_worker_id, i.payload))
        .collect();
    Ok(Json(s.engine.enqueue_review_items(reviewer, items).await?))
}

#[derive(Debug, Deserialize)]
pub struct DecideRequest {
    pub item_id: ItemId,
    pub verdict: Verdict,
}

pub async fn queue_decide(
    State(s): State<AppState>,
    caller: Caller,
    Json(req): Json<DecideRequest>,
) -> ApiResult<QueueSnapshot> {
    Ok(Json(s.engine.decide(&caller.0, req.item_id, req.verdict).await?))
}

pub async fn queue_unlock(State(s): State<AppState>, caller: Caller) -> ApiResult<QueueSnapshot> {
    Ok(Json(s.engine.unlock_and_advance(&caller.0).await?))
}

pub async fn queue_state(State(s): State<AppState>, caller: Caller) -> ApiResult<QueueSnapshot> {
    Ok(Json(s.engine.queue_state(&caller.0).await?))
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub worker_id: Option<UserId>,
    pub task: Task,
}

pub async fn task_assign(
    State(s): State<AppState>,
    caller: Caller,
    Json(req): Json<AssignRequest>,
) -> ApiResult<TaskView> {
    let worker = acting_for(&caller, req.worker_id)?;
    Ok(Json(s.engine.assign_task(worker, req.task).await?))
}

pub async fn task_state(State(s): State<AppState>, caller: Caller) -> ApiResult<TaskView> {
    Ok(Json(s.engine.task_state(&caller.0).await?))
}

#[derive(Debug, Deserialize)]
pub struct LinkRequest {
    pub subtask_id: SubtaskId,
    pub link_id: LinkId,
}

pub async fn link_start(
    State(s): State<AppState>,
    caller: Caller,
    Json(req): Json<LinkRequest>,
) -> ApiResult<TaskView> {
    Ok(Json(
        s.engine
            .start_link_review(&caller.0, &req.subtask_id, &req.link_id)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct LinkCompleteRequest {
    pub subtask_id: SubtaskId,
    pub link_id: LinkId,
    pub quality: Quality,
}

pub async fn link_complete(
    State(s): State<AppState>,
    caller: Caller,
    Json(req): Json<LinkCompleteRequest>,
) -> ApiResult<TaskView> {
    Ok(Json(
        s.engine
            .complete_link_review(&caller.0, &req.subtask_id, &req.link_id, req.quality)
            .await?,
    ))
}

pub async fn link_reload(
    State(s): State<AppState>,
    caller: Caller,
    Json(req): Json<LinkRequest>,
) -> ApiResult<LinkRoute> {
    Ok(Json(
        s.engine
            .reload_link(&caller.0, &req.subtask_id, &req.link_id)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    #[serde(default)]
    pub subtask_id: Option<SubtaskId>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub evidence_ref: Option<EvidenceRef>,
    #[serde(default)]
    pub rating: Option<Rating>,
}

pub async fn subtask_complete(
    State(s): State<AppState>,
    caller: Caller,
    Json(req): Json<SubmitRequest>,
) -> ApiResult<TaskView> {
    let subtask = req
        .subtask_id
        .ok_or_else(|| Error::InvalidInput("subtask_id is required".into()))?;
    Ok(Json(
        s.engine
            .complete_subtask(&caller.0, &subtask, &req.notes, req.evidence_ref, req.rating)
            .await?,
    ))
}

pub async fn clicker_complete(
    State(s): State<AppState>,
    caller: Caller,
    Json(req): Json<SubmitRequest>,
) -> ApiResult<TaskView> {
    Ok(Json(
        s.engine
            .complete_clicker_phase(&caller.0, &req.notes, req.evidence_ref, req.rating)
            .await?,
    ))
}

pub async fn final_complete(
    State(s): State<AppState>,
    caller: Caller,
    Json(req): Json<SubmitRequest>,
) -> ApiResult<TaskView> {
    Ok(Json(
        s.engine
            .complete_final_submission(&caller.0, &req.notes)
            .await?,
    ))
}

// ---------------------------------------------------------------------------
// Evidence
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct EvidenceQuery {
    pub unit_id: String,
}

#[derive(Debug, Serialize)]
pub struct EvidenceUploaded {
    pub evidence_ref: EvidenceRef,
}

/// Raw screenshot bytes in the body; the unit rides in the query string.
pub async fn evidence_upload(
    State(s): State<AppState>,
    caller: Caller,
    Query(q): Query<EvidenceQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<EvidenceUploaded> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let blob = EvidenceBlob {
        content_type,
        bytes: body.to_vec(),
    };
    let evidence_ref = s.engine.upload_evidence(&caller.0, &q.unit_id, blob).await?;
    Ok(Json(EvidenceUploaded { evidence_ref }))
}

// ---------------------------------------------------------------------------
// Gate and ledgers
// ---------------------------------------------------------------------------

pub async fn gate_state(
    State(s): State<AppState>,
    caller: Caller,
    Query(q): Query<DateQuery>,
) -> ApiResult<GateReport> {
    let date = q.date.unwrap_or_else(today);
    Ok(Json(s.engine.gate_state(&caller.0, date).await?))
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub date: Option<NaiveDate>,
    pub subject_ids: Vec<UserId>,
}

pub async fn gate_verify(
    State(s): State<AppState>,
    caller: Caller,
    Json(req): Json<VerifyRequest>,
) -> ApiResult<VerifiedSet> {
    let date = req.date.unwrap_or_else(today);
    Ok(Json(
        s.engine
            .verify_team_attendance(&caller.0, date, &req.subject_ids)
            .await?,
    ))
}

pub async fn attendance_mark(
    State(s): State<AppState>,
    caller: Caller,
    Query(q): Query<DateQuery>,
) -> ApiResult<AttendanceRecord> {
    let date = q.date.unwrap_or_else(today);
    Ok(Json(s.engine.mark_attendance(&caller.0, date).await?))
}

#[derive(Debug, Deserialize)]
pub struct AttendanceDecision {
    pub date: Option<NaiveDate>,
    pub subject_id: UserId,
}

pub async fn attendance_approve(
    State(s): State<AppState>,
    caller: Caller,
    Json(req): Json<AttendanceDecision>,
) -> ApiResult<AttendanceRecord> {
    let date = req.date.unwrap_or_else(today);
    Ok(Json(
        s.engine
            .approve_attendance(&caller.0, date, req.subject_id)
            .await?,
    ))
}

pub async fn attendance_reject(
    State(s): State<AppState>,
    caller: Caller,
    Json(req): Json<AttendanceDecision>,
) -> ApiResult<AttendanceRecord> {
    let date = req.date.unwrap_or_else(today);
    Ok(Json(
        s.engine
            .reject_attendance(&caller.0, date, req.subject_id)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct PerformanceRequest {
    pub date: Option<NaiveDate>,
    pub worker_id: UserId,
    pub rating: Rating,
    #[serde(default)]
    pub notes: String,
}

pub async fn performance_mark(
    State(s): State<AppState>,
    caller: Caller,
    Json(req): Json<PerformanceRequest>,
) -> ApiResult<PerformanceRecord> {
    let date = req.date.unwrap_or_else(today);
    Ok(Json(
        s.engine
            .mark_performance(&caller.0, date, req.worker_id, req.rating, &req.notes)
            .await?,
    ))
}

pub async fn health(State(s): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "users": s.engine.directory().len(),
    }))
}
