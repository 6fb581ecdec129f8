//! Employee and approval-workflow endpoints, mounted under `/api/employees`.
//!
//! - `GET  /`                                    — enabled accounts, manager expanded
//! - `GET  /search?query=`                       — name/email search
//! - `GET  /search-managers?query=`              — search scoped to managers
//! - `GET  /without-managers`, `/with-managers`  — claim views
//! - `GET  /{user_id}`                           — single employee
//! - `GET  /{user_id}/direct-reports`            — reports one level down
//! - `GET  /{user_id}/managers`                  — management chain upward
//! - `GET  /{user_id}/org-chart`                 — chain + reports (or siblings)
//! - `POST /{user_id}/assign-manager?force=`     — direct manager-link write
//! - `POST /assign-managers?force=`              — bulk manager-link write
//! - `POST /{user_id}/unassign-manager`          — drop the manager link
//! - `POST /unassign-managers`                   — bulk drop
//! - `GET  /{user_id}/exists-in-group/{group_id}`— group membership check
//! - `POST /assign-to-self` (+ batch)            — claim-for-myself workflow
//! - `POST /assign-to-others` (+ batch)          — hand-to-another workflow
//! - `POST /approve`, `/decline`, `/cancel`      — act on a pending request
//! - `GET  /{user_id}/approvals/...`             — initiated / pending-action /
//!                                                 pending-acceptance listings

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use orgchart_core::workflow::{BatchMode, DirectoryError, ErrorKind, SubmitRequest, WorkflowEngine, WorkflowError};
use orgchart_core::{Employee, ReassignmentRequest, RequestId};
use orgchart_directory::GraphClient;

#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<WorkflowEngine>,
    pub directory: Arc<GraphClient>,
}

/// Uniform response envelope; failures carry `isSuccess = false` and no data.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub is_success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self { is_success: true, message: "successful".to_string(), data: Some(data) })
    }
}

impl ApiResponse<()> {
    fn ok_empty() -> Json<Self> {
        Json(Self { is_success: true, message: "successful".to_string(), data: None })
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()> { is_success: false, message: self.message, data: None };
        (self.status, Json(body)).into_response()
    }
}

impl From<WorkflowError> for ApiError {
    fn from(error: WorkflowError) -> Self {
        let status = match error.kind() {
            ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Upstream => StatusCode::BAD_GATEWAY,
        };
        if status == StatusCode::BAD_GATEWAY {
            warn!(error = %error, "workflow operation failed upstream");
        }
        Self { status, message: error.to_string() }
    }
}

impl From<DirectoryError> for ApiError {
    fn from(error: DirectoryError) -> Self {
        let status = match &error {
            DirectoryError::UserNotFound(_) => StatusCode::NOT_FOUND,
            DirectoryError::AlreadyClaimed { .. } => StatusCode::CONFLICT,
            DirectoryError::Upstream(_) => StatusCode::BAD_GATEWAY,
        };
        if status == StatusCode::BAD_GATEWAY {
            warn!(error = %error, "directory request failed");
        }
        Self { status, message: error.to_string() }
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(list_employees))
        .route("/search", get(search_employees))
        .route("/search-managers", get(search_managers))
        .route("/without-managers", get(without_managers))
        .route("/with-managers", get(with_managers))
        .route("/assign-managers", post(assign_managers))
        .route("/unassign-managers", post(unassign_managers))
        .route("/assign-to-self", post(assign_to_self))
        .route("/batch-assign-to-self", post(batch_assign_to_self))
        .route("/assign-to-others", post(assign_to_others))
        .route("/batch-assign-to-others", post(batch_assign_to_others))
        .route("/approve", post(approve))
        .route("/decline", post(decline))
        .route("/cancel", post(cancel))
        .route("/{user_id}", get(get_employee))
        .route("/{user_id}/direct-reports", get(direct_reports))
        .route("/{user_id}/managers", get(managers))
        .route("/{user_id}/org-chart", get(org_chart))
        .route("/{user_id}/assign-manager", post(assign_manager))
        .route("/{user_id}/unassign-manager", post(unassign_manager))
        .route("/{user_id}/exists-in-group/{group_id}", get(exists_in_group))
        .route("/{user_id}/approvals/initiated", get(approvals_initiated))
        .route("/{user_id}/approvals/pending-action", get(approvals_pending_action))
        .route("/{user_id}/approvals/pending-acceptance", get(approvals_pending_acceptance))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / query types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub query: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ForceQuery {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerUpdateRequest {
    pub manager_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchManagerUpdateRequest {
    pub user_ids: Vec<String>,
    pub manager_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchUnassignRequest {
    pub user_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    pub id: i64,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeclineRequest {
    pub id: i64,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub id: i64,
}

// ---------------------------------------------------------------------------
// Employee browse
// ---------------------------------------------------------------------------

async fn list_employees(State(state): State<ApiState>) -> ApiResult<Vec<Employee>> {
    Ok(ApiResponse::ok(state.directory.list_users().await?))
}

async fn get_employee(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
) -> ApiResult<Employee> {
    Ok(ApiResponse::ok(state.directory.get_user(&user_id).await?))
}

async fn direct_reports(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
) -> ApiResult<Vec<Employee>> {
    Ok(ApiResponse::ok(state.directory.direct_reports(&user_id).await?))
}

async fn managers(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
) -> ApiResult<Vec<Employee>> {
    Ok(ApiResponse::ok(state.directory.manager_chain(&user_id, false).await?))
}

async fn org_chart(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
) -> ApiResult<Vec<Employee>> {
    Ok(ApiResponse::ok(state.directory.org_chart(&user_id).await?))
}

async fn search_employees(
    State(state): State<ApiState>,
    Query(params): Query<SearchQuery>,
) -> ApiResult<Vec<Employee>> {
    Ok(ApiResponse::ok(state.directory.search_users(&params.query).await?))
}

async fn search_managers(
    State(state): State<ApiState>,
    Query(params): Query<SearchQuery>,
) -> ApiResult<Vec<Employee>> {
    Ok(ApiResponse::ok(state.directory.search_managers(&params.query).await?))
}

async fn without_managers(State(state): State<ApiState>) -> ApiResult<Vec<Employee>> {
    Ok(ApiResponse::ok(state.directory.users_without_managers().await?))
}

async fn with_managers(State(state): State<ApiState>) -> ApiResult<Vec<Employee>> {
    Ok(ApiResponse::ok(state.directory.users_with_managers().await?))
}

async fn exists_in_group(
    State(state): State<ApiState>,
    Path((user_id, group_id)): Path<(String, String)>,
) -> ApiResult<bool> {
    Ok(ApiResponse::ok(state.directory.exists_in_group(&user_id, &group_id).await?))
}

// ---------------------------------------------------------------------------
// Direct manager-link writes
// ---------------------------------------------------------------------------

async fn assign_manager(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
    Query(params): Query<ForceQuery>,
    Json(body): Json<ManagerUpdateRequest>,
) -> ApiResult<()> {
    use orgchart_core::workflow::DirectoryProvider;
    state.directory.assign_manager(&user_id, &body.manager_id, params.force).await?;
    Ok(ApiResponse::ok_empty())
}

async fn assign_managers(
    State(state): State<ApiState>,
    Query(params): Query<ForceQuery>,
    Json(body): Json<BatchManagerUpdateRequest>,
) -> ApiResult<()> {
    use orgchart_core::workflow::DirectoryProvider;
    state
        .directory
        .assign_manager_bulk(&body.user_ids, &body.manager_id, params.force)
        .await?;
    Ok(ApiResponse::ok_empty())
}

async fn unassign_manager(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
) -> ApiResult<()> {
    use orgchart_core::workflow::DirectoryProvider;
    state.directory.clear_manager(&user_id).await?;
    Ok(ApiResponse::ok_empty())
}

async fn unassign_managers(
    State(state): State<ApiState>,
    Json(body): Json<BatchUnassignRequest>,
) -> ApiResult<()> {
    use orgchart_core::workflow::DirectoryProvider;
    for user_id in &body.user_ids {
        state.directory.clear_manager(user_id).await?;
    }
    Ok(ApiResponse::ok_empty())
}

// ---------------------------------------------------------------------------
// Reassignment workflow
// ---------------------------------------------------------------------------

async fn assign_to_self(
    State(state): State<ApiState>,
    Json(submission): Json<SubmitRequest>,
) -> ApiResult<()> {
    state.engine.submit_self_assignment(submission).await?;
    Ok(ApiResponse::ok_empty())
}

async fn batch_assign_to_self(
    State(state): State<ApiState>,
    Json(submissions): Json<Vec<SubmitRequest>>,
) -> ApiResult<()> {
    state.engine.submit_batch(submissions, BatchMode::Self_).await?;
    Ok(ApiResponse::ok_empty())
}

async fn assign_to_others(
    State(state): State<ApiState>,
    Json(submission): Json<SubmitRequest>,
) -> ApiResult<()> {
    state.engine.submit_assign_to_other(submission).await?;
    Ok(ApiResponse::ok_empty())
}

async fn batch_assign_to_others(
    State(state): State<ApiState>,
    Json(submissions): Json<Vec<SubmitRequest>>,
) -> ApiResult<()> {
    state.engine.submit_batch(submissions, BatchMode::Other).await?;
    Ok(ApiResponse::ok_empty())
}

async fn approve(
    State(state): State<ApiState>,
    Json(body): Json<ApproveRequest>,
) -> ApiResult<()> {
    state.engine.approve(RequestId(body.id), body.comment.as_deref()).await?;
    Ok(ApiResponse::ok_empty())
}

async fn decline(
    State(state): State<ApiState>,
    Json(body): Json<DeclineRequest>,
) -> ApiResult<()> {
    state.engine.decline(RequestId(body.id), &body.comment).await?;
    Ok(ApiResponse::ok_empty())
}

async fn cancel(State(state): State<ApiState>, Json(body): Json<CancelRequest>) -> ApiResult<()> {
    state.engine.cancel(RequestId(body.id)).await?;
    Ok(ApiResponse::ok_empty())
}

// ---------------------------------------------------------------------------
// Approval listings
// ---------------------------------------------------------------------------

async fn approvals_initiated(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
) -> ApiResult<Vec<ReassignmentRequest>> {
    Ok(ApiResponse::ok(state.engine.initiated_by(&user_id).await?))
}

async fn approvals_pending_action(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
) -> ApiResult<Vec<ReassignmentRequest>> {
    Ok(ApiResponse::ok(state.engine.pending_action_for(&user_id).await?))
}

async fn approvals_pending_acceptance(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
) -> ApiResult<Vec<ReassignmentRequest>> {
    Ok(ApiResponse::ok(state.engine.pending_acceptance_for(&user_id).await?))
}
