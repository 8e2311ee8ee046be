//! JSON API for the approval workflow.
//!
//! Endpoints:
//! - `POST /api/v1/approvals`                 — create an approval request
//! - `GET  /api/v1/approvals`                 — list approvals (AND-combined filters, paged)
//! - `GET  /api/v1/approvals/{id}`            — fetch a single approval
//! - `POST /api/v1/approvals/{id}/decision`   — decide a single approval
//! - `POST /api/v1/approvals/decisions`       — decide a batch of approvals
//! - `POST /api/v1/projects/{id}/transitions` — request a stage advance or rollback
//!
//! The identity provider in front of this service injects `x-actor-id` and
//! `x-actor-role` headers; they are trusted as-is.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use stagegate_core::authorization::AuthorizationGate;
use stagegate_core::domain::approval::{
    ApprovalId, ApprovalKind, ApprovalRequest, ApprovalStatus, Attachment, DecisionOutcome,
    NewApprovalRequest, Priority,
};
use stagegate_core::domain::project::{ProjectId, ProjectPhase};
use stagegate_core::domain::transition::StageTransition;
use stagegate_core::domain::user::{Actor, Role, UserId};
use stagegate_core::errors::{ErrorKind, WorkflowError};
use stagegate_db::repositories::{
    ApprovalFilter, ApprovalRepository, ApprovalSort, ProjectRepository, SortOrder,
};
use stagegate_workflow::{
    ApprovalLifecycle, BatchDecisionProcessor, StageTransitionCoordinator,
};

#[derive(Clone)]
pub struct ApiState {
    lifecycle: Arc<ApprovalLifecycle>,
    coordinator: Arc<StageTransitionCoordinator>,
    batch: BatchDecisionProcessor,
    approvals: Arc<dyn ApprovalRepository>,
    projects: Arc<dyn ProjectRepository>,
    gate: AuthorizationGate,
    refetch_threshold: usize,
}

impl ApiState {
    pub fn new(
        lifecycle: Arc<ApprovalLifecycle>,
        coordinator: Arc<StageTransitionCoordinator>,
        batch: BatchDecisionProcessor,
        approvals: Arc<dyn ApprovalRepository>,
        projects: Arc<dyn ProjectRepository>,
        gate: AuthorizationGate,
        refetch_threshold: usize,
    ) -> Self {
        Self { lifecycle, coordinator, batch, approvals, projects, gate, refetch_threshold }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/approvals", post(create_approval).get(list_approvals))
        .route("/api/v1/approvals/{id}", get(get_approval))
        .route("/api/v1/approvals/{id}/decision", post(decide_approval))
        .route("/api/v1/approvals/decisions", post(batch_decisions))
        .route("/api/v1/projects/{id}/transitions", post(request_transition))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateApprovalBody {
    pub kind: String,
    pub title: String,
    pub description: Option<String>,
    pub project_id: Option<String>,
    pub requested_to: String,
    pub priority: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Deserialize)]
pub struct DecisionBody {
    pub outcome: String,
    pub notes: Option<String>,
    pub rejection_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchDecisionBody {
    pub ids: Vec<String>,
    pub outcome: String,
    pub rejection_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TransitionBody {
    pub to_phase: String,
    pub reviewer: String,
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub kind: Option<String>,
    pub project_id: Option<String>,
    pub requested_to: Option<String>,
    pub priority: Option<String>,
    pub sort: Option<String>,
    pub order: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

/// `total` counts every row the filter matches, not the rows on this page.
/// `refetch_threshold` tells clients when a locally reconciled working set is
/// small enough that a full refetch is cheaper than patching it.
#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub items: Vec<ApprovalRequest>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
    pub refetch_threshold: usize,
}

#[derive(Debug, Serialize)]
pub struct BatchItemFailure {
    pub id: ApprovalId,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub succeeded: Vec<ApprovalId>,
    pub failed: Vec<BatchItemFailure>,
    pub summary: String,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

pub struct ApiError(WorkflowError);

impl From<WorkflowError> for ApiError {
    fn from(error: WorkflowError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Storage => StatusCode::SERVICE_UNAVAILABLE,
        };

        // Conflict and NotFound are expected outcomes, not system errors.
        match self.0.kind() {
            ErrorKind::Storage => {
                error!(event_name = "api.storage_error", error = %self.0, "request failed");
            }
            _ => {
                debug!(event_name = "api.request_rejected", kind = self.0.kind().as_str(), error = %self.0);
            }
        }

        (status, Json(ApiErrorBody { error: self.0.to_string() })).into_response()
    }
}

fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, ApiError> {
    let id = headers
        .get("x-actor-id")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| WorkflowError::validation("x-actor-id header is required"))?;

    let role_raw = headers
        .get("x-actor-role")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| WorkflowError::validation("x-actor-role header is required"))?;
    let role = Role::parse(role_raw).ok_or_else(|| {
        WorkflowError::validation(format!("unknown actor role `{role_raw}`"))
    })?;

    Ok(Actor::new(id, role))
}

fn parse_kind(value: &str) -> Result<ApprovalKind, ApiError> {
    ApprovalKind::parse(value)
        .ok_or_else(|| WorkflowError::validation(format!("unknown approval kind `{value}`")).into())
}

fn parse_outcome(value: &str) -> Result<DecisionOutcome, ApiError> {
    DecisionOutcome::parse(value).ok_or_else(|| {
        WorkflowError::validation(format!("unknown decision outcome `{value}`")).into()
    })
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn create_approval(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<CreateApprovalBody>,
) -> Result<(StatusCode, Json<ApprovalRequest>), ApiError> {
    let actor = actor_from_headers(&headers)?;
    let kind = parse_kind(&body.kind)?;
    let priority = match body.priority.as_deref() {
        Some(raw) => Priority::parse(raw).ok_or_else(|| {
            ApiError::from(WorkflowError::validation(format!("unknown priority `{raw}`")))
        })?,
        None => Priority::Medium,
    };

    let request = state
        .lifecycle
        .create(
            NewApprovalRequest {
                project_id: body.project_id.map(ProjectId),
                kind,
                title: body.title,
                description: body.description,
                requested_by: actor.id.clone(),
                requested_to: UserId(body.requested_to),
                priority,
                due_date: body.due_date,
                attachments: body.attachments,
            },
            &actor,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(request)))
}

async fn decide_approval(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<DecisionBody>,
) -> Result<Json<ApprovalRequest>, ApiError> {
    let actor = actor_from_headers(&headers)?;
    let outcome = parse_outcome(&body.outcome)?;

    let decided = state
        .lifecycle
        .decide(&ApprovalId(id), &actor, outcome, body.notes, body.rejection_reason)
        .await?;

    Ok(Json(decided))
}

async fn batch_decisions(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<BatchDecisionBody>,
) -> Result<Json<BatchResponse>, ApiError> {
    let actor = actor_from_headers(&headers)?;
    let outcome = parse_outcome(&body.outcome)?;
    if body.ids.is_empty() {
        return Err(WorkflowError::validation("batch ids must not be empty").into());
    }

    let ids = body.ids.into_iter().map(ApprovalId).collect();
    let report = state.batch.apply_batch(ids, &actor, outcome, body.rejection_reason).await;

    let summary = report.summary();
    Ok(Json(BatchResponse {
        succeeded: report.succeeded,
        failed: report
            .failed
            .into_iter()
            .map(|failure| BatchItemFailure {
                id: failure.id,
                kind: failure.kind,
                message: failure.message,
            })
            .collect(),
        summary,
    }))
}

async fn request_transition(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<TransitionBody>,
) -> Result<(StatusCode, Json<StageTransition>), ApiError> {
    let actor = actor_from_headers(&headers)?;
    let target = ProjectPhase::parse(&body.to_phase).ok_or_else(|| {
        ApiError::from(WorkflowError::validation(format!(
            "unknown project phase `{}`",
            body.to_phase
        )))
    })?;
    let reviewer = body.reviewer.trim();
    if reviewer.is_empty() {
        return Err(WorkflowError::validation("reviewer must not be blank").into());
    }

    let transition = state
        .coordinator
        .request_advance(
            &ProjectId(id),
            target,
            UserId(reviewer.to_string()),
            body.reason,
            &actor,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(transition)))
}

const DEFAULT_PER_PAGE: u32 = 25;
const MAX_PER_PAGE: u32 = 100;

async fn list_approvals(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>, ApiError> {
    let actor = actor_from_headers(&headers)?;
    let per_page = query.per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE);
    let page = query.page.unwrap_or(1).max(1);

    let filter = ApprovalFilter {
        status: parse_optional(query.status.as_deref(), ApprovalStatus::parse, "status")?,
        kind: parse_optional(query.kind.as_deref(), ApprovalKind::parse, "kind")?,
        project_id: query.project_id.clone().map(ProjectId),
        requested_to: query.requested_to.clone().map(UserId),
        priority: parse_optional(query.priority.as_deref(), Priority::parse, "priority")?,
        // Non-admins only see approvals they are a party to or share a
        // project with.
        visible_to: (!actor.role.is_administrative()).then(|| actor.id.clone()),
        sort: parse_sort(query.sort.as_deref())?,
        order: parse_order(query.order.as_deref())?,
        limit: Some(per_page),
        offset: Some((page - 1).saturating_mul(per_page)),
    };

    let items = state.approvals.list(&filter).await.map_err(WorkflowError::storage)?;
    let total = state.approvals.count(&filter).await.map_err(WorkflowError::storage)?;

    Ok(Json(ListResponse {
        items,
        total,
        page,
        per_page,
        refetch_threshold: state.refetch_threshold,
    }))
}

async fn get_approval(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ApprovalRequest>, ApiError> {
    let actor = actor_from_headers(&headers)?;
    let id = ApprovalId(id);

    let request = state
        .approvals
        .find_by_id(&id)
        .await
        .map_err(WorkflowError::storage)?
        .ok_or_else(|| WorkflowError::not_found("approval", id.as_str()))?;

    let project = match &request.project_id {
        Some(project_id) => state
            .projects
            .find_by_id(project_id)
            .await
            .map_err(WorkflowError::storage)?,
        None => None,
    };

    let gate = state.gate.can_view(&actor, &request, project.as_ref());
    if !gate.allowed {
        return Err(WorkflowError::forbidden(gate.reason).into());
    }

    Ok(Json(request))
}

fn parse_optional<T>(
    raw: Option<&str>,
    parse: impl Fn(&str) -> Option<T>,
    field: &str,
) -> Result<Option<T>, ApiError> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(None),
        Some(value) => parse(value)
            .map(Some)
            .ok_or_else(|| WorkflowError::validation(format!("unknown {field} `{value}`")).into()),
    }
}

fn parse_sort(raw: Option<&str>) -> Result<ApprovalSort, ApiError> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        None | Some("created_at") => Ok(ApprovalSort::CreatedAt),
        Some("updated_at") => Ok(ApprovalSort::UpdatedAt),
        Some("due_date") => Ok(ApprovalSort::DueDate),
        Some("priority") => Ok(ApprovalSort::Priority),
        Some(other) => {
            Err(WorkflowError::validation(format!("unknown sort key `{other}`")).into())
        }
    }
}

fn parse_order(raw: Option<&str>) -> Result<SortOrder, ApiError> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        None | Some("desc") => Ok(SortOrder::Descending),
        Some("asc") => Ok(SortOrder::Ascending),
        Some(other) => Err(WorkflowError::validation(format!(
            "unknown sort order `{other}` (expected asc|desc)"
        ))
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use tower::ServiceExt;

    use stagegate_core::audit::AuditChain;
    use stagegate_core::authorization::AuthorizationGate;
    use stagegate_core::domain::approval::{
        ApprovalKind, ApprovalRequest, NewApprovalRequest, Priority,
    };
    use stagegate_core::domain::project::{Project, ProjectId, ProjectPhase};
    use stagegate_core::domain::user::UserId;
    use stagegate_db::repositories::{ApprovalRepository, InMemoryStore, ProjectRepository};
    use stagegate_notify::InMemoryTransport;
    use stagegate_workflow::{
        ApprovalLifecycle, AuditRecorder, BatchDecisionProcessor, NotificationFanout,
        StageTransitionCoordinator,
    };

    use super::{router, ApiState};

    fn state(store: &InMemoryStore) -> ApiState {
        let audit = AuditRecorder::new(Arc::new(store.clone()), AuditChain::new("test-key"));
        let fanout = NotificationFanout::new(
            Arc::new(store.clone()),
            Arc::new(InMemoryTransport::new()),
        );
        let coordinator = Arc::new(StageTransitionCoordinator::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            AuthorizationGate::new(),
            audit.clone(),
            fanout.clone(),
        ));
        let lifecycle = Arc::new(ApprovalLifecycle::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            AuthorizationGate::new(),
            audit,
            fanout,
            coordinator.clone(),
        ));
        let batch = BatchDecisionProcessor::new(lifecycle.clone(), 4);
        ApiState::new(
            lifecycle,
            coordinator,
            batch,
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            AuthorizationGate::new(),
            3,
        )
    }

    async fn seed_project(store: &InMemoryStore) {
        let project = Project::new(
            ProjectId("proj-1".to_string()),
            "Agency site relaunch".to_string(),
            ProjectPhase::Development,
            Vec::new(),
            Utc::now(),
        );
        ProjectRepository::save(store, &project).await.expect("seed project");
    }

    fn post_json(uri: &str, actor: (&str, &str), body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .header("x-actor-id", actor.0)
            .header("x-actor-role", actor.1)
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    fn get_as(uri: &str, actor: (&str, &str)) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("x-actor-id", actor.0)
            .header("x-actor-role", actor.1)
            .body(Body::empty())
            .expect("request")
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn create_and_decide_an_approval_over_http() {
        let store = InMemoryStore::new();
        seed_project(&store).await;
        let app = router(state(&store));

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/v1/approvals",
                ("dev-bo", "contributor"),
                serde_json::json!({
                    "kind": "deliverable",
                    "title": "Sprint 4 deliverables",
                    "project_id": "proj-1",
                    "requested_to": "client-cy",
                }),
            ))
            .await
            .expect("create response");
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = body_json(response).await;
        assert_eq!(created["status"], "pending");
        let id = created["id"].as_str().expect("id").to_string();

        let response = app
            .clone()
            .oneshot(post_json(
                &format!("/api/v1/approvals/{id}/decision"),
                ("client-cy", "client"),
                serde_json::json!({ "outcome": "approve" }),
            ))
            .await
            .expect("decide response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "approved");

        // The storage conditional update makes a second decision a 409.
        let response = app
            .oneshot(post_json(
                &format!("/api/v1/approvals/{id}/decision"),
                ("client-cy", "client"),
                serde_json::json!({
                    "outcome": "reject",
                    "rejection_reason": "changed my mind",
                }),
            ))
            .await
            .expect("second decide response");
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let error = body_json(response).await;
        assert!(error["error"].as_str().expect("error").contains("already decided"));
    }

    #[tokio::test]
    async fn forbidden_creation_maps_to_403() {
        let store = InMemoryStore::new();
        seed_project(&store).await;
        let app = router(state(&store));

        let response = app
            .oneshot(post_json(
                "/api/v1/approvals",
                ("client-cy", "client"),
                serde_json::json!({
                    "kind": "deliverable",
                    "title": "Sprint deliverables",
                    "project_id": "proj-1",
                    "requested_to": "pm-ana",
                }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn missing_actor_headers_map_to_422() {
        let store = InMemoryStore::new();
        let app = router(state(&store));

        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/approvals")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({
                    "kind": "generic",
                    "title": "Anything",
                    "requested_to": "pm-ana",
                })
                .to_string(),
            ))
            .expect("request");

        let response = app.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let error = body_json(response).await;
        assert!(error["error"].as_str().expect("error").contains("x-actor-id"));
    }

    #[tokio::test]
    async fn transition_request_and_phase_jump_rejection() {
        let store = InMemoryStore::new();
        seed_project(&store).await;
        let app = router(state(&store));

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/v1/projects/proj-1/transitions",
                ("pm-ana", "project_manager"),
                serde_json::json!({
                    "to_phase": "completed",
                    "reviewer": "client-cy",
                }),
            ))
            .await
            .expect("phase jump response");
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/v1/projects/proj-1/transitions",
                ("pm-ana", "project_manager"),
                serde_json::json!({
                    "to_phase": "testing",
                    "reviewer": "client-cy",
                    "reason": "sprint scope complete",
                }),
            ))
            .await
            .expect("transition response");
        assert_eq!(response.status(), StatusCode::CREATED);
        let transition = body_json(response).await;
        assert_eq!(transition["status"], "pending");
        assert_eq!(transition["to_phase"], "testing");

        // Pending slot is taken now.
        let response = app
            .oneshot(post_json(
                "/api/v1/projects/proj-1/transitions",
                ("pm-ana", "project_manager"),
                serde_json::json!({
                    "to_phase": "testing",
                    "reviewer": "client-cy",
                }),
            ))
            .await
            .expect("second transition response");
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn batch_endpoint_reports_per_item_outcomes() {
        let store = InMemoryStore::new();
        seed_project(&store).await;
        let app = router(state(&store));

        let mut ids = Vec::new();
        for index in 0..3 {
            let response = app
                .clone()
                .oneshot(post_json(
                    "/api/v1/approvals",
                    ("dev-bo", "contributor"),
                    serde_json::json!({
                        "kind": "deliverable",
                        "title": format!("Deliverable {index}"),
                        "project_id": "proj-1",
                        "requested_to": "client-cy",
                    }),
                ))
                .await
                .expect("create response");
            let created = body_json(response).await;
            ids.push(created["id"].as_str().expect("id").to_string());
        }
        ids.push("APR-missing".to_string());

        let response = app
            .oneshot(post_json(
                "/api/v1/approvals/decisions",
                ("client-cy", "client"),
                serde_json::json!({ "ids": ids, "outcome": "approve" }),
            ))
            .await
            .expect("batch response");
        assert_eq!(response.status(), StatusCode::OK);
        let report = body_json(response).await;
        assert_eq!(report["succeeded"].as_array().expect("succeeded").len(), 3);
        assert_eq!(report["failed"].as_array().expect("failed").len(), 1);
        assert_eq!(report["summary"], "3 of 4 processed");
    }

    #[tokio::test]
    async fn list_filters_and_pages_the_results() {
        let store = InMemoryStore::new();
        seed_project(&store).await;
        let app = router(state(&store));

        for index in 0..3 {
            let response = app
                .clone()
                .oneshot(post_json(
                    "/api/v1/approvals",
                    ("dev-bo", "contributor"),
                    serde_json::json!({
                        "kind": "deliverable",
                        "title": format!("Deliverable {index}"),
                        "project_id": "proj-1",
                        "requested_to": "client-cy",
                        "priority": if index == 0 { "high" } else { "low" },
                    }),
                ))
                .await
                .expect("create response");
            assert_eq!(response.status(), StatusCode::CREATED);
        }

        let response = app
            .clone()
            .oneshot(get_as(
                "/api/v1/approvals?status=pending&priority=high",
                ("adm-root", "admin"),
            ))
            .await
            .expect("list response");
        assert_eq!(response.status(), StatusCode::OK);
        let listing = body_json(response).await;
        assert_eq!(listing["total"], 1);
        assert_eq!(listing["items"].as_array().expect("items").len(), 1);

        let response = app
            .oneshot(get_as("/api/v1/approvals?per_page=2&page=2", ("adm-root", "admin")))
            .await
            .expect("paged response");
        let listing = body_json(response).await;
        assert_eq!(listing["total"], 3);
        assert_eq!(listing["items"].as_array().expect("items").len(), 1);
        assert_eq!(listing["page"], 2);
        assert_eq!(listing["per_page"], 2);
        assert_eq!(listing["refetch_threshold"], 3);
    }

    #[tokio::test]
    async fn list_total_counts_past_the_page_window() {
        let store = InMemoryStore::new();
        let app = router(state(&store));

        let now = Utc::now();
        for index in 0..120 {
            let request = ApprovalRequest::create(
                NewApprovalRequest {
                    project_id: None,
                    kind: ApprovalKind::Generic,
                    title: format!("Request {index}"),
                    description: None,
                    requested_by: UserId("pm-ana".to_string()),
                    requested_to: UserId("client-cy".to_string()),
                    priority: Priority::Medium,
                    due_date: None,
                    attachments: Vec::new(),
                },
                now,
            )
            .expect("request");
            ApprovalRepository::insert(&store, &request).await.expect("seed");
        }

        let response = app
            .clone()
            .oneshot(get_as("/api/v1/approvals", ("adm-root", "admin")))
            .await
            .expect("list response");
        assert_eq!(response.status(), StatusCode::OK);
        let listing = body_json(response).await;
        assert_eq!(listing["total"], 120);
        assert_eq!(listing["items"].as_array().expect("items").len(), 25);

        // A page past the old in-memory cap still has rows.
        let response = app
            .oneshot(get_as("/api/v1/approvals?per_page=25&page=5", ("adm-root", "admin")))
            .await
            .expect("deep page response");
        let listing = body_json(response).await;
        assert_eq!(listing["total"], 120);
        assert_eq!(listing["items"].as_array().expect("items").len(), 20);
    }

    #[tokio::test]
    async fn list_requires_an_actor_and_scopes_non_admins() {
        let store = InMemoryStore::new();
        seed_project(&store).await;
        let app = router(state(&store));

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/v1/approvals",
                ("dev-bo", "contributor"),
                serde_json::json!({
                    "kind": "deliverable",
                    "title": "Sprint 4 deliverables",
                    "project_id": "proj-1",
                    "requested_to": "client-cy",
                }),
            ))
            .await
            .expect("create response");
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/approvals")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("anonymous list");
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        // The reviewer sees the row; an uninvolved client sees nothing.
        let response = app
            .clone()
            .oneshot(get_as("/api/v1/approvals", ("client-cy", "client")))
            .await
            .expect("reviewer list");
        let listing = body_json(response).await;
        assert_eq!(listing["total"], 1);

        let response = app
            .oneshot(get_as("/api/v1/approvals", ("client-zoe", "client")))
            .await
            .expect("outsider list");
        let listing = body_json(response).await;
        assert_eq!(listing["total"], 0);
        assert!(listing["items"].as_array().expect("items").is_empty());
    }

    #[tokio::test]
    async fn single_approval_fetch_honors_visibility() {
        let store = InMemoryStore::new();
        seed_project(&store).await;
        let app = router(state(&store));

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/v1/approvals",
                ("dev-bo", "contributor"),
                serde_json::json!({
                    "kind": "deliverable",
                    "title": "Sprint 4 deliverables",
                    "project_id": "proj-1",
                    "requested_to": "client-cy",
                }),
            ))
            .await
            .expect("create response");
        let id = body_json(response).await["id"].as_str().expect("id").to_string();

        let response = app
            .clone()
            .oneshot(get_as(&format!("/api/v1/approvals/{id}"), ("client-cy", "client")))
            .await
            .expect("reviewer fetch");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["title"], "Sprint 4 deliverables");

        let response = app
            .clone()
            .oneshot(get_as(&format!("/api/v1/approvals/{id}"), ("client-zoe", "client")))
            .await
            .expect("outsider fetch");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .oneshot(get_as("/api/v1/approvals/APR-missing", ("adm-root", "admin")))
            .await
            .expect("missing fetch");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
