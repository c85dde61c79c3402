use std::net::SocketAddr;

use anyhow::Result;
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use gymplan_core::approval::{self, PlanSubmission};
use gymplan_core::assigned::{self, AssignedPlanInput};
use gymplan_core::views::{self, PreviewRequest};
use gymplan_core::{Caller, PlanContext, PlanError, materialize};
use gymplan_db::models::{ApprovalStatus, PlanType, SubmitterRole};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: msg.into(),
        }
    }
}

impl From<PlanError> for AppError {
    fn from(err: PlanError) -> Self {
        let status = match &err {
            PlanError::Validation(_) | PlanError::InvalidRange { .. } => StatusCode::BAD_REQUEST,
            PlanError::Forbidden(_) => StatusCode::FORBIDDEN,
            PlanError::NotFound { .. } => StatusCode::NOT_FOUND,
            PlanError::InvalidTransition { .. } => StatusCode::CONFLICT,
            PlanError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %format!("{err:#}"), "request failed");
        }
        Self {
            status,
            message: format!("{err:#}"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Caller identity
// ---------------------------------------------------------------------------

/// Identity forwarded by the upstream auth layer as `x-gym-id`,
/// `x-user-id` and `x-role` headers.
pub struct AuthCaller(pub Caller);

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, AppError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::unauthorized(format!("missing {name} header")))
}

fn parse_caller(headers: &HeaderMap) -> Result<Caller, AppError> {
    let gym_id = header(headers, "x-gym-id")?
        .parse::<i64>()
        .map_err(|_| AppError::unauthorized("x-gym-id must be an integer"))?;
    let user_id = header(headers, "x-user-id")?
        .parse::<i64>()
        .map_err(|_| AppError::unauthorized("x-user-id must be an integer"))?;
    let role = header(headers, "x-role")?
        .parse::<SubmitterRole>()
        .map_err(|e| AppError::unauthorized(e.to_string()))?;
    Ok(Caller::new(user_id, gym_id, role))
}

impl<S: Send + Sync> FromRequestParts<S> for AuthCaller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parse_caller(&parts.headers).map(AuthCaller)
    }
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ApprovalQuery {
    pub status: Option<ApprovalStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RejectBody {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CompleteBody {
    #[serde(default = "default_completed")]
    pub completed: bool,
}

fn default_completed() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub ctx: PlanContext,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/plan-requests", post(submit_request))
        .route("/api/plan-requests/{id}", get(show_request))
        .route("/api/approvals", get(list_approvals))
        .route("/api/approvals/{id}/approve", post(approve))
        .route("/api/approvals/{id}/reject", post(reject))
        .route("/api/daily-plans/{id}/complete", post(complete_day))
        .route(
            "/api/users/{user_id}/daily-plans/{plan_type}",
            get(list_daily_plans),
        )
        .route("/api/users/{user_id}/stats/{plan_type}", get(show_stats))
        .route("/api/distribute", post(distribute))
        .route("/api/assigned-plans", post(create_assigned))
        .route(
            "/api/assigned-plans/{id}",
            axum::routing::put(update_assigned).delete(delete_assigned),
        )
        .route("/api/assigned-plans/{id}/unassign", post(unassign))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(state: AppState, bind: &str, port: u16) -> Result<()> {
    let app = build_router(state);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("gymplan serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("gymplan serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for Ctrl+C; shutting down");
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

type ApiResult = Result<axum::response::Response, AppError>;

async fn submit_request(
    State(state): State<AppState>,
    AuthCaller(caller): AuthCaller,
    Json(submission): Json<PlanSubmission>,
) -> ApiResult {
    let submitted = approval::submit(&state.pool, &state.ctx, &caller, &submission).await?;
    Ok((StatusCode::CREATED, Json(submitted)).into_response())
}

async fn show_request(
    State(state): State<AppState>,
    AuthCaller(caller): AuthCaller,
    Path(id): Path<Uuid>,
) -> ApiResult {
    let view = views::request_view(&state.pool, &caller, id).await?;
    Ok(Json(view).into_response())
}

async fn list_approvals(
    State(state): State<AppState>,
    AuthCaller(caller): AuthCaller,
    Query(query): Query<ApprovalQuery>,
) -> ApiResult {
    let approvals = approval::list_approvals(&state.pool, &caller, query.status).await?;
    Ok(Json(approvals).into_response())
}

async fn approve(
    State(state): State<AppState>,
    AuthCaller(caller): AuthCaller,
    Path(id): Path<Uuid>,
) -> ApiResult {
    let outcome = approval::approve(&state.pool, &state.ctx, &caller, id).await?;
    Ok(Json(outcome).into_response())
}

async fn reject(
    State(state): State<AppState>,
    AuthCaller(caller): AuthCaller,
    Path(id): Path<Uuid>,
    Json(body): Json<RejectBody>,
) -> ApiResult {
    let rejected =
        approval::reject(&state.pool, &state.ctx, &caller, id, body.reason.as_deref()).await?;
    Ok(Json(rejected).into_response())
}

async fn complete_day(
    State(state): State<AppState>,
    AuthCaller(caller): AuthCaller,
    Path(id): Path<Uuid>,
    Json(body): Json<CompleteBody>,
) -> ApiResult {
    let done =
        materialize::mark_day_complete(&state.pool, &state.ctx, &caller, id, body.completed)
            .await?;
    Ok(Json(done).into_response())
}

async fn list_daily_plans(
    State(state): State<AppState>,
    AuthCaller(caller): AuthCaller,
    Path((user_id, plan_type)): Path<(i64, PlanType)>,
) -> ApiResult {
    let days = views::daily_plans_for(&state.pool, &caller, user_id, plan_type).await?;
    Ok(Json(days).into_response())
}

async fn show_stats(
    State(state): State<AppState>,
    AuthCaller(caller): AuthCaller,
    Path((user_id, plan_type)): Path<(i64, PlanType)>,
) -> ApiResult {
    let stats = views::stats_for(&state.pool, &caller, user_id, plan_type).await?;
    Ok(Json(stats).into_response())
}

async fn distribute(Json(request): Json<PreviewRequest>) -> ApiResult {
    let plan = views::preview(&request)?;
    Ok(Json(plan).into_response())
}

async fn create_assigned(
    State(state): State<AppState>,
    AuthCaller(caller): AuthCaller,
    Json(input): Json<AssignedPlanInput>,
) -> ApiResult {
    let write = assigned::create_assigned_plan(&state.pool, &state.ctx, &caller, &input).await?;
    Ok((StatusCode::CREATED, Json(write)).into_response())
}

async fn update_assigned(
    State(state): State<AppState>,
    AuthCaller(caller): AuthCaller,
    Path(id): Path<Uuid>,
    Json(input): Json<AssignedPlanInput>,
) -> ApiResult {
    let write =
        assigned::update_assigned_plan(&state.pool, &state.ctx, &caller, id, &input).await?;
    Ok(Json(write).into_response())
}

async fn delete_assigned(
    State(state): State<AppState>,
    AuthCaller(caller): AuthCaller,
    Path(id): Path<Uuid>,
) -> ApiResult {
    let removed = assigned::delete_assigned_plan(&state.pool, &state.ctx, &caller, id).await?;
    Ok(Json(removed).into_response())
}

async fn unassign(
    State(state): State<AppState>,
    AuthCaller(caller): AuthCaller,
    Path(id): Path<Uuid>,
) -> ApiResult {
    let write = assigned::unassign_plan(&state.pool, &state.ctx, &caller, id).await?;
    Ok(Json(write).into_response())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use sqlx::PgPool;
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    use gymplan_core::PlanContext;
    use gymplan_core::notify::NoopSink;
    use gymplan_test_utils::{create_test_db, drop_test_db};

    use super::{AppState, build_router};

    const TRAINER: (&str, &str, &str) = ("1", "2", "trainer");
    const MEMBER: (&str, &str, &str) = ("1", "7", "member");

    // -----------------------------------------------------------------------
    // HTTP helpers
    // -----------------------------------------------------------------------

    fn state(pool: PgPool) -> AppState {
        AppState {
            pool,
            ctx: PlanContext::new(Arc::new(NoopSink)),
        }
    }

    /// A pool that never connects, for routes that do not touch the database.
    fn lazy_pool() -> PgPool {
        PgPoolOptions::new()
            .connect_lazy("postgresql://localhost:1/unused")
            .unwrap()
    }

    async fn send(
        pool: PgPool,
        method: &str,
        uri: &str,
        caller: Option<(&str, &str, &str)>,
        body: Option<Value>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some((gym, user, role)) = caller {
            builder = builder
                .header("x-gym-id", gym)
                .header("x-user-id", user)
                .header("x-role", role);
        }
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        build_router(state(pool)).oneshot(request).await.unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1_048_576)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn submission() -> Value {
        json!({
            "user_id": 7,
            "source": "manual",
            "category": "strength",
            "start_date": "2025-01-08",
            "end_date": "2025-01-10",
            "items": [{"name": "A"}, {"name": "B"}, {"name": "C"}, {"name": "D"}],
        })
    }

    // -----------------------------------------------------------------------
    // Routes without a database
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn distribute_previews_without_persisting() {
        let body = json!({
            "start_date": "2025-01-08",
            "end_date": "2025-01-09",
            "items": [{"name": "Squat", "minutes": 10}, {"name": "Row", "minutes": 5}],
        });
        let resp = send(lazy_pool(), "POST", "/api/distribute", None, Some(body)).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let json = body_json(resp).await;
        assert_eq!(json["total_days"], 2);
        assert_eq!(json["total_minutes"], 15.0);
        assert_eq!(json["days"][1]["items"][0]["name"], "Row");
    }

    #[tokio::test]
    async fn distribute_rejects_reversed_range() {
        let body = json!({"start_date": "2025-01-09", "end_date": "2025-01-08"});
        let resp = send(lazy_pool(), "POST", "/api/distribute", None, Some(body)).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json = body_json(resp).await;
        assert!(json["error"].as_str().unwrap().contains("invalid date range"));
    }

    #[tokio::test]
    async fn missing_identity_headers_are_unauthorized() {
        let resp = send(lazy_pool(), "GET", "/api/approvals", None, None).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = send(
            lazy_pool(),
            "GET",
            "/api/approvals",
            Some(("1", "2", "owner")),
            None,
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn members_cannot_list_the_approval_queue() {
        let resp = send(lazy_pool(), "GET", "/api/approvals", Some(MEMBER), None).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    // -----------------------------------------------------------------------
    // Full flow
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn submit_approve_and_read_back() {
        let (pool, db_name) = create_test_db().await;

        let resp = send(
            pool.clone(),
            "POST",
            "/api/plan-requests",
            Some(MEMBER),
            Some(submission()),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let submitted = body_json(resp).await;
        let request_id = submitted["request"]["id"].as_str().unwrap().to_owned();
        let approval_id = submitted["approval"]["id"].as_str().unwrap().to_owned();
        assert_eq!(submitted["approval"]["status"], "pending");

        let resp = send(
            pool.clone(),
            "GET",
            "/api/approvals?status=pending",
            Some(TRAINER),
            None,
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await.as_array().unwrap().len(), 1);

        let approve_uri = format!("/api/approvals/{approval_id}/approve");
        let resp = send(pool.clone(), "POST", &approve_uri, Some(MEMBER), None).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = send(pool.clone(), "POST", &approve_uri, Some(TRAINER), None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let outcome = body_json(resp).await;
        assert_eq!(outcome["approval"]["status"], "approved");
        assert_eq!(outcome["plan"]["days"][0]["items"].as_array().unwrap().len(), 2);
        assert_eq!(outcome["warnings"], json!([]));

        let resp = send(pool.clone(), "POST", &approve_uri, Some(TRAINER), None).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = send(
            pool.clone(),
            "GET",
            &format!("/api/plan-requests/{request_id}"),
            Some(MEMBER),
            None,
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let view = body_json(resp).await;
        assert_eq!(view["status"], "approved");
        assert_eq!(view["daily_plans"].as_array().unwrap().len(), 3);

        let resp = send(
            pool.clone(),
            "GET",
            "/api/users/7/daily-plans/manual",
            Some(MEMBER),
            None,
        )
        .await;
        let days = body_json(resp).await;
        let first_day = days[0]["id"].as_str().unwrap().to_owned();

        let resp = send(
            pool.clone(),
            "POST",
            &format!("/api/daily-plans/{first_day}/complete"),
            Some(MEMBER),
            Some(json!({})),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["day"]["completed"], true);

        let resp = send(
            pool.clone(),
            "GET",
            "/api/users/7/stats/manual",
            Some(MEMBER),
            None,
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let stats = body_json(resp).await;
        assert_eq!(stats["stats"]["total_items"], 4);
        assert_eq!(stats["stats"]["completed_days"], 1);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn reject_and_error_statuses() {
        let (pool, db_name) = create_test_db().await;

        let mut bad = submission();
        bad["end_date"] = json!("2025-01-01");
        let resp = send(
            pool.clone(),
            "POST",
            "/api/plan-requests",
            Some(MEMBER),
            Some(bad),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = send(
            pool.clone(),
            "POST",
            &format!("/api/approvals/{}/approve", uuid::Uuid::new_v4()),
            Some(TRAINER),
            None,
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = send(
            pool.clone(),
            "POST",
            "/api/plan-requests",
            Some(MEMBER),
            Some(submission()),
        )
        .await;
        let approval_id = body_json(resp).await["approval"]["id"]
            .as_str()
            .unwrap()
            .to_owned();

        let resp = send(
            pool.clone(),
            "POST",
            &format!("/api/approvals/{approval_id}/reject"),
            Some(TRAINER),
            Some(json!({"reason": "too much volume"})),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let rejected = body_json(resp).await;
        assert_eq!(rejected["status"], "rejected");
        assert!(rejected["notes"].as_str().unwrap().contains("too much volume"));

        let resp = send(
            pool.clone(),
            "GET",
            "/api/users/8/stats/manual",
            Some(MEMBER),
            None,
        )
        .await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn assigned_plan_lifecycle() {
        let (pool, db_name) = create_test_db().await;
        let input = json!({
            "assigned_user_id": 7,
            "category": "strength",
            "start_date": "2025-01-08",
            "end_date": "2025-01-09",
            "items": [{"name": "A"}, {"name": "B"}],
        });

        let resp = send(
            pool.clone(),
            "POST",
            "/api/assigned-plans",
            Some(TRAINER),
            Some(input.clone()),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created = body_json(resp).await;
        assert_eq!(created["mirror"]["mirror"], "created");
        let id = created["plan"]["id"].as_str().unwrap().to_owned();

        let mut edited = input;
        edited["items"] = json!([{"name": "C"}]);
        let resp = send(
            pool.clone(),
            "PUT",
            &format!("/api/assigned-plans/{id}"),
            Some(TRAINER),
            Some(edited),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let updated = body_json(resp).await;
        assert_eq!(updated["mirror"]["items_replaced"], true);

        let resp = send(
            pool.clone(),
            "POST",
            &format!("/api/assigned-plans/{id}/unassign"),
            Some(TRAINER),
            None,
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["mirror"]["mirror"], "purged");

        let resp = send(
            pool.clone(),
            "DELETE",
            &format!("/api/assigned-plans/{id}"),
            Some(TRAINER),
            None,
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = send(
            pool.clone(),
            "DELETE",
            &format!("/api/assigned-plans/{id}"),
            Some(TRAINER),
            None,
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        pool.close().await;
        drop_test_db(&db_name).await;
    }
}
