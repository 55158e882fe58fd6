//! Axum routes for the comment service.

use axum::{
    extract::{Json, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::store::{CommentBackend, StoreError};
use crate::types::{AuthorId, Comment, CommentId, Conversation, NewComment, PostId};

use super::middleware::{record_comment_write, record_conversation_metrics};
use super::state::ServiceState;

/// Type alias for the service state over the runtime-selected backend.
pub type AppState = ServiceState<CommentBackend>;

type ApiError = (StatusCode, Json<ErrorResponse>);

// ============================================================================
// Request/Response Types
// ============================================================================

/// Response to a successful comment write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddCommentResponse {
    /// Identity assigned by the store.
    pub comment_id: CommentId,
}

/// Every comment identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentIdsResponse {
    /// Identities, ascending.
    pub comment_ids: Vec<CommentId>,
}

/// Parent lookup result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParentResponse {
    /// The comment asked about.
    pub comment_id: CommentId,
    /// Its parent, `None` for a root.
    pub parent_id: Option<CommentId>,
}

/// Direct replies of a comment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildrenResponse {
    /// The comment asked about.
    pub comment_id: CommentId,
    /// Replies in `(created_at, id)` order.
    pub children: Vec<Comment>,
}

/// Posts with comments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostsResponse {
    /// Post identities, ascending.
    pub post_ids: Vec<PostId>,
}

/// Known users.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsersResponse {
    /// User identities, ascending.
    pub user_ids: Vec<AuthorId>,
}

/// Deletion result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResponse {
    /// Comments removed, replies included.
    pub removed: u64,
}

/// Request to seed sample conversations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedRequest {
    /// First author identity of the seeded threads.
    #[serde(default)]
    pub base_user_id: Option<AuthorId>,
}

/// Seeding result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedResponse {
    /// Post that was seeded.
    pub post_id: PostId,
    /// Created identities in insertion order.
    pub created: Vec<CommentId>,
}

/// Service health response (detailed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub backend: String,
    pub uptime_secs: u64,
    /// Comments held, when the store answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_comments: Option<u64>,
    /// Database pool status, for pooled backends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseHealth>,
}

/// Database health information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseHealth {
    pub connected: bool,
    pub pool_size: u32,
    pub pool_idle: usize,
    pub pool_max: u32,
}

/// Simple liveness response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessResponse {
    pub status: String,
}

/// Readiness response with dependency status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub database: bool,
    pub details: Option<String>,
}

/// Structured error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub error: String,
    /// Machine-readable error code.
    pub code: String,
    /// Additional error details (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    /// Create a new error response with code and message.
    pub fn new(code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            details: None,
        }
    }

    /// Add details to the error.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Map a store failure to an HTTP status and body.
///
/// Request faults are 4xx; backend failures are 503 so callers can retry.
fn store_error(e: StoreError) -> ApiError {
    let (status, code) = match &e {
        StoreError::Validation(_) => (StatusCode::BAD_REQUEST, "INVALID_COMMENT"),
        StoreError::ParentNotFound(_) => (StatusCode::UNPROCESSABLE_ENTITY, "PARENT_NOT_FOUND"),
        StoreError::ParentPostMismatch { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "PARENT_POST_MISMATCH"),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE"),
    };

    if status.is_server_error() {
        tracing::error!(error = %e, "comment store failure");
    } else {
        tracing::warn!(code, error = %e, "comment request rejected");
    }
    (status, Json(ErrorResponse::new(code, e.to_string())))
}

/// Encode a reply tree as a JSON response at any nesting depth.
fn conversation_json(conversation: &Conversation) -> Result<Response, ApiError> {
    match conversation.to_json_vec() {
        Ok(body) => Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response()),
        Err(e) => {
            tracing::error!(post_id = %conversation.post_id, error = %e, "conversation encoding failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("ENCODING_FAILED", e.to_string())),
            ))
        }
    }
}

fn not_found(what: &str, id: i64) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse::new("NOT_FOUND", format!("{what} not found")).with_details(id.to_string())),
    )
}

// ============================================================================
// Route Handlers
// ============================================================================

/// Post a comment or reply.
async fn add_comment_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<NewComment>,
) -> Result<(StatusCode, Json<AddCommentResponse>), ApiError> {
    let is_reply = request.parent_id.is_some();
    match state.system.add_comment(request).await {
        Ok(comment_id) => {
            record_comment_write(true, is_reply);
            Ok((StatusCode::CREATED, Json(AddCommentResponse { comment_id })))
        }
        Err(e) => {
            record_comment_write(false, is_reply);
            Err(store_error(e))
        }
    }
}

/// List every comment identity.
async fn list_comments_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CommentIdsResponse>, ApiError> {
    let comment_ids = state.system.get_all_comments().await.map_err(store_error)?;
    Ok(Json(CommentIdsResponse { comment_ids }))
}

/// Remove every comment.
async fn clear_comments_handler(
    State(state): State<Arc<AppState>>,
) -> Result<StatusCode, ApiError> {
    state.system.clear_all().await.map_err(store_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Delete a comment and its replies.
async fn delete_comment_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let removed = state
        .system
        .delete_comment(CommentId::new(id))
        .await
        .map_err(store_error)?;
    if removed == 0 {
        return Err(not_found("Comment", id));
    }
    Ok(Json(DeleteResponse { removed }))
}

/// Parent of a comment.
async fn parent_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ParentResponse>, ApiError> {
    let comment_id = CommentId::new(id);
    if state.system.get_comment(comment_id).await.map_err(store_error)?.is_none() {
        return Err(not_found("Comment", id));
    }
    let parent_id = state.system.get_parent(comment_id).await.map_err(store_error)?;
    Ok(Json(ParentResponse { comment_id, parent_id }))
}

/// Direct replies of a comment.
async fn children_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ChildrenResponse>, ApiError> {
    let comment_id = CommentId::new(id);
    let children = state.system.get_children(comment_id).await.map_err(store_error)?;
    Ok(Json(ChildrenResponse { comment_id, children }))
}

/// Reply tree hanging from a comment.
async fn thread_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let thread = state
        .system
        .get_thread(CommentId::new(id))
        .await
        .map_err(store_error)?
        .ok_or_else(|| not_found("Comment", id))?;
    conversation_json(&thread)
}

/// Posts with at least one comment.
async fn list_posts_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<PostsResponse>, ApiError> {
    let post_ids = state.system.get_all_posts_with_comments().await.map_err(store_error)?;
    Ok(Json(PostsResponse { post_ids }))
}

/// Full conversation of a post.
async fn conversation_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let start = Instant::now();
    let conversation = state
        .system
        .get_full_conversation(PostId::new(id))
        .await
        .map_err(store_error)?;

    record_conversation_metrics(
        conversation.total_comments,
        conversation.roots.len(),
        conversation.depth(),
        start.elapsed().as_millis() as u64,
    );
    conversation_json(&conversation)
}

/// Seed sample conversations under a post.
async fn seed_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    request: Option<Json<SeedRequest>>,
) -> Result<(StatusCode, Json<SeedResponse>), ApiError> {
    if !state.seed.enabled {
        return Err((
            StatusCode::FORBIDDEN,
            Json(ErrorResponse::new("SEEDING_DISABLED", "Seeding is disabled")),
        ));
    }

    let base_user = request
        .and_then(|Json(r)| r.base_user_id)
        .unwrap_or(state.seed.default_base_user);
    let post_id = PostId::new(id);
    let created = state
        .system
        .create_test_conversations(post_id, base_user)
        .await
        .map_err(store_error)?;

    Ok((StatusCode::CREATED, Json(SeedResponse { post_id, created })))
}

/// Known users.
async fn list_users_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<UsersResponse>, ApiError> {
    let user_ids = state.system.get_all_users().await.map_err(store_error)?;
    Ok(Json(UsersResponse { user_ids }))
}

/// Health check endpoint (detailed).
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let store = state.store();
    let db_healthy = store.is_healthy().await;
    let total_comments = if db_healthy {
        crate::store::CommentStore::count_comments(store.as_ref()).await.ok()
    } else {
        None
    };
    let database = store.pool_stats().map(|stats| DatabaseHealth {
        connected: db_healthy,
        pool_size: stats.size,
        pool_idle: stats.idle,
        pool_max: stats.max,
    });

    Json(HealthResponse {
        status: if db_healthy { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        backend: store.kind().to_string(),
        uptime_secs: state.uptime_secs(),
        total_comments,
        database,
    })
}

/// Liveness probe endpoint.
///
/// Does NOT check dependencies.
async fn liveness_handler() -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "alive".to_string(),
    })
}

/// Readiness probe endpoint.
///
/// Returns 200 if the store is reachable, 503 otherwise.
async fn readiness_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReadinessResponse>, (StatusCode, Json<ReadinessResponse>)> {
    if state.store().is_healthy().await {
        Ok(Json(ReadinessResponse {
            ready: true,
            database: true,
            details: None,
        }))
    } else {
        Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                ready: false,
                database: false,
                details: Some("Comment store unreachable".to_string()),
            }),
        ))
    }
}

// ============================================================================
// Router Construction
// ============================================================================

/// Create the Axum router for the comment service.
pub fn create_router(state: AppState) -> Router {
    let state = Arc::new(state);

    Router::new()
        // Comments
        .route(
            "/api/comments",
            post(add_comment_handler)
                .get(list_comments_handler)
                .delete(clear_comments_handler),
        )
        .route("/api/comments/:id", axum::routing::delete(delete_comment_handler))
        .route("/api/comments/:id/parent", get(parent_handler))
        .route("/api/comments/:id/children", get(children_handler))
        .route("/api/comments/:id/thread", get(thread_handler))
        // Posts and users
        .route("/api/posts", get(list_posts_handler))
        .route("/api/posts/:id/conversation", get(conversation_handler))
        .route("/api/posts/:id/seed", post(seed_handler))
        .route("/api/users", get(list_users_handler))
        // Health checks
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .with_state(state)
}
