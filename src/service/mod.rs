//! Comment REST Service
//!
//! Exposes the comment system over HTTP.
//!
//! ## Endpoints
//!
//! - `POST /api/comments` - Post a comment or reply
//! - `GET /api/comments` - List every comment id
//! - `DELETE /api/comments` - Remove every comment
//! - `DELETE /api/comments/:id` - Delete a comment and its replies
//! - `GET /api/comments/:id/parent` - Parent of a comment
//! - `GET /api/comments/:id/children` - Direct replies of a comment
//! - `GET /api/comments/:id/thread` - Reply tree below a comment
//! - `GET /api/posts` - Posts with comments
//! - `GET /api/posts/:id/conversation` - Full conversation of a post
//! - `POST /api/posts/:id/seed` - Seed sample conversations
//! - `GET /api/users` - Known users
//! - `GET /health` - Detailed service health check
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe

pub mod middleware;
pub mod routes;
pub mod state;

pub use middleware::{metrics_middleware, record_comment_write, record_conversation_metrics};
pub use routes::{create_router, AppState, ErrorResponse};
pub use state::{SeedSettings, ServiceState};
