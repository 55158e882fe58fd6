//! Request logging middleware.
//!
//! Access and conversation metrics are emitted as `tracing` events under the
//! `threadscape::metrics` target so they can be aggregated from logs.

use std::sync::OnceLock;
use std::time::Instant;

use axum::{extract::Request, middleware::Next, response::Response};
use regex_lite::Regex;
use tracing::info;

/// Records request method, normalized path, status and latency.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = normalize_path(request.uri().path());

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status().as_u16();

    info!(
        target: "threadscape::metrics",
        metric_type = "request",
        path = %path,
        method = %method,
        status = status,
        latency_ms = latency.as_millis() as u64,
        "request_metric"
    );

    response
}

fn numeric_segment() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"/[0-9]+\b").expect("numeric segment pattern is valid"))
}

/// Replace numeric path segments with `:id` to keep cardinality bounded.
fn normalize_path(path: &str) -> String {
    numeric_segment().replace_all(path, "/:id").to_string()
}

/// Record the shape of an assembled conversation.
pub fn record_conversation_metrics(total_comments: usize, roots: usize, depth: usize, latency_ms: u64) {
    info!(
        target: "threadscape::metrics",
        metric_type = "conversation",
        total_comments = total_comments,
        roots = roots,
        depth = depth,
        latency_ms = latency_ms,
        "conversation_metric"
    );
}

/// Record a comment write.
pub fn record_comment_write(accepted: bool, is_reply: bool) {
    let result = if accepted { "accepted" } else { "rejected" };
    info!(
        target: "threadscape::metrics",
        metric_type = "comment_write",
        result = result,
        reply = is_reply,
        "comment_write_metric"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_replaces_ids() {
        assert_eq!(normalize_path("/api/comments/42/children"), "/api/comments/:id/children");
        assert_eq!(normalize_path("/api/posts/7/conversation"), "/api/posts/:id/conversation");
        assert_eq!(normalize_path("/api/comments/1/2"), "/api/comments/:id/:id");
    }

    #[test]
    fn test_normalize_path_preserves_regular_path() {
        assert_eq!(normalize_path("/health/ready"), "/health/ready");
        assert_eq!(normalize_path("/api/v2x"), "/api/v2x");
        assert_eq!(normalize_path("/api/12abc"), "/api/12abc");
    }
}
