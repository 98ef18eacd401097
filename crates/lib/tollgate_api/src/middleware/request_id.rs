//! Exposes the `x-request-id` assigned by `SetRequestIdLayer` to error
//! rendering. A 5xx `error_id` equals the response's request id.

use axum::{extract::Request, middleware::Next, response::Response};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

tokio::task_local! {
    static REQUEST_ID: String;
}

/// Runs the rest of the stack with the request id in scope.
pub async fn scope_request_id(request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    match id {
        Some(id) => REQUEST_ID.scope(id, next.run(request)).await,
        None => next.run(request).await,
    }
}

/// Id of the request being served, if any.
pub fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(Clone::clone).ok()
}

#[cfg(test)]
pub(crate) async fn with_request_id<F: Future>(id: &str, f: F) -> F::Output {
    REQUEST_ID.scope(id.to_string(), f).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn id_is_visible_only_inside_scope() {
        assert_eq!(current_request_id(), None);
        let seen = with_request_id("req-1", async { current_request_id() }).await;
        assert_eq!(seen.as_deref(), Some("req-1"));
    }
}
