use super::{
    Admission, GuardConfig, RequestGuard, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING,
    X_RATELIMIT_RESET,
};
use crate::rate_limit::GuardResult;
use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::debug;

/// Identity resolved by the guard, stored in request extensions for handlers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity(pub String);

/// Guard middleware state: the shared guard plus this route's settings
#[derive(Debug, Clone)]
pub struct GuardState {
    guard: Arc<RequestGuard>,
    config: Arc<GuardConfig>,
}

impl GuardState {
    pub fn new(guard: Arc<RequestGuard>, config: GuardConfig) -> Self {
        Self {
            guard,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }
}

/// Axum middleware running the guard in front of a route.
///
/// Use with `axum::middleware::from_fn_with_state(state, guard_middleware)`.
pub async fn guard_middleware(
    State(state): State<GuardState>,
    mut request: Request,
    next: Next,
) -> Response {
    match state.guard.check_request(&request, &state.config) {
        Admission::Pass { identifier, result } => {
            debug!(
                bucket = %state.config.bucket,
                identifier = %identifier,
                path = %request.uri().path(),
                "Guard passed"
            );
            request.extensions_mut().insert(ClientIdentity(identifier));

            let response = next.run(request).await;
            match result {
                Some(result) => add_rate_limit_headers(response, &result),
                None => response,
            }
        }
        Admission::Reject(rejection) => rejection.into_response(),
    }
}

/// Add rate limit headers to successful responses
pub fn add_rate_limit_headers(mut response: Response, result: &GuardResult) -> Response {
    let headers = response.headers_mut();

    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(result.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(result.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(result.reset_at_secs()));

    response
}
