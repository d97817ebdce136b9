use crate::{
    auth::{api_tokens::hash_token, jwt::SessionTokenService},
    error::{ErrorCode, ServerError},
    store::Store,
};
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use uuid::Uuid;

/// Caller of the web REST surface, from a session JWT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
}

/// Caller of the agent endpoint, from an API token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentIdentity {
    pub user_id: Uuid,
    pub token_id: Uuid,
}

pub async fn require_session_auth(
    State(sessions): State<Arc<SessionTokenService>>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(extract_bearer_token)
    {
        Some(token) => token,
        None => return unauthorized_response(ErrorCode::AuthInvalidToken, "missing bearer token"),
    };

    let user_id = match sessions.validate_session_token(token) {
        Ok(user_id) => user_id,
        Err(_) => return unauthorized_response(ErrorCode::AuthInvalidToken, "invalid bearer token"),
    };

    request.extensions_mut().insert(AuthenticatedUser { user_id });

    next.run(request).await
}

/// Resolve an agent API token by digest. Revoked tokens are told apart from
/// unknown ones.
pub async fn require_agent_token(
    State(store): State<Store>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(header) = request.headers().get(AUTHORIZATION) else {
        return unauthorized_response(ErrorCode::AuthInvalidToken, "Authorization header required");
    };
    let Some(token) = header.to_str().ok().and_then(extract_bearer_token) else {
        return unauthorized_response(
            ErrorCode::AuthInvalidToken,
            "Invalid authorization header format. Expected: Bearer <token>",
        );
    };

    let lookup = async {
        let mut uow = store.begin().await?;
        uow.find_api_token_by_hash(&hash_token(token)).await
    };
    let record = match lookup.await {
        Ok(Some(record)) => record,
        Ok(None) => return unauthorized_response(ErrorCode::AuthInvalidToken, "Invalid token"),
        Err(error) => {
            tracing::error!(error = ?error, "agent token lookup failed");
            return ServerError::from_code(ErrorCode::InternalError).into_response();
        }
    };
    if record.deleted_at.is_some() {
        return unauthorized_response(ErrorCode::AuthTokenRevoked, "Token has been revoked");
    }

    request
        .extensions_mut()
        .insert(AgentIdentity { user_id: record.user_id, token_id: record.id });

    next.run(request).await
}

fn extract_bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;

    if !scheme.eq_ignore_ascii_case("Bearer") {
        return None;
    }

    let token = token.trim();
    if token.is_empty() {
        return None;
    }

    Some(token)
}

fn unauthorized_response(code: ErrorCode, message: &'static str) -> Response {
    ServerError::new(code, message).into_response()
}
