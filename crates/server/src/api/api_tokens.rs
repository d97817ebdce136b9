use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use teamdocs_common::types::ApiTokenInfo;
use uuid::Uuid;

use crate::{
    auth::{api_tokens::generate_token, middleware::AuthenticatedUser},
    store::ApiTokenRecord,
    validation::{required_name, ValidatedJson},
};

use super::{ApiError, ApiState};

pub(super) fn routes() -> Router<ApiState> {
    Router::new()
        .route("/api/v1/api-tokens", get(list_tokens).post(create_token))
        .route("/api/v1/api-tokens/{token_id}", delete(delete_token))
}

#[derive(Debug, Deserialize)]
pub struct CreateTokenRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct TokenEnvelope {
    pub token: ApiTokenInfo,
}

#[derive(Debug, Serialize)]
pub struct TokensEnvelope {
    pub items: Vec<ApiTokenInfo>,
}

async fn list_tokens(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<TokensEnvelope>, ApiError> {
    let mut uow = state.store.begin().await?;
    let tokens = uow.list_api_tokens(user.user_id).await?;

    Ok(Json(TokensEnvelope { items: tokens.iter().map(|token| token.to_info(None)).collect() }))
}

async fn create_token(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    ValidatedJson(payload): ValidatedJson<CreateTokenRequest>,
) -> Result<(StatusCode, Json<TokenEnvelope>), ApiError> {
    let name = required_name("name", &payload.name)?;
    let generated = generate_token();
    let record = ApiTokenRecord {
        id: Uuid::new_v4(),
        user_id: user.user_id,
        name,
        token_hash: generated.hash,
        token_hint: generated.hint,
        created_at: Utc::now(),
        deleted_at: None,
    };

    let mut uow = state.store.begin().await?;
    uow.insert_api_token(&record).await?;
    uow.commit().await?;

    tracing::info!(token_id = %record.id, user_id = %user.user_id, "api token created");
    Ok((StatusCode::CREATED, Json(TokenEnvelope { token: record.to_info(Some(generated.plaintext)) })))
}

async fn delete_token(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(token_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let mut uow = state.store.begin().await?;
    let token =
        uow.get_api_token(token_id).await?.ok_or_else(|| ApiError::not_found("Token not found"))?;
    if token.user_id != user.user_id {
        return Err(ApiError::forbidden("You can only delete your own tokens"));
    }
    uow.revoke_api_token(token_id).await?;
    uow.commit().await?;

    tracing::info!(token_id = %token_id, "api token revoked");
    Ok(StatusCode::NO_CONTENT)
}
