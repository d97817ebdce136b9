// Web REST surface, authenticated with session JWTs.
//
// Every handler opens one unit of work, does its reads and writes through it
// and commits only on success.

pub mod api_tokens;
pub mod documents;
pub mod library;
pub mod projects;

use std::sync::Arc;

use axum::{
    middleware,
    response::{IntoResponse, Response},
    Router,
};
use teamdocs_common::visibility::Actor;
use uuid::Uuid;

use crate::{
    auth::{jwt::SessionTokenService, middleware::require_session_auth},
    error::{ErrorCode, ServerError},
    library::conversion::ConversionError,
    store::{ProjectRecord, Store, StoreError, UnitOfWork},
};

#[derive(Clone)]
pub struct ApiState {
    pub store: Store,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest { message: String },
    Forbidden { message: String },
    NotFound { message: String },
    CircularReference { message: String },
    Rejected(ServerError),
    Internal(anyhow::Error),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest { message: message.into() }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden { message: message.into() }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound { message: message.into() }
    }
}

impl From<ServerError> for ApiError {
    fn from(error: ServerError) -> Self {
        Self::Rejected(error)
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Tree(tree) => Self::CircularReference { message: tree.to_string() },
            StoreError::NotFound(what) => Self::not_found(format!("{what} not found")),
            other => Self::Internal(anyhow::Error::new(other)),
        }
    }
}

impl From<ConversionError> for ApiError {
    fn from(error: ConversionError) -> Self {
        match error {
            ConversionError::TemplateNotFound
            | ConversionError::DocumentNotFound
            | ConversionError::ProjectNotFound => Self::not_found(error.to_string()),
            ConversionError::TemplateForbidden | ConversionError::ProjectForbidden => {
                Self::forbidden(error.to_string())
            }
            ConversionError::Store(store) => store.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest { message } => {
                ServerError::new(ErrorCode::ValidationFailed, message).into_response()
            }
            Self::Forbidden { message } => {
                ServerError::new(ErrorCode::AuthForbidden, message).into_response()
            }
            Self::NotFound { message } => {
                ServerError::new(ErrorCode::NotFound, message).into_response()
            }
            Self::CircularReference { message } => {
                ServerError::new(ErrorCode::CircularReference, message).into_response()
            }
            Self::Rejected(error) => error.into_response(),
            Self::Internal(error) => {
                tracing::error!(error = ?error, "api internal error");
                ServerError::from_code(ErrorCode::InternalError).into_response()
            }
        }
    }
}

pub fn build_router(store: Store, sessions: Arc<SessionTokenService>) -> Router {
    let state = ApiState { store };

    Router::new()
        .merge(projects::routes())
        .merge(documents::routes())
        .merge(library::routes())
        .merge(api_tokens::routes())
        .with_state(state)
        .route_layer(middleware::from_fn_with_state(sessions, require_session_auth))
}

/// The caller with their current team memberships.
pub(crate) async fn load_actor(uow: &mut UnitOfWork, user_id: Uuid) -> Result<Actor, ApiError> {
    let team_ids = uow.team_ids_for_user(user_id).await?;
    Ok(Actor::new(user_id, team_ids))
}

/// 404 when the project is missing, 403 when the caller is not in its team.
pub(crate) async fn authorize_project(
    uow: &mut UnitOfWork,
    actor: &Actor,
    project_id: Uuid,
) -> Result<ProjectRecord, ApiError> {
    let project =
        uow.get_project(project_id).await?.ok_or_else(|| ApiError::not_found("Project not found"))?;
    if !actor.is_member_of(project.team_id) {
        return Err(ApiError::forbidden("Not a member of this project's team"));
    }
    Ok(project)
}
