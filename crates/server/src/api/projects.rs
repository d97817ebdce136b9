use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use teamdocs_common::types::Project;
use uuid::Uuid;

use crate::{
    auth::middleware::AuthenticatedUser,
    store::ProjectRecord,
    validation::{required_name, ValidatedJson},
};

use super::{authorize_project, load_actor, ApiError, ApiState};

pub(super) fn routes() -> Router<ApiState> {
    Router::new()
        .route("/api/v1/projects", get(list_projects).post(create_project))
        .route("/api/v1/projects/{project_id}", get(get_project).delete(delete_project))
}

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub team_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ProjectEnvelope {
    pub project: Project,
}

#[derive(Debug, Serialize)]
pub struct ProjectsEnvelope {
    pub items: Vec<Project>,
}

async fn list_projects(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<ProjectsEnvelope>, ApiError> {
    let mut uow = state.store.begin().await?;
    let actor = load_actor(&mut uow, user.user_id).await?;
    let team_ids: Vec<Uuid> = actor.team_ids.iter().copied().collect();
    let projects = uow.list_projects_for_teams(&team_ids).await?;

    Ok(Json(ProjectsEnvelope {
        items: projects.into_iter().map(ProjectRecord::into_project).collect(),
    }))
}

async fn create_project(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    ValidatedJson(payload): ValidatedJson<CreateProjectRequest>,
) -> Result<(StatusCode, Json<ProjectEnvelope>), ApiError> {
    let name = required_name("name", &payload.name)?;

    let mut uow = state.store.begin().await?;
    let actor = load_actor(&mut uow, user.user_id).await?;
    if !actor.is_member_of(payload.team_id) {
        return Err(ApiError::forbidden("Not a member of this team"));
    }

    let project = ProjectRecord {
        id: Uuid::new_v4(),
        name,
        description: payload.description,
        team_id: payload.team_id,
        created_at: Utc::now(),
    };
    uow.insert_project(&project).await?;
    uow.commit().await?;

    tracing::info!(project_id = %project.id, team_id = %project.team_id, "project created");
    Ok((StatusCode::CREATED, Json(ProjectEnvelope { project: project.into_project() })))
}

async fn get_project(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(project_id): Path<Uuid>,
) -> Result<Json<ProjectEnvelope>, ApiError> {
    let mut uow = state.store.begin().await?;
    let actor = load_actor(&mut uow, user.user_id).await?;
    let project = authorize_project(&mut uow, &actor, project_id).await?;

    Ok(Json(ProjectEnvelope { project: project.into_project() }))
}

async fn delete_project(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(project_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let mut uow = state.store.begin().await?;
    let actor = load_actor(&mut uow, user.user_id).await?;
    authorize_project(&mut uow, &actor, project_id).await?;
    uow.delete_project(project_id).await?;
    uow.commit().await?;

    tracing::info!(project_id = %project_id, "project deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::{
        api::build_router,
        test_support::{
            add_membership, bearer, body_json, delete_request, document, fixture, get_request,
            insert_documents, json_request, test_sessions,
        },
    };

    #[tokio::test]
    async fn list_returns_only_projects_of_callers_teams() {
        let fx = fixture().await;
        let sessions = test_sessions();
        let auth = bearer(&sessions, fx.user_id);
        let router = build_router(fx.store.clone(), sessions);

        let stranger_team = Uuid::new_v4();
        let response = router
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/v1/projects",
                json!({ "name": "Elsewhere", "team_id": stranger_team }),
                &auth,
            ))
            .await
            .expect("request should return response");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = router
            .oneshot(get_request("/api/v1/projects", &auth))
            .await
            .expect("request should return response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let items = body["items"].as_array().expect("items should be an array");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["name"], "Handbook");
    }

    #[tokio::test]
    async fn create_then_get_project() {
        let fx = fixture().await;
        let sessions = test_sessions();
        let auth = bearer(&sessions, fx.user_id);
        let router = build_router(fx.store.clone(), sessions);

        let response = router
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/v1/projects",
                json!({ "name": "  Runbooks ", "team_id": fx.team_id }),
                &auth,
            ))
            .await
            .expect("request should return response");
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = body_json(response).await;
        assert_eq!(created["project"]["name"], "Runbooks");

        let id = created["project"]["id"].as_str().expect("id should be a string");
        let response = router
            .oneshot(get_request(&format!("/api/v1/projects/{id}"), &auth))
            .await
            .expect("request should return response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["project"]["team_id"], fx.team_id.to_string());
    }

    #[tokio::test]
    async fn blank_project_name_is_rejected() {
        let fx = fixture().await;
        let sessions = test_sessions();
        let auth = bearer(&sessions, fx.user_id);
        let router = build_router(fx.store.clone(), sessions);

        let response = router
            .oneshot(json_request(
                Method::POST,
                "/api/v1/projects",
                json!({ "name": "   ", "team_id": fx.team_id }),
                &auth,
            ))
            .await
            .expect("request should return response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["code"], "VALIDATION_FAILED");
    }

    #[tokio::test]
    async fn get_distinguishes_missing_from_forbidden() {
        let fx = fixture().await;
        let sessions = test_sessions();
        let outsider = Uuid::new_v4();
        add_membership(&fx.store, Uuid::new_v4(), outsider).await;
        let router = build_router(fx.store.clone(), sessions.clone());

        let response = router
            .clone()
            .oneshot(get_request(
                &format!("/api/v1/projects/{}", Uuid::new_v4()),
                &bearer(&sessions, fx.user_id),
            ))
            .await
            .expect("request should return response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"]["message"], "Project not found");

        let response = router
            .oneshot(get_request(
                &format!("/api/v1/projects/{}", fx.project.id),
                &bearer(&sessions, outsider),
            ))
            .await
            .expect("request should return response");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn delete_project_cascades_to_documents() {
        let fx = fixture().await;
        let root = document(fx.project.id, None, "Root", 0);
        let child = document(fx.project.id, Some(root.id), "Child", 0);
        insert_documents(&fx.store, &[root.clone(), child.clone()]).await;

        let sessions = test_sessions();
        let auth = bearer(&sessions, fx.user_id);
        let router = build_router(fx.store.clone(), sessions);

        let response = router
            .oneshot(delete_request(&format!("/api/v1/projects/{}", fx.project.id), &auth))
            .await
            .expect("request should return response");
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let mut uow = fx.store.begin().await.expect("begin");
        assert!(uow.get_project(fx.project.id).await.expect("lookup").is_none());
        assert!(uow.get_document(root.id).await.expect("lookup").is_none());
        assert!(uow.get_document(child.id).await.expect("lookup").is_none());
    }
}
