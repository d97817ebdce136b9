use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use teamdocs_common::{
    content::{stored_text_from_value, NodeContent},
    types::{Document, NodeKind},
};
use uuid::Uuid;

use crate::{
    auth::middleware::AuthenticatedUser,
    library::conversion::instantiate_from_template,
    store::{documents_with_archive_state, DocumentRecord, UnitOfWork},
    validation::{double_option, required_name, ValidatedJson},
};

use super::{authorize_project, load_actor, ApiError, ApiState};

pub(super) fn routes() -> Router<ApiState> {
    Router::new()
        .route(
            "/api/v1/projects/{project_id}/documents",
            get(list_documents).post(create_document),
        )
        .route(
            "/api/v1/projects/{project_id}/documents/{document_id}",
            get(get_document).put(update_document).delete(delete_document),
        )
        .route(
            "/api/v1/projects/{project_id}/documents/from-template/{template_id}",
            post(create_from_template),
        )
}

#[derive(Debug, Deserialize)]
pub struct CreateDocumentRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default)]
    pub content: Option<Value>,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    #[serde(default)]
    pub order: Option<i32>,
    #[serde(default)]
    pub editable_by_agent: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateDocumentRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub content: Option<Value>,
    #[serde(default, deserialize_with = "double_option")]
    pub parent_id: Option<Option<Uuid>>,
    #[serde(default)]
    pub order: Option<i32>,
    #[serde(default)]
    pub editable_by_agent: Option<bool>,
    #[serde(default, deserialize_with = "double_option")]
    pub archived: Option<Option<bool>>,
}

#[derive(Debug, Serialize)]
pub struct DocumentEnvelope {
    pub document: Document,
}

#[derive(Debug, Serialize)]
pub struct DocumentsEnvelope {
    pub items: Vec<Document>,
}

async fn list_documents(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(project_id): Path<Uuid>,
) -> Result<Json<DocumentsEnvelope>, ApiError> {
    let mut uow = state.store.begin().await?;
    let actor = load_actor(&mut uow, user.user_id).await?;
    authorize_project(&mut uow, &actor, project_id).await?;

    let documents = uow.list_documents(project_id).await?;
    Ok(Json(DocumentsEnvelope { items: documents_with_archive_state(&documents, &documents) }))
}

async fn get_document(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((project_id, document_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<DocumentEnvelope>, ApiError> {
    let mut uow = state.store.begin().await?;
    let actor = load_actor(&mut uow, user.user_id).await?;
    authorize_project(&mut uow, &actor, project_id).await?;

    let document = load_project_document(&mut uow, project_id, document_id).await?;
    Ok(Json(DocumentEnvelope { document: render(&mut uow, &document).await? }))
}

async fn create_document(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(project_id): Path<Uuid>,
    ValidatedJson(payload): ValidatedJson<CreateDocumentRequest>,
) -> Result<(StatusCode, Json<DocumentEnvelope>), ApiError> {
    let name = required_name("name", &payload.name)?;

    let mut uow = state.store.begin().await?;
    let actor = load_actor(&mut uow, user.user_id).await?;
    authorize_project(&mut uow, &actor, project_id).await?;

    if let Some(parent_id) = payload.parent_id {
        if !belongs_to_project(&mut uow, project_id, parent_id).await? {
            return Err(ApiError::not_found("Parent document not found"));
        }
    }

    let content = match &payload.content {
        Some(value) => stored_text_from_value(value),
        None => NodeContent::from_value(payload.kind, Value::Null).to_stored(),
    };
    let now = Utc::now();
    let document = DocumentRecord {
        id: Uuid::new_v4(),
        project_id,
        name,
        kind: payload.kind,
        content,
        parent_id: payload.parent_id,
        order: payload.order.unwrap_or(0),
        editable_by_agent: payload.editable_by_agent.unwrap_or(false),
        archived: None,
        created_at: now,
        updated_at: now,
    };
    uow.insert_documents(std::slice::from_ref(&document)).await?;
    let rendered = render(&mut uow, &document).await?;
    uow.commit().await?;

    tracing::info!(project_id = %project_id, document_id = %document.id, "document created");
    Ok((StatusCode::CREATED, Json(DocumentEnvelope { document: rendered })))
}

async fn update_document(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((project_id, document_id)): Path<(Uuid, Uuid)>,
    ValidatedJson(payload): ValidatedJson<UpdateDocumentRequest>,
) -> Result<Json<DocumentEnvelope>, ApiError> {
    let name = payload.name.as_deref().map(|name| required_name("name", name)).transpose()?;

    let mut uow = state.store.begin().await?;
    let actor = load_actor(&mut uow, user.user_id).await?;
    authorize_project(&mut uow, &actor, project_id).await?;

    let mut document = load_project_document(&mut uow, project_id, document_id).await?;

    if let Some(parent_id) = payload.parent_id {
        if let Some(candidate) = parent_id {
            // The document itself is a valid lookup here; the cycle check
            // reports it as a self reference.
            if !belongs_to_project(&mut uow, project_id, candidate).await? {
                return Err(ApiError::bad_request("Invalid parent document"));
            }
        }
        uow.ensure_acyclic_document_parent(project_id, document_id, parent_id).await?;
        document.parent_id = parent_id;
    }
    if let Some(name) = name {
        document.name = name;
    }
    if let Some(content) = &payload.content {
        document.content = stored_text_from_value(content);
    }
    if let Some(order) = payload.order {
        document.order = order;
    }
    if let Some(editable) = payload.editable_by_agent {
        document.editable_by_agent = editable;
    }
    if let Some(archived) = payload.archived {
        document.archived = archived;
    }
    document.updated_at = Utc::now();

    uow.update_document(&document).await?;
    let rendered = render(&mut uow, &document).await?;
    uow.commit().await?;

    Ok(Json(DocumentEnvelope { document: rendered }))
}

async fn delete_document(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((project_id, document_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    let mut uow = state.store.begin().await?;
    let actor = load_actor(&mut uow, user.user_id).await?;
    authorize_project(&mut uow, &actor, project_id).await?;

    load_project_document(&mut uow, project_id, document_id).await?;
    uow.delete_document(document_id).await?;
    uow.commit().await?;

    tracing::info!(project_id = %project_id, document_id = %document_id, "document subtree deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn create_from_template(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((project_id, template_id)): Path<(Uuid, Uuid)>,
) -> Result<(StatusCode, Json<DocumentEnvelope>), ApiError> {
    let mut uow = state.store.begin().await?;
    let actor = load_actor(&mut uow, user.user_id).await?;
    authorize_project(&mut uow, &actor, project_id).await?;

    let root = instantiate_from_template(&mut uow, &actor, template_id, project_id).await?;
    let rendered = render(&mut uow, &root).await?;
    uow.commit().await?;

    Ok((StatusCode::CREATED, Json(DocumentEnvelope { document: rendered })))
}

async fn load_project_document(
    uow: &mut UnitOfWork,
    project_id: Uuid,
    document_id: Uuid,
) -> Result<DocumentRecord, ApiError> {
    uow.get_document(document_id)
        .await?
        .filter(|document| document.project_id == project_id)
        .ok_or_else(|| ApiError::not_found("Document not found"))
}

async fn belongs_to_project(
    uow: &mut UnitOfWork,
    project_id: Uuid,
    document_id: Uuid,
) -> Result<bool, ApiError> {
    Ok(uow
        .get_document(document_id)
        .await?
        .is_some_and(|document| document.project_id == project_id))
}

/// Render one document with its archive state resolved against the project.
async fn render(uow: &mut UnitOfWork, document: &DocumentRecord) -> Result<Document, ApiError> {
    let project_docs = uow.list_documents(document.project_id).await?;
    documents_with_archive_state(std::slice::from_ref(document), &project_docs)
        .pop()
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("rendered document went missing")))
}
