// Fixtures shared by the router and engine tests.

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        Method, Request,
    },
    response::Response,
};
use chrono::Utc;
use teamdocs_common::types::{NodeKind, Visibility};
use uuid::Uuid;

use crate::{
    auth::{api_tokens::generate_token, jwt::SessionTokenService},
    store::{ApiTokenRecord, CategoryRecord, DocumentRecord, ProjectRecord, Store, TemplateRecord},
};

pub const TEST_SECRET: &str = "teamdocs_test_secret_that_is_definitely_long_enough";

pub fn test_sessions() -> Arc<SessionTokenService> {
    Arc::new(SessionTokenService::new(TEST_SECRET).expect("test session service should initialize"))
}

pub struct Fixture {
    pub store: Store,
    pub user_id: Uuid,
    pub team_id: Uuid,
    pub project: ProjectRecord,
}

/// A memory store with one user who belongs to one team owning one project.
pub async fn fixture() -> Fixture {
    let store = Store::memory();
    let user_id = Uuid::new_v4();
    let team_id = Uuid::new_v4();
    add_membership(&store, team_id, user_id).await;

    let project = ProjectRecord {
        id: Uuid::new_v4(),
        name: "Handbook".into(),
        description: Some("Team handbook".into()),
        team_id,
        created_at: Utc::now(),
    };
    let mut uow = store.begin().await.expect("begin");
    uow.insert_project(&project).await.expect("insert project");
    uow.commit().await.expect("commit");

    Fixture { store, user_id, team_id, project }
}

pub async fn add_membership(store: &Store, team_id: Uuid, user_id: Uuid) {
    match store {
        Store::Memory(inner) => inner.write().await.add_membership(team_id, user_id),
        Store::Postgres(_) => panic!("fixtures only seed the memory store"),
    }
}

pub fn document(project_id: Uuid, parent_id: Option<Uuid>, name: &str, order: i32) -> DocumentRecord {
    let now = Utc::now();
    DocumentRecord {
        id: Uuid::new_v4(),
        project_id,
        name: name.into(),
        kind: NodeKind::Markdown,
        content: serde_json::json!({ "markdown": format!("# {name}") }).to_string(),
        parent_id,
        order,
        editable_by_agent: false,
        archived: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn template(
    team_id: Uuid,
    creator_id: Uuid,
    category_id: Uuid,
    parent_id: Option<Uuid>,
    name: &str,
    order: i32,
    visibility: Visibility,
) -> TemplateRecord {
    let now = Utc::now();
    TemplateRecord {
        id: Uuid::new_v4(),
        team_id,
        creator_id,
        category_id,
        name: name.into(),
        kind: NodeKind::Markdown,
        visibility,
        content: serde_json::json!({ "markdown": format!("# {name}") }).to_string(),
        parent_id,
        order,
        created_at: now,
        updated_at: now,
    }
}

pub async fn insert_documents(store: &Store, documents: &[DocumentRecord]) {
    let mut uow = store.begin().await.expect("begin");
    uow.insert_documents(documents).await.expect("insert documents");
    uow.commit().await.expect("commit");
}

pub async fn insert_templates(store: &Store, templates: &[TemplateRecord]) {
    let mut uow = store.begin().await.expect("begin");
    uow.insert_templates(templates).await.expect("insert templates");
    uow.commit().await.expect("commit");
}

pub async fn category(store: &Store, name: &str) -> CategoryRecord {
    let mut uow = store.begin().await.expect("begin");
    let category = uow.get_or_create_category(name).await.expect("category");
    uow.commit().await.expect("commit");
    category
}

/// Store a fresh agent token for `user_id`. Returns the record and the plaintext.
pub async fn api_token(store: &Store, user_id: Uuid) -> (ApiTokenRecord, String) {
    let generated = generate_token();
    let record = ApiTokenRecord {
        id: Uuid::new_v4(),
        user_id,
        name: "agent".into(),
        token_hash: generated.hash,
        token_hint: generated.hint,
        created_at: Utc::now(),
        deleted_at: None,
    };
    let mut uow = store.begin().await.expect("begin");
    uow.insert_api_token(&record).await.expect("insert token");
    uow.commit().await.expect("commit");
    (record, generated.plaintext)
}

// ── HTTP helpers ───────────────────────────────────────────────────

pub fn bearer(sessions: &SessionTokenService, user_id: Uuid) -> String {
    let token = sessions.issue_session_token(user_id).expect("token should be issued");
    format!("Bearer {token}")
}

pub fn json_request(
    method: Method,
    uri: &str,
    body: serde_json::Value,
    authorization: &str,
) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(AUTHORIZATION, authorization)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build")
}

pub fn get_request(uri: &str, authorization: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(AUTHORIZATION, authorization)
        .body(Body::empty())
        .expect("request should build")
}

pub fn delete_request(uri: &str, authorization: &str) -> Request<Body> {
    Request::builder()
        .method(Method::DELETE)
        .uri(uri)
        .header(AUTHORIZATION, authorization)
        .body(Body::empty())
        .expect("request should build")
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let body = to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("response body should be readable");
    serde_json::from_slice(&body).expect("response body should be valid json")
}
