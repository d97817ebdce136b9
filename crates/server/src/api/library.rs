// Template library and category routes.
//
// Lists filter silently by visibility. Detail routes answer 404 before 403.

use std::collections::HashMap;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use teamdocs_common::{
    content::stored_text_from_value,
    types::{Category, Template, Visibility},
    visibility::{can_access_node, filter_accessible, Actor},
};
use uuid::Uuid;

use crate::{
    auth::middleware::AuthenticatedUser,
    library::{
        conversion::{create_template_from_document, ConversionError, TemplateDraft},
        visible_categories,
    },
    store::{CategoryRecord, TemplateFilter, TemplateRecord, UnitOfWork},
    validation::{required_name, ValidatedJson},
};

use super::{load_actor, ApiError, ApiState};

pub(super) fn routes() -> Router<ApiState> {
    Router::new()
        .route("/api/v1/library/templates", get(list_templates).post(create_template))
        .route(
            "/api/v1/library/templates/{template_id}",
            get(get_template).put(update_template).delete(delete_template),
        )
        .route("/api/v1/library/templates/{template_id}/children", get(list_template_children))
        .route("/api/v1/library/categories", get(list_categories))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListTemplatesQuery {
    pub category_name: Option<String>,
    #[serde(default)]
    pub only_root: bool,
    #[serde(default)]
    pub include_content: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateTemplateRequest {
    pub document_id: Uuid,
    pub name: String,
    pub category_name: String,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub include_children: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateTemplateRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub content: Option<Value>,
    #[serde(default)]
    pub category_name: Option<String>,
    #[serde(default)]
    pub visibility: Option<Visibility>,
}

#[derive(Debug, Serialize)]
pub struct TemplateEnvelope {
    pub template: Template,
}

#[derive(Debug, Serialize)]
pub struct TemplatesEnvelope {
    pub items: Vec<Template>,
}

#[derive(Debug, Serialize)]
pub struct CategoriesEnvelope {
    pub items: Vec<Category>,
}

async fn list_templates(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<ListTemplatesQuery>,
) -> Result<Json<TemplatesEnvelope>, ApiError> {
    let mut uow = state.store.begin().await?;
    let actor = load_actor(&mut uow, user.user_id).await?;

    let mut filter = TemplateFilter { only_root: query.only_root, ..TemplateFilter::default() };
    if let Some(name) = query.category_name.as_deref() {
        match uow.category_by_name(name).await? {
            Some(category) => filter.category_id = Some(category.id),
            None => return Ok(Json(TemplatesEnvelope { items: Vec::new() })),
        }
    }

    let templates = filter_accessible(&actor, uow.list_templates(&filter).await?);
    let names = category_names(&mut uow).await?;
    Ok(Json(TemplatesEnvelope { items: render_all(&templates, &names, query.include_content) }))
}

async fn get_template(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(template_id): Path<Uuid>,
) -> Result<Json<TemplateEnvelope>, ApiError> {
    let mut uow = state.store.begin().await?;
    let actor = load_actor(&mut uow, user.user_id).await?;
    let template = load_accessible_template(&mut uow, &actor, template_id).await?;

    Ok(Json(TemplateEnvelope { template: render(&mut uow, &template, true).await? }))
}

async fn list_template_children(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(template_id): Path<Uuid>,
) -> Result<Json<TemplatesEnvelope>, ApiError> {
    let mut uow = state.store.begin().await?;
    let actor = load_actor(&mut uow, user.user_id).await?;
    load_accessible_template(&mut uow, &actor, template_id).await?;

    let children = filter_accessible(&actor, uow.list_template_children(template_id).await?);
    let names = category_names(&mut uow).await?;
    Ok(Json(TemplatesEnvelope { items: render_all(&children, &names, false) }))
}

async fn create_template(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    ValidatedJson(payload): ValidatedJson<CreateTemplateRequest>,
) -> Result<(StatusCode, Json<TemplateEnvelope>), ApiError> {
    let draft = TemplateDraft {
        name: required_name("name", &payload.name)?,
        category_name: required_name("category_name", &payload.category_name)?,
        visibility: payload.visibility,
        include_children: payload.include_children,
    };

    let mut uow = state.store.begin().await?;
    let actor = load_actor(&mut uow, user.user_id).await?;
    let template = create_template_from_document(&mut uow, &actor, payload.document_id, &draft)
        .await
        .map_err(|error| match error {
            ConversionError::ProjectForbidden => {
                ApiError::forbidden("Not a member of this document's project team")
            }
            other => other.into(),
        })?;
    let rendered = render(&mut uow, &template, true).await?;
    uow.commit().await?;

    Ok((StatusCode::CREATED, Json(TemplateEnvelope { template: rendered })))
}

async fn update_template(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(template_id): Path<Uuid>,
    ValidatedJson(payload): ValidatedJson<UpdateTemplateRequest>,
) -> Result<Json<TemplateEnvelope>, ApiError> {
    let name = payload.name.as_deref().map(|name| required_name("name", name)).transpose()?;
    let category_name = payload
        .category_name
        .as_deref()
        .map(|name| required_name("category_name", name))
        .transpose()?;

    let mut uow = state.store.begin().await?;
    let actor = load_actor(&mut uow, user.user_id).await?;
    let mut template = load_owned_template(
        &mut uow,
        &actor,
        template_id,
        "Only the owning team can update this template",
    )
    .await?;

    if let Some(name) = name {
        template.name = name;
    }
    if let Some(content) = &payload.content {
        template.content = stored_text_from_value(content);
    }
    if let Some(category_name) = category_name {
        template.category_id = uow.get_or_create_category(&category_name).await?.id;
    }
    if let Some(visibility) = payload.visibility {
        template.visibility = visibility;
    }
    template.updated_at = Utc::now();

    uow.update_template(&template).await?;
    let rendered = render(&mut uow, &template, true).await?;
    uow.commit().await?;

    Ok(Json(TemplateEnvelope { template: rendered }))
}

async fn delete_template(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(template_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let mut uow = state.store.begin().await?;
    let actor = load_actor(&mut uow, user.user_id).await?;
    load_owned_template(&mut uow, &actor, template_id, "Only the owning team can delete this template")
        .await?;
    uow.delete_template(template_id).await?;
    uow.commit().await?;

    tracing::info!(template_id = %template_id, "template subtree deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn list_categories(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<CategoriesEnvelope>, ApiError> {
    let mut uow = state.store.begin().await?;
    let actor = load_actor(&mut uow, user.user_id).await?;
    let categories = visible_categories(&actor, uow.list_categories().await?);

    Ok(Json(CategoriesEnvelope {
        items: categories.into_iter().map(CategoryRecord::into_category).collect(),
    }))
}

async fn load_accessible_template(
    uow: &mut UnitOfWork,
    actor: &Actor,
    template_id: Uuid,
) -> Result<TemplateRecord, ApiError> {
    let template =
        uow.get_template(template_id).await?.ok_or_else(|| ApiError::not_found("Template not found"))?;
    if !can_access_node(actor, &template) {
        return Err(ApiError::forbidden("Cannot access this template"));
    }
    Ok(template)
}

async fn load_owned_template(
    uow: &mut UnitOfWork,
    actor: &Actor,
    template_id: Uuid,
    forbidden: &str,
) -> Result<TemplateRecord, ApiError> {
    let template =
        uow.get_template(template_id).await?.ok_or_else(|| ApiError::not_found("Template not found"))?;
    if !actor.is_member_of(template.team_id) {
        return Err(ApiError::forbidden(forbidden));
    }
    Ok(template)
}

async fn category_names(uow: &mut UnitOfWork) -> Result<HashMap<Uuid, String>, ApiError> {
    Ok(uow
        .list_categories()
        .await?
        .into_iter()
        .map(|category| (category.id, category.name))
        .collect())
}

fn render_all(
    templates: &[TemplateRecord],
    names: &HashMap<Uuid, String>,
    include_content: bool,
) -> Vec<Template> {
    templates
        .iter()
        .map(|template| {
            let category = names.get(&template.category_id).map(String::as_str).unwrap_or_default();
            template.to_template(category, include_content)
        })
        .collect()
}

async fn render(
    uow: &mut UnitOfWork,
    template: &TemplateRecord,
    include_content: bool,
) -> Result<Template, ApiError> {
    let category = uow
        .get_category(template.category_id)
        .await?
        .map(|category| category.name)
        .unwrap_or_default();
    Ok(template.to_template(&category, include_content))
}

#[cfg(test)]
mod tests {
    use axum::{
        http::{Method, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use teamdocs_common::types::Visibility;
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::{
        api::build_router,
        store::TemplateRecord,
        test_support::{
            add_membership, bearer, body_json, category, delete_request, document, fixture,
            get_request, insert_documents, insert_templates, json_request, template,
            test_sessions, Fixture,
        },
    };

    fn setup(fx: &Fixture) -> (Router, String) {
        let sessions = test_sessions();
        let auth = bearer(&sessions, fx.user_id);
        (build_router(fx.store.clone(), sessions), auth)
    }

    async fn get_json(router: &Router, uri: &str, auth: &str) -> (StatusCode, Value) {
        let response = router
            .clone()
            .oneshot(get_request(uri, auth))
            .await
            .expect("request should return response");
        let status = response.status();
        (status, body_json(response).await)
    }

    fn names(body: &Value) -> Vec<String> {
        body["items"]
            .as_array()
            .expect("items should be an array")
            .iter()
            .filter_map(|item| item["name"].as_str().map(str::to_string))
            .collect()
    }

    /// public(other team), team(own), team(other), private(own), private(other)
    async fn seeded_library(fx: &Fixture) -> Vec<TemplateRecord> {
        let guides = category(&fx.store, "Guides").await;
        let other_team = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let templates = vec![
            template(other_team, stranger, guides.id, None, "public", 0, Visibility::Public),
            template(fx.team_id, stranger, guides.id, None, "team-own", 1, Visibility::Team),
            template(other_team, stranger, guides.id, None, "team-other", 2, Visibility::Team),
            template(fx.team_id, fx.user_id, guides.id, None, "private-own", 3, Visibility::Private),
            template(fx.team_id, stranger, guides.id, None, "private-other", 4, Visibility::Private),
        ];
        insert_templates(&fx.store, &templates).await;
        templates
    }

    #[tokio::test]
    async fn list_filters_by_visibility_without_errors() {
        let fx = fixture().await;
        seeded_library(&fx).await;
        let (router, auth) = setup(&fx);

        let (status, body) = get_json(&router, "/api/v1/library/templates", &auth).await;
        assert_eq!(status, StatusCode::OK);
        let mut visible = names(&body);
        visible.sort();
        assert_eq!(visible, ["private-own", "public", "team-own"]);
        assert!(body["items"][0].get("content").is_none());
        assert_eq!(body["items"][0]["category_name"], "Guides");
    }

    #[tokio::test]
    async fn list_honors_category_root_and_content_flags() {
        let fx = fixture().await;
        let guides = category(&fx.store, "Guides").await;
        let recipes = category(&fx.store, "Recipes").await;
        let root = template(fx.team_id, fx.user_id, guides.id, None, "root", 0, Visibility::Team);
        let child =
            template(fx.team_id, fx.user_id, guides.id, Some(root.id), "child", 0, Visibility::Team);
        let other = template(fx.team_id, fx.user_id, recipes.id, None, "other", 0, Visibility::Team);
        insert_templates(&fx.store, &[root, child, other]).await;
        let (router, auth) = setup(&fx);

        let (_, body) = get_json(
            &router,
            "/api/v1/library/templates?category_name=Guides&only_root=true&include_content=true",
            &auth,
        )
        .await;
        assert_eq!(names(&body), ["root"]);
        assert_eq!(body["items"][0]["content"]["markdown"], "# root");

        let (status, body) =
            get_json(&router, "/api/v1/library/templates?category_name=Nope", &auth).await;
        assert_eq!(status, StatusCode::OK);
        assert!(names(&body).is_empty());
    }

    #[tokio::test]
    async fn detail_distinguishes_missing_from_forbidden() {
        let fx = fixture().await;
        let templates = seeded_library(&fx).await;
        let (router, auth) = setup(&fx);

        let (status, _) =
            get_json(&router, &format!("/api/v1/library/templates/{}", Uuid::new_v4()), &auth).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) =
            get_json(&router, &format!("/api/v1/library/templates/{}", templates[2].id), &auth).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "AUTH_FORBIDDEN");

        let (status, body) =
            get_json(&router, &format!("/api/v1/library/templates/{}", templates[3].id), &auth).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["template"]["content"]["markdown"], "# private-own");
    }

    #[tokio::test]
    async fn children_are_filtered_and_ordered() {
        let fx = fixture().await;
        let guides = category(&fx.store, "Guides").await;
        let root = template(fx.team_id, fx.user_id, guides.id, None, "root", 0, Visibility::Team);
        let second =
            template(fx.team_id, fx.user_id, guides.id, Some(root.id), "second", 2, Visibility::Team);
        let first =
            template(fx.team_id, fx.user_id, guides.id, Some(root.id), "first", 1, Visibility::Public);
        let hidden = template(
            fx.team_id,
            Uuid::new_v4(),
            guides.id,
            Some(root.id),
            "hidden",
            0,
            Visibility::Private,
        );
        insert_templates(&fx.store, &[root.clone(), second, first, hidden]).await;
        let (router, auth) = setup(&fx);

        let (status, body) = get_json(
            &router,
            &format!("/api/v1/library/templates/{}/children", root.id),
            &auth,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(names(&body), ["first", "second"]);
    }

    #[tokio::test]
    async fn create_from_document_with_children() {
        let fx = fixture().await;
        let root = document(fx.project.id, None, "Playbook", 0);
        let child = document(fx.project.id, Some(root.id), "Step", 0);
        insert_documents(&fx.store, &[root.clone(), child]).await;
        let (router, auth) = setup(&fx);

        let response = router
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/v1/library/templates",
                json!({
                    "document_id": root.id,
                    "name": "Incident playbook",
                    "category_name": "Operations",
                    "include_children": true,
                }),
                &auth,
            ))
            .await
            .expect("request should return response");
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["template"]["name"], "Incident playbook");
        assert_eq!(body["template"]["category_name"], "Operations");
        assert_eq!(body["template"]["visibility"], "TEAM");

        let id = body["template"]["id"].as_str().expect("id should be a string");
        let (_, children) =
            get_json(&router, &format!("/api/v1/library/templates/{id}/children"), &auth).await;
        assert_eq!(names(&children), ["Step"]);
    }

    #[tokio::test]
    async fn create_from_foreign_document_is_forbidden() {
        let fx = fixture().await;
        let root = document(fx.project.id, None, "Playbook", 0);
        insert_documents(&fx.store, std::slice::from_ref(&root)).await;
        let sessions = test_sessions();
        let outsider = Uuid::new_v4();
        add_membership(&fx.store, Uuid::new_v4(), outsider).await;
        let router = build_router(fx.store.clone(), sessions.clone());

        let response = router
            .oneshot(json_request(
                Method::POST,
                "/api/v1/library/templates",
                json!({ "document_id": root.id, "name": "Copy", "category_name": "Ops" }),
                &bearer(&sessions, outsider),
            ))
            .await
            .expect("request should return response");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            body_json(response).await["error"]["message"],
            "Not a member of this document's project team"
        );
    }

    #[tokio::test]
    async fn only_owning_team_can_update_or_delete() {
        let fx = fixture().await;
        let templates = seeded_library(&fx).await;
        let (router, auth) = setup(&fx);

        let foreign = &templates[0];
        let response = router
            .clone()
            .oneshot(json_request(
                Method::PUT,
                &format!("/api/v1/library/templates/{}", foreign.id),
                json!({ "name": "Hijacked" }),
                &auth,
            ))
            .await
            .expect("request should return response");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            body_json(response).await["error"]["message"],
            "Only the owning team can update this template"
        );

        let response = router
            .clone()
            .oneshot(delete_request(&format!("/api/v1/library/templates/{}", foreign.id), &auth))
            .await
            .expect("request should return response");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let own = &templates[1];
        let response = router
            .clone()
            .oneshot(json_request(
                Method::PUT,
                &format!("/api/v1/library/templates/{}", own.id),
                json!({ "name": "Renamed", "category_name": "Fresh", "visibility": "PUBLIC" }),
                &auth,
            ))
            .await
            .expect("request should return response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["template"]["name"], "Renamed");
        assert_eq!(body["template"]["category_name"], "Fresh");
        assert_eq!(body["template"]["visibility"], "PUBLIC");

        let response = router
            .oneshot(delete_request(&format!("/api/v1/library/templates/{}", own.id), &auth))
            .await
            .expect("request should return response");
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn categories_hide_private_and_sort_by_name() {
        let fx = fixture().await;
        category(&fx.store, "Zebra").await;
        category(&fx.store, "Alpha").await;
        let (router, auth) = setup(&fx);

        let (status, body) = get_json(&router, "/api/v1/library/categories", &auth).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(names(&body), ["Alpha", "Zebra"]);
    }
}
