// Template <-> document subtree conversion.
//
// Both directions snapshot the source subtree with explicit child fetches,
// plan every new node (fresh id, new parent link, normalized sibling order)
// and then write the whole plan through the caller's unit of work. Access is
// checked before the first write.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::Utc;
use teamdocs_common::{
    tree::TreeNode,
    types::Visibility,
    visibility::{can_access_node, Actor},
};
use thiserror::Error;
use uuid::Uuid;

use crate::store::{DocumentRecord, StoreError, TemplateRecord, UnitOfWork};

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("Template not found")]
    TemplateNotFound,
    #[error("Document not found")]
    DocumentNotFound,
    #[error("Project not found")]
    ProjectNotFound,
    #[error("You don't have access to this template")]
    TemplateForbidden,
    #[error("You don't have access to this project")]
    ProjectForbidden,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Parameters for turning a document (and optionally its subtree) into templates.
#[derive(Debug, Clone)]
pub struct TemplateDraft {
    pub name: String,
    pub category_name: String,
    pub visibility: Visibility,
    pub include_children: bool,
}

#[derive(Debug)]
struct PlannedCopy<'a, N> {
    source: &'a N,
    id: Uuid,
    parent_id: Option<Uuid>,
    order: i32,
}

/// Lay out the copy of `root`'s subtree. Parents always precede their
/// children; sibling order becomes the 0-based position among siblings.
fn plan_copy<'a, N: TreeNode>(
    root: &'a N,
    children: &'a HashMap<Uuid, Vec<N>>,
) -> Vec<PlannedCopy<'a, N>> {
    let mut plan = vec![PlannedCopy { source: root, id: Uuid::new_v4(), parent_id: None, order: 0 }];
    let mut cursor = 0;
    while cursor < plan.len() {
        let (source_id, new_id) = (plan[cursor].source.id(), plan[cursor].id);
        if let Some(kids) = children.get(&source_id) {
            for (position, kid) in kids.iter().enumerate() {
                plan.push(PlannedCopy {
                    source: kid,
                    id: Uuid::new_v4(),
                    parent_id: Some(new_id),
                    order: i32::try_from(position).unwrap_or(i32::MAX),
                });
            }
        }
        cursor += 1;
    }
    plan
}

async fn load_template_children(
    uow: &mut UnitOfWork,
    root_id: Uuid,
) -> Result<HashMap<Uuid, Vec<TemplateRecord>>, StoreError> {
    let mut children = HashMap::new();
    let mut seen = HashSet::from([root_id]);
    let mut queue = VecDeque::from([root_id]);
    while let Some(parent_id) = queue.pop_front() {
        let kids: Vec<TemplateRecord> = uow
            .list_template_children(parent_id)
            .await?
            .into_iter()
            .filter(|kid| seen.insert(kid.id))
            .collect();
        queue.extend(kids.iter().map(|kid| kid.id));
        children.insert(parent_id, kids);
    }
    Ok(children)
}

async fn load_document_children(
    uow: &mut UnitOfWork,
    root_id: Uuid,
) -> Result<HashMap<Uuid, Vec<DocumentRecord>>, StoreError> {
    let mut children = HashMap::new();
    let mut seen = HashSet::from([root_id]);
    let mut queue = VecDeque::from([root_id]);
    while let Some(parent_id) = queue.pop_front() {
        let kids: Vec<DocumentRecord> = uow
            .list_document_children(parent_id)
            .await?
            .into_iter()
            .filter(|kid| seen.insert(kid.id))
            .collect();
        queue.extend(kids.iter().map(|kid| kid.id));
        children.insert(parent_id, kids);
    }
    Ok(children)
}

/// Copy a template subtree into `project_id` as new root-level documents.
/// Returns the document created for the template root.
pub async fn instantiate_from_template(
    uow: &mut UnitOfWork,
    actor: &Actor,
    template_id: Uuid,
    project_id: Uuid,
) -> Result<DocumentRecord, ConversionError> {
    let template =
        uow.get_template(template_id).await?.ok_or(ConversionError::TemplateNotFound)?;
    if !can_access_node(actor, &template) {
        return Err(ConversionError::TemplateForbidden);
    }
    let project = uow.get_project(project_id).await?.ok_or(ConversionError::ProjectNotFound)?;
    if !actor.is_member_of(project.team_id) {
        return Err(ConversionError::ProjectForbidden);
    }

    let children = load_template_children(uow, template.id).await?;
    let now = Utc::now();
    let documents: Vec<DocumentRecord> = plan_copy(&template, &children)
        .into_iter()
        .map(|planned| DocumentRecord {
            id: planned.id,
            project_id: project.id,
            name: planned.source.name.clone(),
            kind: planned.source.kind,
            content: planned.source.content.clone(),
            parent_id: planned.parent_id,
            order: planned.order,
            editable_by_agent: false,
            archived: None,
            created_at: now,
            updated_at: now,
        })
        .collect();

    uow.insert_documents(&documents).await?;
    tracing::info!(
        template_id = %template.id,
        project_id = %project.id,
        created = documents.len(),
        "instantiated template"
    );

    documents.into_iter().next().ok_or(ConversionError::TemplateNotFound)
}

/// Copy a document (and, if requested, its subtree) into the library.
/// The new root is named after the draft; descendants keep their names.
pub async fn create_template_from_document(
    uow: &mut UnitOfWork,
    actor: &Actor,
    document_id: Uuid,
    draft: &TemplateDraft,
) -> Result<TemplateRecord, ConversionError> {
    let document =
        uow.get_document(document_id).await?.ok_or(ConversionError::DocumentNotFound)?;
    let project =
        uow.get_project(document.project_id).await?.ok_or(ConversionError::ProjectNotFound)?;
    if !actor.is_member_of(project.team_id) {
        return Err(ConversionError::ProjectForbidden);
    }

    let children = if draft.include_children {
        load_document_children(uow, document.id).await?
    } else {
        HashMap::new()
    };
    let category = uow.get_or_create_category(&draft.category_name).await?;
    let now = Utc::now();
    let templates: Vec<TemplateRecord> = plan_copy(&document, &children)
        .into_iter()
        .map(|planned| TemplateRecord {
            id: planned.id,
            team_id: project.team_id,
            creator_id: actor.user_id,
            category_id: category.id,
            name: if planned.parent_id.is_none() {
                draft.name.clone()
            } else {
                planned.source.name.clone()
            },
            kind: planned.source.kind,
            visibility: draft.visibility,
            content: planned.source.content.clone(),
            parent_id: planned.parent_id,
            order: planned.order,
            created_at: now,
            updated_at: now,
        })
        .collect();

    uow.insert_templates(&templates).await?;
    tracing::info!(
        document_id = %document.id,
        category = %category.name,
        created = templates.len(),
        "created template from document"
    );

    templates.into_iter().next().ok_or(ConversionError::DocumentNotFound)
}
