// Tree store and the other persistent collections behind the HTTP surface.
//
// `Store` hands out a `UnitOfWork` per request. Every read and write of a
// request goes through that unit, which is either a Postgres transaction or
// an exclusive snapshot of the in-memory backend. Dropping a unit without
// calling `commit` discards its writes.

mod memory;
mod postgres;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use teamdocs_common::{
    content::value_from_stored_text,
    tree::{self, ParentMap, TreeError, TreeNode},
    types::{ApiTokenInfo, Category, Document, NodeKind, Project, Template, Visibility},
    visibility::Scoped,
};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

pub use memory::MemoryStore;
use memory::MemoryTx;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error("invalid stored value: {0}")]
    Corrupt(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ── Records ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRecord {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub team_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl ProjectRecord {
    pub fn into_project(self) -> Project {
        Project {
            id: self.id,
            name: self.name,
            description: self.description,
            team_id: self.team_id,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRecord {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub kind: NodeKind,
    /// Serialized content as persisted.
    pub content: String,
    pub parent_id: Option<Uuid>,
    pub order: i32,
    pub editable_by_agent: bool,
    pub archived: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TreeNode for DocumentRecord {
    fn id(&self) -> Uuid {
        self.id
    }
    fn parent_id(&self) -> Option<Uuid> {
        self.parent_id
    }
    fn order(&self) -> i32 {
        self.order
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl DocumentRecord {
    pub fn to_document(&self, effective_archived: bool) -> Document {
        Document {
            id: self.id,
            project_id: self.project_id,
            name: self.name.clone(),
            kind: self.kind,
            content: value_from_stored_text(&self.content),
            parent_id: self.parent_id,
            order: self.order,
            editable_by_agent: self.editable_by_agent,
            archived: self.archived,
            effective_archived,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Render documents with archive inheritance resolved against `project_docs`.
pub fn documents_with_archive_state(
    records: &[DocumentRecord],
    project_docs: &[DocumentRecord],
) -> Vec<Document> {
    let parents: ParentMap = tree::parent_map(project_docs);
    let explicit = project_docs.iter().map(|doc| (doc.id, doc.archived)).collect();
    records
        .iter()
        .map(|record| record.to_document(tree::inherited_flag(&parents, &explicit, record.id)))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateRecord {
    pub id: Uuid,
    pub team_id: Uuid,
    pub creator_id: Uuid,
    pub category_id: Uuid,
    pub name: String,
    pub kind: NodeKind,
    pub visibility: Visibility,
    pub content: String,
    pub parent_id: Option<Uuid>,
    pub order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TreeNode for TemplateRecord {
    fn id(&self) -> Uuid {
        self.id
    }
    fn parent_id(&self) -> Option<Uuid> {
        self.parent_id
    }
    fn order(&self) -> i32 {
        self.order
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Scoped for TemplateRecord {
    fn visibility(&self) -> Visibility {
        self.visibility
    }
    fn owner_team_id(&self) -> Uuid {
        self.team_id
    }
    fn creator_id(&self) -> Uuid {
        self.creator_id
    }
}

impl TemplateRecord {
    pub fn to_template(&self, category_name: &str, include_content: bool) -> Template {
        Template {
            id: self.id,
            team_id: self.team_id,
            creator_id: self.creator_id,
            category_id: self.category_id,
            category_name: category_name.to_string(),
            name: self.name.clone(),
            kind: self.kind,
            visibility: self.visibility,
            content: include_content.then(|| value_from_stored_text(&self.content)),
            parent_id: self.parent_id,
            order: self.order,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryRecord {
    pub id: Uuid,
    pub name: String,
    pub visibility: Visibility,
    pub created_at: DateTime<Utc>,
}

impl CategoryRecord {
    pub fn into_category(self) -> Category {
        Category {
            id: self.id,
            name: self.name,
            visibility: self.visibility,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiTokenRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub token_hash: String,
    pub token_hint: String,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ApiTokenRecord {
    pub fn to_info(&self, plaintext: Option<String>) -> ApiTokenInfo {
        ApiTokenInfo {
            id: self.id,
            name: self.name.clone(),
            token_hint: self.token_hint.clone(),
            token: plaintext,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateFilter {
    pub category_id: Option<Uuid>,
    pub only_root: bool,
}

// ── Store ──────────────────────────────────────────────────────────

#[derive(Clone)]
pub enum Store {
    Postgres(PgPool),
    #[cfg_attr(not(test), allow(dead_code))]
    Memory(Arc<RwLock<MemoryStore>>),
}

impl Store {
    #[cfg(test)]
    pub fn memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(MemoryStore::default())))
    }

    pub async fn begin(&self) -> StoreResult<UnitOfWork> {
        match self {
            Self::Postgres(pool) => Ok(UnitOfWork::Postgres(pool.begin().await?)),
            Self::Memory(store) => Ok(UnitOfWork::Memory(MemoryTx::begin(Arc::clone(store)).await)),
        }
    }
}

pub enum UnitOfWork {
    Postgres(Transaction<'static, Postgres>),
    Memory(MemoryTx),
}

impl UnitOfWork {
    pub async fn commit(self) -> StoreResult<()> {
        match self {
            Self::Postgres(tx) => Ok(tx.commit().await?),
            Self::Memory(tx) => {
                tx.commit();
                Ok(())
            }
        }
    }

    // ── Identity ───────────────────────────────────────────────────

    pub async fn team_ids_for_user(&mut self, user_id: Uuid) -> StoreResult<Vec<Uuid>> {
        match self {
            Self::Postgres(tx) => postgres::team_ids_for_user(tx, user_id).await,
            Self::Memory(tx) => Ok(tx.state().team_ids_for_user(user_id)),
        }
    }

    // ── Projects ───────────────────────────────────────────────────

    pub async fn get_project(&mut self, project_id: Uuid) -> StoreResult<Option<ProjectRecord>> {
        match self {
            Self::Postgres(tx) => postgres::get_project(tx, project_id).await,
            Self::Memory(tx) => Ok(tx.state().get_project(project_id)),
        }
    }

    pub async fn list_projects_for_teams(
        &mut self,
        team_ids: &[Uuid],
    ) -> StoreResult<Vec<ProjectRecord>> {
        match self {
            Self::Postgres(tx) => postgres::list_projects_for_teams(tx, team_ids).await,
            Self::Memory(tx) => Ok(tx.state().list_projects_for_teams(team_ids)),
        }
    }

    pub async fn insert_project(&mut self, project: &ProjectRecord) -> StoreResult<()> {
        match self {
            Self::Postgres(tx) => postgres::insert_project(tx, project).await,
            Self::Memory(tx) => {
                tx.state_mut().insert_project(project.clone());
                Ok(())
            }
        }
    }

    pub async fn delete_project(&mut self, project_id: Uuid) -> StoreResult<()> {
        match self {
            Self::Postgres(tx) => postgres::delete_project(tx, project_id).await,
            Self::Memory(tx) => tx.state_mut().delete_project(project_id),
        }
    }

    // ── Documents ──────────────────────────────────────────────────

    pub async fn get_document(&mut self, document_id: Uuid) -> StoreResult<Option<DocumentRecord>> {
        match self {
            Self::Postgres(tx) => postgres::get_document(tx, document_id).await,
            Self::Memory(tx) => Ok(tx.state().get_document(document_id)),
        }
    }

    /// All documents of a project ordered by `(order, created_at)`.
    pub async fn list_documents(&mut self, project_id: Uuid) -> StoreResult<Vec<DocumentRecord>> {
        match self {
            Self::Postgres(tx) => postgres::list_documents(tx, project_id).await,
            Self::Memory(tx) => Ok(tx.state().list_documents(project_id)),
        }
    }

    pub async fn list_document_children(
        &mut self,
        parent_id: Uuid,
    ) -> StoreResult<Vec<DocumentRecord>> {
        match self {
            Self::Postgres(tx) => postgres::list_document_children(tx, parent_id).await,
            Self::Memory(tx) => Ok(tx.state().list_document_children(parent_id)),
        }
    }

    /// Insert documents in slice order; parents must precede their children.
    pub async fn insert_documents(&mut self, documents: &[DocumentRecord]) -> StoreResult<()> {
        match self {
            Self::Postgres(tx) => postgres::insert_documents(tx, documents).await,
            Self::Memory(tx) => tx.state_mut().insert_documents(documents),
        }
    }

    pub async fn update_document(&mut self, document: &DocumentRecord) -> StoreResult<()> {
        match self {
            Self::Postgres(tx) => postgres::update_document(tx, document).await,
            Self::Memory(tx) => tx.state_mut().update_document(document),
        }
    }

    /// Delete a document and its whole subtree.
    pub async fn delete_document(&mut self, document_id: Uuid) -> StoreResult<()> {
        match self {
            Self::Postgres(tx) => postgres::delete_document(tx, document_id).await,
            Self::Memory(tx) => tx.state_mut().delete_document(document_id),
        }
    }

    /// Documents whose name or stored content contains any of `words`,
    /// case-insensitively, oldest first.
    pub async fn search_documents(
        &mut self,
        project_id: Uuid,
        words: &[String],
    ) -> StoreResult<Vec<DocumentRecord>> {
        if words.is_empty() {
            return Ok(Vec::new());
        }
        match self {
            Self::Postgres(tx) => postgres::search_documents(tx, project_id, words).await,
            Self::Memory(tx) => Ok(tx.state().search_documents(project_id, words)),
        }
    }

    /// Reject moving `document_id` under `proposed_parent` if that closes a cycle.
    pub async fn ensure_acyclic_document_parent(
        &mut self,
        project_id: Uuid,
        document_id: Uuid,
        proposed_parent: Option<Uuid>,
    ) -> StoreResult<()> {
        let documents = self.list_documents(project_id).await?;
        tree::check_reparent(&tree::parent_map(&documents), document_id, proposed_parent)?;
        Ok(())
    }

    // ── Templates ──────────────────────────────────────────────────

    pub async fn get_template(&mut self, template_id: Uuid) -> StoreResult<Option<TemplateRecord>> {
        match self {
            Self::Postgres(tx) => postgres::get_template(tx, template_id).await,
            Self::Memory(tx) => Ok(tx.state().get_template(template_id)),
        }
    }

    pub async fn list_templates(
        &mut self,
        filter: &TemplateFilter,
    ) -> StoreResult<Vec<TemplateRecord>> {
        match self {
            Self::Postgres(tx) => postgres::list_templates(tx, filter).await,
            Self::Memory(tx) => Ok(tx.state().list_templates(filter)),
        }
    }

    pub async fn list_template_children(
        &mut self,
        parent_id: Uuid,
    ) -> StoreResult<Vec<TemplateRecord>> {
        match self {
            Self::Postgres(tx) => postgres::list_template_children(tx, parent_id).await,
            Self::Memory(tx) => Ok(tx.state().list_template_children(parent_id)),
        }
    }

    pub async fn insert_templates(&mut self, templates: &[TemplateRecord]) -> StoreResult<()> {
        match self {
            Self::Postgres(tx) => postgres::insert_templates(tx, templates).await,
            Self::Memory(tx) => tx.state_mut().insert_templates(templates),
        }
    }

    pub async fn update_template(&mut self, template: &TemplateRecord) -> StoreResult<()> {
        match self {
            Self::Postgres(tx) => postgres::update_template(tx, template).await,
            Self::Memory(tx) => tx.state_mut().update_template(template),
        }
    }

    pub async fn delete_template(&mut self, template_id: Uuid) -> StoreResult<()> {
        match self {
            Self::Postgres(tx) => postgres::delete_template(tx, template_id).await,
            Self::Memory(tx) => tx.state_mut().delete_template(template_id),
        }
    }

    // ── Categories ─────────────────────────────────────────────────

    pub async fn get_category(&mut self, category_id: Uuid) -> StoreResult<Option<CategoryRecord>> {
        match self {
            Self::Postgres(tx) => postgres::get_category(tx, category_id).await,
            Self::Memory(tx) => Ok(tx.state().get_category(category_id)),
        }
    }

    pub async fn category_by_name(&mut self, name: &str) -> StoreResult<Option<CategoryRecord>> {
        match self {
            Self::Postgres(tx) => postgres::category_by_name(tx, name).await,
            Self::Memory(tx) => Ok(tx.state().category_by_name(name)),
        }
    }

    /// Look a category up by name, creating it as PUBLIC when absent.
    pub async fn get_or_create_category(&mut self, name: &str) -> StoreResult<CategoryRecord> {
        match self {
            Self::Postgres(tx) => postgres::get_or_create_category(tx, name).await,
            Self::Memory(tx) => Ok(tx.state_mut().get_or_create_category(name)),
        }
    }

    pub async fn list_categories(&mut self) -> StoreResult<Vec<CategoryRecord>> {
        match self {
            Self::Postgres(tx) => postgres::list_categories(tx).await,
            Self::Memory(tx) => Ok(tx.state().list_categories()),
        }
    }

    // ── API tokens ─────────────────────────────────────────────────

    pub async fn insert_api_token(&mut self, token: &ApiTokenRecord) -> StoreResult<()> {
        match self {
            Self::Postgres(tx) => postgres::insert_api_token(tx, token).await,
            Self::Memory(tx) => {
                tx.state_mut().insert_api_token(token.clone());
                Ok(())
            }
        }
    }

    /// Active tokens of a user, newest first.
    pub async fn list_api_tokens(&mut self, user_id: Uuid) -> StoreResult<Vec<ApiTokenRecord>> {
        match self {
            Self::Postgres(tx) => postgres::list_api_tokens(tx, user_id).await,
            Self::Memory(tx) => Ok(tx.state().list_api_tokens(user_id)),
        }
    }

    pub async fn get_api_token(&mut self, token_id: Uuid) -> StoreResult<Option<ApiTokenRecord>> {
        match self {
            Self::Postgres(tx) => postgres::get_api_token(tx, token_id).await,
            Self::Memory(tx) => Ok(tx.state().get_api_token(token_id)),
        }
    }

    /// Lookup by digest, including revoked tokens.
    pub async fn find_api_token_by_hash(
        &mut self,
        token_hash: &str,
    ) -> StoreResult<Option<ApiTokenRecord>> {
        match self {
            Self::Postgres(tx) => postgres::find_api_token_by_hash(tx, token_hash).await,
            Self::Memory(tx) => Ok(tx.state().find_api_token_by_hash(token_hash)),
        }
    }

    pub async fn revoke_api_token(&mut self, token_id: Uuid) -> StoreResult<()> {
        match self {
            Self::Postgres(tx) => postgres::revoke_api_token(tx, token_id).await,
            Self::Memory(tx) => tx.state_mut().revoke_api_token(token_id),
        }
    }
}

pub(crate) fn parse_kind(value: &str) -> StoreResult<NodeKind> {
    value.parse().map_err(|_| StoreError::Corrupt(format!("node type `{value}`")))
}

pub(crate) fn parse_visibility(value: &str) -> StoreResult<Visibility> {
    value.parse().map_err(|_| StoreError::Corrupt(format!("visibility `{value}`")))
}
