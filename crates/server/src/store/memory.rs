// In-memory backend used by the router tests.
//
// Collections are plain vectors so iteration follows insertion order and
// stable sorts behave like the Postgres `ORDER BY` clauses.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use teamdocs_common::{tree, types::Visibility};
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use uuid::Uuid;

use super::{
    ApiTokenRecord, CategoryRecord, DocumentRecord, ProjectRecord, StoreError, StoreResult,
    TemplateFilter, TemplateRecord,
};

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    memberships: Vec<(Uuid, Uuid)>,
    projects: Vec<ProjectRecord>,
    documents: Vec<DocumentRecord>,
    templates: Vec<TemplateRecord>,
    categories: Vec<CategoryRecord>,
    api_tokens: Vec<ApiTokenRecord>,
}

/// Exclusive working copy; written back on commit.
pub struct MemoryTx {
    guard: OwnedRwLockWriteGuard<MemoryStore>,
    working: MemoryStore,
}

impl MemoryTx {
    pub(super) async fn begin(store: Arc<RwLock<MemoryStore>>) -> Self {
        let guard = store.write_owned().await;
        let working = guard.clone();
        Self { guard, working }
    }

    pub(super) fn commit(mut self) {
        *self.guard = self.working;
    }

    pub(super) fn state(&self) -> &MemoryStore {
        &self.working
    }

    pub(super) fn state_mut(&mut self) -> &mut MemoryStore {
        &mut self.working
    }
}

fn sorted<N: tree::TreeNode>(mut nodes: Vec<N>) -> Vec<N> {
    tree::sort_siblings(&mut nodes);
    nodes
}

impl MemoryStore {
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn add_membership(&mut self, team_id: Uuid, user_id: Uuid) {
        if !self.memberships.contains(&(team_id, user_id)) {
            self.memberships.push((team_id, user_id));
        }
    }

    pub(super) fn team_ids_for_user(&self, user_id: Uuid) -> Vec<Uuid> {
        self.memberships
            .iter()
            .filter(|(_, member)| *member == user_id)
            .map(|(team_id, _)| *team_id)
            .collect()
    }

    // ── Projects ───────────────────────────────────────────────────

    pub(super) fn get_project(&self, project_id: Uuid) -> Option<ProjectRecord> {
        self.projects.iter().find(|project| project.id == project_id).cloned()
    }

    pub(super) fn list_projects_for_teams(&self, team_ids: &[Uuid]) -> Vec<ProjectRecord> {
        let mut projects: Vec<ProjectRecord> = self
            .projects
            .iter()
            .filter(|project| team_ids.contains(&project.team_id))
            .cloned()
            .collect();
        projects.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        projects
    }

    pub fn insert_project(&mut self, project: ProjectRecord) {
        self.projects.push(project);
    }

    pub(super) fn delete_project(&mut self, project_id: Uuid) -> StoreResult<()> {
        let before = self.projects.len();
        self.projects.retain(|project| project.id != project_id);
        if self.projects.len() == before {
            return Err(StoreError::NotFound("project"));
        }
        self.documents.retain(|doc| doc.project_id != project_id);
        Ok(())
    }

    // ── Documents ──────────────────────────────────────────────────

    pub(super) fn get_document(&self, document_id: Uuid) -> Option<DocumentRecord> {
        self.documents.iter().find(|doc| doc.id == document_id).cloned()
    }

    pub(super) fn list_documents(&self, project_id: Uuid) -> Vec<DocumentRecord> {
        sorted(self.documents.iter().filter(|doc| doc.project_id == project_id).cloned().collect())
    }

    pub(super) fn list_document_children(&self, parent_id: Uuid) -> Vec<DocumentRecord> {
        sorted(
            self.documents
                .iter()
                .filter(|doc| doc.parent_id == Some(parent_id))
                .cloned()
                .collect(),
        )
    }

    pub(super) fn insert_documents(&mut self, documents: &[DocumentRecord]) -> StoreResult<()> {
        for doc in documents {
            if self.get_project(doc.project_id).is_none() {
                return Err(StoreError::NotFound("project"));
            }
            if let Some(parent_id) = doc.parent_id {
                let parent_ok = self
                    .documents
                    .iter()
                    .any(|parent| parent.id == parent_id && parent.project_id == doc.project_id);
                if !parent_ok {
                    return Err(StoreError::NotFound("parent document"));
                }
            }
            self.documents.push(doc.clone());
        }
        Ok(())
    }

    pub(super) fn update_document(&mut self, document: &DocumentRecord) -> StoreResult<()> {
        let slot = self
            .documents
            .iter_mut()
            .find(|doc| doc.id == document.id)
            .ok_or(StoreError::NotFound("document"))?;
        *slot = document.clone();
        Ok(())
    }

    pub(super) fn delete_document(&mut self, document_id: Uuid) -> StoreResult<()> {
        let doc = self.get_document(document_id).ok_or(StoreError::NotFound("document"))?;
        let parents = tree::parent_map(&self.list_documents(doc.project_id));
        let doomed: HashSet<Uuid> = tree::collect_subtree(&parents, document_id).into_iter().collect();
        self.documents.retain(|doc| !doomed.contains(&doc.id));
        Ok(())
    }

    pub(super) fn search_documents(&self, project_id: Uuid, words: &[String]) -> Vec<DocumentRecord> {
        let words: Vec<String> = words.iter().map(|word| word.to_lowercase()).collect();
        let mut hits: Vec<DocumentRecord> = self
            .documents
            .iter()
            .filter(|doc| doc.project_id == project_id)
            .filter(|doc| {
                let name = doc.name.to_lowercase();
                let content = doc.content.to_lowercase();
                words.iter().any(|word| name.contains(word) || content.contains(word))
            })
            .cloned()
            .collect();
        hits.sort_by_key(|doc| doc.created_at);
        hits
    }

    // ── Templates ──────────────────────────────────────────────────

    pub(super) fn get_template(&self, template_id: Uuid) -> Option<TemplateRecord> {
        self.templates.iter().find(|template| template.id == template_id).cloned()
    }

    pub(super) fn list_templates(&self, filter: &TemplateFilter) -> Vec<TemplateRecord> {
        sorted(
            self.templates
                .iter()
                .filter(|template| filter.category_id.is_none_or(|id| template.category_id == id))
                .filter(|template| !filter.only_root || template.parent_id.is_none())
                .cloned()
                .collect(),
        )
    }

    pub(super) fn list_template_children(&self, parent_id: Uuid) -> Vec<TemplateRecord> {
        sorted(
            self.templates
                .iter()
                .filter(|template| template.parent_id == Some(parent_id))
                .cloned()
                .collect(),
        )
    }

    pub(super) fn insert_templates(&mut self, templates: &[TemplateRecord]) -> StoreResult<()> {
        for template in templates {
            if self.get_category(template.category_id).is_none() {
                return Err(StoreError::NotFound("category"));
            }
            if let Some(parent_id) = template.parent_id {
                let parent_ok = self
                    .templates
                    .iter()
                    .any(|parent| parent.id == parent_id && parent.team_id == template.team_id);
                if !parent_ok {
                    return Err(StoreError::NotFound("parent template"));
                }
            }
            self.templates.push(template.clone());
        }
        Ok(())
    }

    pub(super) fn update_template(&mut self, template: &TemplateRecord) -> StoreResult<()> {
        let slot = self
            .templates
            .iter_mut()
            .find(|existing| existing.id == template.id)
            .ok_or(StoreError::NotFound("template"))?;
        *slot = template.clone();
        Ok(())
    }

    pub(super) fn delete_template(&mut self, template_id: Uuid) -> StoreResult<()> {
        if self.get_template(template_id).is_none() {
            return Err(StoreError::NotFound("template"));
        }
        let parents = tree::parent_map(&self.templates);
        let doomed: HashSet<Uuid> = tree::collect_subtree(&parents, template_id).into_iter().collect();
        self.templates.retain(|template| !doomed.contains(&template.id));
        Ok(())
    }

    // ── Categories ─────────────────────────────────────────────────

    pub(super) fn get_category(&self, category_id: Uuid) -> Option<CategoryRecord> {
        self.categories.iter().find(|category| category.id == category_id).cloned()
    }

    pub(super) fn category_by_name(&self, name: &str) -> Option<CategoryRecord> {
        self.categories.iter().find(|category| category.name == name).cloned()
    }

    pub(super) fn get_or_create_category(&mut self, name: &str) -> CategoryRecord {
        if let Some(existing) = self.category_by_name(name) {
            return existing;
        }
        let category = CategoryRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
            visibility: Visibility::Public,
            created_at: Utc::now(),
        };
        self.categories.push(category.clone());
        category
    }

    pub(super) fn list_categories(&self) -> Vec<CategoryRecord> {
        let mut categories = self.categories.clone();
        categories.sort_by(|a, b| a.name.cmp(&b.name));
        categories
    }

    // ── API tokens ─────────────────────────────────────────────────

    pub(super) fn insert_api_token(&mut self, token: ApiTokenRecord) {
        self.api_tokens.push(token);
    }

    pub(super) fn list_api_tokens(&self, user_id: Uuid) -> Vec<ApiTokenRecord> {
        let mut tokens: Vec<ApiTokenRecord> = self
            .api_tokens
            .iter()
            .filter(|token| token.user_id == user_id && token.deleted_at.is_none())
            .cloned()
            .collect();
        tokens.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tokens
    }

    pub(super) fn get_api_token(&self, token_id: Uuid) -> Option<ApiTokenRecord> {
        self.api_tokens
            .iter()
            .find(|token| token.id == token_id && token.deleted_at.is_none())
            .cloned()
    }

    pub(super) fn find_api_token_by_hash(&self, token_hash: &str) -> Option<ApiTokenRecord> {
        self.api_tokens.iter().find(|token| token.token_hash == token_hash).cloned()
    }

    pub(super) fn revoke_api_token(&mut self, token_id: Uuid) -> StoreResult<()> {
        let token = self
            .api_tokens
            .iter_mut()
            .find(|token| token.id == token_id && token.deleted_at.is_none())
            .ok_or(StoreError::NotFound("api token"))?;
        token.deleted_at = Some(Utc::now());
        Ok(())
    }
}
