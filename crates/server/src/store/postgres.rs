use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::{
    parse_kind, parse_visibility, ApiTokenRecord, CategoryRecord, DocumentRecord, ProjectRecord,
    StoreError, StoreResult, TemplateFilter, TemplateRecord,
};

type Tx = Transaction<'static, Postgres>;

// ── Rows ───────────────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct ProjectRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    team_id: Uuid,
    created_at: DateTime<Utc>,
}

impl From<ProjectRow> for ProjectRecord {
    fn from(row: ProjectRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            description: row.description,
            team_id: row.team_id,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct DocumentRow {
    id: Uuid,
    project_id: Uuid,
    name: String,
    #[sqlx(rename = "type")]
    kind: String,
    content: String,
    parent_id: Option<Uuid>,
    #[sqlx(rename = "order")]
    sort_order: i32,
    editable_by_agent: bool,
    archived: Option<bool>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<DocumentRow> for DocumentRecord {
    type Error = StoreError;

    fn try_from(row: DocumentRow) -> StoreResult<Self> {
        Ok(Self {
            id: row.id,
            project_id: row.project_id,
            name: row.name,
            kind: parse_kind(&row.kind)?,
            content: row.content,
            parent_id: row.parent_id,
            order: row.sort_order,
            editable_by_agent: row.editable_by_agent,
            archived: row.archived,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TemplateRow {
    id: Uuid,
    team_id: Uuid,
    creator_id: Uuid,
    category_id: Uuid,
    name: String,
    #[sqlx(rename = "type")]
    kind: String,
    visibility: String,
    content: String,
    parent_id: Option<Uuid>,
    #[sqlx(rename = "order")]
    sort_order: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TemplateRow> for TemplateRecord {
    type Error = StoreError;

    fn try_from(row: TemplateRow) -> StoreResult<Self> {
        Ok(Self {
            id: row.id,
            team_id: row.team_id,
            creator_id: row.creator_id,
            category_id: row.category_id,
            name: row.name,
            kind: parse_kind(&row.kind)?,
            visibility: parse_visibility(&row.visibility)?,
            content: row.content,
            parent_id: row.parent_id,
            order: row.sort_order,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CategoryRow {
    id: Uuid,
    name: String,
    visibility: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<CategoryRow> for CategoryRecord {
    type Error = StoreError;

    fn try_from(row: CategoryRow) -> StoreResult<Self> {
        Ok(Self {
            id: row.id,
            name: row.name,
            visibility: parse_visibility(&row.visibility)?,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ApiTokenRow {
    id: Uuid,
    user_id: Uuid,
    name: String,
    token_hash: String,
    token_hint: String,
    created_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl From<ApiTokenRow> for ApiTokenRecord {
    fn from(row: ApiTokenRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            token_hash: row.token_hash,
            token_hint: row.token_hint,
            created_at: row.created_at,
            deleted_at: row.deleted_at,
        }
    }
}

fn collect<R, T>(rows: Vec<R>) -> StoreResult<Vec<T>>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

const DOCUMENT_COLUMNS: &str = r#"id, project_id, name, type, content, parent_id, "order",
    editable_by_agent, archived, created_at, updated_at"#;

const TEMPLATE_COLUMNS: &str = r#"id, team_id, creator_id, category_id, name, type, visibility,
    content, parent_id, "order", created_at, updated_at"#;

// ── Identity ───────────────────────────────────────────────────────

pub(super) async fn team_ids_for_user(tx: &mut Tx, user_id: Uuid) -> StoreResult<Vec<Uuid>> {
    let ids = sqlx::query_scalar::<_, Uuid>("SELECT team_id FROM team_members WHERE user_id = $1")
        .bind(user_id)
        .fetch_all(&mut **tx)
        .await?;
    Ok(ids)
}

// ── Projects ───────────────────────────────────────────────────────

pub(super) async fn get_project(tx: &mut Tx, project_id: Uuid) -> StoreResult<Option<ProjectRecord>> {
    let row = sqlx::query_as::<_, ProjectRow>(
        "SELECT id, name, description, team_id, created_at FROM projects WHERE id = $1",
    )
    .bind(project_id)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(row.map(ProjectRecord::from))
}

pub(super) async fn list_projects_for_teams(
    tx: &mut Tx,
    team_ids: &[Uuid],
) -> StoreResult<Vec<ProjectRecord>> {
    let rows = sqlx::query_as::<_, ProjectRow>(
        r#"
        SELECT id, name, description, team_id, created_at
        FROM projects
        WHERE team_id = ANY($1)
        ORDER BY created_at DESC, id
        "#,
    )
    .bind(team_ids)
    .fetch_all(&mut **tx)
    .await?;
    Ok(rows.into_iter().map(ProjectRecord::from).collect())
}

pub(super) async fn insert_project(tx: &mut Tx, project: &ProjectRecord) -> StoreResult<()> {
    sqlx::query(
        "INSERT INTO projects (id, name, description, team_id, created_at) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(project.id)
    .bind(&project.name)
    .bind(&project.description)
    .bind(project.team_id)
    .bind(project.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub(super) async fn delete_project(tx: &mut Tx, project_id: Uuid) -> StoreResult<()> {
    let result = sqlx::query("DELETE FROM projects WHERE id = $1")
        .bind(project_id)
        .execute(&mut **tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("project"));
    }
    Ok(())
}

// ── Documents ──────────────────────────────────────────────────────

pub(super) async fn get_document(
    tx: &mut Tx,
    document_id: Uuid,
) -> StoreResult<Option<DocumentRecord>> {
    let row = sqlx::query_as::<_, DocumentRow>(&format!(
        "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = $1"
    ))
    .bind(document_id)
    .fetch_optional(&mut **tx)
    .await?;
    row.map(DocumentRecord::try_from).transpose()
}

pub(super) async fn list_documents(tx: &mut Tx, project_id: Uuid) -> StoreResult<Vec<DocumentRecord>> {
    let rows = sqlx::query_as::<_, DocumentRow>(&format!(
        r#"SELECT {DOCUMENT_COLUMNS} FROM documents WHERE project_id = $1 ORDER BY "order", created_at"#
    ))
    .bind(project_id)
    .fetch_all(&mut **tx)
    .await?;
    collect(rows)
}

pub(super) async fn list_document_children(
    tx: &mut Tx,
    parent_id: Uuid,
) -> StoreResult<Vec<DocumentRecord>> {
    let rows = sqlx::query_as::<_, DocumentRow>(&format!(
        r#"SELECT {DOCUMENT_COLUMNS} FROM documents WHERE parent_id = $1 ORDER BY "order", created_at"#
    ))
    .bind(parent_id)
    .fetch_all(&mut **tx)
    .await?;
    collect(rows)
}

pub(super) async fn insert_documents(tx: &mut Tx, documents: &[DocumentRecord]) -> StoreResult<()> {
    for doc in documents {
        sqlx::query(
            r#"
            INSERT INTO documents (id, project_id, name, type, content, parent_id, "order",
                                   editable_by_agent, archived, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(doc.id)
        .bind(doc.project_id)
        .bind(&doc.name)
        .bind(doc.kind.as_str())
        .bind(&doc.content)
        .bind(doc.parent_id)
        .bind(doc.order)
        .bind(doc.editable_by_agent)
        .bind(doc.archived)
        .bind(doc.created_at)
        .bind(doc.updated_at)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

pub(super) async fn update_document(tx: &mut Tx, doc: &DocumentRecord) -> StoreResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE documents
        SET name = $2, type = $3, content = $4, parent_id = $5, "order" = $6,
            editable_by_agent = $7, archived = $8, updated_at = $9
        WHERE id = $1
        "#,
    )
    .bind(doc.id)
    .bind(&doc.name)
    .bind(doc.kind.as_str())
    .bind(&doc.content)
    .bind(doc.parent_id)
    .bind(doc.order)
    .bind(doc.editable_by_agent)
    .bind(doc.archived)
    .bind(doc.updated_at)
    .execute(&mut **tx)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("document"));
    }
    Ok(())
}

pub(super) async fn delete_document(tx: &mut Tx, document_id: Uuid) -> StoreResult<()> {
    // Descendants go with it through the self-referencing cascade.
    let result = sqlx::query("DELETE FROM documents WHERE id = $1")
        .bind(document_id)
        .execute(&mut **tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("document"));
    }
    Ok(())
}

pub(super) async fn search_documents(
    tx: &mut Tx,
    project_id: Uuid,
    words: &[String],
) -> StoreResult<Vec<DocumentRecord>> {
    let patterns: Vec<String> =
        words.iter().map(|word| format!("%{}%", escape_like(&word.to_lowercase()))).collect();
    let rows = sqlx::query_as::<_, DocumentRow>(&format!(
        r#"
        SELECT {DOCUMENT_COLUMNS}
        FROM documents
        WHERE project_id = $1
          AND (lower(name) LIKE ANY($2) OR lower(content) LIKE ANY($2))
        ORDER BY created_at, id
        "#
    ))
    .bind(project_id)
    .bind(&patterns)
    .fetch_all(&mut **tx)
    .await?;
    collect(rows)
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

// ── Templates ──────────────────────────────────────────────────────

pub(super) async fn get_template(
    tx: &mut Tx,
    template_id: Uuid,
) -> StoreResult<Option<TemplateRecord>> {
    let row = sqlx::query_as::<_, TemplateRow>(&format!(
        "SELECT {TEMPLATE_COLUMNS} FROM templates WHERE id = $1"
    ))
    .bind(template_id)
    .fetch_optional(&mut **tx)
    .await?;
    row.map(TemplateRecord::try_from).transpose()
}

pub(super) async fn list_templates(
    tx: &mut Tx,
    filter: &TemplateFilter,
) -> StoreResult<Vec<TemplateRecord>> {
    let rows = sqlx::query_as::<_, TemplateRow>(&format!(
        r#"
        SELECT {TEMPLATE_COLUMNS}
        FROM templates
        WHERE ($1::uuid IS NULL OR category_id = $1)
          AND (NOT $2 OR parent_id IS NULL)
        ORDER BY "order", created_at
        "#
    ))
    .bind(filter.category_id)
    .bind(filter.only_root)
    .fetch_all(&mut **tx)
    .await?;
    collect(rows)
}

pub(super) async fn list_template_children(
    tx: &mut Tx,
    parent_id: Uuid,
) -> StoreResult<Vec<TemplateRecord>> {
    let rows = sqlx::query_as::<_, TemplateRow>(&format!(
        r#"SELECT {TEMPLATE_COLUMNS} FROM templates WHERE parent_id = $1 ORDER BY "order", created_at"#
    ))
    .bind(parent_id)
    .fetch_all(&mut **tx)
    .await?;
    collect(rows)
}

pub(super) async fn insert_templates(tx: &mut Tx, templates: &[TemplateRecord]) -> StoreResult<()> {
    for template in templates {
        sqlx::query(
            r#"
            INSERT INTO templates (id, team_id, creator_id, category_id, name, type, visibility,
                                   content, parent_id, "order", created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(template.id)
        .bind(template.team_id)
        .bind(template.creator_id)
        .bind(template.category_id)
        .bind(&template.name)
        .bind(template.kind.as_str())
        .bind(template.visibility.as_str())
        .bind(&template.content)
        .bind(template.parent_id)
        .bind(template.order)
        .bind(template.created_at)
        .bind(template.updated_at)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

pub(super) async fn update_template(tx: &mut Tx, template: &TemplateRecord) -> StoreResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE templates
        SET category_id = $2, name = $3, type = $4, visibility = $5, content = $6,
            parent_id = $7, "order" = $8, updated_at = $9
        WHERE id = $1
        "#,
    )
    .bind(template.id)
    .bind(template.category_id)
    .bind(&template.name)
    .bind(template.kind.as_str())
    .bind(template.visibility.as_str())
    .bind(&template.content)
    .bind(template.parent_id)
    .bind(template.order)
    .bind(template.updated_at)
    .execute(&mut **tx)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("template"));
    }
    Ok(())
}

pub(super) async fn delete_template(tx: &mut Tx, template_id: Uuid) -> StoreResult<()> {
    let result = sqlx::query("DELETE FROM templates WHERE id = $1")
        .bind(template_id)
        .execute(&mut **tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("template"));
    }
    Ok(())
}

// ── Categories ─────────────────────────────────────────────────────

pub(super) async fn get_category(
    tx: &mut Tx,
    category_id: Uuid,
) -> StoreResult<Option<CategoryRecord>> {
    let row = sqlx::query_as::<_, CategoryRow>(
        "SELECT id, name, visibility, created_at FROM categories WHERE id = $1",
    )
    .bind(category_id)
    .fetch_optional(&mut **tx)
    .await?;
    row.map(CategoryRecord::try_from).transpose()
}

pub(super) async fn category_by_name(tx: &mut Tx, name: &str) -> StoreResult<Option<CategoryRecord>> {
    let row = sqlx::query_as::<_, CategoryRow>(
        "SELECT id, name, visibility, created_at FROM categories WHERE name = $1",
    )
    .bind(name)
    .fetch_optional(&mut **tx)
    .await?;
    row.map(CategoryRecord::try_from).transpose()
}

pub(super) async fn get_or_create_category(tx: &mut Tx, name: &str) -> StoreResult<CategoryRecord> {
    // The no-op update makes RETURNING yield the existing row on conflict.
    let row = sqlx::query_as::<_, CategoryRow>(
        r#"
        INSERT INTO categories (id, name, visibility, created_at)
        VALUES ($1, $2, 'PUBLIC', $3)
        ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
        RETURNING id, name, visibility, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(Utc::now())
    .fetch_one(&mut **tx)
    .await?;
    CategoryRecord::try_from(row)
}

pub(super) async fn list_categories(tx: &mut Tx) -> StoreResult<Vec<CategoryRecord>> {
    let rows = sqlx::query_as::<_, CategoryRow>(
        "SELECT id, name, visibility, created_at FROM categories ORDER BY name",
    )
    .fetch_all(&mut **tx)
    .await?;
    collect(rows)
}

// ── API tokens ─────────────────────────────────────────────────────

const API_TOKEN_COLUMNS: &str = "id, user_id, name, token_hash, token_hint, created_at, deleted_at";

pub(super) async fn insert_api_token(tx: &mut Tx, token: &ApiTokenRecord) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO api_tokens (id, user_id, name, token_hash, token_hint, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(token.id)
    .bind(token.user_id)
    .bind(&token.name)
    .bind(&token.token_hash)
    .bind(&token.token_hint)
    .bind(token.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub(super) async fn list_api_tokens(tx: &mut Tx, user_id: Uuid) -> StoreResult<Vec<ApiTokenRecord>> {
    let rows = sqlx::query_as::<_, ApiTokenRow>(&format!(
        r#"
        SELECT {API_TOKEN_COLUMNS}
        FROM api_tokens
        WHERE user_id = $1 AND deleted_at IS NULL
        ORDER BY created_at DESC
        "#
    ))
    .bind(user_id)
    .fetch_all(&mut **tx)
    .await?;
    Ok(rows.into_iter().map(ApiTokenRecord::from).collect())
}

pub(super) async fn get_api_token(
    tx: &mut Tx,
    token_id: Uuid,
) -> StoreResult<Option<ApiTokenRecord>> {
    let row = sqlx::query_as::<_, ApiTokenRow>(&format!(
        "SELECT {API_TOKEN_COLUMNS} FROM api_tokens WHERE id = $1 AND deleted_at IS NULL"
    ))
    .bind(token_id)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(row.map(ApiTokenRecord::from))
}

pub(super) async fn find_api_token_by_hash(
    tx: &mut Tx,
    token_hash: &str,
) -> StoreResult<Option<ApiTokenRecord>> {
    let row = sqlx::query_as::<_, ApiTokenRow>(&format!(
        "SELECT {API_TOKEN_COLUMNS} FROM api_tokens WHERE token_hash = $1"
    ))
    .bind(token_hash)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(row.map(ApiTokenRecord::from))
}

pub(super) async fn revoke_api_token(tx: &mut Tx, token_id: Uuid) -> StoreResult<()> {
    let result = sqlx::query(
        "UPDATE api_tokens SET deleted_at = $2 WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(token_id)
    .bind(Utc::now())
    .execute(&mut **tx)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("api token"));
    }
    Ok(())
}
