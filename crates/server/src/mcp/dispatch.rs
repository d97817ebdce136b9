// JSON-RPC method dispatch and the document tools exposed to agents.
//
// Every tool failure becomes a JSON-RPC error object. Only an unknown method
// escapes as `UnknownMethod`, which the endpoint turns into an HTTP 400.

use std::collections::HashMap;

use chrono::Utc;
use serde_json::{json, Map, Value};
use teamdocs_common::{
    content::{value_from_stored_text, NodeContent},
    protocol::{
        jsonrpc::{Request, Response, RpcError},
        mcp::{self, pretty_json, tool_catalog, ContentBlock, ToolResult},
    },
    tree::{self, ForestEntry},
    types::NodeKind,
};
use thiserror::Error;
use uuid::Uuid;

use crate::store::{DocumentRecord, StoreError, UnitOfWork};

#[derive(Debug, Error)]
#[error("Unknown method: {0}")]
pub struct UnknownMethod(pub String);

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Missing required argument: {0}")]
    MissingArgument(&'static str),
    #[error("Invalid document ID format")]
    InvalidDocumentId,
    #[error("Document not found")]
    DocumentNotFound,
    #[error("This document is not editable by agents. Set editable_by_agent=true first.")]
    NotEditable,
    #[error("Whiteboard content must be valid JSON")]
    InvalidWhiteboard,
    #[error("Invalid document type. Must be 'markdown' or 'whiteboard'")]
    InvalidType,
    #[error("failed to encode tool result: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ToolError {
    fn to_rpc_error(&self) -> RpcError {
        match self {
            Self::MissingArgument(_) => RpcError::invalid_params(self.to_string()),
            Self::Store(_) | Self::Encode(_) => RpcError::internal("Internal error"),
            _ => RpcError::internal(self.to_string()),
        }
    }
}

/// Answer one request inside `uow`. Only a successful `tools/call` commits.
pub async fn handle(
    mut uow: UnitOfWork,
    project_id: Uuid,
    request: Request,
) -> Result<Response, UnknownMethod> {
    let Request { method, params, id, .. } = request;
    tracing::debug!(method = %method, project_id = %project_id, "agent request");

    let reply = match method.as_str() {
        mcp::INITIALIZE => Response::success(id, mcp::initialize_result()),
        mcp::INITIALIZED_NOTIFICATION | mcp::PING => Response::success(id, json!({})),
        mcp::TOOLS_LIST => Response::success(id, json!({ "tools": tool_catalog() })),
        mcp::TOOLS_CALL => {
            let params = params.unwrap_or(Value::Null);
            let Some(name) = params.get("name").and_then(Value::as_str) else {
                return Ok(Response::error(id, RpcError::invalid_params("Missing tool name")));
            };
            let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

            let outcome = async {
                let result = encode_result(call_tool(&mut uow, project_id, name, &arguments).await?)?;
                uow.commit().await?;
                Ok::<_, ToolError>(result)
            }
            .await;
            match outcome {
                Ok(result) => {
                    tracing::info!(tool = %name, project_id = %project_id, "tool call completed");
                    Response::success(id, result)
                }
                Err(error) => {
                    if matches!(error, ToolError::Store(_) | ToolError::Encode(_)) {
                        tracing::error!(error = ?error, tool = %name, "tool call failed");
                    } else {
                        tracing::info!(tool = %name, error = %error, "tool call rejected");
                    }
                    Response::error(id, error.to_rpc_error())
                }
            }
        }
        _ => return Err(UnknownMethod(method)),
    };

    Ok(reply)
}

/// Encoded before commit so a result that cannot be sent rolls its writes back.
fn encode_result<T: serde::Serialize>(result: T) -> Result<Value, ToolError> {
    Ok(serde_json::to_value(result)?)
}

async fn call_tool(
    uow: &mut UnitOfWork,
    project_id: Uuid,
    name: &str,
    arguments: &Value,
) -> Result<ToolResult, ToolError> {
    match name {
        mcp::LIST_DOCUMENTS => list_documents(uow, project_id).await,
        mcp::SEARCH_DOCUMENTS => {
            search_documents(uow, project_id, string_arg(arguments, "query")?).await
        }
        mcp::GET_DOCUMENT => get_document(uow, project_id, string_arg(arguments, "id")?).await,
        mcp::EDIT_DOCUMENT => {
            let document_id = string_arg(arguments, "document_id")?;
            let content = string_arg(arguments, "content")?;
            edit_document(uow, project_id, document_id, content).await
        }
        mcp::CREATE_DOCUMENT => {
            let title = string_arg(arguments, "title")?;
            let kind = string_arg(arguments, "type")?;
            let content = string_arg(arguments, "content")?;
            create_document(uow, project_id, title, kind, content).await
        }
        other => Err(ToolError::UnknownTool(other.to_string())),
    }
}

fn string_arg<'a>(arguments: &'a Value, key: &'static str) -> Result<&'a str, ToolError> {
    arguments.get(key).and_then(Value::as_str).ok_or(ToolError::MissingArgument(key))
}

// ── Tools ──────────────────────────────────────────────────────────

async fn list_documents(uow: &mut UnitOfWork, project_id: Uuid) -> Result<ToolResult, ToolError> {
    let documents = uow.list_documents(project_id).await?;
    let forest: Vec<Value> = tree::build_forest(documents).iter().map(forest_entry_json).collect();

    Ok(ToolResult::json(&json!({ "documents": forest })))
}

fn forest_entry_json(entry: &ForestEntry<DocumentRecord>) -> Value {
    let mut object = Map::new();
    object.insert("id".into(), json!(entry.node.id));
    object.insert("name".into(), json!(entry.node.name));
    object.insert("editable_by_agent".into(), json!(entry.node.editable_by_agent));
    if !entry.children.is_empty() {
        let descendants = entry.children.iter().map(forest_entry_json).collect();
        object.insert("descendants".into(), Value::Array(descendants));
    }
    Value::Object(object)
}

async fn search_documents(
    uow: &mut UnitOfWork,
    project_id: Uuid,
    query: &str,
) -> Result<ToolResult, ToolError> {
    let words: Vec<String> = query.split_whitespace().map(str::to_string).collect();
    let results: Vec<Value> = uow
        .search_documents(project_id, &words)
        .await?
        .into_iter()
        .map(|doc| json!({ "id": doc.id, "name": doc.name, "type": doc.kind }))
        .collect();

    Ok(ToolResult::json(&json!({ "query": query, "results": results })))
}

async fn get_document(
    uow: &mut UnitOfWork,
    project_id: Uuid,
    raw_id: &str,
) -> Result<ToolResult, ToolError> {
    let target = load_document(uow, project_id, raw_id).await?;

    let documents = uow.list_documents(project_id).await?;
    let chain = tree::ancestor_chain(&tree::parent_map(&documents), target.id);
    let mut by_id: HashMap<Uuid, DocumentRecord> =
        documents.into_iter().map(|doc| (doc.id, doc)).collect();

    let mut blocks = Vec::new();
    for (position, id) in chain.iter().enumerate() {
        let Some(mut document) = by_id.remove(id) else {
            continue;
        };
        if position > 0 {
            blocks.push(ContentBlock::text("---"));
        }
        blocks.push(ContentBlock::text(format!("Title: {}", document.name)));
        if let Some(migrated) = render_document(&document, &mut blocks) {
            document.content = migrated;
            uow.update_document(&document).await?;
        }
    }

    Ok(ToolResult { content: blocks })
}

/// Append the content blocks of one document. Returns new stored content when
/// reading lifted embedded images out of the markdown.
fn render_document(document: &DocumentRecord, blocks: &mut Vec<ContentBlock>) -> Option<String> {
    match NodeContent::from_stored(document.kind, &document.content) {
        NodeContent::Markdown(mut markdown) => {
            if let Some(view) = markdown.agent_view() {
                blocks.push(ContentBlock::text(view.text));
                for image in &view.images {
                    blocks.push(ContentBlock::image(image.data.clone(), image.media_type()));
                }
                return view.changed.then(|| NodeContent::Markdown(markdown).to_stored());
            }
            match markdown.text {
                Some(text) => blocks.push(ContentBlock::text(text)),
                None => blocks.push(ContentBlock::json(&value_from_stored_text(&document.content))),
            }
            None
        }
        NodeContent::Whiteboard(board) => {
            if let Some(image) = &board.image {
                let data = image.rsplit(',').next().unwrap_or(image.as_str());
                blocks.push(ContentBlock::image(data, "image/png"));
            }
            match &board.raw {
                Some(raw) => blocks.push(ContentBlock::json(raw)),
                None => blocks.push(ContentBlock::text(format!(
                    "Excalidraw whiteboard content:\n{}",
                    pretty_json(&value_from_stored_text(&document.content))
                ))),
            }
            None
        }
    }
}

async fn edit_document(
    uow: &mut UnitOfWork,
    project_id: Uuid,
    raw_id: &str,
    text: &str,
) -> Result<ToolResult, ToolError> {
    let mut document = load_document(uow, project_id, raw_id).await?;
    if !document.editable_by_agent {
        return Err(ToolError::NotEditable);
    }

    let previous = NodeContent::from_stored(document.kind, &document.content);
    let content = NodeContent::from_agent_text(document.kind, text, Some(&previous))
        .map_err(|_| ToolError::InvalidWhiteboard)?;
    document.content = content.to_stored();
    document.updated_at = Utc::now();
    uow.update_document(&document).await?;

    Ok(ToolResult::json(&json!({
        "success": true,
        "document_id": document.id,
        "message": "Document updated successfully",
    })))
}

async fn create_document(
    uow: &mut UnitOfWork,
    project_id: Uuid,
    title: &str,
    kind: &str,
    text: &str,
) -> Result<ToolResult, ToolError> {
    let kind: NodeKind = kind.parse().map_err(|_| ToolError::InvalidType)?;
    let content =
        NodeContent::from_agent_text(kind, text, None).map_err(|_| ToolError::InvalidWhiteboard)?;

    let now = Utc::now();
    let document = DocumentRecord {
        id: Uuid::new_v4(),
        project_id,
        name: title.to_string(),
        kind,
        content: content.to_stored(),
        parent_id: None,
        order: 0,
        editable_by_agent: true,
        archived: None,
        created_at: now,
        updated_at: now,
    };
    uow.insert_documents(std::slice::from_ref(&document)).await?;

    Ok(ToolResult::json(&json!({
        "success": true,
        "document_id": document.id,
        "message": "Document created successfully",
    })))
}

async fn load_document(
    uow: &mut UnitOfWork,
    project_id: Uuid,
    raw_id: &str,
) -> Result<DocumentRecord, ToolError> {
    let document_id = Uuid::parse_str(raw_id.trim()).map_err(|_| ToolError::InvalidDocumentId)?;
    uow.get_document(document_id)
        .await?
        .filter(|document| document.project_id == project_id)
        .ok_or(ToolError::DocumentNotFound)
}
