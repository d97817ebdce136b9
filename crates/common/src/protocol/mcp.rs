// Agent tool protocol: method names, tool catalog and result content blocks.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "teamdocs-mcp";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

// ── Methods ────────────────────────────────────────────────────────
pub const INITIALIZE: &str = "initialize";
pub const INITIALIZED_NOTIFICATION: &str = "notifications/initialized";
pub const PING: &str = "ping";
pub const TOOLS_LIST: &str = "tools/list";
pub const TOOLS_CALL: &str = "tools/call";

pub const IMPLEMENTED_METHODS: &[&str] =
    &[INITIALIZE, INITIALIZED_NOTIFICATION, PING, TOOLS_LIST, TOOLS_CALL];

// ── Tools ──────────────────────────────────────────────────────────
pub const LIST_DOCUMENTS: &str = "list_documents";
pub const SEARCH_DOCUMENTS: &str = "search_documents";
pub const GET_DOCUMENT: &str = "get_document";
pub const EDIT_DOCUMENT: &str = "edit_document";
pub const CREATE_DOCUMENT: &str = "create_document";

pub const TOOL_NAMES: &[&str] =
    &[LIST_DOCUMENTS, SEARCH_DOCUMENTS, GET_DOCUMENT, EDIT_DOCUMENT, CREATE_DOCUMENT];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

fn string_property(description: &str) -> Value {
    json!({ "type": "string", "description": description })
}

fn object_schema(properties: Value, required: &[&str]) -> Value {
    json!({ "type": "object", "properties": properties, "required": required })
}

/// The fixed tool catalog advertised by `tools/list`.
pub fn tool_catalog() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: LIST_DOCUMENTS.into(),
            description: "Returns list of all project documents with their hierarchical structure \
                          (id, name, editable_by_agent, descendants)"
                .into(),
            input_schema: object_schema(json!({}), &[]),
        },
        ToolDescriptor {
            name: SEARCH_DOCUMENTS.into(),
            description: "Search for documents by name or content. Returns matching documents \
                          with their IDs, names, and types."
                .into(),
            input_schema: object_schema(
                json!({
                    "query": string_property(
                        "Search query to match against document names and content"
                    ),
                }),
                &["query"],
            ),
        },
        ToolDescriptor {
            name: GET_DOCUMENT.into(),
            description: "Returns full content of a specific document by ID, preceded by its \
                          ancestors. Embedded images are returned as separate image blocks and \
                          referenced in the text as [image:N]."
                .into(),
            input_schema: object_schema(
                json!({ "id": string_property("ID of the document") }),
                &["id"],
            ),
        },
        ToolDescriptor {
            name: EDIT_DOCUMENT.into(),
            description: "Edit an existing document's content. Only documents with \
                          editable_by_agent=true can be edited. Keep [image:N] placeholders \
                          to preserve embedded images."
                .into(),
            input_schema: object_schema(
                json!({
                    "document_id": string_property("ID of the document to edit"),
                    "content": string_property(
                        "New content for the document (will be stored based on document type)"
                    ),
                }),
                &["document_id", "content"],
            ),
        },
        ToolDescriptor {
            name: CREATE_DOCUMENT.into(),
            description: "Create a new document in the project".into(),
            input_schema: object_schema(
                json!({
                    "title": string_property("Title/name of the document"),
                    "type": {
                        "type": "string",
                        "description": "Document type (markdown or whiteboard)",
                        "enum": ["markdown", "whiteboard"],
                    },
                    "content": string_property(
                        "Content of the document. Content of markdown documents should be plain \
                         markdown. Content of whiteboards should be JSON in Excalidraw format."
                    ),
                }),
                &["title", "type", "content"],
            ),
        },
    ]
}

pub fn initialize_result() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": { "tools": {} },
        "serverInfo": { "name": SERVER_NAME, "version": SERVER_VERSION },
    })
}

/// One block of a tool result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self::Image { data: data.into(), mime_type: mime_type.into() }
    }

    /// A text block holding pretty-printed JSON.
    pub fn json(value: &Value) -> Self {
        Self::text(pretty_json(value))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ToolResult {
    pub content: Vec<ContentBlock>,
}

impl ToolResult {
    pub fn json(value: &Value) -> Self {
        Self { content: vec![ContentBlock::json(value)] }
    }
}

pub fn pretty_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
