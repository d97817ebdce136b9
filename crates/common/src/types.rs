// Core domain types shared between the server and its tests.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Content type of a tree node. Drives how `content` is interpreted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Markdown,
    Whiteboard,
}

impl NodeKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Markdown => "markdown",
            Self::Whiteboard => "whiteboard",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown value `{}`", self.0)
    }
}

impl std::error::Error for UnknownVariant {}

impl FromStr for NodeKind {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "markdown" => Ok(Self::Markdown),
            "whiteboard" => Ok(Self::Whiteboard),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Access tier for templates and categories.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Visibility {
    Private,
    #[default]
    Team,
    Public,
}

impl Visibility {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Private => "PRIVATE",
            Self::Team => "TEAM",
            Self::Public => "PUBLIC",
        }
    }
}

impl FromStr for Visibility {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "PRIVATE" => Ok(Self::Private),
            "TEAM" => Ok(Self::Team),
            "PUBLIC" => Ok(Self::Public),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// A project groups a team's documents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub team_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// A node in a project's document tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub content: Value,
    pub parent_id: Option<Uuid>,
    pub order: i32,
    pub editable_by_agent: bool,
    /// Explicit archive flag; `None` inherits from the nearest ancestor.
    pub archived: Option<bool>,
    /// Archive state after inheritance is resolved.
    pub effective_archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A node in a team's template library.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Template {
    pub id: Uuid,
    pub team_id: Uuid,
    pub creator_id: Uuid,
    pub category_id: Uuid,
    pub category_name: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub visibility: Visibility,
    /// Omitted from list responses unless explicitly requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    pub parent_id: Option<Uuid>,
    pub order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub visibility: Visibility,
    pub created_at: DateTime<Utc>,
}

/// Agent API token metadata. The plaintext is only present on creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiTokenInfo {
    pub id: Uuid,
    pub name: String,
    pub token_hint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub created_at: DateTime<Utc>,
}
