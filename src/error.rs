use serde_json::Value;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    // Builder preconditions
    #[error("Missing object type")]
    MissingObjectType,
    #[error("Objects must be of the same type")]
    TypeMismatch,
    #[error("List must not be empty")]
    EmptyList,
    #[error("id cannot be empty")]
    EmptyId,
    #[error("Cannot perform delete")]
    CannotDelete,
    #[error("expected a JSON object, got {0}")]
    InvalidArgument(String),

    // Registration
    #[error("unknown parent definition '{parent}' for '{name}'")]
    UnknownParent { name: String, parent: String },
    #[error("'{name}' and '{existing}' both register wire tag '{tag}' without a discriminator")]
    DuplicateBaseKind {
        name: String,
        existing: String,
        tag: String,
    },
    #[error("unknown entity kind: {0}")]
    UnknownKind(String),

    // Object cache
    #[error("id {0} is already cached")]
    AlreadyCached(String),
    #[error("id {0} is not cached")]
    NotCached(String),

    /// Classified error returned by the remote API
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Failure below the HTTP status level (connect, timeout, decode)
    #[error(transparent)]
    Transport(#[from] anyhow::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl ClientError {
    pub fn api(&self) -> Option<&ApiError> {
        match self {
            ClientError::Api(err) => Some(err),
            _ => None,
        }
    }
}

/// An error response classified against the registered error kinds.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {description}")]
pub struct ApiError {
    /// Name of the selected error kind (e.g. "InvalidAttributes")
    pub kind: String,
    /// The selected kind followed by its registered ancestors
    pub lineage: Vec<String>,
    /// HTTP status of the response, when there was one
    pub status: Option<u16>,
    pub description: String,
    /// Raw error payload for diagnostics
    pub data: Option<Value>,
    pub details: Option<Value>,
}

impl ApiError {
    pub fn new(
        kind: impl Into<String>,
        lineage: Vec<String>,
        status: Option<u16>,
        description: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        let details = data
            .as_ref()
            .and_then(|d| d.get("details"))
            .filter(|d| !d.is_null())
            .cloned();

        Self {
            kind: kind.into(),
            lineage,
            status,
            description: description.into(),
            data,
            details,
        }
    }

    /// True when this error is of kind `name` or one of its descendants.
    pub fn is(&self, name: &str) -> bool {
        self.kind == name || self.lineage.iter().any(|k| k == name)
    }

    /// Description followed by the pretty-printed payload
    pub fn full_message(&self) -> String {
        match &self.data {
            Some(data) => format!(
                "{}\n\n{}",
                self.description,
                serde_json::to_string_pretty(data).unwrap_or_default()
            ),
            None => self.description.clone(),
        }
    }
}
