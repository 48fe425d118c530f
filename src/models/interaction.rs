use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum InteractionType {
    Like,
    Save,
    Share,
    Comment,
}

impl InteractionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionType::Like => "like",
            InteractionType::Save => "save",
            InteractionType::Share => "share",
            InteractionType::Comment => "comment",
        }
    }
}

/// A discrete reader action on a content unit. Not part of impression state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InteractionEvent {
    pub content_id: String,
    #[serde(rename = "type")]
    pub kind: InteractionType,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl InteractionEvent {
    pub fn new(content_id: impl Into<String>, kind: InteractionType) -> Self {
        Self {
            content_id: content_id.into(),
            kind,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Caller metadata merged with the session id and the event source.
    /// Non-object metadata is kept under `value`.
    pub fn enriched_metadata(&self, session_id: Option<&str>, source: &str) -> Value {
        let mut merged = match &self.metadata {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::Null) | None => Map::new(),
            Some(other) => {
                let mut map = Map::new();
                map.insert("value".to_string(), other.clone());
                map
            }
        };

        merged.insert(
            "sessionId".to_string(),
            session_id.map_or(Value::Null, |id| Value::String(id.to_string())),
        );
        merged.insert("source".to_string(), Value::String(source.to_string()));
        Value::Object(merged)
    }
}
