use serde::{Deserialize, Serialize};

/// Content blocks a tool result can carry. The weather tools only ever emit
/// text; other block types are rejected on decode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    Text(TextContent),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextContent {
    pub text: String,
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text(TextContent { text: text.into() })
    }

    /// The text of this block.
    pub fn as_text(&self) -> &str {
        match self {
            Content::Text(t) => &t.text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_content_is_tagged() {
        let json = serde_json::to_value(Content::text("晴")).unwrap();
        assert_eq!(json, serde_json::json!({"type": "text", "text": "晴"}));
    }
}
