use serde::{Deserialize, Serialize};

/// One renderable block of a tool result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text { text: String },
}

/// Uniform tool result. `is_error = true` is still a delivered response:
/// the payload describes a backend failure, it is never raised as a protocol fault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEnvelope {
    pub content: Vec<ContentBlock>,
    pub is_error: bool,
}

impl ResultEnvelope {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::Text { text: text.into() }],
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::Text { text: text.into() }],
            is_error: true,
        }
    }

    /// Text of the first block, if any.
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_with_mcp_field_names() {
        let envelope = ResultEnvelope::error("Error creating event: quota exceeded");
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({
                "content": [{ "type": "text", "text": "Error creating event: quota exceeded" }],
                "isError": true
            })
        );
    }

    #[test]
    fn first_text_reads_the_leading_block() {
        let envelope = ResultEnvelope::text("Task created: Buy milk");
        assert!(!envelope.is_error);
        assert_eq!(envelope.first_text(), Some("Task created: Buy milk"));
    }
}
