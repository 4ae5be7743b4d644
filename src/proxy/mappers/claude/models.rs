// Anthropic protocol data models.

use serde::{Deserialize, Serialize};

/// Anthropic `/v1/messages` request.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClaudeRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemPrompt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<serde_json::Value>,
    #[serde(default)]
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkingConfig {
    #[serde(rename = "type")]
    pub type_: String, // "enabled"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    String(String),
    Array(Vec<SystemBlock>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    String(String),
    Array(Vec<ContentBlock>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "thinking")]
    Thinking {
        thinking: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },

    #[serde(rename = "image")]
    Image {
        source: ImageSource,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_control: Option<serde_json::Value>,
    },

    #[serde(rename = "document")]
    Document {
        source: DocumentSource,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_control: Option<serde_json::Value>,
    },

    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        // String or array-of-blocks, depending on the client.
        content: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSource {
    #[serde(rename = "type")]
    pub source_type: String, // "base64"
    pub media_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSource {
    #[serde(rename = "type")]
    pub source_type: String, // "base64"
    pub media_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_string_content_deserialize() {
        let msg: Message =
            serde_json::from_str(r#"{"role":"user","content":"hi"}"#).unwrap();
        assert!(matches!(msg.content, MessageContent::String(ref s) if s == "hi"));
    }

    #[test]
    fn test_block_content_deserialize() {
        let msg: Message = serde_json::from_str(
            r#"{"role":"user","content":[{"type":"text","text":"hi"},{"type":"tool_result","tool_use_id":"t1","content":"done"}]}"#,
        )
        .unwrap();
        match msg.content {
            MessageContent::Array(blocks) => {
                assert_eq!(blocks.len(), 2);
                assert!(matches!(blocks[1], ContentBlock::ToolResult { .. }));
            }
            _ => panic!("expected array content"),
        }
    }

    #[test]
    fn test_stream_defaults_false() {
        let req: ClaudeRequest = serde_json::from_str(
            r#"{"model":"claude-sonnet-4-5","messages":[{"role":"user","content":"x"}]}"#,
        )
        .unwrap();
        assert!(!req.stream);
    }

    #[test]
    fn test_system_prompt_both_forms() {
        let s: SystemPrompt = serde_json::from_str(r#""plain""#).unwrap();
        assert!(matches!(s, SystemPrompt::String(_)));
        let s: SystemPrompt =
            serde_json::from_str(r#"[{"type":"text","text":"block"}]"#).unwrap();
        assert!(matches!(s, SystemPrompt::Array(_)));
    }

    proptest! {
        #[test]
        fn prop_text_block_roundtrip(text in "[a-zA-Z0-9 ]{0,100}") {
            let block = ContentBlock::Text { text: text.clone() };
            let json = serde_json::to_string(&block).unwrap();
            let back: ContentBlock = serde_json::from_str(&json).unwrap();
            match back {
                ContentBlock::Text { text: t } => prop_assert_eq!(t, text),
                _ => prop_assert!(false, "wrong variant"),
            }
        }

        #[test]
        fn prop_tool_use_roundtrip(
            name in "[a-zA-Z][a-zA-Z0-9_]{0,20}",
            key in "[a-zA-Z]{1,10}",
            val in "[a-zA-Z0-9]{0,20}",
        ) {
            let block = ContentBlock::ToolUse {
                id: "toolu_abc".into(),
                name: name.clone(),
                input: serde_json::json!({key.clone(): val.clone()}),
            };
            let json = serde_json::to_string(&block).unwrap();
            let back: ContentBlock = serde_json::from_str(&json).unwrap();
            match back {
                ContentBlock::ToolUse { name: n, input, .. } => {
                    prop_assert_eq!(n, name);
                    prop_assert_eq!(input[&key].as_str().unwrap(), val.as_str());
                }
                _ => prop_assert!(false, "wrong variant"),
            }
        }

        #[test]
        fn prop_tool_result_roundtrip(
            tool_use_id in "[a-zA-Z0-9_]{1,30}",
            content in "[a-zA-Z0-9 ]{0,50}",
        ) {
            let block = ContentBlock::ToolResult {
                tool_use_id: tool_use_id.clone(),
                content: serde_json::Value::String(content.clone()),
                is_error: Some(false),
            };
            let json = serde_json::to_string(&block).unwrap();
            let back: ContentBlock = serde_json::from_str(&json).unwrap();
            match back {
                ContentBlock::ToolResult { tool_use_id: tid, content: c, is_error } => {
                    prop_assert_eq!(tid, tool_use_id);
                    prop_assert_eq!(c.as_str().unwrap(), content.as_str());
                    prop_assert_eq!(is_error, Some(false));
                }
                _ => prop_assert!(false, "wrong variant"),
            }
        }
    }
}
