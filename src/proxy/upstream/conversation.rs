// Anthropic request → Kiro conversationState translation.
//
// Kiro's history must alternate userInputMessage / assistantResponseMessage
// strictly, with exactly one currentMessage. The translator is pure: given
// the same request and conversation id it produces byte-identical output.

use serde_json::{json, Map, Value};
use std::collections::HashSet;
use thiserror::Error;

use crate::auth::types::AuthMethod;
use crate::proxy::mappers::claude::models::{
    ClaudeRequest, ContentBlock, Message, MessageContent, SystemPrompt, Tool,
};
use crate::proxy::upstream::adapter::sanitize_tool_description;

/// Trailing assistant stub left behind by interrupted generations.
const DANGLING_STUB: &str = "{";

#[derive(Error, Debug)]
pub enum TranslateError {
    #[error("messages must not be empty")]
    EmptyMessages,
}

/// One merged conversational turn, decomposed into the pieces Kiro's wire
/// format carries separately.
#[derive(Debug, Default, Clone)]
struct Turn {
    role: String,
    text: String,
    images: Vec<Value>,
    tool_uses: Vec<Value>,
    tool_results: Vec<Value>,
}

impl Turn {
    fn synthetic(role: &str, text: &str) -> Self {
        Self {
            role: role.into(),
            text: text.into(),
            ..Default::default()
        }
    }

    fn is_stub(&self) -> bool {
        self.role == "assistant"
            && self.text == DANGLING_STUB
            && self.tool_uses.is_empty()
    }

    fn merge(&mut self, other: Turn) {
        if !other.text.is_empty() {
            if !self.text.is_empty() {
                self.text.push('\n');
            }
            self.text.push_str(&other.text);
        }
        self.images.extend(other.images);
        self.tool_uses.extend(other.tool_uses);
        self.tool_results.extend(other.tool_results);
    }
}

fn extract_text(content: &MessageContent) -> String {
    match content {
        MessageContent::String(s) => s.clone(),
        MessageContent::Array(blocks) => {
            let mut parts = Vec::new();
            for block in blocks {
                match block {
                    ContentBlock::Text { text } => parts.push(text.clone()),
                    ContentBlock::Thinking { thinking, .. } => {
                        if !thinking.is_empty() {
                            parts.push(thinking.clone());
                        }
                    }
                    _ => {}
                }
            }
            parts.join("\n")
        }
    }
}

/// Kiro image attachment: `{"format": "<suffix>", "source": {"bytes": "<b64>"}}`.
fn extract_images(content: &MessageContent) -> Vec<Value> {
    let mut images = Vec::new();
    if let MessageContent::Array(blocks) = content {
        for block in blocks {
            if let ContentBlock::Image { source, .. } = block {
                let mut data = source.data.clone();
                let mut media_type = source.media_type.clone();
                // Tolerate clients that leave the data-URL wrapper in place.
                if data.starts_with("data:") {
                    if let Some(comma) = data.find(',') {
                        let header = &data[..comma];
                        if let Some(mime) = header
                            .strip_prefix("data:")
                            .and_then(|h| h.split(';').next())
                        {
                            if !mime.is_empty() {
                                media_type = mime.to_string();
                            }
                        }
                        data = data[comma + 1..].to_string();
                    }
                }
                let format = media_type
                    .split('/')
                    .next_back()
                    .unwrap_or(&media_type)
                    .to_string();
                images.push(json!({
                    "format": format,
                    "source": { "bytes": data }
                }));
            }
        }
    }
    images
}

fn extract_tool_uses(content: &MessageContent) -> Vec<Value> {
    let mut uses = Vec::new();
    if let MessageContent::Array(blocks) = content {
        for block in blocks {
            if let ContentBlock::ToolUse { id, name, input } = block {
                uses.push(json!({
                    "toolUseId": id,
                    "name": name,
                    "input": input
                }));
            }
        }
    }
    uses
}

/// Tool results keyed by toolUseId; the first occurrence across the whole
/// request wins, later duplicates are dropped.
fn extract_tool_results(content: &MessageContent, seen: &mut HashSet<String>) -> Vec<Value> {
    let mut results = Vec::new();
    if let MessageContent::Array(blocks) = content {
        for block in blocks {
            if let ContentBlock::ToolResult {
                tool_use_id,
                content: result_content,
                is_error,
            } = block
            {
                if !seen.insert(tool_use_id.clone()) {
                    continue;
                }
                let text = match result_content {
                    Value::String(s) => s.clone(),
                    Value::Array(arr) => arr
                        .iter()
                        .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
                        .collect::<Vec<_>>()
                        .join("\n"),
                    other => other.to_string(),
                };
                let status = if is_error.unwrap_or(false) {
                    "error"
                } else {
                    "success"
                };
                results.push(json!({
                    "content": [{"text": text}],
                    "status": status,
                    "toolUseId": tool_use_id
                }));
            }
        }
    }
    results
}

fn system_text(request: &ClaudeRequest) -> Option<String> {
    request.system.as_ref().map(|sp| match sp {
        SystemPrompt::String(s) => s.clone(),
        SystemPrompt::Array(blocks) => blocks
            .iter()
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n"),
    })
}

/// Walk messages in order, merging adjacent same-role entries.
fn merge_turns(messages: &[Message]) -> Vec<Turn> {
    let mut merged: Vec<Turn> = Vec::new();
    let mut seen_tool_results = HashSet::new();

    for msg in messages {
        let turn = Turn {
            role: msg.role.clone(),
            text: extract_text(&msg.content),
            images: extract_images(&msg.content),
            tool_uses: extract_tool_uses(&msg.content),
            tool_results: extract_tool_results(&msg.content, &mut seen_tool_results),
        };
        match merged.last_mut() {
            Some(last) if last.role == turn.role => last.merge(turn),
            _ => merged.push(turn),
        }
    }
    merged
}

fn tool_specifications(tools: &[Tool]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            let description = tool.description.as_deref().unwrap_or("");
            let description = sanitize_tool_description(&tool.name, description)
                .unwrap_or(description);
            json!({
                "toolSpecification": {
                    "name": tool.name,
                    "description": description,
                    "inputSchema": {
                        "json": tool.input_schema.clone().unwrap_or(json!({}))
                    }
                }
            })
        })
        .collect()
}

fn history_entry(turn: &Turn, model_id: &str) -> Value {
    if turn.role == "assistant" {
        let content = if turn.text.is_empty() {
            "(empty)"
        } else {
            turn.text.as_str()
        };
        let mut msg = json!({ "content": content });
        if !turn.tool_uses.is_empty() {
            msg["toolUses"] = json!(turn.tool_uses);
        }
        json!({ "assistantResponseMessage": msg })
    } else {
        let content = if turn.text.is_empty() {
            "(empty)"
        } else {
            turn.text.as_str()
        };
        let mut msg = json!({
            "content": content,
            "modelId": model_id,
            "origin": "AI_EDITOR"
        });
        if !turn.images.is_empty() {
            msg["images"] = json!(turn.images);
        }
        if !turn.tool_results.is_empty() {
            msg["userInputMessageContext"] = json!({ "toolResults": turn.tool_results });
        }
        json!({ "userInputMessage": msg })
    }
}

/// Build the full Kiro payload for one request.
///
/// `conversation_id` is supplied by the caller so translation stays
/// deterministic; `auth_method`/`profile_arn` decide whether the profile ARN
/// rides at the request root.
pub fn build_kiro_payload(
    request: &ClaudeRequest,
    model_id: &str,
    conversation_id: &str,
    auth_method: AuthMethod,
    profile_arn: Option<&str>,
) -> Result<Value, TranslateError> {
    if request.messages.is_empty() {
        return Err(TranslateError::EmptyMessages);
    }

    let system = system_text(request);
    let mut turns = merge_turns(&request.messages);

    // Drop the dangling "{" stub some aborted generations leave as the tail.
    if turns.last().map(|t| t.is_stub()).unwrap_or(false) {
        turns.pop();
        if turns.is_empty() {
            return Err(TranslateError::EmptyMessages);
        }
    }

    // System prompt: folded into the first user turn, or emitted as a
    // standalone user-style history entry when the conversation opens with
    // an assistant turn.
    if let Some(sys) = &system {
        if turns.first().map(|t| t.role == "user").unwrap_or(false) {
            let first = turns.first_mut().unwrap();
            if first.text.is_empty() {
                first.text = sys.clone();
            } else {
                first.text = format!("{}\n\n{}", sys, first.text);
            }
        } else {
            turns.insert(0, Turn::synthetic("user", sys));
        }
    }

    // The final message becomes currentMessage. A trailing assistant turn
    // stays in history and the current message is a synthetic "Continue".
    let current = if turns.last().map(|t| t.role == "assistant").unwrap_or(false) {
        Turn::synthetic("user", "Continue")
    } else {
        turns.pop().unwrap()
    };

    // Kiro requires the history to end on an assistant turn before the
    // current user message.
    if turns.last().map(|t| t.role != "assistant").unwrap_or(false) {
        turns.push(Turn::synthetic("assistant", "Continue"));
    }

    let history: Vec<Value> = turns.iter().map(|t| history_entry(t, model_id)).collect();

    let current_content = if current.text.is_empty() {
        if current.tool_results.is_empty() {
            "Continue".to_string()
        } else {
            "Tool results provided.".to_string()
        }
    } else {
        current.text.clone()
    };

    let mut user_input = json!({
        "content": current_content,
        "modelId": model_id,
        "origin": "AI_EDITOR"
    });
    if !current.images.is_empty() {
        user_input["images"] = json!(current.images);
    }

    let mut context = Map::new();
    if let Some(tools) = &request.tools {
        let specs = tool_specifications(tools);
        if !specs.is_empty() {
            context.insert("tools".into(), json!(specs));
        }
    }
    if !current.tool_results.is_empty() {
        context.insert("toolResults".into(), json!(current.tool_results));
    }
    if !context.is_empty() {
        user_input["userInputMessageContext"] = Value::Object(context);
    }

    let mut conversation_state = json!({
        "chatTriggerType": "MANUAL",
        "conversationId": conversation_id,
        "currentMessage": { "userInputMessage": user_input }
    });
    if !history.is_empty() {
        conversation_state["history"] = json!(history);
    }

    let mut payload = json!({ "conversationState": conversation_state });
    if auth_method == AuthMethod::Social {
        if let Some(arn) = profile_arn {
            payload["profileArn"] = json!(arn);
        }
    }

    Ok(payload)
}
