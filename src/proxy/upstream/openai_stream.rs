// Anthropic events → OpenAI wire format.
//
// Streaming OpenAI requests ride the same Kiro pipeline as Anthropic ones;
// the frames the Anthropic builder produces are re-serialized here into
// `chat.completion.chunk` objects per the normative mapping table.

use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::proxy::upstream::sse::SseFrame;

/// `end_turn→stop`, `max_tokens→length`, `tool_use→tool_calls`.
pub fn map_finish_reason(stop_reason: &str) -> &'static str {
    match stop_reason {
        "max_tokens" => "length",
        "tool_use" => "tool_calls",
        _ => "stop",
    }
}

/// Ensure a tool-call id carries the OpenAI `call_` prefix.
pub fn openai_tool_call_id(id: &str) -> String {
    if id.starts_with("call_") {
        id.to_string()
    } else {
        format!("call_{}", id)
    }
}

/// Translates Anthropic SSE frames into OpenAI `chat.completion.chunk`
/// SSE lines. Each input frame yields zero or more output lines.
pub struct OpenAiStreamConverter {
    id: String,
    model: String,
    created: i64,
    prompt_tokens: u32,
    /// Anthropic content-block index → OpenAI tool index.
    tool_indices: HashMap<u64, u64>,
    next_tool_index: u64,
}

impl OpenAiStreamConverter {
    pub fn new(model: &str) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self {
            id: format!("chatcmpl-{}", &suffix[..24]),
            model: model.to_string(),
            created: Utc::now().timestamp(),
            prompt_tokens: 0,
            tool_indices: HashMap::new(),
            next_tool_index: 0,
        }
    }

    fn chunk(&self, delta: Value, finish_reason: Option<&str>, usage: Option<Value>) -> String {
        let mut body = json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": delta,
                "finish_reason": finish_reason
            }]
        });
        if let Some(usage) = usage {
            body["usage"] = usage;
        }
        format!(
            "data: {}\n\n",
            serde_json::to_string(&body).unwrap_or_default()
        )
    }

    pub fn done_line() -> &'static str {
        "data: [DONE]\n\n"
    }

    pub fn convert(&mut self, frame: &SseFrame) -> Vec<String> {
        let data = &frame.data;
        match frame.event {
            "message_start" => {
                self.prompt_tokens = data["message"]["usage"]["input_tokens"]
                    .as_u64()
                    .unwrap_or(0) as u32;
                vec![self.chunk(
                    json!({"role": "assistant", "content": ""}),
                    None,
                    Some(json!({"prompt_tokens": self.prompt_tokens})),
                )]
            }
            "content_block_start" => {
                let block = &data["content_block"];
                match block["type"].as_str().unwrap_or("") {
                    "tool_use" => {
                        let anthropic_index = data["index"].as_u64().unwrap_or(0);
                        let tool_index = self.next_tool_index;
                        self.next_tool_index += 1;
                        self.tool_indices.insert(anthropic_index, tool_index);
                        let id = openai_tool_call_id(block["id"].as_str().unwrap_or(""));
                        let name = block["name"].as_str().unwrap_or("");
                        vec![self.chunk(
                            json!({"tool_calls": [{
                                "index": tool_index,
                                "id": id,
                                "type": "function",
                                "function": {"name": name, "arguments": ""}
                            }]}),
                            None,
                            None,
                        )]
                    }
                    _ => vec![self.chunk(json!({"content": ""}), None, None)],
                }
            }
            "content_block_delta" => {
                let delta = &data["delta"];
                match delta["type"].as_str().unwrap_or("") {
                    "text_delta" => {
                        let text = delta["text"].as_str().unwrap_or("");
                        vec![self.chunk(json!({"content": text}), None, None)]
                    }
                    "thinking_delta" => {
                        let thinking = delta["thinking"].as_str().unwrap_or("");
                        vec![self.chunk(json!({"reasoning_content": thinking}), None, None)]
                    }
                    "input_json_delta" => {
                        let partial = delta["partial_json"].as_str().unwrap_or("");
                        let anthropic_index = data["index"].as_u64().unwrap_or(0);
                        let tool_index = self
                            .tool_indices
                            .get(&anthropic_index)
                            .copied()
                            .unwrap_or(0);
                        vec![self.chunk(
                            json!({"tool_calls": [{
                                "index": tool_index,
                                "function": {"arguments": partial}
                            }]}),
                            None,
                            None,
                        )]
                    }
                    _ => vec![],
                }
            }
            "content_block_stop" => vec![self.chunk(json!({}), None, None)],
            "message_delta" => {
                let stop_reason = data["delta"]["stop_reason"].as_str().unwrap_or("end_turn");
                let completion = data["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32;
                let usage = json!({
                    "prompt_tokens": self.prompt_tokens,
                    "completion_tokens": completion,
                    "total_tokens": self.prompt_tokens + completion
                });
                vec![self.chunk(json!({}), Some(map_finish_reason(stop_reason)), Some(usage))]
            }
            "message_stop" => vec![self.chunk(json!({}), Some("stop"), None)],
            _ => vec![],
        }
    }
}

/// Wrap a buffered Anthropic `message` into an OpenAI `chat.completion`.
pub fn assemble_chat_completion(public_model: &str, message: &Value) -> Value {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let id = format!("chatcmpl-{}", &suffix[..24]);

    let mut content_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    if let Some(blocks) = message["content"].as_array() {
        for block in blocks {
            match block["type"].as_str().unwrap_or("") {
                "text" => {
                    if let Some(t) = block["text"].as_str() {
                        content_parts.push(t.to_string());
                    }
                }
                "tool_use" => {
                    let arguments = match &block["input"] {
                        Value::String(raw) => raw.clone(),
                        other => serde_json::to_string(other).unwrap_or_else(|_| "{}".into()),
                    };
                    tool_calls.push(json!({
                        "id": openai_tool_call_id(block["id"].as_str().unwrap_or("")),
                        "type": "function",
                        "function": {
                            "name": block["name"].as_str().unwrap_or(""),
                            "arguments": arguments
                        }
                    }));
                }
                _ => {}
            }
        }
    }

    let stop_reason = message["stop_reason"].as_str().unwrap_or("end_turn");
    let prompt_tokens = message["usage"]["input_tokens"].as_u64().unwrap_or(0);
    let completion_tokens = message["usage"]["output_tokens"].as_u64().unwrap_or(0);

    let mut assistant_message = json!({
        "role": "assistant",
        "content": content_parts.join("")
    });
    if !tool_calls.is_empty() {
        assistant_message["tool_calls"] = json!(tool_calls);
    }

    json!({
        "id": id,
        "object": "chat.completion",
        "created": Utc::now().timestamp(),
        "model": public_model,
        "choices": [{
            "index": 0,
            "message": assistant_message,
            "finish_reason": map_finish_reason(stop_reason)
        }],
        "usage": {
            "prompt_tokens": prompt_tokens,
            "completion_tokens": completion_tokens,
            "total_tokens": prompt_tokens + completion_tokens
        }
    })
}
