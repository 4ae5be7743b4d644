// OpenAI → Anthropic request normalization. Streaming and non-streaming
// OpenAI traffic both ride the Kiro pipeline in Anthropic shape and are
// re-serialized on the way out.

use serde_json::{json, Value};

use crate::proxy::mappers::claude::models::{
    ClaudeRequest, ContentBlock, DocumentSource, ImageSource, Message, MessageContent,
    SystemPrompt, ThinkingConfig, Tool,
};
use crate::proxy::mappers::openai::models::{
    OpenAiContent, OpenAiContentPart, OpenAiRequest,
};

const SUPPORTED_IMAGE_MIMES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/jpg",
    "image/gif",
    "image/webp",
];

fn is_supported_document_mime(mime: &str) -> bool {
    mime == "application/pdf"
        || mime.starts_with("text/")
        || mime == "application/json"
        || mime == "application/xml"
        || mime == "application/javascript"
        || mime == "application/x-javascript"
}

/// Split a `data:<mime>;base64,<payload>` URL. Returns `None` for anything else.
fn split_data_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let comma = rest.find(',')?;
    let header = &rest[..comma];
    let payload = rest[comma + 1..].to_string();
    let mime = header.split(';').next().unwrap_or("").to_string();
    if mime.is_empty() {
        return None;
    }
    Some((mime, payload))
}

fn mime_from_filename(name: &str) -> Option<&'static str> {
    let ext = name.rsplit('.').next()?.to_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "pdf" => Some("application/pdf"),
        "txt" | "md" => Some("text/plain"),
        "json" => Some("application/json"),
        "xml" => Some("application/xml"),
        "js" => Some("text/javascript"),
        "css" => Some("text/css"),
        _ => None,
    }
}

/// Convert one OpenAI content part into an Anthropic content block per the
/// normalization table. Unsupported inputs degrade to bracketed text so the
/// model sees what was dropped.
fn convert_part(part: &OpenAiContentPart) -> ContentBlock {
    match part.part_type.as_str() {
        "text" => ContentBlock::Text {
            text: part.text.clone().unwrap_or_default(),
        },
        "image_url" => {
            let url = part
                .image_url
                .as_ref()
                .map(|i| i.url.as_str())
                .unwrap_or("");
            if let Some((mime, data)) = split_data_url(url) {
                ContentBlock::Image {
                    source: ImageSource {
                        source_type: "base64".into(),
                        media_type: mime,
                        data,
                    },
                    cache_control: None,
                }
            } else if url.starts_with("http://") || url.starts_with("https://") {
                ContentBlock::Text {
                    text: "[Error: URL images are not supported. Provide images as base64 data URLs.]"
                        .into(),
                }
            } else {
                ContentBlock::Text {
                    text: "[Error: unrecognized image_url payload]".into(),
                }
            }
        }
        "file" | "document" => {
            let file = part.file.clone().unwrap_or_default();
            let (mime, data) = match file.file_data.as_deref().and_then(split_data_url) {
                Some((m, d)) => (m, d),
                None => {
                    let mime = file
                        .media_type
                        .clone()
                        .or_else(|| {
                            file.filename
                                .as_deref()
                                .and_then(mime_from_filename)
                                .map(String::from)
                        })
                        .unwrap_or_default();
                    (mime, file.file_data.clone().unwrap_or_default())
                }
            };

            if mime.is_empty() || data.is_empty() {
                return ContentBlock::Text {
                    text: "[Unsupported file type: unknown]".into(),
                };
            }
            if SUPPORTED_IMAGE_MIMES.contains(&mime.as_str()) {
                ContentBlock::Image {
                    source: ImageSource {
                        source_type: "base64".into(),
                        media_type: mime,
                        data,
                    },
                    cache_control: None,
                }
            } else if is_supported_document_mime(&mime) {
                ContentBlock::Document {
                    source: DocumentSource {
                        source_type: "base64".into(),
                        media_type: mime,
                        data,
                    },
                    cache_control: None,
                }
            } else {
                ContentBlock::Text {
                    text: format!("[Unsupported file type: {}]", mime),
                }
            }
        }
        "input_audio" => ContentBlock::Text {
            text: "[Error: Audio input not supported]".into(),
        },
        other => ContentBlock::Text {
            text: format!("[Unsupported content part: {}]", other),
        },
    }
}

fn convert_content(content: &OpenAiContent) -> MessageContent {
    match content {
        OpenAiContent::Text(s) => MessageContent::String(s.clone()),
        OpenAiContent::Parts(parts) => {
            MessageContent::Array(parts.iter().map(convert_part).collect())
        }
    }
}

fn content_as_text(content: &OpenAiContent) -> String {
    match content {
        OpenAiContent::Text(s) => s.clone(),
        OpenAiContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| p.text.clone())
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn map_tool_choice(choice: &Value) -> Option<Value> {
    if let Some(s) = choice.as_str() {
        return match s {
            "auto" => Some(json!({"type": "auto"})),
            "none" => Some(json!({"type": "none"})),
            "required" => Some(json!({"type": "any"})),
            _ => None,
        };
    }
    let name = choice
        .get("function")
        .and_then(|f| f.get("name"))
        .and_then(|n| n.as_str())?;
    Some(json!({"type": "tool", "name": name}))
}

fn thinking_config(req: &OpenAiRequest) -> Option<ThinkingConfig> {
    if let Some(budget) = req.thinking_budget {
        return Some(ThinkingConfig {
            type_: "enabled".into(),
            budget_tokens: Some(budget),
        });
    }
    let budget = match req.reasoning_effort.as_deref() {
        Some("low") => 2048,
        Some("medium") => 8192,
        Some("high") => 16384,
        _ => return None,
    };
    Some(ThinkingConfig {
        type_: "enabled".into(),
        budget_tokens: Some(budget),
    })
}

/// Normalize a full OpenAI request into Anthropic shape.
pub fn to_claude_request(req: &OpenAiRequest) -> ClaudeRequest {
    let mut system_parts: Vec<String> = Vec::new();
    let mut messages: Vec<Message> = Vec::new();

    for msg in &req.messages {
        match msg.role.as_str() {
            "system" | "developer" => {
                if let Some(content) = &msg.content {
                    let text = content_as_text(content);
                    if !text.is_empty() {
                        system_parts.push(text);
                    }
                }
            }
            "tool" => {
                // Tool results become user turns carrying one tool_result block.
                let tool_use_id = msg.tool_call_id.clone().unwrap_or_default();
                let content = msg
                    .content
                    .as_ref()
                    .map(content_as_text)
                    .unwrap_or_default();
                messages.push(Message {
                    role: "user".into(),
                    content: MessageContent::Array(vec![ContentBlock::ToolResult {
                        tool_use_id,
                        content: Value::String(content),
                        is_error: None,
                    }]),
                });
            }
            "assistant" => {
                let mut blocks: Vec<ContentBlock> = Vec::new();
                if let Some(content) = &msg.content {
                    match convert_content(content) {
                        MessageContent::String(s) => {
                            if !s.is_empty() {
                                blocks.push(ContentBlock::Text { text: s });
                            }
                        }
                        MessageContent::Array(parts) => blocks.extend(parts),
                    }
                }
                if let Some(calls) = &msg.tool_calls {
                    for call in calls {
                        let input = serde_json::from_str::<Value>(&call.function.arguments)
                            .unwrap_or_else(|_| Value::String(call.function.arguments.clone()));
                        blocks.push(ContentBlock::ToolUse {
                            id: call.id.clone(),
                            name: call.function.name.clone(),
                            input,
                        });
                    }
                }
                let content = if blocks.is_empty() {
                    MessageContent::String(String::new())
                } else {
                    MessageContent::Array(blocks)
                };
                messages.push(Message {
                    role: "assistant".into(),
                    content,
                });
            }
            _ => {
                let content = msg
                    .content
                    .as_ref()
                    .map(convert_content)
                    .unwrap_or_else(|| MessageContent::String(String::new()));
                messages.push(Message {
                    role: "user".into(),
                    content,
                });
            }
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(SystemPrompt::String(system_parts.join("\n")))
    };

    let tools = req.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|t| Tool {
                name: t.function.name.clone(),
                description: t.function.description.clone(),
                input_schema: t.function.parameters.clone(),
            })
            .collect::<Vec<_>>()
    });

    ClaudeRequest {
        model: req.model.clone(),
        messages,
        system,
        tools,
        tool_choice: req.tool_choice.as_ref().and_then(map_tool_choice),
        stream: req.stream,
        max_tokens: req.max_tokens.or(req.max_completion_tokens),
        temperature: req.temperature,
        top_p: req.top_p,
        top_k: None,
        thinking: thinking_config(req),
        metadata: None,
    }
}
