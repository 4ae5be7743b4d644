// Kiro events → Anthropic message assembly, streaming and buffered.
//
// Streaming emits the canonical SSE sequence: message_start,
// content_block_start(text), text deltas, content_block_stop, one block
// triple per tool use, message_delta(stop_reason, usage), message_stop.
// Tool calls are accumulated during the stream and emitted as complete
// blocks at finalize time; bracketed tool invocations found in the text are
// stripped from the visible stream and surfaced the same way.

use serde_json::{json, Value};

use crate::proxy::tokenizer::estimate_tokens;
use crate::proxy::upstream::parsers::{dedup_tool_calls, BracketScanner, KiroEvent, ParsedToolCall};

/// One SSE frame: named event plus JSON payload.
#[derive(Debug, Clone)]
pub struct SseFrame {
    pub event: &'static str,
    pub data: Value,
}

impl SseFrame {
    fn new(event: &'static str, data: Value) -> Self {
        Self { event, data }
    }

    pub fn to_sse(&self) -> String {
        format!(
            "event: {}\ndata: {}\n\n",
            self.event,
            serde_json::to_string(&self.data).unwrap_or_default()
        )
    }
}

struct PendingTool {
    name: String,
    tool_use_id: String,
    input: String,
}

/// State machine converting parser events into Anthropic SSE frames.
pub struct AnthropicStreamBuilder {
    message_id: String,
    model: String,
    estimated_input_tokens: u32,
    content_index: usize,
    in_text_block: bool,
    sent_message_start: bool,
    output_chars: usize,
    current_tool: Option<PendingTool>,
    completed_tools: Vec<PendingTool>,
    scanner: BracketScanner,
    has_tool_calls: bool,
    output_tokens: u32,
}

impl AnthropicStreamBuilder {
    pub fn new(model: &str, estimated_input_tokens: u32) -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self {
            message_id: format!("msg_{}", &id[..24]),
            model: model.to_string(),
            estimated_input_tokens,
            content_index: 0,
            in_text_block: false,
            sent_message_start: false,
            output_chars: 0,
            current_tool: None,
            completed_tools: Vec::new(),
            scanner: BracketScanner::new(),
            has_tool_calls: false,
            output_tokens: 0,
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn stop_reason(&self) -> &'static str {
        if self.has_tool_calls {
            "tool_use"
        } else {
            "end_turn"
        }
    }

    pub fn usage(&self) -> (u32, u32) {
        (self.estimated_input_tokens, self.output_tokens)
    }

    fn message_start(&mut self, frames: &mut Vec<SseFrame>) {
        if self.sent_message_start {
            return;
        }
        self.sent_message_start = true;
        frames.push(SseFrame::new(
            "message_start",
            json!({
                "type": "message_start",
                "message": {
                    "id": self.message_id,
                    "type": "message",
                    "role": "assistant",
                    "content": [],
                    "model": self.model,
                    "stop_reason": null,
                    "stop_sequence": null,
                    "usage": {
                        "input_tokens": self.estimated_input_tokens,
                        "output_tokens": 0
                    }
                }
            }),
        ));
    }

    fn emit_text(&mut self, frames: &mut Vec<SseFrame>, text: &str) {
        if text.is_empty() {
            return;
        }
        self.message_start(frames);
        if !self.in_text_block {
            frames.push(SseFrame::new(
                "content_block_start",
                json!({
                    "type": "content_block_start",
                    "index": self.content_index,
                    "content_block": {"type": "text", "text": ""}
                }),
            ));
            self.in_text_block = true;
        }
        self.output_chars += text.len();
        frames.push(SseFrame::new(
            "content_block_delta",
            json!({
                "type": "content_block_delta",
                "index": self.content_index,
                "delta": {"type": "text_delta", "text": text}
            }),
        ));
    }

    fn close_text_block(&mut self, frames: &mut Vec<SseFrame>) {
        if self.in_text_block {
            frames.push(SseFrame::new(
                "content_block_stop",
                json!({"type": "content_block_stop", "index": self.content_index}),
            ));
            self.content_index += 1;
            self.in_text_block = false;
        }
    }

    fn finish_current_tool(&mut self) {
        if let Some(tool) = self.current_tool.take() {
            self.completed_tools.push(tool);
        }
    }

    pub fn on_event(&mut self, event: KiroEvent) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        self.message_start(&mut frames);

        match event {
            KiroEvent::ContentDelta(text) => {
                let visible = self.scanner.push(&text);
                self.emit_text(&mut frames, &visible);
            }
            KiroEvent::ToolUseStart { name, tool_use_id } => {
                // Repeated opens for the same id are argument continuations,
                // not new tools.
                if self
                    .current_tool
                    .as_ref()
                    .map(|t| t.tool_use_id == tool_use_id)
                    .unwrap_or(false)
                {
                    return frames;
                }
                self.finish_current_tool();
                self.current_tool = Some(PendingTool {
                    name,
                    tool_use_id,
                    input: String::new(),
                });
            }
            KiroEvent::ToolInputDelta(partial) => {
                if let Some(tool) = self.current_tool.as_mut() {
                    tool.input.push_str(&partial);
                }
            }
            KiroEvent::ToolUseStop => {
                self.finish_current_tool();
            }
        }

        frames
    }

    /// Collected tool blocks: structured tools first, then bracket-extracted
    /// ones, deduplicated by `(name, arguments)`.
    fn collect_tools(&mut self) -> Vec<(String, String, Value)> {
        self.finish_current_tool();

        let mut calls: Vec<ParsedToolCall> = Vec::new();
        for tool in self.completed_tools.drain(..) {
            let arguments: Value = if tool.input.trim().is_empty() {
                json!({})
            } else {
                // A parse failure keeps the raw string; the caller decides
                // what to do with ambiguous arguments.
                serde_json::from_str(&tool.input)
                    .unwrap_or(Value::String(tool.input.clone()))
            };
            calls.push(ParsedToolCall {
                name: tool.name,
                arguments,
                tool_call_id: tool.tool_use_id,
            });
        }
        calls.extend(self.scanner.take_tools());

        dedup_tool_calls(calls)
            .into_iter()
            .map(|c| (c.tool_call_id, c.name, c.arguments))
            .collect()
    }

    fn emit_tool_blocks(&mut self, frames: &mut Vec<SseFrame>, tools: &[(String, String, Value)]) {
        for (id, name, input) in tools {
            self.has_tool_calls = true;
            frames.push(SseFrame::new(
                "content_block_start",
                json!({
                    "type": "content_block_start",
                    "index": self.content_index,
                    "content_block": {
                        "type": "tool_use",
                        "id": id,
                        "name": name,
                        "input": {}
                    }
                }),
            ));
            let partial = match input {
                Value::String(raw) => raw.clone(),
                other => serde_json::to_string(other).unwrap_or_else(|_| "{}".into()),
            };
            frames.push(SseFrame::new(
                "content_block_delta",
                json!({
                    "type": "content_block_delta",
                    "index": self.content_index,
                    "delta": {"type": "input_json_delta", "partial_json": partial}
                }),
            ));
            frames.push(SseFrame::new(
                "content_block_stop",
                json!({"type": "content_block_stop", "index": self.content_index}),
            ));
            self.content_index += 1;
        }
    }

    /// End of stream: flush withheld text, emit tool blocks, close out with
    /// message_delta + message_stop.
    pub fn finalize(&mut self) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        self.message_start(&mut frames);

        let rest = self.scanner.flush();
        self.emit_text(&mut frames, &rest);
        self.close_text_block(&mut frames);

        let tools = self.collect_tools();
        self.emit_tool_blocks(&mut frames, &tools);

        self.output_tokens = estimate_tokens(&"x".repeat(self.output_chars));
        frames.push(SseFrame::new(
            "message_delta",
            json!({
                "type": "message_delta",
                "delta": {
                    "stop_reason": self.stop_reason(),
                    "stop_sequence": null
                },
                "usage": {
                    "output_tokens": self.output_tokens
                }
            }),
        ));
        frames.push(SseFrame::new(
            "message_stop",
            json!({"type": "message_stop"}),
        ));

        frames
    }
}

/// Assemble a buffered Anthropic `message` from a complete event list.
pub fn assemble_message(model: &str, estimated_input_tokens: u32, events: Vec<KiroEvent>) -> Value {
    let mut builder = AnthropicStreamBuilder::new(model, estimated_input_tokens);
    let mut visible_text = String::new();

    for event in events {
        match event {
            KiroEvent::ContentDelta(text) => {
                visible_text.push_str(&builder.scanner.push(&text));
            }
            KiroEvent::ToolUseStart { name, tool_use_id } => {
                if builder
                    .current_tool
                    .as_ref()
                    .map(|t| t.tool_use_id == tool_use_id)
                    .unwrap_or(false)
                {
                    continue;
                }
                builder.finish_current_tool();
                builder.current_tool = Some(PendingTool {
                    name,
                    tool_use_id,
                    input: String::new(),
                });
            }
            KiroEvent::ToolInputDelta(partial) => {
                if let Some(tool) = builder.current_tool.as_mut() {
                    tool.input.push_str(&partial);
                }
            }
            KiroEvent::ToolUseStop => builder.finish_current_tool(),
        }
    }
    visible_text.push_str(&builder.scanner.flush());

    let tools = builder.collect_tools();
    let mut content: Vec<Value> = Vec::new();
    if !visible_text.is_empty() {
        content.push(json!({"type": "text", "text": visible_text}));
    }
    for (id, name, input) in &tools {
        content.push(json!({
            "type": "tool_use",
            "id": id,
            "name": name,
            "input": input
        }));
    }

    let stop_reason = if tools.is_empty() { "end_turn" } else { "tool_use" };
    let output_tokens = estimate_tokens(&visible_text);

    json!({
        "id": builder.message_id,
        "type": "message",
        "role": "assistant",
        "model": model,
        "content": content,
        "stop_reason": stop_reason,
        "stop_sequence": null,
        "usage": {
            "input_tokens": estimated_input_tokens,
            "output_tokens": output_tokens
        }
    })
}
